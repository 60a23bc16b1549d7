use fstore_core::{FstError, Result};
use lz4_flex::block::{compress_into, decompress_into, get_maximum_output_size};

use crate::BlockCodec;

/// LZ4 block coder.
///
/// Fastest decompression of the bundled coders. Block sizes are known from
/// the block index, so no size prefix is stored.
pub struct Lz4Codec;

impl BlockCodec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn max_compressed_size(&self, raw_len: usize) -> usize {
        get_maximum_output_size(raw_len)
    }

    fn compress_block(&self, raw: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        dst.clear();
        dst.resize(get_maximum_output_size(raw.len()), 0);
        let n = compress_into(raw, dst)
            .map_err(|e| FstError::corrupt(format!("lz4 compress error: {e}")))?;
        dst.truncate(n);
        Ok(())
    }

    fn decompress_block(&self, compressed: &[u8], dst: &mut [u8]) -> Result<()> {
        let n = decompress_into(compressed, dst)
            .map_err(|e| FstError::corrupt(format!("lz4 decompress error: {e}")))?;
        if n != dst.len() {
            return Err(FstError::corrupt(format!(
                "lz4 block decompressed to {n} bytes, expected {}",
                dst.len()
            )));
        }
        Ok(())
    }
}
