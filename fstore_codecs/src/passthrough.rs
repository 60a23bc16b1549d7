use fstore_core::{FstError, Result};

use crate::BlockCodec;

/// No-op coder: stores bytes verbatim.
///
/// Used on its own for the uncompressed algorithm and as the back end of the
/// fixed-ratio transforms, whose output is already dense.
pub struct PassThroughCodec;

impl BlockCodec for PassThroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn max_compressed_size(&self, raw_len: usize) -> usize {
        raw_len
    }

    fn compress_block(&self, raw: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        dst.clear();
        dst.extend_from_slice(raw);
        Ok(())
    }

    fn decompress_block(&self, compressed: &[u8], dst: &mut [u8]) -> Result<()> {
        if compressed.len() != dst.len() {
            return Err(FstError::corrupt(format!(
                "stored block holds {} bytes, expected {}",
                compressed.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(compressed);
        Ok(())
    }
}
