use fstore_core::{FstError, Result};

use crate::BlockCodec;

/// Zstandard block coder.
///
/// Each block is compressed independently at the configured level, so any
/// block decodes without touching its neighbours.
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl BlockCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn max_compressed_size(&self, raw_len: usize) -> usize {
        zstd::zstd_safe::compress_bound(raw_len)
    }

    fn compress_block(&self, raw: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        *dst = zstd::bulk::compress(raw, self.level)?;
        Ok(())
    }

    fn decompress_block(&self, compressed: &[u8], dst: &mut [u8]) -> Result<()> {
        let n = zstd::bulk::decompress_to_buffer(compressed, dst)
            .map_err(|e| FstError::corrupt(format!("zstd decompress error: {e}")))?;
        if n != dst.len() {
            return Err(FstError::corrupt(format!(
                "zstd block decompressed to {n} bytes, expected {}",
                dst.len()
            )));
        }
        Ok(())
    }
}
