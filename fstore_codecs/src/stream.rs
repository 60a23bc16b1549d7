//! Per-block algorithm policies.
//!
//! A policy decides which compressor handles block `i` from `i` and its own
//! settings alone. The selection is spread evenly: with level `L` (0..=100),
//! block `i` is selected when `floor((i+1)L/100) - floor(iL/100) >= 1`, so
//! any 100 consecutive blocks contain exactly `L` selected ones.

use fstore_core::{CompAlgorithm, Compressor, FstError, Result, StreamCompressor};

use crate::algorithm::SingleCompressor;

/// Highest policy level; every block is selected.
pub const MAX_POLICY_LEVEL: u32 = 100;

/// Whether block `block_index` is selected at `level` percent.
pub fn selects_block(block_index: u64, level: u32) -> bool {
    let level = u64::from(level.min(MAX_POLICY_LEVEL));
    let before = block_index.saturating_mul(level) / 100;
    let after = block_index.saturating_add(1).saturating_mul(level) / 100;
    after > before
}

fn check_level(level: u32) -> Result<u32> {
    if level > MAX_POLICY_LEVEL {
        return Err(FstError::InvalidCompressionLevel(level));
    }
    Ok(level)
}

fn store_raw(src: &[u8], dst: &mut Vec<u8>) -> CompAlgorithm {
    dst.clear();
    dst.extend_from_slice(src);
    CompAlgorithm::None
}

/// Every block goes through one compressor.
#[derive(Debug, Clone, Copy)]
pub struct StreamSingle {
    compressor: SingleCompressor,
}

impl StreamSingle {
    pub fn new(compressor: SingleCompressor) -> Self {
        Self { compressor }
    }
}

impl StreamCompressor for StreamSingle {
    fn compress_block(&self, _block_index: u64, src: &[u8], dst: &mut Vec<u8>) -> Result<CompAlgorithm> {
        self.compressor.compress(src, dst)
    }

    fn max_compressed_size(&self, block_len: usize) -> usize {
        self.compressor.max_compressed_size(block_len)
    }
}

/// A `level` percent share of the blocks is compressed, the rest is stored.
#[derive(Debug, Clone, Copy)]
pub struct StreamLinear {
    compressor: SingleCompressor,
    level: u32,
}

impl StreamLinear {
    pub fn new(compressor: SingleCompressor, level: u32) -> Result<Self> {
        Ok(Self {
            compressor,
            level: check_level(level)?,
        })
    }
}

impl StreamCompressor for StreamLinear {
    fn compress_block(&self, block_index: u64, src: &[u8], dst: &mut Vec<u8>) -> Result<CompAlgorithm> {
        if selects_block(block_index, self.level) {
            self.compressor.compress(src, dst)
        } else {
            Ok(store_raw(src, dst))
        }
    }

    fn max_compressed_size(&self, block_len: usize) -> usize {
        self.compressor.max_compressed_size(block_len)
    }
}

/// Blocks selected at `level` use `second`; all others use `first`.
#[derive(Debug, Clone, Copy)]
pub struct StreamComposite {
    first: SingleCompressor,
    second: SingleCompressor,
    level: u32,
}

impl StreamComposite {
    pub fn new(first: SingleCompressor, second: SingleCompressor, level: u32) -> Result<Self> {
        Ok(Self {
            first,
            second,
            level: check_level(level)?,
        })
    }
}

impl StreamCompressor for StreamComposite {
    fn compress_block(&self, block_index: u64, src: &[u8], dst: &mut Vec<u8>) -> Result<CompAlgorithm> {
        if selects_block(block_index, self.level) {
            self.second.compress(src, dst)
        } else {
            self.first.compress(src, dst)
        }
    }

    fn max_compressed_size(&self, block_len: usize) -> usize {
        self.first
            .max_compressed_size(block_len)
            .max(self.second.max_compressed_size(block_len))
    }
}
