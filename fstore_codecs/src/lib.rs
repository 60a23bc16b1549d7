//! Compression algorithms and per-block policies for fstore.
//!
//! Every [`CompAlgorithm`] is an element transform (identity, byte shuffle,
//! logical packing or integer narrowing) followed by a byte coder (stored,
//! LZ4 or ZSTD). [`Registry`] decodes any of them; [`SingleCompressor`]
//! encodes one, and the `Stream*` policies spread algorithms over blocks.

pub mod algorithm;
pub mod bitpack;
mod lz4_codec;
mod passthrough;
pub mod shuffle;
pub mod stream;
mod zstd_codec;

pub use algorithm::{compress, decompress, max_compressed_size, Registry, SingleCompressor};
pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use stream::{selects_block, StreamComposite, StreamLinear, StreamSingle};
pub use zstd_codec::ZstdCodec;

use fstore_core::Result;

pub use fstore_core::CompAlgorithm;

/// A byte coder applied to one independent block.
///
/// Coders keep no state between blocks; that independence is what lets any
/// block of a stream be decoded on its own.
pub trait BlockCodec: Send + Sync {
    /// Human-readable coder name for diagnostics.
    fn name(&self) -> &'static str;

    /// Upper bound of the coded size of `raw_len` bytes.
    fn max_compressed_size(&self, raw_len: usize) -> usize;

    /// Code `raw` into `dst`, replacing its contents.
    fn compress_block(&self, raw: &[u8], dst: &mut Vec<u8>) -> Result<()>;

    /// Decode `compressed` into `dst`, which must be filled exactly.
    fn decompress_block(&self, compressed: &[u8], dst: &mut [u8]) -> Result<()>;
}

/// ZSTD level used for a compression level in the upper half of the range.
///
/// Levels 51..=100 map linearly onto ZSTD levels 1..=10.
pub fn zstd_level(compression: u32) -> i32 {
    let over = compression.clamp(50, 100) - 50;
    1 + (9 * over / 50) as i32
}
