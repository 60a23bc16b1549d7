use crate::error::Result;
use crate::format::CompAlgorithm;

/// Compresses single blocks with one configured algorithm.
///
/// Implementations must be pure: the same input always produces the same
/// bytes and the same reported algorithm, because block offsets in the index
/// are derived from the compressed sizes.
pub trait Compressor: Send + Sync {
    /// Algorithm this compressor nominally applies.
    fn algorithm(&self) -> CompAlgorithm;

    /// Upper bound of the compressed size of `src_len` input bytes.
    fn max_compressed_size(&self, src_len: usize) -> usize;

    /// Compress `src` into `dst` (cleared first) and return the algorithm
    /// actually used. Returning [`CompAlgorithm::None`] means `dst` holds
    /// `src` verbatim.
    fn compress(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<CompAlgorithm>;
}

/// Decodes blocks given the algorithm id recorded in the block index.
pub trait Decompressor: Send + Sync {
    /// Decompress `src` into `dst`. `dst.len()` is the expected decompressed
    /// size; producing any other size is a data-corruption error.
    fn decompress(&self, algorithm: CompAlgorithm, src: &[u8], dst: &mut [u8]) -> Result<()>;
}

/// Chooses the algorithm for each block of a column.
///
/// The choice may depend only on the block index and the policy's own
/// configuration, so blocks can be compressed on any worker in any order.
pub trait StreamCompressor: Send + Sync {
    fn compress_block(&self, block_index: u64, src: &[u8], dst: &mut Vec<u8>) -> Result<CompAlgorithm>;

    /// Upper bound of a compressed block of `block_len` input bytes.
    fn max_compressed_size(&self, block_len: usize) -> usize;
}
