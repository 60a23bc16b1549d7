use std::io::{Seek, SeekFrom, Write};

use tracing::{debug, trace};

use crate::codec::{Compressor, StreamCompressor};
use crate::error::{FstError, Result};
use crate::format::{
    pack_index_entry, stream_meta_to_bytes, BlockStreamHeader, CompAlgorithm,
    BLOCK_STREAM_HEADER_SIZE, INDEX_ENTRY_SIZE, STREAM_META_SIZE,
};
use crate::pool::Parallelism;

/// Blocks handed to the worker pool per round. Each round is compressed in
/// parallel and then committed to the stream in block order.
pub const WRITE_BATCH_BLOCKS: usize = 64;

/// Repetition units per job when encoding a fixed-ratio stream.
pub const FIXED_RATIO_JOB_UNITS: usize = 4096;

/// Writes one column's data as a block stream.
///
/// # Layout written
/// ```text
/// [HEADER: max_comp_size:u32, block_size_elements:u32]
/// [INDEX: (N + 1) × u64, algorithm << 48 | file offset]   ← zeroed first
/// [BLOCK 0] [BLOCK 1] ... [BLOCK N-1]                      ← in block order
/// ← seek back, write the real header and index, seek to the end
/// ```
/// Unblocked streams (raw or fixed-ratio) carry a meta word
/// `(0u32, algorithm:u32)` in place of the index.
pub struct BlockWriter<'a, W: Write + Seek> {
    out: &'a mut W,
    parallelism: Parallelism,
}

impl<'a, W: Write + Seek> BlockWriter<'a, W> {
    pub fn new(out: &'a mut W, parallelism: Parallelism) -> Self {
        Self { out, parallelism }
    }

    /// Write `src` blocked and compressed by `compressor`, or verbatim when
    /// `compressor` is `None`. Returns the number of bytes written.
    pub fn write(
        &mut self,
        src: &[u8],
        element_size: usize,
        block_size_elements: u32,
        compressor: Option<&dyn StreamCompressor>,
    ) -> Result<u64> {
        match compressor {
            Some(compressor) => {
                self.write_compressed(src, element_size, block_size_elements, compressor)
            }
            None => self.write_uncompressed(src),
        }
    }

    /// Raw stream: header `(0, 0)`, meta `(0, None)`, then `src` verbatim.
    pub fn write_uncompressed(&mut self, src: &[u8]) -> Result<u64> {
        self.out.write_all(&BlockStreamHeader::default().to_bytes())?;
        self.out.write_all(&stream_meta_to_bytes(CompAlgorithm::None))?;
        self.out.write_all(src)?;
        trace!(bytes = src.len(), "wrote uncompressed stream");
        Ok((BLOCK_STREAM_HEADER_SIZE + STREAM_META_SIZE + src.len()) as u64)
    }

    /// Fixed-ratio stream: every repetition unit of the input maps to a fixed
    /// number of output bytes, so readers locate any row by arithmetic alone.
    pub fn write_fixed_ratio(
        &mut self,
        src: &[u8],
        element_size: usize,
        compressor: &dyn Compressor,
    ) -> Result<u64> {
        let algorithm = compressor.algorithm();
        let ratio = algorithm.fixed_ratio().ok_or_else(|| {
            FstError::corrupt(format!("{} is not a fixed-ratio algorithm", algorithm.name()))
        })?;
        if element_size == 0 || ratio.src_unit % element_size != 0 || src.len() % element_size != 0 {
            return Err(FstError::corrupt(format!(
                "element size {element_size} does not fit the {} repetition unit",
                algorithm.name()
            )));
        }

        self.out.write_all(&BlockStreamHeader::default().to_bytes())?;
        self.out.write_all(&stream_meta_to_bytes(algorithm))?;
        let mut written = (BLOCK_STREAM_HEADER_SIZE + STREAM_META_SIZE) as u64;

        let job_bytes = FIXED_RATIO_JOB_UNITS * ratio.src_unit;
        let jobs = src.len().div_ceil(job_bytes);
        let pool = self.parallelism.pool(jobs)?;

        let mut next = 0;
        while next < jobs {
            let end = (next + WRITE_BATCH_BLOCKS).min(jobs);
            let encoded = pool.map_ordered(next..end, |job| {
                let chunk = &src[job * job_bytes..((job + 1) * job_bytes).min(src.len())];
                let mut dst = Vec::with_capacity(ratio.compressed_len(chunk.len()));
                let used = compressor.compress(chunk, &mut dst)?;
                if used != algorithm || dst.len() != ratio.compressed_len(chunk.len()) {
                    return Err(FstError::corrupt(format!(
                        "{} produced {} bytes for {} input bytes",
                        algorithm.name(),
                        dst.len(),
                        chunk.len()
                    )));
                }
                Ok(dst)
            })?;
            for bytes in encoded {
                self.out.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
            next = end;
        }

        debug!(algorithm = algorithm.name(), bytes = written, "wrote fixed-ratio stream");
        Ok(written)
    }

    /// Blocked stream compressed by `compressor`. A zero-length source writes
    /// an empty raw stream.
    pub fn write_compressed(
        &mut self,
        src: &[u8],
        element_size: usize,
        block_size_elements: u32,
        compressor: &dyn StreamCompressor,
    ) -> Result<u64> {
        if element_size == 0 || src.len() % element_size != 0 {
            return Err(FstError::corrupt(format!(
                "source of {} bytes is not a whole number of {element_size}-byte elements",
                src.len()
            )));
        }
        if src.is_empty() {
            return self.write_uncompressed(src);
        }
        if block_size_elements == 0 {
            return Err(FstError::corrupt("block size of a compressed stream must be nonzero"));
        }

        let element_count = src.len() / element_size;
        let block_bytes = block_size_elements as usize * element_size;
        let block_count = element_count.div_ceil(block_size_elements as usize);

        self.write_blocks_with(block_size_elements, block_count, |block| {
            let start = block * block_bytes;
            let raw = &src[start..(start + block_bytes).min(src.len())];
            let mut dst = Vec::with_capacity(compressor.max_compressed_size(raw.len()));
            let algorithm = compressor.compress_block(block as u64, raw, &mut dst)?;
            Ok((algorithm, dst))
        })
    }

    /// Write an indexed stream of `block_count` blocks whose bytes come from
    /// `encode`. Blocks are encoded in parallel batches and committed in
    /// ascending order, since each index entry is a cumulative offset.
    pub fn write_blocks_with<F>(
        &mut self,
        block_size_elements: u32,
        block_count: usize,
        encode: F,
    ) -> Result<u64>
    where
        F: Fn(usize) -> Result<(CompAlgorithm, Vec<u8>)> + Send + Sync,
    {
        let stream_start = self.out.stream_position()?;
        let index_len = INDEX_ENTRY_SIZE * (block_count + 1);

        // Reserve the header and index; both are rewritten once offsets are known.
        self.out.write_all(&[0u8; BLOCK_STREAM_HEADER_SIZE])?;
        self.out.write_all(&vec![0u8; index_len])?;

        let mut offset = stream_start + (BLOCK_STREAM_HEADER_SIZE + index_len) as u64;
        let mut index = Vec::with_capacity(index_len);
        let mut max_comp_size = 0usize;
        let pool = self.parallelism.pool(block_count)?;

        let mut next = 0;
        while next < block_count {
            let end = (next + WRITE_BATCH_BLOCKS).min(block_count);
            let blocks = pool.map_ordered(next..end, &encode)?;
            for (algorithm, bytes) in blocks {
                index.extend_from_slice(&pack_index_entry(offset, algorithm)?.to_le_bytes());
                self.out.write_all(&bytes)?;
                offset += bytes.len() as u64;
                max_comp_size = max_comp_size.max(bytes.len());
            }
            next = end;
        }
        index.extend_from_slice(&pack_index_entry(offset, CompAlgorithm::None)?.to_le_bytes());

        let header = BlockStreamHeader {
            max_comp_size: u32::try_from(max_comp_size)
                .map_err(|_| FstError::corrupt("compressed block exceeds 4 GiB"))?,
            block_size_elements,
        };
        self.out.seek(SeekFrom::Start(stream_start))?;
        self.out.write_all(&header.to_bytes())?;
        self.out.write_all(&index)?;
        self.out.seek(SeekFrom::Start(offset))?;

        debug!(
            blocks = block_count,
            max_comp_size,
            bytes = offset - stream_start,
            parallel = pool.is_parallel(),
            "wrote block stream"
        );
        Ok(offset - stream_start)
    }
}
