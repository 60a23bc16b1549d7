use std::io::{Read, Seek, SeekFrom};

use tracing::trace;

use crate::codec::Decompressor;
use crate::error::{FstError, Result};
use crate::format::{
    stream_meta_from_bytes, unpack_index_entry, BlockStreamHeader, CompAlgorithm,
    BLOCK_STREAM_HEADER_SIZE, INDEX_ENTRY_SIZE, STREAM_META_SIZE,
};
use crate::pool::{Parallelism, WorkerPool};

/// Blocks read from disk and decoded per round when serving a range.
pub const READ_BATCH_BLOCKS: usize = 64;

/// Repetition units decoded per job on the fixed-ratio path.
pub const FIXED_RATIO_READ_UNITS: usize = 4096;

/// How the data of a block stream is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLayout {
    /// Unblocked; `algorithm` is `None` for raw data or a fixed-ratio algorithm.
    Unblocked { algorithm: CompAlgorithm },
    /// Indexed blocks of `block_size_elements` elements each.
    Blocked {
        max_comp_size: u32,
        block_size_elements: u32,
    },
}

/// The index entries covering a contiguous run of blocks.
#[derive(Debug, Clone)]
pub struct BlockSpan {
    pub first_block: u64,
    /// `(file offset, algorithm)` for each block in the span, plus one
    /// trailing entry marking where the last block ends.
    pub entries: Vec<(u64, CompAlgorithm)>,
}

impl BlockSpan {
    pub fn block_count(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    /// Position of the `i`-th block of the span relative to the span start,
    /// and its compressed length.
    pub fn block_range(&self, i: usize) -> (usize, usize) {
        let base = self.entries[0].0;
        let start = (self.entries[i].0 - base) as usize;
        let len = (self.entries[i + 1].0 - self.entries[i].0) as usize;
        (start, len)
    }

    pub fn byte_len(&self) -> u64 {
        self.entries[self.entries.len() - 1].0 - self.entries[0].0
    }
}

/// Block-level summary of a stream, for inspection.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub layout: StreamLayout,
    pub blocks: Vec<(u64, CompAlgorithm)>,
}

/// Random-access reader for block streams.
///
/// [`read_range`](Self::read_range) touches only the index entries and
/// compressed blocks that overlap the requested rows. Unblocked streams are
/// served with a single seek.
pub struct BlockReader<'a, R: Read + Seek> {
    input: &'a mut R,
    decompressor: &'a dyn Decompressor,
    parallelism: Parallelism,
}

impl<'a, R: Read + Seek> BlockReader<'a, R> {
    pub fn new(input: &'a mut R, decompressor: &'a dyn Decompressor, parallelism: Parallelism) -> Self {
        Self {
            input,
            decompressor,
            parallelism,
        }
    }

    pub fn read_layout(&mut self, stream_start: u64) -> Result<StreamLayout> {
        self.input.seek(SeekFrom::Start(stream_start))?;
        let mut buf = [0u8; BLOCK_STREAM_HEADER_SIZE];
        self.input
            .read_exact(&mut buf)
            .map_err(|e| FstError::from_short_read(e, "stream header"))?;
        let header = BlockStreamHeader::from_bytes(&buf);
        if header.block_size_elements == 0 {
            let mut meta = [0u8; STREAM_META_SIZE];
            self.input
                .read_exact(&mut meta)
                .map_err(|e| FstError::from_short_read(e, "stream header"))?;
            Ok(StreamLayout::Unblocked {
                algorithm: stream_meta_from_bytes(&meta)?,
            })
        } else {
            Ok(StreamLayout::Blocked {
                max_comp_size: header.max_comp_size,
                block_size_elements: header.block_size_elements,
            })
        }
    }

    /// Read the index entries for blocks `first..=last` (plus the trailing
    /// boundary entry) of a stream with `block_count` blocks, and validate them.
    pub fn locate_blocks(
        &mut self,
        stream_start: u64,
        max_comp_size: u32,
        block_count: u64,
        first: u64,
        last: u64,
    ) -> Result<BlockSpan> {
        if last < first || last >= block_count {
            return Err(FstError::corrupt(format!(
                "block span {first}..={last} outside a stream of {block_count} blocks"
            )));
        }
        let entry_count = (last - first + 2) as usize;
        self.input.seek(SeekFrom::Start(
            stream_start + (BLOCK_STREAM_HEADER_SIZE + INDEX_ENTRY_SIZE * first as usize) as u64,
        ))?;
        let mut raw = vec![0u8; entry_count * INDEX_ENTRY_SIZE];
        self.input
            .read_exact(&mut raw)
            .map_err(|e| FstError::from_short_read(e, "block index"))?;

        let data_start =
            stream_start + (BLOCK_STREAM_HEADER_SIZE + INDEX_ENTRY_SIZE * (block_count as usize + 1)) as u64;
        let mut entries = Vec::with_capacity(entry_count);
        for word in raw.chunks_exact(INDEX_ENTRY_SIZE) {
            let mut b = [0u8; INDEX_ENTRY_SIZE];
            b.copy_from_slice(word);
            entries.push(unpack_index_entry(u64::from_le_bytes(b))?);
        }

        if entries[0].0 < data_start {
            return Err(FstError::corrupt("block offset points into the block index"));
        }
        for (i, pair) in entries.windows(2).enumerate() {
            let (start, end) = (pair[0].0, pair[1].0);
            if end <= start || end - start > max_comp_size as u64 {
                return Err(FstError::corrupt(format!(
                    "block {} has an invalid extent {start}..{end} (max block size {max_comp_size})",
                    first + i as u64
                )));
            }
        }
        Ok(BlockSpan {
            first_block: first,
            entries,
        })
    }

    /// Read the raw bytes of `span` from disk in one read.
    pub fn read_span(&mut self, span: &BlockSpan) -> Result<Vec<u8>> {
        self.input.seek(SeekFrom::Start(span.entries[0].0))?;
        let mut buf = vec![0u8; span.byte_len() as usize];
        self.input.read_exact(&mut buf).map_err(|e| {
            FstError::from_short_read(e, &format!("block {}", span.first_block))
        })?;
        Ok(buf)
    }

    /// Summarize the stream: layout plus every block's offset and algorithm.
    pub fn stream_info(&mut self, stream_start: u64, total_rows: u64) -> Result<StreamInfo> {
        let layout = self.read_layout(stream_start)?;
        let blocks = match layout {
            StreamLayout::Unblocked { .. } => Vec::new(),
            StreamLayout::Blocked {
                max_comp_size,
                block_size_elements,
            } => {
                let block_count = total_rows.div_ceil(block_size_elements as u64);
                if block_count == 0 {
                    Vec::new()
                } else {
                    self.locate_blocks(stream_start, max_comp_size, block_count, 0, block_count - 1)?
                        .entries
                }
            }
        };
        Ok(StreamInfo { layout, blocks })
    }

    /// Fill `out` with rows `start_row..start_row + out.len() / element_size`
    /// of the stream at `stream_start`, which holds `total_rows` elements.
    pub fn read_range(
        &mut self,
        stream_start: u64,
        total_rows: u64,
        element_size: usize,
        start_row: u64,
        out: &mut [u8],
    ) -> Result<()> {
        if element_size == 0 || out.len() % element_size != 0 {
            return Err(FstError::corrupt(format!(
                "output buffer of {} bytes does not hold whole {element_size}-byte elements",
                out.len()
            )));
        }
        let length = (out.len() / element_size) as u64;
        if start_row + length > total_rows {
            return Err(FstError::InvalidRowRange {
                start: start_row,
                end: start_row + length,
                rows: total_rows,
            });
        }
        if length == 0 {
            return Ok(());
        }

        match self.read_layout(stream_start)? {
            StreamLayout::Unblocked {
                algorithm: CompAlgorithm::None,
            } => {
                let data_start = stream_start + (BLOCK_STREAM_HEADER_SIZE + STREAM_META_SIZE) as u64;
                self.input
                    .seek(SeekFrom::Start(data_start + start_row * element_size as u64))?;
                self.input
                    .read_exact(out)
                    .map_err(|e| FstError::from_short_read(e, "raw stream"))?;
                trace!(start_row, length, "read raw stream");
                Ok(())
            }
            StreamLayout::Unblocked { algorithm } => {
                self.read_fixed_ratio(stream_start, algorithm, total_rows, element_size, start_row, out)
            }
            StreamLayout::Blocked {
                max_comp_size,
                block_size_elements,
            } => self.read_blocked(
                stream_start,
                max_comp_size,
                block_size_elements as u64,
                total_rows,
                element_size,
                start_row,
                out,
            ),
        }
    }

    fn read_fixed_ratio(
        &mut self,
        stream_start: u64,
        algorithm: CompAlgorithm,
        total_rows: u64,
        element_size: usize,
        start_row: u64,
        out: &mut [u8],
    ) -> Result<()> {
        let ratio = algorithm.fixed_ratio().ok_or_else(|| {
            FstError::corrupt(format!(
                "unblocked stream uses {}, which is not fixed-ratio",
                algorithm.name()
            ))
        })?;
        if ratio.src_unit % element_size != 0 {
            return Err(FstError::corrupt(format!(
                "{} does not apply to {element_size}-byte elements",
                algorithm.name()
            )));
        }
        let length = (out.len() / element_size) as u64;
        let unit_rows = (ratio.src_unit / element_size) as u64;
        let first_unit = start_row / unit_rows;
        let last_unit = (start_row + length - 1) / unit_rows;
        let span_start_row = first_unit * unit_rows;
        let span_end_row = ((last_unit + 1) * unit_rows).min(total_rows);

        let data_start = stream_start + (BLOCK_STREAM_HEADER_SIZE + STREAM_META_SIZE) as u64;
        self.input
            .seek(SeekFrom::Start(data_start + first_unit * ratio.dst_unit as u64))?;
        let mut compressed = vec![0u8; (last_unit - first_unit + 1) as usize * ratio.dst_unit];
        self.input
            .read_exact(&mut compressed)
            .map_err(|e| FstError::from_short_read(e, "fixed-ratio stream"))?;

        let decoded_len = (span_end_row - span_start_row) as usize * element_size;
        let aligned = span_start_row == start_row && decoded_len == out.len();
        let mut scratch = if aligned { Vec::new() } else { vec![0u8; decoded_len] };
        let target: &mut [u8] = if aligned { &mut *out } else { &mut scratch };

        let jobs = compressed.len().div_ceil(FIXED_RATIO_READ_UNITS * ratio.dst_unit);
        let pool = self.parallelism.pool(jobs)?;
        let items: Vec<(&[u8], &mut [u8])> = compressed
            .chunks(FIXED_RATIO_READ_UNITS * ratio.dst_unit)
            .zip(target.chunks_mut(FIXED_RATIO_READ_UNITS * ratio.src_unit))
            .collect();
        let decompressor = self.decompressor;
        pool.for_each(items, |(src, dst)| decompressor.decompress(algorithm, src, dst))?;

        if !aligned {
            let skip = (start_row - span_start_row) as usize * element_size;
            out.copy_from_slice(&scratch[skip..skip + out.len()]);
        }
        trace!(
            algorithm = algorithm.name(),
            first_unit,
            last_unit,
            "read fixed-ratio stream"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_blocked(
        &mut self,
        stream_start: u64,
        max_comp_size: u32,
        block_size: u64,
        total_rows: u64,
        element_size: usize,
        start_row: u64,
        out: &mut [u8],
    ) -> Result<()> {
        let length = (out.len() / element_size) as u64;
        let end_row = start_row + length;
        let block_count = total_rows.div_ceil(block_size);
        let first_block = start_row / block_size;
        let last_block = (end_row - 1) / block_size;

        let span = self.locate_blocks(stream_start, max_comp_size, block_count, first_block, last_block)?;
        let pool = self
            .parallelism
            .pool((last_block - first_block + 1) as usize)?;

        let mut remaining: &mut [u8] = out;
        let mut batch_first = first_block;
        while batch_first <= last_block {
            let batch_last = (batch_first + READ_BATCH_BLOCKS as u64 - 1).min(last_block);
            let lo = (batch_first - first_block) as usize;
            let hi = (batch_last - first_block) as usize;
            let batch = BlockSpan {
                first_block: batch_first,
                entries: span.entries[lo..=hi + 1].to_vec(),
            };
            let compressed = self.read_span(&batch)?;

            let mut tasks = Vec::with_capacity(batch.block_count());
            for (i, block) in (batch_first..=batch_last).enumerate() {
                let block_start = block * block_size;
                let block_rows = block_size.min(total_rows - block_start);
                let from = start_row.max(block_start);
                let to = end_row.min(block_start + block_rows);
                let (dst, rest) =
                    std::mem::take(&mut remaining).split_at_mut((to - from) as usize * element_size);
                remaining = rest;
                let (offset, len) = batch.block_range(i);
                tasks.push(BlockTask {
                    block,
                    algorithm: batch.entries[i].1,
                    src: &compressed[offset..offset + len],
                    block_len: block_rows as usize * element_size,
                    skip: (from - block_start) as usize * element_size,
                    dst,
                });
            }
            decode_tasks(&pool, self.decompressor, tasks)?;
            batch_first = batch_last + 1;
        }

        trace!(first_block, last_block, start_row, length, "read blocked stream");
        Ok(())
    }
}

/// One block to decode into its slice of the caller's output buffer.
struct BlockTask<'s, 'd> {
    block: u64,
    algorithm: CompAlgorithm,
    src: &'s [u8],
    /// Decompressed size of the whole block.
    block_len: usize,
    /// Leading bytes of the block that fall before the requested range.
    skip: usize,
    dst: &'d mut [u8],
}

fn decode_tasks(pool: &WorkerPool, decompressor: &dyn Decompressor, tasks: Vec<BlockTask<'_, '_>>) -> Result<()> {
    pool.for_each(tasks, |task| {
        let result = if task.skip == 0 && task.dst.len() == task.block_len {
            decompressor.decompress(task.algorithm, task.src, task.dst)
        } else {
            // Partial block: decode the whole block aside, keep the overlap.
            let mut scratch = vec![0u8; task.block_len];
            decompressor
                .decompress(task.algorithm, task.src, &mut scratch)
                .map(|()| {
                    let n = task.dst.len();
                    task.dst.copy_from_slice(&scratch[task.skip..task.skip + n]);
                })
        };
        result.map_err(|e| match e {
            FstError::Corrupt(msg) => FstError::Corrupt(format!("block {}: {msg}", task.block)),
            other => other,
        })
    })
}
