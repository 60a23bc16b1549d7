//! Character streams: string columns, factor levels and column names.
//!
//! ```text
//! [HEADER: max_block_bytes:u32, 2047:u32]
//! [INDEX: (N + 1) × u64 absolute offsets]
//! per block:
//!   [CharBlockHeader (16 bytes)]
//!   [lengths: cumulative end offsets as i32, then NA bits in u32 words when has_na]
//!   [chars: UTF-8 bytes of the block, concatenated]
//! ```
//! Lengths and chars are compressed separately, each by its own policy. The
//! index entries carry algorithm 0; each block header records the real ones.

use std::io::{Read, Seek, Write};
use std::ops::Range;

use fstore_core::format::{CharBlockHeader, CHAR_BLOCK_HEADER_SIZE};
use fstore_core::{
    BlockReader, BlockWriter, CompAlgorithm, Decompressor, FstError, Result, StreamCompressor, StreamLayout,
};
use fstore_core::reader::READ_BATCH_BLOCKS;
use tracing::trace;

use super::{Ladder, LowBand, ReadContext, WriteContext};

/// Strings per character block.
pub(crate) const CHAR_BLOCK_SIZE: u32 = 2047;

const LENGTHS_LADDER: Ladder = Ladder::new(
    CHAR_BLOCK_SIZE,
    LowBand::Linear(CompAlgorithm::Lz4Shuffle4),
    (CompAlgorithm::Lz4Shuffle4, CompAlgorithm::ZstdShuffle4),
);

const CHARS_LADDER: Ladder = Ladder::new(
    CHAR_BLOCK_SIZE,
    LowBand::Linear(CompAlgorithm::Lz4),
    (CompAlgorithm::Lz4, CompAlgorithm::Zstd),
);

fn apply(policy: Option<&dyn StreamCompressor>, block: u64, src: &[u8]) -> Result<(CompAlgorithm, Vec<u8>)> {
    match policy {
        Some(policy) => {
            let mut dst = Vec::with_capacity(policy.max_compressed_size(src.len()));
            let algorithm = policy.compress_block(block, src, &mut dst)?;
            Ok((algorithm, dst))
        }
        None => Ok((CompAlgorithm::None, src.to_vec())),
    }
}

fn encode_block(
    block: u64,
    rows: &[Option<String>],
    lengths_policy: Option<&dyn StreamCompressor>,
    chars_policy: Option<&dyn StreamCompressor>,
) -> Result<(CompAlgorithm, Vec<u8>)> {
    let mut lengths = Vec::with_capacity(rows.len() * 4);
    let mut chars = Vec::new();
    let mut na_words = vec![0u32; rows.len().div_ceil(32)];
    let mut has_na = false;
    for (i, value) in rows.iter().enumerate() {
        match value {
            Some(text) => chars.extend_from_slice(text.as_bytes()),
            None => {
                has_na = true;
                na_words[i / 32] |= 1 << (i % 32);
            }
        }
        let end = i32::try_from(chars.len())
            .map_err(|_| FstError::InvalidTable(format!("character block {block} exceeds 2 GiB")))?;
        lengths.extend_from_slice(&end.to_le_bytes());
    }
    if has_na {
        for word in na_words {
            lengths.extend_from_slice(&word.to_le_bytes());
        }
    }

    let (lengths_algorithm, lengths_packed) = apply(lengths_policy, block, &lengths)?;
    let (chars_algorithm, chars_packed) = apply(chars_policy, block, &chars)?;
    let header = CharBlockHeader {
        lengths_size: lengths_packed.len() as u32,
        lengths_algorithm,
        chars_algorithm,
        chars_size: chars.len() as u32,
        has_na,
    };

    let mut buf = Vec::with_capacity(CHAR_BLOCK_HEADER_SIZE + lengths_packed.len() + chars_packed.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(&lengths_packed);
    buf.extend_from_slice(&chars_packed);
    Ok((CompAlgorithm::None, buf))
}

/// Write `values` as a character stream at the current position.
pub(crate) fn write_strings<W: Write + Seek>(
    out: &mut W,
    values: &[Option<String>],
    ctx: &WriteContext,
) -> Result<u64> {
    let lengths_policy = LENGTHS_LADDER.policy(ctx.compression)?;
    let chars_policy = CHARS_LADDER.policy(ctx.compression)?;
    let block = CHAR_BLOCK_SIZE as usize;
    let block_count = values.len().div_ceil(block);

    BlockWriter::new(out, ctx.parallelism).write_blocks_with(CHAR_BLOCK_SIZE, block_count, |b| {
        let rows = &values[b * block..((b + 1) * block).min(values.len())];
        encode_block(b as u64, rows, lengths_policy.as_deref(), chars_policy.as_deref())
    })
}

fn read_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode rows `wanted` of a block holding `block_rows` strings.
fn decode_block(
    bytes: &[u8],
    block_rows: usize,
    wanted: Range<usize>,
    decompressor: &dyn Decompressor,
) -> Result<Vec<Option<String>>> {
    let header = CharBlockHeader::from_bytes(bytes)?;
    let lengths_end = CHAR_BLOCK_HEADER_SIZE + header.lengths_size as usize;
    if lengths_end > bytes.len() {
        return Err(FstError::corrupt(format!(
            "lengths payload of {} bytes overruns its {}-byte block",
            header.lengths_size,
            bytes.len()
        )));
    }

    let na_len = if header.has_na { block_rows.div_ceil(32) * 4 } else { 0 };
    let mut lengths = vec![0u8; block_rows * 4 + na_len];
    decompressor.decompress(header.lengths_algorithm, &bytes[CHAR_BLOCK_HEADER_SIZE..lengths_end], &mut lengths)?;
    let mut chars = vec![0u8; header.chars_size as usize];
    decompressor.decompress(header.chars_algorithm, &bytes[lengths_end..], &mut chars)?;

    let mut ends = Vec::with_capacity(block_rows);
    let mut previous = 0usize;
    for raw in lengths[..block_rows * 4].chunks_exact(4) {
        let end = read_i32(raw);
        if end < 0 || (end as usize) < previous || end as usize > chars.len() {
            return Err(FstError::corrupt(format!(
                "string end offset {end} out of order (previous {previous}, {} bytes)",
                chars.len()
            )));
        }
        previous = end as usize;
        ends.push(previous);
    }
    if previous != chars.len() {
        return Err(FstError::corrupt(format!(
            "string offsets cover {previous} of {} character bytes",
            chars.len()
        )));
    }

    let na_bits = &lengths[block_rows * 4..];
    let is_na = |i: usize| header.has_na && (read_i32(&na_bits[(i / 32) * 4..]) as u32 >> (i % 32)) & 1 == 1;

    wanted
        .map(|i| {
            if is_na(i) {
                return Ok(None);
            }
            let begin = if i == 0 { 0 } else { ends[i - 1] };
            let text = std::str::from_utf8(&chars[begin..ends[i]])
                .map_err(|_| FstError::corrupt(format!("string {i} is not valid UTF-8")))?;
            Ok(Some(text.to_string()))
        })
        .collect()
}

/// Read strings `start..start + length` of the character stream at `stream_start`.
pub(crate) fn read_strings<R: Read + Seek>(
    input: &mut R,
    stream_start: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<Vec<Option<String>>> {
    let end = start + length as u64;
    if end > total_rows {
        return Err(FstError::InvalidRowRange {
            start,
            end,
            rows: total_rows,
        });
    }
    if length == 0 {
        return Ok(Vec::new());
    }

    let mut reader = BlockReader::new(input, &ctx.decompressor, ctx.parallelism);
    let (max_comp_size, block_size) = match reader.read_layout(stream_start)? {
        StreamLayout::Blocked {
            max_comp_size,
            block_size_elements,
        } => (max_comp_size, u64::from(block_size_elements)),
        StreamLayout::Unblocked { .. } => {
            return Err(FstError::corrupt("character stream is missing its block index"));
        }
    };
    let block_count = total_rows.div_ceil(block_size);
    let first_block = start / block_size;
    let last_block = (end - 1) / block_size;
    let pool = ctx.parallelism.pool((last_block - first_block + 1) as usize)?;

    let mut values = Vec::with_capacity(length);
    let mut batch_first = first_block;
    while batch_first <= last_block {
        let batch_last = (batch_first + READ_BATCH_BLOCKS as u64 - 1).min(last_block);
        let span = reader.locate_blocks(stream_start, max_comp_size, block_count, batch_first, batch_last)?;
        let compressed = reader.read_span(&span)?;

        let decoded = pool.map_ordered(0..span.block_count(), |i| {
            let block = batch_first + i as u64;
            let block_start = block * block_size;
            let block_rows = block_size.min(total_rows - block_start);
            let from = start.max(block_start) - block_start;
            let to = end.min(block_start + block_rows) - block_start;
            let (offset, len) = span.block_range(i);
            decode_block(
                &compressed[offset..offset + len],
                block_rows as usize,
                from as usize..to as usize,
                &ctx.decompressor,
            )
            .map_err(|e| match e {
                FstError::Corrupt(msg) => FstError::Corrupt(format!("character block {block}: {msg}")),
                other => other,
            })
        })?;
        for block_values in decoded {
            values.extend(block_values);
        }
        batch_first = batch_last + 1;
    }

    trace!(first_block, last_block, start, length, "read character stream");
    Ok(values)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use fstore_core::Parallelism;

    use super::*;

    fn sample(n: usize) -> Vec<Option<String>> {
        (0..n)
            .map(|i| match i % 11 {
                0 => None,
                3 => Some(String::new()),
                5 => Some(format!("ünïcode-{i}")),
                _ => Some(format!("value {}", i * 37)),
            })
            .collect()
    }

    fn write(values: &[Option<String>], compression: u32) -> Cursor<Vec<u8>> {
        let mut file = Cursor::new(Vec::new());
        let ctx = WriteContext {
            compression,
            parallelism: Parallelism::new(4),
        };
        write_strings(&mut file, values, &ctx).unwrap();
        file
    }

    #[test]
    fn test_ranges_across_blocks() {
        let values = sample(5000);
        for compression in [0, 20, 60, 100] {
            let mut file = write(&values, compression);
            let ctx = ReadContext::new(Parallelism::new(3));
            let all = read_strings(&mut file, 0, 5000, 0, 5000, &ctx).unwrap();
            assert_eq!(all, values, "compression {compression}");

            let middle = read_strings(&mut file, 0, 5000, 2040, 20, &ctx).unwrap();
            assert_eq!(middle, values[2040..2060].to_vec());

            let tail = read_strings(&mut file, 0, 5000, 4999, 1, &ctx).unwrap();
            assert_eq!(tail, values[4999..].to_vec());
        }
    }

    #[test]
    fn test_block_header_fields() {
        let values = vec![Some("ab".to_string()), None, Some("cde".to_string())];
        let file = write(&values, 0).into_inner();
        // stream header + two index entries, then the first block
        let block = &file[8 + 16..];
        let header = CharBlockHeader::from_bytes(block).unwrap();
        assert!(header.has_na);
        assert_eq!(header.chars_size, 5);
        assert_eq!(header.lengths_size, 3 * 4 + 4);
        assert_eq!(header.lengths_algorithm, CompAlgorithm::None);
        let ends: Vec<i32> = block[16..28].chunks_exact(4).map(read_i32).collect();
        assert_eq!(ends, vec![2, 2, 5]);
        assert_eq!(&block[32..37], b"abcde");
    }

    #[test]
    fn test_damaged_offsets_detected() {
        let values = vec![Some("abc".to_string()), Some("d".to_string())];
        let mut bytes = write(&values, 0).into_inner();
        // first end offset sits right after the 16-byte block header
        let first_end = 8 + 16 + 16;
        bytes[first_end..first_end + 4].copy_from_slice(&9i32.to_le_bytes());
        let ctx = ReadContext::new(Parallelism::sequential());
        let result = read_strings(&mut Cursor::new(bytes), 0, 2, 0, 2, &ctx);
        assert!(matches!(result, Err(FstError::Corrupt(_))));
    }
}
