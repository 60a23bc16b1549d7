//! Per-type column codecs.
//!
//! Every column region starts with a [`ColumnPrelude`]. The type-specific
//! payload follows: one block stream for fixed-width types, a character
//! stream for strings, and a factor header with levels and codes for
//! factors.

mod character;
mod factor;
mod numeric;

use std::io::{Read, Seek, SeekFrom, Write};

use fstore_codecs::{zstd_level, Registry, SingleCompressor, StreamComposite, StreamLinear};
use fstore_core::format::{ColumnPrelude, COLUMN_PRELUDE_SIZE};
use fstore_core::{
    BlockReader, ColumnType, CompAlgorithm, FstError, Parallelism, Result, StreamCompressor, StreamInfo,
};
use tracing::debug;

use crate::table::ColumnVector;

pub(crate) use character::{read_strings, write_strings};

/// Policy for the lower half of the compression range.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LowBand {
    /// Selected blocks use the algorithm, the rest are stored.
    Linear(CompAlgorithm),
    /// Selected blocks use the second algorithm, the rest the first.
    Composite(CompAlgorithm, CompAlgorithm),
}

/// Algorithm choices of one column type across compression levels 1..=100.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ladder {
    pub block_size: u32,
    pub low: LowBand,
    /// Composite pair for levels 51..=100; the second member is ZSTD based.
    pub high: (CompAlgorithm, CompAlgorithm),
}

impl Ladder {
    pub const fn new(block_size: u32, low: LowBand, high: (CompAlgorithm, CompAlgorithm)) -> Self {
        Self { block_size, low, high }
    }

    /// Stream policy for `compression` (0..=100), `None` for raw storage.
    ///
    /// Levels 1..=50 use the low band at policy level `2l`; levels 51..=100
    /// use the high pair at `2(l - 50)` with the ZSTD level scaled alongside.
    pub fn policy(&self, compression: u32) -> Result<Option<Box<dyn StreamCompressor>>> {
        match compression {
            0 => Ok(None),
            1..=50 => {
                let level = 2 * compression;
                let policy: Box<dyn StreamCompressor> = match self.low {
                    LowBand::Linear(algorithm) => {
                        Box::new(StreamLinear::new(SingleCompressor::new(algorithm, 0), level)?)
                    }
                    LowBand::Composite(first, second) => Box::new(StreamComposite::new(
                        SingleCompressor::new(first, 0),
                        SingleCompressor::new(second, 1),
                        level,
                    )?),
                };
                Ok(Some(policy))
            }
            51..=100 => {
                let (first, second) = self.high;
                Ok(Some(Box::new(StreamComposite::new(
                    SingleCompressor::new(first, 0),
                    SingleCompressor::new(second, zstd_level(compression)),
                    2 * (compression - 50),
                )?)))
            }
            other => Err(FstError::InvalidCompressionLevel(other)),
        }
    }
}

/// Ladder for 32-bit integer data; also used for factor codes with more
/// than 65535 levels and for the lengths of character blocks.
pub(crate) const INT32_LADDER: Ladder = Ladder::new(
    4096,
    LowBand::Linear(CompAlgorithm::Lz4Shuffle4),
    (CompAlgorithm::Lz4Shuffle4, CompAlgorithm::ZstdShuffle4),
);

/// Context shared by the column writers of one table write.
pub(crate) struct WriteContext {
    pub compression: u32,
    pub parallelism: Parallelism,
}

/// Context shared by the column readers of one table read.
pub(crate) struct ReadContext {
    pub parallelism: Parallelism,
    pub decompressor: Registry,
}

impl ReadContext {
    pub fn new(parallelism: Parallelism) -> Self {
        Self {
            parallelism,
            decompressor: Registry,
        }
    }
}

/// Write the region of one column at the current position of `out`.
pub(crate) fn write_column<W: Write + Seek>(
    out: &mut W,
    data: &ColumnVector,
    annotation: Option<&str>,
    ctx: &WriteContext,
) -> Result<u64> {
    let start = out.stream_position()?;
    let prelude = ColumnPrelude {
        annotation: annotation.map(str::to_string),
    };
    out.write_all(&prelude.to_bytes())?;

    match data {
        ColumnVector::Character(values) => {
            write_strings(out, values, ctx)?;
        }
        ColumnVector::Factor(factor) => factor::write(out, factor, ctx)?,
        ColumnVector::Int32(values) => numeric::write_int32(out, values, ctx)?,
        ColumnVector::Double(values) => numeric::write_double(out, values, ctx)?,
        ColumnVector::Logical(values) => numeric::write_logical(out, values, ctx)?,
        ColumnVector::Int64(values) => numeric::write_int64(out, values, ctx)?,
        ColumnVector::Byte(values) => numeric::write_byte(out, values, ctx)?,
    }

    let end = out.stream_position()?;
    debug!(
        column_type = data.column_type().name(),
        rows = data.len(),
        bytes = end - start,
        "wrote column"
    );
    Ok(end - start)
}

/// Prelude of the column region at `region_start`, and where its payload begins.
pub(crate) fn read_prelude<R: Read + Seek>(input: &mut R, region_start: u64) -> Result<(ColumnPrelude, u64)> {
    let file_len = input.seek(SeekFrom::End(0))?;
    input.seek(SeekFrom::Start(region_start))?;
    let mut fixed = [0u8; COLUMN_PRELUDE_SIZE];
    input
        .read_exact(&mut fixed)
        .map_err(|e| FstError::from_short_read(e, "column prelude"))?;
    let (len, flags) = ColumnPrelude::parse_fixed(&fixed);
    let remaining = file_len.saturating_sub(region_start + COLUMN_PRELUDE_SIZE as u64);
    if ColumnPrelude::tail_len(len) as u64 > remaining {
        return Err(FstError::corrupt(format!(
            "column annotation of {len} bytes runs past the end of the file"
        )));
    }
    let mut tail = vec![0u8; ColumnPrelude::tail_len(len)];
    input
        .read_exact(&mut tail)
        .map_err(|e| FstError::from_short_read(e, "column annotation"))?;
    let prelude = ColumnPrelude::from_parts(flags, &tail, len)?;
    Ok((prelude, region_start + (COLUMN_PRELUDE_SIZE + tail.len()) as u64))
}

/// Read rows `start..start + length` of the column region at `region_start`.
pub(crate) fn read_column<R: Read + Seek>(
    input: &mut R,
    region_start: u64,
    column_type: ColumnType,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<(ColumnVector, Option<String>)> {
    let (prelude, payload) = read_prelude(input, region_start)?;
    let data = match column_type {
        ColumnType::Character => {
            ColumnVector::Character(read_strings(input, payload, total_rows, start, length, ctx)?)
        }
        ColumnType::Factor => {
            ColumnVector::Factor(factor::read(input, payload, total_rows, start, length, ctx)?)
        }
        ColumnType::Int32 => {
            ColumnVector::Int32(numeric::read_int32(input, payload, total_rows, start, length, ctx)?)
        }
        ColumnType::Double64 => {
            ColumnVector::Double(numeric::read_double(input, payload, total_rows, start, length, ctx)?)
        }
        ColumnType::Bool2 => {
            ColumnVector::Logical(numeric::read_logical(input, payload, total_rows, start, length, ctx)?)
        }
        ColumnType::Int64 => {
            ColumnVector::Int64(numeric::read_int64(input, payload, total_rows, start, length, ctx)?)
        }
        ColumnType::Byte => {
            ColumnVector::Byte(numeric::read_byte(input, payload, total_rows, start, length, ctx)?)
        }
    };
    Ok((data, prelude.annotation))
}

/// Block summary of the main stream of a column: the values for fixed-width
/// types, the character stream for strings, the codes for factors. `None`
/// for an all-NA factor, which has no stream.
pub(crate) fn stream_info<R: Read + Seek>(
    input: &mut R,
    region_start: u64,
    column_type: ColumnType,
    total_rows: u64,
    ctx: &ReadContext,
) -> Result<Option<StreamInfo>> {
    let (_, payload) = read_prelude(input, region_start)?;
    let stream_start = match column_type {
        ColumnType::Factor => match factor::codes_offset(input, payload)? {
            Some(offset) => offset,
            None => return Ok(None),
        },
        _ => payload,
    };
    let mut reader = BlockReader::new(input, &ctx.decompressor, ctx.parallelism);
    reader.stream_info(stream_start, total_rows).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(policy: &dyn StreamCompressor, block: u64) -> CompAlgorithm {
        let src: Vec<u8> = (0..16384u32).flat_map(|i| (i / 100).to_le_bytes()).collect();
        let mut dst = Vec::new();
        policy.compress_block(block, &src, &mut dst).unwrap()
    }

    #[test]
    fn test_level_zero_is_raw() {
        assert!(INT32_LADDER.policy(0).unwrap().is_none());
    }

    #[test]
    fn test_low_band_is_linear() {
        // level 25 selects every second block
        let policy = INT32_LADDER.policy(25).unwrap().unwrap();
        assert_eq!(pick(policy.as_ref(), 0), CompAlgorithm::None);
        assert_eq!(pick(policy.as_ref(), 1), CompAlgorithm::Lz4Shuffle4);
    }

    #[test]
    fn test_high_band_is_composite() {
        let policy = INT32_LADDER.policy(75).unwrap().unwrap();
        assert_eq!(pick(policy.as_ref(), 0), CompAlgorithm::Lz4Shuffle4);
        assert_eq!(pick(policy.as_ref(), 1), CompAlgorithm::ZstdShuffle4);

        let policy = INT32_LADDER.policy(100).unwrap().unwrap();
        assert_eq!(pick(policy.as_ref(), 0), CompAlgorithm::ZstdShuffle4);
    }

    #[test]
    fn test_oversized_annotation_rejected() {
        let mut region = ColumnPrelude {
            annotation: Some("UTC".into()),
        }
        .to_bytes();
        region[..4].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        let mut input = std::io::Cursor::new(region);
        assert!(matches!(read_prelude(&mut input, 0), Err(FstError::Corrupt(_))));
    }

    #[test]
    fn test_level_out_of_range() {
        assert!(matches!(
            INT32_LADDER.policy(101),
            Err(FstError::InvalidCompressionLevel(101))
        ));
    }
}
