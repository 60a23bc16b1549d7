//! Factor columns: a level dictionary plus one-based integer codes.
//!
//! ```text
//! [FactorHeader: level_count:u32, flags:u32, codes_offset:u64]
//! [levels: character stream]          ← absent when level_count == 0
//! [codes: block stream of i32, NA = i32::MIN]
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use fstore_codecs::SingleCompressor;
use fstore_core::format::{FactorHeader, FACTOR_FLAG_ALL_NA, FACTOR_HEADER_SIZE};
use fstore_core::{BlockReader, BlockWriter, CompAlgorithm, FstError, Result};
use tracing::trace;

use super::character::{read_strings, write_strings};
use super::numeric::{int32_bytes, int32_values};
use super::{Ladder, LowBand, ReadContext, WriteContext, INT32_LADDER};
use crate::table::FactorVector;

const BYTE_CODES_LADDER: Ladder = Ladder::new(
    4096,
    LowBand::Composite(CompAlgorithm::IntToByte, CompAlgorithm::Lz4IntToByte),
    (CompAlgorithm::Lz4IntToByte, CompAlgorithm::ZstdIntToByte),
);

const SHORT_CODES_LADDER: Ladder = Ladder::new(
    4096,
    LowBand::Composite(CompAlgorithm::IntToShort, CompAlgorithm::Lz4IntToShortShuffle2),
    (CompAlgorithm::Lz4IntToShortShuffle2, CompAlgorithm::ZstdIntToShortShuffle2),
);

/// Ladder and level-0 fixed-ratio algorithm for a dictionary of `levels` entries.
fn codes_ladder(levels: usize) -> (Ladder, Option<CompAlgorithm>) {
    if levels <= u8::MAX as usize {
        (BYTE_CODES_LADDER, Some(CompAlgorithm::IntToByte))
    } else if levels <= u16::MAX as usize {
        (SHORT_CODES_LADDER, Some(CompAlgorithm::IntToShort))
    } else {
        (INT32_LADDER, None)
    }
}

pub(crate) fn write<W: Write + Seek>(out: &mut W, factor: &FactorVector, ctx: &WriteContext) -> Result<()> {
    let header_pos = out.stream_position()?;
    if factor.levels.is_empty() {
        if factor.codes.iter().any(Option::is_some) {
            return Err(FstError::InvalidTable("factor without levels has non-NA codes".into()));
        }
        let header = FactorHeader {
            level_count: 0,
            flags: FACTOR_FLAG_ALL_NA,
            codes_offset: 0,
        };
        out.write_all(&header.to_bytes())?;
        return Ok(());
    }

    let level_count = u32::try_from(factor.levels.len())
        .map_err(|_| FstError::InvalidTable("factor has more than u32::MAX levels".into()))?;
    out.write_all(&[0u8; FACTOR_HEADER_SIZE])?;
    let levels: Vec<Option<String>> = factor.levels.iter().cloned().map(Some).collect();
    write_strings(out, &levels, ctx)?;

    let codes_offset = out.stream_position()?;
    let codes: Vec<Option<i32>> = factor
        .codes
        .iter()
        .map(|c| c.map(|c| c as i32 + 1))
        .collect();
    let bytes = int32_bytes(&codes);
    let (ladder, fixed) = codes_ladder(factor.levels.len());
    let mut writer = BlockWriter::new(out, ctx.parallelism);
    match (ctx.compression, fixed) {
        (0, Some(algorithm)) => {
            writer.write_fixed_ratio(&bytes, 4, &SingleCompressor::new(algorithm, 0))?;
        }
        _ => {
            let policy = ladder.policy(ctx.compression)?;
            writer.write(&bytes, 4, ladder.block_size, policy.as_deref())?;
        }
    }

    let end = out.stream_position()?;
    let header = FactorHeader {
        level_count,
        flags: 0,
        codes_offset,
    };
    out.seek(SeekFrom::Start(header_pos))?;
    out.write_all(&header.to_bytes())?;
    out.seek(SeekFrom::Start(end))?;
    trace!(levels = level_count, codes_offset, "wrote factor");
    Ok(())
}

fn read_header<R: Read + Seek>(input: &mut R, region: u64) -> Result<FactorHeader> {
    input.seek(SeekFrom::Start(region))?;
    let mut buf = [0u8; FACTOR_HEADER_SIZE];
    input.read_exact(&mut buf)?;
    Ok(FactorHeader::from_bytes(&buf))
}

/// Position of the codes stream, `None` for an all-NA factor.
pub(crate) fn codes_offset<R: Read + Seek>(input: &mut R, region: u64) -> Result<Option<u64>> {
    let header = read_header(input, region)?;
    Ok((!header.all_na()).then_some(header.codes_offset))
}

pub(crate) fn read<R: Read + Seek>(
    input: &mut R,
    region: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<FactorVector> {
    let header = read_header(input, region)?;
    if header.all_na() {
        return Ok(FactorVector {
            codes: vec![None; length],
            levels: Vec::new(),
        });
    }
    if header.level_count == 0 || header.codes_offset <= region {
        return Err(FstError::corrupt("factor header is inconsistent"));
    }

    let level_count = header.level_count as usize;
    let levels = read_strings(
        input,
        region + FACTOR_HEADER_SIZE as u64,
        header.level_count as u64,
        0,
        level_count,
        ctx,
    )?
    .into_iter()
    .map(|level| level.ok_or_else(|| FstError::corrupt("factor level is NA")))
    .collect::<Result<Vec<_>>>()?;

    let mut bytes = vec![0u8; length * 4];
    BlockReader::new(input, &ctx.decompressor, ctx.parallelism).read_range(
        header.codes_offset,
        total_rows,
        4,
        start,
        &mut bytes,
    )?;
    let codes = int32_values(&bytes)
        .into_iter()
        .map(|code| match code {
            None => Ok(None),
            Some(c) if c >= 1 && c as usize <= level_count => Ok(Some(c as u32 - 1)),
            Some(c) => Err(FstError::corrupt(format!(
                "factor code {c} outside 1..={level_count}"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FactorVector { codes, levels })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use fstore_core::Parallelism;

    use super::*;

    fn factor(levels: usize, rows: usize) -> FactorVector {
        FactorVector {
            codes: (0..rows)
                .map(|i| (i % 13 != 0).then_some((i * 7 % levels) as u32))
                .collect(),
            levels: (0..levels).map(|i| format!("level-{i}")).collect(),
        }
    }

    fn round_trip(f: &FactorVector, compression: u32, start: u64, length: usize) -> FactorVector {
        let mut file = Cursor::new(Vec::new());
        let wctx = WriteContext {
            compression,
            parallelism: Parallelism::new(2),
        };
        write(&mut file, f, &wctx).unwrap();
        let rctx = ReadContext::new(Parallelism::new(2));
        read(&mut file, 0, f.codes.len() as u64, start, length, &rctx).unwrap()
    }

    #[test]
    fn test_dictionary_sizes_pick_code_width() {
        assert_eq!(codes_ladder(255).1, Some(CompAlgorithm::IntToByte));
        assert_eq!(codes_ladder(256).1, Some(CompAlgorithm::IntToShort));
        assert_eq!(codes_ladder(65_536).1, None);
    }

    #[test]
    fn test_round_trip_each_width() {
        for levels in [3, 300, 70_000] {
            let f = factor(levels, 9000);
            for compression in [0, 40, 90] {
                let back = round_trip(&f, compression, 4000, 1000);
                assert_eq!(back.levels, f.levels);
                assert_eq!(back.codes, f.codes[4000..5000].to_vec(), "levels {levels} compression {compression}");
            }
        }
    }

    #[test]
    fn test_zero_levels_writes_flag_only() {
        let f = FactorVector {
            codes: vec![None; 5],
            levels: Vec::new(),
        };
        let mut file = Cursor::new(Vec::new());
        let wctx = WriteContext {
            compression: 50,
            parallelism: Parallelism::sequential(),
        };
        write(&mut file, &f, &wctx).unwrap();
        assert_eq!(file.get_ref().len(), FACTOR_HEADER_SIZE);

        let back = read(&mut file, 0, 5, 1, 3, &ReadContext::new(Parallelism::sequential())).unwrap();
        assert_eq!(back.codes, vec![None; 3]);
        assert!(back.levels.is_empty());
    }
}
