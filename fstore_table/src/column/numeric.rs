//! Fixed-width columns: int32, double, logical, int64 and byte.

use std::io::{Read, Seek, Write};

use fstore_core::{BlockReader, CompAlgorithm, Result};

use super::{Ladder, LowBand, ReadContext, WriteContext, INT32_LADDER};

/// NA marker of int32 and logical columns.
pub(crate) const NA_INT32: i32 = i32::MIN;

pub(crate) const NA_INT64: i64 = i64::MIN;

/// NA of double columns: a NaN with payload 1954.
pub(crate) const NA_DOUBLE_BITS: u64 = 0x7FF0_0000_0000_07A2;

const SHUFFLE8_LADDER: Ladder = Ladder::new(
    2048,
    LowBand::Linear(CompAlgorithm::Lz4Shuffle8),
    (CompAlgorithm::Lz4Shuffle8, CompAlgorithm::ZstdShuffle8),
);

const LOGICAL_LADDER: Ladder = Ladder::new(
    4096,
    LowBand::Composite(CompAlgorithm::Logical64, CompAlgorithm::Lz4Logical64),
    (CompAlgorithm::Lz4Logical64, CompAlgorithm::ZstdLogical64),
);

const BYTE_LADDER: Ladder = Ladder::new(
    16384,
    LowBand::Linear(CompAlgorithm::Lz4),
    (CompAlgorithm::Lz4, CompAlgorithm::Zstd),
);

fn write_stream<W: Write + Seek>(
    out: &mut W,
    bytes: &[u8],
    element_size: usize,
    ladder: &Ladder,
    ctx: &WriteContext,
) -> Result<()> {
    let policy = ladder.policy(ctx.compression)?;
    fstore_core::BlockWriter::new(out, ctx.parallelism).write(
        bytes,
        element_size,
        ladder.block_size,
        policy.as_deref(),
    )?;
    Ok(())
}

fn read_stream<R: Read + Seek>(
    input: &mut R,
    stream_start: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    element_size: usize,
    ctx: &ReadContext,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; length * element_size];
    BlockReader::new(input, &ctx.decompressor, ctx.parallelism).read_range(
        stream_start,
        total_rows,
        element_size,
        start,
        &mut out,
    )?;
    Ok(out)
}

pub(crate) fn int32_bytes(values: &[Option<i32>]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| v.unwrap_or(NA_INT32).to_le_bytes())
        .collect()
}

pub(crate) fn int32_values(bytes: &[u8]) -> Vec<Option<i32>> {
    bytes
        .chunks_exact(4)
        .map(|b| {
            let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            (v != NA_INT32).then_some(v)
        })
        .collect()
}

pub(crate) fn write_int32<W: Write + Seek>(out: &mut W, values: &[Option<i32>], ctx: &WriteContext) -> Result<()> {
    write_stream(out, &int32_bytes(values), 4, &INT32_LADDER, ctx)
}

pub(crate) fn read_int32<R: Read + Seek>(
    input: &mut R,
    stream_start: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<Vec<Option<i32>>> {
    let bytes = read_stream(input, stream_start, total_rows, start, length, 4, ctx)?;
    Ok(int32_values(&bytes))
}

/// A value whose bits equal the NA pattern reads back as NA; every other
/// NaN keeps its payload.
pub(crate) fn write_double<W: Write + Seek>(out: &mut W, values: &[Option<f64>], ctx: &WriteContext) -> Result<()> {
    let bytes: Vec<u8> = values
        .iter()
        .flat_map(|v| v.map_or(NA_DOUBLE_BITS, f64::to_bits).to_le_bytes())
        .collect();
    write_stream(out, &bytes, 8, &SHUFFLE8_LADDER, ctx)
}

pub(crate) fn read_double<R: Read + Seek>(
    input: &mut R,
    stream_start: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<Vec<Option<f64>>> {
    let bytes = read_stream(input, stream_start, total_rows, start, length, 8, ctx)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|b| {
            let mut word = [0u8; 8];
            word.copy_from_slice(b);
            let bits = u64::from_le_bytes(word);
            (bits != NA_DOUBLE_BITS).then(|| f64::from_bits(bits))
        })
        .collect())
}

pub(crate) fn write_logical<W: Write + Seek>(out: &mut W, values: &[Option<bool>], ctx: &WriteContext) -> Result<()> {
    let bytes: Vec<u8> = values
        .iter()
        .flat_map(|v| match v {
            Some(true) => 1i32,
            Some(false) => 0,
            None => NA_INT32,
        }
        .to_le_bytes())
        .collect();
    write_stream(out, &bytes, 4, &LOGICAL_LADDER, ctx)
}

pub(crate) fn read_logical<R: Read + Seek>(
    input: &mut R,
    stream_start: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<Vec<Option<bool>>> {
    let bytes = read_stream(input, stream_start, total_rows, start, length, 4, ctx)?;
    Ok(int32_values(&bytes).into_iter().map(|v| v.map(|v| v != 0)).collect())
}

pub(crate) fn write_int64<W: Write + Seek>(out: &mut W, values: &[Option<i64>], ctx: &WriteContext) -> Result<()> {
    let bytes: Vec<u8> = values
        .iter()
        .flat_map(|v| v.unwrap_or(NA_INT64).to_le_bytes())
        .collect();
    write_stream(out, &bytes, 8, &SHUFFLE8_LADDER, ctx)
}

pub(crate) fn read_int64<R: Read + Seek>(
    input: &mut R,
    stream_start: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<Vec<Option<i64>>> {
    let bytes = read_stream(input, stream_start, total_rows, start, length, 8, ctx)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|b| {
            let mut word = [0u8; 8];
            word.copy_from_slice(b);
            let v = i64::from_le_bytes(word);
            (v != NA_INT64).then_some(v)
        })
        .collect())
}

pub(crate) fn write_byte<W: Write + Seek>(out: &mut W, values: &[u8], ctx: &WriteContext) -> Result<()> {
    write_stream(out, values, 1, &BYTE_LADDER, ctx)
}

pub(crate) fn read_byte<R: Read + Seek>(
    input: &mut R,
    stream_start: u64,
    total_rows: u64,
    start: u64,
    length: usize,
    ctx: &ReadContext,
) -> Result<Vec<u8>> {
    read_stream(input, stream_start, total_rows, start, length, 1, ctx)
}
