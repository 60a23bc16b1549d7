//! Compression of standalone byte buffers.
//!
//! # Layout
//! ```text
//! [magic:u32 "FSTM"][version:u32][algorithm:u16][reserved:6]
//! [original_len:u64][payload_hash:u64]              ← 32 bytes
//! [payload: block stream of 16 KiB blocks]
//! ```
//! `payload_hash` is the XXH64 of the payload, checked before decoding.

use std::io::Cursor;

use fstore_codecs::{Registry, SingleCompressor, StreamLinear, StreamSingle};
use fstore_core::format::HASH_SEED;
use fstore_core::{BlockReader, BlockWriter, CompAlgorithm, FstError, Parallelism, Result, StreamCompressor};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

const MEMORY_MAGIC: u32 = 0x4D54_5346;
const MEMORY_VERSION: u32 = 1;
const MEMORY_HEADER_SIZE: usize = 32;
const MEMORY_BLOCK_SIZE: u32 = 16 * 1024;

/// Coder used by [`compress_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteAlgorithm {
    Lz4,
    Zstd,
}

impl ByteAlgorithm {
    fn id(self) -> u16 {
        match self {
            ByteAlgorithm::Lz4 => CompAlgorithm::Lz4.id(),
            ByteAlgorithm::Zstd => CompAlgorithm::Zstd.id(),
        }
    }
}

/// Policy for `level` in 0..=100. LZ4 compresses a `level` percent share of
/// the blocks; ZSTD compresses every block at a ZSTD level scaled to 1..=22.
fn policy(algorithm: ByteAlgorithm, level: u32) -> Result<Box<dyn StreamCompressor>> {
    if level > 100 {
        return Err(FstError::InvalidCompressionLevel(level));
    }
    Ok(match algorithm {
        ByteAlgorithm::Lz4 => Box::new(StreamLinear::new(SingleCompressor::new(CompAlgorithm::Lz4, 0), level)?),
        ByteAlgorithm::Zstd => {
            let zstd_level = (1 + 21 * level / 100) as i32;
            Box::new(StreamSingle::new(SingleCompressor::new(CompAlgorithm::Zstd, zstd_level)))
        }
    })
}

/// Compress `data` into a self-describing buffer.
pub fn compress_bytes(data: &[u8], algorithm: ByteAlgorithm, level: u32, parallelism: Parallelism) -> Result<Vec<u8>> {
    let policy = policy(algorithm, level)?;
    let mut out = Cursor::new(Vec::with_capacity(MEMORY_HEADER_SIZE + data.len() / 2));
    out.get_mut().resize(MEMORY_HEADER_SIZE, 0);
    out.set_position(MEMORY_HEADER_SIZE as u64);
    BlockWriter::new(&mut out, parallelism).write(data, 1, MEMORY_BLOCK_SIZE, Some(policy.as_ref()))?;

    let mut buf = out.into_inner();
    let hash = xxh64(&buf[MEMORY_HEADER_SIZE..], HASH_SEED);
    buf[0..4].copy_from_slice(&MEMORY_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&MEMORY_VERSION.to_le_bytes());
    buf[8..10].copy_from_slice(&algorithm.id().to_le_bytes());
    buf[16..24].copy_from_slice(&(data.len() as u64).to_le_bytes());
    buf[24..32].copy_from_slice(&hash.to_le_bytes());
    debug!(input = data.len(), output = buf.len(), ?algorithm, level, "compressed buffer");
    Ok(buf)
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

fn read_u64(buf: &[u8], pos: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(b)
}

/// Restore the bytes of a buffer produced by [`compress_bytes`].
pub fn decompress_bytes(buf: &[u8], parallelism: Parallelism) -> Result<Vec<u8>> {
    if buf.len() < MEMORY_HEADER_SIZE || read_u32(buf, 0) != MEMORY_MAGIC {
        return Err(FstError::NotFst);
    }
    let version = read_u32(buf, 4);
    if version > MEMORY_VERSION {
        return Err(FstError::FutureVersion {
            found: version,
            supported: MEMORY_VERSION,
        });
    }
    if read_u64(buf, 24) != xxh64(&buf[MEMORY_HEADER_SIZE..], HASH_SEED) {
        return Err(FstError::corrupt("compressed buffer hash mismatch"));
    }
    let len = usize::try_from(read_u64(buf, 16))
        .map_err(|_| FstError::corrupt("compressed buffer is larger than memory"))?;

    let mut out = vec![0u8; len];
    let mut input = Cursor::new(buf);
    BlockReader::new(&mut input, &Registry, parallelism).read_range(
        MEMORY_HEADER_SIZE as u64,
        len as u64,
        1,
        0,
        &mut out,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn test_round_trip_both_algorithms() {
        let data = text(100_000);
        for algorithm in [ByteAlgorithm::Lz4, ByteAlgorithm::Zstd] {
            for level in [0, 50, 100] {
                let packed = compress_bytes(&data, algorithm, level, Parallelism::new(4)).unwrap();
                if level == 100 {
                    assert!(packed.len() < data.len() / 4);
                }
                let back = decompress_bytes(&packed, Parallelism::new(2)).unwrap();
                assert_eq!(back, data);
            }
        }
    }

    #[test]
    fn test_empty_input() {
        let packed = compress_bytes(&[], ByteAlgorithm::Zstd, 20, Parallelism::sequential()).unwrap();
        assert!(decompress_bytes(&packed, Parallelism::sequential()).unwrap().is_empty());
    }

    #[test]
    fn test_damage_detected() {
        let mut packed = compress_bytes(&text(5000), ByteAlgorithm::Lz4, 100, Parallelism::sequential()).unwrap();
        let last = packed.len() - 1;
        packed[last] ^= 0xFF;
        assert!(matches!(
            decompress_bytes(&packed, Parallelism::sequential()),
            Err(FstError::Corrupt(_))
        ));
        assert!(matches!(
            decompress_bytes(b"not compressed", Parallelism::sequential()),
            Err(FstError::NotFst)
        ));
    }
}
