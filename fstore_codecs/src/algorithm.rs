use fstore_core::{CompAlgorithm, Compressor, Decompressor, Result};
use tracing::trace;

use crate::bitpack;
use crate::lz4_codec::Lz4Codec;
use crate::passthrough::PassThroughCodec;
use crate::shuffle;
use crate::zstd_codec::ZstdCodec;
use crate::BlockCodec;

/// Element-level transform applied before the byte coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    Identity,
    Shuffle(usize),
    Logical64,
    IntToByte,
    IntToShort,
    IntToShortShuffle2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coder {
    Stored,
    Lz4,
    Zstd,
}

fn stages(algorithm: CompAlgorithm) -> (Transform, Coder) {
    use CompAlgorithm as A;
    match algorithm {
        A::None => (Transform::Identity, Coder::Stored),
        A::Lz4 => (Transform::Identity, Coder::Lz4),
        A::Zstd => (Transform::Identity, Coder::Zstd),
        A::Lz4Shuffle4 => (Transform::Shuffle(4), Coder::Lz4),
        A::ZstdShuffle4 => (Transform::Shuffle(4), Coder::Zstd),
        A::Lz4Shuffle8 => (Transform::Shuffle(8), Coder::Lz4),
        A::ZstdShuffle8 => (Transform::Shuffle(8), Coder::Zstd),
        A::Lz4Logical64 => (Transform::Logical64, Coder::Lz4),
        A::Logical64 => (Transform::Logical64, Coder::Stored),
        A::ZstdLogical64 => (Transform::Logical64, Coder::Zstd),
        A::Lz4IntToByte => (Transform::IntToByte, Coder::Lz4),
        A::Lz4IntToShortShuffle2 => (Transform::IntToShortShuffle2, Coder::Lz4),
        A::IntToByte => (Transform::IntToByte, Coder::Stored),
        A::IntToShort => (Transform::IntToShort, Coder::Stored),
        A::ZstdIntToByte => (Transform::IntToByte, Coder::Zstd),
        A::ZstdIntToShortShuffle2 => (Transform::IntToShortShuffle2, Coder::Zstd),
    }
}

impl Transform {
    /// Size of the transformed representation of `len` input bytes.
    fn encoded_len(self, len: usize) -> usize {
        match self {
            Transform::Identity | Transform::Shuffle(_) => len,
            Transform::Logical64 => bitpack::logical64_len(len),
            Transform::IntToByte => len / 4,
            Transform::IntToShort | Transform::IntToShortShuffle2 => len / 2,
        }
    }

    fn encode(self, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        match self {
            Transform::Identity => {
                dst.clear();
                dst.extend_from_slice(src);
                Ok(())
            }
            Transform::Shuffle(width) => {
                shuffle::shuffle(src, width, dst);
                Ok(())
            }
            Transform::Logical64 => bitpack::pack_logical64(src, dst),
            Transform::IntToByte => bitpack::int_to_byte(src, dst),
            Transform::IntToShort => bitpack::int_to_short(src, dst),
            Transform::IntToShortShuffle2 => {
                let mut narrow = Vec::new();
                bitpack::int_to_short(src, &mut narrow)?;
                shuffle::shuffle(&narrow, 2, dst);
                Ok(())
            }
        }
    }

    fn decode(self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        match self {
            Transform::Identity => {
                dst.copy_from_slice(src);
                Ok(())
            }
            Transform::Shuffle(width) => {
                shuffle::unshuffle(src, width, dst);
                Ok(())
            }
            Transform::Logical64 => bitpack::unpack_logical64(src, dst),
            Transform::IntToByte => bitpack::byte_to_int(src, dst),
            Transform::IntToShort => bitpack::short_to_int(src, dst),
            Transform::IntToShortShuffle2 => {
                let mut narrow = vec![0u8; src.len()];
                shuffle::unshuffle(src, 2, &mut narrow);
                bitpack::short_to_int(&narrow, dst)
            }
        }
    }
}

impl Coder {
    fn codec(self, level: i32) -> Box<dyn BlockCodec> {
        match self {
            Coder::Stored => Box::new(PassThroughCodec),
            Coder::Lz4 => Box::new(Lz4Codec),
            Coder::Zstd => Box::new(ZstdCodec::new(level)),
        }
    }
}

/// Upper bound of the output of `algorithm` for `src_len` input bytes.
pub fn max_compressed_size(algorithm: CompAlgorithm, src_len: usize) -> usize {
    let (transform, coder) = stages(algorithm);
    coder.codec(0).max_compressed_size(transform.encoded_len(src_len))
}

/// Apply `algorithm` to `src`, replacing the contents of `dst`. `level` is
/// used by ZSTD only.
pub fn compress(algorithm: CompAlgorithm, level: i32, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
    let (transform, coder) = stages(algorithm);
    let codec = coder.codec(level);
    if transform == Transform::Identity {
        return codec.compress_block(src, dst);
    }
    let mut staged = Vec::with_capacity(transform.encoded_len(src.len()));
    transform.encode(src, &mut staged)?;
    if coder == Coder::Stored {
        *dst = staged;
        return Ok(());
    }
    codec.compress_block(&staged, dst)
}

/// Invert `algorithm`. `dst.len()` is the expected decompressed size.
pub fn decompress(algorithm: CompAlgorithm, src: &[u8], dst: &mut [u8]) -> Result<()> {
    let (transform, coder) = stages(algorithm);
    let codec = coder.codec(0);
    if transform == Transform::Identity {
        return codec.decompress_block(src, dst);
    }
    if coder == Coder::Stored {
        return transform.decode(src, dst);
    }
    let mut staged = vec![0u8; transform.encoded_len(dst.len())];
    codec.decompress_block(src, &mut staged)?;
    transform.decode(&staged, dst)
}

/// Decodes any algorithm recorded in a block index.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registry;

impl Decompressor for Registry {
    fn decompress(&self, algorithm: CompAlgorithm, src: &[u8], dst: &mut [u8]) -> Result<()> {
        decompress(algorithm, src, dst)
    }
}

/// One algorithm at one level.
///
/// Blocks that do not shrink are stored raw and reported as
/// [`CompAlgorithm::None`]; fixed-ratio algorithms are always applied so
/// their output size stays predictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleCompressor {
    algorithm: CompAlgorithm,
    level: i32,
}

impl SingleCompressor {
    pub fn new(algorithm: CompAlgorithm, level: i32) -> Self {
        Self { algorithm, level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Compressor for SingleCompressor {
    fn algorithm(&self) -> CompAlgorithm {
        self.algorithm
    }

    fn max_compressed_size(&self, src_len: usize) -> usize {
        max_compressed_size(self.algorithm, src_len).max(src_len)
    }

    fn compress(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<CompAlgorithm> {
        compress(self.algorithm, self.level, src, dst)?;
        if self.algorithm != CompAlgorithm::None
            && self.algorithm.fixed_ratio().is_none()
            && dst.len() >= src.len()
        {
            trace!(algorithm = ?self.algorithm, len = src.len(), packed = dst.len(), "block stored raw");
            dst.clear();
            dst.extend_from_slice(src);
            return Ok(CompAlgorithm::None);
        }
        Ok(self.algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstore_core::FstError;

    fn sample_ints(n: usize) -> Vec<u8> {
        (0..n as i32)
            .flat_map(|i| (i / 7 + 1).to_le_bytes())
            .collect()
    }

    fn sample_logicals(n: usize) -> Vec<u8> {
        (0..n as i32)
            .flat_map(|i| match i % 5 {
                0 | 3 => 1i32,
                4 => i32::MIN,
                _ => 0,
            }
            .to_le_bytes())
            .collect()
    }

    #[test]
    fn test_every_algorithm_inverts() {
        let ints = sample_ints(1000);
        let logicals = sample_logicals(1000);
        for algorithm in CompAlgorithm::ALL {
            let src = match algorithm {
                CompAlgorithm::Logical64
                | CompAlgorithm::Lz4Logical64
                | CompAlgorithm::ZstdLogical64 => &logicals,
                _ => &ints,
            };
            let mut packed = Vec::new();
            compress(algorithm, 3, src, &mut packed).unwrap();
            assert!(
                packed.len() <= max_compressed_size(algorithm, src.len()),
                "{} exceeded its bound",
                algorithm.name()
            );
            if let Some(ratio) = algorithm.fixed_ratio() {
                assert_eq!(packed.len(), ratio.compressed_len(src.len()));
            }
            let mut back = vec![0u8; src.len()];
            decompress(algorithm, &packed, &mut back).unwrap();
            assert_eq!(&back, src, "{} did not invert", algorithm.name());
        }
    }

    #[test]
    fn test_compression_is_deterministic() {
        let src = sample_ints(4096);
        let mut a = Vec::new();
        let mut b = Vec::new();
        compress(CompAlgorithm::ZstdShuffle4, 7, &src, &mut a).unwrap();
        compress(CompAlgorithm::ZstdShuffle4, 7, &src, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_capacity_is_corruption() {
        let src = sample_ints(256);
        let mut packed = Vec::new();
        compress(CompAlgorithm::Lz4, 0, &src, &mut packed).unwrap();
        let mut short = vec![0u8; src.len() - 4];
        assert!(matches!(
            decompress(CompAlgorithm::Lz4, &packed, &mut short),
            Err(FstError::Corrupt(_))
        ));

        let mut packed = Vec::new();
        compress(CompAlgorithm::Zstd, 3, &src, &mut packed).unwrap();
        let mut long = vec![0u8; src.len() + 4];
        assert!(decompress(CompAlgorithm::Zstd, &packed, &mut long).is_err());
    }

    #[test]
    fn test_incompressible_block_is_stored() {
        let mut rng = 0x2545_f491_4f6c_dd1du64;
        let src: Vec<u8> = (0..4096)
            .map(|_| {
                rng ^= rng << 13;
                rng ^= rng >> 7;
                rng ^= rng << 17;
                (rng >> 24) as u8
            })
            .collect();
        let compressor = SingleCompressor::new(CompAlgorithm::Lz4, 0);
        let mut dst = Vec::new();
        assert_eq!(compressor.compress(&src, &mut dst).unwrap(), CompAlgorithm::None);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_fixed_ratio_never_falls_back() {
        // one logical packs into a full 8-byte word, larger than its input
        let src = 1i32.to_le_bytes();
        let compressor = SingleCompressor::new(CompAlgorithm::Logical64, 0);
        let mut dst = Vec::new();
        assert_eq!(compressor.compress(&src, &mut dst).unwrap(), CompAlgorithm::Logical64);
        assert_eq!(dst.len(), 8);
    }
}
