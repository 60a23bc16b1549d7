//! Fixed-ratio packers. Output size depends on the input size only.

use fstore_core::{FstError, Result};

/// NA marker for 32-bit integers, logicals and factor codes.
pub const NA_INT32: i32 = i32::MIN;

/// Logicals packed into one 64-bit word: value bits low, NA bits high.
pub const LOGICALS_PER_WORD: usize = 32;

fn read_i32(bytes: &[u8]) -> i32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(bytes);
    i32::from_le_bytes(b)
}

fn check_int_len(len: usize, what: &str) -> Result<()> {
    if len % 4 != 0 {
        return Err(FstError::corrupt(format!(
            "{what} input of {len} bytes is not a whole number of 32-bit values"
        )));
    }
    Ok(())
}

/// Packed size of `src_len` bytes of logicals.
pub fn logical64_len(src_len: usize) -> usize {
    src_len.div_ceil(4 * LOGICALS_PER_WORD) * 8
}

/// Pack little-endian `i32` logicals (0, 1 or NA) 32 to a word.
pub fn pack_logical64(src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
    check_int_len(src.len(), "logical64")?;
    dst.clear();
    dst.reserve(logical64_len(src.len()));
    for group in src.chunks(4 * LOGICALS_PER_WORD) {
        let mut word = 0u64;
        for (k, value) in group.chunks_exact(4).enumerate() {
            match read_i32(value) {
                0 => {}
                NA_INT32 => word |= 1u64 << (32 + k),
                _ => word |= 1u64 << k,
            }
        }
        dst.extend_from_slice(&word.to_le_bytes());
    }
    Ok(())
}

pub fn unpack_logical64(src: &[u8], dst: &mut [u8]) -> Result<()> {
    check_int_len(dst.len(), "logical64")?;
    if src.len() != logical64_len(dst.len()) {
        return Err(FstError::corrupt(format!(
            "logical64 block of {} bytes cannot hold {} values",
            src.len(),
            dst.len() / 4
        )));
    }
    for (group, word) in dst.chunks_mut(4 * LOGICALS_PER_WORD).zip(src.chunks_exact(8)) {
        let mut b = [0u8; 8];
        b.copy_from_slice(word);
        let word = u64::from_le_bytes(b);
        for (k, value) in group.chunks_exact_mut(4).enumerate() {
            let v = if word & (1u64 << (32 + k)) != 0 {
                NA_INT32
            } else {
                ((word >> k) & 1) as i32
            };
            value.copy_from_slice(&v.to_le_bytes());
        }
    }
    Ok(())
}

/// Narrow `i32` values in `1..=255` (or NA, stored as 0) to one byte each.
pub fn int_to_byte(src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
    check_int_len(src.len(), "int2byte")?;
    dst.clear();
    dst.reserve(src.len() / 4);
    for value in src.chunks_exact(4) {
        let v = read_i32(value);
        let narrow = match v {
            NA_INT32 => 0,
            1..=255 => v as u8,
            _ => {
                return Err(FstError::corrupt(format!("value {v} does not fit int2byte")));
            }
        };
        dst.push(narrow);
    }
    Ok(())
}

pub fn byte_to_int(src: &[u8], dst: &mut [u8]) -> Result<()> {
    check_int_len(dst.len(), "int2byte")?;
    if src.len() != dst.len() / 4 {
        return Err(FstError::corrupt(format!(
            "int2byte block of {} bytes cannot hold {} values",
            src.len(),
            dst.len() / 4
        )));
    }
    for (narrow, value) in src.iter().zip(dst.chunks_exact_mut(4)) {
        let v = if *narrow == 0 { NA_INT32 } else { *narrow as i32 };
        value.copy_from_slice(&v.to_le_bytes());
    }
    Ok(())
}

/// Narrow `i32` values in `1..=65535` (or NA, stored as 0) to two bytes each.
pub fn int_to_short(src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
    check_int_len(src.len(), "int2short")?;
    dst.clear();
    dst.reserve(src.len() / 2);
    for value in src.chunks_exact(4) {
        let v = read_i32(value);
        let narrow: u16 = match v {
            NA_INT32 => 0,
            1..=65535 => v as u16,
            _ => {
                return Err(FstError::corrupt(format!("value {v} does not fit int2short")));
            }
        };
        dst.extend_from_slice(&narrow.to_le_bytes());
    }
    Ok(())
}

pub fn short_to_int(src: &[u8], dst: &mut [u8]) -> Result<()> {
    check_int_len(dst.len(), "int2short")?;
    if src.len() != dst.len() / 2 {
        return Err(FstError::corrupt(format!(
            "int2short block of {} bytes cannot hold {} values",
            src.len(),
            dst.len() / 4
        )));
    }
    for (narrow, value) in src.chunks_exact(2).zip(dst.chunks_exact_mut(4)) {
        let n = u16::from_le_bytes([narrow[0], narrow[1]]);
        let v = if n == 0 { NA_INT32 } else { n as i32 };
        value.copy_from_slice(&v.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_logical64_word_layout() {
        let src = ints(&[1, 0, NA_INT32, 1]);
        let mut packed = Vec::new();
        pack_logical64(&src, &mut packed).unwrap();
        assert_eq!(packed.len(), 8);
        let word = u64::from_le_bytes(packed[..8].try_into().unwrap());
        assert_eq!(word, 0b1001 | (1 << 34));

        let mut back = vec![0u8; src.len()];
        unpack_logical64(&packed, &mut back).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn test_logical64_partial_words() {
        let values: Vec<i32> = (0..70)
            .map(|i| match i % 3 {
                0 => 1,
                1 => 0,
                _ => NA_INT32,
            })
            .collect();
        let src = ints(&values);
        let mut packed = Vec::new();
        pack_logical64(&src, &mut packed).unwrap();
        assert_eq!(packed.len(), logical64_len(src.len()));
        assert_eq!(packed.len(), 24);

        let mut back = vec![0u8; src.len()];
        unpack_logical64(&packed, &mut back).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn test_int_to_byte_maps_na_to_zero() {
        let src = ints(&[1, NA_INT32, 255, 7]);
        let mut narrow = Vec::new();
        int_to_byte(&src, &mut narrow).unwrap();
        assert_eq!(narrow, vec![1, 0, 255, 7]);

        let mut back = vec![0u8; 16];
        byte_to_int(&narrow, &mut back).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn test_int_to_byte_rejects_out_of_range() {
        let mut narrow = Vec::new();
        assert!(int_to_byte(&ints(&[256]), &mut narrow).is_err());
        assert!(int_to_byte(&ints(&[0]), &mut narrow).is_err());
    }

    #[test]
    fn test_int_to_short() {
        let src = ints(&[65535, NA_INT32, 300]);
        let mut narrow = Vec::new();
        int_to_short(&src, &mut narrow).unwrap();
        assert_eq!(narrow.len(), 6);

        let mut back = vec![0u8; 12];
        short_to_int(&narrow, &mut back).unwrap();
        assert_eq!(back, src);
    }
}
