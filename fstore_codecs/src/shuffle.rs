//! Byte transposition of fixed-width elements.
//!
//! Gathering byte `j` of every element into one run puts the slowly varying
//! high-order bytes of numeric data next to each other, which the entropy
//! coders that follow compress far better than the interleaved original.

/// Transpose `src` as `width`-byte elements into `dst`. Trailing bytes that
/// do not form a whole element are appended unchanged.
pub fn shuffle(src: &[u8], width: usize, dst: &mut Vec<u8>) {
    let count = src.len() / width;
    dst.clear();
    dst.resize(src.len(), 0);
    for (i, element) in src.chunks_exact(width).enumerate() {
        for (j, byte) in element.iter().enumerate() {
            dst[j * count + i] = *byte;
        }
    }
    let tail = count * width;
    dst[tail..].copy_from_slice(&src[tail..]);
}

/// Inverse of [`shuffle`]; `src` and `dst` have the same length.
pub fn unshuffle(src: &[u8], width: usize, dst: &mut [u8]) {
    let count = dst.len() / width;
    for (i, element) in dst.chunks_exact_mut(width).enumerate() {
        for (j, byte) in element.iter_mut().enumerate() {
            *byte = src[j * count + i];
        }
    }
    let tail = count * width;
    dst[tail..].copy_from_slice(&src[tail..]);
}
