//! Run-length compression stage of the codec
//!
//! The stream is a sequence of `(count, byte)` pairs with `1 <= count <= 255`.

use crate::{Error, Result};

/// Longest run a single pair can describe
pub const MAX_RUN: usize = u8::MAX as usize;

/// Compress `input` into `(count, byte)` pairs
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 2);
    let mut iter = input.iter().copied().peekable();

    while let Some(byte) = iter.next() {
        let mut count = 1usize;
        while count < MAX_RUN && iter.peek() == Some(&byte) {
            iter.next();
            count += 1;
        }
        out.push(count as u8);
        out.push(byte);
    }

    out
}

/// Expand a stream produced by [`compress`]
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    if input.len() % 2 != 0 {
        return Err(Error::Codec(format!(
            "run-length stream has odd length {}",
            input.len()
        )));
    }

    let mut out = Vec::with_capacity(input.len());
    for (i, pair) in input.chunks_exact(2).enumerate() {
        let (count, byte) = (pair[0], pair[1]);
        if count == 0 {
            return Err(Error::Codec(format!("zero-length run at pair {}", i)));
        }
        out.resize(out.len() + count as usize, byte);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(compress(&[]).is_empty());
        assert!(decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_pairs_layout() {
        assert_eq!(compress(b"aaabcc"), vec![3, b'a', 1, b'b', 2, b'c']);
    }

    #[test]
    fn test_long_runs_are_split() {
        let data = vec![7u8; 600];
        let packed = compress(&data);
        assert_eq!(packed, vec![255, 7, 255, 7, 90, 7]);
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_mixed_content_roundtrip() {
        let mut data = Vec::new();
        for i in 0..5000u32 {
            data.push((i % 7) as u8);
            if i % 13 == 0 {
                data.extend(std::iter::repeat(0xee).take((i % 300) as usize));
            }
        }
        assert_eq!(decompress(&compress(&data)).unwrap(), data);
    }

    #[test]
    fn test_corrupt_streams_rejected() {
        assert!(matches!(decompress(&[3, b'a', 1]), Err(Error::Codec(_))));
        assert!(matches!(decompress(&[0, b'a']), Err(Error::Codec(_))));
    }
}
