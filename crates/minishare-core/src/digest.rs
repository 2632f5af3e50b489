//! Content digests for corruption detection

use crate::types::{hash_to_hex, ContentHash};
use crate::{Error, Result};
use std::io::Read;
use std::path::Path;

const READ_BUF: usize = 1024 * 1024;

/// Digest of an in-memory buffer
pub fn digest(data: &[u8]) -> ContentHash {
    *blake3::hash(data).as_bytes()
}

/// Digest of a file, streamed in 1 MB reads
pub fn digest_file(path: &Path) -> Result<ContentHash> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUF];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(*hasher.finalize().as_bytes())
}

/// Compare `data` against an expected digest
pub fn verify(data: &[u8], expected: &ContentHash) -> Result<()> {
    let actual = digest(data);
    if &actual != expected {
        return Err(Error::HashMismatch {
            expected: hash_to_hex(expected),
            actual: hash_to_hex(&actual),
        });
    }
    Ok(())
}

/// Parse a digest received off the wire
pub fn from_wire(bytes: &[u8]) -> Result<ContentHash> {
    bytes
        .try_into()
        .map_err(|_| Error::Protocol(format!("digest must be 32 bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(digest(b"abc"), digest(b"abc"));
        assert_ne!(digest(b"abc"), digest(b"abd"));
        assert_ne!(digest(b""), digest(b"\0"));
    }

    #[test]
    fn test_file_digest_matches_buffer_digest() {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..3 * READ_BUF + 17).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        assert_eq!(digest_file(file.path()).unwrap(), digest(&data));
    }

    #[test]
    fn test_verify_reports_both_hashes() {
        let expected = digest(b"original");
        assert!(verify(b"original", &expected).is_ok());
        match verify(b"0riginal", &expected) {
            Err(Error::HashMismatch { expected: e, actual }) => {
                assert_eq!(e, hash_to_hex(&expected));
                assert_ne!(actual, e);
            }
            other => panic!("expected HashMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_from_wire_length_check() {
        assert!(from_wire(&[0u8; 32]).is_ok());
        assert!(matches!(from_wire(&[0u8; 31]), Err(Error::Protocol(_))));
    }
}
