//! The reversible transform applied to everything sent over a transfer connection
//!
//! `encode` compresses then encrypts, `decode` decrypts then decompresses.

use crate::cipher::{Cipher, CipherKind, SharedKey};
use crate::{compress, Result};
use std::fmt;
use std::sync::Arc;

/// Compression + encryption pipeline shared read-only by every session
#[derive(Clone)]
pub struct Codec {
    cipher: Arc<dyn Cipher>,
}

impl Codec {
    pub fn new(cipher: Arc<dyn Cipher>) -> Self {
        Self { cipher }
    }

    /// Build a codec around the given cipher kind and key
    pub fn with_key(kind: CipherKind, key: &SharedKey) -> Self {
        Self::new(kind.build(key))
    }

    pub fn cipher_name(&self) -> &'static str {
        self.cipher.name()
    }

    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let packed = compress::compress(plaintext);
        self.cipher.encrypt(&packed)
    }

    pub fn decode(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let packed = self.cipher.decrypt(ciphertext)?;
        compress::decompress(&packed)
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Codec({})", self.cipher.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn samples() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            vec![0x42],
            vec![0u8; 255],
            vec![0u8; 256],
            vec![9u8; 70_000],
            b"The quick brown fox jumps over the lazy dog".to_vec(),
            (0..=255u8).cycle().take(10_000).collect(),
        ]
    }

    #[test]
    fn test_roundtrip_both_ciphers() {
        let key = SharedKey::from_passphrase("roundtrip").unwrap();
        for kind in [CipherKind::ChaCha20Poly1305, CipherKind::XorInsecure] {
            let codec = Codec::with_key(kind, &key);
            for sample in samples() {
                let encoded = codec.encode(&sample).unwrap();
                assert_eq!(codec.decode(&encoded).unwrap(), sample, "{}", kind);
            }
        }
    }

    #[test]
    fn test_runs_shrink_before_encryption() {
        let codec = Codec::with_key(
            CipherKind::ChaCha20Poly1305,
            &SharedKey::from_passphrase("shrink").unwrap(),
        );
        let encoded = codec.encode(&vec![1u8; 100_000]).unwrap();
        assert!(encoded.len() < 1_000);
    }

    #[test]
    fn test_mismatched_keys_fail_to_decode() {
        let sender = Codec::with_key(
            CipherKind::ChaCha20Poly1305,
            &SharedKey::from_passphrase("alpha").unwrap(),
        );
        let receiver = Codec::with_key(
            CipherKind::ChaCha20Poly1305,
            &SharedKey::from_passphrase("beta").unwrap(),
        );
        let encoded = sender.encode(b"secret notes").unwrap();
        assert!(matches!(receiver.decode(&encoded), Err(Error::Codec(_))));
    }
}
