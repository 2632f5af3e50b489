//! Encryption stage of the codec
//!
//! Two interchangeable schemes sit behind the [`Cipher`] trait:
//! - [`ChaChaCipher`]: ChaCha20-Poly1305 with a random nonce per message (default)
//! - [`XorCipher`]: repeating-key XOR, no nonce and no integrity. Insecure, opt-in only.

use crate::{Error, Result};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const KDF_SALT: &[u8] = b"minishare-shared-key-v1";
const KDF_INFO: &[u8] = b"minishare-file-encryption";

/// Symmetric key shared by both peers
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Derive a key from a passphrase both peers know
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), passphrase.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(KDF_INFO, &mut key)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(Self(key))
    }

    /// Generate a fresh random key
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut key).map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey(<redacted>)")
    }
}

/// A reversible keyed byte transform
pub trait Cipher: Send + Sync {
    /// Short name used in logs and config
    fn name(&self) -> &'static str;

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Which [`Cipher`] implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherKind {
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    XorInsecure,
}

impl CipherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherKind::ChaCha20Poly1305 => "chacha20-poly1305",
            CipherKind::XorInsecure => "xor-insecure",
        }
    }

    /// Build the cipher for this kind around `key`
    pub fn build(self, key: &SharedKey) -> Arc<dyn Cipher> {
        match self {
            CipherKind::ChaCha20Poly1305 => Arc::new(ChaChaCipher::new(key)),
            CipherKind::XorInsecure => Arc::new(XorCipher::new(key)),
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chacha20-poly1305" | "chacha" => Ok(CipherKind::ChaCha20Poly1305),
            "xor-insecure" | "xor" => Ok(CipherKind::XorInsecure),
            other => Err(Error::Codec(format!("unknown cipher {:?}", other))),
        }
    }
}

/// ChaCha20-Poly1305 with the nonce prepended to every ciphertext
pub struct ChaChaCipher {
    aead: ChaCha20Poly1305,
}

impl ChaChaCipher {
    pub fn new(key: &SharedKey) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }
}

impl Cipher for ChaChaCipher {
    fn name(&self) -> &'static str {
        CipherKind::ChaCha20Poly1305.as_str()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| Error::Codec(format!("nonce generation failed: {}", e)))?;

        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| Error::Codec("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Codec(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        self.aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::Codec("authentication failed".to_string()))
    }
}

/// Repeating-key XOR. Offers no confidentiality against pattern analysis.
pub struct XorCipher {
    key: [u8; KEY_SIZE],
}

impl XorCipher {
    pub fn new(key: &SharedKey) -> Self {
        tracing::warn!("Using the insecure XOR cipher; contents are not protected");
        Self { key: *key.as_bytes() }
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

impl Cipher for XorCipher {
    fn name(&self) -> &'static str {
        CipherKind::XorInsecure.as_str()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.apply(plaintext))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.apply(ciphertext))
    }
}
