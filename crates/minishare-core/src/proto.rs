//! Protocol buffer message definitions
//!
//! Defined by hand with prost derives, avoiding the need for protoc at build time.

use crate::digest;
use crate::types::ContentHash;
use crate::{Error, Result, PROTOCOL_VERSION};
use prost::Message;

/// Metadata describing the payload that follows it on the wire
#[derive(Clone, PartialEq, Message)]
pub struct FrameHeader {
    /// Protocol version
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// File name as supplied by the sender (sanitized by the receiver)
    #[prost(string, tag = "2")]
    pub filename: String,
    /// Exact number of encoded payload bytes that follow
    #[prost(uint64, tag = "3")]
    pub payload_length: u64,
    /// Size of the file before encoding
    #[prost(uint64, tag = "4")]
    pub plaintext_length: u64,
    /// BLAKE3 digest of the plaintext
    #[prost(bytes, tag = "5")]
    pub digest: Vec<u8>,
}

impl FrameHeader {
    /// Create a header with the current protocol version
    pub fn new(
        filename: impl Into<String>,
        payload_length: u64,
        plaintext_length: u64,
        digest: &ContentHash,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION as u32,
            filename: filename.into(),
            payload_length,
            plaintext_length,
            digest: digest.to_vec(),
        }
    }

    /// Encode the header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode a header from bytes, checking version compatibility
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Self::decode(buf)?;

        if header.version != PROTOCOL_VERSION as u32 {
            return Err(Error::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: header.version,
            });
        }

        Ok(header)
    }

    /// The plaintext digest as a fixed-size hash
    pub fn content_hash(&self) -> Result<ContentHash> {
        digest::from_wire(&self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let hash = [7u8; 32];
        let original = FrameHeader::new("notes.txt", 1234, 999, &hash);
        let decoded = FrameHeader::from_bytes(&original.to_bytes()).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.content_hash().unwrap(), hash);
    }

    #[test]
    fn test_header_version_checked() {
        let mut header = FrameHeader::new("a", 1, 1, &[0u8; 32]);
        header.version = 99;

        match FrameHeader::from_bytes(&header.to_bytes()) {
            Err(Error::VersionMismatch { expected, actual }) => {
                assert_eq!(expected, PROTOCOL_VERSION);
                assert_eq!(actual, 99);
            }
            other => panic!("expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(FrameHeader::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
