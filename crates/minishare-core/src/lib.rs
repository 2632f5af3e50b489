//! MiniShare Core - Codec, integrity and wire framing
//!
//! This crate provides the building blocks shared by the MiniShare discovery
//! service and the peer-to-peer transfer engine: the compress/encrypt codec,
//! content digests, and the byte-level frame format spoken over TCP.

pub mod cipher;
pub mod codec;
pub mod compress;
pub mod digest;
pub mod error;
pub mod frame;
pub mod proto;
pub mod types;

pub use cipher::{Cipher, CipherKind, SharedKey};
pub use codec::Codec;
pub use error::{Error, Result};
pub use types::*;

/// Protocol version carried in every frame header
pub const PROTOCOL_VERSION: u8 = 1;

/// Default UDP port for discovery probes
pub const DISCOVERY_PORT: u16 = 50000;

/// Default TCP port for file transfers
pub const TRANSFER_PORT: u16 = 50010;

/// Literal that every discovery probe starts with
pub const DISCOVERY_PROBE: &[u8] = b"MINISHARE_DISCOVER";

/// Default transport chunk size: 8 KB
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound for an encoded metadata block
pub const MAX_HEADER_LEN: u32 = 64 * 1024;
