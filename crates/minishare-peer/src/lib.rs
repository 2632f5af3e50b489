//! MiniShare Peer Library
//!
//! This library provides the transfer engine for the MiniShare LAN file sharing tool:
//! the receiving server, the sending client, and the session bookkeeping between them.

pub mod client;
pub mod config;
pub mod server;
pub mod session;

pub use client::TransferClient;
pub use config::Config;
pub use server::{ServerEvent, TransferServer};
pub use session::{CancelFlag, TransferEvent, TransferHandle, TransferReport};
