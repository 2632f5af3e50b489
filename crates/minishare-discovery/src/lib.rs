//! MiniShare Discovery - find peers on the local network
//!
//! A probe broadcasts [`DISCOVERY_PROBE`] on the discovery port and collects
//! JSON replies until its timeout; every running peer keeps a [`Responder`]
//! bound to that port to answer with its device name and transfer port.

pub mod probe;
pub mod responder;

pub use probe::broadcast_discover;
pub use responder::Responder;

use minishare_core::{DISCOVERY_PORT, TRANSFER_PORT};
pub use minishare_core::DISCOVERY_PROBE;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Default time a probe waits for replies
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest datagram either side reads
pub const MAX_DATAGRAM: usize = 2048;

/// Probe configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port the responders listen on
    pub port: u16,
    /// Where the probe is sent
    pub broadcast_addr: IpAddr,
    /// How long replies are collected
    pub timeout: Duration,
    /// Transfer port assumed for replies that do not announce one
    pub default_transfer_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            timeout: DISCOVERY_TIMEOUT,
            default_transfer_port: TRANSFER_PORT,
        }
    }
}

/// Body of a responder's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}
