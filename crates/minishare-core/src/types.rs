//! Core data types for MiniShare

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A 32-byte BLAKE3 hash
pub type ContentHash = [u8; 32];

/// A peer found on the local network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Address of the peer's transfer server
    pub addr: SocketAddr,
    /// Device name announced by the peer, if it sent a readable one
    pub name: Option<String>,
}

impl PeerAddress {
    pub fn new(addr: SocketAddr, name: Option<String>) -> Self {
        Self { addr, name }
    }

    /// Name to show a user: the announced device name or the IP
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.addr.ip().to_string(),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.addr)
    }
}

/// Result of moving a single file across a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Written by the receiver, digest matched
    Delivered,
    /// Written by the receiver, but the digest did not match
    DeliveredWithWarning(String),
    /// Aborted locally before the payload was complete
    Cancelled,
    /// Not delivered
    Failed(String),
}

impl FileOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, FileOutcome::Delivered | FileOutcome::DeliveredWithWarning(_))
    }
}

/// Terminal result of a whole session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    Success,
    CompletedWithWarnings,
    Cancelled,
    Failed(String),
}

impl SessionResult {
    /// Fold per-file outcomes into one session result
    ///
    /// Cancellation wins over failure, failure over warnings.
    pub fn aggregate<'a>(outcomes: impl IntoIterator<Item = &'a FileOutcome>) -> Self {
        let mut warned = false;
        let mut failure: Option<String> = None;

        for outcome in outcomes {
            match outcome {
                FileOutcome::Cancelled => return SessionResult::Cancelled,
                FileOutcome::Failed(detail) => {
                    failure.get_or_insert_with(|| detail.clone());
                }
                FileOutcome::DeliveredWithWarning(_) => warned = true,
                FileOutcome::Delivered => {}
            }
        }

        match failure {
            Some(detail) => SessionResult::Failed(detail),
            None if warned => SessionResult::CompletedWithWarnings,
            None => SessionResult::Success,
        }
    }
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionResult::Success => write!(f, "success"),
            SessionResult::CompletedWithWarnings => write!(f, "completed with warnings"),
            SessionResult::Cancelled => write!(f, "cancelled"),
            SessionResult::Failed(detail) => write!(f, "failed: {}", detail),
        }
    }
}

/// Helper to format a content hash as hex string
pub fn hash_to_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_outcomes() {
        assert_eq!(
            SessionResult::aggregate(&Vec::<FileOutcome>::new()),
            SessionResult::Success
        );
        assert_eq!(
            SessionResult::aggregate(&[FileOutcome::Delivered, FileOutcome::Delivered]),
            SessionResult::Success
        );
        assert_eq!(
            SessionResult::aggregate(&[
                FileOutcome::Delivered,
                FileOutcome::DeliveredWithWarning("digest".into()),
            ]),
            SessionResult::CompletedWithWarnings
        );
        assert_eq!(
            SessionResult::aggregate(&[
                FileOutcome::DeliveredWithWarning("digest".into()),
                FileOutcome::Failed("bad payload".into()),
                FileOutcome::Failed("second".into()),
            ]),
            SessionResult::Failed("bad payload".into())
        );
        assert_eq!(
            SessionResult::aggregate(&[
                FileOutcome::Failed("bad payload".into()),
                FileOutcome::Cancelled,
            ]),
            SessionResult::Cancelled
        );
    }

    #[test]
    fn test_warning_still_counts_as_delivered() {
        assert!(FileOutcome::Delivered.is_delivered());
        assert!(FileOutcome::DeliveredWithWarning("digest".into()).is_delivered());
        assert!(!FileOutcome::Cancelled.is_delivered());
        assert!(!FileOutcome::Failed("refused".into()).is_delivered());
    }

    #[test]
    fn test_hash_to_hex() {
        let hex = hash_to_hex(&[0xabu8; 32]);
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn test_peer_display_name_falls_back_to_ip() {
        let addr: SocketAddr = "192.168.1.20:50010".parse().unwrap();
        assert_eq!(PeerAddress::new(addr, None).display_name(), "192.168.1.20");
        assert_eq!(
            PeerAddress::new(addr, Some("laptop".into())).display_name(),
            "laptop"
        );
    }
}
