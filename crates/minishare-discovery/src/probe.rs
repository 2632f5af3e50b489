//! Broadcast probe

use crate::{DiscoveryConfig, DiscoveryReply, Result, DISCOVERY_PROBE, MAX_DATAGRAM};
use minishare_core::PeerAddress;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Broadcast one probe and collect replies until the timeout elapses
///
/// Never fails: socket errors are logged and an empty (or partial) list is
/// returned. Always runs for the full timeout so late replies are not missed.
pub async fn broadcast_discover(config: &DiscoveryConfig) -> Vec<PeerAddress> {
    let deadline = Instant::now() + config.timeout;
    let mut peers = Vec::new();

    let socket = match open_probe_socket(config).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!("Discovery probe could not be sent: {}", e);
            tokio::time::sleep_until(deadline).await;
            return peers;
        }
    };

    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Ok((n, from))) => {
                let peer = parse_reply(&buf[..n], from, config.default_transfer_port);
                if peers.iter().any(|p: &PeerAddress| p.addr == peer.addr) {
                    continue;
                }
                tracing::debug!("Discovered {}", peer);
                peers.push(peer);
            }
            Ok(Err(e)) => {
                tracing::debug!("Ignoring discovery receive error: {}", e);
            }
        }
    }

    tracing::info!("Discovery finished with {} peer(s)", peers.len());
    peers
}

async fn open_probe_socket(config: &DiscoveryConfig) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket.set_broadcast(true)?;

    let target = SocketAddr::new(config.broadcast_addr, config.port);
    socket.send_to(DISCOVERY_PROBE, target).await?;
    tracing::debug!("Sent discovery probe to {}", target);

    Ok(socket)
}

/// Turn a reply datagram into a peer
///
/// Unreadable replies still name a peer, just without a device name.
pub fn parse_reply(data: &[u8], from: SocketAddr, default_transfer_port: u16) -> PeerAddress {
    match serde_json::from_slice::<DiscoveryReply>(data) {
        Ok(reply) => PeerAddress::new(
            SocketAddr::new(from.ip(), reply.port.unwrap_or(default_transfer_port)),
            Some(reply.device),
        ),
        Err(e) => {
            tracing::debug!("Unreadable discovery reply from {}: {}", from, e);
            PeerAddress::new(SocketAddr::new(from.ip(), default_transfer_port), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::time::Duration;

    #[test]
    fn test_parse_reply() {
        let from: SocketAddr = "10.0.0.5:41234".parse().unwrap();

        let peer = parse_reply(br#"{"device":"kitchen","port":6000}"#, from, 50010);
        assert_eq!(peer.addr, "10.0.0.5:6000".parse().unwrap());
        assert_eq!(peer.name.as_deref(), Some("kitchen"));

        let peer = parse_reply(br#"{"device":"attic"}"#, from, 50010);
        assert_eq!(peer.addr, "10.0.0.5:50010".parse().unwrap());

        let peer = parse_reply(b"\xff\x00garbage", from, 50010);
        assert_eq!(peer.addr, "10.0.0.5:50010".parse().unwrap());
        assert!(peer.name.is_none());
    }

    #[tokio::test]
    async fn test_no_responders_waits_full_timeout() {
        // Bound but silent, so the probe lands somewhere and nothing answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = DiscoveryConfig {
            port: silent.local_addr().unwrap().port(),
            broadcast_addr: IpAddr::from([127, 0, 0, 1]),
            timeout: Duration::from_millis(300),
            ..DiscoveryConfig::default()
        };

        let started = std::time::Instant::now();
        let peers = broadcast_discover(&config).await;

        assert!(peers.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
