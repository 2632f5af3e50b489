//! Discovery responder: answers probes with this device's name

use crate::{DiscoveryReply, Result, DISCOVERY_PROBE, MAX_DATAGRAM};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Answers discovery probes for as long as it runs
pub struct Responder {
    socket: UdpSocket,
    reply: Vec<u8>,
}

impl Responder {
    /// Bind the discovery port and prepare the reply for `device_name`
    pub async fn bind(addr: SocketAddr, device_name: &str, transfer_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let reply = serde_json::to_vec(&DiscoveryReply {
            device: device_name.to_string(),
            port: Some(transfer_port),
        })?;

        tracing::info!(
            "Discovery responder for {:?} listening on {}",
            device_name,
            socket.local_addr()?
        );

        Ok(Self { socket, reply })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Reply to one datagram if it is a probe; returns whether a reply was sent
    pub async fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> bool {
        if !data.starts_with(DISCOVERY_PROBE) {
            tracing::debug!("Ignoring {} byte non-probe datagram from {}", data.len(), from);
            return false;
        }

        match self.socket.send_to(&self.reply, from).await {
            Ok(_) => {
                tracing::debug!("Answered discovery probe from {}", from);
                true
            }
            Err(e) => {
                tracing::debug!("Failed to answer probe from {}: {}", from, e);
                false
            }
        }
    }

    /// Serve probes until the task is dropped or aborted
    pub async fn run(self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    self.handle_datagram(&buf[..n], from).await;
                }
                Err(e) => {
                    tracing::debug!("Discovery receive error: {}", e);
                }
            }
        }
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
