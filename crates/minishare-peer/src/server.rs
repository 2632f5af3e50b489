//! Transfer server
//!
//! Accepts connections from sending peers and writes each received file into
//! the receive directory. Every connection is served on its own task, and a
//! failure only ends the connection it happened on.

use minishare_core::frame::{self, Status};
use minishare_core::proto::FrameHeader;
use minishare_core::{digest, Codec, Result};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// Something that happened on the receiving side
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Connected {
        peer: SocketAddr,
    },
    /// Payload bytes received so far for the current file
    Progress {
        peer: SocketAddr,
        filename: String,
        fraction: f64,
    },
    FileReceived {
        peer: SocketAddr,
        filename: String,
        path: PathBuf,
        bytes: u64,
        /// False when the file was kept despite a digest or length mismatch
        digest_ok: bool,
    },
    FileFailed {
        peer: SocketAddr,
        filename: String,
        reason: String,
    },
    /// The connection was dropped because of a network or framing error
    ConnectionFailed {
        peer: SocketAddr,
        reason: String,
    },
    Disconnected {
        peer: SocketAddr,
    },
}

/// Listens for incoming transfers
pub struct TransferServer {
    listener: TcpListener,
    inbox: Inbox,
}

impl TransferServer {
    /// Bind `addr` and make sure `receive_dir` exists
    pub async fn bind(
        addr: SocketAddr,
        codec: Codec,
        receive_dir: impl Into<PathBuf>,
        chunk_size: usize,
    ) -> Result<Self> {
        let receive_dir = receive_dir.into();
        tokio::fs::create_dir_all(&receive_dir).await?;

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            "Transfer server listening on {}, saving to {}",
            listener.local_addr()?,
            receive_dir.display()
        );

        Ok(Self {
            listener,
            inbox: Inbox {
                codec,
                receive_dir,
                chunk_size: chunk_size.max(1),
                events: None,
            },
        })
    }

    /// Publish server events on `events`
    ///
    /// The receiver must be drained; only progress updates are dropped when it
    /// falls behind.
    pub fn with_events(mut self, events: Sender<ServerEvent>) -> Self {
        self.inbox.events = Some(events);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn receive_dir(&self) -> &Path {
        &self.inbox.receive_dir
    }

    /// Accept connections until the task is dropped or aborted
    pub async fn run(self) {
        let inbox = Arc::new(self.inbox);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not disable Nagle for {}: {}", peer, e);
                    }
                    let inbox = inbox.clone();
                    tokio::spawn(async move {
                        inbox.serve(stream, peer).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// State shared by all connections of one server
struct Inbox {
    codec: Codec,
    receive_dir: PathBuf,
    chunk_size: usize,
    events: Option<Sender<ServerEvent>>,
}

impl Inbox {
    async fn emit(&self, event: ServerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event).await;
        }
    }

    /// Queue a progress update unless the receiver is behind
    fn emit_progress(&self, event: ServerEvent) -> bool {
        match &self.events {
            Some(events) => events.try_send(event).is_ok(),
            None => true,
        }
    }

    async fn serve<S>(&self, mut stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::info!("Connection from {}", peer);
        self.emit(ServerEvent::Connected { peer }).await;

        let mut files = 0usize;
        let result = loop {
            match frame::read_header(&mut stream, &self.codec).await {
                Ok(None) => break Ok(()),
                Ok(Some(header)) => {
                    if let Err(e) = self.receive_file(&mut stream, peer, header).await {
                        break Err(e);
                    }
                    files += 1;
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(()) => tracing::info!("{} finished after {} file(s)", peer, files),
            Err(e) => {
                tracing::error!("Dropping connection from {}: {}", peer, e);
                self.emit(ServerEvent::ConnectionFailed {
                    peer,
                    reason: e.to_string(),
                })
                .await;
            }
        }
        self.emit(ServerEvent::Disconnected { peer }).await;
    }

    /// Handle one header and, if accepted, its payload
    ///
    /// Returns an error only when the connection can no longer be trusted.
    async fn receive_file<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        header: FrameHeader,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let expected = header.content_hash()?;

        let filename = match frame::sanitize_filename(&header.filename) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!("Rejecting file from {}: {}", peer, e);
                frame::write_status(stream, Status::Rejected).await?;
                self.emit(ServerEvent::FileFailed {
                    peer,
                    filename: header.filename.clone(),
                    reason: e.to_string(),
                })
                .await;
                return Ok(());
            }
        };
        if filename != header.filename {
            tracing::debug!("Sanitized {:?} to {:?}", header.filename, filename);
        }

        tracing::info!(
            "Receiving {} from {} ({} encoded bytes)",
            filename,
            peer,
            header.payload_length
        );
        frame::write_status(stream, Status::Ready).await?;

        let total = header.payload_length;
        let mut last_dropped = false;
        let payload = frame::read_payload(stream, total, self.chunk_size, |received| {
            last_dropped = !self.emit_progress(ServerEvent::Progress {
                peer,
                filename: filename.clone(),
                fraction: received as f64 / total as f64,
            });
        })
        .await?;
        if last_dropped {
            self.emit(ServerEvent::Progress {
                peer,
                filename: filename.clone(),
                fraction: 1.0,
            })
            .await;
        }

        let codec = self.codec.clone();
        let decoded = tokio::task::spawn_blocking(move || {
            codec.decode(&payload).map(|plaintext| {
                let check = digest::verify(&plaintext, &expected);
                (plaintext, check)
            })
        })
        .await;
        let (plaintext, check) = match decoded {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) => return self.refuse(stream, peer, filename, e.to_string()).await,
            Err(e) => {
                let reason = format!("decoder task failed: {}", e);
                return self.refuse(stream, peer, filename, reason).await;
            }
        };

        let bytes = plaintext.len() as u64;
        let mut warnings = Vec::new();
        if let Err(e) = check {
            warnings.push(e.to_string());
        }
        if bytes != header.plaintext_length {
            warnings.push(format!(
                "decoded {} bytes, header announced {}",
                bytes, header.plaintext_length
            ));
        }

        let path = self.receive_dir.join(&filename);
        let dir = self.receive_dir.clone();
        let target = path.clone();
        let stored = tokio::task::spawn_blocking(move || store(&dir, &target, &plaintext)).await;
        let reason = match stored {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("cannot write {}: {}", path.display(), e)),
            Err(e) => Some(format!("writer task failed: {}", e)),
        };
        if let Some(reason) = reason {
            return self.refuse(stream, peer, filename, reason).await;
        }

        let digest_ok = warnings.is_empty();
        if digest_ok {
            frame::write_status(stream, Status::Ok).await?;
            tracing::info!("Saved {} ({} bytes)", path.display(), bytes);
        } else {
            frame::write_status(stream, Status::Warn).await?;
            tracing::warn!(
                "Saved {} with integrity warning: {}",
                path.display(),
                warnings.join("; ")
            );
        }

        self.emit(ServerEvent::FileReceived {
            peer,
            filename,
            path,
            bytes,
            digest_ok,
        })
        .await;
        Ok(())
    }

    /// Answer ER for a file that was read off the wire but cannot be kept
    async fn refuse<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        filename: String,
        reason: String,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        tracing::warn!("Could not store {} from {}: {}", filename, peer, reason);
        frame::write_status(stream, Status::Failed).await?;
        self.emit(ServerEvent::FileFailed {
            peer,
            filename,
            reason,
        })
        .await;
        Ok(())
    }
}

/// Write `data` to `path` through a temporary file in `dir`
///
/// The target only appears once the whole file is on disk.
fn store(dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
