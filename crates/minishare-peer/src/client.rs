//! Transfer client
//!
//! Streams an ordered list of files to a peer's transfer server over one TCP
//! connection, publishing progress as it goes and stopping at the next chunk
//! boundary when cancelled.

use crate::session::{
    display_name, CancelFlag, FileReport, SessionState, TransferEvent, TransferHandle,
    TransferReport, TransferSession, EVENT_CHANNEL_CAPACITY,
};
use minishare_core::frame::{self, Status};
use minishare_core::proto::FrameHeader;
use minishare_core::{digest, Codec, Error, FileOutcome, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Sender};

/// Time allowed for the TCP connect
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends files to a peer
#[derive(Debug, Clone)]
pub struct TransferClient {
    codec: Codec,
    chunk_size: usize,
}

impl TransferClient {
    pub fn new(codec: Codec, chunk_size: usize) -> Self {
        Self {
            codec,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Start sending `files` to `peer` on a background task
    pub fn spawn(&self, peer: SocketAddr, files: Vec<PathBuf>) -> TransferHandle {
        let cancel = CancelFlag::new();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let client = self.clone();
        let flag = cancel.clone();
        let task =
            tokio::spawn(async move { client.send_files(peer, &files, &flag, &tx).await });

        TransferHandle::new(cancel, rx, task)
    }

    /// Connect to `peer` and send `files` in order
    pub async fn send_files(
        &self,
        peer: SocketAddr,
        files: &[PathBuf],
        cancel: &CancelFlag,
        events: &Sender<TransferEvent>,
    ) -> TransferReport {
        tracing::info!("Connecting to {} to send {} file(s)", peer, files.len());

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(peer)).await;
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let detail = format!("connect to {} failed: {}", peer, e);
                return finish(TransferReport::failed(detail, files), events).await;
            }
            Err(_) => {
                let detail = format!("connect to {} timed out", peer);
                return finish(TransferReport::failed(detail, files), events).await;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle on {}: {}", peer, e);
        }

        self.send_over(stream, files, cancel, events).await
    }

    /// Send `files` over an already established stream
    ///
    /// The stream is closed when this returns, on every path.
    pub async fn send_over<S>(
        &self,
        mut stream: S,
        files: &[PathBuf],
        cancel: &CancelFlag,
        events: &Sender<TransferEvent>,
    ) -> TransferReport
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut sizes = Vec::with_capacity(files.len());
        for path in files {
            let len = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
            sizes.push(len);
        }
        let mut progress = ProgressTracker::new(sizes);

        let mut reports = Vec::with_capacity(files.len());
        let mut aborted: Option<String> = None;
        let mut cancelled = false;

        for (index, path) in files.iter().enumerate() {
            let mut report = FileReport {
                path: path.clone(),
                filename: display_name(path),
                plaintext_length: 0,
                payload_length: 0,
                digest: None,
                outcome: FileOutcome::Cancelled,
            };

            if !cancelled {
                if let Some(detail) = &aborted {
                    report.outcome = FileOutcome::Failed(format!("not sent: {}", detail));
                } else {
                    let mut session =
                        TransferSession::new(report.filename.clone(), cancel.clone());
                    let sent = self
                        .send_one(
                            &mut stream,
                            path,
                            &mut session,
                            &mut report,
                            &progress,
                            index,
                            events,
                        )
                        .await;
                    report.outcome = match sent {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            session.fail();
                            let kind = if e.is_network() { "network" } else { "protocol" };
                            tracing::error!(
                                "Transfer of {} failed ({} error): {}",
                                report.filename,
                                kind,
                                e
                            );
                            aborted = Some(e.to_string());
                            FileOutcome::Failed(e.to_string())
                        }
                    };
                    cancelled = report.outcome == FileOutcome::Cancelled;
                    progress.complete(index);

                    let _ = events
                        .send(TransferEvent::FileFinished {
                            filename: report.filename.clone(),
                            outcome: report.outcome.clone(),
                        })
                        .await;
                }
            }

            reports.push(report);
        }

        if !cancelled && aborted.is_none() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Shutdown after transfer failed: {}", e);
            }
        }
        drop(stream);

        finish(TransferReport::from_files(reports), events).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_one<S>(
        &self,
        stream: &mut S,
        path: &Path,
        session: &mut TransferSession,
        report: &mut FileReport,
        progress: &ProgressTracker,
        index: usize,
        events: &Sender<TransferEvent>,
    ) -> Result<FileOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let plaintext = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", path.display(), e);
                return Ok(FileOutcome::Failed(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        report.plaintext_length = plaintext.len() as u64;

        let codec = self.codec.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            let digest = digest::digest(&plaintext);
            codec.encode(&plaintext).map(|payload| (digest, payload))
        })
        .await;
        let (content_hash, payload) = match encoded {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(e)) => return Ok(FileOutcome::Failed(e.to_string())),
            Err(e) => return Ok(FileOutcome::Failed(format!("encoder task failed: {}", e))),
        };
        report.digest = Some(content_hash);
        report.payload_length = payload.len() as u64;

        tracing::info!(
            "Sending {} ({} bytes, {} encoded, digest {})",
            session.filename(),
            report.plaintext_length,
            report.payload_length,
            &minishare_core::hash_to_hex(&content_hash)[..16]
        );

        let header = FrameHeader::new(
            session.filename(),
            report.payload_length,
            report.plaintext_length,
            &content_hash,
        );
        session.advance(SessionState::SendingMetadata)?;
        session.declare(report.payload_length);
        frame::write_header(stream, &self.codec, &header).await?;

        session.advance(SessionState::AwaitAck)?;
        match frame::read_status(stream).await? {
            Status::Ready => session.advance(SessionState::StreamingPayload)?,
            Status::Rejected => {
                session.fail();
                tracing::warn!("Receiver rejected {}", session.filename());
                return Ok(FileOutcome::Failed("rejected by receiver".to_string()));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected ready or rejected, got {:?}",
                    other
                )))
            }
        }

        for chunk in payload.chunks(self.chunk_size) {
            if session.is_cancelled() {
                session.advance(SessionState::Cancelled)?;
                tracing::info!(
                    "Cancelled {} after {} of {} bytes",
                    session.filename(),
                    session.transferred(),
                    session.declared_length()
                );
                return Ok(FileOutcome::Cancelled);
            }

            stream.write_all(chunk).await?;
            session.record(chunk.len() as u64)?;
            tracing::debug!(
                "{}: {}/{} bytes",
                session.filename(),
                session.transferred(),
                session.declared_length()
            );

            let update = TransferEvent::Progress {
                fraction: progress.fraction(
                    index,
                    session.transferred(),
                    session.declared_length(),
                ),
                filename: session.filename().to_string(),
            };
            // Intermediate updates may be dropped; the one closing a file is not
            if session.transferred() == session.declared_length() {
                let _ = events.send(update).await;
            } else {
                let _ = events.try_send(update);
            }
        }
        stream.flush().await?;

        session.advance(SessionState::AwaitFinalAck)?;
        let outcome = match frame::read_status(stream).await? {
            Status::Ok => FileOutcome::Delivered,
            Status::Warn => {
                tracing::warn!(
                    "Receiver reported a digest mismatch for {}",
                    session.filename()
                );
                FileOutcome::DeliveredWithWarning("receiver digest mismatch".to_string())
            }
            Status::Failed => {
                FileOutcome::Failed("receiver could not decode or store the file".to_string())
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected final acknowledgment, got {:?}",
                    other
                )))
            }
        };
        session.advance(SessionState::Done)?;

        Ok(outcome)
    }
}

async fn finish(report: TransferReport, events: &Sender<TransferEvent>) -> TransferReport {
    tracing::info!("Transfer finished: {}", report.result);
    let _ = events
        .send(TransferEvent::Finished(report.result.clone()))
        .await;
    report
}

/// Cumulative progress across the whole file list, weighted by file size
#[derive(Debug)]
struct ProgressTracker {
    weights: Vec<u64>,
    total: u64,
    done: u64,
}

impl ProgressTracker {
    fn new(sizes: Vec<u64>) -> Self {
        let mut weights = sizes;
        if weights.iter().all(|&w| w == 0) {
            weights.iter_mut().for_each(|w| *w = 1);
        }
        let total = weights.iter().sum();
        Self {
            weights,
            total,
            done: 0,
        }
    }

    fn fraction(&self, index: usize, sent: u64, declared: u64) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        let part = if declared == 0 {
            1.0
        } else {
            sent as f64 / declared as f64
        };
        let weight = self.weights.get(index).copied().unwrap_or(0) as f64;
        ((self.done as f64 + weight * part) / self.total as f64).min(1.0)
    }

    fn complete(&mut self, index: usize) {
        self.done += self.weights.get(index).copied().unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minishare_core::{CipherKind, SessionResult, SharedKey};
    use tempfile::TempDir;

    fn codec() -> Codec {
        Codec::with_key(
            CipherKind::ChaCha20Poly1305,
            &SharedKey::from_passphrase("client-tests").unwrap(),
        )
    }

    #[test]
    fn test_progress_spans_file_list() {
        let mut tracker = ProgressTracker::new(vec![100, 300]);
        assert_eq!(tracker.fraction(0, 0, 50), 0.0);
        assert_eq!(tracker.fraction(0, 50, 50), 0.25);
        tracker.complete(0);
        assert_eq!(tracker.fraction(1, 10, 20), 0.625);
        assert_eq!(tracker.fraction(1, 20, 20), 1.0);
    }

    #[test]
    fn test_progress_with_empty_files() {
        let mut tracker = ProgressTracker::new(vec![0, 0]);
        assert_eq!(tracker.fraction(0, 28, 28), 0.5);
        tracker.complete(0);
        assert_eq!(tracker.fraction(1, 0, 0), 1.0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        // Grab a free port, then close it
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = TransferClient::new(codec(), 1024);
        let report = client
            .send_files(addr, &[PathBuf::from("whatever.txt")], &CancelFlag::new(), &tx)
            .await;

        assert!(matches!(report.result, SessionResult::Failed(_)));
        assert_eq!(report.files.len(), 1);
        assert!(matches!(
            rx.recv().await,
            Some(TransferEvent::Finished(SessionResult::Failed(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_streaming_sends_no_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![5u8; 10_000]).unwrap();

        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let codec = codec();
        let receiver_codec = codec.clone();

        let receiver = tokio::spawn(async move {
            let header = frame::read_header(&mut server_io, &receiver_codec)
                .await
                .unwrap()
                .unwrap();
            frame::write_status(&mut server_io, Status::Ready).await.unwrap();

            let mut rest = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut server_io, &mut rest)
                .await
                .unwrap();
            (header, rest.len())
        });

        let cancel = CancelFlag::new();
        cancel.cancel();
        let (tx, _) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let report = TransferClient::new(codec, 1024)
            .send_over(client_io, &[path.clone(), path], &cancel, &tx)
            .await;

        assert_eq!(report.result, SessionResult::Cancelled);
        assert_eq!(report.files[0].outcome, FileOutcome::Cancelled);
        assert_eq!(report.files[1].outcome, FileOutcome::Cancelled);

        let (header, payload_bytes) = receiver.await.unwrap();
        assert_eq!(header.filename, "data.bin");
        assert_eq!(payload_bytes, 0);
    }

    #[tokio::test]
    async fn test_rejected_file_moves_on() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&first, b"one").unwrap();
        std::fs::write(&second, b"two").unwrap();

        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let codec = codec();
        let receiver_codec = codec.clone();

        let receiver = tokio::spawn(async move {
            let _ = frame::read_header(&mut server_io, &receiver_codec).await.unwrap();
            frame::write_status(&mut server_io, Status::Rejected).await.unwrap();

            let header = frame::read_header(&mut server_io, &receiver_codec)
                .await
                .unwrap()
                .unwrap();
            frame::write_status(&mut server_io, Status::Ready).await.unwrap();
            let payload = frame::read_payload(&mut server_io, header.payload_length, 4096, |_| {})
                .await
                .unwrap();
            let plain = receiver_codec.decode(&payload).unwrap();
            frame::write_status(&mut server_io, Status::Ok).await.unwrap();
            plain
        });

        let (tx, _) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let report = TransferClient::new(codec, 2)
            .send_over(client_io, &[first, second], &CancelFlag::new(), &tx)
            .await;

        assert_eq!(receiver.await.unwrap(), b"two");
        assert!(matches!(report.files[0].outcome, FileOutcome::Failed(_)));
        assert_eq!(report.files[1].outcome, FileOutcome::Delivered);
        assert!(matches!(report.result, SessionResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_missing_source_fails_only_that_file() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real.txt");
        std::fs::write(&real, b"present").unwrap();

        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let codec = codec();
        let receiver_codec = codec.clone();

        let receiver = tokio::spawn(async move {
            let header = frame::read_header(&mut server_io, &receiver_codec)
                .await
                .unwrap()
                .unwrap();
            frame::write_status(&mut server_io, Status::Ready).await.unwrap();
            frame::read_payload(&mut server_io, header.payload_length, 4096, |_| {})
                .await
                .unwrap();
            frame::write_status(&mut server_io, Status::Ok).await.unwrap();
            header.filename
        });

        let (tx, _) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let report = TransferClient::new(codec, 4096)
            .send_over(
                client_io,
                &[dir.path().join("missing.txt"), real],
                &CancelFlag::new(),
                &tx,
            )
            .await;

        assert_eq!(receiver.await.unwrap(), "real.txt");
        assert!(matches!(report.files[0].outcome, FileOutcome::Failed(_)));
        assert_eq!(report.files[1].outcome, FileOutcome::Delivered);
    }
}
