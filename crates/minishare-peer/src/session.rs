//! Per-file session state and the handle a caller holds on a running transfer

use minishare_core::{hash_to_hex, ContentHash, Error, FileOutcome, Result, SessionResult};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queue depth of event channels
///
/// Progress updates are dropped while the queue is full; lifecycle events wait
/// for room, so a receiver must be drained or dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Where one file's session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    SendingMetadata,
    AwaitAck,
    StreamingPayload,
    AwaitFinalAck,
    Done,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Cancelled | SessionState::Failed
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        match (*self, next) {
            (_, Failed) => true,
            (Init, SendingMetadata)
            | (SendingMetadata, AwaitAck)
            | (AwaitAck, StreamingPayload)
            | (StreamingPayload, AwaitFinalAck)
            | (StreamingPayload, Cancelled)
            | (AwaitFinalAck, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::SendingMetadata => "SENDING_METADATA",
            SessionState::AwaitAck => "AWAIT_ACK",
            SessionState::StreamingPayload => "STREAMING_PAYLOAD",
            SessionState::AwaitFinalAck => "AWAIT_FINAL_ACK",
            SessionState::Done => "DONE",
            SessionState::Cancelled => "CANCELLED",
            SessionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation shared between a caller and a transfer worker
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bookkeeping for one file in flight over one connection
#[derive(Debug)]
pub struct TransferSession {
    filename: String,
    declared_length: u64,
    transferred: u64,
    state: SessionState,
    cancel: CancelFlag,
}

impl TransferSession {
    pub fn new(filename: impl Into<String>, cancel: CancelFlag) -> Self {
        Self {
            filename: filename.into(),
            declared_length: 0,
            transferred: 0,
            state: SessionState::Init,
            cancel,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn declared_length(&self) -> u64 {
        self.declared_length
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fix the payload length announced in the header
    pub fn declare(&mut self, length: u64) {
        self.declared_length = length;
        self.transferred = 0;
    }

    /// Move to `next`, rejecting transitions the protocol does not allow
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::Protocol(format!(
                "{}: illegal transition {} -> {}",
                self.filename, self.state, next
            )));
        }
        tracing::trace!("{}: {} -> {}", self.filename, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Mark the session failed unless it already ended
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    /// Account for `n` payload bytes written to the peer
    pub fn record(&mut self, n: u64) -> Result<()> {
        if self.state != SessionState::StreamingPayload {
            return Err(Error::Protocol(format!(
                "{}: payload bytes recorded in state {}",
                self.filename, self.state
            )));
        }
        let total = self.transferred + n;
        if total > self.declared_length {
            return Err(Error::Protocol(format!(
                "{}: {} bytes exceeds declared length {}",
                self.filename, total, self.declared_length
            )));
        }
        self.transferred = total;
        Ok(())
    }
}

/// Per-file entry of a finished transfer
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub filename: String,
    /// Size before encoding
    pub plaintext_length: u64,
    /// Encoded bytes declared on the wire
    pub payload_length: u64,
    /// Plaintext digest, if the file was read
    pub digest: Option<ContentHash>,
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn digest_hex(&self) -> Option<String> {
        self.digest.as_ref().map(hash_to_hex)
    }
}

/// What a transfer ended with
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub result: SessionResult,
    pub files: Vec<FileReport>,
}

impl TransferReport {
    pub fn from_files(files: Vec<FileReport>) -> Self {
        let result = SessionResult::aggregate(files.iter().map(|f| &f.outcome));
        Self { result, files }
    }

    /// A report for a session that never got to send anything
    pub fn failed(detail: String, paths: &[PathBuf]) -> Self {
        let files = paths
            .iter()
            .map(|path| FileReport {
                path: path.clone(),
                filename: display_name(path),
                plaintext_length: 0,
                payload_length: 0,
                digest: None,
                outcome: FileOutcome::Failed(detail.clone()),
            })
            .collect();
        Self {
            result: SessionResult::Failed(detail),
            files,
        }
    }
}

/// Updates published by a transfer worker
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Fraction of the whole file list sent so far
    Progress { fraction: f64, filename: String },
    /// One file reached its outcome
    FileFinished { filename: String, outcome: FileOutcome },
    /// The session is over; always the last event
    Finished(SessionResult),
}

/// A transfer running on its own task
pub struct TransferHandle {
    cancel: CancelFlag,
    events: mpsc::Receiver<TransferEvent>,
    task: JoinHandle<TransferReport>,
}

impl TransferHandle {
    pub(crate) fn new(
        cancel: CancelFlag,
        events: mpsc::Receiver<TransferEvent>,
        task: JoinHandle<TransferReport>,
    ) -> Self {
        Self {
            cancel,
            events,
            task,
        }
    }

    /// Ask the worker to stop at the next chunk boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Next queued update; `None` once the worker has finished
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// Wait for the worker and return its report
    ///
    /// Events not yet read are discarded.
    pub async fn join(self) -> TransferReport {
        let TransferHandle { events, task, .. } = self;
        drop(events);

        match task.await {
            Ok(report) => report,
            Err(e) => TransferReport {
                result: SessionResult::Failed(format!("transfer task ended abnormally: {}", e)),
                files: Vec::new(),
            },
        }
    }
}

pub(crate) fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}
