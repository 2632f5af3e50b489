//! Byte-level framing over a stream connection
//!
//! Per file the sender writes:
//!
//! ```text
//! [u32 BE length][codec-encoded FrameHeader]   -> receiver answers RD or NO
//! [payload_length bytes of encoded payload]    -> receiver answers OK, WN or ER
//! ```
//!
//! The payload is written and read in chunks; chunk boundaries mean nothing on the wire.

use crate::proto::FrameHeader;
use crate::{Codec, Error, Result, MAX_HEADER_LEN};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Two-byte status literals sent by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Header accepted, send the payload
    Ready,
    /// Header refused, no payload follows
    Rejected,
    /// File written, digest matched
    Ok,
    /// File written, digest mismatch
    Warn,
    /// Payload could not be decoded, nothing written
    Failed,
}

impl Status {
    pub const LEN: usize = 2;

    pub fn as_bytes(&self) -> &'static [u8; Self::LEN] {
        match self {
            Status::Ready => b"RD",
            Status::Rejected => b"NO",
            Status::Ok => b"OK",
            Status::Warn => b"WN",
            Status::Failed => b"ER",
        }
    }

    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Result<Self> {
        match bytes {
            b"RD" => Ok(Status::Ready),
            b"NO" => Ok(Status::Rejected),
            b"OK" => Ok(Status::Ok),
            b"WN" => Ok(Status::Warn),
            b"ER" => Ok(Status::Failed),
            other => Err(Error::Protocol(format!(
                "unknown status literal {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// Treat a peer hanging up mid-frame as a framing problem rather than a socket failure
fn short_read(e: std::io::Error, what: &str) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::Protocol(format!("connection closed while reading {}", what))
    } else {
        Error::Io(e)
    }
}

/// Write a length-prefixed, codec-encoded header
pub async fn write_header<W>(writer: &mut W, codec: &Codec, header: &FrameHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = codec.encode(&header.to_bytes())?;
    if encoded.len() > MAX_HEADER_LEN as usize {
        return Err(Error::Protocol(format!(
            "header of {} bytes exceeds {} byte limit",
            encoded.len(),
            MAX_HEADER_LEN
        )));
    }

    writer.write_u32(encoded.len() as u32).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next header
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between files.
pub async fn read_header<R>(reader: &mut R, codec: &Codec) -> Result<Option<FrameHeader>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Protocol(format!(
                "connection closed after {} of 4 length bytes",
                filled
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix);
    if len == 0 || len > MAX_HEADER_LEN {
        return Err(Error::Protocol(format!("invalid header length {}", len)));
    }

    let mut encoded = vec![0u8; len as usize];
    reader
        .read_exact(&mut encoded)
        .await
        .map_err(|e| short_read(e, "header"))?;

    let raw = codec
        .decode(&encoded)
        .map_err(|e| Error::Protocol(format!("undecodable header: {}", e)))?;
    FrameHeader::from_bytes(&raw).map(Some)
}

pub async fn write_status<W>(writer: &mut W, status: Status) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(status.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_status<R>(reader: &mut R) -> Result<Status>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; Status::LEN];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| short_read(e, "status"))?;
    Status::from_bytes(&buf)
}

/// Read exactly `len` payload bytes in `chunk_size` pieces
///
/// `on_chunk` is called with the running total after every chunk.
pub async fn read_payload<R, F>(
    reader: &mut R,
    len: u64,
    chunk_size: usize,
    mut on_chunk: F,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64),
{
    let len = usize::try_from(len)
        .map_err(|_| Error::Protocol(format!("payload length {} too large", len)))?;
    let chunk_size = chunk_size.max(1);

    let mut payload = Vec::with_capacity(len.min(64 * 1024 * 1024));
    let mut chunk = vec![0u8; chunk_size.min(len.max(1))];

    while payload.len() < len {
        let want = chunk.len().min(len - payload.len());
        reader
            .read_exact(&mut chunk[..want])
            .await
            .map_err(|e| short_read(e, "payload"))?;
        payload.extend_from_slice(&chunk[..want]);
        on_chunk(payload.len() as u64);
    }

    Ok(payload)
}

/// Reduce a peer-supplied name to a single safe path component
pub fn sanitize_filename(name: &str) -> Result<String> {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return Err(Error::InvalidFilename(name.to_string()));
    }

    Ok(last.to_string())
}
