//! Wire format shared by the in-process queue and the loopback bridge.
//!
//! Every message is a length-prefixed JSON document:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! The in-process queue carries the JSON bytes without the prefix.

use crate::config::ProxyConfig;
use crate::error::{ProxyError, RemoteError, Result};
use crate::value::Value;
use crate::view::Op;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide request id, unique per sender.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A request sent to the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestBody {
    /// Replay `ops` against the root object.
    Resolve { ops: Vec<Op> },
    /// Ask whether the owner is listening, and who it is.
    Status,
}

impl Request {
    /// Ask the owner to replay `ops`.
    pub fn resolve(ops: Vec<Op>) -> Self {
        Self {
            id: next_request_id(),
            body: RequestBody::Resolve { ops },
        }
    }

    /// Ask whether the owner is listening.
    pub fn status() -> Self {
        Self {
            id: next_request_id(),
            body: RequestBody::Status,
        }
    }
}

/// The owner's answer to a [`Request`], echoing its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub reply: Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Value { value: Value },
    /// The chain resolved to the root object itself.
    SelfRef,
    Error { error: RemoteError },
    /// The result could not be serialized; neither a value nor an error.
    Empty,
    /// The owner stopped listening before serving the request.
    Cancelled,
    NotListening,
    Status { listening: bool, pid: u32 },
}

impl Response {
    /// Reply to request `id`.
    pub fn new(id: u64, reply: Reply) -> Self {
        Self { id, reply }
    }

    /// Error reply to request `id`.
    pub fn error(id: u64, error: RemoteError) -> Self {
        Self::new(id, Reply::Error { error })
    }
}

fn oversized(len: usize) -> ProxyError {
    ProxyError::Validation {
        field: "frame".to_string(),
        message: format!(
            "message size {} exceeds maximum {}",
            len,
            ProxyConfig::MAX_FRAME_SIZE
        ),
    }
}

fn frame_len(payload: &[u8]) -> Result<u32> {
    if payload.len() > ProxyConfig::MAX_FRAME_SIZE {
        return Err(oversized(payload.len()));
    }
    u32::try_from(payload.len()).map_err(|_| oversized(payload.len()))
}

/// Payload length announced by a frame header, checked against the cap.
fn announced_len(header: [u8; 4]) -> Result<usize> {
    let len = u32::from_be_bytes(header) as usize;
    if len > ProxyConfig::MAX_FRAME_SIZE {
        return Err(oversized(len));
    }
    Ok(len)
}

/// `None` when the stream ended before a header started.
fn header_or_eof(read: std::io::Result<()>) -> Result<Option<()>> {
    match read {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read one frame from the bridge side of a connection.
///
/// `Ok(None)` means the remote handle hung up between requests.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    let read = reader.read_exact(&mut header).await.map(|_| ());
    if header_or_eof(read)?.is_none() {
        return Ok(None);
    }
    let mut payload = vec![0u8; announced_len(header)?];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let header = frame_len(payload)?.to_be_bytes();
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking counterpart of [`read_frame`], used by remote handles.
pub fn read_frame_blocking<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    if header_or_eof(reader.read_exact(&mut header))?.is_none() {
        return Ok(None);
    }
    let mut payload = vec![0u8; announced_len(header)?];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Blocking counterpart of [`write_frame`].
pub fn write_frame_blocking<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let header = frame_len(payload)?.to_be_bytes();
    writer.write_all(&header)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}
