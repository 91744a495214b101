//! The channel between handles and the owner.
//!
//! # Architecture
//!
//! - **Protocol**: request/response types and length-prefixed framing
//! - **Serializer**: encodes messages; decides what can cross a process boundary
//! - **Local**: the in-process queue every handle shares with the owner
//! - **Bridge**: loopback TCP server forwarding other processes into the queue
//! - **Tcp**: the client side of the bridge

pub mod bridge;
pub mod local;
pub mod protocol;
pub mod serializer;
pub mod stats;
pub mod tcp;

pub use bridge::{Bridge, BridgeHandle};
pub use local::{Link, LocalTransport};
pub use protocol::{Reply, Request, RequestBody, Response};
pub use serializer::{JsonSerializer, Serializer};
pub use stats::{ChannelStats, ChannelStatsSnapshot};
pub use tcp::TcpTransport;

use crate::error::{ProxyError, RemoteError, Result};
use tracing::warn;

/// What a status request learned about the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnerStatus {
    pub listening: bool,
    /// Unknown when the owner could not be reached.
    pub pid: Option<u32>,
}

/// Moves encoded requests to an owner and brings back encoded responses.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Deliver one request and block for its response.
    ///
    /// `Ok(None)` means nobody is listening and the request was not queued.
    fn round_trip(&self, frame: Vec<u8>) -> Result<Option<Vec<u8>>>;

    /// Ask whether the owner is listening.
    fn status(&self, serializer: &dyn Serializer) -> Result<OwnerStatus>;
}

/// Encode `request`, deliver it and decode the matching response.
pub fn round_trip(
    transport: &dyn Transport,
    serializer: &dyn Serializer,
    request: &Request,
) -> Result<Option<Response>> {
    let frame = serializer.try_serialize_request(request)?;
    let Some(bytes) = transport.round_trip(frame)? else {
        return Ok(None);
    };
    let response = serializer.deserialize_response(&bytes)?;
    if response.id != request.id {
        warn!(
            "response id {} does not match request id {}",
            response.id, request.id
        );
        if let Reply::Error { error } = response.reply {
            return Err(ProxyError::Remote(error));
        }
        return Err(ProxyError::Remote(RemoteError::protocol(format!(
            "response id {} does not match request id {}",
            response.id, request.id
        ))));
    }
    Ok(Some(response))
}
