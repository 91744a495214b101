//! Blocking TCP client used by handles in other processes.
//!
//! The stream sits behind a `Mutex` held for a whole send+receive cycle, so
//! concurrent callers on one handle are served one at a time and replies can
//! never interleave.

use super::protocol::{read_frame_blocking, write_frame_blocking, Reply, Request};
use super::{OwnerStatus, Serializer, Transport};
use crate::error::{ProxyError, RemoteError, Result};
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Connection to an owner's loopback bridge.
///
/// Connects lazily on first use. A refused connection reads as "not
/// listening".
///
/// A cached connection is replaced only when sending on it fails, since the
/// owner cannot have seen the request then. Once a request is sent, losing
/// the reply is an error for the caller and the request is never resent:
/// the owner may already have applied it. The next request reconnects.
#[derive(Debug)]
pub struct TcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    /// A transport for the bridge at `addr`. Nothing connects until first use.
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            stream: Mutex::new(None),
        }
    }

    /// Address of the owner's bridge.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn connect(&self) -> Option<TcpStream> {
        match TcpStream::connect_timeout(&self.addr, self.connect_timeout) {
            Ok(stream) => {
                // Small frames; don't wait to coalesce them.
                let _ = stream.set_nodelay(true);
                debug!("connected to owner bridge at {}", self.addr);
                Some(stream)
            }
            Err(e) => {
                debug!("owner bridge at {} unreachable: {}", self.addr, e);
                None
            }
        }
    }

    fn read_reply(stream: &mut TcpStream) -> Result<Vec<u8>> {
        read_frame_blocking(stream)?.ok_or_else(|| ProxyError::ChannelClosed {
            message: "owner closed the connection before replying".to_string(),
        })
    }
}

impl Transport for TcpTransport {
    fn round_trip(&self, frame: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let mut slot = self
            .stream
            .lock()
            .map_err(|_| ProxyError::LockPoisoned("tcp stream"))?;

        let sent = match slot.as_mut() {
            Some(stream) => match write_frame_blocking(stream, &frame) {
                Ok(()) => true,
                Err(e @ ProxyError::Validation { .. }) => return Err(e),
                Err(e) => {
                    debug!("stale connection to {}: {}; reconnecting", self.addr, e);
                    *slot = None;
                    false
                }
            },
            None => false,
        };

        if !sent {
            let Some(mut stream) = self.connect() else {
                return Ok(None);
            };
            write_frame_blocking(&mut stream, &frame)?;
            *slot = Some(stream);
        }

        let Some(stream) = slot.as_mut() else {
            return Err(ProxyError::ChannelClosed {
                message: "connection lost before reading the reply".to_string(),
            });
        };
        match Self::read_reply(stream) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }

    fn status(&self, serializer: &dyn Serializer) -> Result<OwnerStatus> {
        let request = Request::status();
        let frame = serializer.try_serialize_request(&request)?;
        let Some(bytes) = self.round_trip(frame)? else {
            return Ok(OwnerStatus::default());
        };
        match serializer.deserialize_response(&bytes)?.reply {
            Reply::Status { listening, pid } => Ok(OwnerStatus {
                listening,
                pid: Some(pid),
            }),
            Reply::NotListening => Ok(OwnerStatus::default()),
            other => Err(ProxyError::Remote(RemoteError::protocol(format!(
                "unexpected reply to a status request: {:?}",
                other
            )))),
        }
    }
}
