//! Handles that reach the owner only through the channel.

use super::{unexpected_status, Answer, Handle};
use crate::channel::local::Link;
use crate::channel::{self, LocalTransport, OwnerStatus, Reply, Request, TcpTransport, Transport};
use crate::config::ProxyOptions;
use crate::error::{ProxyError, Result};
use crate::view::View;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A proxy handle without the object.
///
/// Built either by [`Proxy::handle`](super::Proxy::handle) for other threads
/// of the owner's process, or by [`RemoteProxy::connect`] for another
/// process. Resolution always goes through the owner's listener, so calling
/// [`get_`](Handle::get_) blocks until the owner answers.
///
/// Do not resolve from inside an async runtime; the call blocks the thread.
#[derive(Clone)]
pub struct RemoteProxy {
    transport: Arc<dyn Transport>,
    options: Arc<ProxyOptions>,
    view: View,
    /// Owner pid learned from the last status request; 0 while unknown.
    owner_pid: Arc<AtomicU32>,
}

impl RemoteProxy {
    /// Handle on the object served by the bridge at `addr`.
    ///
    /// Nothing is sent until the first request.
    pub fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(addr, ProxyOptions::default())
    }

    /// Like [`connect`](RemoteProxy::connect), with explicit options.
    pub fn connect_with(addr: SocketAddr, options: ProxyOptions) -> Self {
        let transport = TcpTransport::new(addr, options.connect_timeout);
        Self::from_transport(Arc::new(transport), options)
    }

    /// A handle over a custom transport.
    pub fn from_transport(transport: Arc<dyn Transport>, options: ProxyOptions) -> Self {
        Self {
            transport,
            options: Arc::new(options),
            view: View::new(),
            owner_pid: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn local(link: Arc<Link>, options: ProxyOptions) -> Self {
        let pid = link.pid();
        let handle = Self::from_transport(Arc::new(LocalTransport::new(link)), options);
        handle.owner_pid.store(pid, Ordering::Relaxed);
        handle
    }

    /// Ask the owner for its status.
    pub fn status(&self) -> Result<OwnerStatus> {
        let status = self.transport.status(&*self.options.serializer)?;
        if let Some(pid) = status.pid {
            self.owner_pid.store(pid, Ordering::Relaxed);
        }
        Ok(status)
    }
}

impl fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("transport", &self.transport)
            .field("view", &self.view.to_string())
            .field("owner_pid", &self.owner_pid())
            .finish()
    }
}

impl Handle for RemoteProxy {
    fn view(&self) -> &View {
        &self.view
    }

    fn with_view(&self, view: View) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            options: Arc::clone(&self.options),
            view,
            owner_pid: Arc::clone(&self.owner_pid),
        }
    }

    fn options(&self) -> &ProxyOptions {
        &self.options
    }

    fn fetch(&self, view: &View) -> Result<Answer> {
        let request = Request::resolve(view.ops().to_vec());
        debug!("sending request {} for {}", request.id, view);
        let response =
            channel::round_trip(&*self.transport, &*self.options.serializer, &request)?;
        let Some(response) = response else {
            return Ok(Answer::NotListening);
        };
        match response.reply {
            Reply::Value { value } => Ok(Answer::Value(value)),
            Reply::SelfRef => Ok(Answer::Root),
            Reply::Error { error } => Err(ProxyError::Remote(error)),
            Reply::Empty => Ok(Answer::Empty),
            Reply::Cancelled => Ok(Answer::Cancelled),
            Reply::NotListening => Ok(Answer::NotListening),
            Reply::Status { .. } => Err(unexpected_status()),
        }
    }

    fn is_listening(&self) -> Result<bool> {
        Ok(self.status()?.listening)
    }

    fn owner_pid(&self) -> Option<u32> {
        match self.owner_pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }
}
