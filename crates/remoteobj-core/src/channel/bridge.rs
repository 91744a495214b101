//! Loopback TCP bridge that lets other processes reach an owner.
//!
//! Listens on a loopback address, accepts connections from remote handles,
//! and forwards each framed request into the owner's in-process queue. Status
//! checks and requests arriving while the owner is not listening are answered
//! by the bridge itself.
//!
//! # Thread Safety
//!
//! The bridge runs on its own thread with a current-thread tokio runtime, so
//! it works the same whether or not the owner uses tokio. Each connection is
//! handled in its own spawned task.

use super::local::Link;
use super::protocol::{read_frame, write_frame, Reply, RequestBody, Response};
use super::Serializer;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, RemoteError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running bridge. Dropping shuts it down.
pub struct BridgeHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Address the bridge is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the bridge listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections and close the open ones.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("bridge thread for {} panicked", self.addr);
            }
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Forwarder {
    link: Arc<Link>,
    serializer: Arc<dyn Serializer>,
}

/// Loopback bridge in front of a [`Link`].
pub struct Bridge;

impl Bridge {
    /// Bind `addr` and start serving on a background thread.
    ///
    /// Port 0 asks the OS for a free port; the bound address is available
    /// from the returned handle.
    pub fn start(
        link: Arc<Link>,
        serializer: Arc<dyn Serializer>,
        addr: SocketAddr,
    ) -> Result<BridgeHandle> {
        if !addr.ip().is_loopback() {
            return Err(ProxyError::Config {
                message: format!("bridge must bind a loopback address, got {}", addr.ip()),
            });
        }

        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let forwarder = Arc::new(Forwarder { link, serializer });

        let thread = std::thread::Builder::new()
            .name(format!("remoteobj-bridge-{}", addr.port()))
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!("bridge could not register listener: {}", e);
                            return;
                        }
                    };
                    info!("bridge listening on {}", addr);
                    Self::accept_loop(listener, forwarder, shutdown_rx, conn_shutdown_rx).await;
                });
            })?;

        Ok(BridgeHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            thread: Some(thread),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        forwarder: Arc<Forwarder>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("bridge shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ProxyConfig::MAX_BRIDGE_CONNECTIONS {
                                warn!(
                                    "Rejecting bridge connection from {}: at max capacity ({})",
                                    peer_addr,
                                    ProxyConfig::MAX_BRIDGE_CONNECTIONS
                                );
                                forwarder.link.stats().record_rejected();
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let forwarder = Arc::clone(&forwarder);
                            let conns = Arc::clone(&active_connections);
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("bridge connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, &forwarder, &mut conn_shutdown).await {
                                    debug!("bridge connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("bridge accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        forwarder: &Forwarder,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.split();

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            let response = tokio::select! {
                response = forwarder.forward(frame) => response?,
                _ = shutdown_rx.changed() => return Ok(()),
            };
            write_frame(&mut writer, &response).await?;
        }
    }
}

impl Forwarder {
    fn encode(&self, response: &Response) -> Result<Vec<u8>> {
        self.serializer.try_serialize_response(response)
    }

    /// Produce the encoded response for one request frame.
    async fn forward(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        let request = match self.serializer.deserialize_request(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("malformed request frame on bridge: {}", e);
                self.link.stats().record_rejected();
                return self.encode(&Response::error(0, RemoteError::protocol(e.to_string())));
            }
        };

        match request.body {
            RequestBody::Status => {
                let reply = Reply::Status {
                    listening: self.link.is_listening()?,
                    pid: self.link.pid(),
                };
                self.encode(&Response::new(request.id, reply))
            }
            RequestBody::Resolve { .. } => match self.link.submit(frame)? {
                None => self.encode(&Response::new(request.id, Reply::NotListening)),
                Some(receiver) => match receiver.await {
                    Ok(bytes) => Ok(bytes),
                    Err(_) => self.encode(&Response::new(request.id, Reply::Cancelled)),
                },
            },
        }
    }
}
