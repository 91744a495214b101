//! Background listener thread.

use super::owner::Shared;
use crate::cancel::CancellationToken;
use crate::error::{ProxyError, Result};
use crate::resolvable::Resolvable;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

/// A thread answering requests every poll interval until stopped.
///
/// The thread holds only a weak reference to the owner state, so dropping
/// the last [`Proxy`](super::Proxy) ends it.
pub(crate) struct Worker {
    token: CancellationToken,
    thread: JoinHandle<Result<()>>,
}

impl Worker {
    pub(crate) fn spawn<T>(shared: Weak<Shared<T>>, poll_interval: Duration) -> Result<Self>
    where
        T: Resolvable + Send + 'static,
    {
        let token = CancellationToken::new();
        let stop = token.clone();
        let thread = std::thread::Builder::new()
            .name("remoteobj-listener".to_string())
            .spawn(move || {
                debug!("listener thread started");
                while !stop.is_cancelled() {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    if let Err(e) = shared.process_requests() {
                        error!("background listener failed: {}", e);
                        shared.abandon();
                        return Err(e);
                    }
                    drop(shared);
                    stop.sleep(poll_interval);
                }
                debug!("listener thread exiting");
                Ok(())
            })?;
        Ok(Self { token, thread })
    }

    /// Signal the thread without waiting for it.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Signal the thread, wait for it, and return what it returned.
    pub(crate) fn stop(self) -> Result<()> {
        self.token.cancel();
        self.thread.join().map_err(|_| ProxyError::WorkerPanicked)?
    }
}
