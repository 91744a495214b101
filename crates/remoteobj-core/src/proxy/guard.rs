//! Scoped listening.

use super::owner::Proxy;
use crate::error::Result;
use crate::resolvable::Resolvable;
use std::ops::Deref;
use tracing::error;

/// Keeps a [`Proxy`] listening until dropped.
///
/// Dropping the guard stops listening and logs a listener failure; call
/// [`finish`](ListenGuard::finish) to receive that failure instead.
#[must_use = "the proxy stops listening as soon as the guard is dropped"]
pub struct ListenGuard<'a, T: Resolvable + Send + 'static> {
    proxy: &'a Proxy<T>,
    armed: bool,
}

impl<'a, T: Resolvable + Send + 'static> ListenGuard<'a, T> {
    pub(crate) fn new(proxy: &'a Proxy<T>) -> Self {
        Self { proxy, armed: true }
    }

    /// Stop listening and return the listener's error, if any.
    pub fn finish(mut self) -> Result<()> {
        self.armed = false;
        self.proxy.stop_listen_()
    }
}

impl<T: Resolvable + Send + 'static> Deref for ListenGuard<'_, T> {
    type Target = Proxy<T>;

    fn deref(&self) -> &Proxy<T> {
        self.proxy
    }
}

impl<T: Resolvable + Send + 'static> Drop for ListenGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.proxy.stop_listen_() {
                error!("listener failed: {}", e);
            }
        }
    }
}
