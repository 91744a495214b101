//! Cooperative stop signal shared by the background listener and the bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token for cooperative shutdown.
///
/// Clones share state: cancelling any clone is observed by all of them.
///
/// # Example
///
/// ```
/// use remoteobj::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_side = token.clone();
///
/// token.cancel();
/// assert!(worker_side.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled yet.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `period` in small slices, returning early (with `true`) once
    /// cancelled.
    pub fn sleep(&self, period: std::time::Duration) -> bool {
        let slice = std::time::Duration::from_millis(1).min(period);
        let deadline = std::time::Instant::now() + period;
        while !self.is_cancelled() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
        true
    }
}
