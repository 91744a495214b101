//! Traffic counters for a channel.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every handle of one proxy.
#[derive(Debug, Default)]
pub struct ChannelStats {
    sent: AtomicU64,
    served: AtomicU64,
    local: AtomicU64,
    cancelled: AtomicU64,
    soft_failures: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChannelStatsSnapshot {
    /// Requests queued for the owner.
    pub sent: u64,
    /// Requests the owner answered with a result, error or empty reply.
    pub served: u64,
    /// Chains the owner resolved in place without using the channel.
    pub local: u64,
    /// Requests answered as cancelled at shutdown.
    pub cancelled: u64,
    /// Results that could not be serialized.
    pub soft_failures: u64,
    /// Malformed frames and refused bridge connections.
    pub rejected: u64,
}

impl ChannelStats {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_served(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_local(&self) {
        self.local.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_soft_failure(&self) {
        self.soft_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            local: self.local.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            soft_failures: self.soft_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
