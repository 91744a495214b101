//! Centralized configuration for remoteobj.
//!
//! Constant holders for timing and framing limits, plus the per-proxy
//! [`ProxyOptions`] that callers tune at runtime.

use crate::channel::{JsonSerializer, Serializer};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Timing and framing limits shared by every proxy.
pub struct ProxyConfig;

impl ProxyConfig {
    // Listener loop
    pub const POLL_INTERVAL: Duration = Duration::from_millis(2);

    // wait_until_listening sleep between status checks
    pub const WAIT_INTERVAL: Duration = Duration::from_millis(10);

    // Cross-process bridge
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_BRIDGE_CONNECTIONS: usize = 64;
    pub const DEFAULT_BRIDGE_HOST: &'static str = "127.0.0.1";
}

/// What the listener does when a result cannot be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationPolicy {
    /// Log a warning and reply with an empty result.
    #[default]
    Lenient,
    /// Reply with a serialization error and fail the listener.
    Strict,
}

/// Runtime options carried by every handle of a proxy.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Returned by `get_` when nobody is listening and no per-call default
    /// was given. `None` means raise `NotListening` instead.
    #[serde(default)]
    pub default: Option<Value>,
    /// Resolve `call` and `passto` immediately instead of returning a
    /// deferred handle.
    #[serde(default = "default_true")]
    pub eager: bool,
    /// Answer requests still queued at shutdown instead of cancelling them.
    #[serde(default = "default_true")]
    pub fulfill_final: bool,
    #[serde(default)]
    pub serialization: SerializationPolicy,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Upper bound for `wait_until_listening`. `None` waits forever.
    #[serde(default)]
    pub wait_timeout: Option<Duration>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(skip, default = "default_serializer")]
    pub serializer: Arc<dyn Serializer>,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    ProxyConfig::POLL_INTERVAL
}

fn default_connect_timeout() -> Duration {
    ProxyConfig::CONNECT_TIMEOUT
}

fn default_serializer() -> Arc<dyn Serializer> {
    Arc::new(JsonSerializer)
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            default: None,
            eager: true,
            fulfill_final: true,
            serialization: SerializationPolicy::default(),
            poll_interval: default_poll_interval(),
            wait_timeout: None,
            connect_timeout: default_connect_timeout(),
            serializer: default_serializer(),
        }
    }
}

impl ProxyOptions {
    /// Whether serialization failures stop the listener.
    pub fn is_strict(&self) -> bool {
        self.serialization == SerializationPolicy::Strict
    }
}

impl fmt::Debug for ProxyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyOptions")
            .field("default", &self.default)
            .field("eager", &self.eager)
            .field("fulfill_final", &self.fulfill_final)
            .field("serialization", &self.serialization)
            .field("poll_interval", &self.poll_interval)
            .field("wait_timeout", &self.wait_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}
