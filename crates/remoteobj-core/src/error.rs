//! Error types for remoteobj.
//!
//! Two layers live here. [`RemoteError`] is the serializable record of a
//! failure raised while replaying an operation chain against the real object;
//! it crosses the channel inside a reply. [`ProxyError`] is what callers of
//! the library see, and wraps a `RemoteError` when the owner reported one.

use crate::value::Value;
use crate::view::Op;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Category of a failure raised by the owner while resolving a chain.
///
/// The names mirror the failure an equivalent direct access on the object
/// would produce, so a caller can match on "missing key" the same way whether
/// the object is local or remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AttributeError,
    KeyError,
    IndexError,
    TypeError,
    ValueError,
    NameError,
    SerializationError,
    ProtocolError,
    RuntimeError,
}

impl ErrorKind {
    /// Name of the kind as it appears in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::NameError => "NameError",
            ErrorKind::SerializationError => "SerializationError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::RuntimeError => "RuntimeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised on the owner side, wrapped for transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    /// Position of the failing operation in the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_index: Option<usize>,
    /// Rendering of the failing operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
}

impl RemoteError {
    /// An error of `kind` not yet tied to an operation.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            op_index: None,
            op: None,
        }
    }

    /// Missing attribute `name` on an object of type `type_name`.
    pub fn no_attribute(type_name: &str, name: &str) -> Self {
        Self::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, name),
        )
    }

    /// Missing map key.
    pub fn missing_key(key: &Value) -> Self {
        Self::new(ErrorKind::KeyError, key.repr())
    }

    /// Out-of-range index.
    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    /// Operation applied to the wrong type.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// Right type, unacceptable value.
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    /// Unknown function name.
    pub fn unknown_name(name: &str) -> Self {
        Self::new(ErrorKind::NameError, format!("name '{}' is not defined", name))
    }

    /// Malformed or unexpected message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    /// Result could not be serialized.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationError, message)
    }

    /// Annotate the error with the operation that raised it.
    ///
    /// The innermost annotation wins; an error that already names its
    /// operation is returned unchanged.
    pub fn at(mut self, index: usize, op: &Op) -> Self {
        if self.op_index.is_none() {
            self.op_index = Some(index);
            self.op = Some(op.to_string());
        }
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let (Some(index), Some(op)) = (self.op_index, &self.op) {
            write!(f, " (at op #{} `{}`)", index, op)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// Main error type for the remoteobj library.
#[derive(Debug, Error)]
pub enum ProxyError {
    // Owner-side failures, re-raised on the caller's stack
    #[error("Remote {0}")]
    Remote(RemoteError),

    // Liveness errors
    #[error("Remote instance is not running")]
    NotListening,

    #[error("Request cancelled: the owner stopped listening")]
    Cancelled,

    #[error("Timed out after {0:?} waiting for the owner to listen")]
    Timeout(Duration),

    #[error("Owner process {pid} exited (code {code:?})")]
    OwnerExited { pid: u32, code: Option<i32> },

    #[error("Channel closed: {message}")]
    ChannelClosed { message: String },

    // Local bookkeeping errors
    #[error("View is frozen and cannot be extended")]
    FrozenView,

    #[error("Chain resolved to the root object; use the root handle instead")]
    ResolvedToRoot,

    #[error("Proxy is already listening")]
    AlreadyListening,

    #[error("Background listener panicked")]
    WorkerPanicked,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    // Serialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // System errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for remoteobj operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<RemoteError> for ProxyError {
    fn from(err: RemoteError) -> Self {
        ProxyError::Remote(err)
    }
}

impl ProxyError {
    /// Kind of the owner-side failure, if this error came from the owner.
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            ProxyError::Remote(err) => Some(err.kind),
            _ => None,
        }
    }

    /// Check if this error means nobody is (or will be) answering.
    ///
    /// Callers that poll an owner which may still be starting up can treat
    /// these as "try again later".
    pub fn is_liveness(&self) -> bool {
        matches!(
            self,
            ProxyError::NotListening
                | ProxyError::Cancelled
                | ProxyError::ChannelClosed { .. }
                | ProxyError::OwnerExited { .. }
        )
    }
}
