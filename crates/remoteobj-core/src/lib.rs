//! remoteobj - operate on an object owned by another thread or process.
//!
//! A [`Proxy`] wraps the real object. Handles record attribute access, item
//! access, calls and mutations as a chain of operations ([`View`]); resolving
//! a handle ships the chain to the owner, which replays it against the object
//! and sends back the result. The owner answers only while it listens, either
//! from a background worker or by polling between its own work.
//!
//! Handles in other processes reach the owner through a loopback TCP bridge
//! ([`Proxy::serve`] / [`RemoteProxy::connect`]).
//!
//! # Example
//!
//! ```rust
//! use remoteobj::{Handle, Kwargs, Proxy, Value};
//!
//! let proxy = Proxy::new(Value::List(vec![]));
//! let remote = proxy.handle();
//!
//! let worker = std::thread::spawn(move || -> remoteobj::Result<usize> {
//!     remote.wait_until_listening(None, true)?;
//!     remote.call_method("append", vec![Value::Int(5)], Kwargs::new())?;
//!     remote.len()
//! });
//!
//! proxy.listen_(true)?;
//! let len = worker.join().expect("worker panicked")?;
//! proxy.stop_listen_()?;
//! assert_eq!(len, 1);
//! # Ok::<(), remoteobj::ProxyError>(())
//! ```

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod functions;
pub mod platform;
pub mod proxy;
pub mod resolvable;
pub mod value;
pub mod view;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use channel::{ChannelStatsSnapshot, JsonSerializer, OwnerStatus, Serializer, Transport};
pub use config::{ProxyConfig, ProxyOptions, SerializationPolicy};
pub use error::{ErrorKind, ProxyError, RemoteError, Result};
pub use functions::{FunctionTable, PassFn};
pub use platform::is_process_alive;
pub use proxy::{Answer, Handle, ListenGuard, Outcome, Proxy, ProxyBuilder, RemoteProxy};
pub use resolvable::{Resolvable, Slot};
pub use value::{Kwargs, Opaque, Value};
pub use view::{resolve_view, Op, Resolved, View};
