//! Handles that record chains and ship them to the owner.
//!
//! Two handle types share one contract, [`Handle`]:
//!
//! - [`Proxy<T>`] owns the real object. While it listens, its own chains are
//!   resolved in place without touching the channel.
//! - [`RemoteProxy`] holds only a channel to an owner, in this process or
//!   another one.
//!
//! Every builder method returns a new handle with a longer chain; the
//! original handle is never changed.

mod guard;
mod owner;
mod remote;
mod worker;

pub use guard::ListenGuard;
pub use owner::{Proxy, ProxyBuilder};
pub use remote::RemoteProxy;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, RemoteError, Result};
use crate::platform;
use crate::value::{Kwargs, Value};
use crate::view::{Op, View};
use std::process::Child;
use std::time::Instant;
use tracing::debug;

/// What came back for a chain, before default handling.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Value(Value),
    /// The chain resolved to the root object.
    Root,
    /// The owner could not serialize the result.
    Empty,
    /// The owner stopped without serving the request.
    Cancelled,
    NotListening,
}

/// Result of resolving (or deferring) a chain.
#[derive(Debug)]
pub enum Outcome<P> {
    Value(Value),
    /// The chain resolved to the root; this is a handle on it.
    Root(P),
    /// Not resolved yet; call [`Handle::get_`] on the handle to resolve it.
    Deferred(P),
}

impl<P: Handle> Outcome<P> {
    /// The plain value, resolving a deferred handle first.
    pub fn value(self) -> Result<Value> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Root(_) => Err(ProxyError::ResolvedToRoot),
            Outcome::Deferred(handle) => handle.get_()?.value(),
        }
    }

    /// Whether the chain resolved to the root.
    pub fn is_root(&self) -> bool {
        matches!(self, Outcome::Root(_))
    }

    /// Whether resolution was deferred.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }

    /// The handle carried by a root or deferred outcome.
    pub fn into_handle(self) -> Option<P> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Root(handle) | Outcome::Deferred(handle) => Some(handle),
        }
    }
}

fn expect_int(value: Value) -> Result<usize> {
    value
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ProxyError::Validation {
            field: "len".to_string(),
            message: format!("expected a non-negative integer, got {}", value.repr()),
        })
}

fn expect_bool(value: Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| ProxyError::Validation {
        field: "contains".to_string(),
        message: format!("expected a bool, got {}", value.repr()),
    })
}

/// The operations every proxy handle supports.
///
/// Implementors supply the chain storage and [`fetch`](Handle::fetch); the
/// builder, resolution and waiting methods are provided on top.
pub trait Handle: Clone + Sized {
    fn view(&self) -> &View;

    /// A handle on the same object with a different chain.
    fn with_view(&self, view: View) -> Self;

    fn options(&self) -> &crate::config::ProxyOptions;

    /// Resolve `view` against the real object.
    ///
    /// Owner-side failures come back as [`ProxyError::Remote`].
    fn fetch(&self, view: &View) -> Result<Answer>;

    fn is_listening(&self) -> Result<bool>;

    /// Pid of the owner process, when known.
    fn owner_pid(&self) -> Option<u32>;

    /// Resolve this handle's chain.
    ///
    /// When nobody is listening (or the owner cancelled the request) this
    /// falls back to the configured default, and fails with
    /// [`ProxyError::NotListening`] or [`ProxyError::Cancelled`] without one.
    fn get_(&self) -> Result<Outcome<Self>> {
        self.get_or(None)
    }

    /// Like [`get_`](Handle::get_), with a per-call default that takes
    /// precedence over the configured one.
    fn get_or(&self, default: Option<Value>) -> Result<Outcome<Self>> {
        let fallback = |err: ProxyError| {
            default
                .or_else(|| self.options().default.clone())
                .map(Outcome::Value)
                .ok_or(err)
        };
        match self.fetch(self.view())? {
            Answer::Value(value) => Ok(Outcome::Value(value)),
            Answer::Root => Ok(Outcome::Root(self.root())),
            Answer::Empty => Ok(Outcome::Value(Value::Null)),
            Answer::Cancelled => {
                debug!("request for {} was cancelled", self.view());
                fallback(ProxyError::Cancelled)
            }
            Answer::NotListening => fallback(ProxyError::NotListening),
        }
    }

    /// Handle on the root object (empty chain).
    fn root(&self) -> Self {
        self.with_view(View::new())
    }

    fn extend(&self, ops: impl IntoIterator<Item = Op>) -> Result<Self> {
        Ok(self.with_view(self.view().extend(ops)?))
    }

    fn attr(&self, name: &str) -> Result<Self> {
        Ok(self.with_view(self.view().attr(name)?))
    }

    fn item(&self, key: impl Into<Value>) -> Result<Self> {
        Ok(self.with_view(self.view().item(key)?))
    }

    /// Call the current value; resolved now unless the handle is lazy.
    fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Outcome<Self>> {
        let handle = self.call_lazy(args, kwargs)?;
        if self.options().eager {
            handle.get_()
        } else {
            Ok(Outcome::Deferred(handle))
        }
    }

    /// Record a call without resolving it.
    fn call_lazy(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Self> {
        Ok(self.with_view(self.view().call(args, kwargs)?))
    }

    /// `self.name(*args, **kwargs)`.
    fn call_method(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Outcome<Self>> {
        self.attr(name)?.call(args, kwargs)
    }

    /// Pass the current value to the owner's function `func`.
    fn passto(&self, func: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Outcome<Self>> {
        let handle = self.passto_lazy(func, args, kwargs)?;
        if self.options().eager {
            handle.get_()
        } else {
            Ok(Outcome::Deferred(handle))
        }
    }

    fn passto_lazy(&self, func: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Self> {
        Ok(self.with_view(self.view().passto(func, args, kwargs)?))
    }

    fn set_attr(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.with_view(self.view().set_attr(name, value)?).get_()?;
        Ok(())
    }

    fn del_attr(&self, name: &str) -> Result<()> {
        self.with_view(self.view().del_attr(name)?).get_()?;
        Ok(())
    }

    fn set_item(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.with_view(self.view().set_item(key, value)?).get_()?;
        Ok(())
    }

    fn del_item(&self, key: impl Into<Value>) -> Result<()> {
        self.with_view(self.view().del_item(key)?).get_()?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        expect_int(self.with_view(self.view().len()?).get_()?.value()?)
    }

    fn contains(&self, item: impl Into<Value>) -> Result<bool> {
        expect_bool(self.with_view(self.view().contains(item)?).get_()?.value()?)
    }

    /// A handle whose chain can no longer be extended.
    fn freeze(&self) -> Self {
        self.with_view(self.view().freeze())
    }

    /// Block until the owner listens.
    ///
    /// Gives up when `child` (the owner process, if this caller spawned it)
    /// exits, when an owner pid learned earlier is no longer alive, or when
    /// the configured `wait_timeout` runs out. Giving up is an error when
    /// `fail` is set and `Ok(false)` otherwise.
    fn wait_until_listening(&self, mut child: Option<&mut Child>, fail: bool) -> Result<bool> {
        let started = Instant::now();
        loop {
            if self.is_listening()? {
                return Ok(true);
            }

            let exited = match child.as_mut() {
                Some(child) => child
                    .try_wait()?
                    .map(|status| (child.id(), status.code())),
                None => self
                    .owner_pid()
                    .filter(|pid| !platform::is_process_alive(*pid))
                    .map(|pid| (pid, None)),
            };
            if let Some((pid, code)) = exited {
                return if fail {
                    Err(ProxyError::OwnerExited { pid, code })
                } else {
                    Ok(false)
                };
            }

            if let Some(limit) = self.options().wait_timeout {
                if started.elapsed() >= limit {
                    return if fail {
                        Err(ProxyError::Timeout(limit))
                    } else {
                        Ok(false)
                    };
                }
            }

            std::thread::sleep(ProxyConfig::WAIT_INTERVAL);
        }
    }
}

pub(crate) fn unexpected_status() -> ProxyError {
    ProxyError::Remote(RemoteError::protocol("unexpected status reply to a resolve request"))
}
