//! The capability an owner object exposes to recorded operation chains.
//!
//! Every method has a default that fails the way an object lacking that
//! capability would, so an implementor only writes the parts it supports.
//!
//! # Example
//!
//! ```rust
//! use remoteobj::{Kwargs, RemoteError, Resolvable, Slot, Value};
//!
//! struct Counter {
//!     count: i64,
//!     history: Value,
//! }
//!
//! impl Resolvable for Counter {
//!     fn type_name(&self) -> &str {
//!         "Counter"
//!     }
//!
//!     fn has_method(&self, name: &str) -> bool {
//!         name == "incr"
//!     }
//!
//!     fn attr(&mut self, name: &str) -> Result<Slot<'_>, RemoteError> {
//!         match name {
//!             "count" => Ok(Slot::Value(Value::Int(self.count))),
//!             "history" => Ok(Slot::Place(&mut self.history)),
//!             _ => Err(RemoteError::no_attribute(self.type_name(), name)),
//!         }
//!     }
//!
//!     fn call_method(
//!         &mut self,
//!         name: &str,
//!         args: &[Value],
//!         _kwargs: &Kwargs,
//!     ) -> Result<Value, RemoteError> {
//!         match name {
//!             "incr" => {
//!                 self.count += args.first().and_then(Value::as_i64).unwrap_or(1);
//!                 Ok(Value::Int(self.count))
//!             }
//!             _ => Err(RemoteError::no_attribute(self.type_name(), name)),
//!         }
//!     }
//! }
//! ```

use crate::error::RemoteError;
use crate::value::{Kwargs, Opaque, Value};

/// Result of looking up a member.
pub enum Slot<'a> {
    /// An addressable member of the object: later operations act on it in
    /// place, so mutations land on the real object.
    Place(&'a mut dyn Resolvable),
    /// A computed value: later operations act on a temporary.
    Value(Value),
}

/// An object that operation chains can be replayed against.
pub trait Resolvable {
    /// Name used in error messages and by the `type` function.
    fn type_name(&self) -> &str;

    /// Whether `name` is a method, so that `.name(...)` becomes a method call
    /// rather than an attribute read followed by a call.
    fn has_method(&self, _name: &str) -> bool {
        false
    }

    /// Whether attribute or method `name` returns the object itself.
    ///
    /// A chain that passes through such a member stays on the object, so a
    /// chain ending there resolves to the root when the object is the root.
    /// Methods are still called for their side effects; their return value
    /// is discarded.
    fn returns_self(&self, _name: &str) -> bool {
        false
    }

    fn attr(&mut self, name: &str) -> Result<Slot<'_>, RemoteError> {
        Err(RemoteError::no_attribute(self.type_name(), name))
    }

    fn set_attr(&mut self, name: &str, _value: Value) -> Result<(), RemoteError> {
        Err(RemoteError::no_attribute(self.type_name(), name))
    }

    fn del_attr(&mut self, name: &str) -> Result<(), RemoteError> {
        Err(RemoteError::no_attribute(self.type_name(), name))
    }

    fn item(&mut self, _key: &Value) -> Result<Slot<'_>, RemoteError> {
        Err(RemoteError::type_error(format!(
            "'{}' object is not subscriptable",
            self.type_name()
        )))
    }

    fn set_item(&mut self, _key: &Value, _value: Value) -> Result<(), RemoteError> {
        Err(RemoteError::type_error(format!(
            "'{}' object does not support item assignment",
            self.type_name()
        )))
    }

    fn del_item(&mut self, _key: &Value) -> Result<(), RemoteError> {
        Err(RemoteError::type_error(format!(
            "'{}' object does not support item deletion",
            self.type_name()
        )))
    }

    /// Call the object itself.
    fn call(&mut self, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, RemoteError> {
        Err(RemoteError::type_error(format!(
            "'{}' object is not callable",
            self.type_name()
        )))
    }

    fn call_method(
        &mut self,
        name: &str,
        _args: &[Value],
        _kwargs: &Kwargs,
    ) -> Result<Value, RemoteError> {
        Err(RemoteError::no_attribute(self.type_name(), name))
    }

    fn len(&self) -> Result<usize, RemoteError> {
        Err(RemoteError::type_error(format!(
            "object of type '{}' has no len()",
            self.type_name()
        )))
    }

    fn contains(&self, _item: &Value) -> Result<bool, RemoteError> {
        Err(RemoteError::type_error(format!(
            "argument of type '{}' is not iterable",
            self.type_name()
        )))
    }

    /// Snapshot of the object as a transferable value.
    ///
    /// The default is an opaque marker, which resolves locally but fails to
    /// serialize when sent across the channel.
    fn to_value(&self) -> Result<Value, RemoteError> {
        Ok(Value::Opaque(Opaque::new(self.type_name(), ())))
    }
}

/// A method looked up on an object but not yet called.
///
/// Only exists mid-replay; everything except calling it fails.
pub(crate) struct BoundMethod {
    pub(crate) name: String,
}

impl Resolvable for BoundMethod {
    fn type_name(&self) -> &str {
        "method"
    }

    fn to_value(&self) -> Result<Value, RemoteError> {
        Ok(Value::Opaque(Opaque::new(
            format!("bound method {}", self.name),
            (),
        )))
    }
}
