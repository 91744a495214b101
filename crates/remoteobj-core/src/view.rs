//! Recorded operation chains and their replay.
//!
//! A [`View`] is an immutable list of [`Op`]s. Extending a view never touches
//! the parent, so handles can share prefixes freely. [`resolve_view`] is the
//! only place a chain meets a real object; it does no I/O.

use crate::error::{ProxyError, RemoteError, Result};
use crate::functions::FunctionTable;
use crate::resolvable::{BoundMethod, Resolvable, Slot};
use crate::value::{Kwargs, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single recorded operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    GetAttr {
        name: String,
    },
    SetAttr {
        name: String,
        value: Value,
    },
    DelAttr {
        name: String,
    },
    GetItem {
        key: Value,
    },
    SetItem {
        key: Value,
        value: Value,
    },
    DelItem {
        key: Value,
    },
    Call {
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Kwargs::is_empty")]
        kwargs: Kwargs,
    },
    /// Apply a named function from the owner's [`FunctionTable`] to the
    /// current value.
    PassTo {
        func: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Kwargs::is_empty")]
        kwargs: Kwargs,
    },
    Len,
    Contains {
        item: Value,
    },
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Value], kwargs: &Kwargs) -> fmt::Result {
    let rendered: Vec<String> = args
        .iter()
        .map(Value::repr)
        .chain(kwargs.iter().map(|(k, v)| format!("{}={}", k, v.repr())))
        .collect();
    write!(f, "({})", rendered.join(", "))
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::GetAttr { name } => write!(f, ".{}", name),
            Op::SetAttr { name, value } => write!(f, ".{} = {}", name, value.repr()),
            Op::DelAttr { name } => write!(f, "del .{}", name),
            Op::GetItem { key } => write!(f, "[{}]", key.repr()),
            Op::SetItem { key, value } => write!(f, "[{}] = {}", key.repr(), value.repr()),
            Op::DelItem { key } => write!(f, "del [{}]", key.repr()),
            Op::Call { args, kwargs } => write_args(f, args, kwargs),
            Op::PassTo { func, args, kwargs } => {
                write!(f, "|> {}", func)?;
                write_args(f, args, kwargs)
            }
            Op::Len => f.write_str("len()"),
            Op::Contains { item } => write!(f, "contains({})", item.repr()),
        }
    }
}

/// An immutable, shareable chain of operations.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    ops: Arc<[Op]>,
    frozen: bool,
}

impl View {
    /// The identity view: resolving it yields the root.
    pub fn new() -> Self {
        Self::from_ops(Vec::new())
    }

    /// A view over an existing chain.
    pub fn from_ops(ops: Vec<Op>) -> Self {
        Self {
            ops: ops.into(),
            frozen: false,
        }
    }

    /// The recorded operations, oldest first.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Number of recorded operations.
    pub fn depth(&self) -> usize {
        self.ops.len()
    }

    /// Whether the chain is empty.
    pub fn is_identity(&self) -> bool {
        self.ops.is_empty()
    }

    /// A new view with `ops` appended. `self` is left as it was.
    pub fn extend(&self, ops: impl IntoIterator<Item = Op>) -> Result<View> {
        if self.frozen {
            return Err(ProxyError::FrozenView);
        }
        let ops: Arc<[Op]> = self.ops.iter().cloned().chain(ops).collect();
        Ok(View { ops, frozen: false })
    }

    fn push(&self, op: Op) -> Result<View> {
        self.extend(std::iter::once(op))
    }

    /// `.name`
    pub fn attr(&self, name: impl Into<String>) -> Result<View> {
        self.push(Op::GetAttr { name: name.into() })
    }

    /// `.name = value`
    pub fn set_attr(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<View> {
        self.push(Op::SetAttr {
            name: name.into(),
            value: value.into(),
        })
    }

    /// `del .name`
    pub fn del_attr(&self, name: impl Into<String>) -> Result<View> {
        self.push(Op::DelAttr { name: name.into() })
    }

    /// `[key]`
    pub fn item(&self, key: impl Into<Value>) -> Result<View> {
        self.push(Op::GetItem { key: key.into() })
    }

    /// `[key] = value`
    pub fn set_item(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<View> {
        self.push(Op::SetItem {
            key: key.into(),
            value: value.into(),
        })
    }

    /// `del [key]`
    pub fn del_item(&self, key: impl Into<Value>) -> Result<View> {
        self.push(Op::DelItem { key: key.into() })
    }

    /// Call the current value.
    pub fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<View> {
        self.push(Op::Call { args, kwargs })
    }

    /// Hand the current value to the owner's function `func`.
    pub fn passto(&self, func: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Result<View> {
        self.push(Op::PassTo {
            func: func.into(),
            args,
            kwargs,
        })
    }

    /// `len()` of the current value.
    pub fn len(&self) -> Result<View> {
        self.push(Op::Len)
    }

    /// Whether the current value contains `item`.
    pub fn contains(&self, item: impl Into<Value>) -> Result<View> {
        self.push(Op::Contains { item: item.into() })
    }

    /// A copy of this view that refuses further extension.
    pub fn freeze(&self) -> View {
        View {
            ops: Arc::clone(&self.ops),
            frozen: true,
        }
    }

    /// Whether [`extend`](View::extend) is refused.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Replay this view against `root`.
    pub fn resolve(
        &self,
        root: &mut dyn Resolvable,
        functions: &FunctionTable,
    ) -> std::result::Result<Resolved, RemoteError> {
        resolve_view(&self.ops, root, functions)
    }
}

impl Default for View {
    fn default() -> Self {
        View::new()
    }
}

impl From<Vec<Op>> for View {
    fn from(ops: Vec<Op>) -> Self {
        View::from_ops(ops)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<root>")?;
        for op in self.ops.iter() {
            match op {
                Op::GetAttr { .. } | Op::GetItem { .. } | Op::Call { .. } => write!(f, "{}", op)?,
                _ => write!(f, " {}", op)?,
            }
        }
        Ok(())
    }
}

/// Outcome of replaying a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The chain ended on the root object itself.
    Root,
    Value(Value),
}

/// Where replay currently stands.
enum Cursor<'a> {
    /// At the root: no op has moved off it, or every op so far returned
    /// the root itself.
    Root(&'a mut dyn Resolvable),
    /// An addressable member of the root. Mutations land on the real object.
    Place(&'a mut dyn Resolvable),
    /// A computed value. Mutations land on the temporary.
    Temp(Value),
    /// A method looked up but not yet called.
    Method {
        receiver: Box<Cursor<'a>>,
        name: String,
    },
}

impl<'a> Cursor<'a> {
    fn from_slot(slot: Slot<'a>) -> Self {
        match slot {
            Slot::Place(place) => Cursor::Place(place),
            Slot::Value(value) => Cursor::Temp(value),
        }
    }

    fn into_value(self) -> std::result::Result<Value, RemoteError> {
        match self {
            Cursor::Root(target) | Cursor::Place(target) => target.to_value(),
            Cursor::Temp(value) => Ok(value),
            Cursor::Method { name, .. } => BoundMethod { name }.to_value(),
        }
    }

    fn step(
        self,
        op: &Op,
        functions: &FunctionTable,
    ) -> std::result::Result<Cursor<'a>, RemoteError> {
        match self {
            Cursor::Root(target) => enter(target, op, functions, Cursor::Root),
            Cursor::Place(target) => enter(target, op, functions, Cursor::Place),
            Cursor::Temp(mut value) => {
                if let Op::GetAttr { name } = op {
                    if value.has_method(name) {
                        return Ok(Cursor::Method {
                            receiver: Box::new(Cursor::Temp(value)),
                            name: name.clone(),
                        });
                    }
                }
                let next = descend(&mut value, op, functions)?.into_value()?;
                Ok(Cursor::Temp(next))
            }
            Cursor::Method { receiver, name } => {
                if let Op::Call { args, kwargs } = op {
                    return receiver.invoke(&name, args, kwargs);
                }
                let mut method = BoundMethod { name };
                let next = descend(&mut method, op, functions)?.into_value()?;
                Ok(Cursor::Temp(next))
            }
        }
    }

    /// Call method `name` on the receiver this cursor holds.
    fn invoke(
        self,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> std::result::Result<Cursor<'a>, RemoteError> {
        match self {
            Cursor::Root(target) => call_on(target, name, args, kwargs, Cursor::Root),
            Cursor::Place(target) => call_on(target, name, args, kwargs, Cursor::Place),
            Cursor::Temp(mut value) => value.call_method(name, args, kwargs).map(Cursor::Temp),
            Cursor::Method { .. } => Err(RemoteError::no_attribute("method", name)),
        }
    }
}

/// Rebuilds the cursor an object reference came from, so a step that
/// returns the object itself keeps it a root (or a place).
type Rewrap<'a> = fn(&'a mut dyn Resolvable) -> Cursor<'a>;

fn enter<'a>(
    target: &'a mut dyn Resolvable,
    op: &Op,
    functions: &FunctionTable,
    rewrap: Rewrap<'a>,
) -> std::result::Result<Cursor<'a>, RemoteError> {
    if let Op::GetAttr { name } = op {
        if target.has_method(name) {
            return Ok(Cursor::Method {
                receiver: Box::new(rewrap(target)),
                name: name.clone(),
            });
        }
        if target.returns_self(name) {
            return Ok(rewrap(target));
        }
    }
    descend(target, op, functions)
}

fn call_on<'a>(
    target: &'a mut dyn Resolvable,
    name: &str,
    args: &[Value],
    kwargs: &Kwargs,
    rewrap: Rewrap<'a>,
) -> std::result::Result<Cursor<'a>, RemoteError> {
    let value = target.call_method(name, args, kwargs)?;
    if target.returns_self(name) {
        Ok(rewrap(target))
    } else {
        Ok(Cursor::Temp(value))
    }
}

fn descend<'a>(
    target: &'a mut dyn Resolvable,
    op: &Op,
    functions: &FunctionTable,
) -> std::result::Result<Cursor<'a>, RemoteError> {
    let done = |_| Cursor::Temp(Value::Null);
    match op {
        Op::GetAttr { name } => target.attr(name).map(Cursor::from_slot),
        Op::SetAttr { name, value } => target.set_attr(name, value.clone()).map(done),
        Op::DelAttr { name } => target.del_attr(name).map(done),
        Op::GetItem { key } => target.item(key).map(Cursor::from_slot),
        Op::SetItem { key, value } => target.set_item(key, value.clone()).map(done),
        Op::DelItem { key } => target.del_item(key).map(done),
        Op::Call { args, kwargs } => target.call(args, kwargs).map(Cursor::Temp),
        Op::PassTo { func, args, kwargs } => functions
            .apply(func, target, args, kwargs)
            .map(Cursor::Temp),
        Op::Len => target.len().map(|n| Cursor::Temp(Value::from(n))),
        Op::Contains { item } => target.contains(item).map(|b| Cursor::Temp(Value::Bool(b))),
    }
}

/// Replay `ops` left to right against `root`.
///
/// Stops at the first failing op and returns its error, annotated with the
/// op's position. Never catches: wrapping errors for transport is the
/// listener's job.
pub fn resolve_view(
    ops: &[Op],
    root: &mut dyn Resolvable,
    functions: &FunctionTable,
) -> std::result::Result<Resolved, RemoteError> {
    let mut cursor = Cursor::Root(root);
    for (index, op) in ops.iter().enumerate() {
        cursor = cursor.step(op, functions).map_err(|e| e.at(index, op))?;
    }
    match cursor {
        Cursor::Root(_) => Ok(Resolved::Root),
        other => other.into_value().map(Resolved::Value),
    }
}
