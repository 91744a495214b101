//! Named functions a chain can pass its current value to.
//!
//! Functions cannot cross a process boundary, so `passto` records a name and
//! the owner looks it up here when the chain is replayed.

use crate::error::RemoteError;
use crate::resolvable::Resolvable;
use crate::value::{Kwargs, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Signature of a function usable with `passto`.
///
/// The first argument is the value the chain has resolved to so far.
pub type PassFn =
    Arc<dyn Fn(&mut dyn Resolvable, &[Value], &Kwargs) -> Result<Value, RemoteError> + Send + Sync>;

/// Registry of functions addressable by name.
#[derive(Clone)]
pub struct FunctionTable {
    functions: HashMap<String, PassFn>,
}

impl FunctionTable {
    /// A table with no functions at all.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A table holding the built-in functions.
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        table.register("len", builtin_len);
        table.register("str", |target, args, kwargs| {
            no_extra_args("str", args, kwargs)?;
            Ok(Value::Str(target.to_value()?.to_string()))
        });
        table.register("repr", |target, args, kwargs| {
            no_extra_args("repr", args, kwargs)?;
            Ok(Value::Str(target.to_value()?.repr()))
        });
        table.register("type", |target, args, kwargs| {
            no_extra_args("type", args, kwargs)?;
            Ok(Value::from(target.type_name()))
        });
        table.register("bool", |target, args, kwargs| {
            no_extra_args("bool", args, kwargs)?;
            Ok(Value::Bool(target.to_value()?.is_truthy()))
        });
        table.register("sorted", builtin_sorted);
        table.register("sum", builtin_sum);
        table.register("min", |target, args, kwargs| {
            extreme("min", target, args, kwargs, std::cmp::Ordering::Less)
        });
        table.register("max", |target, args, kwargs| {
            extreme("max", target, args, kwargs, std::cmp::Ordering::Greater)
        });
        table
    }

    /// Register (or replace) a function under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&mut dyn Resolvable, &[Value], &Kwargs) -> Result<Value, RemoteError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Whether a function called `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Apply the function named `name` to `target`.
    pub fn apply(
        &self,
        name: &str,
        target: &mut dyn Resolvable,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<Value, RemoteError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| RemoteError::unknown_name(name))?;
        function(target, args, kwargs)
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("names", &self.names())
            .finish()
    }
}

fn no_extra_args(name: &str, args: &[Value], kwargs: &Kwargs) -> Result<(), RemoteError> {
    if args.is_empty() && kwargs.is_empty() {
        Ok(())
    } else {
        Err(RemoteError::type_error(format!(
            "{}() takes exactly one argument ({} given)",
            name,
            args.len() + kwargs.len() + 1
        )))
    }
}

fn builtin_len(
    target: &mut dyn Resolvable,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<Value, RemoteError> {
    no_extra_args("len", args, kwargs)?;
    Ok(Value::from(target.len()?))
}

fn builtin_sorted(
    target: &mut dyn Resolvable,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<Value, RemoteError> {
    if !args.is_empty() {
        return Err(RemoteError::type_error(
            "sorted expected 1 argument, got more",
        ));
    }
    let reverse = kwargs.get("reverse").is_some_and(Value::is_truthy);
    let items = target.to_value()?.iter_items()?;
    Ok(Value::List(crate::value::sorted_values(items, reverse)?))
}

fn builtin_sum(
    target: &mut dyn Resolvable,
    args: &[Value],
    _kwargs: &Kwargs,
) -> Result<Value, RemoteError> {
    let start = args.first().cloned().unwrap_or(Value::Int(0));
    target
        .to_value()?
        .iter_items()?
        .into_iter()
        .try_fold(start, |acc, item| match (&acc, &item) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| RemoteError::value_error("integer overflow in sum()")),
            _ => match (acc.as_f64(), item.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => Err(RemoteError::type_error(format!(
                    "unsupported operand type(s) for +: '{}' and '{}'",
                    acc.type_name(),
                    item.type_name()
                ))),
            },
        })
}

fn extreme(
    name: &str,
    target: &mut dyn Resolvable,
    args: &[Value],
    kwargs: &Kwargs,
    wanted: std::cmp::Ordering,
) -> Result<Value, RemoteError> {
    no_extra_args(name, args, kwargs)?;
    let mut items = target.to_value()?.iter_items()?.into_iter();
    let first = items.next().ok_or_else(|| {
        RemoteError::value_error(format!("{}() arg is an empty sequence", name))
    })?;
    items.try_fold(first, |best, item| {
        Ok(if item.compare(&best)? == wanted {
            item
        } else {
            best
        })
    })
}
