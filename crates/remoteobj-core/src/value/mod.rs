//! Dynamic values that travel across the channel.
//!
//! A [`Value`] is what an operation chain carries as arguments and what the
//! owner sends back as a result. It maps onto plain JSON on the wire, except
//! for [`Value::Opaque`], which models an in-process resource (a lock, a
//! file handle, a bound method) and refuses to serialize.

mod methods;

pub(crate) use methods::sorted as sorted_values;

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Keyword arguments for calls.
pub type Kwargs = BTreeMap<String, Value>;

/// A dynamically typed value.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Only finite floats serialize; JSON has no NaN or infinity.
    #[serde(serialize_with = "finite_float")]
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    #[serde(skip_deserializing, serialize_with = "reject_opaque")]
    Opaque(Opaque),
}

fn reject_opaque<S: serde::Serializer>(opaque: &Opaque, _serializer: S) -> Result<S::Ok, S::Error> {
    Err(serde::ser::Error::custom(format!(
        "'{}' object cannot cross a process boundary",
        opaque.type_name()
    )))
}

fn finite_float<S: serde::Serializer>(float: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !float.is_finite() {
        return Err(serde::ser::Error::custom(format!(
            "float {} has no JSON representation",
            float
        )));
    }
    serializer.serialize_f64(*float)
}

/// A value that only exists inside the process that produced it.
#[derive(Clone)]
pub struct Opaque {
    type_name: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    /// Wrap `value`, reporting it as `type_name`.
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            inner: Arc::new(value),
        }
    }

    /// Name reported in errors and by `type`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The wrapped value, if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Value {
    /// Type name as the `type` function reports it.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Opaque(opaque) => opaque.type_name(),
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The bool, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one. Bools count as 0 and 1.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// The number as a float. Ints and bools convert.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Truthiness with the usual container rules (empty is false).
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Opaque(_) => true,
        }
    }

    /// Equality that treats `1`, `1.0` and `True` as the same number.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(_), _) | (_, Value::Str(_)) => self == other,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => self == other,
            },
        }
    }

    /// Ordering for `sorted`, `min`, `max` and `list.sort`.
    pub fn compare(&self, other: &Value) -> Result<Ordering, RemoteError> {
        let unordered = || {
            RemoteError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))
        };
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.compare(y)?;
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(unordered),
                _ => Err(unordered()),
            },
        }
    }

    /// Elements produced by iterating over the value.
    pub fn iter_items(&self) -> Result<Vec<Value>, RemoteError> {
        match self {
            Value::List(items) => Ok(items.clone()),
            Value::Map(map) => Ok(map.keys().cloned().map(Value::Str).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(RemoteError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Developer-facing rendering (strings are quoted).
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            other => other.to_string(),
        }
    }

    /// Convert to a `serde_json::Value`, failing on opaque content.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => f.write_str(s),
            Value::Opaque(opaque) => write!(f, "<{} object>", opaque.type_name()),
            other => f.write_str(&other.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Opaque(opaque) => opaque.fmt(f),
            other => f.write_str(&other.repr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Value::Opaque(opaque)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Map a possibly negative index onto `0..len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_wire_shape_is_plain() {
        let mut map = BTreeMap::new();
        map.insert("xs".to_string(), Value::from(vec![1, 2]));
        map.insert("name".to_string(), Value::from("a"));
        map.insert("ratio".to_string(), Value::Float(0.5));
        map.insert("none".to_string(), Value::Null);

        let json = serde_json::to_value(Value::Map(map)).unwrap();
        assert_eq!(
            json,
            json!({"xs": [1, 2], "name": "a", "ratio": 0.5, "none": null})
        );
    }

    #[test]
    fn test_deserialize_keeps_int_and_float_apart() {
        let parsed: Value = serde_json::from_str("[1, 1.0, true, null]").unwrap();
        assert_eq!(
            parsed,
            Value::List(vec![
                Value::Int(1),
                Value::Float(1.0),
                Value::Bool(true),
                Value::Null
            ])
        );
    }

    #[test]
    fn test_opaque_refuses_to_serialize() {
        let value = Value::List(vec![Value::from(1), Opaque::new("Lock", ()).into()]);
        let err = serde_json::to_string(&value).unwrap_err();
        assert!(err.to_string().contains("'Lock' object cannot cross a process boundary"));
    }

    #[test]
    fn test_non_finite_float_refuses_to_serialize() {
        for float in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let value = Value::from(vec![Value::Float(float)]);
            let err = serde_json::to_string(&value).unwrap_err();
            assert!(err.to_string().contains("has no JSON representation"));
        }
        assert_eq!(serde_json::to_string(&Value::Float(1.5)).unwrap(), "1.5");
    }

    #[test]
    fn test_opaque_equality_is_identity() {
        let a = Opaque::new("Lock", 1u8);
        let b = Opaque::new("Lock", 1u8);
        assert_eq!(Value::Opaque(a.clone()), Value::Opaque(a.clone()));
        assert_ne!(Value::Opaque(a), Value::Opaque(b));
    }

    #[test]
    fn test_repr_and_display() {
        let value = Value::from(vec![Value::from("it's"), Value::Null, Value::Float(2.0)]);
        assert_eq!(value.repr(), "['it\\'s', None, 2.0]");
        assert_eq!(Value::from("plain").to_string(), "plain");
        assert_eq!(Value::Bool(true).to_string(), "True");
    }

    #[test]
    fn test_loose_eq_across_numeric_types() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).loose_eq(&Value::Int(1)));
        assert!(!Value::Str("1".into()).loose_eq(&Value::Int(1)));
    }

    #[test]
    fn test_compare_rejects_mixed_types() {
        assert_eq!(
            Value::Int(1).compare(&Value::Float(2.5)).unwrap(),
            Ordering::Less
        );
        let err = Value::Int(1).compare(&Value::from("a")).unwrap_err();
        assert!(err.message.contains("'int' and 'str'"));
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(0, 3), Some(0));
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(0, 0), None);
    }

    #[test]
    fn test_from_serde_json() {
        let value = Value::from(json!({"a": [1, 2.5, "x"]}));
        let list = value.as_map().unwrap()["a"].as_list().unwrap().to_vec();
        assert_eq!(list, vec![Value::Int(1), Value::Float(2.5), Value::from("x")]);
    }
}
