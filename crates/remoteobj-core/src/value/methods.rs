//! Container behavior for [`Value`]: indexing, membership and the list, dict
//! and str methods a chain can call.

use super::{normalize_index, Kwargs, Value};
use crate::error::RemoteError;
use crate::resolvable::{Resolvable, Slot};
use std::cmp::Ordering;

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "clear", "index", "count", "reverse", "sort",
    "copy",
];
const MAP_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "items",
    "pop",
    "update",
    "clear",
    "setdefault",
    "copy",
];
const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "split",
    "startswith",
    "endswith",
    "replace",
    "join",
];

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RemoteError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {}", min)
    } else {
        format!("from {} to {}", min, max)
    };
    Err(RemoteError::type_error(format!(
        "{}() takes {} argument(s) ({} given)",
        name,
        expected,
        args.len()
    )))
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> Result<(), RemoteError> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(RemoteError::type_error(format!(
            "{}() takes no keyword arguments",
            name
        )))
    }
}

fn int_arg(name: &str, value: &Value) -> Result<i64, RemoteError> {
    value.as_i64().ok_or_else(|| {
        RemoteError::type_error(format!(
            "{}() expected an integer, got '{}'",
            name,
            value.type_name()
        ))
    })
}

fn str_arg<'a>(name: &str, value: &'a Value) -> Result<&'a str, RemoteError> {
    value.as_str().ok_or_else(|| {
        RemoteError::type_error(format!(
            "{}() argument must be str, not '{}'",
            name,
            value.type_name()
        ))
    })
}

fn map_key(key: &Value) -> Result<&str, RemoteError> {
    key.as_str().ok_or_else(|| {
        RemoteError::type_error(format!(
            "dict keys must be str, not '{}'",
            key.type_name()
        ))
    })
}

fn list_index(items: &[Value], key: &Value) -> Result<usize, RemoteError> {
    let index = key.as_i64().ok_or_else(|| {
        RemoteError::type_error(format!(
            "list indices must be integers, not {}",
            key.type_name()
        ))
    })?;
    normalize_index(index, items.len())
        .ok_or_else(|| RemoteError::index("list index out of range"))
}

fn sort_values(items: &mut [Value]) -> Result<(), RemoteError> {
    let mut failure = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(ord) => ord,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

pub(crate) fn sorted(mut items: Vec<Value>, reverse: bool) -> Result<Vec<Value>, RemoteError> {
    sort_values(&mut items)?;
    if reverse {
        items.reverse();
    }
    Ok(items)
}

fn call_list_method(
    items: &mut Vec<Value>,
    name: &str,
    args: &[Value],
) -> Result<Value, RemoteError> {
    match name {
        "append" => {
            check_arity(name, args, 1, 1)?;
            items.push(args[0].clone());
            Ok(Value::Null)
        }
        "extend" => {
            check_arity(name, args, 1, 1)?;
            items.extend(args[0].iter_items()?);
            Ok(Value::Null)
        }
        "insert" => {
            check_arity(name, args, 2, 2)?;
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let index = int_arg(name, &args[0])?;
            let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(usize::try_from(index).unwrap_or(0), args[1].clone());
            Ok(Value::Null)
        }
        "pop" => {
            check_arity(name, args, 0, 1)?;
            if items.is_empty() {
                return Err(RemoteError::index("pop from empty list"));
            }
            let index = match args.first() {
                Some(arg) => normalize_index(int_arg(name, arg)?, items.len())
                    .ok_or_else(|| RemoteError::index("pop index out of range"))?,
                None => items.len() - 1,
            };
            Ok(items.remove(index))
        }
        "remove" => {
            check_arity(name, args, 1, 1)?;
            let position = items
                .iter()
                .position(|item| item.loose_eq(&args[0]))
                .ok_or_else(|| RemoteError::value_error("list.remove(x): x not in list"))?;
            items.remove(position);
            Ok(Value::Null)
        }
        "clear" => {
            check_arity(name, args, 0, 0)?;
            items.clear();
            Ok(Value::Null)
        }
        "index" => {
            check_arity(name, args, 1, 1)?;
            items
                .iter()
                .position(|item| item.loose_eq(&args[0]))
                .map(Value::from)
                .ok_or_else(|| {
                    RemoteError::value_error(format!("{} is not in list", args[0].repr()))
                })
        }
        "count" => {
            check_arity(name, args, 1, 1)?;
            let count = items.iter().filter(|item| item.loose_eq(&args[0])).count();
            Ok(Value::from(count))
        }
        "reverse" => {
            check_arity(name, args, 0, 0)?;
            items.reverse();
            Ok(Value::Null)
        }
        "sort" => {
            check_arity(name, args, 0, 0)?;
            sort_values(items)?;
            Ok(Value::Null)
        }
        "copy" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::List(items.clone()))
        }
        _ => Err(RemoteError::no_attribute("list", name)),
    }
}

fn call_map_method(
    map: &mut std::collections::BTreeMap<String, Value>,
    name: &str,
    args: &[Value],
    kwargs: &Kwargs,
) -> Result<Value, RemoteError> {
    if name != "update" {
        no_kwargs(name, kwargs)?;
    }
    match name {
        "get" => {
            check_arity(name, args, 1, 2)?;
            let key = map_key(&args[0])?;
            Ok(map
                .get(key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        "keys" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::List(map.keys().cloned().map(Value::Str).collect()))
        }
        "values" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::List(map.values().cloned().collect()))
        }
        "items" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::List(
                map.iter()
                    .map(|(k, v)| Value::List(vec![Value::Str(k.clone()), v.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            check_arity(name, args, 1, 2)?;
            let key = map_key(&args[0])?;
            match (map.remove(key), args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(RemoteError::missing_key(&args[0])),
            }
        }
        "update" => {
            check_arity(name, args, 0, 1)?;
            if let Some(other) = args.first() {
                let other = other.as_map().ok_or_else(|| {
                    RemoteError::type_error(format!(
                        "update() argument must be dict, not '{}'",
                        other.type_name()
                    ))
                })?;
                map.extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            map.extend(kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Null)
        }
        "clear" => {
            check_arity(name, args, 0, 0)?;
            map.clear();
            Ok(Value::Null)
        }
        "setdefault" => {
            check_arity(name, args, 1, 2)?;
            let key = map_key(&args[0])?.to_string();
            let default = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(map.entry(key).or_insert(default).clone())
        }
        "copy" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::Map(map.clone()))
        }
        _ => Err(RemoteError::no_attribute("dict", name)),
    }
}

fn call_str_method(s: &str, name: &str, args: &[Value]) -> Result<Value, RemoteError> {
    match name {
        "upper" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::from(s.to_uppercase()))
        }
        "lower" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::from(s.to_lowercase()))
        }
        "strip" => {
            check_arity(name, args, 0, 0)?;
            Ok(Value::from(s.trim()))
        }
        "split" => {
            check_arity(name, args, 0, 1)?;
            let parts: Vec<Value> = match args.first().filter(|sep| !sep.is_null()) {
                Some(sep) => {
                    let sep = str_arg(name, sep)?;
                    if sep.is_empty() {
                        return Err(RemoteError::value_error("empty separator"));
                    }
                    s.split(sep).map(Value::from).collect()
                }
                None => s.split_whitespace().map(Value::from).collect(),
            };
            Ok(Value::List(parts))
        }
        "startswith" => {
            check_arity(name, args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(str_arg(name, &args[0])?)))
        }
        "endswith" => {
            check_arity(name, args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(str_arg(name, &args[0])?)))
        }
        "replace" => {
            check_arity(name, args, 2, 2)?;
            let from = str_arg(name, &args[0])?;
            let to = str_arg(name, &args[1])?;
            Ok(Value::from(s.replace(from, to)))
        }
        "join" => {
            check_arity(name, args, 1, 1)?;
            let parts = args[0]
                .iter_items()?
                .iter()
                .map(|part| {
                    part.as_str().map(str::to_string).ok_or_else(|| {
                        RemoteError::type_error(format!(
                            "sequence item: expected str instance, {} found",
                            part.type_name()
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::from(parts.join(s)))
        }
        _ => Err(RemoteError::no_attribute("str", name)),
    }
}

impl Resolvable for Value {
    fn type_name(&self) -> &str {
        Value::type_name(self)
    }

    fn has_method(&self, name: &str) -> bool {
        match self {
            Value::List(_) => LIST_METHODS.contains(&name),
            Value::Map(_) => MAP_METHODS.contains(&name),
            Value::Str(_) => STR_METHODS.contains(&name),
            _ => false,
        }
    }

    fn item(&mut self, key: &Value) -> Result<Slot<'_>, RemoteError> {
        match self {
            Value::List(items) => {
                let index = list_index(items, key)?;
                Ok(Slot::Place(&mut items[index]))
            }
            Value::Map(map) => {
                let name = map_key(key)?;
                map.get_mut(name)
                    .map(|value| Slot::Place(value as &mut dyn Resolvable))
                    .ok_or_else(|| RemoteError::missing_key(key))
            }
            Value::Str(s) => {
                let index = key.as_i64().ok_or_else(|| {
                    RemoteError::type_error(format!(
                        "string indices must be integers, not '{}'",
                        key.type_name()
                    ))
                })?;
                let chars: Vec<char> = s.chars().collect();
                normalize_index(index, chars.len())
                    .map(|i| Slot::Value(Value::Str(chars[i].to_string())))
                    .ok_or_else(|| RemoteError::index("string index out of range"))
            }
            other => Err(RemoteError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_item(&mut self, key: &Value, value: Value) -> Result<(), RemoteError> {
        match self {
            Value::List(items) => {
                let index = list_index(items, key)?;
                items[index] = value;
                Ok(())
            }
            Value::Map(map) => {
                map.insert(map_key(key)?.to_string(), value);
                Ok(())
            }
            other => Err(RemoteError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn del_item(&mut self, key: &Value) -> Result<(), RemoteError> {
        match self {
            Value::List(items) => {
                let index = list_index(items, key)?;
                items.remove(index);
                Ok(())
            }
            Value::Map(map) => match map.remove(map_key(key)?) {
                Some(_) => Ok(()),
                None => Err(RemoteError::missing_key(key)),
            },
            other => Err(RemoteError::type_error(format!(
                "'{}' object does not support item deletion",
                other.type_name()
            ))),
        }
    }

    fn call_method(
        &mut self,
        name: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<Value, RemoteError> {
        match self {
            Value::List(items) => {
                no_kwargs(name, kwargs)?;
                call_list_method(items, name, args)
            }
            Value::Map(map) => call_map_method(map, name, args, kwargs),
            Value::Str(s) => {
                no_kwargs(name, kwargs)?;
                call_str_method(s, name, args)
            }
            other => Err(RemoteError::no_attribute(other.type_name(), name)),
        }
    }

    fn len(&self) -> Result<usize, RemoteError> {
        match self {
            Value::List(items) => Ok(items.len()),
            Value::Map(map) => Ok(map.len()),
            Value::Str(s) => Ok(s.chars().count()),
            other => Err(RemoteError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    fn contains(&self, item: &Value) -> Result<bool, RemoteError> {
        match self {
            Value::List(items) => Ok(items.iter().any(|x| x.loose_eq(item))),
            Value::Map(map) => Ok(item.as_str().is_some_and(|key| map.contains_key(key))),
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(needle.as_str())),
                other => Err(RemoteError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            other => Err(RemoteError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    fn to_value(&self) -> Result<Value, RemoteError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn call(value: &mut Value, name: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        value.call_method(name, &args, &Kwargs::new())
    }

    #[test]
    fn test_list_append_pop_and_index() {
        let mut list = Value::from(vec![1, 2]);
        call(&mut list, "append", vec![Value::from(3)]).unwrap();
        assert_eq!(list, Value::from(vec![1, 2, 3]));

        assert_eq!(call(&mut list, "pop", vec![]).unwrap(), Value::Int(3));
        assert_eq!(call(&mut list, "pop", vec![Value::Int(0)]).unwrap(), Value::Int(1));
        assert_eq!(call(&mut list, "index", vec![Value::Int(2)]).unwrap(), Value::Int(0));

        let err = call(&mut list, "index", vec![Value::Int(9)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        assert_eq!(err.message, "9 is not in list");
    }

    #[test]
    fn test_list_pop_empty_is_index_error() {
        let mut list = Value::List(vec![]);
        let err = call(&mut list, "pop", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexError);
    }

    #[test]
    fn test_list_insert_clamps_like_python() {
        let mut list = Value::from(vec![1, 2]);
        call(&mut list, "insert", vec![Value::Int(100), Value::Int(3)]).unwrap();
        call(&mut list, "insert", vec![Value::Int(-100), Value::Int(0)]).unwrap();
        assert_eq!(list, Value::from(vec![0, 1, 2, 3]));
    }

    #[test]
    fn test_list_sort_rejects_mixed_types() {
        let mut list = Value::from(vec![Value::Int(2), Value::from("a")]);
        let err = call(&mut list, "sort", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_list_item_negative_index_is_a_place() {
        let mut list = Value::from(vec![1, 2, 3]);
        match list.item(&Value::Int(-1)).ok().unwrap() {
            Slot::Place(place) => {
                place.set_item(&Value::Int(0), Value::Null).unwrap_err();
                assert_eq!(place.to_value().unwrap(), Value::Int(3));
            }
            Slot::Value(_) => panic!("list element should be addressable"),
        }

        let err = list.item(&Value::Int(3)).err().unwrap();
        assert_eq!(err.message, "list index out of range");
    }

    #[test]
    fn test_map_missing_key_is_key_error() {
        let mut map = Value::Map(Default::default());
        let err = map.item(&Value::from("missing")).err().unwrap();
        assert_eq!(err.kind, ErrorKind::KeyError);
        assert_eq!(err.message, "'missing'");
    }

    #[test]
    fn test_map_methods() {
        let mut map = Value::Map(Default::default());
        map.set_item(&Value::from("a"), Value::Int(1)).unwrap();

        let mut kwargs = Kwargs::new();
        kwargs.insert("b".into(), Value::Int(2));
        map.call_method("update", &[], &kwargs).unwrap();

        assert_eq!(
            call(&mut map, "keys", vec![]).unwrap(),
            Value::from(vec!["a", "b"])
        );
        assert_eq!(
            call(&mut map, "get", vec![Value::from("zz"), Value::Int(7)]).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            call(&mut map, "setdefault", vec![Value::from("c"), Value::Int(3)]).unwrap(),
            Value::Int(3)
        );
        assert_eq!(map.len().unwrap(), 3);
        assert!(map.contains(&Value::from("c")).unwrap());
        assert!(!map.contains(&Value::Int(1)).unwrap());
    }

    #[test]
    fn test_map_methods_reject_kwargs() {
        let mut map = Value::Map(Default::default());
        let mut kwargs = Kwargs::new();
        kwargs.insert("x".into(), Value::Null);
        let err = map.call_method("keys", &[], &kwargs).unwrap_err();
        assert_eq!(err.message, "keys() takes no keyword arguments");
    }

    #[test]
    fn test_str_methods_and_membership() {
        let mut s = Value::from("  a,b  ");
        assert_eq!(call(&mut s, "strip", vec![]).unwrap(), Value::from("a,b"));

        let mut csv = Value::from("a,b");
        assert_eq!(
            call(&mut csv, "split", vec![Value::from(",")]).unwrap(),
            Value::from(vec!["a", "b"])
        );

        let mut sep = Value::from("-");
        assert_eq!(
            call(&mut sep, "join", vec![Value::from(vec!["x", "y"])]).unwrap(),
            Value::from("x-y")
        );

        assert!(csv.contains(&Value::from(",b")).unwrap());
        assert!(csv.contains(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_str_is_immutable() {
        let mut s = Value::from("abc");
        let err = s.set_item(&Value::Int(0), Value::from("z")).unwrap_err();
        assert_eq!(err.message, "'str' object does not support item assignment");
    }

    #[test]
    fn test_scalars_have_no_methods() {
        let mut n = Value::Int(3);
        assert!(!n.has_method("append"));
        let err = call(&mut n, "append", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
        assert_eq!(n.len().unwrap_err().message, "object of type 'int' has no len()");
    }

    #[test]
    fn test_arity_errors() {
        let mut list = Value::List(vec![]);
        let err = call(&mut list, "append", vec![]).unwrap_err();
        assert_eq!(err.message, "append() takes exactly 1 argument(s) (0 given)");
    }

    #[test]
    fn test_sorted_reverse() {
        let items = vec![Value::Int(2), Value::Float(0.5), Value::Int(9)];
        assert_eq!(
            sorted(items, true).unwrap(),
            vec![Value::Int(9), Value::Int(2), Value::Float(0.5)]
        );
    }
}
