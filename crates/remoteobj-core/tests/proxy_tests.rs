//! Integration tests for owner/handle round trips.
//!
//! Handles run on their own threads (or talk through the loopback bridge)
//! while the owner listens, the way an application would use them.

use remoteobj::{
    ErrorKind, Handle, Kwargs, Opaque, Outcome, Proxy, ProxyConfig, ProxyError, RemoteError,
    RemoteProxy, Resolvable, SerializationPolicy, Slot, Value,
};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

/// A small owner object with one addressable member, one method and a
/// reference to itself.
struct Account {
    owner: String,
    balance: i64,
    tags: Value,
}

impl Account {
    fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            balance: 0,
            tags: Value::List(vec![]),
        }
    }
}

impl Resolvable for Account {
    fn type_name(&self) -> &str {
        "Account"
    }

    fn has_method(&self, name: &str) -> bool {
        name == "deposit"
    }

    fn returns_self(&self, name: &str) -> bool {
        name == "me"
    }

    fn attr(&mut self, name: &str) -> Result<Slot<'_>, RemoteError> {
        match name {
            "owner" => Ok(Slot::Value(Value::from(self.owner.as_str()))),
            "balance" => Ok(Slot::Value(Value::Int(self.balance))),
            "tags" => Ok(Slot::Place(&mut self.tags)),
            _ => Err(RemoteError::no_attribute("Account", name)),
        }
    }

    fn set_attr(&mut self, name: &str, value: Value) -> Result<(), RemoteError> {
        match (name, value) {
            ("owner", Value::Str(owner)) => {
                self.owner = owner;
                Ok(())
            }
            ("owner", other) => Err(RemoteError::type_error(format!(
                "owner must be a str, not '{}'",
                other.type_name()
            ))),
            _ => Err(RemoteError::no_attribute("Account", name)),
        }
    }

    fn call_method(
        &mut self,
        name: &str,
        args: &[Value],
        _kwargs: &Kwargs,
    ) -> Result<Value, RemoteError> {
        match name {
            "deposit" => {
                let amount = args
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| RemoteError::type_error("deposit() needs an integer amount"))?;
                if amount <= 0 {
                    return Err(RemoteError::value_error("deposit must be positive"));
                }
                self.balance += amount;
                Ok(Value::Int(self.balance))
            }
            _ => Err(RemoteError::no_attribute("Account", name)),
        }
    }
}

/// An address nothing listens on.
fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Block until `count` requests were queued on the owner.
fn wait_for_sent<T: Resolvable + Send + 'static>(proxy: &Proxy<T>, count: u64) {
    let start = Instant::now();
    while proxy.stats().sent < count {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "requests were never queued"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_list_round_trip_from_another_thread() {
    let proxy = Proxy::new(Value::List(vec![]));
    let remote = proxy.handle();

    let caller = thread::spawn(move || -> remoteobj::Result<(Value, Value)> {
        remote.wait_until_listening(None, true)?;
        remote.call_method("append", vec![Value::Int(5)], Kwargs::new())?;
        let len = remote.passto("len", vec![], Kwargs::new())?.value()?;
        let first = remote.item(0)?.get_()?.value()?;
        Ok((len, first))
    });

    proxy.listen_(true).unwrap();
    let (len, first) = caller.join().unwrap().unwrap();
    proxy.stop_listen_().unwrap();

    assert_eq!(len, Value::Int(1));
    assert_eq!(first, Value::Int(5));
    assert_eq!(proxy.with_object(|list| list.clone()).unwrap(), Value::from(vec![5]));
}

#[test]
fn test_default_when_owner_not_listening() {
    let proxy = Proxy::builder(Value::List(vec![]))
        .default_value(Value::List(vec![]))
        .build();
    let remote = proxy.handle();

    let value = remote.item(3).unwrap().get_().unwrap().value().unwrap();
    assert_eq!(value, Value::List(vec![]));

    let value = remote
        .get_or(Some(Value::from("override")))
        .unwrap()
        .value()
        .unwrap();
    assert_eq!(value, Value::from("override"));
    assert_eq!(proxy.stats().sent, 0);
}

#[test]
fn test_owner_errors_raise_on_the_caller() {
    let proxy = Proxy::new(Value::Map(Default::default()));
    let remote = proxy.handle();
    proxy.listen_(true).unwrap();

    remote.set_item("a", 1).unwrap();
    let err = remote.item("b").unwrap().get_().unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::KeyError));
    match err {
        ProxyError::Remote(remote_err) => assert_eq!(remote_err.op_index, Some(0)),
        other => panic!("expected remote error, got {:?}", other),
    }

    assert!(remote.contains("a").unwrap());
    proxy.stop_listen_().unwrap();
}

#[test]
fn test_custom_object_mutations_land_on_owner() {
    let proxy = Proxy::new(Account::new("ada"));
    let remote = proxy.handle();

    proxy
        .scope(true, |_| {
            let balance = remote
                .call_method("deposit", vec![Value::Int(40)], Kwargs::new())?
                .value()?;
            assert_eq!(balance, Value::Int(40));

            remote
                .attr("tags")?
                .call_method("append", vec![Value::from("vip")], Kwargs::new())?;
            remote.set_attr("owner", "grace")?;

            let err = remote
                .call_method("deposit", vec![Value::Int(-1)], Kwargs::new())
                .unwrap_err();
            assert_eq!(err.remote_kind(), Some(ErrorKind::ValueError));

            let err = remote.attr("missing")?.get_().unwrap_err();
            assert_eq!(err.remote_kind(), Some(ErrorKind::AttributeError));
            Ok(())
        })
        .unwrap();

    let (owner, balance, tags) = proxy
        .with_object(|account| (account.owner.clone(), account.balance, account.tags.clone()))
        .unwrap();
    assert_eq!(owner, "grace");
    assert_eq!(balance, 40);
    assert_eq!(tags, Value::from(vec!["vip"]));
}

#[test]
fn test_root_chain_returns_root_handle() {
    let proxy = Proxy::new(Value::List(vec![]));
    let remote = proxy.handle();
    proxy.listen_(true).unwrap();

    let outcome = remote.root().get_().unwrap();
    assert!(outcome.is_root());
    let root = outcome.into_handle().unwrap();
    assert!(root.view().is_identity());
    assert_eq!(root.len().unwrap(), 0);

    proxy.stop_listen_().unwrap();
}

#[test]
fn test_member_returning_self_resolves_to_root_handle() {
    let proxy = Proxy::new(Account::new("ada"));
    let remote = proxy.handle();
    proxy.listen_(true).unwrap();

    let outcome = remote.attr("me").unwrap().get_().unwrap();
    assert!(outcome.is_root());
    assert!(outcome.into_handle().unwrap().view().is_identity());

    let owner = remote
        .attr("me")
        .unwrap()
        .attr("owner")
        .unwrap()
        .get_()
        .unwrap()
        .value()
        .unwrap();
    assert_eq!(owner, Value::from("ada"));

    proxy.stop_listen_().unwrap();
    assert_eq!(proxy.stats().soft_failures, 0);
}

#[test]
fn test_requests_queued_at_shutdown_are_fulfilled() {
    let proxy = Proxy::new(Value::List(vec![]));
    proxy.listen_(false).unwrap();

    let callers: Vec<_> = (0..3)
        .map(|i| {
            let remote = proxy.handle();
            thread::spawn(move || {
                remote.call_method("append", vec![Value::Int(i)], Kwargs::new())
            })
        })
        .collect();

    wait_for_sent(&proxy, 3);
    proxy.stop_listen_().unwrap();

    for caller in callers {
        let outcome = caller.join().unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Value(Value::Null)));
    }
    let mut items = proxy.with_object(|list| list.clone()).unwrap();
    items.call_method("sort", &[], &Kwargs::new()).unwrap();
    assert_eq!(items, Value::from(vec![0, 1, 2]));
    assert_eq!(proxy.stats().served, 3);
}

#[test]
fn test_requests_queued_at_shutdown_are_cancelled_without_fulfill_final() {
    let proxy = Proxy::builder(Value::List(vec![]))
        .fulfill_final(false)
        .build();
    proxy.listen_(false).unwrap();

    let plain = {
        let remote = proxy.handle();
        thread::spawn(move || remote.len())
    };
    let with_default = {
        let remote = proxy.handle();
        thread::spawn(move || remote.get_or(Some(Value::from("gone")))?.value())
    };

    wait_for_sent(&proxy, 2);
    proxy.stop_listen_().unwrap();

    assert!(matches!(plain.join().unwrap(), Err(ProxyError::Cancelled)));
    assert_eq!(with_default.join().unwrap().unwrap(), Value::from("gone"));
    assert_eq!(proxy.stats().cancelled, 2);
    assert_eq!(proxy.with_object(|list| list.clone()).unwrap(), Value::List(vec![]));
}

#[test]
fn test_unserializable_result_is_empty_when_lenient() {
    let proxy = Proxy::new(Value::List(vec![Opaque::new("Lock", ()).into()]));
    let remote = proxy.handle();
    proxy.listen_(true).unwrap();

    let outcome = remote.item(0).unwrap().get_().unwrap();
    assert!(matches!(outcome, Outcome::Value(Value::Null)));
    // the listener keeps going
    assert_eq!(remote.len().unwrap(), 1);

    proxy.stop_listen_().unwrap();
    assert_eq!(proxy.stats().soft_failures, 1);
}

#[test]
fn test_non_finite_float_result_is_empty_when_lenient() {
    let proxy = Proxy::new(Value::List(vec![Value::Float(f64::NAN), Value::Float(0.5)]));
    let remote = proxy.handle();
    proxy.listen_(true).unwrap();

    let outcome = remote.item(0).unwrap().get_().unwrap();
    assert!(matches!(outcome, Outcome::Value(Value::Null)));
    let half = remote.item(1).unwrap().get_().unwrap().value().unwrap();
    assert_eq!(half, Value::Float(0.5));

    proxy.stop_listen_().unwrap();
    assert_eq!(proxy.stats().soft_failures, 1);
}

#[test]
fn test_unserializable_result_fails_listener_when_strict() {
    let proxy = Proxy::builder(Value::List(vec![Opaque::new("Lock", ()).into()]))
        .serialization(SerializationPolicy::Strict)
        .build();
    let remote = proxy.handle();
    proxy.listen_(true).unwrap();

    let err = remote.item(0).unwrap().get_().unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::SerializationError));

    let err = proxy.stop_listen_().unwrap_err();
    assert!(matches!(err, ProxyError::Serialization { .. }));
    assert!(!proxy.is_listening().unwrap());

    // a fresh listen starts clean
    proxy.listen_(true).unwrap();
    assert_eq!(remote.len().unwrap(), 1);
    proxy.stop_listen_().unwrap();
}

#[test]
fn test_bridge_round_trip() {
    let proxy = Proxy::new(Value::from(vec![3, 1, 2]));
    let addr = proxy.serve_local().unwrap();
    proxy.listen_(true).unwrap();

    let remote = RemoteProxy::connect(addr);
    assert!(remote.wait_until_listening(None, true).unwrap());
    assert_eq!(remote.owner_pid(), Some(std::process::id()));

    remote
        .call_method("append", vec![Value::Int(0)], Kwargs::new())
        .unwrap();
    let mut kwargs = Kwargs::new();
    kwargs.insert("reverse".to_string(), Value::Bool(true));
    let sorted = remote.passto("sorted", vec![], kwargs).unwrap().value().unwrap();
    assert_eq!(sorted, Value::from(vec![3, 2, 1, 0]));
    assert_eq!(remote.len().unwrap(), 4);
    assert!(remote.contains(2).unwrap());

    let err = remote.item(10).unwrap().get_().unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::IndexError));

    proxy.stop_listen_().unwrap();
    assert!(!remote.is_listening().unwrap());
    assert!(matches!(remote.len(), Err(ProxyError::NotListening)));

    proxy.stop_serving().unwrap();
}

/// A list whose first items are each too large for one frame.
fn oversized_list() -> Value {
    let big = "x".repeat(ProxyConfig::MAX_FRAME_SIZE + 1);
    Value::List(vec![Value::Str(big.clone()), Value::Str(big), Value::Int(1)])
}

#[test]
fn test_oversized_reply_over_bridge_is_empty_and_applied_once() {
    let proxy = Proxy::new(oversized_list());
    let addr = proxy.serve_local().unwrap();
    proxy.listen_(true).unwrap();

    let remote = RemoteProxy::connect(addr);
    assert!(remote.wait_until_listening(None, true).unwrap());
    assert_eq!(remote.len().unwrap(), 3);

    // the popped string cannot be sent back, but the pop itself happened
    let outcome = remote
        .call_method("pop", vec![Value::Int(0)], Kwargs::new())
        .unwrap();
    assert!(matches!(outcome, Outcome::Value(Value::Null)));
    assert_eq!(remote.len().unwrap(), 2);

    proxy.stop_listen_().unwrap();
    proxy.stop_serving().unwrap();
    assert_eq!(proxy.stats().soft_failures, 1);
    assert_eq!(proxy.with_object(|list| list.len()).unwrap().unwrap(), 2);
}

#[test]
fn test_oversized_reply_fails_listener_when_strict() {
    let proxy = Proxy::builder(oversized_list())
        .serialization(SerializationPolicy::Strict)
        .build();
    let remote = proxy.handle();
    proxy.listen_(true).unwrap();

    let err = remote.item(0).unwrap().get_().unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::SerializationError));
    let err = proxy.stop_listen_().unwrap_err();
    assert!(matches!(err, ProxyError::Serialization { .. }));
    assert_eq!(proxy.with_object(|list| list.len()).unwrap().unwrap(), 3);
}

#[test]
fn test_unreachable_owner_reads_as_not_listening() {
    let remote = RemoteProxy::connect(unused_addr());
    assert!(!remote.is_listening().unwrap());
    assert!(matches!(remote.get_(), Err(ProxyError::NotListening)));
}

#[test]
fn test_wait_until_listening_times_out() {
    let proxy = Proxy::builder(Value::List(vec![]))
        .wait_timeout(Duration::from_millis(50))
        .build();
    let remote = proxy.handle();

    assert!(!remote.wait_until_listening(None, false).unwrap());
    let err = remote.wait_until_listening(None, true).unwrap_err();
    assert!(matches!(err, ProxyError::Timeout(_)));
}

#[cfg(unix)]
#[test]
fn test_wait_until_listening_notices_owner_exit() {
    let remote = RemoteProxy::connect(unused_addr());
    let mut child = std::process::Command::new("true").spawn().unwrap();

    let err = remote
        .wait_until_listening(Some(&mut child), true)
        .unwrap_err();
    assert!(matches!(err, ProxyError::OwnerExited { code: Some(0), .. }));
}

#[test]
fn test_listen_guard_serves_other_threads() {
    let proxy = Proxy::new(Value::List(vec![]));
    let remote = proxy.handle();
    {
        let _guard = proxy.listening(true).unwrap();
        let caller = thread::spawn(move || {
            remote.call_method("extend", vec![Value::from(vec![1, 2])], Kwargs::new())?;
            remote.len()
        });
        assert_eq!(caller.join().unwrap().unwrap(), 2);
    }
    assert!(!proxy.is_listening().unwrap());
}
