//! The owner side: the real object, its mailbox and the listener.

use super::guard::ListenGuard;
use super::worker::Worker;
use super::{Answer, Handle, RemoteProxy};
use crate::channel::local::{self, Envelope, Link, Mailbox};
use crate::channel::{Bridge, BridgeHandle, ChannelStatsSnapshot, Reply, RequestBody, Response, Serializer};
use crate::config::{ProxyConfig, ProxyOptions, SerializationPolicy};
use crate::error::{ProxyError, RemoteError, Result};
use crate::functions::FunctionTable;
use crate::resolvable::Resolvable;
use crate::value::{Kwargs, Value};
use crate::view::{resolve_view, Op, Resolved, View};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// State shared by every handle extended from one owner.
pub(crate) struct Shared<T> {
    object: Mutex<T>,
    link: Arc<Link>,
    mailbox: Mailbox,
    functions: FunctionTable,
    options: ProxyOptions,
    worker: Mutex<Option<Worker>>,
    bridge: Mutex<Option<BridgeHandle>>,
}

impl<T: Resolvable> Shared<T> {
    fn lock_object(&self) -> Result<MutexGuard<'_, T>> {
        self.object
            .lock()
            .map_err(|_| ProxyError::LockPoisoned("proxied object"))
    }

    fn lock_worker(&self) -> Result<MutexGuard<'_, Option<Worker>>> {
        self.worker
            .lock()
            .map_err(|_| ProxyError::LockPoisoned("listener worker"))
    }

    fn lock_bridge(&self) -> Result<MutexGuard<'_, Option<BridgeHandle>>> {
        self.bridge
            .lock()
            .map_err(|_| ProxyError::LockPoisoned("bridge"))
    }

    fn resolve(&self, ops: &[Op]) -> Result<Reply> {
        let mut object = self.lock_object()?;
        Ok(match resolve_view(ops, &mut *object, &self.functions) {
            Ok(Resolved::Root) => Reply::SelfRef,
            Ok(Resolved::Value(value)) => Reply::Value { value },
            Err(error) => {
                debug!("chain failed on owner: {}", error);
                Reply::Error { error }
            }
        })
    }

    fn send(reply: oneshot::Sender<Vec<u8>>, bytes: Vec<u8>) {
        if reply.send(bytes).is_err() {
            debug!("requester went away before the reply was ready");
        }
    }

    /// Answer one queued request: resolve it when `fulfill`, cancel it
    /// otherwise.
    ///
    /// Resolution errors travel back in the reply. A reply that cannot be
    /// serialized, or that would not fit in one frame, follows the
    /// serialization policy. The only errors returned here are strict-mode
    /// serialization failures and poisoned locks.
    fn answer(&self, envelope: Envelope, fulfill: bool) -> Result<()> {
        let serializer: &dyn Serializer = &*self.options.serializer;
        let stats = self.link.stats();

        let request = match serializer.deserialize_request(&envelope.frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("malformed request frame: {}", e);
                stats.record_rejected();
                let response = Response::error(0, RemoteError::protocol(e.to_string()));
                Self::send(envelope.reply, serializer.try_serialize_response(&response)?);
                return Ok(());
            }
        };

        let id = request.id;
        let reply = if !fulfill {
            stats.record_cancelled();
            Reply::Cancelled
        } else {
            stats.record_served();
            match request.body {
                RequestBody::Resolve { ops } => self.resolve(&ops)?,
                RequestBody::Status => Reply::Status {
                    listening: self.link.is_listening()?,
                    pid: self.link.pid(),
                },
            }
        };

        let encoded = serializer
            .try_serialize_response(&Response::new(id, reply))
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                if bytes.len() > ProxyConfig::MAX_FRAME_SIZE {
                    return Err(format!(
                        "reply of {} bytes exceeds the {} byte frame limit",
                        bytes.len(),
                        ProxyConfig::MAX_FRAME_SIZE
                    ));
                }
                Ok(bytes)
            });
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(message) => {
                stats.record_soft_failure();
                if self.options.is_strict() {
                    let response = Response::error(id, RemoteError::serialization(message.clone()));
                    Self::send(envelope.reply, serializer.try_serialize_response(&response)?);
                    return Err(ProxyError::Serialization { message });
                }
                warn!("reply to request {} sent empty: {}", id, message);
                serializer.try_serialize_response(&Response::new(id, Reply::Empty))?
            }
        };
        Self::send(envelope.reply, bytes);
        Ok(())
    }

    pub(crate) fn poll(&self) -> Result<bool> {
        let Some(envelope) = self.mailbox.try_next()? else {
            return Ok(false);
        };
        self.answer(envelope, true)?;
        Ok(true)
    }

    pub(crate) fn process_requests(&self) -> Result<usize> {
        let mut count = 0;
        while self.poll()? {
            count += 1;
        }
        Ok(count)
    }

    /// Answer everything still queued. Only valid once the flag is down.
    fn drain(&self, fulfill: bool) -> usize {
        let mut count = 0;
        loop {
            let envelope = match self.mailbox.try_next() {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(e) => {
                    error!("cannot drain queued requests: {}", e);
                    break;
                }
            };
            if let Err(e) = self.answer(envelope, fulfill) {
                warn!("queued request failed during shutdown: {}", e);
            }
            count += 1;
        }
        count
    }

    /// Stop listening after the background listener failed, cancelling what
    /// is queued so no caller waits on a listener that is gone.
    pub(crate) fn abandon(&self) {
        if let Err(e) = self.link.set_listening(false) {
            error!("cannot lower the listening flag: {}", e);
        }
        let cancelled = self.drain(false);
        if cancelled > 0 {
            warn!("cancelled {} queued request(s) after listener failure", cancelled);
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Ok(worker) = self.worker.get_mut() {
            if let Some(worker) = worker.take() {
                worker.cancel();
            }
        }
        let _ = self.link.set_listening(false);
        // Unblock anyone still waiting on a queued request.
        while let Ok(Some(envelope)) = self.mailbox.try_next() {
            let Ok(request) = self.options.serializer.deserialize_request(&envelope.frame) else {
                continue;
            };
            let response = Response::new(request.id, Reply::Cancelled);
            if let Ok(bytes) = self.options.serializer.try_serialize_response(&response) {
                let _ = envelope.reply.send(bytes);
            }
        }
    }
}

/// Owner of a proxied object.
///
/// Cloning is cheap: clones (and every handle extended from them) share the
/// object, the channel and the listener.
///
/// # Example
///
/// ```rust
/// use remoteobj::{Handle, Kwargs, Proxy, Value};
///
/// let proxy = Proxy::new(Value::List(vec![]));
/// let remote = proxy.handle();
///
/// proxy.scope(true, |_| {
///     remote.call_method("append", vec![Value::Int(5)], Kwargs::new())?;
///     assert_eq!(remote.len()?, 1);
///     Ok(())
/// })
/// .unwrap();
/// ```
pub struct Proxy<T> {
    shared: Arc<Shared<T>>,
    view: View,
}

impl<T> std::fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

impl<T> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            view: self.view.clone(),
        }
    }
}

impl<T: Resolvable + Send + 'static> Proxy<T> {
    /// Wrap `object` with default options and the built-in functions.
    pub fn new(object: T) -> Self {
        Self::builder(object).build()
    }

    /// Start configuring a proxy around `object`.
    pub fn builder(object: T) -> ProxyBuilder<T> {
        ProxyBuilder::new(object)
    }

    /// Enter the listening state.
    ///
    /// With `bg`, a worker thread answers requests every poll interval until
    /// [`stop_listen_`](Self::stop_listen_). Without it, the caller drives
    /// the listener with [`poll`](Self::poll) or
    /// [`process_requests`](Self::process_requests).
    pub fn listen_(&self, bg: bool) -> Result<()> {
        let mut worker = self.shared.lock_worker()?;
        if self.shared.link.is_listening()? {
            return Err(ProxyError::AlreadyListening);
        }
        if let Some(previous) = worker.take() {
            // a worker that failed and lowered the flag; surface its error now
            previous.stop()?;
        }
        self.shared.link.set_listening(true)?;
        if bg {
            match Worker::spawn(Arc::downgrade(&self.shared), self.shared.options.poll_interval) {
                Ok(spawned) => *worker = Some(spawned),
                Err(e) => {
                    self.shared.link.set_listening(false)?;
                    return Err(e);
                }
            }
        }
        info!(pid = self.shared.link.pid(), bg, "proxy listening");
        Ok(())
    }

    /// Leave the listening state.
    ///
    /// Lowers the flag, joins the background worker, then answers every
    /// request still queued: resolved when `fulfill_final` is set, cancelled
    /// otherwise. Re-raises the worker's error, if it failed.
    pub fn stop_listen_(&self) -> Result<()> {
        let was_listening = self.shared.link.set_listening(false)?;
        let worker = self.shared.lock_worker()?.take();
        let worker_result = worker.map_or(Ok(()), Worker::stop);
        let drained = self.shared.drain(self.shared.options.fulfill_final);
        if was_listening {
            info!(drained, "proxy stopped listening");
        }
        worker_result
    }

    /// Answer at most one queued request without blocking.
    ///
    /// Returns whether a request was handled.
    pub fn poll(&self) -> Result<bool> {
        self.shared.poll()
    }

    /// Answer queued requests until the queue is empty.
    pub fn process_requests(&self) -> Result<usize> {
        self.shared.process_requests()
    }

    /// Listen until the returned guard is dropped or finished.
    pub fn listening(&self, bg: bool) -> Result<ListenGuard<'_, T>> {
        self.listen_(bg)?;
        Ok(ListenGuard::new(self))
    }

    /// Listen while `body` runs, then stop.
    ///
    /// Always stops listening. A listener failure wins over an error from
    /// `body`, which is logged.
    pub fn scope<R>(&self, bg: bool, body: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        self.listen_(bg)?;
        let result = body(self);
        let stopped = self.stop_listen_();
        match (result, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(listener)) => Err(listener),
            (Err(e), Err(listener)) => {
                warn!("scope body failed while the listener also failed: {}", e);
                Err(listener)
            }
        }
    }

    /// Expose the channel to other processes through a loopback TCP bridge.
    ///
    /// Returns the bound address; pass port 0 to let the OS pick one.
    pub fn serve(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let mut bridge = self.shared.lock_bridge()?;
        if let Some(running) = bridge.as_ref() {
            return Err(ProxyError::Config {
                message: format!("bridge already running on {}", running.addr()),
            });
        }
        let handle = Bridge::start(
            Arc::clone(&self.shared.link),
            Arc::clone(&self.shared.options.serializer),
            addr,
        )?;
        let bound = handle.addr();
        *bridge = Some(handle);
        Ok(bound)
    }

    /// [`serve`](Self::serve) on an OS-assigned loopback port.
    pub fn serve_local(&self) -> Result<SocketAddr> {
        let addr = format!("{}:0", ProxyConfig::DEFAULT_BRIDGE_HOST)
            .parse()
            .map_err(|e| ProxyError::Config {
                message: format!("invalid bridge address: {}", e),
            })?;
        self.serve(addr)
    }

    /// Shut the bridge down, if one is running.
    pub fn stop_serving(&self) -> Result<()> {
        let handle = self.shared.lock_bridge()?.take();
        if let Some(mut handle) = handle {
            handle.shutdown();
            info!("bridge on {} stopped", handle.addr());
        }
        Ok(())
    }

    /// A channel-only handle on this object, for other threads.
    ///
    /// Its requests go through the queue, so something must be listening
    /// for them to be answered.
    pub fn handle(&self) -> RemoteProxy {
        RemoteProxy::local(
            Arc::clone(&self.shared.link),
            self.shared.options.clone(),
        )
        .with_view(self.view.clone())
    }

    /// Run `f` with direct access to the object.
    pub fn with_object<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut object = self.shared.lock_object()?;
        Ok(f(&mut object))
    }

    /// Counters for the requests this owner has seen.
    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.shared.link.stats().snapshot()
    }

    /// Functions that `passto` chains can name.
    pub fn functions(&self) -> &FunctionTable {
        &self.shared.functions
    }

    /// Call a method on the root object: `obj.name(*args, **kwargs)`.
    pub fn invoke(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        self.root().call_method(name, args, kwargs)?.value()
    }
}

impl<T: Resolvable + Send + 'static> Handle for Proxy<T> {
    fn view(&self) -> &View {
        &self.view
    }

    fn with_view(&self, view: View) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            view,
        }
    }

    fn options(&self) -> &ProxyOptions {
        &self.shared.options
    }

    fn fetch(&self, view: &View) -> Result<Answer> {
        if !self.shared.link.is_listening()? {
            return Ok(Answer::NotListening);
        }
        self.shared.link.stats().record_local();
        let mut object = self.shared.lock_object()?;
        match view.resolve(&mut *object, &self.shared.functions) {
            Ok(Resolved::Root) => Ok(Answer::Root),
            Ok(Resolved::Value(value)) => Ok(Answer::Value(value)),
            Err(error) => Err(ProxyError::Remote(error)),
        }
    }

    fn is_listening(&self) -> Result<bool> {
        self.shared.link.is_listening()
    }

    fn owner_pid(&self) -> Option<u32> {
        Some(self.shared.link.pid())
    }
}

/// Builder for [`Proxy`] with custom options and functions.
pub struct ProxyBuilder<T> {
    object: T,
    options: ProxyOptions,
    functions: FunctionTable,
}

impl<T: Resolvable + Send + 'static> ProxyBuilder<T> {
    fn new(object: T) -> Self {
        Self {
            object,
            options: ProxyOptions::default(),
            functions: FunctionTable::with_builtins(),
        }
    }

    /// Replace every option at once.
    pub fn options(mut self, options: ProxyOptions) -> Self {
        self.options = options;
        self
    }

    /// Value returned by `get_` when nobody is listening.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.options.default = Some(value.into());
        self
    }

    /// Resolve calls when they are made instead of deferring them.
    pub fn eager(mut self, eager: bool) -> Self {
        self.options.eager = eager;
        self
    }

    /// Answer requests still queued when listening stops.
    pub fn fulfill_final(mut self, fulfill: bool) -> Self {
        self.options.fulfill_final = fulfill;
        self
    }

    /// What to do with results that cannot be serialized.
    pub fn serialization(mut self, policy: SerializationPolicy) -> Self {
        self.options.serialization = policy;
        self
    }

    /// How often the background listener checks the mailbox.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    /// Give up waiting for a listener after `timeout`.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.options.wait_timeout = Some(timeout);
        self
    }

    /// Wire format for requests and replies.
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.options.serializer = serializer;
        self
    }

    /// Replace the whole function table.
    pub fn functions(mut self, functions: FunctionTable) -> Self {
        self.functions = functions;
        self
    }

    /// Register one function usable with `passto`.
    pub fn function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut dyn Resolvable, &[Value], &Kwargs) -> std::result::Result<Value, RemoteError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.register(name, function);
        self
    }

    /// Finish configuration.
    pub fn build(self) -> Proxy<T> {
        let (link, mailbox) = local::channel();
        let shared = Shared {
            object: Mutex::new(self.object),
            link,
            mailbox,
            functions: self.functions,
            options: self.options,
            worker: Mutex::new(None),
            bridge: Mutex::new(None),
        };
        Proxy {
            shared: Arc::new(shared),
            view: View::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{JsonSerializer, Request};
    use crate::error::ErrorKind;
    use crate::proxy::Outcome;

    fn list_proxy() -> Proxy<Value> {
        Proxy::new(Value::List(vec![]))
    }

    #[test]
    fn test_not_listening_without_default_is_an_error() {
        let proxy = list_proxy();
        let err = proxy.len().unwrap_err();
        assert!(matches!(err, ProxyError::NotListening));
    }

    #[test]
    fn test_not_listening_uses_default() {
        let proxy = Proxy::builder(Value::List(vec![]))
            .default_value(Value::List(vec![]))
            .build();
        let value = proxy.get_().unwrap().value().unwrap();
        assert_eq!(value, Value::List(vec![]));

        let value = proxy.get_or(Some(Value::Int(7))).unwrap().value().unwrap();
        assert_eq!(value, Value::Int(7));
    }

    #[test]
    fn test_owner_short_circuits_while_listening() {
        let proxy = list_proxy();
        proxy.listen_(false).unwrap();

        proxy
            .call_method("append", vec![Value::Int(5)], Kwargs::new())
            .unwrap();
        assert_eq!(proxy.len().unwrap(), 1);

        let stats = proxy.stats();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.local, 2);
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_root_chain_yields_root_handle() {
        let proxy = list_proxy();
        proxy.listen_(false).unwrap();
        let outcome = proxy.root().get_().unwrap();
        assert!(outcome.is_root());
        assert!(matches!(outcome.value(), Err(ProxyError::ResolvedToRoot)));
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_listen_twice_is_an_error() {
        let proxy = list_proxy();
        proxy.listen_(false).unwrap();
        assert!(matches!(proxy.listen_(false), Err(ProxyError::AlreadyListening)));
        proxy.stop_listen_().unwrap();
        proxy.listen_(false).unwrap();
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_poll_answers_queued_request() {
        let proxy = list_proxy();
        proxy.listen_(false).unwrap();
        assert!(!proxy.poll().unwrap());

        let request = Request::resolve(vec![Op::Len]);
        let frame = JsonSerializer.try_serialize_request(&request).unwrap();
        let receiver = proxy.shared.link.submit(frame).unwrap().unwrap();

        assert!(proxy.poll().unwrap());
        let bytes = receiver.blocking_recv().unwrap();
        let response = JsonSerializer.deserialize_response(&bytes).unwrap();
        assert_eq!(
            response,
            Response::new(request.id, Reply::Value { value: Value::Int(0) })
        );
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_malformed_frame_gets_protocol_error() {
        let proxy = list_proxy();
        proxy.listen_(false).unwrap();
        let receiver = proxy.shared.link.submit(b"garbage".to_vec()).unwrap().unwrap();

        assert_eq!(proxy.process_requests().unwrap(), 1);
        let bytes = receiver.blocking_recv().unwrap();
        match JsonSerializer.deserialize_response(&bytes).unwrap().reply {
            Reply::Error { error } => assert_eq!(error.kind, ErrorKind::ProtocolError),
            other => panic!("expected protocol error, got {:?}", other),
        }
        assert_eq!(proxy.stats().rejected, 1);
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_stop_cancels_queue_without_fulfill_final() {
        let proxy = Proxy::builder(Value::List(vec![]))
            .fulfill_final(false)
            .build();
        proxy.listen_(false).unwrap();
        let request = Request::resolve(vec![Op::Len]);
        let frame = JsonSerializer.try_serialize_request(&request).unwrap();
        let receiver = proxy.shared.link.submit(frame).unwrap().unwrap();

        proxy.stop_listen_().unwrap();

        let bytes = receiver.blocking_recv().unwrap();
        let response = JsonSerializer.deserialize_response(&bytes).unwrap();
        assert_eq!(response.reply, Reply::Cancelled);
        assert_eq!(proxy.stats().cancelled, 1);
    }

    #[test]
    fn test_lazy_call_is_deferred() {
        let proxy = Proxy::builder(Value::List(vec![])).eager(false).build();
        let outcome = proxy
            .call_method("append", vec![Value::Int(1)], Kwargs::new())
            .unwrap();
        assert!(outcome.is_deferred());

        proxy.listen_(false).unwrap();
        let deferred = outcome.into_handle().unwrap();
        deferred.get_().unwrap();
        deferred.get_().unwrap();
        assert_eq!(proxy.len().unwrap(), 2);
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_custom_function() {
        let proxy = Proxy::builder(Value::from(vec![1, 2, 3]))
            .function("double_len", |target, _args, _kwargs| {
                Ok(Value::from(target.len()? * 2))
            })
            .build();
        proxy.listen_(false).unwrap();
        let value = proxy
            .passto("double_len", vec![], Kwargs::new())
            .unwrap()
            .value()
            .unwrap();
        assert_eq!(value, Value::Int(6));
        assert!(proxy.functions().contains("double_len"));
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_owner_errors_keep_their_kind() {
        let proxy = Proxy::new(Value::Map(Default::default()));
        proxy.listen_(false).unwrap();
        let err = proxy.item("missing").unwrap().get_().unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::KeyError));
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_with_object_and_invoke() {
        let proxy = list_proxy();
        proxy.listen_(false).unwrap();
        proxy
            .invoke("extend", vec![Value::from(vec![3, 1])], Kwargs::new())
            .unwrap();
        proxy.invoke("sort", vec![], Kwargs::new()).unwrap();
        let snapshot = proxy.with_object(|list| list.clone()).unwrap();
        assert_eq!(snapshot, Value::from(vec![1, 3]));
        proxy.stop_listen_().unwrap();
    }

    #[test]
    fn test_serve_twice_is_a_config_error() {
        let proxy = list_proxy();
        let addr = proxy.serve_local().unwrap();
        assert!(addr.ip().is_loopback());
        assert!(matches!(proxy.serve(addr), Err(ProxyError::Config { .. })));
        proxy.stop_serving().unwrap();
    }

    #[test]
    fn test_outcome_value_for_plain_values() {
        let outcome: Outcome<Proxy<Value>> = Outcome::Value(Value::Int(1));
        assert!(!outcome.is_root());
        assert_eq!(outcome.value().unwrap(), Value::Int(1));
    }
}
