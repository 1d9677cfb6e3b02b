//! The calling side of a session.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use objbridge_rpc::{ErrorObject, Requests, RpcApi, RpcConfig, RpcError, RpcRequest};
use objbridge_transport::Duplex;

use crate::cache::RemoteObjectCache;
use crate::decode::decode_result;
use crate::encode::EncodeContext;
use crate::error::{Operation, RemoteError, Result};
use crate::function::Function;
use crate::meta::{CallbackId, Meta, ObjectId, ObjectMeta};
use crate::proxy::{HandleKind, RemoteHandle};
use crate::registry::CallbackRegistry;
use crate::server::{CallbackHandler, RemoteServer};
use crate::value::{ErrorValue, Value};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

fn next_context(prefix: &str) -> String {
    format!("{prefix}-{}", NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
}

/// How a client reaches the owning side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComMode {
    /// Same process, direct calls into a [`RemoteServer`].
    Sync,
    /// Request/response messages over a duplex channel.
    Async,
    /// No peer. Every remote operation fails.
    Detached,
}

enum Com {
    Detached,
    Local { server: Arc<RemoteServer> },
    Rpc(RpcApi),
}

struct ClientInner {
    context_id: String,
    com: Com,
    callbacks: CallbackRegistry,
    cache: RemoteObjectCache,
}

/// Session object on the calling side.
///
/// Owns the callback registry and the proxy cache for one connection.
/// Clones share the session.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<ClientInner>,
}

impl RemoteClient {
    /// Open a session over `duplex`.
    ///
    /// Must be called from within a tokio runtime: a task is spawned to
    /// serve `invokeCallback` requests from the peer.
    pub fn connect(duplex: Duplex) -> Self {
        Self::connect_with_config(duplex, RpcConfig::default())
    }

    pub fn connect_with_config(duplex: Duplex, config: RpcConfig) -> Self {
        let (rpc, requests) = RpcApi::with_config(duplex, config);
        let client = Self::with_com(next_context("client"), Com::Rpc(rpc));
        tokio::spawn(callback_loop(Arc::downgrade(&client.inner), requests));
        client
    }

    /// An in-process session against `server`, without serialization
    /// through a channel.
    pub fn local(server: &Arc<RemoteServer>) -> Self {
        let client = Self::with_com(
            next_context("local"),
            Com::Local {
                server: Arc::clone(server),
            },
        );
        server.set_callback_handler(
            &client.inner.context_id,
            Arc::new(LocalCallbackHandler {
                client: Arc::downgrade(&client.inner),
            }),
        );
        client
    }

    /// A session with no peer. Values still encode and decode structurally.
    pub fn detached() -> Self {
        Self::with_com(next_context("detached"), Com::Detached)
    }

    fn with_com(context_id: String, com: Com) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                context_id,
                com,
                callbacks: CallbackRegistry::new(),
                cache: RemoteObjectCache::new(),
            }),
        }
    }

    pub fn mode(&self) -> ComMode {
        match self.inner.com {
            Com::Detached => ComMode::Detached,
            Com::Local { .. } => ComMode::Sync,
            Com::Rpc(_) => ComMode::Async,
        }
    }

    pub fn context_id(&self) -> &str {
        &self.inner.context_id
    }

    pub fn cache(&self) -> &RemoteObjectCache {
        &self.inner.cache
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.inner.callbacks
    }

    /// Number of calls waiting for a response. Always zero outside async mode.
    pub fn pending_calls(&self) -> usize {
        match &self.inner.com {
            Com::Rpc(rpc) => rpc.pending_count(),
            _ => 0,
        }
    }

    /// Fetch a root object the peer exposed under `name`.
    pub async fn get_remote(&self, name: &str) -> Result<Value> {
        let meta = match &self.inner.com {
            Com::Detached => return Err(RemoteError::MissingCapability("getRemote")),
            Com::Local { server } => server.get_remote(self.context_id(), name)?,
            Com::Rpc(rpc) => {
                self.rpc_call(rpc, Operation::GetRemote, vec![JsonValue::from(name)])
                    .await?
            }
        };
        self.decode(meta)
    }

    pub async fn get_remote_member(&self, id: ObjectId, name: &str) -> Result<Value> {
        let meta = match &self.inner.com {
            Com::Detached => return Err(RemoteError::MissingCapability("getRemoteMember")),
            Com::Local { server } => server.get_member(self.context_id(), id, name)?,
            Com::Rpc(rpc) => {
                self.rpc_call(
                    rpc,
                    Operation::GetMember,
                    vec![JsonValue::from(id), JsonValue::from(name)],
                )
                .await?
            }
        };
        self.decode(meta)
    }

    pub async fn set_remote_member(&self, id: ObjectId, name: &str, value: Value) -> Result<()> {
        let value = self.encode_args(std::slice::from_ref(&value))?.remove(0);
        match &self.inner.com {
            Com::Detached => Err(RemoteError::MissingCapability("setRemoteMember")),
            Com::Local { server } => server.set_member(self.context_id(), id, name, value),
            Com::Rpc(rpc) => {
                let params = vec![
                    JsonValue::from(id),
                    JsonValue::from(name),
                    serde_json::to_value(value)?,
                ];
                self.rpc_send(rpc, Operation::SetMember, params).await?;
                Ok(())
            }
        }
    }

    pub async fn call_remote_member(
        &self,
        id: ObjectId,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let args = self.encode_args(&args)?;
        let meta = match &self.inner.com {
            Com::Detached => return Err(RemoteError::MissingCapability("callRemoteMember")),
            Com::Local { server } => server.call_member(self.context_id(), id, method, args)?,
            Com::Rpc(rpc) => {
                let params = vec![
                    JsonValue::from(id),
                    JsonValue::from(method),
                    serde_json::to_value(args)?,
                ];
                self.rpc_call(rpc, Operation::CallMember, params).await?
            }
        };
        self.decode(meta)
    }

    pub async fn call_remote_member_constructor(
        &self,
        id: ObjectId,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let args = self.encode_args(&args)?;
        let meta = match &self.inner.com {
            Com::Detached => {
                return Err(RemoteError::MissingCapability("callRemoteMemberConstructor"))
            }
            Com::Local { server } => {
                server.member_constructor(self.context_id(), id, method, args)?
            }
            Com::Rpc(rpc) => {
                let params = vec![
                    JsonValue::from(id),
                    JsonValue::from(method),
                    serde_json::to_value(args)?,
                ];
                self.rpc_call(rpc, Operation::MemberConstructor, params)
                    .await?
            }
        };
        self.decode(meta)
    }

    pub async fn call_remote_function(&self, id: ObjectId, args: Vec<Value>) -> Result<Value> {
        let args = self.encode_args(&args)?;
        let meta = match &self.inner.com {
            Com::Detached => return Err(RemoteError::MissingCapability("callRemoteFunction")),
            Com::Local { server } => server.function_call(self.context_id(), id, args)?,
            Com::Rpc(rpc) => {
                let params = vec![JsonValue::from(id), serde_json::to_value(args)?];
                self.rpc_call(rpc, Operation::FunctionCall, params).await?
            }
        };
        self.decode(meta)
    }

    pub async fn call_remote_constructor(&self, id: ObjectId, args: Vec<Value>) -> Result<Value> {
        let args = self.encode_args(&args)?;
        let meta = match &self.inner.com {
            Com::Detached => return Err(RemoteError::MissingCapability("callRemoteConstructor")),
            Com::Local { server } => server.constructor_call(self.context_id(), id, args)?,
            Com::Rpc(rpc) => {
                let params = vec![JsonValue::from(id), serde_json::to_value(args)?];
                self.rpc_call(rpc, Operation::ConstructorCall, params)
                    .await?
            }
        };
        self.decode(meta)
    }

    /// Encode call arguments. Functions are registered as callbacks.
    pub fn encode_args(&self, args: &[Value]) -> Result<Vec<Meta>> {
        EncodeContext::argument(&self.inner.context_id, &self.inner.callbacks).encode_all(args)
    }

    /// Decode a value sent by the owning side.
    pub fn decode(&self, meta: Meta) -> Result<Value> {
        decode_result(meta, self)
    }

    /// Run a callback the peer asked for.
    ///
    /// Returns once the callback has been called; its result is not sent
    /// back.
    pub fn invoke_callback(&self, id: CallbackId, args: Vec<Meta>) -> Result<bool> {
        let callback = self
            .inner
            .callbacks
            .get(id)
            .ok_or_else(|| RemoteError::dispatch(Operation::InvokeCallback, id, None))?;
        let args = args
            .into_iter()
            .map(|meta| self.decode(meta))
            .collect::<Result<Vec<_>>>()?;
        debug!(callback = id, location = callback.location(), "invoking callback");
        callback.call(args).map_err(RemoteError::Thrown)?;
        Ok(true)
    }

    /// Tell the owning side this session no longer needs `handle`.
    ///
    /// The handle stops resolving from the cache; further operations on it
    /// fail with a dispatch error once no other session holds the object.
    pub async fn release(&self, handle: &RemoteHandle) -> Result<bool> {
        let id = handle.id();
        self.inner.cache.remove(id);
        match &self.inner.com {
            Com::Detached => Ok(false),
            Com::Local { server } => Ok(server.release(self.context_id(), id)),
            Com::Rpc(rpc) => {
                let released = self
                    .rpc_send(rpc, Operation::Release, vec![JsonValue::from(id)])
                    .await?;
                Ok(released.as_bool().unwrap_or(false))
            }
        }
    }

    /// Forget a callback registered by an earlier call.
    pub fn release_callback(&self, callback: &Function) -> bool {
        match self.inner.callbacks.id_of(callback) {
            Some(id) => self.inner.callbacks.remove(id).is_some(),
            None => false,
        }
    }

    pub(crate) fn handle_for(&self, meta: ObjectMeta, kind: HandleKind) -> RemoteHandle {
        let id = meta.id;
        self.inner
            .cache
            .get_or_insert_with(id, || RemoteHandle::new(meta, kind, self.clone()))
    }

    async fn rpc_send(
        &self,
        rpc: &RpcApi,
        operation: Operation,
        params: Vec<JsonValue>,
    ) -> Result<JsonValue> {
        let method = operation.method_name();
        match rpc.call(method, params).await {
            Ok(result) => Ok(result),
            Err(RpcError::Remote(error)) => Err(self.remote_failure(error)),
            Err(err) => Err(err.into()),
        }
    }

    async fn rpc_call(
        &self,
        rpc: &RpcApi,
        operation: Operation,
        params: Vec<JsonValue>,
    ) -> Result<Meta> {
        let result = self.rpc_send(rpc, operation, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Rebuild the error the peer raised, falling back to its message.
    fn remote_failure(&self, error: ErrorObject) -> RemoteError {
        let ErrorObject { message, data } = error;
        let meta = data.and_then(|data| serde_json::from_value::<Meta>(data).ok());
        match meta.map(|meta| self.decode(meta)) {
            Some(Err(err)) => err,
            _ => RemoteError::Thrown(ErrorValue::new(message)),
        }
    }
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("context_id", &self.inner.context_id)
            .field("mode", &self.mode())
            .field("callbacks", &self.inner.callbacks.len())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

/// Delivers callbacks straight into an in-process client.
struct LocalCallbackHandler {
    client: Weak<ClientInner>,
}

impl CallbackHandler for LocalCallbackHandler {
    fn invoke(&self, callback_id: CallbackId, args: Vec<Meta>) -> BoxFuture<'static, Result<bool>> {
        let outcome = match self.client.upgrade() {
            Some(inner) => RemoteClient { inner }.invoke_callback(callback_id, args),
            None => Err(RemoteError::dispatch(
                Operation::InvokeCallback,
                callback_id,
                None,
            )),
        };
        future::ready(outcome).boxed()
    }
}

/// Serve the requests the peer sends to this side: callback invocations.
///
/// Ends when the channel closes or the last client clone is dropped. The
/// session's callbacks and cached proxies are torn down on exit.
async fn callback_loop(client: Weak<ClientInner>, mut requests: Requests) {
    while let Some(request) = requests.next().await {
        let Some(inner) = client.upgrade() else {
            break;
        };
        let client = RemoteClient { inner };
        let RpcRequest { id, method, params } = request;
        debug!(id, method = %method, context = client.context_id(), "inbound request");

        let outcome = if method == Operation::InvokeCallback.method_name() {
            callback_params(params).and_then(|(callback, args)| client.invoke_callback(callback, args))
        } else {
            Err(RemoteError::Protocol(format!(
                "unexpected method '{method}' on the calling side"
            )))
        };

        let Com::Rpc(rpc) = &client.inner.com else {
            break;
        };
        let sent = match outcome {
            Ok(delivered) => rpc.respond(id, JsonValue::Bool(delivered)),
            Err(err) => rpc.respond_error(id, client_error_object(&client, &err)),
        };
        if let Err(err) = sent {
            warn!(id, error = %err, "could not answer request");
            break;
        }
    }

    if let Some(inner) = client.upgrade() {
        debug!(context = %inner.context_id, "session closed");
        inner.callbacks.clear();
        inner.cache.clear();
    }
}

fn callback_params(params: Vec<JsonValue>) -> Result<(CallbackId, Vec<Meta>)> {
    let mut params = params.into_iter();
    let raw_id = params.next().unwrap_or(JsonValue::Null);
    let id = raw_id.as_u64().ok_or_else(|| {
        RemoteError::dispatch(Operation::InvokeCallback, raw_id.to_string(), None)
    })?;
    let args = match params.next() {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(raw) => serde_json::from_value(raw)?,
    };
    Ok((id, args))
}

fn client_error_object(client: &RemoteClient, error: &RemoteError) -> ErrorObject {
    let data = EncodeContext::detached(client.context_id())
        .encode_exception(&error.to_error_value())
        .ok()
        .and_then(|meta| serde_json::to_value(meta).ok());
    match data {
        Some(data) => ErrorObject::new(error.to_string()).with_data(data),
        None => ErrorObject::new(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PlainObject;

    fn server_with_foo() -> Arc<RemoteServer> {
        let server = RemoteServer::new();
        server.expose(
            "foo",
            PlainObject::new()
                .with_class_name("Foo")
                .with_property("age", 100)
                .with_method("getNumber", 0, |_| Ok(Value::from(7))),
        );
        server
    }

    #[tokio::test]
    async fn test_modes() {
        let server = server_with_foo();
        assert_eq!(RemoteClient::local(&server).mode(), ComMode::Sync);
        assert_eq!(RemoteClient::detached().mode(), ComMode::Detached);

        let (a, _b) = objbridge_transport::memory::pair();
        assert_eq!(RemoteClient::connect(a).mode(), ComMode::Async);
    }

    #[tokio::test]
    async fn test_detached_names_missing_capability() {
        let client = RemoteClient::detached();
        let err = client.get_remote_member(1, "x").await.unwrap_err();
        assert!(matches!(err, RemoteError::MissingCapability("getRemoteMember")));
        let err = client.call_remote_function(1, vec![]).await.unwrap_err();
        assert!(matches!(err, RemoteError::MissingCapability("callRemoteFunction")));
    }

    #[tokio::test]
    async fn test_local_session_round_trip() {
        let server = server_with_foo();
        let client = RemoteClient::local(&server);

        let foo = client.get_remote("foo").await.unwrap();
        let foo = foo.as_remote().unwrap();
        assert_eq!(foo.class_name(), "Foo");
        assert_eq!(foo.get("age").await.unwrap(), Value::from(100));
        assert_eq!(foo.call("getNumber", vec![]).await.unwrap(), Value::from(7));

        let again = client.get_remote("foo").await.unwrap();
        assert!(again.as_remote().unwrap().ptr_eq(foo));
        assert_eq!(client.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_release_drops_the_cached_handle() {
        let server = server_with_foo();
        let client = RemoteClient::local(&server);
        let foo = client.get_remote("foo").await.unwrap();
        let foo = foo.as_remote().unwrap().clone();

        assert!(client.release(&foo).await.unwrap());
        assert!(client.cache().get(foo.id()).is_none());
        let err = foo.get("age").await.unwrap_err();
        assert!(err.is_dispatch());
    }

    #[test]
    fn test_unknown_callback_is_a_dispatch_error() {
        let client = RemoteClient::detached();
        let err = client.invoke_callback(404, vec![]).unwrap_err();
        assert!(err.is_dispatch());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_callbacks_run_with_decoded_args() {
        let client = RemoteClient::detached();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = Function::new("record", 1, move |args| {
            sink.lock().unwrap().extend(args);
            Ok(Value::Undefined)
        });
        let metas = client.encode_args(&[Value::Function(callback.clone())]).unwrap();
        let Meta::Callback { id, .. } = metas[0] else {
            panic!("expected callback meta");
        };

        let args = EncodeContext::detached("x")
            .encode_all(&[Value::from("hello")])
            .unwrap();
        assert!(client.invoke_callback(id, args).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("hello")]);

        assert!(client.release_callback(&callback));
        assert!(!client.release_callback(&callback));
        assert!(client.callbacks().is_empty());
    }

    #[test]
    fn test_callback_params() {
        let (id, args) = callback_params(vec![JsonValue::from(3), serde_json::json!([])]).unwrap();
        assert_eq!(id, 3);
        assert!(args.is_empty());
        assert!(callback_params(vec![JsonValue::from("x")]).unwrap_err().is_dispatch());
    }
}
