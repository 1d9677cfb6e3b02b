//! The owning side: executes operations against exposed objects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use objbridge_rpc::ErrorObject;

use crate::decode::decode_argument;
use crate::encode::EncodeContext;
use crate::error::{Operation, RemoteError, Result};
use crate::function::Function;
use crate::lock;
use crate::meta::{CallbackId, MemberKind, Meta, ObjectId};
use crate::object::{find_member, ObjectRef};
use crate::promise::Promise;
use crate::registry::ObjectRegistry;
use crate::value::{ErrorValue, Value};

/// Delivers callback invocations to the side that owns the callbacks.
///
/// Resolves to whether the invocation was delivered.
pub trait CallbackHandler: Send + Sync {
    fn invoke(&self, callback_id: CallbackId, args: Vec<Meta>) -> BoxFuture<'static, Result<bool>>;
}

/// Dispatcher for remote operations.
///
/// Every operation names a context and an object id. Unknown ids fail with
/// [`RemoteError::Dispatch`]; errors thrown by the target are wrapped in
/// [`RemoteError::Invocation`] with the thrown error kept as the cause. Results
/// are encoded in result mode, so objects they contain are registered and
/// reach the caller as proxies.
pub struct RemoteServer {
    objects: ObjectRegistry,
    exposed: Mutex<HashMap<String, Value>>,
    handlers: Mutex<HashMap<String, Arc<dyn CallbackHandler>>>,
    remote_callbacks: Mutex<HashMap<(String, CallbackId), Function>>,
    bound_methods: Mutex<HashMap<(ObjectId, String), Function>>,
    this: Weak<RemoteServer>,
}

impl RemoteServer {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            objects: ObjectRegistry::new(),
            exposed: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            remote_callbacks: Mutex::new(HashMap::new()),
            bound_methods: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    /// Make `value` reachable by name through `getRemote`.
    pub fn expose(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        debug!(name = %name, "exposing remote root");
        lock(&self.exposed).insert(name, value.into());
    }

    pub fn unexpose(&self, name: &str) -> Option<Value> {
        lock(&self.exposed).remove(name)
    }

    pub fn exposed_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.exposed).keys().cloned().collect();
        names.sort();
        names
    }

    /// Install the handler that delivers callback invocations for one context.
    pub fn set_callback_handler(&self, context_id: &str, handler: Arc<dyn CallbackHandler>) {
        lock(&self.handlers).insert(context_id.to_string(), handler);
    }

    pub fn remove_callback_handler(&self, context_id: &str) -> bool {
        lock(&self.handlers).remove(context_id).is_some()
    }

    pub fn get_remote(&self, context_id: &str, name: &str) -> Result<Meta> {
        let root = lock(&self.exposed)
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::dispatch(Operation::GetRemote, name, None))?;
        self.encode_result(context_id, &root)
    }

    pub fn get_member(&self, context_id: &str, id: ObjectId, name: &str) -> Result<Meta> {
        let target = self.target(Operation::GetMember, id, Some(name))?;
        let value = match &target {
            Value::Object(object) => {
                let value = object
                    .get(name)
                    .map_err(|e| RemoteError::member_access_failed("get", name, e))?;
                match value {
                    Value::Undefined => self.bound_method(id, object, name).unwrap_or(value),
                    value => value,
                }
            }
            Value::Function(f) => f.property(name).cloned().unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        };
        self.encode_result(context_id, &value)
    }

    pub fn set_member(&self, context_id: &str, id: ObjectId, name: &str, value: Meta) -> Result<()> {
        let target = self.target(Operation::SetMember, id, Some(name))?;
        let value = decode_argument(value, self, context_id)?;
        let outcome = match &target {
            Value::Object(object) => object.set(name, value),
            _ => Err(ErrorValue::type_error(format!(
                "Cannot assign to read only property '{name}' of function"
            ))),
        };
        outcome.map_err(|e| RemoteError::member_access_failed("set", name, e))
    }

    pub fn call_member(
        &self,
        context_id: &str,
        id: ObjectId,
        method: &str,
        args: Vec<Meta>,
    ) -> Result<Meta> {
        let target = self.target(Operation::CallMember, id, Some(method))?;
        let args = self.decode_args(context_id, args)?;
        let result = match &target {
            Value::Object(object) => object.call(method, args),
            Value::Function(f) => match f.property(method) {
                Some(Value::Function(member)) => member.call(args),
                _ => Err(ErrorValue::type_error(format!("{method} is not a function"))),
            },
            _ => Err(ErrorValue::type_error(format!("{method} is not a function"))),
        }
        .map_err(|e| RemoteError::method_failed(method, e))?;
        self.encode_result(context_id, &result)
    }

    pub fn member_constructor(
        &self,
        context_id: &str,
        id: ObjectId,
        method: &str,
        args: Vec<Meta>,
    ) -> Result<Meta> {
        let target = self.target(Operation::MemberConstructor, id, Some(method))?;
        let args = self.decode_args(context_id, args)?;
        let result = match &target {
            Value::Object(object) => object.construct(method, args),
            Value::Function(f) => match f.property(method) {
                Some(Value::Function(member)) => member.construct(args),
                _ => Err(ErrorValue::type_error(format!("{method} is not a constructor"))),
            },
            _ => Err(ErrorValue::type_error(format!("{method} is not a constructor"))),
        }
        .map_err(|e| RemoteError::constructor_failed(method, e))?;
        self.encode_result(context_id, &result)
    }

    pub fn function_call(&self, context_id: &str, id: ObjectId, args: Vec<Meta>) -> Result<Meta> {
        let target = self.target(Operation::FunctionCall, id, None)?;
        let args = self.decode_args(context_id, args)?;
        let result = match &target {
            Value::Function(f) => f
                .call(args)
                .map_err(|e| RemoteError::function_failed(f.display_name(), e)),
            other => Err(RemoteError::function_failed(
                other.type_name(),
                ErrorValue::type_error("target is not a function"),
            )),
        }?;
        self.encode_result(context_id, &result)
    }

    pub fn constructor_call(&self, context_id: &str, id: ObjectId, args: Vec<Meta>) -> Result<Meta> {
        let target = self.target(Operation::ConstructorCall, id, None)?;
        let args = self.decode_args(context_id, args)?;
        let result = match &target {
            Value::Function(f) => f
                .construct(args)
                .map_err(|e| RemoteError::constructor_failed(f.display_name(), e)),
            other => Err(RemoteError::constructor_failed(
                other.type_name(),
                ErrorValue::type_error("target is not a constructor"),
            )),
        }?;
        self.encode_result(context_id, &result)
    }

    /// Deliver a callback invocation to the context that owns the callback.
    ///
    /// Arguments are encoded here, before the returned future is polled.
    pub fn invoke_callback(
        &self,
        context_id: &str,
        callback_id: CallbackId,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<bool>> {
        let handler = lock(&self.handlers).get(context_id).cloned();
        let Some(handler) = handler else {
            return future::ready(Err(RemoteError::MissingCapability("callback handler"))).boxed();
        };
        match EncodeContext::result(context_id, &self.objects).encode_all(&args) {
            Ok(metas) => handler.invoke(callback_id, metas),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    /// Drop one context's claim on an object.
    pub fn release(&self, context_id: &str, id: ObjectId) -> bool {
        let removed = self.objects.release(context_id, id);
        if removed {
            lock(&self.bound_methods).retain(|(owner, _), _| *owner != id);
        }
        removed
    }

    /// Forget everything held for a context: registry claims, its callback
    /// handler and the callback forwarders created for it.
    pub fn release_context(&self, context_id: &str) -> usize {
        let released = self.objects.release_context(context_id);
        self.remove_callback_handler(context_id);
        lock(&self.remote_callbacks).retain(|(context, _), _| context != context_id);
        lock(&self.bound_methods).retain(|(owner, _), _| self.objects.get(*owner).is_some());
        debug!(context = context_id, released, "context released");
        released
    }

    /// Route a wire request to the matching operation.
    pub fn dispatch(&self, context_id: &str, method: &str, params: Vec<JsonValue>) -> Result<JsonValue> {
        let operation = Operation::from_method_name(method)
            .ok_or_else(|| RemoteError::Protocol(format!("unknown method '{method}'")))?;
        let mut params = Params {
            operation,
            values: params,
        };

        let meta = match operation {
            Operation::GetRemote => {
                let name = params.string(0)?;
                self.get_remote(context_id, &name)?
            }
            Operation::GetMember => {
                let name = params.string(1)?;
                let id = params.id(0, Some(&name))?;
                self.get_member(context_id, id, &name)?
            }
            Operation::SetMember => {
                let name = params.string(1)?;
                let id = params.id(0, Some(&name))?;
                let value = params.meta(2)?;
                self.set_member(context_id, id, &name, value)?;
                return Ok(JsonValue::Null);
            }
            Operation::CallMember | Operation::MemberConstructor => {
                let name = params.string(1)?;
                let id = params.id(0, Some(&name))?;
                let args = params.metas(2)?;
                if operation == Operation::CallMember {
                    self.call_member(context_id, id, &name, args)?
                } else {
                    self.member_constructor(context_id, id, &name, args)?
                }
            }
            Operation::FunctionCall | Operation::ConstructorCall => {
                let id = params.id(0, None)?;
                let args = params.metas(1)?;
                if operation == Operation::FunctionCall {
                    self.function_call(context_id, id, args)?
                } else {
                    self.constructor_call(context_id, id, args)?
                }
            }
            Operation::Release => {
                let id = params.id(0, None)?;
                return Ok(JsonValue::Bool(self.release(context_id, id)));
            }
            Operation::InvokeCallback => {
                return Err(RemoteError::Protocol(
                    "invokeCallback is served by the side that owns the callbacks".to_string(),
                ));
            }
        };
        Ok(serde_json::to_value(meta)?)
    }

    /// The wire form of a failed operation.
    ///
    /// `data` carries the error as an `exception` meta so the caller can
    /// rebuild it with every property intact.
    pub fn error_object(&self, context_id: &str, error: &RemoteError) -> ErrorObject {
        let data = EncodeContext::result(context_id, &self.objects)
            .encode_exception(&error.to_error_value())
            .and_then(|meta| Ok(serde_json::to_value(meta)?));
        match data {
            Ok(data) => ErrorObject::new(error.to_string()).with_data(data),
            Err(err) => {
                warn!(error = %err, "could not encode error detail");
                ErrorObject::new(error.to_string())
            }
        }
    }

    /// A local function that forwards invocations to a caller-side callback.
    ///
    /// One function per context and callback id. Its result is a promise of
    /// whether the invocation was delivered; a failed delivery is logged
    /// with the callback's creation site.
    pub(crate) fn remote_callback(
        &self,
        context_id: &str,
        callback_id: CallbackId,
        length: usize,
        location: &str,
    ) -> Function {
        let key = (context_id.to_string(), callback_id);
        if let Some(existing) = lock(&self.remote_callbacks).get(&key) {
            return existing.clone();
        }

        let server = self.this.clone();
        let context = context_id.to_string();
        let origin = location.to_string();
        let forwarder = Function::new("callback", length, move |args| {
            let Some(server) = server.upgrade() else {
                return Err(ErrorValue::new("remote server has shut down"));
            };
            let delivery = server.invoke_callback(&context, callback_id, args);
            let origin = origin.clone();
            Ok(Value::Promise(Promise::spawn(async move {
                match delivery.await {
                    Ok(delivered) => Ok(Value::Bool(delivered)),
                    Err(err) => {
                        warn!(
                            callback = callback_id,
                            location = %origin,
                            error = %err,
                            "attempting to call a function in a peer that has been closed or released"
                        );
                        Err(err.into())
                    }
                }
            })))
        })
        .located(location);

        lock(&self.remote_callbacks)
            .entry(key)
            .or_insert(forwarder)
            .clone()
    }

    fn target(&self, operation: Operation, id: ObjectId, member: Option<&str>) -> Result<Value> {
        self.objects
            .get(id)
            .ok_or_else(|| RemoteError::dispatch(operation, id, member))
    }

    fn decode_args(&self, context_id: &str, args: Vec<Meta>) -> Result<Vec<Value>> {
        args.into_iter()
            .map(|meta| decode_argument(meta, self, context_id))
            .collect()
    }

    fn encode_result(&self, context_id: &str, value: &Value) -> Result<Meta> {
        EncodeContext::result(context_id, &self.objects).encode(value)
    }

    /// Methods of custom objects may not be readable as values; hand out a
    /// bound function instead, the same one for every read.
    fn bound_method(&self, id: ObjectId, object: &ObjectRef, name: &str) -> Option<Value> {
        let member = find_member(&**object, name)?;
        if member.kind != MemberKind::Method {
            return None;
        }
        let mut bound = lock(&self.bound_methods);
        let method = bound.entry((id, name.to_string())).or_insert_with(|| {
            let object = object.clone();
            let name = name.to_string();
            Function::new(name.clone(), 0, move |args| object.call(&name, args))
        });
        Some(Value::Function(method.clone()))
    }
}

struct Params {
    operation: Operation,
    values: Vec<JsonValue>,
}

impl Params {
    fn take(&mut self, index: usize) -> JsonValue {
        self.values
            .get_mut(index)
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null)
    }

    fn id(&mut self, index: usize, member: Option<&str>) -> Result<ObjectId> {
        let raw = self.take(index);
        raw.as_u64().ok_or_else(|| {
            let rendered = match &raw {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            RemoteError::dispatch(self.operation, rendered, member)
        })
    }

    fn string(&mut self, index: usize) -> Result<String> {
        match self.take(index) {
            JsonValue::String(s) => Ok(s),
            other => Err(RemoteError::Protocol(format!(
                "{}: parameter {index} should be a string, got {other}",
                self.operation.method_name()
            ))),
        }
    }

    fn meta(&mut self, index: usize) -> Result<Meta> {
        Ok(serde_json::from_value(self.take(index))?)
    }

    fn metas(&mut self, index: usize) -> Result<Vec<Meta>> {
        match self.take(index) {
            JsonValue::Null => Ok(Vec::new()),
            raw => Ok(serde_json::from_value(raw)?),
        }
    }
}
