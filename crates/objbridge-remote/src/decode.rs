//! Meta → value.
//!
//! Two directions, two rule sets. [`decode_result`] runs on the calling side
//! and turns object and function metas into proxies. [`decode_argument`]
//! runs on the owning side and turns callback and remote-object references
//! back into the values they stand for.

use tracing::debug;

use crate::client::RemoteClient;
use crate::error::{RemoteError, Result};
use crate::function::Function;
use crate::meta::{ErrorDescriptor, Meta, NamedMeta, Scalar};
use crate::object::PlainObject;
use crate::promise::{spawn_detached, Promise};
use crate::proxy::{HandleKind, RemoteHandle};
use crate::server::RemoteServer;
use crate::value::{ErrorValue, Value};

pub(crate) fn decode_scalar(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Undefined => Value::Undefined,
        Scalar::Null => Value::Null,
        Scalar::Boolean(b) => Value::Bool(b),
        Scalar::Number(n) => Value::Number(n),
        Scalar::Bigint(n) => Value::BigInt(n),
        Scalar::String(s) => Value::String(s),
        Scalar::Date(ms) => Value::Date(ms),
    }
}

fn decode_error(
    descriptor: ErrorDescriptor,
    members: Vec<NamedMeta>,
    decode: &mut impl FnMut(Meta) -> Result<Value>,
) -> Result<ErrorValue> {
    let mut error = ErrorValue::new(descriptor.message).with_name(descriptor.name);
    error.stack = descriptor.stack;
    for member in members {
        error.properties.push((member.name, decode(member.value)?));
    }
    Ok(error)
}

fn decode_record(
    name: String,
    members: Vec<NamedMeta>,
    decode: &mut impl FnMut(Meta) -> Result<Value>,
) -> Result<Value> {
    let mut object = PlainObject::new().with_class_name(name);
    for member in members {
        object = object.with_property(member.name, decode(member.value)?);
    }
    Ok(object.into_value())
}

/// Decode a value sent by the owning side.
///
/// Objects and functions become [`RemoteHandle`]s, shared through the
/// client's cache. An `exception` meta is returned as an error. A promise
/// meta yields a local promise settled through the remote `then`.
pub fn decode_result(meta: Meta, client: &RemoteClient) -> Result<Value> {
    let mut recurse = |meta: Meta| decode_result(meta, client);
    match meta {
        Meta::Value { value } => Ok(decode_scalar(value)),
        Meta::Buffer { value } => Ok(Value::Bytes(value.into())),
        Meta::Array { members } => members
            .into_iter()
            .map(recurse)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Meta::Error { value, members } => {
            decode_error(value, members, &mut recurse).map(Value::Error)
        }
        Meta::Exception { value } => match recurse(*value)? {
            Value::Error(error) => Err(RemoteError::from_error_value(error)),
            other => Err(RemoteError::Thrown(ErrorValue::from_thrown(other))),
        },
        Meta::Promise { then } => match recurse(*then)? {
            Value::Remote(then) if then.is_function() => Ok(Value::Promise(remote_promise(then))),
            other => Err(RemoteError::Protocol(format!(
                "promise meta carries a {} instead of a then function",
                other.type_name()
            ))),
        },
        Meta::Object(meta) => Ok(Value::Remote(client.handle_for(meta, HandleKind::Object))),
        Meta::Function(meta) => Ok(Value::Remote(client.handle_for(meta, HandleKind::Function))),
        Meta::Record { name, members } => decode_record(name, members, &mut recurse),
        other @ (Meta::Callback { .. } | Meta::RemoteObject { .. }) => Err(RemoteError::Protocol(
            format!("{} meta is not valid in a result", other.kind()),
        )),
    }
}

/// Decode a call argument on the owning side.
///
/// Callbacks become local functions that forward to the caller; remote
/// object references resolve through the server's registry; records become
/// [`PlainObject`]s.
pub fn decode_argument(meta: Meta, server: &RemoteServer, context_id: &str) -> Result<Value> {
    let mut recurse = |meta: Meta| decode_argument(meta, server, context_id);
    match meta {
        Meta::Value { value } => Ok(decode_scalar(value)),
        Meta::Buffer { value } => Ok(Value::Bytes(value.into())),
        Meta::Array { members } => members
            .into_iter()
            .map(recurse)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Meta::Error { value, members } => {
            decode_error(value, members, &mut recurse).map(Value::Error)
        }
        Meta::Record { name, members } => decode_record(name, members, &mut recurse),
        Meta::Callback {
            id,
            length,
            location,
        } => Ok(Value::Function(server.remote_callback(
            context_id, id, length, &location,
        ))),
        Meta::RemoteObject { id } => server.objects().get(id).ok_or_else(|| {
            RemoteError::Protocol(format!("argument refers to missing remote object {id}"))
        }),
        Meta::Promise { then } => match recurse(*then)? {
            Value::Function(then) => Ok(Value::Promise(local_promise(then))),
            other => Err(RemoteError::Protocol(format!(
                "promise meta carries a {} instead of a then callback",
                other.type_name()
            ))),
        },
        other @ (Meta::Object(_) | Meta::Function(_) | Meta::Exception { .. }) => {
            Err(RemoteError::Protocol(format!(
                "{} meta is not valid as an argument",
                other.kind()
            )))
        }
    }
}

/// Settle a local promise through a `then` owned by the peer.
///
/// `then` is invoked exactly once, with a fulfill and a reject callback.
/// Once the promise settles both callbacks are forgotten and `then` itself
/// is released on the peer.
fn remote_promise(then: RemoteHandle) -> Promise {
    let (resolver, promise) = Promise::channel();
    let fulfill = resolver.fulfill_function();
    let reject = resolver.reject_function();
    let settled = promise.clone();
    spawn_detached(async move {
        let client = then.client().clone();
        let handlers = vec![Value::Function(fulfill.clone()), Value::Function(reject.clone())];
        if let Err(err) = then.invoke(handlers).await {
            debug!(error = %err, "remote then failed");
            resolver.reject(err.into());
        }
        let _ = settled.await;
        client.release_callback(&fulfill);
        client.release_callback(&reject);
        if let Err(err) = client.release(&then).await {
            debug!(id = then.id(), error = %err, "releasing remote then failed");
        }
    });
    promise
}

/// Settle a local promise through a `then` callback owned by the caller.
fn local_promise(then: Function) -> Promise {
    let (resolver, promise) = Promise::channel();
    let handlers = vec![
        Value::Function(resolver.fulfill_function()),
        Value::Function(resolver.reject_function()),
    ];
    match then.call(handlers) {
        Ok(Value::Promise(delivery)) => spawn_detached(async move {
            if let Err(err) = delivery.await {
                resolver.reject(err);
            }
        }),
        Ok(_) => {}
        Err(err) => {
            resolver.reject(err);
        }
    }
    promise
}
