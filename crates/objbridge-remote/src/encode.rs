//! Value → meta.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{RemoteError, Result};
use crate::function::Function;
use crate::meta::{
    ErrorDescriptor, MemberKind, Meta, NamedMeta, ObjectMember, ObjectMeta, ProtoDescriptor, Scalar,
};
use crate::object::ObjectRef;
use crate::promise::{spawn_detached, Promise};
use crate::registry::{CallbackRegistry, ObjectRegistry};
use crate::value::{ErrorValue, Value};

/// State for encoding one result or one argument list.
///
/// In result mode local objects and functions are registered in the
/// [`ObjectRegistry`] and described by id. In argument mode functions are
/// registered as callbacks and local objects are copied by value; an object
/// reached a second time while encoding the same argument list is replaced
/// by `null`, which breaks cycles. A context with neither registry can only
/// encode values that need no registration.
pub struct EncodeContext<'a> {
    context_id: &'a str,
    objects: Option<&'a ObjectRegistry>,
    callbacks: Option<&'a CallbackRegistry>,
    visited: HashSet<usize>,
}

impl<'a> EncodeContext<'a> {
    /// A context with no registries.
    pub fn detached(context_id: &'a str) -> Self {
        Self {
            context_id,
            objects: None,
            callbacks: None,
            visited: HashSet::new(),
        }
    }

    /// Encode return values for the peer.
    pub fn result(context_id: &'a str, objects: &'a ObjectRegistry) -> Self {
        Self {
            objects: Some(objects),
            ..Self::detached(context_id)
        }
    }

    /// Encode call arguments for the peer.
    pub fn argument(context_id: &'a str, callbacks: &'a CallbackRegistry) -> Self {
        Self {
            callbacks: Some(callbacks),
            ..Self::detached(context_id)
        }
    }

    pub fn context_id(&self) -> &str {
        self.context_id
    }

    pub fn is_argument(&self) -> bool {
        self.callbacks.is_some()
    }

    /// Encode several values sharing one visited set.
    pub fn encode_all(&mut self, values: &[Value]) -> Result<Vec<Meta>> {
        values.iter().map(|value| self.encode(value)).collect()
    }

    pub fn encode(&mut self, value: &Value) -> Result<Meta> {
        let meta = match value {
            Value::Undefined => Meta::undefined(),
            Value::Null => Meta::null(),
            Value::Bool(b) => Meta::scalar(Scalar::Boolean(*b)),
            Value::Number(n) => Meta::scalar(Scalar::Number(*n)),
            Value::BigInt(n) => Meta::scalar(Scalar::Bigint(*n)),
            Value::String(s) => Meta::scalar(Scalar::String(s.clone())),
            Value::Date(ms) => Meta::scalar(Scalar::Date(*ms)),
            Value::Bytes(bytes) => Meta::Buffer {
                value: bytes.to_vec(),
            },
            Value::Array(items) => Meta::Array {
                members: self.encode_all(items)?,
            },
            Value::Error(error) => self.encode_error(error)?,
            Value::Promise(promise) => Meta::Promise {
                then: Box::new(self.encode(&Value::Function(then_function(promise)))?),
            },
            Value::Remote(handle) => Meta::RemoteObject { id: handle.id() },
            Value::Function(f) => match self.callbacks {
                Some(callbacks) => Meta::Callback {
                    id: callbacks.add(f),
                    length: f.length(),
                    location: f.location().to_string(),
                },
                None => Meta::Function(self.register(value, f.name(), function_members(f), None)?),
            },
            Value::Object(object) => {
                if self.is_argument() {
                    self.encode_record(object)?
                } else {
                    let proto = ProtoDescriptor::from_levels(object.prototype());
                    Meta::Object(self.register(value, object.class_name(), object.members(), proto)?)
                }
            }
        };
        Ok(meta)
    }

    /// Wrap an error as a thrown exception.
    pub fn encode_exception(&mut self, error: &ErrorValue) -> Result<Meta> {
        Ok(Meta::Exception {
            value: Box::new(self.encode_error(error)?),
        })
    }

    fn encode_error(&mut self, error: &ErrorValue) -> Result<Meta> {
        let members = error
            .properties
            .iter()
            .map(|(name, value)| {
                Ok(NamedMeta {
                    name: name.clone(),
                    value: self.encode(value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Meta::Error {
            value: ErrorDescriptor {
                name: error.name.clone(),
                message: error.message.clone(),
                stack: error.stack.clone(),
            },
            members,
        })
    }

    fn register(
        &mut self,
        value: &Value,
        name: &str,
        members: Vec<ObjectMember>,
        proto: Option<Box<ProtoDescriptor>>,
    ) -> Result<ObjectMeta> {
        let objects = self
            .objects
            .ok_or(RemoteError::MissingCapability("addObject"))?;
        Ok(ObjectMeta {
            id: objects.add(self.context_id, value),
            name: name.to_string(),
            members,
            proto,
        })
    }

    fn encode_record(&mut self, object: &ObjectRef) -> Result<Meta> {
        if !self.visited.insert(object.addr()) {
            debug!(class = object.class_name(), "object already visited; sending null");
            return Ok(Meta::null());
        }
        let mut members = Vec::new();
        for member in object.members() {
            if !member.enumerable {
                continue;
            }
            let value = object.get(&member.name).map_err(RemoteError::Thrown)?;
            if value.is_undefined() && member.kind == MemberKind::Method {
                continue;
            }
            members.push(NamedMeta {
                value: self.encode(&value)?,
                name: member.name,
            });
        }
        Ok(Meta::Record {
            name: object.class_name().to_string(),
            members,
        })
    }
}

fn function_members(f: &Function) -> Vec<ObjectMember> {
    f.properties()
        .iter()
        .map(|(name, value)| match value {
            Value::Function(_) => ObjectMember::method(name.clone()),
            _ => ObjectMember::accessor(name.clone(), false),
        })
        .collect()
}

/// The `then(fulfill, reject)` function a promise is described by.
///
/// Calling it waits for the promise in the background and then calls
/// whichever handler matches the outcome.
fn then_function(promise: &Promise) -> Function {
    let promise = promise.clone();
    Function::new("then", 2, move |args| {
        let mut args = args.into_iter();
        let on_fulfilled = args.next();
        let on_rejected = args.next();
        let promise = promise.clone();
        spawn_detached(async move {
            let (handler, outcome) = match promise.await {
                Ok(value) => (on_fulfilled, value),
                Err(error) => (on_rejected, Value::Error(error)),
            };
            let delivered = match handler {
                Some(Value::Function(handler)) => match handler.call(vec![outcome]) {
                    Ok(value) => value.settle().await.map(drop),
                    Err(error) => Err(error),
                },
                Some(Value::Remote(handler)) => handler
                    .invoke(vec![outcome])
                    .await
                    .map(drop)
                    .map_err(ErrorValue::from),
                _ => Ok(()),
            };
            if let Err(error) = delivered {
                warn!(error = %error, "failed to deliver promise outcome");
            }
        });
        Ok(Value::Undefined)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PlainObject;
    use bytes::Bytes;

    #[test]
    fn test_scalars_and_composites() {
        let mut ctx = EncodeContext::detached("1");
        let meta = ctx
            .encode(&Value::Array(vec![
                Value::Undefined,
                Value::from(true),
                Value::BigInt(-5),
                Value::Date(1_700_000_000_000),
                Value::Bytes(Bytes::from_static(b"ab")),
            ]))
            .unwrap();
        assert_eq!(
            meta,
            Meta::Array {
                members: vec![
                    Meta::undefined(),
                    Meta::scalar(Scalar::Boolean(true)),
                    Meta::scalar(Scalar::Bigint(-5)),
                    Meta::scalar(Scalar::Date(1_700_000_000_000)),
                    Meta::Buffer {
                        value: b"ab".to_vec()
                    },
                ]
            }
        );
    }

    #[test]
    fn test_missing_capability_fails_fast() {
        let mut ctx = EncodeContext::detached("1");
        let err = ctx.encode(&PlainObject::new().into_value()).unwrap_err();
        assert!(matches!(err, RemoteError::MissingCapability("addObject")));
    }

    #[test]
    fn test_result_mode_registers_objects_with_stable_ids() {
        let objects = ObjectRegistry::new();
        let proto = PlainObject::new().with_method("inherited", 0, |_| Ok(Value::Undefined));
        let object = PlainObject::new()
            .with_class_name("Thing")
            .with_property("size", 3)
            .with_prototype(proto)
            .into_value();

        let mut ctx = EncodeContext::result("1", &objects);
        let first = ctx.encode(&object).unwrap();
        let second = ctx.encode(&object).unwrap();
        let (Meta::Object(a), Meta::Object(b)) = (first, second) else {
            panic!("expected object metas");
        };
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, "Thing");
        assert_eq!(a.members, vec![ObjectMember::accessor("size", true)]);
        assert_eq!(a.proto.unwrap().members[0].name, "inherited");
        assert_eq!(objects.get(a.id), Some(object));
    }

    #[test]
    fn test_argument_mode_callbacks_and_records() {
        let callbacks = CallbackRegistry::new();
        let listener = Function::new("listener", 2, |_| Ok(Value::Undefined));
        let shared = PlainObject::new().with_property("n", 1).into_value();
        let outer = PlainObject::new()
            .with_property("inner", shared.clone())
            .with_property("again", shared.clone())
            .into_value();

        let mut ctx = EncodeContext::argument("1", &callbacks);
        let metas = ctx
            .encode_all(&[Value::Function(listener.clone()), outer])
            .unwrap();

        match &metas[0] {
            Meta::Callback { id, length, location } => {
                assert!(callbacks.get(*id).unwrap().ptr_eq(&listener));
                assert_eq!(*length, 2);
                assert!(location.contains("encode.rs"));
            }
            other => panic!("expected callback, got {other:?}"),
        }
        let Meta::Record { members, .. } = &metas[1] else {
            panic!("expected record");
        };
        assert!(matches!(members[0].value, Meta::Record { .. }));
        assert_eq!(members[1].value, Meta::null(), "second visit is cut");
    }

    #[test]
    fn test_errors_keep_every_property() {
        let error = ErrorValue::new("disk full")
            .with_name("IOError")
            .with_stack("at write")
            .with_property("code", "ENOSPC")
            .with_property("errno", -28);
        let meta = EncodeContext::detached("1").encode_exception(&error).unwrap();
        let Meta::Exception { value } = meta else {
            panic!("expected exception");
        };
        let Meta::Error { value, members } = *value else {
            panic!("expected error");
        };
        assert_eq!(value.name, "IOError");
        assert_eq!(value.stack.as_deref(), Some("at write"));
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["code", "errno"]);
    }

    #[test]
    fn test_remote_handles_and_promises_need_the_right_mode() {
        let objects = ObjectRegistry::new();
        let mut ctx = EncodeContext::result("1", &objects);
        let meta = ctx.encode(&Value::Promise(Promise::resolved(1))).unwrap();
        let Meta::Promise { then } = meta else {
            panic!("expected promise");
        };
        assert!(matches!(*then, Meta::Function(ObjectMeta { ref name, .. }) if name == "then"));

        let err = EncodeContext::detached("1")
            .encode(&Value::Promise(Promise::resolved(1)))
            .unwrap_err();
        assert!(matches!(err, RemoteError::MissingCapability(_)));
    }
}
