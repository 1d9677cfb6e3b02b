use std::fmt;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::function::Function;
use crate::object::{ObjectRef, PlainObject};
use crate::promise::{Promise, Settled};
use crate::proxy::RemoteHandle;

/// Integers up to this magnitude are exact in an `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A runtime value on either side of the bridge.
///
/// Scalars, bytes, arrays and errors compare by value. Promises, objects,
/// functions and remote handles compare by identity.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Bytes(Bytes),
    Array(Vec<Value>),
    Error(ErrorValue),
    Promise(Promise),
    Object(ObjectRef),
    Function(Function),
    Remote(RemoteHandle),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Bytes(_) => "buffer",
            Value::Array(_) => "array",
            Value::Error(_) => "error",
            Value::Promise(_) => "promise",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Remote(handle) if handle.is_function() => "function",
            Value::Remote(_) => "object",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteHandle> {
        match self {
            Value::Remote(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Wait for a promise; any other value is returned as is.
    pub async fn settle(self) -> Settled {
        match self {
            Value::Promise(promise) => promise.await,
            other => Ok(other),
        }
    }

    /// Convert a JSON document. Objects become [`PlainObject`]s.
    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => {
                let object = map
                    .into_iter()
                    .fold(PlainObject::new(), |object, (key, value)| {
                        object.with_property(key, Value::from_json(value))
                    });
                object.into_value()
            }
        }
    }

    /// A JSON rendering for display.
    ///
    /// Values JSON cannot hold are described: non-finite numbers and bigints
    /// as strings, references as `{"$ref": ...}` summaries.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Undefined | Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                JsonValue::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(n.to_string())),
            Value::BigInt(n) => JsonValue::String(n.to_string()),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Date(ms) => serde_json::json!({ "$date": ms }),
            Value::Bytes(bytes) => JsonValue::Array(bytes.iter().map(|b| (*b).into()).collect()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Error(error) => serde_json::json!({
                "name": error.name,
                "message": error.message,
            }),
            Value::Promise(_) => serde_json::json!({ "$ref": "promise" }),
            Value::Object(object) => serde_json::json!({ "$ref": object.class_name() }),
            Value::Function(f) => serde_json::json!({ "$ref": "function", "name": f.display_name() }),
            Value::Remote(handle) => serde_json::json!({
                "$ref": "remote",
                "id": handle.id(),
                "name": handle.class_name(),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Remote(a), Value::Remote(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<ErrorValue> for Value {
    fn from(error: ErrorValue) -> Self {
        Value::Error(error)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

impl From<PlainObject> for Value {
    fn from(object: PlainObject) -> Self {
        object.into_value()
    }
}

impl From<RemoteHandle> for Value {
    fn from(handle: RemoteHandle) -> Self {
        Value::Remote(handle)
    }
}

/// An error value: thrown by a target, rejected by a promise, or passed
/// around like any other value.
///
/// `properties` holds the error's enumerable own properties in order; all
/// of them survive encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub properties: Vec<(String, Value)>,
}

impl ErrorValue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
            properties: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(message).with_name("TypeError")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Set a property, replacing an existing one of the same name in place.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    /// Normalize a thrown or rejected value into an error.
    pub fn from_thrown(value: Value) -> Self {
        match value {
            Value::Error(error) => error,
            Value::String(message) => ErrorValue::new(message),
            other => ErrorValue::new(format!("non-error value thrown ({})", other.type_name()))
                .with_property("value", other),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ErrorValue {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_equality_rules() {
        assert_eq!(Value::from(1), Value::Number(1.0));
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_ne!(Value::Undefined, Value::Null);
        assert_eq!(
            Value::Array(vec![Value::from("a"), Value::Bytes(Bytes::from_static(b"\x01"))]),
            Value::Array(vec![Value::from("a"), Value::Bytes(Bytes::from_static(b"\x01"))]),
        );

        let a = PlainObject::new().into_value();
        let b = PlainObject::new().into_value();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_error_properties_keep_order_and_replace_in_place() {
        let error = ErrorValue::new("boom")
            .with_property("code", "E1")
            .with_property("errno", -1)
            .with_property("code", "E2");
        let names: Vec<_> = error.properties.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["code", "errno"]);
        assert_eq!(error.property("code"), Some(&Value::from("E2")));
        assert_eq!(error.to_string(), "Error: boom");
    }

    #[test]
    fn test_from_thrown() {
        assert_eq!(ErrorValue::from_thrown(Value::from("text")).message, "text");
        let wrapped = ErrorValue::from_thrown(Value::from(5));
        assert_eq!(wrapped.property("value"), Some(&Value::from(5)));
    }

    #[test]
    fn test_json_conversions() {
        let value = Value::from_json(json!([1, "two", null, {"three": 3}]));
        let items = value.as_array().unwrap();
        assert_eq!(items[0], Value::from(1));
        assert_eq!(items[2], Value::Null);
        assert_eq!(items[3].type_name(), "object");

        assert_eq!(
            Value::Array(vec![Value::from(1.5), Value::BigInt(9), Value::Number(f64::INFINITY)])
                .to_json(),
            json!([1.5, "9", "inf"])
        );
        assert_eq!(Value::from(43).to_json().to_string(), "43");
    }
}
