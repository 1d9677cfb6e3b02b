//! Wire-safe descriptions of values.
//!
//! A [`Meta`] is what actually crosses the channel: scalars by value,
//! composites structurally, and objects or functions as an id plus a member
//! list the other side can build a proxy from.

use serde::{Deserialize, Serialize};

/// Identifier of an object or function in an [`ObjectRegistry`](crate::ObjectRegistry).
pub type ObjectId = u64;

/// Identifier of a function in a [`CallbackRegistry`](crate::CallbackRegistry).
pub type CallbackId = u64;

/// A primitive value.
///
/// Adjacently tagged so `undefined` and `null` stay distinct on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Undefined,
    Null,
    Boolean(bool),
    Number(#[serde(with = "number")] f64),
    Bigint(#[serde(with = "bigint")] i128),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
}

/// One entry in an object's member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMember {
    pub name: String,
    pub enumerable: bool,
    pub writable: bool,
    #[serde(rename = "type")]
    pub kind: MemberKind,
}

impl ObjectMember {
    /// A callable member.
    pub fn method(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enumerable: false,
            writable: false,
            kind: MemberKind::Method,
        }
    }

    /// A readable property; `writable` controls whether proxies forward sets.
    pub fn accessor(name: impl Into<String>, writable: bool) -> Self {
        Self {
            name: name.into(),
            enumerable: true,
            writable,
            kind: MemberKind::Accessor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Method,
    Accessor,
}

/// One inherited level of an object's prototype chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoDescriptor {
    pub members: Vec<ObjectMember>,
    pub proto: Option<Box<ProtoDescriptor>>,
}

impl ProtoDescriptor {
    /// Build the linked chain from member levels, nearest first.
    pub fn from_levels(levels: Vec<Vec<ObjectMember>>) -> Option<Box<Self>> {
        levels.into_iter().rev().fold(None, |proto, members| {
            Some(Box::new(ProtoDescriptor { members, proto }))
        })
    }

    /// Flatten the chain into member levels, nearest first.
    pub fn into_levels(self) -> Vec<Vec<ObjectMember>> {
        let mut levels = Vec::new();
        let mut next = Some(Box::new(self));
        while let Some(level) = next {
            let ProtoDescriptor { members, proto } = *level;
            levels.push(members);
            next = proto;
        }
        levels
    }
}

/// Name, message and stack of an encoded error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// A named, encoded property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedMeta {
    pub name: String,
    pub value: Meta,
}

/// Descriptor of an object or function owned by the encoding side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub id: ObjectId,
    pub name: String,
    pub members: Vec<ObjectMember>,
    #[serde(default)]
    pub proto: Option<Box<ProtoDescriptor>>,
}

/// Wire description of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Meta {
    Value {
        value: Scalar,
    },
    Buffer {
        value: Vec<u8>,
    },
    Array {
        members: Vec<Meta>,
    },
    Error {
        value: ErrorDescriptor,
        members: Vec<NamedMeta>,
    },
    /// An error that was thrown rather than returned.
    Exception {
        value: Box<Meta>,
    },
    Promise {
        then: Box<Meta>,
    },
    Object(ObjectMeta),
    Function(ObjectMeta),
    /// A caller-side object copied by value into a call.
    Record {
        name: String,
        members: Vec<NamedMeta>,
    },
    Callback {
        id: CallbackId,
        length: usize,
        location: String,
    },
    RemoteObject {
        id: ObjectId,
    },
}

impl Meta {
    pub fn scalar(value: Scalar) -> Self {
        Meta::Value { value }
    }

    pub fn undefined() -> Self {
        Meta::scalar(Scalar::Undefined)
    }

    pub fn null() -> Self {
        Meta::scalar(Scalar::Null)
    }

    /// Short tag name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Meta::Value { .. } => "value",
            Meta::Buffer { .. } => "buffer",
            Meta::Array { .. } => "array",
            Meta::Error { .. } => "error",
            Meta::Exception { .. } => "exception",
            Meta::Promise { .. } => "promise",
            Meta::Object(_) => "object",
            Meta::Function(_) => "function",
            Meta::Record { .. } => "record",
            Meta::Callback { .. } => "callback",
            Meta::RemoteObject { .. } => "remote-object",
        }
    }
}

/// JSON has no NaN or infinities; those travel as strings.
mod number {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Finite(value) => Ok(value),
            Repr::Special(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "invalid number literal '{other}'"
                ))),
            },
        }
    }
}

/// Decimal string, so values beyond 2^53 survive JSON.
mod bigint {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_undefined_and_null_stay_distinct() {
        let undefined = serde_json::to_value(Meta::undefined()).unwrap();
        let null = serde_json::to_value(Meta::null()).unwrap();
        assert_eq!(undefined, json!({"type": "value", "value": {"kind": "undefined"}}));
        assert_eq!(null, json!({"type": "value", "value": {"kind": "null"}}));
        assert_ne!(undefined, null);
    }

    #[test]
    fn test_special_numbers_and_bigint_on_the_wire() {
        let meta = Meta::Array {
            members: vec![
                Meta::scalar(Scalar::Number(f64::NEG_INFINITY)),
                Meta::scalar(Scalar::Bigint(170_141_183_460_469_231_731_687_303_715_884_105_727)),
                Meta::scalar(Scalar::Number(1.5)),
            ],
        };
        let wire = serde_json::to_string(&meta).unwrap();
        assert!(wire.contains(r#""-Infinity""#));
        assert!(wire.contains(r#""170141183460469231731687303715884105727""#));

        let back: Meta = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, meta);

        let nan: Meta =
            serde_json::from_value(json!({"type": "value", "value": {"kind": "number", "value": "NaN"}}))
                .unwrap();
        assert!(matches!(nan, Meta::Value { value: Scalar::Number(n) } if n.is_nan()));
    }

    #[test]
    fn test_object_meta_wire_shape() {
        let meta = Meta::Object(ObjectMeta {
            id: 18,
            name: "Foo".into(),
            members: vec![ObjectMember::accessor("age", true)],
            proto: ProtoDescriptor::from_levels(vec![vec![ObjectMember::method("getNumber")]]),
        });
        let wire = serde_json::to_value(&meta).unwrap();
        assert_eq!(wire["type"], "object");
        assert_eq!(wire["id"], 18);
        assert_eq!(wire["members"][0]["type"], "accessor");
        assert_eq!(wire["proto"]["members"][0]["name"], "getNumber");
        assert!(wire["proto"]["proto"].is_null());

        let back: Meta = serde_json::from_value(wire).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_proto_levels_roundtrip_in_order() {
        let levels = vec![
            vec![ObjectMember::method("near")],
            vec![ObjectMember::method("middle")],
            vec![ObjectMember::accessor("far", false)],
        ];
        let chain = ProtoDescriptor::from_levels(levels.clone()).unwrap();
        assert_eq!(chain.members[0].name, "near");
        assert_eq!(chain.into_levels(), levels);
        assert!(ProtoDescriptor::from_levels(Vec::new()).is_none());
    }

    #[test]
    fn test_buffer_is_a_number_array() {
        let wire = serde_json::to_value(Meta::Buffer {
            value: vec![0, 255],
        })
        .unwrap();
        assert_eq!(wire, json!({"type": "buffer", "value": [0, 255]}));
        assert_eq!(Meta::RemoteObject { id: 3 }.kind(), "remote-object");
    }
}
