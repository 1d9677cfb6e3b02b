use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::function::Function;
use crate::lock;
use crate::meta::{MemberKind, ObjectMember};
use crate::value::{ErrorValue, Value};

/// Reflection over a local object the dispatcher can expose.
///
/// `members` lists the object's own members; `prototype` lists inherited
/// levels, nearest first, without the root object prototype. The default
/// `call` and `construct` look the member up with `get` and invoke it, which
/// suits objects that keep their methods as [`Function`] properties.
pub trait RemoteObject: Send + Sync + 'static {
    fn class_name(&self) -> &str {
        "Object"
    }

    fn members(&self) -> Vec<ObjectMember>;

    fn prototype(&self) -> Vec<Vec<ObjectMember>> {
        Vec::new()
    }

    fn get(&self, name: &str) -> Result<Value, ErrorValue>;

    fn set(&self, name: &str, value: Value) -> Result<(), ErrorValue> {
        drop(value);
        Err(ErrorValue::type_error(format!(
            "Cannot assign to read only property '{name}' of object '{}'",
            self.class_name()
        )))
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ErrorValue> {
        match self.get(method)? {
            Value::Function(f) => f.call(args),
            _ => Err(ErrorValue::type_error(format!(
                "{}.{method} is not a function",
                self.class_name()
            ))),
        }
    }

    fn construct(&self, method: &str, args: Vec<Value>) -> Result<Value, ErrorValue> {
        match self.get(method)? {
            Value::Function(f) => f.construct(args),
            _ => Err(ErrorValue::type_error(format!(
                "{}.{method} is not a constructor",
                self.class_name()
            ))),
        }
    }
}

/// Find a member by name: own members first, then each prototype level.
pub fn find_member(object: &dyn RemoteObject, name: &str) -> Option<ObjectMember> {
    object
        .members()
        .into_iter()
        .chain(object.prototype().into_iter().flatten())
        .find(|member| member.name == name)
}

/// Shared reference to a local object. Clones share identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn RemoteObject>);

impl ObjectRef {
    pub fn new(object: impl RemoteObject) -> Self {
        Self(Arc::new(object))
    }

    pub fn from_arc(object: Arc<dyn RemoteObject>) -> Self {
        Self(object)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Deref for ObjectRef {
    type Target = dyn RemoteObject;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectRef")
            .field(&self.class_name())
            .finish()
    }
}

type Getter = Arc<dyn Fn() -> Result<Value, ErrorValue> + Send + Sync>;

#[derive(Clone)]
enum Slot {
    Data(Value),
    Getter(Getter),
}

/// A property bag implementing [`RemoteObject`].
///
/// Data properties are writable; properties holding a [`Function`] are
/// methods; getters are read-only accessors. An optional prototype object
/// supplies inherited members. Assigning an inherited data property creates
/// an own property, leaving the prototype untouched.
pub struct PlainObject {
    class_name: String,
    slots: Mutex<Vec<(String, Slot)>>,
    prototype: Option<ObjectRef>,
}

impl Default for PlainObject {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainObject {
    pub fn new() -> Self {
        Self {
            class_name: "Object".to_string(),
            slots: Mutex::new(Vec::new()),
            prototype: None,
        }
    }

    pub fn with_class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    pub fn with_property(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(name.into(), Slot::Data(value.into()));
        self
    }

    #[track_caller]
    pub fn with_method<F>(self, name: impl Into<String>, length: usize, call: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        let name = name.into();
        let method = Function::new(name.clone(), length, call);
        self.with_property(name, method)
    }

    pub fn with_getter<F>(self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        self.put(name.into(), Slot::Getter(Arc::new(getter)));
        self
    }

    pub fn with_prototype(mut self, prototype: impl Into<ObjectRef>) -> Self {
        self.prototype = Some(prototype.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(ObjectRef::new(self))
    }

    fn put(&self, name: String, slot: Slot) {
        let mut slots = lock(&self.slots);
        match slots.iter_mut().find(|(key, _)| *key == name) {
            Some(existing) => existing.1 = slot,
            None => slots.push((name, slot)),
        }
    }

    fn own(&self, name: &str) -> Option<Slot> {
        lock(&self.slots)
            .iter()
            .find_map(|(key, slot)| (key == name).then(|| slot.clone()))
    }
}

impl From<PlainObject> for ObjectRef {
    fn from(object: PlainObject) -> Self {
        ObjectRef::new(object)
    }
}

impl RemoteObject for PlainObject {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn members(&self) -> Vec<ObjectMember> {
        lock(&self.slots)
            .iter()
            .map(|(name, slot)| match slot {
                Slot::Data(Value::Function(_)) => ObjectMember {
                    name: name.clone(),
                    enumerable: true,
                    writable: true,
                    kind: MemberKind::Method,
                },
                Slot::Data(_) => ObjectMember::accessor(name.clone(), true),
                Slot::Getter(_) => ObjectMember::accessor(name.clone(), false),
            })
            .collect()
    }

    fn prototype(&self) -> Vec<Vec<ObjectMember>> {
        match &self.prototype {
            Some(proto) => {
                let mut levels = vec![proto.members()];
                levels.extend(proto.prototype());
                levels
            }
            None => Vec::new(),
        }
    }

    fn get(&self, name: &str) -> Result<Value, ErrorValue> {
        match self.own(name) {
            Some(Slot::Data(value)) => Ok(value),
            Some(Slot::Getter(getter)) => getter(),
            None => match &self.prototype {
                Some(proto) => proto.get(name),
                None => Ok(Value::Undefined),
            },
        }
    }

    fn set(&self, name: &str, value: Value) -> Result<(), ErrorValue> {
        let read_only = match self.own(name) {
            Some(Slot::Getter(_)) => true,
            Some(Slot::Data(_)) => false,
            None => self.prototype.as_ref().is_some_and(|proto| {
                find_member(&**proto, name)
                    .is_some_and(|member| member.kind == MemberKind::Accessor && !member.writable)
            }),
        };
        if read_only {
            return Err(ErrorValue::type_error(format!(
                "Cannot set property {name} of {} which has only a getter",
                self.class_name
            )));
        }
        self.put(name.to_string(), Slot::Data(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> PlainObject {
        PlainObject::new()
            .with_class_name("Parent")
            .with_property("age", 100)
            .with_getter("kind", || Ok(Value::from("parent")))
            .with_method("greet", 1, |args| {
                let who = args.first().and_then(Value::as_str).unwrap_or("nobody");
                Ok(Value::from(format!("hello {who}")))
            })
    }

    #[test]
    fn test_members_and_prototype_levels() {
        let child = PlainObject::new()
            .with_class_name("Child")
            .with_property("name", "child")
            .with_prototype(parent());

        let own = child.members();
        assert_eq!(own, vec![ObjectMember::accessor("name", true)]);

        let levels = child.prototype();
        assert_eq!(levels.len(), 1);
        let kinds: Vec<_> = levels[0].iter().map(|m| (m.name.as_str(), m.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("age", MemberKind::Accessor),
                ("kind", MemberKind::Accessor),
                ("greet", MemberKind::Method),
            ]
        );
    }

    #[test]
    fn test_inherited_get_call_and_shadowing_set() {
        let proto = ObjectRef::from(parent());
        let child = PlainObject::new().with_prototype(proto.clone());

        assert_eq!(child.get("age").unwrap(), Value::from(100));
        assert_eq!(
            child.call("greet", vec![Value::from("you")]).unwrap(),
            Value::from("hello you")
        );

        child.set("age", Value::from(50)).unwrap();
        assert_eq!(child.get("age").unwrap(), Value::from(50));
        assert_eq!(proto.get("age").unwrap(), Value::from(100));
    }

    #[test]
    fn test_getters_are_read_only() {
        let child = PlainObject::new().with_prototype(parent());
        assert_eq!(child.get("kind").unwrap(), Value::from("parent"));
        let err = child.set("kind", Value::from("other")).unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[test]
    fn test_calling_a_non_function() {
        let object = PlainObject::new().with_property("age", 3);
        let err = object.call("age", vec![]).unwrap_err();
        assert!(err.message.contains("is not a function"), "{}", err.message);
        assert_eq!(object.get("missing").unwrap(), Value::Undefined);
    }
}
