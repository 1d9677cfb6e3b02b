use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::value::{ErrorValue, Value};

type NativeFn = dyn Fn(Vec<Value>) -> Result<Value, ErrorValue> + Send + Sync;

/// A local callable.
///
/// Clones share identity: registries key functions by pointer, so the same
/// `Function` always maps to the same id. The creation site is recorded so
/// diagnostics about a callback can point back at where it was defined.
#[derive(Clone)]
pub struct Function {
    inner: Arc<FunctionInner>,
}

#[derive(Clone)]
struct FunctionInner {
    name: String,
    length: usize,
    location: String,
    call: Option<Arc<NativeFn>>,
    construct: Option<Arc<NativeFn>>,
    properties: Vec<(String, Value)>,
}

impl Function {
    /// A plain function taking `length` declared arguments.
    #[track_caller]
    pub fn new<F>(name: impl Into<String>, length: usize, call: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        Self::build(name.into(), length, Some(Arc::new(call)), None)
    }

    /// A constructor that can only be invoked with `new`.
    #[track_caller]
    pub fn class<F>(name: impl Into<String>, length: usize, construct: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        Self::build(name.into(), length, None, Some(Arc::new(construct)))
    }

    #[track_caller]
    fn build(
        name: String,
        length: usize,
        call: Option<Arc<NativeFn>>,
        construct: Option<Arc<NativeFn>>,
    ) -> Self {
        let caller = Location::caller();
        Self {
            inner: Arc::new(FunctionInner {
                name,
                length,
                location: format!("{}:{}:{}", caller.file(), caller.line(), caller.column()),
                call,
                construct,
                properties: Vec::new(),
            }),
        }
    }

    /// Also allow `new`. Returns a function with a new identity.
    pub fn with_construct<F>(self, construct: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        self.rebuild(|inner| inner.construct = Some(Arc::new(construct)))
    }

    /// Attach a static property. Returns a function with a new identity.
    pub fn with_property(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        self.rebuild(|inner| {
            inner.properties.retain(|(existing, _)| *existing != name);
            inner.properties.push((name, value));
        })
    }

    /// Override the recorded creation site.
    pub fn located(self, location: impl Into<String>) -> Self {
        let location = location.into();
        self.rebuild(|inner| inner.location = location)
    }

    fn rebuild(self, edit: impl FnOnce(&mut FunctionInner)) -> Self {
        let mut inner = Arc::try_unwrap(self.inner).unwrap_or_else(|shared| (*shared).clone());
        edit(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, ErrorValue> {
        match &self.inner.call {
            Some(call) => call(args),
            None => Err(ErrorValue::type_error(format!(
                "Class constructor {} cannot be invoked without 'new'",
                self.display_name()
            ))),
        }
    }

    pub fn construct(&self, args: Vec<Value>) -> Result<Value, ErrorValue> {
        match &self.inner.construct {
            Some(construct) => construct(args),
            None => Err(ErrorValue::type_error(format!(
                "{} is not a constructor",
                self.display_name()
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The name, or `anonymous` for unnamed functions.
    pub fn display_name(&self) -> &str {
        if self.inner.name.is_empty() {
            "anonymous"
        } else {
            &self.inner.name
        }
    }

    /// Declared argument count.
    pub fn length(&self) -> usize {
        self.inner.length
    }

    /// Where this function was created, as `file:line:column`.
    pub fn location(&self) -> &str {
        &self.inner.location
    }

    pub fn is_constructor(&self) -> bool {
        self.inner.construct.is_some()
    }

    pub fn properties(&self) -> &[(String, Value)] {
        &self.inner.properties
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.inner
            .properties
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.display_name())
            .field("length", &self.inner.length)
            .field("location", &self.inner.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_and_construct() {
        let double = Function::new("double", 1, |args| {
            Ok(Value::Number(args[0].as_f64().unwrap_or(0.0) * 2.0))
        });
        assert_eq!(double.call(vec![Value::from(21)]).unwrap(), Value::from(42));
        let err = double.construct(vec![]).unwrap_err();
        assert_eq!(err.name, "TypeError");
        assert_eq!(err.message, "double is not a constructor");

        let point = Function::class("Point", 2, |_| Ok(Value::from("point")));
        assert!(point.is_constructor());
        assert!(point.call(vec![]).is_err());
        assert_eq!(point.construct(vec![]).unwrap(), Value::from("point"));
    }

    #[test]
    fn test_location_points_at_creation_site() {
        let f = Function::new("", 0, |_| Ok(Value::Undefined));
        assert!(f.location().contains("function.rs"), "{}", f.location());
        assert_eq!(f.display_name(), "anonymous");
        assert_eq!(f.located("renderer.js:10").location(), "renderer.js:10");
    }

    #[test]
    fn test_identity_follows_clones_not_rebuilds() {
        let f = Function::new("f", 0, |_| Ok(Value::Undefined));
        let g = f.clone();
        assert!(f.ptr_eq(&g));

        let h = g.with_property("version", 2);
        assert!(!f.ptr_eq(&h));
        assert_eq!(h.property("version"), Some(&Value::from(2)));
        assert!(f.property("version").is_none());
    }
}
