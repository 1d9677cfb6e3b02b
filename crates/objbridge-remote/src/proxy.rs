//! Caller-side proxies for remote objects.
//!
//! A [`RemoteHandle`] is built from an object or function meta. It knows the
//! remote id and an ordered list of member tables: the object's own members
//! first, then one table per prototype level. Member lookups walk the tables
//! in that order and the first definition wins, so an own member shadows an
//! inherited one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::OnceCell;

use crate::client::RemoteClient;
use crate::error::{RemoteError, Result};
use crate::function::Function;
use crate::lock;
use crate::meta::{MemberKind, ObjectId, ObjectMember, ObjectMeta};
use crate::promise::Promise;
use crate::value::{ErrorValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Object,
    Function,
}

pub(crate) struct HandleInner {
    id: ObjectId,
    kind: HandleKind,
    class_name: String,
    levels: Vec<Vec<ObjectMember>>,
    methods: Mutex<HashMap<String, RemoteMethod>>,
    overrides: Mutex<HashMap<String, Value>>,
    client: RemoteClient,
}

/// Proxy for an object or function owned by the peer.
///
/// Clones share identity. Method members resolve locally to a cached
/// [`RemoteMethod`]; accessors are fetched from the owner on every read.
#[derive(Clone)]
pub struct RemoteHandle {
    inner: Arc<HandleInner>,
}

impl RemoteHandle {
    pub(crate) fn new(meta: ObjectMeta, kind: HandleKind, client: RemoteClient) -> Self {
        let ObjectMeta {
            id,
            name,
            members,
            proto,
        } = meta;
        let mut levels = vec![members];
        if let Some(proto) = proto {
            levels.extend(proto.into_levels());
        }
        Self {
            inner: Arc::new(HandleInner {
                id,
                kind,
                class_name: name,
                levels,
                methods: Mutex::new(HashMap::new()),
                overrides: Mutex::new(HashMap::new()),
                client,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<HandleInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    pub fn is_function(&self) -> bool {
        self.inner.kind == HandleKind::Function
    }

    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    /// The client session this handle talks through.
    pub fn client(&self) -> &RemoteClient {
        &self.inner.client
    }

    /// Member tables, own level first.
    pub fn levels(&self) -> &[Vec<ObjectMember>] {
        &self.inner.levels
    }

    /// Resolve a member by name.
    pub fn describe(&self, name: &str) -> Option<&ObjectMember> {
        self.inner.levels.iter().flatten().find(|m| m.name == name)
    }

    /// Every resolvable member, each name once, in resolution order.
    pub fn members(&self) -> Vec<&ObjectMember> {
        let mut seen = std::collections::HashSet::new();
        self.inner
            .levels
            .iter()
            .flatten()
            .filter(|m| seen.insert(m.name.as_str()))
            .collect()
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members().into_iter().map(|m| m.name.as_str()).collect()
    }

    pub fn ptr_eq(&self, other: &RemoteHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The wrapper for a method member. Always the same wrapper for a name;
    /// creating it involves no remote traffic.
    pub fn method(&self, name: &str) -> Result<RemoteMethod> {
        match self.describe(name) {
            Some(member) if member.kind == MemberKind::Method => {}
            _ => return Err(RemoteError::NotCallable(self.qualified(name))),
        }
        let mut methods = lock(&self.inner.methods);
        let method = methods
            .entry(name.to_string())
            .or_insert_with(|| RemoteMethod::new(self.inner.client.clone(), self.inner.id, name));
        Ok(method.clone())
    }

    /// Read a member.
    ///
    /// Methods come back as local functions that forward to the owner.
    /// Accessors are fetched on every call. Unknown names are `undefined`.
    pub async fn get(&self, name: &str) -> Result<Value> {
        if let Some(patched) = lock(&self.inner.overrides).get(name) {
            return Ok(patched.clone());
        }
        match self.describe(name).map(|m| m.kind) {
            Some(MemberKind::Method) => Ok(Value::Function(self.method(name)?.as_function())),
            Some(MemberKind::Accessor) => {
                self.inner
                    .client
                    .get_remote_member(self.inner.id, name)
                    .await
            }
            None => Ok(Value::Undefined),
        }
    }

    /// Write a member.
    ///
    /// Writable accessors forward to the owner. Method members are replaced
    /// locally on this handle only. Unknown names are forwarded and left to
    /// the owner.
    pub async fn set(&self, name: &str, value: Value) -> Result<()> {
        match self.describe(name) {
            Some(member) if member.kind == MemberKind::Method => {
                lock(&self.inner.overrides).insert(name.to_string(), value);
                Ok(())
            }
            Some(member) if !member.writable => Err(RemoteError::ReadOnly(self.qualified(name))),
            _ => {
                self.inner
                    .client
                    .set_remote_member(self.inner.id, name, value)
                    .await
            }
        }
    }

    /// Call a member with `args` and return its decoded result.
    ///
    /// A result that is a promise is returned unsettled; use
    /// [`Value::settle`] to wait for it.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let patched = lock(&self.inner.overrides).get(name).cloned();
        if let Some(patched) = patched {
            return match patched {
                Value::Function(f) => f.call(args).map_err(RemoteError::Thrown),
                Value::Remote(handle) => handle.invoke(args).await,
                _ => Err(RemoteError::NotCallable(self.qualified(name))),
            };
        }
        if let Some(member) = self.describe(name) {
            if member.kind == MemberKind::Accessor {
                return Err(RemoteError::NotCallable(self.qualified(name)));
            }
        }
        self.inner
            .client
            .call_remote_member(self.inner.id, name, args)
            .await
    }

    /// Call a member as a constructor.
    pub async fn construct(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.inner
            .client
            .call_remote_member_constructor(self.inner.id, name, args)
            .await
    }

    /// Call this handle as a function.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        self.require_function()?;
        self.inner
            .client
            .call_remote_function(self.inner.id, args)
            .await
    }

    /// Call this handle as a constructor.
    pub async fn instantiate(&self, args: Vec<Value>) -> Result<Value> {
        self.require_function()?;
        self.inner
            .client
            .call_remote_constructor(self.inner.id, args)
            .await
    }

    fn require_function(&self) -> Result<()> {
        if self.is_function() {
            Ok(())
        } else {
            Err(RemoteError::NotCallable(self.inner.class_name.clone()))
        }
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{name}", self.inner.class_name)
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("class_name", &self.inner.class_name)
            .finish()
    }
}

struct MethodInner {
    client: RemoteClient,
    owner: ObjectId,
    name: String,
    function: Function,
    properties: OnceCell<RemoteHandle>,
}

/// A method member of a remote object.
///
/// Calling it needs no setup. Its own properties (a remote method is itself
/// a function object) are fetched with a single `getMember` the first time
/// they are needed and reused afterwards.
#[derive(Clone)]
pub struct RemoteMethod {
    inner: Arc<MethodInner>,
}

impl RemoteMethod {
    fn new(client: RemoteClient, owner: ObjectId, name: &str) -> Self {
        let function = {
            let client = client.clone();
            let name = name.to_string();
            // Member descriptions carry no arity, so the forwarder declares none.
            Function::new(name.clone(), 0, move |args| {
                let client = client.clone();
                let name = name.clone();
                Ok(Value::Promise(Promise::spawn(async move {
                    let result = client
                        .call_remote_member(owner, &name, args)
                        .await
                        .map_err(ErrorValue::from)?;
                    result.settle().await
                })))
            })
        };
        Self {
            inner: Arc::new(MethodInner {
                client,
                owner,
                name: name.to_string(),
                function,
                properties: OnceCell::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Id of the object this method belongs to.
    pub fn owner(&self) -> ObjectId {
        self.inner.owner
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.inner
            .client
            .call_remote_member(self.inner.owner, &self.inner.name, args)
            .await
    }

    pub async fn construct(&self, args: Vec<Value>) -> Result<Value> {
        self.inner
            .client
            .call_remote_member_constructor(self.inner.owner, &self.inner.name, args)
            .await
    }

    /// The method as a function object, loading it on first use.
    pub async fn properties(&self) -> Result<&RemoteHandle> {
        self.inner
            .properties
            .get_or_try_init(|| async {
                let loaded = self
                    .inner
                    .client
                    .get_remote_member(self.inner.owner, &self.inner.name)
                    .await?;
                match loaded {
                    Value::Remote(handle) if handle.is_function() => Ok(handle),
                    other => Err(RemoteError::Protocol(format!(
                        "method '{}' resolved to a {} instead of a function",
                        self.inner.name,
                        other.type_name()
                    ))),
                }
            })
            .await
    }

    /// Read one of the method's own properties.
    pub async fn get(&self, name: &str) -> Result<Value> {
        self.properties().await?.get(name).await
    }

    /// Whether the properties have been fetched.
    pub fn is_loaded(&self) -> bool {
        self.inner.properties.initialized()
    }

    /// A local function that forwards calls to this method and returns a
    /// promise of the result. The same function every time.
    ///
    /// Its `length` is always 0: the remote arity is not part of the member
    /// description. Passed back to the owner as a callback, it reports 0 too.
    pub fn as_function(&self) -> Function {
        self.inner.function.clone()
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("owner", &self.inner.owner)
            .field("name", &self.inner.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo(client: &RemoteClient) -> RemoteHandle {
        let meta = ObjectMeta {
            id: 1,
            name: "Foo".to_string(),
            members: vec![
                ObjectMember::method("getNumber"),
                ObjectMember::accessor("name", false),
            ],
            proto: None,
        };
        client.handle_for(meta, HandleKind::Object)
    }

    #[test]
    fn test_method_function_has_no_declared_arity() {
        let client = RemoteClient::detached();
        let method = foo(&client).method("getNumber").unwrap();
        let function = method.as_function();
        assert_eq!(function.name(), "getNumber");
        assert_eq!(function.length(), 0);
        assert!(function.ptr_eq(&method.as_function()));
        assert!(!method.is_loaded());
    }

    #[test]
    fn test_accessors_are_not_methods() {
        let client = RemoteClient::detached();
        let err = foo(&client).method("name").unwrap_err();
        assert!(matches!(err, RemoteError::NotCallable(ref name) if name == "Foo.name"));
    }
}
