//! Remote objects over an objbridge channel.
//!
//! One side exposes local objects on a [`RemoteServer`]; the other side
//! fetches them through a [`RemoteClient`] and works with [`RemoteHandle`]
//! proxies whose member reads, writes and calls are forwarded to the owner.
//! Values cross the channel as [`Meta`] descriptors produced by the codec in
//! [`encode`] and consumed by [`decode`]. Functions passed as call arguments
//! stay on the caller's side and are invoked back by id.
//!
//! ```no_run
//! use std::sync::Arc;
//! use objbridge_remote::{PlainObject, RemoteClient, RemoteServer, RpcRemoteServer};
//! use objbridge_transport::memory;
//!
//! # async fn demo() -> objbridge_remote::Result<()> {
//! let server = RemoteServer::new();
//! server.expose(
//!     "counter",
//!     PlainObject::new().with_method("inc", 1, |args| {
//!         Ok((args[0].as_f64().unwrap_or(0.0) + 1.0).into())
//!     }),
//! );
//!
//! let (server_end, client_end) = memory::pair();
//! RpcRemoteServer::serve(server_end, Arc::clone(&server));
//! let client = RemoteClient::connect(client_end);
//!
//! let counter = client.get_remote("counter").await?;
//! let counter = counter.as_remote().expect("exposed object");
//! let n = counter.call("inc", vec![42.into()]).await?;
//! assert_eq!(n, 43.into());
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod cache;
pub mod client;
pub mod decode;
pub mod encode;
pub mod error;
pub mod function;
pub mod meta;
pub mod object;
pub mod promise;
pub mod proxy;
pub mod registry;
pub mod serve;
pub mod server;
pub mod value;

pub use cache::RemoteObjectCache;
pub use client::{ComMode, RemoteClient};
pub use encode::EncodeContext;
pub use error::{Operation, RemoteError, Result, DISPATCH_ERRNO, DISPATCH_ERROR_CODE};
pub use function::Function;
pub use meta::{
    CallbackId, ErrorDescriptor, MemberKind, Meta, NamedMeta, ObjectId, ObjectMember, ObjectMeta,
    ProtoDescriptor, Scalar,
};
pub use object::{ObjectRef, PlainObject, RemoteObject};
pub use promise::{Promise, Resolver, Settled};
pub use proxy::{HandleKind, RemoteHandle, RemoteMethod};
pub use registry::{CallbackRegistry, ObjectRegistry};
pub use serve::{RpcCallbackHandler, RpcRemoteServer};
pub use server::{CallbackHandler, RemoteServer};
pub use value::{ErrorValue, Value};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
