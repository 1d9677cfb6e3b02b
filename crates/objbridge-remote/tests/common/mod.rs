#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use objbridge_frame::{spawn_framed, FrameConfig};
use objbridge_remote::{
    ErrorValue, Function, ObjectRef, PlainObject, Promise, RemoteClient, RemoteServer,
    RpcRemoteServer, Value,
};
use objbridge_transport::{memory, Duplex};

pub fn bar() -> PlainObject {
    PlainObject::new()
        .with_class_name("Bar")
        .with_getter("type", || Ok("bar".into()))
        .with_method("doSomething", 0, |_| Ok("done".into()))
}

pub fn foo_father() -> PlainObject {
    PlainObject::new()
        .with_class_name("FooFather")
        .with_property("age", 100)
        .with_method("describe", 0, |_| Ok("a foo father".into()))
}

/// The object most tests talk to.
pub fn foo() -> PlainObject {
    let bar = ObjectRef::from(bar());
    PlainObject::new()
        .with_class_name("Foo")
        .with_property("name", "foo")
        .with_getter("message", || Ok("hello".into()))
        .with_method("getNumber", 0, |_| Ok(42.into()))
        .with_method("incrementNumberAsync", 1, |args| {
            let n = args.first().and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Promise::spawn(async move { Ok(Value::from(n + 1.0)) }).into())
        })
        .with_method("greetLater", 0, |_| {
            Ok(Promise::spawn(async { Ok(Value::from("hello")) }).into())
        })
        .with_method("failLater", 0, |_| {
            Ok(Promise::rejected(ErrorValue::new("later failed").with_property("code", "E_LATE")).into())
        })
        .with_method("getBar", 0, move |_| Ok(Value::Object(bar.clone())))
        .with_method("notify", 1, |args| match args.first() {
            Some(Value::Function(callback)) => callback.call(vec!["ping".into()]),
            _ => Err(ErrorValue::type_error("notify expects a callback")),
        })
        .with_method("explode", 0, |_| {
            Err(ErrorValue::new("kaboom")
                .with_name("RangeError")
                .with_stack("at Foo.explode")
                .with_property("code", "E_BOOM"))
        })
        .with_prototype(foo_father())
}

pub fn counter() -> PlainObject {
    PlainObject::new()
        .with_class_name("Counter")
        .with_method("inc", 1, |args| {
            Ok(Value::from(args.first().and_then(Value::as_f64).unwrap_or(0.0) + 1.0))
        })
        .with_method("echo", 1, |args| Ok(args.into_iter().next().unwrap_or(Value::Undefined)))
}

/// Keeps the last callback passed to `subscribe` and calls it on `emit`.
pub fn emitter() -> PlainObject {
    let listener: Arc<Mutex<Option<Function>>> = Arc::default();
    let stored = Arc::clone(&listener);
    PlainObject::new()
        .with_class_name("Emitter")
        .with_method("subscribe", 1, move |args| match args.into_iter().next() {
            Some(Value::Function(callback)) => {
                *stored.lock().unwrap() = Some(callback);
                Ok(Value::Undefined)
            }
            _ => Err(ErrorValue::type_error("subscribe expects a callback")),
        })
        .with_method("emit", 0, move |_| {
            let callback = listener.lock().unwrap().clone();
            match callback {
                Some(callback) => callback.call(vec!["event".into()]),
                None => Ok(Value::Undefined),
            }
        })
}

pub fn server() -> Arc<RemoteServer> {
    let server = RemoteServer::new();
    server.expose("foo", foo());
    server.expose("counter", counter());
    server.expose("emitter", emitter());
    server
}

/// A client connected to a server, with a count of the requests the client
/// sent.
pub struct Session {
    pub server: Arc<RemoteServer>,
    pub client: RemoteClient,
    pub sent: Arc<AtomicUsize>,
}

impl Session {
    pub fn requests(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

/// Forward messages between two duplexes, counting those flowing from `a`.
fn relay(a: Duplex, b: Duplex, sent: Arc<AtomicUsize>) {
    let (a_tx, mut a_rx) = a.split();
    let (b_tx, mut b_rx) = b.split();
    tokio::spawn(async move {
        while let Some(message) = a_rx.recv().await {
            sent.fetch_add(1, Ordering::SeqCst);
            if b_tx.send(message).is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        while let Some(message) = b_rx.recv().await {
            if a_tx.send(message).is_err() {
                break;
            }
        }
    });
}

pub fn memory_session(server: Arc<RemoteServer>) -> Session {
    let (client_end, relay_client) = memory::pair();
    let (relay_server, server_end) = memory::pair();
    let sent = Arc::new(AtomicUsize::new(0));
    relay(relay_client, relay_server, Arc::clone(&sent));
    RpcRemoteServer::serve(server_end, Arc::clone(&server));
    Session {
        server,
        client: RemoteClient::connect(client_end),
        sent,
    }
}

/// Same as [`memory_session`] but through the framed byte-stream codec.
pub fn framed_session(server: Arc<RemoteServer>) -> Session {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client_end = spawn_framed(client_io, FrameConfig::default());
    let server_end = spawn_framed(server_io, FrameConfig::default());

    let (client_side, relay_client) = memory::pair();
    let sent = Arc::new(AtomicUsize::new(0));
    relay(relay_client, client_end, Arc::clone(&sent));
    RpcRemoteServer::serve(server_end, Arc::clone(&server));
    Session {
        server,
        client: RemoteClient::connect(client_side),
        sent,
    }
}
