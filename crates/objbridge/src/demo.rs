//! Objects exposed by `objbridge serve`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use objbridge_remote::{ErrorValue, PlainObject, Promise, RemoteServer, Value};

/// Names the demo server exposes.
pub const EXPOSED: [&str; 2] = ["foo", "counter"];

fn first_number(args: &[Value]) -> Option<f64> {
    args.first().and_then(Value::as_f64)
}

/// A small object with data, a getter, methods and a parent level.
pub fn foo() -> PlainObject {
    let parent = PlainObject::new()
        .with_class_name("FooFather")
        .with_property("age", 100)
        .with_method("greet", 1, |args| {
            let who = args.first().and_then(Value::as_str).unwrap_or("stranger");
            Ok(format!("hello, {who}").into())
        });

    PlainObject::new()
        .with_class_name("Foo")
        .with_property("name", "foo")
        .with_getter("message", || Ok("hello".into()))
        .with_method("getNumber", 0, |_| Ok(42.into()))
        .with_method("incrementNumberAsync", 1, |args| {
            let n = first_number(&args).unwrap_or(0.0);
            Ok(Promise::spawn(async move { Ok(Value::from(n + 1.0)) }).into())
        })
        .with_prototype(parent)
}

/// A counter whose state lives on the serving side.
pub fn counter() -> PlainObject {
    let count = Arc::new(AtomicI64::new(0));
    let reader = Arc::clone(&count);
    let bumper = Arc::clone(&count);
    let resetter = count;

    PlainObject::new()
        .with_class_name("Counter")
        .with_getter("count", move || Ok(reader.load(Ordering::SeqCst).into()))
        .with_method("inc", 1, |args| match first_number(&args) {
            Some(n) => Ok((n + 1.0).into()),
            None => Err(ErrorValue::type_error("inc expects a number")),
        })
        .with_method("bump", 0, move |_| {
            Ok((bumper.fetch_add(1, Ordering::SeqCst) + 1).into())
        })
        .with_method("reset", 0, move |_| {
            resetter.store(0, Ordering::SeqCst);
            Ok(Value::Undefined)
        })
}

/// A server exposing every demo object.
pub fn server() -> Arc<RemoteServer> {
    let server = RemoteServer::new();
    server.expose("foo", foo());
    server.expose("counter", counter());
    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_remote::RemoteClient;

    #[tokio::test]
    async fn test_demo_objects() {
        let server = server();
        assert_eq!(server.exposed_names(), vec!["counter", "foo"]);

        let client = RemoteClient::local(&server);
        let counter = client.get_remote("counter").await.unwrap();
        let counter = counter.as_remote().unwrap();
        assert_eq!(counter.call("inc", vec![42.into()]).await.unwrap(), Value::from(43));
        counter.call("bump", vec![]).await.unwrap();
        counter.call("bump", vec![]).await.unwrap();
        assert_eq!(counter.get("count").await.unwrap(), Value::from(2));

        let foo = client.get_remote("foo").await.unwrap();
        let foo = foo.as_remote().unwrap();
        assert_eq!(
            foo.call("greet", vec!["bob".into()]).await.unwrap(),
            Value::from("hello, bob")
        );
        let next = foo.call("incrementNumberAsync", vec![1.into()]).await.unwrap();
        assert_eq!(next.settle().await.unwrap(), Value::from(2));
    }
}
