use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::function::Function;
use crate::lock;
use crate::value::{ErrorValue, Value};

/// Outcome of a settled promise.
pub type Settled = Result<Value, ErrorValue>;

/// A cloneable eventual value.
///
/// Every clone observes the same outcome. Awaiting a promise (it implements
/// [`IntoFuture`]) drives it on the awaiting task.
#[derive(Clone)]
pub struct Promise {
    inner: Shared<BoxFuture<'static, Settled>>,
}

impl Promise {
    /// Wrap a future. It runs when the promise is first awaited.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Settled> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// Run a future in the background right away.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Settled> + Send + 'static,
    {
        let (resolver, promise) = Promise::channel();
        spawn_detached(async move {
            resolver.settle(future.await);
        });
        promise
    }

    pub fn resolved(value: impl Into<Value>) -> Self {
        Self::new(futures::future::ready(Ok(value.into())))
    }

    pub fn rejected(error: ErrorValue) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    /// A promise settled through the returned [`Resolver`].
    ///
    /// If every resolver clone is dropped first, the promise rejects.
    pub fn channel() -> (Resolver, Promise) {
        let (tx, rx) = oneshot::channel::<Settled>();
        let promise = Promise::new(async move {
            rx.await.unwrap_or_else(|_| {
                Err(ErrorValue::new("promise was abandoned before it settled"))
            })
        });
        let resolver = Resolver {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (resolver, promise)
    }

    /// The outcome, if the promise has already settled and been polled.
    pub fn peek(&self) -> Option<&Settled> {
        self.inner.peek()
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl IntoFuture for Promise {
    type Output = Settled;
    type IntoFuture = Shared<BoxFuture<'static, Settled>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek() {
            Some(settled) => f.debug_tuple("Promise").field(settled).finish(),
            None => f.write_str("Promise(<pending>)"),
        }
    }
}

/// Settles the promise created alongside it by [`Promise::channel`].
///
/// The first settlement wins; later ones are ignored.
#[derive(Clone)]
pub struct Resolver {
    tx: Arc<Mutex<Option<oneshot::Sender<Settled>>>>,
}

impl Resolver {
    /// Returns `false` if the promise had already settled.
    pub fn settle(&self, outcome: Settled) -> bool {
        match lock(&self.tx).take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: ErrorValue) -> bool {
        self.settle(Err(error))
    }

    /// A one-argument function that fulfills the promise.
    pub fn fulfill_function(&self) -> Function {
        let resolver = self.clone();
        Function::new("fulfill", 1, move |args| {
            resolver.resolve(args.into_iter().next().unwrap_or(Value::Undefined));
            Ok(Value::Undefined)
        })
    }

    /// A one-argument function that rejects the promise.
    pub fn reject_function(&self) -> Function {
        let resolver = self.clone();
        Function::new("reject", 1, move |args| {
            let reason = args.into_iter().next().unwrap_or(Value::Undefined);
            resolver.reject(ErrorValue::from_thrown(reason));
            Ok(Value::Undefined)
        })
    }
}

/// Run a future to completion without waiting for it.
///
/// Uses the current tokio runtime when there is one, and a helper thread
/// otherwise.
pub(crate) fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => {
            std::thread::spawn(move || futures::executor::block_on(future));
        }
    }
}
