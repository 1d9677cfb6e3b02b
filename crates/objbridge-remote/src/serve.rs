//! Binding a [`RemoteServer`] to a connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use objbridge_rpc::{ErrorObject, Requests, RpcApi, RpcConfig, RpcError, RpcRequest};
use objbridge_transport::Duplex;

use crate::decode::decode_argument;
use crate::error::{Operation, RemoteError, Result};
use crate::meta::{CallbackId, Meta};
use crate::server::{CallbackHandler, RemoteServer};
use crate::value::{ErrorValue, Value};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Sends `invokeCallback` requests to the peer that owns the callbacks.
pub struct RpcCallbackHandler {
    rpc: RpcApi,
    server: Weak<RemoteServer>,
    context_id: String,
}

impl RpcCallbackHandler {
    pub fn new(rpc: RpcApi, server: &Arc<RemoteServer>, context_id: impl Into<String>) -> Self {
        Self {
            rpc,
            server: Arc::downgrade(server),
            context_id: context_id.into(),
        }
    }
}

impl CallbackHandler for RpcCallbackHandler {
    fn invoke(&self, callback_id: CallbackId, args: Vec<Meta>) -> BoxFuture<'static, Result<bool>> {
        let rpc = self.rpc.clone();
        let server = self.server.clone();
        let context_id = self.context_id.clone();
        async move {
            let params = vec![JsonValue::from(callback_id), serde_json::to_value(args)?];
            match rpc
                .call(Operation::InvokeCallback.method_name(), params)
                .await
            {
                Ok(delivered) => Ok(delivered.as_bool().unwrap_or(false)),
                Err(RpcError::Remote(error)) => {
                    Err(callback_failure(error, server.upgrade(), &context_id))
                }
                Err(err) => Err(err.into()),
            }
        }
        .boxed()
    }
}

fn callback_failure(
    error: ErrorObject,
    server: Option<Arc<RemoteServer>>,
    context_id: &str,
) -> RemoteError {
    let ErrorObject { message, data } = error;
    let thrown = server.zip(data).and_then(|(server, data)| {
        match serde_json::from_value::<Meta>(data).ok()? {
            Meta::Exception { value } => decode_argument(*value, &server, context_id).ok(),
            _ => None,
        }
    });
    match thrown {
        Some(Value::Error(error)) => RemoteError::from_error_value(error),
        Some(other) => RemoteError::Thrown(ErrorValue::from_thrown(other)),
        None => RemoteError::Thrown(ErrorValue::new(message)),
    }
}

/// One connection served by a shared [`RemoteServer`].
///
/// Each connection gets its own context id and callback handler. When the
/// connection ends, everything registered for that context is released.
pub struct RpcRemoteServer {
    rpc: RpcApi,
    requests: Requests,
    server: Arc<RemoteServer>,
    context_id: String,
}

impl RpcRemoteServer {
    pub fn new(duplex: Duplex, server: Arc<RemoteServer>) -> Self {
        Self::with_config(duplex, server, RpcConfig::default())
    }

    pub fn with_config(duplex: Duplex, server: Arc<RemoteServer>, config: RpcConfig) -> Self {
        let context_id = format!("conn-{}", NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
        let (rpc, requests) = RpcApi::with_config(duplex, config);
        server.set_callback_handler(
            &context_id,
            Arc::new(RpcCallbackHandler::new(rpc.clone(), &server, &context_id)),
        );
        Self {
            rpc,
            requests,
            server,
            context_id,
        }
    }

    /// Serve `duplex` on a background task.
    pub fn serve(duplex: Duplex, server: Arc<RemoteServer>) -> JoinHandle<()> {
        tokio::spawn(Self::new(duplex, server).run())
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Answer requests until the connection closes.
    pub async fn run(mut self) {
        info!(context = %self.context_id, "connection opened");
        while let Some(request) = self.requests.next().await {
            let RpcRequest { id, method, params } = request;
            debug!(id, method = %method, context = %self.context_id, "dispatching");

            let sent = match self.server.dispatch(&self.context_id, &method, params) {
                Ok(result) => self.rpc.respond(id, result),
                Err(err) => {
                    debug!(id, method = %method, error = %err, "request failed");
                    self.rpc
                        .respond_error(id, self.server.error_object(&self.context_id, &err))
                }
            };
            if let Err(err) = sent {
                warn!(id, method = %method, error = %err, "could not send response");
                break;
            }
        }
        let released = self.server.release_context(&self.context_id);
        info!(context = %self.context_id, released, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteClient;
    use crate::object::PlainObject;
    use objbridge_transport::memory;

    #[tokio::test]
    async fn test_connection_close_releases_context() {
        let server = RemoteServer::new();
        server.expose("foo", PlainObject::new().with_property("age", 1));

        let (server_end, client_end) = memory::pair();
        let task = RpcRemoteServer::serve(server_end, Arc::clone(&server));
        let client = RemoteClient::connect(client_end);

        let foo = client.get_remote("foo").await.unwrap();
        assert!(foo.as_remote().is_some());
        assert_eq!(server.objects().len(), 1);

        drop(foo);
        drop(client);
        task.await.unwrap();
        assert!(server.objects().is_empty());
    }

    #[test]
    fn test_callback_failure_without_data_keeps_message() {
        let err = callback_failure(ErrorObject::new("boom"), None, "conn-0");
        assert!(matches!(err, RemoteError::Thrown(ref e) if e.message == "boom"));
    }
}
