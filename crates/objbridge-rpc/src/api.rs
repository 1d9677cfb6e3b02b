use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use objbridge_transport::{Duplex, MessageReceiver, MessageSender};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Result, RpcError};
use crate::message::{classify, ErrorObject, RpcMessage, RpcRequest, RpcResponse};

type PendingCall = oneshot::Sender<Result<Value>>;

/// Configuration for an [`RpcApi`].
#[derive(Debug, Clone, Default)]
pub struct RpcConfig {
    /// Fail a call with [`RpcError::Timeout`] if no response arrives in time.
    /// The pending slot is freed; a late response is then dropped.
    /// Default: wait indefinitely.
    pub call_timeout: Option<Duration>,
}

/// Inbound requests from the peer, in arrival order.
///
/// Ends when the underlying channel closes.
#[derive(Debug)]
pub struct Requests {
    rx: mpsc::UnboundedReceiver<RpcRequest>,
}

impl Requests {
    pub async fn next(&mut self) -> Option<RpcRequest> {
        self.rx.recv().await
    }
}

struct Inner {
    sender: MessageSender,
    pending: Mutex<HashMap<u64, PendingCall>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    config: RpcConfig,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let bytes = serde_json::to_vec(message)?;
        self.sender.send(bytes)?;
        Ok(())
    }

    fn complete(&self, response: RpcResponse) {
        let id = response.id;
        let Some(tx) = self.pending().remove(&id) else {
            warn!(id, "promise not found for response; dropping it");
            return;
        };
        debug!(id, ok = response.error.is_none(), "response received");
        let _ = tx.send(response.into_result().map_err(RpcError::Remote));
    }

    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<(u64, PendingCall)> = self.pending().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending calls on close");
        }
        for (id, tx) in drained {
            let _ = tx.send(Err(RpcError::Closed(id)));
        }
    }
}

/// Removes a call's pending entry when dropped.
///
/// A no-op once `complete` or `fail_all` has already taken the entry.
struct PendingSlot<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.id);
    }
}

/// Call/await on top of a duplex message channel.
///
/// Cheap to clone; clones share the id counter and pending table. Dropping
/// the last clone releases the channel's sending half, which is how the
/// peer learns the session ended.
#[derive(Clone)]
pub struct RpcApi {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcApi")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcApi {
    /// Wrap a duplex with default configuration.
    ///
    /// Spawns the reader task on the current tokio runtime and returns the
    /// API together with the stream of inbound requests.
    pub fn new(duplex: Duplex) -> (Self, Requests) {
        Self::with_config(duplex, RpcConfig::default())
    }

    /// Wrap a duplex with explicit configuration.
    pub fn with_config(duplex: Duplex, config: RpcConfig) -> (Self, Requests) {
        let (sender, receiver) = duplex.split();
        let inner = Arc::new(Inner {
            sender,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            config,
        });
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(Arc::downgrade(&inner), receiver, requests_tx));
        (Self { inner }, Requests { rx: requests_rx })
    }

    /// Call `method` on the peer and wait for its response.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        // Registered before sending so a fast response always finds its slot.
        // The slot goes away with `_slot`, including when the caller drops
        // this future before a response arrives.
        self.inner.pending().insert(id, tx);
        let _slot = PendingSlot {
            inner: &self.inner,
            id,
        };
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Closed(id));
        }

        let request = RpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        self.inner.send(&request)?;
        debug!(id, method, "request sent");

        let outcome = match self.inner.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(id, method, "call timed out");
                    return Err(RpcError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or(Err(RpcError::Closed(id)))
    }

    /// Answer an inbound request with a result.
    pub fn respond(&self, request_id: u64, result: Value) -> Result<()> {
        self.inner.send(&RpcResponse::ok(request_id, result))
    }

    /// Answer an inbound request with an error.
    pub fn respond_error(&self, request_id: u64, error: ErrorObject) -> Result<()> {
        self.inner.send(&RpcResponse::err(request_id, error))
    }

    /// Number of calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Whether the channel has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

async fn read_loop(
    inner: Weak<Inner>,
    mut receiver: MessageReceiver,
    requests: mpsc::UnboundedSender<RpcRequest>,
) {
    while let Some(raw) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            debug!("rpc api dropped; stopping reader");
            return;
        };
        match classify(&raw) {
            Ok(Some(RpcMessage::Response(response))) => inner.complete(response),
            Ok(Some(RpcMessage::Request(request))) => {
                debug!(id = request.id, method = %request.method, "request received");
                if requests.send(request).is_err() {
                    debug!("request stream dropped; ignoring inbound request");
                }
            }
            Ok(None) => debug!("ignoring unclassified message"),
            Err(err) => warn!(error = %err, "dropping malformed message"),
        }
    }

    debug!("channel closed");
    if let Some(inner) = inner.upgrade() {
        inner.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_transport::memory;
    use serde_json::json;

    #[tokio::test]
    async fn test_ids_are_fresh_and_increasing() {
        let (local, mut remote) = memory::pair();
        let (api, _requests) = RpcApi::new(local);

        let first = tokio::spawn({
            let api = api.clone();
            async move { api.call("a", vec![]).await }
        });
        let second = tokio::spawn({
            let api = api.clone();
            async move { api.call("b", vec![]).await }
        });

        let mut ids = Vec::new();
        for _ in 0..2 {
            let raw = remote.receiver.recv().await.unwrap();
            let request: RpcRequest = serde_json::from_slice(&raw).unwrap();
            ids.push(request.id);
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        for id in ids {
            let response = RpcResponse::ok(id, json!(id));
            remote
                .sender
                .send(serde_json::to_vec(&response).unwrap())
                .unwrap();
        }
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(api.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_after_peer_dropped() {
        let (local, remote) = memory::pair();
        let (api, _requests) = RpcApi::new(local);
        drop(remote);

        let result = api.call("anything", vec![]).await;
        assert!(matches!(
            result,
            Err(RpcError::Transport(_)) | Err(RpcError::Closed(_))
        ));
        assert_eq!(api.pending_count(), 0);
    }
}
