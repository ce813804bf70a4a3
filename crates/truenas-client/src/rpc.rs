//! JSON-RPC 2.0 core: id allocation, pending-response registry, dispatch.
//!
//! One [`RpcCore`] wraps one live WebSocket connection. Any number of
//! callers issue calls concurrently; a single background reader owns the
//! read half and routes each reply to the waiter registered under its id.
//! Responses may arrive in any order. The writer half is serialized by an
//! async mutex held only for the duration of one frame write; replies are
//! never awaited under it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::{ClientError, ConnOp, Result, RpcError};
use crate::transport::{self, FrameSink, FrameStream};

const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC request frame.
#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    method: &'a str,
    params: &'a Value,
}

/// Incoming JSON-RPC response frame.
#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Response>>>;

/// Multiplexing JSON-RPC core over one WebSocket connection.
pub struct RpcCore {
    writer: tokio::sync::Mutex<FrameSink>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: AtomicBool,
    closed_notify: Notify,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RpcCore {
    /// Starts a core over the split halves of a connected transport,
    /// spawning the background reader.
    pub fn start(sink: FrameSink, stream: FrameStream) -> Arc<Self> {
        let core = Arc::new(Self {
            writer: tokio::sync::Mutex::new(sink),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            reader: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::read_loop(Arc::clone(&core), stream));
        *core.reader.lock().unwrap() = Some(handle);
        core
    }

    /// Issues a call and waits for the correlated reply.
    ///
    /// The caller is expected to wrap this in its own deadline; dropping
    /// the returned future (timeout or cancellation) deregisters the
    /// waiter so the pending map never leaks entries. Session loss while
    /// waiting surfaces as a read connection error.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(ClientError::conn_closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        // The map may have been drained between the closed check and the
        // insert; re-checking avoids a waiter that can never be woken.
        if self.is_closed() {
            return Err(ClientError::conn_closed());
        }

        let frame = serde_json::to_string(&Request {
            jsonrpc: JSONRPC_VERSION,
            id: Some(&id),
            method,
            params: &params,
        })
        .map_err(ClientError::Decode)?;

        {
            let mut writer = self.writer.lock().await;
            transport::send_frame(&mut writer, frame).await?;
        }

        let response = rx.await.map_err(|_| ClientError::conn_closed())?;
        match response.error {
            Some(err) => Err(ClientError::Rpc(err)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Sends a notification (no id, no reply expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::conn_closed());
        }

        let frame = serde_json::to_string(&Request {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params: &params,
        })
        .map_err(ClientError::Decode)?;

        let mut writer = self.writer.lock().await;
        transport::send_frame(&mut writer, frame).await
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Whether the connection behind this core has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection is torn down.
    pub async fn wait_closed(&self) {
        let notified = self.closed_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Tears the connection down: closes the socket, fails every pending
    /// call, and wakes anyone in [`wait_closed`](Self::wait_closed).
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = futures_util::SinkExt::close(&mut *writer).await;
        }
        self.fail_pending();
        self.closed_notify.notify_waiters();
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Marks the core closed from the reader side (socket already gone).
    fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.fail_pending();
        self.closed_notify.notify_waiters();
    }

    /// Drops every registered waiter; their `rx.await` resolves to a
    /// closed-connection error.
    fn fail_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending calls on session loss");
        }
    }

    async fn read_loop(core: Arc<Self>, mut stream: FrameStream) {
        loop {
            match transport::recv_frame(&mut stream).await {
                Ok(Some(frame)) => core.dispatch(&frame),
                Ok(None) => {
                    debug!("connection closed by peer");
                    break;
                }
                Err(e) => {
                    if !core.is_closed() {
                        warn!(error = %e, "read loop terminated");
                    }
                    break;
                }
            }
        }
        core.mark_closed();
    }

    /// Routes one reply frame to its waiter.
    fn dispatch(&self, frame: &str) {
        let response: Response = match serde_json::from_str(frame) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame");
                return;
            }
        };

        let Some(id) = response.id.clone() else {
            debug!("dropping frame without id");
            return;
        };

        let sender = self.pending.lock().unwrap().remove(&id);
        match sender {
            Some(tx) => {
                // Send fails only if the caller gave up (timeout/cancel)
                // between our remove and its deregistration; that is fine.
                let _ = tx.send(response);
            }
            None => debug!(%id, "no waiter for reply"),
        }
    }
}

/// Removes the pending entry when a call future is dropped before its
/// reply arrives. On the happy path the dispatcher has already removed
/// the entry and this is a no-op.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().unwrap().remove(self.id);
    }
}
