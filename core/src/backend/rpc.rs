/// Correlated JSON-RPC over a pair of byte streams
///
/// Each request gets the next sequence number as its id and a single-slot
/// `oneshot` channel registered in the pending table. A read loop task owns
/// the inbound stream, decodes frames and hands each one to the slot whose id
/// it carries. The connection also owns a broadcast-once closed flag: once
/// the read loop dies (or `close` is called) every current and future request
/// fails with `BackendError::Closed` instead of waiting.
///
/// Outbound frames are written by a detached task holding the writer lock,
/// so a caller whose future is dropped mid-write never leaves a partial
/// frame on the wire.
use super::framing::{read_frame, write_frame};
use super::BackendError;
use crate::protocol::{correlation_key, resolve_response, JsonRpcRequest, MissingResult};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type PendingTable = DashMap<String, oneshot::Sender<Value>>;

pub struct RpcConnection<W> {
    /// Backend name for logging
    label: String,
    writer: Arc<Mutex<W>>,
    /// Pending requests: correlation id -> response slot
    pending: PendingTable,
    /// Request ID counter; ids are never reused
    seq: AtomicU64,
    closed: watch::Sender<bool>,
}

impl<W> RpcConnection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(label: &str, writer: W) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            label: label.to_string(),
            writer: Arc::new(Mutex::new(writer)),
            pending: DashMap::new(),
            seq: AtomicU64::new(0),
            closed,
        })
    }

    /// Start the read loop over `reader`.
    ///
    /// Runs until the stream fails or ends, then marks the connection closed.
    pub fn spawn_read_loop<R>(self: &Arc<Self>, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                let payload = match read_frame(&mut reader).await {
                    Ok(payload) => payload,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        debug!(target: "stdio_backend", backend = %conn.label, "Stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(target: "stdio_backend", backend = %conn.label, error = %e, "Read error");
                        break;
                    }
                };
                conn.dispatch(&payload);
            }
            conn.close();
        })
    }

    /// Deliver one inbound frame to its waiter, if any
    fn dispatch(&self, payload: &[u8]) {
        let message: Value = match serde_json::from_slice(payload) {
            Ok(message @ Value::Object(_)) => message,
            Ok(_) => {
                debug!(target: "stdio_backend", backend = %self.label, "Ignoring non-object frame");
                return;
            }
            Err(e) => {
                warn!(target: "stdio_backend", backend = %self.label, error = %e, "Bad JSON frame");
                return;
            }
        };

        let Some(id) = message.get("id").and_then(correlation_key) else {
            trace!(target: "stdio_backend", backend = %self.label, "Dropping uncorrelated frame");
            return;
        };

        match self.pending.remove(&id) {
            Some((_, slot)) => {
                let _ = slot.send(message);
            }
            None => {
                debug!(
                    target: "stdio_backend",
                    backend = %self.label,
                    id = %id,
                    "Received response for unknown request"
                );
            }
        }
    }

    /// Send a request and wait for its response, the closed signal, or the
    /// caller dropping this future, whichever comes first.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(BackendError::Closed);
        }

        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry::register(&self.pending, id.to_string(), tx);

        let body = serde_json::to_vec(&JsonRpcRequest::new(id, method, params))?;
        self.send_frame(body).await.map_err(|e| {
            BackendError::Transport(format!("failed to write to stdin: {}", e))
        })?;
        trace!(target: "stdio_backend", backend = %self.label, id, method, "Request sent");

        let response = tokio::select! {
            biased;
            delivered = rx => delivered.map_err(|_| BackendError::Closed)?,
            _ = closed.wait_for(|closed| *closed) => return Err(BackendError::Closed),
        };
        drop(entry);

        resolve_response(response, MissingResult::WrapNull)
    }

    /// Send a notification (no id, nothing awaited)
    pub async fn notify(&self, method: &str) -> Result<(), BackendError> {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }
        let body = serde_json::to_vec(&JsonRpcRequest::notification(method))?;
        self.send_frame(body)
            .await
            .map_err(|e| BackendError::Transport(format!("failed to write notification: {}", e)))
    }

    /// Write one whole frame; runs to completion even if the caller goes away
    async fn send_frame(&self, body: Vec<u8>) -> std::io::Result<()> {
        let writer = Arc::clone(&self.writer);
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            write_frame(&mut *writer, &body).await
        })
        .await
        .unwrap_or_else(|e| Err(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }

    /// Fire the closed signal; idempotent. Outstanding waiters fail promptly.
    pub fn close(&self) {
        self.closed.send_replace(true);
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Number of requests currently awaiting a response
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Pending-table registration, removed on drop.
///
/// Covers every exit from `request`: delivery, closure, write failure and
/// the caller's future being dropped on timeout.
struct PendingEntry<'a> {
    table: &'a PendingTable,
    id: String,
}

impl<'a> PendingEntry<'a> {
    fn register(table: &'a PendingTable, id: String, slot: oneshot::Sender<Value>) -> Self {
        table.insert(id.clone(), slot);
        Self { table, id }
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
