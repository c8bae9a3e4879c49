/// Backend transports
///
/// A backend is one configured tool provider. Two variants exist:
/// - `stdio`: a spawned subprocess speaking framed JSON-RPC on its pipes
/// - `http`: a remote endpoint receiving one JSON-RPC POST per call
///
/// Both sit behind the `Backend` trait so the aggregator never cares which
/// one it is talking to. Cancellation is future-drop: every operation can be
/// wrapped in `tokio::time::timeout` and cleans up after itself when dropped.
pub mod framing;
pub mod http;
pub mod process;
pub mod rpc;
pub mod stdio;

pub use http::HttpBackend;
pub use process::{ManagedProcess, ProcessState};
pub use rpc::RpcConnection;
pub use stdio::StdioBackend;

use crate::config::{ServerSpec, TransportKind};
use crate::protocol::{list_tools_params, parse_tools_page, ToolDescriptor, MAX_TOOL_PAGES};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Capability interface shared by every transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Sanitized backend name, used as the tool namespace prefix
    fn name(&self) -> String;

    fn kind(&self) -> TransportKind;

    /// Protocol handshake declaring client identity and capabilities
    async fn initialize(&self) -> Result<(), BackendError>;

    /// Tools currently advertised by the backend
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BackendError>;

    /// Invoke one tool by its original (unprefixed) name
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError>;

    /// Release transport resources; safe to call more than once
    async fn close(&self) -> Result<(), BackendError>;
}

/// Backend error types
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{backend}: missing {field}")]
    MissingField {
        backend: String,
        field: &'static str,
    },

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error envelope returned by the backend; displays its message verbatim
    #[error("{0}")]
    Remote(String),

    #[error("http {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("backend closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Convert to error code string
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::MissingField { .. } => "MISSING_FIELD",
            BackendError::UnsupportedTransport(_) => "UNSUPPORTED_TRANSPORT",
            BackendError::Transport(_) => "TRANSPORT_ERROR",
            BackendError::Protocol(_) => "PROTOCOL_ERROR",
            BackendError::Remote(_) => "REMOTE_ERROR",
            BackendError::HttpStatus { .. } => "HTTP_STATUS",
            BackendError::Closed => "CLOSED",
            BackendError::Timeout(_) => "TIMEOUT",
            BackendError::Io(_) => "IO_ERROR",
            BackendError::Json(_) => "JSON_ERROR",
        }
    }
}

/// Options shared by every backend built from config
#[derive(Debug, Clone, Copy)]
pub struct BackendOptions {
    /// HTTP client timeout
    pub request_timeout: Duration,
    /// SIGTERM -> SIGKILL window for subprocesses
    pub shutdown_grace: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(45),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

/// Construct the backend for one config entry.
///
/// Stdio backends are spawned immediately; nothing is sent until `initialize`.
pub fn connect(
    name: &str,
    spec: &ServerSpec,
    options: BackendOptions,
) -> Result<Arc<dyn Backend>, BackendError> {
    let kind = spec
        .transport_kind()
        .map_err(BackendError::UnsupportedTransport)?;
    match kind {
        TransportKind::Stdio => Ok(Arc::new(StdioBackend::spawn(
            name,
            spec,
            options.shutdown_grace,
        )?)),
        TransportKind::Http => Ok(Arc::new(HttpBackend::new(
            name,
            spec,
            options.request_timeout,
        )?)),
    }
}

/// Follow `nextCursor` through `tools/list` pages and concatenate them
pub(crate) async fn collect_tool_pages<F, Fut>(mut fetch: F) -> Result<Vec<ToolDescriptor>, BackendError>
where
    F: FnMut(Value) -> Fut,
    Fut: Future<Output = Result<Value, BackendError>>,
{
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_TOOL_PAGES {
        let page = parse_tools_page(fetch(list_tools_params(cursor.as_deref())).await?)?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(tools)
}
