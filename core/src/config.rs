/// Bridge configuration
///
/// Two sources feed the bridge: the `mcpServers` JSON file describing each
/// backend, and process-level settings read from the environment. Both are
/// plain values built once in `main` and handed to the aggregator and server.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration file (`{"mcpServers": {...}}`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Raw server name -> spec, iterated in sorted order
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerSpec>,
}

/// One configured backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Executable for stdio backends
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment overrides layered over the inherited environment
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(rename = "transportType", default, skip_serializing_if = "String::is_empty")]
    pub transport_type: String,
    /// Legacy spelling of `transportType`
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub disabled: bool,
    /// Endpoint for HTTP backends
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Backend transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Spawned subprocess speaking framed JSON-RPC on stdin/stdout
    Stdio,
    /// Remote JSON-RPC endpoint reached with one POST per call
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

impl ServerSpec {
    /// Resolve the transport kind: `transportType`, then `type`, then stdio.
    ///
    /// Returns the unrecognised value as the error.
    pub fn transport_kind(&self) -> Result<TransportKind, String> {
        let mut kind = self.transport_type.trim().to_lowercase();
        if kind.is_empty() {
            kind = self.kind.trim().to_lowercase();
        }
        match kind.as_str() {
            "" | "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            _ => Err(kind),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl BridgeConfig {
    /// Load and parse a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Servers that are not marked disabled
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerSpec)> {
        self.servers.iter().filter(|(_, spec)| !spec.disabled)
    }
}

/// Process-level settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub bind_addr: String,
    pub bind_port: u16,
    /// Per backend call (and per initialize attempt) timeout
    pub backend_timeout: Duration,
    /// Initialize attempts per backend
    pub init_retry: u32,
    pub init_retry_delay: Duration,
    /// How long a subprocess gets between SIGTERM and SIGKILL
    pub shutdown_grace: Duration,
    /// Idle heartbeat period on the event-stream probe
    pub sse_heartbeat: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("./mcp.json"),
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 7011,
            backend_timeout: Duration::from_secs(45),
            init_retry: 8,
            init_retry_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(3),
            sse_heartbeat: Duration::from_secs(30),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; blank or unparseable
    /// values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            config_path: get("MCP_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            bind_port: get("BIND_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_port),
            backend_timeout: get("BACKEND_TIMEOUT")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(defaults.backend_timeout),
            init_retry: get("INIT_RETRY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.init_retry),
            init_retry_delay: get("INIT_RETRY_DELAY")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(defaults.init_retry_delay),
            shutdown_grace: get("SHUTDOWN_GRACE")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(defaults.shutdown_grace),
            sse_heartbeat: get("SSE_HEARTBEAT")
                .and_then(|v| parse_duration(&v))
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.sse_heartbeat),
        }
    }

    /// `addr:port` for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }
}

/// Parse `45`, `45s`, `500ms`, `2m`, `1h` or compound forms such as `1m30s`.
/// A bare integer is seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let millis_per_unit = match &rest[..unit_len] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += Duration::from_millis((value * millis_per_unit).round() as u64);
    }
    Some(total)
}
