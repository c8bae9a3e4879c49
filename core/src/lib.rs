// Toolhub Core Library
// Aggregates MCP tool providers (stdio subprocesses and HTTP services) behind one namespace

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod protocol;
pub mod redact;
pub mod telemetry;

// Export core types
pub use aggregator::{Aggregator, AggregatorOptions, CallError, ExportedTool, ResolveError, ToolRegistry};
pub use backend::{Backend, BackendError, BackendOptions, HttpBackend, StdioBackend};
pub use config::{BridgeConfig, ConfigError, ServerSpec, Settings, TransportKind};
pub use protocol::ToolDescriptor;
