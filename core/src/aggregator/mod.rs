/// Aggregator
///
/// Owns every live backend and the flattened tool registry. Construction is
/// the only write phase: `start` walks the config, brings each backend up
/// (initialize with retry, then one `tools/list`) and registers its tools.
/// The finished value is shared behind an `Arc` and only read afterwards,
/// so steady-state calls take no locks here.
pub mod registry;

pub use registry::{sanitize_name, ExportedTool, RegistryEntry, ResolveError, ToolRegistry};

use crate::backend::{self, Backend, BackendError, BackendOptions};
use crate::config::{BridgeConfig, Settings};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Failure of a routed tool call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Startup and call timing
#[derive(Debug, Clone, Copy)]
pub struct AggregatorOptions {
    /// Initialize attempts per backend
    pub init_retry: u32,
    pub init_retry_delay: Duration,
    /// Bound on each initialize attempt, tool listing and tool call
    pub timeout: Duration,
    pub backend: BackendOptions,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for AggregatorOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            init_retry: settings.init_retry,
            init_retry_delay: settings.init_retry_delay,
            timeout: settings.backend_timeout,
            backend: BackendOptions {
                request_timeout: settings.backend_timeout,
                shutdown_grace: settings.shutdown_grace,
            },
        }
    }
}

pub struct Aggregator {
    /// Sanitized name -> backend
    backends: HashMap<String, Arc<dyn Backend>>,
    registry: ToolRegistry,
    options: AggregatorOptions,
}

impl Aggregator {
    /// Empty aggregator; backends are added with `admit`
    pub fn new(options: AggregatorOptions) -> Self {
        Self {
            backends: HashMap::new(),
            registry: ToolRegistry::new(),
            options,
        }
    }

    /// Build from config. Entries that fail construction, initialization or
    /// tool listing are logged and skipped; an empty result is valid.
    pub async fn start(config: &BridgeConfig, options: AggregatorOptions) -> Self {
        Self::start_until(config, options, std::future::pending()).await
    }

    /// `start`, abandoned as soon as `stop` resolves.
    ///
    /// The backend being brought up at that moment is closed; everything
    /// admitted before it is returned, so the caller can still shut it down.
    pub async fn start_until<F>(config: &BridgeConfig, options: AggregatorOptions, stop: F) -> Self
    where
        F: Future<Output = ()>,
    {
        let mut aggregator = Self::new(options);
        tokio::pin!(stop);

        if config.servers.is_empty() {
            info!(target: "aggregator", "No MCP servers configured, starting with empty aggregator");
            return aggregator;
        }

        for (raw, spec) in &config.servers {
            if spec.disabled {
                info!(target: "aggregator", server = %raw, "Disabled, skipping");
                continue;
            }

            let name = sanitize_name(raw);
            if aggregator.backends.contains_key(&name) {
                warn!(
                    target: "aggregator",
                    server = %raw,
                    backend = %name,
                    "Sanitized name collides with an earlier backend, skipping"
                );
                continue;
            }

            let backend = match backend::connect(&name, spec, options.backend) {
                Ok(backend) => backend,
                Err(e) => {
                    error!(target: "aggregator", server = %raw, error = %e, "Backend create failed");
                    continue;
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = &mut stop => None,
                outcome = aggregator.admit(Arc::clone(&backend)) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                warn!(target: "aggregator", server = %raw, "Startup interrupted");
                if let Err(e) = backend.close().await {
                    warn!(target: "aggregator", backend = %name, error = %e, "Close after interrupted startup");
                }
                break;
            };

            match outcome {
                Ok(count) => {
                    info!(target: "aggregator", server = %raw, backend = %name, tools = count, "Backend ready");
                }
                Err(e) => {
                    error!(target: "aggregator", server = %raw, error = %e, "Backend skipped");
                }
            }
        }

        info!(
            target: "aggregator",
            backends = aggregator.backends.len(),
            tools = aggregator.registry.len(),
            "Aggregator started"
        );
        aggregator
    }

    /// Initialize a backend (with retry), list its tools and register them.
    ///
    /// On failure the backend is closed and not kept.
    pub async fn admit(&mut self, backend: Arc<dyn Backend>) -> Result<usize, BackendError> {
        let name = backend.name();

        let tools = match self.bring_up(backend.as_ref()).await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = backend.close().await {
                    warn!(target: "aggregator", backend = %name, error = %close_err, "Close after failed startup");
                }
                return Err(e);
            }
        };

        let count = self.registry.register(&name, tools);
        self.backends.insert(name, backend);
        Ok(count)
    }

    async fn bring_up(
        &self,
        backend: &dyn Backend,
    ) -> Result<Vec<crate::protocol::ToolDescriptor>, BackendError> {
        let name = backend.name();
        let attempts = self.options.init_retry.max(1);
        let timeout = self.options.timeout;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, backend.initialize()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(timeout)),
            };
            match outcome {
                Ok(()) => break,
                Err(e) if attempt < attempts => {
                    warn!(
                        target: "aggregator",
                        backend = %name,
                        attempt,
                        attempts,
                        error = %e,
                        "Initialize failed, retrying"
                    );
                    tokio::time::sleep(self.options.init_retry_delay).await;
                }
                Err(e) => {
                    error!(target: "aggregator", backend = %name, attempts, "Initialize failed after retries");
                    return Err(e);
                }
            }
        }

        match tokio::time::timeout(timeout, backend.list_tools()).await {
            Ok(Ok(tools)) => Ok(tools),
            Ok(Err(e)) => {
                error!(target: "aggregator", backend = %name, error = %e, "tools/list failed");
                Err(e)
            }
            Err(_) => Err(BackendError::Timeout(timeout)),
        }
    }

    /// All exported tools, sorted by name
    pub fn list_exported(&self) -> Vec<ExportedTool> {
        self.registry.exported()
    }

    pub fn tool_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Names of live backends, sorted
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a caller-supplied tool name to its backend and original name
    pub fn resolve(&self, name: &str) -> Result<(Arc<dyn Backend>, String), ResolveError> {
        let (_, entry) = self.registry.resolve(name)?;
        let backend = self
            .backends
            .get(&entry.backend)
            .cloned()
            .ok_or_else(|| ResolveError::BackendMissing(entry.backend.clone()))?;
        Ok((backend, entry.tool.name.clone()))
    }

    /// Route a call to its owning backend, bounded by the call timeout
    #[tracing::instrument(skip(self, arguments), fields(tool.name = %name))]
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, CallError> {
        let (backend, original) = self.resolve(name)?;
        debug!(target: "aggregator", backend = %backend.name(), tool = %original, "Forwarding call");

        let timeout = self.options.timeout;
        match tokio::time::timeout(timeout, backend.call_tool(&original, arguments)).await {
            Ok(result) => result.map_err(CallError::from),
            Err(_) => {
                warn!(target: "aggregator", tool = %name, "Tool call timed out");
                Err(CallError::Backend(BackendError::Timeout(timeout)))
            }
        }
    }

    /// Close every backend concurrently
    pub async fn shutdown(&self) {
        info!(target: "aggregator", backends = self.backends.len(), "Shutting down backends");

        let mut closing = JoinSet::new();
        for (name, backend) in &self.backends {
            let name = name.clone();
            let backend = Arc::clone(backend);
            closing.spawn(async move {
                if let Err(e) = backend.close().await {
                    warn!(target: "aggregator", backend = %name, error = %e, "Close failed");
                }
            });
        }
        while closing.join_next().await.is_some() {}

        info!(target: "aggregator", "Aggregator shutdown complete");
    }
}
