// Flattened tool registry: `<backend>.<tool>` -> owning backend + original name

use crate::protocol::ToolDescriptor;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Separator between backend prefix and tool name in exported names
pub const NAMESPACE_SEPARATOR: char = '.';

/// Placeholder for names that sanitize to nothing
pub const FALLBACK_BACKEND_NAME: &str = "srv";

/// Make a raw server name safe to use as a namespace prefix.
///
/// Runs of characters outside `[A-Za-z0-9]` collapse into one `_`, and
/// leading/trailing underscores are trimmed.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_separator = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_separator = false;
        } else if !in_separator {
            out.push('_');
            in_separator = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_BACKEND_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// One exported tool
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Sanitized backend name
    pub backend: String,
    /// Descriptor as advertised, with the original (unprefixed) name
    pub tool: ToolDescriptor,
}

/// Tool as presented to front-door clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Name resolution failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("ambiguous tool: {name} (matches {})", .candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    #[error("backend missing: {0}")]
    BackendMissing(String),
}

/// Registry built during startup and read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend's tools under its prefix; returns how many were added
    pub fn register(&mut self, backend: &str, tools: Vec<ToolDescriptor>) -> usize {
        let mut added = 0;
        for tool in tools {
            let exported = format!("{backend}{NAMESPACE_SEPARATOR}{}", tool.name);
            let entry = RegistryEntry {
                backend: backend.to_string(),
                tool,
            };
            if self.entries.insert(exported.clone(), entry).is_some() {
                warn!(target: "aggregator", tool = %exported, "Duplicate tool name, keeping the later one");
            } else {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, exported: &str) -> Option<&RegistryEntry> {
        self.entries.get(exported)
    }

    /// Resolve a caller-supplied name to its registry entry.
    ///
    /// An exact qualified match wins. A name without a separator is matched
    /// against the suffix of every exported name and must hit exactly one.
    /// Dotted names that are not registered are unknown.
    pub fn resolve(&self, name: &str) -> Result<(&str, &RegistryEntry), ResolveError> {
        if let Some((exported, entry)) = self.entries.get_key_value(name) {
            return Ok((exported.as_str(), entry));
        }
        if name.is_empty() || name.contains(NAMESPACE_SEPARATOR) {
            return Err(ResolveError::Unknown(name.to_string()));
        }

        let suffix = format!("{NAMESPACE_SEPARATOR}{name}");
        let mut matches = self
            .entries
            .iter()
            .filter(|(exported, _)| exported.ends_with(&suffix));

        match (matches.next(), matches.next()) {
            (Some((exported, entry)), None) => Ok((exported.as_str(), entry)),
            (None, _) => Err(ResolveError::Unknown(name.to_string())),
            (Some(first), Some(second)) => {
                let candidates = [first, second]
                    .into_iter()
                    .chain(matches)
                    .map(|(exported, _)| exported.clone())
                    .collect();
                Err(ResolveError::Ambiguous {
                    name: name.to_string(),
                    candidates,
                })
            }
        }
    }

    /// Every exported tool, sorted by exported name
    pub fn exported(&self) -> Vec<ExportedTool> {
        self.entries
            .iter()
            .map(|(exported, entry)| ExportedTool {
                name: exported.clone(),
                description: entry
                    .tool
                    .description
                    .clone()
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| format!("From {} -> {}", entry.backend, entry.tool.name)),
                input_schema: if entry.tool.input_schema.is_null() {
                    json!({ "type": "object" })
                } else {
                    entry.tool.input_schema.clone()
                },
            })
            .collect()
    }
}
