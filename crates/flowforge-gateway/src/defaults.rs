use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{json, Map, Value};

use flowforge_core::types::{Capability, NodeKind, WorkflowNode};

/// Per-kind default node configuration.
///
/// Applied at deploy time to nodes that arrive with an empty config. The
/// applied values are copied into the deployment snapshot, so later updates
/// only affect deployments created afterwards.
pub struct DefaultConfigStore {
    overrides: RwLock<HashMap<NodeKind, Map<String, Value>>>,
}

impl DefaultConfigStore {
    pub fn new() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Current defaults for a kind: the stored override, else the built-in set.
    pub fn get(&self, kind: &NodeKind) -> Map<String, Value> {
        self.overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
            .cloned()
            .unwrap_or_else(|| builtin_defaults(kind))
    }

    /// Merge `patch` over the current defaults and store the result.
    pub fn update(&self, kind: &NodeKind, patch: Map<String, Value>) -> Map<String, Value> {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        let mut merged = overrides
            .get(kind)
            .cloned()
            .unwrap_or_else(|| builtin_defaults(kind));
        merged.extend(patch);
        overrides.insert(kind.clone(), merged.clone());
        tracing::info!(kind = %kind, "Default node config updated");
        merged
    }

    /// Drop any override, returning the built-in defaults.
    pub fn reset(&self, kind: &NodeKind) -> Map<String, Value> {
        self.overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(kind);
        builtin_defaults(kind)
    }

    /// Fill an empty node config with the current defaults for its kind.
    pub fn apply(&self, node: &mut WorkflowNode) {
        if node.config.is_empty() {
            node.config = self.get(&node.kind);
        }
    }
}

impl Default for DefaultConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_defaults(kind: &NodeKind) -> Map<String, Value> {
    let value = match kind.capability() {
        Capability::DocumentChunking => json!({"chunk_size": 1000, "extract_entities": false}),
        Capability::ModelCompletion => json!({"temperature": 0.7, "max_tokens": 1000}),
        Capability::HttpCall => json!({"method": "GET", "timeout": 30}),
        Capability::Search => json!({"search_type": "web", "max_results": 10}),
        Capability::GraphQuery => json!({"operation": "query", "limit": 25}),
        Capability::LogicalGate => json!({"operation": "and"}),
        Capability::Placeholder => json!({}),
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
