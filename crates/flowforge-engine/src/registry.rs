use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flowforge_core::config::HttpCallConfig;
use flowforge_core::traits::{CompletionClient, GraphStore, NodeExecutor};
use flowforge_core::types::NodeKind;

use crate::executors::{
    completion::CompletionExecutor, document::DocumentExecutor, graph_query::GraphQueryExecutor,
    graph_query::InMemoryGraphStore, http_call::HttpCallExecutor, logical::LogicalExecutor,
    placeholder::PlaceholderExecutor, search::SearchExecutor,
};

/// External collaborators the built-in executors depend on.
#[derive(Clone)]
pub struct ExecutorServices {
    pub completion: Arc<dyn CompletionClient>,
    pub graph_store: Arc<dyn GraphStore>,
    pub http: HttpCallConfig,
}

impl ExecutorServices {
    /// Services with the in-memory graph store and default HTTP settings.
    pub fn new(completion: Arc<dyn CompletionClient>) -> Self {
        Self {
            completion,
            graph_store: Arc::new(InMemoryGraphStore::new()),
            http: HttpCallConfig::default(),
        }
    }
}

/// Maps node kinds to executor instances.
///
/// One instance per kind, shared by every run. Kinds without a registered
/// executor all resolve to one shared placeholder, so arbitrary `type`
/// strings never grow the table.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<NodeKind, Arc<dyn NodeExecutor>>>,
    fallback: Arc<dyn NodeExecutor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
            fallback: Arc::new(PlaceholderExecutor),
        }
    }

    /// Register an executor for a kind, replacing any previous one.
    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, executor);
    }

    /// Executor for a kind. Never fails: unknown kinds resolve to a placeholder.
    pub fn get(&self, kind: &NodeKind) -> Arc<dyn NodeExecutor> {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Whether the kind has a real (non-placeholder) executor.
    pub fn is_fully_implemented(&self, kind: &NodeKind) -> bool {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
            .map_or(false, |e| !e.is_placeholder())
    }

    /// Every kind a workflow document may declare.
    pub fn supported_kinds(&self) -> Vec<NodeKind> {
        NodeKind::builtin()
    }

    /// Create a registry with all built-in executors registered.
    pub fn with_builtins(services: ExecutorServices) -> Self {
        let mut registry = Self::new();

        registry.register(NodeKind::Document, Arc::new(DocumentExecutor));

        let completion: Arc<dyn NodeExecutor> =
            Arc::new(CompletionExecutor::new(services.completion.clone()));
        for kind in [
            NodeKind::Claude4,
            NodeKind::GroqLlama,
            NodeKind::Gemini,
            NodeKind::Chatbot,
        ] {
            registry.register(kind, completion.clone());
        }

        registry.register(NodeKind::Api, Arc::new(HttpCallExecutor::new(services.http)));
        registry.register(NodeKind::Search, Arc::new(SearchExecutor));
        registry.register(
            NodeKind::GraphRag,
            Arc::new(GraphQueryExecutor::new(services.graph_store)),
        );
        registry.register(NodeKind::LogicalConnector, Arc::new(LogicalExecutor));

        registry
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_test_utils::ScriptedCompletion;

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::with_builtins(ExecutorServices::new(Arc::new(
            ScriptedCompletion::new(),
        )))
    }

    #[test]
    fn test_builtin_kinds_are_implemented() {
        let registry = registry();
        for kind in [
            NodeKind::Document,
            NodeKind::Claude4,
            NodeKind::Chatbot,
            NodeKind::Api,
            NodeKind::Search,
            NodeKind::GraphRag,
            NodeKind::LogicalConnector,
        ] {
            assert!(registry.is_fully_implemented(&kind), "{kind}");
        }
        for kind in [NodeKind::Image, NodeKind::Embeddings, NodeKind::Vapi] {
            assert!(!registry.is_fully_implemented(&kind), "{kind}");
        }
    }

    #[test]
    fn test_unknown_kinds_share_one_placeholder() {
        let registry = registry();
        let registered = registry.executors.read().unwrap().len();

        let first = registry.get(&NodeKind::from("sentiment"));
        assert!(first.is_placeholder());
        for i in 0..100 {
            let other = registry.get(&NodeKind::from(format!("made-up-{i}")));
            assert!(Arc::ptr_eq(&first, &other));
        }
        assert!(Arc::ptr_eq(&first, &registry.get(&NodeKind::Image)));
        assert_eq!(registry.executors.read().unwrap().len(), registered);
        assert!(!registry.is_fully_implemented(&NodeKind::from("sentiment")));
    }

    #[test]
    fn test_completion_kinds_share_instance() {
        let registry = registry();
        let a = registry.get(&NodeKind::Claude4);
        let b = registry.get(&NodeKind::GroqLlama);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_supported_kinds() {
        let kinds = registry().supported_kinds();
        assert_eq!(kinds.len(), 12);
        assert!(kinds.contains(&NodeKind::Vapi));
    }
}
