use std::path::PathBuf;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::traits::{CompletionClient, NodeExecutor};
use flowforge_core::types::*;

// ── Workflow builders ───────────────────────────────────────────

/// A node with the given id and type string and empty config.
pub fn node(id: &str, kind: &str) -> WorkflowNode {
    WorkflowNode::new(id, kind).with_label(id)
}

/// `doc-1 (document, text "hello world") -> ai-1 (chatbot)`.
pub fn document_to_chatbot() -> WorkflowDefinition {
    WorkflowDefinition::new("doc to chat")
        .with_node(node("doc-1", "document").with_config(json!({"text": "hello world"})))
        .with_node(node("ai-1", "chatbot"))
        .with_edge("doc-1", "ai-1")
}

/// `a -> b`, `a -> c`, `b -> d`, `c -> d`, all placeholder nodes.
pub fn diamond() -> WorkflowDefinition {
    WorkflowDefinition::new("diamond")
        .with_node(node("a", "vapi"))
        .with_node(node("b", "vapi"))
        .with_node(node("c", "vapi"))
        .with_node(node("d", "vapi"))
        .with_edge("a", "b")
        .with_edge("a", "c")
        .with_edge("b", "d")
        .with_edge("c", "d")
}

/// Write `contents` to a file in a fresh temp dir. Keep the dir alive for
/// as long as the path is used.
pub fn temp_file(name: &str, contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write temp file");
    (dir, path)
}

// ── Completion client ───────────────────────────────────────────

enum Script {
    Echo,
    Reply(String),
    Fail(String),
}

/// In-process [`CompletionClient`]. Records every request.
///
/// By default it answers `"echo: <last user message>"`.
pub struct ScriptedCompletion {
    script: Script,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::with_script(Script::Echo)
    }

    /// Always answer with `content`.
    pub fn replying(content: impl Into<String>) -> Self {
        Self::with_script(Script::Reply(content.into()))
    }

    /// Always fail with an `LlmRequest` error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(message.into()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<CompletionResponse>> {
        Box::pin(async move {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let model = request.model.clone();
            self.requests.lock().unwrap().push(request);

            let content = match &self.script {
                Script::Echo => format!("echo: {last_user}"),
                Script::Reply(text) => text.clone(),
                Script::Fail(message) => return Err(FlowError::LlmRequest(message.clone())),
            };
            let prompt = last_user.split_whitespace().count() as u64;
            let completion = content.split_whitespace().count() as u64;
            Ok(CompletionResponse {
                content,
                model,
                usage: TokenUsage {
                    prompt,
                    completion,
                    total: prompt + completion,
                },
                finish_reason: Some("stop".to_string()),
            })
        })
    }
}

// ── Executors ───────────────────────────────────────────────────

/// Executor that always fails with a fixed message.
pub struct FailingExecutor {
    message: String,
}

impl FailingExecutor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl NodeExecutor for FailingExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        _ctx: &'a mut ExecutionContext,
        _input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move { Err(FlowError::node(&node.id, self.message.clone())) })
    }
}

/// Executor that returns its input unchanged.
pub struct EchoExecutor;

impl NodeExecutor for EchoExecutor {
    fn run<'a>(
        &'a self,
        _node: &'a WorkflowNode,
        _ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move { Ok(input) })
    }
}
