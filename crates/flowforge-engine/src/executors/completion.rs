use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::traits::{CompletionClient, NodeExecutor};
use flowforge_core::types::{ChatMessage, CompletionRequest, LogLevel, NodeKind, WorkflowNode};

use super::{input_text, node_settings, parse_settings};

const DEFAULT_USER_PROMPT: &str = "Please provide a helpful response.";

/// Calls a chat model. Shared by every model-completion node kind; the
/// provider and default model come from the node's kind.
pub struct CompletionExecutor {
    client: Arc<dyn CompletionClient>,
}

#[derive(Deserialize)]
struct CompletionSettings {
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    user_prompt: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

/// Provider name for a model-completion kind.
pub fn provider_for(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Claude4 => "anthropic",
        NodeKind::GroqLlama => "groq",
        NodeKind::Gemini => "gemini",
        _ => "openai",
    }
}

/// Model used when the node config does not name one.
pub fn default_model_for(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Claude4 => "claude-3-haiku-20240307",
        NodeKind::GroqLlama => "llama3-70b-8192",
        NodeKind::Gemini => "gemini-1.5-flash",
        _ => "gpt-4o",
    }
}

impl CompletionExecutor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

impl NodeExecutor for CompletionExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let settings: CompletionSettings = node_settings(node)?;
            let provider = provider_for(&node.kind);
            let model = settings
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| default_model_for(&node.kind).to_string());

            // Node config first, then the run's key bag (by kind, then provider).
            let api_key = settings
                .api_key
                .filter(|k| !k.is_empty())
                .or_else(|| ctx.run_data_str(node.kind.as_str()).map(str::to_string))
                .or_else(|| ctx.run_data_str(provider).map(str::to_string));

            let mut messages = Vec::new();
            if let Some(system) = settings.system_prompt.filter(|s| !s.trim().is_empty()) {
                messages.push(ChatMessage::system(system));
            }
            let user_prompt = settings.user_prompt.filter(|s| !s.trim().is_empty());
            let user_content = match (user_prompt, input_text(&input)) {
                (Some(prompt), Some(text)) => format!("{prompt}\n\n{text}"),
                (Some(prompt), None) => prompt,
                (None, Some(text)) => text,
                (None, None) => DEFAULT_USER_PROMPT.to_string(),
            };
            messages.push(ChatMessage::user(user_content));

            ctx.node_log(
                LogLevel::Info,
                &node.id,
                format!("Calling {provider} model {model}"),
            );

            let response = self
                .client
                .complete(CompletionRequest {
                    provider: provider.to_string(),
                    model: model.clone(),
                    messages,
                    temperature: settings.temperature,
                    max_tokens: settings.max_tokens,
                    api_key,
                })
                .await
                .map_err(|e| FlowError::node(&node.id, e.to_string()))?;

            ctx.node_log(
                LogLevel::Debug,
                &node.id,
                format!("Received {} completion tokens", response.usage.completion),
            );

            Ok(json!({
                "content": response.content,
                "model": response.model,
                "provider": provider,
                "tokens": {
                    "prompt": response.usage.prompt,
                    "completion": response.usage.completion,
                    "total": response.usage.total,
                },
                "finish_reason": response.finish_reason,
                "metadata": {
                    "node_type": node.kind.as_str(),
                    "temperature": settings.temperature,
                    "max_tokens": settings.max_tokens,
                },
            }))
        })
    }

    fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
        let settings: CompletionSettings = parse_settings(config)?;
        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err("temperature must be between 0 and 2".into());
        }
        if !(1..=10_000).contains(&settings.max_tokens) {
            return Err("max_tokens must be between 1 and 10000".into());
        }
        Ok(())
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "model": {"type": "string"},
                "provider": {"type": "string"},
                "tokens": {"type": "object"},
                "finish_reason": {"type": ["string", "null"]}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::types::{Role, TaggedOutput};
    use flowforge_test_utils::ScriptedCompletion;

    fn setup() -> (Arc<ScriptedCompletion>, CompletionExecutor) {
        let client = Arc::new(ScriptedCompletion::new());
        let executor = CompletionExecutor::new(client.clone());
        (client, executor)
    }

    #[tokio::test]
    async fn test_defaults_per_kind() {
        let (client, executor) = setup();
        let node = WorkflowNode::new("ai-1", NodeKind::GroqLlama);
        let mut ctx = ExecutionContext::new("run");
        let result = executor.execute(&node, &mut ctx, json!("Summarize this")).await;
        assert!(result.succeeded(), "{:?}", result.error_message);

        let req = client.last_request().unwrap();
        assert_eq!(req.provider, "groq");
        assert_eq!(req.model, "llama3-70b-8192");
        assert_eq!(req.max_tokens, 1000);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].content, "Summarize this");

        assert_eq!(result.output_data["provider"], "groq");
        assert_eq!(result.output_data["content"], "echo: Summarize this");
    }

    #[tokio::test]
    async fn test_prompts_and_document_input() {
        let (client, executor) = setup();
        let node = WorkflowNode::new("ai-1", NodeKind::Claude4).with_config(json!({
            "system_prompt": "You are terse.",
            "user_prompt": "Summarize:",
            "model": "claude-3-5-sonnet-latest"
        }));
        let mut ctx = ExecutionContext::new("run");
        let input = json!({"original_text": "raw", "processed_text": "chunked text"});
        executor.execute(&node, &mut ctx, input).await;

        let req = client.last_request().unwrap();
        assert_eq!(req.model, "claude-3-5-sonnet-latest");
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1].content, "Summarize:\n\nchunked text");
    }

    #[tokio::test]
    async fn test_no_input_uses_default_prompt() {
        let (client, executor) = setup();
        let node = WorkflowNode::new("ai-1", NodeKind::Chatbot);
        let mut ctx = ExecutionContext::new("run");
        executor.execute(&node, &mut ctx, Value::Null).await;
        assert_eq!(
            client.last_request().unwrap().messages[0].content,
            DEFAULT_USER_PROMPT
        );
    }

    #[tokio::test]
    async fn test_graph_envelope_input() {
        let (client, executor) = setup();
        let node = WorkflowNode::new("ai-1", NodeKind::Gemini);
        let mut ctx = ExecutionContext::new("run");
        let envelope = TaggedOutput::GraphQueryResult(json!({"results": [{"name": "Ferris"}]}))
            .into_value();
        executor.execute(&node, &mut ctx, envelope).await;
        let content = &client.last_request().unwrap().messages[0].content;
        assert!(content.starts_with("Knowledge graph results:"));
        assert!(content.contains("Ferris"));
    }

    #[tokio::test]
    async fn test_api_key_resolution_order() {
        let (client, executor) = setup();
        let mut run_data = Map::new();
        run_data.insert("claude4".into(), json!("sk-from-run"));
        let node = WorkflowNode::new("ai-1", NodeKind::Claude4);

        let mut ctx = ExecutionContext::new("run").with_run_data(run_data.clone());
        executor.execute(&node, &mut ctx, json!("hi")).await;
        assert_eq!(
            client.last_request().unwrap().api_key.as_deref(),
            Some("sk-from-run")
        );

        let node = node.with_config(json!({"api_key": "sk-from-node"}));
        let mut ctx = ExecutionContext::new("run").with_run_data(run_data);
        executor.execute(&node, &mut ctx, json!("hi")).await;
        assert_eq!(
            client.last_request().unwrap().api_key.as_deref(),
            Some("sk-from-node")
        );
    }

    #[tokio::test]
    async fn test_client_error_becomes_failed_result() {
        let client = Arc::new(ScriptedCompletion::failing("rate limited"));
        let executor = CompletionExecutor::new(client);
        let node = WorkflowNode::new("ai-1", NodeKind::Chatbot);
        let mut ctx = ExecutionContext::new("run");
        let result = executor.execute(&node, &mut ctx, json!("hi")).await;
        assert!(!result.succeeded());
        assert!(result.error_message.unwrap().contains("rate limited"));
    }

    #[test]
    fn test_validate_ranges() {
        let (_, executor) = setup();
        let ok = json!({"temperature": 1.2, "max_tokens": 500});
        assert!(executor.validate(ok.as_object().unwrap()).is_ok());
        let hot = json!({"temperature": 3.0});
        assert!(executor.validate(hot.as_object().unwrap()).is_err());
        let zero = json!({"max_tokens": 0});
        assert!(executor.validate(zero.as_object().unwrap()).is_err());
    }
}
