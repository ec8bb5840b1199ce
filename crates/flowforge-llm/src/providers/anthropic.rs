use reqwest::Client;
use serde::{Deserialize, Serialize};

use flowforge_core::error::{FlowError, Result};
use flowforge_core::types::*;

use super::Endpoint;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    pub async fn complete(
        &self,
        endpoint: &Endpoint,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let api_key = endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| FlowError::MissingApiKey(request.provider.clone()))?;

        let body = build_request(request);

        let response = self
            .http
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| FlowError::LlmRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(FlowError::LlmRequest(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| FlowError::LlmRequest(e.to_string()))?;

        Ok(parse_response(parsed, &request.model))
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// System messages go to the top-level `system` field.
fn build_request(request: &CompletionRequest) -> MessagesRequest {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    MessagesRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens,
        // Anthropic caps temperature at 1.0
        temperature: request.temperature.min(1.0),
        system: if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        },
        messages: request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => None,
                Role::User => Some(ApiMessage {
                    role: "user",
                    content: m.content.clone(),
                }),
                Role::Assistant => Some(ApiMessage {
                    role: "assistant",
                    content: m.content.clone(),
                }),
            })
            .collect(),
    }
}

fn parse_response(resp: MessagesResponse, requested_model: &str) -> CompletionResponse {
    let content = resp
        .content
        .into_iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");
    let usage = resp
        .usage
        .map(|u| TokenUsage {
            prompt: u.input_tokens,
            completion: u.output_tokens,
            total: u.input_tokens + u.output_tokens,
        })
        .unwrap_or_default();

    CompletionResponse {
        content,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        usage,
        finish_reason: resp.stop_reason,
    }
}
