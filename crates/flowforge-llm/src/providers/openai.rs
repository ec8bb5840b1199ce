use reqwest::Client;
use serde::{Deserialize, Serialize};

use flowforge_core::error::{FlowError, Result};
use flowforge_core::types::*;

use super::Endpoint;

/// OpenAI-compatible client. Works with OpenAI, Groq, Gemini's
/// OpenAI endpoint, OpenRouter, Ollama, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
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
        let body = build_request(request);

        let mut req = self
            .http
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .json(&body);

        if let Some(api_key) = &endpoint.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }
        for (k, v) in &endpoint.extra_headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| FlowError::LlmRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(FlowError::LlmRequest(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| FlowError::LlmRequest(e.to_string()))?;

        Ok(parse_response(parsed, &request.model))
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

fn build_request(request: &CompletionRequest) -> ChatRequest {
    ChatRequest {
        model: request.model.clone(),
        messages: request
            .messages
            .iter()
            .map(|m| OaiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream: false,
    }
}

fn parse_response(resp: ChatResponse, requested_model: &str) -> CompletionResponse {
    let (content, finish_reason) = match resp.choices.into_iter().next() {
        Some(choice) => (choice.message.content.unwrap_or_default(), choice.finish_reason),
        None => (String::new(), None),
    };
    let usage = resp
        .usage
        .map(|u| TokenUsage {
            prompt: u.prompt_tokens,
            completion: u.completion_tokens,
            total: u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens),
        })
        .unwrap_or_default();

    CompletionResponse {
        content,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        usage,
        finish_reason,
    }
}
