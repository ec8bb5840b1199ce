pub mod providers;

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use flowforge_core::config::ProviderConfig;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::traits::CompletionClient;
use flowforge_core::types::{CompletionRequest, CompletionResponse};

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
use providers::presets::get_preset;
use providers::Endpoint;

/// Routes completion requests to the right provider API.
///
/// Anthropic goes through the Messages API; everything else uses the
/// OpenAI-compatible client with the provider's preset base URL unless the
/// config overrides it.
pub struct ProviderRouter {
    providers: HashMap<String, ProviderConfig>,
    anthropic: AnthropicClient,
    openai: OpenAiClient,
}

impl ProviderRouter {
    pub fn new(providers: HashMap<String, ProviderConfig>) -> Self {
        Self {
            providers,
            anthropic: AnthropicClient::new(),
            openai: OpenAiClient::new(),
        }
    }

    /// Resolve URL, key, and headers for a request.
    fn endpoint(&self, request: &CompletionRequest) -> Result<(Endpoint, bool)> {
        let preset = get_preset(&request.provider);
        let config = self.providers.get(&request.provider);

        let url = config
            .and_then(|c| c.base_url.clone())
            .or_else(|| preset.as_ref().map(|p| p.default_base_url.to_string()))
            .ok_or_else(|| {
                FlowError::LlmRequest(format!(
                    "Unknown provider '{}' and no base_url configured",
                    request.provider
                ))
            })?;

        let api_key = request
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| config.and_then(|c| c.api_key.clone()))
            .filter(|k| !k.is_empty());

        let needs_key = preset.as_ref().map(|p| p.needs_api_key).unwrap_or(false);
        if needs_key && api_key.is_none() {
            return Err(FlowError::MissingApiKey(request.provider.clone()));
        }

        let timeout = Duration::from_secs(
            config
                .map(|c| c.timeout_secs)
                .unwrap_or_else(|| ProviderConfig::default().timeout_secs),
        );
        let extra_headers = preset
            .as_ref()
            .map(|p| {
                p.extra_headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let anthropic_api = preset.map(|p| p.anthropic_api).unwrap_or(false);

        Ok((
            Endpoint {
                url,
                api_key,
                extra_headers,
                timeout,
            },
            anthropic_api,
        ))
    }
}

impl CompletionClient for ProviderRouter {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<CompletionResponse>> {
        Box::pin(async move {
            let (endpoint, anthropic_api) = self.endpoint(&request)?;
            debug!(
                provider = %request.provider,
                model = %request.model,
                url = %endpoint.url,
                "Sending completion request"
            );
            if anthropic_api {
                self.anthropic.complete(&endpoint, &request).await
            } else {
                self.openai.complete(&endpoint, &request).await
            }
        })
    }
}

/// Create a completion client from provider settings.
pub fn create_client(providers: &HashMap<String, ProviderConfig>) -> ProviderRouter {
    ProviderRouter::new(providers.clone())
}
