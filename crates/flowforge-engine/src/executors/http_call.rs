use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use flowforge_core::config::HttpCallConfig;
use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::traits::NodeExecutor;
use flowforge_core::types::{LogLevel, WorkflowNode};

use super::{node_settings, parse_settings};

const ALLOWED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];
const ERROR_BODY_CHARS: usize = 500;
const MAX_TIMEOUT_SECS: f64 = 3600.0;

/// Makes an outbound HTTP request described by the node config.
pub struct HttpCallExecutor {
    defaults: HttpCallConfig,
}

#[derive(Deserialize)]
struct HttpCallSettings {
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    /// Seconds. Falls back to the configured default.
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    include_input_in_body: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpCallExecutor {
    pub fn new(defaults: HttpCallConfig) -> Self {
        Self { defaults }
    }
}

impl NodeExecutor for HttpCallExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let settings: HttpCallSettings = node_settings(node)?;
            let url = settings
                .url
                .filter(|u| !u.is_empty())
                .ok_or_else(|| FlowError::node(&node.id, "No URL configured"))?;
            let method_name = settings.method.to_uppercase();
            let method = Method::from_bytes(method_name.as_bytes())
                .map_err(|e| FlowError::node(&node.id, e.to_string()))?;
            let timeout = settings
                .timeout
                .unwrap_or(self.defaults.timeout_secs as f64);
            let timeout =
                Duration::try_from_secs_f64(timeout).map_err(|e| FlowError::InvalidConfig {
                    node_id: node.id.clone(),
                    message: format!("invalid timeout {timeout}: {e}"),
                })?;

            let client = reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(&self.defaults.user_agent)
                .build()
                .map_err(|e| FlowError::Http(format!("Failed to create HTTP client: {}", e)))?;

            let query: Vec<(String, String)> = settings
                .params
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect();

            let mut req = client.request(method.clone(), &url).query(&query);
            for (k, v) in &settings.headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let body = if settings.include_input_in_body && !input.is_null() {
                Some(match settings.body {
                    Some(Value::Object(mut obj)) => {
                        obj.insert("input".into(), input);
                        Value::Object(obj)
                    }
                    Some(other) => json!({"body": other, "input": input}),
                    None => json!({"input": input}),
                })
            } else {
                settings.body
            };
            if let Some(body) = body {
                if method != Method::GET {
                    req = req.json(&body);
                }
            }

            ctx.node_log(LogLevel::Info, &node.id, format!("{method_name} {url}"));

            let response = req
                .send()
                .await
                .map_err(|e| FlowError::node(&node.id, format!("Request failed: {e}")))?;

            let status = response.status();
            let headers: Map<String, Value> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|v| (k.as_str().to_string(), Value::String(v.to_string())))
                })
                .collect();
            let final_url = response.url().to_string();
            let text = response
                .text()
                .await
                .map_err(|e| FlowError::node(&node.id, format!("Failed to read response: {e}")))?;

            if status.as_u16() >= 400 {
                let snippet: String = text.chars().take(ERROR_BODY_CHARS).collect();
                return Err(FlowError::node(
                    &node.id,
                    format!("HTTP {}: {}", status.as_u16(), snippet),
                ));
            }

            let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

            ctx.node_log(
                LogLevel::Debug,
                &node.id,
                format!("Response status {}", status.as_u16()),
            );

            Ok(json!({
                "status_code": status.as_u16(),
                "headers": headers,
                "data": data,
                "url": final_url,
                "method": method_name,
                "success": true,
            }))
        })
    }

    fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
        let settings: HttpCallSettings = parse_settings(config)?;
        if settings.url.as_deref().map_or(true, str::is_empty) {
            return Err("url is required".into());
        }
        if !ALLOWED_METHODS.contains(&settings.method.to_uppercase().as_str()) {
            return Err(format!(
                "method must be one of {}",
                ALLOWED_METHODS.join(", ")
            ));
        }
        if let Some(timeout) = settings.timeout {
            if !(timeout > 0.0) || !timeout.is_finite() {
                return Err("timeout must be positive".into());
            }
            if timeout > MAX_TIMEOUT_SECS {
                return Err(format!("timeout must be at most {MAX_TIMEOUT_SECS} seconds"));
            }
        }
        Ok(())
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status_code": {"type": "integer"},
                "headers": {"type": "object"},
                "data": {},
                "url": {"type": "string"},
                "method": {"type": "string"},
                "success": {"type": "boolean"}
            }
        })
    }
}
