pub mod anthropic;
pub mod openai;
pub mod presets;

use std::time::Duration;

/// Resolved target for one completion call.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub api_key: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub timeout: Duration,
}
