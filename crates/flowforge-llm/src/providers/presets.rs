/// A named provider preset.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
    /// Speaks the Anthropic Messages API instead of OpenAI chat completions.
    pub anthropic_api: bool,
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    match provider {
        "anthropic" | "claude" => Some(ProviderPreset {
            default_base_url: "https://api.anthropic.com/v1/messages",
            needs_api_key: true,
            extra_headers: &[],
            anthropic_api: true,
        }),
        "openai" => Some(ProviderPreset {
            default_base_url: "https://api.openai.com/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
            anthropic_api: false,
        }),
        "groq" => Some(ProviderPreset {
            default_base_url: "https://api.groq.com/openai/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
            anthropic_api: false,
        }),
        "gemini" | "google" => Some(ProviderPreset {
            default_base_url:
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
            anthropic_api: false,
        }),
        "openrouter" => Some(ProviderPreset {
            default_base_url: "https://openrouter.ai/api/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[("X-Title", "Flowforge")],
            anthropic_api: false,
        }),
        "ollama" => Some(ProviderPreset {
            default_base_url: "http://localhost:11434/v1/chat/completions",
            needs_api_key: false,
            extra_headers: &[],
            anthropic_api: false,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_presets() {
        let groq = get_preset("groq").unwrap();
        assert!(groq.default_base_url.starts_with("https://api.groq.com"));
        assert!(groq.needs_api_key);
        assert!(!groq.anthropic_api);

        assert!(get_preset("claude").unwrap().anthropic_api);
        assert!(!get_preset("ollama").unwrap().needs_api_key);
        assert_eq!(get_preset("openrouter").unwrap().extra_headers.len(), 1);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(get_preset("nonexistent").is_none());
    }
}
