use std::collections::HashSet;
use std::sync::OnceLock;

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::traits::NodeExecutor;
use flowforge_core::types::{LogLevel, WorkflowNode};

use super::{node_settings, parse_settings};

const MAX_CHUNK_SIZE: usize = 10_000;
const MAX_ENTITIES: usize = 50;

/// Splits text into word-aligned chunks and gathers basic statistics.
pub struct DocumentExecutor;

#[derive(Deserialize)]
struct DocumentSettings {
    #[serde(default)]
    text: Option<String>,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default)]
    extract_entities: bool,
}

fn default_chunk_size() -> usize {
    1000
}

impl NodeExecutor for DocumentExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let settings: DocumentSettings = node_settings(node)?;

            let text = source_text(&input)
                .or(settings.text)
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| FlowError::node(&node.id, "No text provided for document processing"))?;

            let chunks = chunk_words(&text, settings.chunk_size);
            let paragraph_count = text
                .split("\n\n")
                .filter(|p| !p.trim().is_empty())
                .count();

            ctx.node_log(
                LogLevel::Info,
                &node.id,
                format!(
                    "Processed {} characters into {} chunks",
                    text.chars().count(),
                    chunks.len()
                ),
            );

            let mut metadata = Map::new();
            metadata.insert("word_count".into(), json!(text.split_whitespace().count()));
            metadata.insert("char_count".into(), json!(text.chars().count()));
            metadata.insert("paragraph_count".into(), json!(paragraph_count));
            metadata.insert("chunk_count".into(), json!(chunks.len()));
            metadata.insert("chunk_size".into(), json!(settings.chunk_size));
            if settings.extract_entities {
                let entities = extract_entities(&text);
                ctx.node_log(
                    LogLevel::Debug,
                    &node.id,
                    format!("Extracted {} entities", entities.len()),
                );
                metadata.insert("entities".into(), Value::Array(entities));
            }

            Ok(json!({
                "original_text": text,
                "processed_text": chunks.join("\n\n"),
                "chunks": chunks,
                "metadata": metadata,
            }))
        })
    }

    fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
        let settings: DocumentSettings = parse_settings(config)?;
        if settings.chunk_size == 0 || settings.chunk_size > MAX_CHUNK_SIZE {
            return Err(format!("chunk_size must be between 1 and {MAX_CHUNK_SIZE}"));
        }
        Ok(())
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "original_text": {"type": "string"},
                "processed_text": {"type": "string"},
                "chunks": {"type": "array", "items": {"type": "string"}},
                "metadata": {"type": "object"}
            }
        })
    }
}

/// Text carried by the input: a string, or an object's `text`/`content`.
fn source_text(input: &Value) -> Option<String> {
    match input {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(obj) => ["text", "content"]
            .iter()
            .filter_map(|k| obj.get(*k).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Greedy word packing. A chunk closes when the next word would push it past
/// `chunk_size` characters; a single oversized word still gets its own chunk.
fn chunk_words(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count() + 1;
        if current_size + word_len > chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current_size = 0;
        }
        current.push(word);
        current_size += word_len;
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

fn entity_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                "email",
                Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            ),
            ("url", Regex::new(r"https?://[^\s]+").unwrap()),
            ("phone", Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap()),
            ("proper_noun", Regex::new(r"\b[A-Z][a-z]+\b").unwrap()),
        ]
    })
}

fn extract_entities(text: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    for (kind, pattern) in entity_patterns() {
        for m in pattern.find_iter(text) {
            if entities.len() >= MAX_ENTITIES {
                return entities;
            }
            if seen.insert((*kind, m.as_str())) {
                entities.push(json!({"type": kind, "value": m.as_str()}));
            }
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::types::NodeKind;

    fn node(config: Value) -> WorkflowNode {
        WorkflowNode::new("doc-1", NodeKind::Document).with_config(config)
    }

    #[test]
    fn test_chunk_words() {
        let chunks = chunk_words("aaaa bbbb cccc dddd", 10);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc dddd"]);

        let chunks = chunk_words("supercalifragilistic word", 5);
        assert_eq!(chunks, vec!["supercalifragilistic", "word"]);

        assert!(chunk_words("   ", 10).is_empty());
    }

    #[tokio::test]
    async fn test_config_text_used_without_input() {
        let node = node(json!({"text": "hello world"}));
        let mut ctx = ExecutionContext::new("run");
        let result = DocumentExecutor.execute(&node, &mut ctx, Value::Null).await;
        assert!(result.succeeded());
        let out = result.output_data;
        assert_eq!(out["original_text"], "hello world");
        assert_eq!(out["processed_text"], "hello world");
        assert_eq!(out["metadata"]["word_count"], 2);
        assert_eq!(out["metadata"]["chunk_count"], 1);
        assert_eq!(out["metadata"]["chunk_size"], 1000);
        assert!(out["metadata"].get("entities").is_none());
    }

    #[tokio::test]
    async fn test_input_text_wins_over_config() {
        let node = node(json!({"text": "from config"}));
        let mut ctx = ExecutionContext::new("run");
        let result = DocumentExecutor
            .execute(&node, &mut ctx, json!("first para\n\nsecond para"))
            .await;
        assert_eq!(result.output_data["original_text"], "first para\n\nsecond para");
        assert_eq!(result.output_data["metadata"]["paragraph_count"], 2);
    }

    #[tokio::test]
    async fn test_missing_text_fails() {
        let node = node(json!({}));
        let mut ctx = ExecutionContext::new("run");
        let result = DocumentExecutor.execute(&node, &mut ctx, Value::Null).await;
        assert!(!result.succeeded());
        assert_eq!(
            result.error_message.as_deref(),
            Some("No text provided for document processing")
        );
    }

    #[tokio::test]
    async fn test_entities_extracted() {
        let node = node(json!({
            "text": "Contact Alice at alice@example.com or 555-123-4567.",
            "extract_entities": true
        }));
        let mut ctx = ExecutionContext::new("run");
        let result = DocumentExecutor.execute(&node, &mut ctx, Value::Null).await;
        let entities = result.output_data["metadata"]["entities"].as_array().unwrap().clone();
        assert!(entities.contains(&json!({"type": "email", "value": "alice@example.com"})));
        assert!(entities.contains(&json!({"type": "phone", "value": "555-123-4567"})));
        assert!(entities.contains(&json!({"type": "proper_noun", "value": "Alice"})));
    }

    #[test]
    fn test_validate_chunk_size() {
        let ok = json!({"chunk_size": 500});
        assert!(DocumentExecutor.validate(ok.as_object().unwrap()).is_ok());
        let too_big = json!({"chunk_size": 20000});
        assert!(DocumentExecutor.validate(too_big.as_object().unwrap()).is_err());
        let wrong_type = json!({"chunk_size": "big"});
        assert!(DocumentExecutor.validate(wrong_type.as_object().unwrap()).is_err());
    }
}
