use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::traits::NodeExecutor;
use flowforge_core::types::{LogLevel, WorkflowNode};

use super::{input_text, node_settings, parse_settings};

const CONTEXT_CHARS: usize = 50;
const MAX_CONTEXTS_PER_DOC: usize = 3;
const SYNTHETIC_WEB_RESULTS: usize = 3;

/// Keyword search over supplied documents, or a synthetic web search.
pub struct SearchExecutor;

#[derive(Deserialize)]
struct SearchSettings {
    #[serde(default)]
    query: Option<String>,
    #[serde(default = "default_search_type")]
    search_type: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
    #[serde(default)]
    documents: Vec<Value>,
}

fn default_search_type() -> String {
    "web".to_string()
}

fn default_max_results() -> usize {
    10
}

impl NodeExecutor for SearchExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let settings: SearchSettings = node_settings(node)?;

            let query = settings
                .query
                .filter(|q| !q.trim().is_empty())
                .or_else(|| {
                    input
                        .get("query")
                        .and_then(Value::as_str)
                        .filter(|q| !q.trim().is_empty())
                        .map(str::to_string)
                })
                .or_else(|| input_text(&input))
                .ok_or_else(|| FlowError::node(&node.id, "No search query provided"))?;

            let results = match settings.search_type.as_str() {
                "document" => {
                    let mut documents = settings.documents;
                    if let Some(Value::Array(docs)) = input.get("documents") {
                        documents.extend(docs.iter().cloned());
                    }
                    document_search(&query, &documents, settings.max_results)
                }
                _ => web_search(&query, settings.max_results),
            };

            ctx.node_log(
                LogLevel::Info,
                &node.id,
                format!(
                    "{} search for '{}' returned {} results",
                    settings.search_type,
                    query,
                    results.len()
                ),
            );

            Ok(json!({
                "query": query,
                "search_type": settings.search_type,
                "total_results": results.len(),
                "results": results,
            }))
        })
    }

    fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
        let settings: SearchSettings = parse_settings(config)?;
        if !(1..=100).contains(&settings.max_results) {
            return Err("max_results must be between 1 and 100".into());
        }
        if !matches!(settings.search_type.as_str(), "web" | "document") {
            return Err(format!("unknown search_type '{}'", settings.search_type));
        }
        Ok(())
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "search_type": {"type": "string"},
                "total_results": {"type": "integer"},
                "results": {"type": "array"}
            }
        })
    }
}

/// Deterministic stand-in results; no outbound call is made.
fn web_search(query: &str, max_results: usize) -> Vec<Value> {
    let slug = slugify(query);
    (1..=SYNTHETIC_WEB_RESULTS.min(max_results))
        .map(|i| {
            json!({
                "title": format!("Result {i} for '{query}'"),
                "url": format!("https://example.com/search/{slug}/{i}"),
                "snippet": format!("Synthetic search result {i} matching '{query}'."),
                "relevance": 1.0 - (i as f64 - 1.0) * 0.1,
                "metadata": {"synthetic": true},
            })
        })
        .collect()
}

fn slugify(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

fn document_search(query: &str, documents: &[Value], max_results: usize) -> Vec<Value> {
    let needle = query.to_lowercase();
    let mut results = Vec::new();

    for (index, doc) in documents.iter().enumerate() {
        let (title, text) = match doc {
            Value::String(s) => (format!("Document {}", index + 1), s.clone()),
            Value::Object(obj) => (
                obj.get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Document {}", index + 1)),
                obj.get("content")
                    .or_else(|| obj.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => continue,
        };

        let contexts = match_contexts(&text, &needle);
        if contexts.is_empty() {
            continue;
        }
        let matches = text.to_lowercase().matches(&needle).count();
        let words = text.split_whitespace().count().max(1);

        results.push(json!({
            "title": title,
            "document_index": index,
            "matches": matches,
            "contexts": contexts,
            "relevance": matches as f64 / words as f64,
        }));
        if results.len() >= max_results {
            break;
        }
    }

    results.sort_by(|a, b| {
        let ra = a["relevance"].as_f64().unwrap_or(0.0);
        let rb = b["relevance"].as_f64().unwrap_or(0.0);
        rb.total_cmp(&ra)
    });
    results
}

/// Up to three snippets around case-insensitive occurrences of `needle`.
fn match_contexts(text: &str, needle: &str) -> Vec<String> {
    if needle.is_empty() {
        return vec![];
    }
    let chars: Vec<char> = text.chars().collect();
    let lower: Vec<char> = chars.iter().flat_map(|c| c.to_lowercase()).collect();
    // Lowercasing can change length for some scripts; fall back to no contexts.
    if lower.len() != chars.len() {
        return vec![];
    }
    let needle: Vec<char> = needle.chars().collect();

    let mut contexts = Vec::new();
    let mut i = 0;
    while i + needle.len() <= lower.len() && contexts.len() < MAX_CONTEXTS_PER_DOC {
        if lower[i..i + needle.len()] == needle[..] {
            let start = i.saturating_sub(CONTEXT_CHARS);
            let end = (i + needle.len() + CONTEXT_CHARS).min(chars.len());
            contexts.push(chars[start..end].iter().collect::<String>().trim().to_string());
            i += needle.len();
        } else {
            i += 1;
        }
    }
    contexts
}
