use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use flowforge_core::context::ExecutionContext;
use flowforge_core::error::{FlowError, Result};
use flowforge_core::traits::{GraphStore, NodeExecutor};
use flowforge_core::types::{LogLevel, TaggedOutput, WorkflowNode};

use super::{input_text, node_settings, parse_settings};

const MAX_ENTITIES: usize = 20;
const MAX_RELATIONSHIPS: usize = 15;
const OPERATIONS: [&str; 4] = ["query", "extract", "store", "analyze"];
const STOP_WORDS: [&str; 14] = [
    "The", "This", "That", "These", "Those", "A", "An", "In", "On", "At", "To", "From", "With",
    "By",
];

// ── In-memory store ─────────────────────────────────────────────

/// Process-local graph store. Entities are keyed by name; storing an
/// entity that already exists bumps its mention count.
pub struct InMemoryGraphStore {
    entities: RwLock<Vec<Value>>,
    relationships: RwLock<Vec<Value>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(Vec::new()),
            relationships: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn store(
        &self,
        entities: Vec<Value>,
        relationships: Vec<Value>,
    ) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let mut stored = 0;
            {
                let mut existing = self.entities.write().unwrap_or_else(|e| e.into_inner());
                for entity in entities {
                    let Some(name) = entity.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    let mentions = entity.get("mentions").and_then(Value::as_u64).unwrap_or(1);
                    match existing.iter_mut().find(|e| e["name"] == name) {
                        Some(found) => {
                            let total = found["mentions"].as_u64().unwrap_or(0) + mentions;
                            found["mentions"] = json!(total);
                        }
                        None => existing.push(entity),
                    }
                    stored += 1;
                }
            }

            let mut existing = self.relationships.write().unwrap_or_else(|e| e.into_inner());
            for rel in relationships {
                if rel.get("source").is_none() || rel.get("target").is_none() {
                    continue;
                }
                if !existing.contains(&rel) {
                    existing.push(rel);
                }
                stored += 1;
            }
            Ok(stored)
        })
    }

    fn query(&self, text: String, limit: usize) -> BoxFuture<'_, Result<Vec<Value>>> {
        Box::pin(async move {
            let terms: Vec<String> = text
                .split_whitespace()
                .map(str::to_lowercase)
                .filter(|t| t.len() > 2)
                .collect();
            let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
            let relationships = self.relationships.read().unwrap_or_else(|e| e.into_inner());

            let results = entities
                .iter()
                .filter(|entity| {
                    let name = entity["name"].as_str().unwrap_or_default().to_lowercase();
                    terms.is_empty() || terms.iter().any(|t| name.contains(t.as_str()))
                })
                .take(limit)
                .map(|entity| {
                    let related: Vec<Value> = relationships
                        .iter()
                        .filter(|r| r["source"] == entity["name"] || r["target"] == entity["name"])
                        .cloned()
                        .collect();
                    json!({"entity": entity, "relationships": related})
                })
                .collect();
            Ok(results)
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
            let relationships = self.relationships.read().unwrap_or_else(|e| e.into_inner());
            let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
            for entity in entities.iter() {
                let kind = entity["type"].as_str().unwrap_or("unknown").to_string();
                *by_type.entry(kind).or_default() += 1;
            }
            Ok(json!({
                "entity_count": entities.len(),
                "relationship_count": relationships.len(),
                "entity_types": by_type,
            }))
        })
    }
}

// ── Executor ────────────────────────────────────────────────────

/// Knowledge-graph operations. Every output is wrapped in the
/// `graph-query-result` envelope so downstream nodes can recognize it.
pub struct GraphQueryExecutor {
    store: Arc<dyn GraphStore>,
}

#[derive(Deserialize)]
struct GraphQuerySettings {
    #[serde(default = "default_operation")]
    operation: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_operation() -> String {
    "query".to_string()
}

fn default_limit() -> usize {
    25
}

impl GraphQueryExecutor {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    fn store_metadata(&self) -> Value {
        json!({
            "store": self.store.name(),
            "persistent": self.store.is_persistent(),
        })
    }
}

impl NodeExecutor for GraphQueryExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let settings: GraphQuerySettings = node_settings(node)?;
            ctx.node_log(
                LogLevel::Info,
                &node.id,
                format!(
                    "Running graph {} against {} store",
                    settings.operation,
                    self.store.name()
                ),
            );

            let payload = match settings.operation.as_str() {
                "extract" => {
                    let text = input_text(&input)
                        .or(settings.text)
                        .filter(|t| !t.trim().is_empty())
                        .ok_or_else(|| {
                            FlowError::node(&node.id, "No text provided for knowledge extraction")
                        })?;
                    let entities = extract_entities(&text);
                    let relationships = extract_relationships(&text, &entities);
                    let stored = self
                        .store
                        .store(entities.clone(), relationships.clone())
                        .await?;
                    ctx.node_log(
                        LogLevel::Debug,
                        &node.id,
                        format!(
                            "Extracted {} entities and {} relationships",
                            entities.len(),
                            relationships.len()
                        ),
                    );
                    json!({
                        "operation": "extract",
                        "entities": entities,
                        "relationships": relationships,
                        "stored": stored,
                        "metadata": {
                            "text_length": text.chars().count(),
                            "backend": self.store_metadata(),
                        },
                    })
                }
                "store" => {
                    let entities = array_field(&input, "entities");
                    let relationships = array_field(&input, "relationships");
                    if entities.is_none() && relationships.is_none() {
                        return Err(FlowError::node(
                            &node.id,
                            "Input data must contain entities and relationships",
                        ));
                    }
                    let stored = self
                        .store
                        .store(entities.unwrap_or_default(), relationships.unwrap_or_default())
                        .await?;
                    json!({
                        "operation": "store",
                        "stored": stored,
                        "metadata": {"backend": self.store_metadata()},
                    })
                }
                "analyze" => {
                    let stats = self.store.stats().await?;
                    json!({
                        "operation": "analyze",
                        "statistics": stats,
                        "metadata": {"backend": self.store_metadata()},
                    })
                }
                _ => {
                    let query = settings
                        .query
                        .filter(|q| !q.trim().is_empty())
                        .unwrap_or_else(|| query_from_input(&input));
                    let results = self.store.query(query.clone(), settings.limit).await?;
                    ctx.node_log(
                        LogLevel::Debug,
                        &node.id,
                        format!("Query '{}' matched {} entities", query, results.len()),
                    );
                    json!({
                        "operation": "query",
                        "query": query,
                        "results": results,
                        "metadata": {
                            "result_count": results.len(),
                            "query_type": classify_query(&query),
                            "backend": self.store_metadata(),
                        },
                    })
                }
            };

            Ok(TaggedOutput::GraphQueryResult(payload).into_value())
        })
    }

    fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
        let settings: GraphQuerySettings = parse_settings(config)?;
        if !OPERATIONS.contains(&settings.operation.as_str()) {
            return Err(format!(
                "operation must be one of {}",
                OPERATIONS.join(", ")
            ));
        }
        if settings.limit == 0 {
            return Err("limit must be positive".into());
        }
        Ok(())
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kind": {"const": "graph-query-result"},
                "payload": {
                    "type": "object",
                    "properties": {
                        "operation": {"type": "string"},
                        "entities": {"type": "array"},
                        "relationships": {"type": "array"},
                        "results": {"type": "array"},
                        "metadata": {"type": "object"}
                    }
                }
            }
        })
    }
}

fn array_field(input: &Value, key: &str) -> Option<Vec<Value>> {
    input.get(key).and_then(Value::as_array).cloned()
}

/// Query text from upstream output. Free text is reduced to its most
/// frequent proper nouns; an empty string matches everything.
fn query_from_input(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            if let Some(q) = obj.get("query").and_then(Value::as_str) {
                return q.to_string();
            }
            ["content", "processed_text"]
                .iter()
                .filter_map(|k| obj.get(*k).and_then(Value::as_str))
                .find(|s| !s.trim().is_empty())
                .map(search_terms)
                .unwrap_or_default()
        }
        _ => String::new(),
    }
}

fn search_terms(text: &str) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for m in proper_noun_pattern().find_iter(text) {
        let term = m.as_str();
        if term.len() <= 2 || STOP_WORDS.contains(&term) {
            continue;
        }
        match counts.iter_mut().find(|(t, _)| t == term) {
            Some((_, n)) => *n += 1,
            None => counts.push((term.to_string(), 1)),
        }
    }
    if counts.is_empty() {
        return text.split_whitespace().take(10).collect::<Vec<_>>().join(" ");
    }
    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(3)
        .map(|(t, _)| t)
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify_query(query: &str) -> &'static str {
    let q = query.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| q.contains(w));
    if has(&["find", "search", "get", "show"]) {
        "search"
    } else if has(&["relationship", "connection", "related", "connect"]) {
        "relationship"
    } else if has(&["count", "how many", "number"]) {
        "count"
    } else if has(&["path", "route", "between"]) {
        "path"
    } else if has(&["analyze", "analysis", "overview"]) {
        "analysis"
    } else {
        "general"
    }
}

fn proper_noun_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").unwrap())
}

fn relationship_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                "works_for",
                Regex::new(r"(?i)(\w+)\s+(?:works for|employed by|at)\s+(\w+)").unwrap(),
            ),
            (
                "founded",
                Regex::new(r"(?i)(\w+)\s+(?:founded|created|started)\s+(\w+)").unwrap(),
            ),
            (
                "owns",
                Regex::new(r"(?i)(\w+)\s+(?:owns|has|contains)\s+(\w+)").unwrap(),
            ),
            (
                "is_a",
                Regex::new(r"(?i)(\w+)\s+(?:is|was)\s+(?:a|an|the)\s+(\w+)").unwrap(),
            ),
        ]
    })
}

fn extract_entities(text: &str) -> Vec<Value> {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    static URL: OnceLock<Regex> = OnceLock::new();
    let email = EMAIL.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
    });
    let url = URL.get_or_init(|| Regex::new(r"https?://[^\s]+").unwrap());

    let mut entities: Vec<Value> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for m in proper_noun_pattern().find_iter(text) {
        let name = m.as_str();
        if name.len() <= 2 || seen.contains(&name) {
            continue;
        }
        seen.push(name);
        entities.push(json!({
            "name": name,
            "type": "person_or_organization",
            "confidence": 0.7,
            "mentions": text.matches(name).count(),
        }));
    }
    for (kind, pattern) in [("email", email), ("url", url)] {
        for m in pattern.find_iter(text) {
            entities.push(json!({
                "name": m.as_str(),
                "type": kind,
                "confidence": 0.95,
                "mentions": 1,
            }));
        }
    }
    entities.truncate(MAX_ENTITIES);
    entities
}

/// Relationships whose endpoints are both extracted entities.
fn extract_relationships(text: &str, entities: &[Value]) -> Vec<Value> {
    let names: Vec<&str> = entities.iter().filter_map(|e| e["name"].as_str()).collect();
    let mut relationships = Vec::new();
    for (kind, pattern) in relationship_patterns() {
        for caps in pattern.captures_iter(text) {
            let (source, target) = (&caps[1], &caps[2]);
            if names.contains(&source) && names.contains(&target) {
                relationships.push(json!({
                    "source": source,
                    "target": target,
                    "relationship": kind,
                    "confidence": 0.6,
                }));
            }
        }
    }
    relationships.truncate(MAX_RELATIONSHIPS);
    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::types::NodeKind;

    fn executor() -> (Arc<InMemoryGraphStore>, GraphQueryExecutor) {
        let store = Arc::new(InMemoryGraphStore::new());
        (store.clone(), GraphQueryExecutor::new(store))
    }

    fn node(config: Value) -> WorkflowNode {
        WorkflowNode::new("graph-1", NodeKind::GraphRag).with_config(config)
    }

    fn payload(output: &Value) -> Value {
        match TaggedOutput::from_value(output) {
            Some(TaggedOutput::GraphQueryResult(payload)) => payload,
            None => panic!("output is not a graph envelope: {output}"),
        }
    }

    #[tokio::test]
    async fn test_extract_then_query() {
        let (_, exec) = executor();
        let mut ctx = ExecutionContext::new("run");
        let text = "Alice works for Acme. Bob founded Initech. Contact alice@acme.io";
        let result = exec
            .execute(&node(json!({"operation": "extract"})), &mut ctx, json!(text))
            .await;
        assert!(result.succeeded(), "{:?}", result.error_message);
        let extracted = payload(&result.output_data);
        let names: Vec<&str> = extracted["entities"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["name"].as_str())
            .collect();
        assert!(names.contains(&"Alice"));
        assert!(names.contains(&"alice@acme.io"));
        let rels = extracted["relationships"].as_array().unwrap();
        assert!(rels.contains(&json!({
            "source": "Alice", "target": "Acme", "relationship": "works_for", "confidence": 0.6
        })));

        let result = exec
            .execute(&node(json!({"query": "bob"})), &mut ctx, Value::Null)
            .await;
        let found = payload(&result.output_data);
        assert_eq!(found["operation"], "query");
        assert_eq!(found["metadata"]["result_count"], 1);
        assert_eq!(found["results"][0]["entity"]["name"], "Bob");
        assert_eq!(
            found["results"][0]["relationships"].as_array().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_store_requires_entities() {
        let (_, exec) = executor();
        let mut ctx = ExecutionContext::new("run");
        let result = exec
            .execute(&node(json!({"operation": "store"})), &mut ctx, json!("text"))
            .await;
        assert_eq!(
            result.error_message.as_deref(),
            Some("Input data must contain entities and relationships")
        );
    }

    #[tokio::test]
    async fn test_store_merges_mentions_and_analyze() {
        let (store, exec) = executor();
        let mut ctx = ExecutionContext::new("run");
        let input = json!({
            "entities": [
                {"name": "Ferris", "type": "mascot", "mentions": 2},
                {"name": "Ferris", "type": "mascot"}
            ],
            "relationships": []
        });
        let result = exec
            .execute(&node(json!({"operation": "store"})), &mut ctx, input)
            .await;
        assert_eq!(payload(&result.output_data)["stored"], 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats["entity_count"], 1);
        assert_eq!(stats["entity_types"]["mascot"], 1);

        let found = store.query("ferris".into(), 10).await.unwrap();
        assert_eq!(found[0]["entity"]["mentions"], 3);

        let result = exec
            .execute(&node(json!({"operation": "analyze"})), &mut ctx, Value::Null)
            .await;
        assert_eq!(
            payload(&result.output_data)["statistics"]["entity_count"],
            1
        );
    }

    #[test]
    fn test_query_from_model_output() {
        let input = json!({"content": "Ferris loves Rust. Rust is fast."});
        assert_eq!(query_from_input(&input), "Rust Ferris");
        assert_eq!(query_from_input(&json!({"query": "find Bob"})), "find Bob");
        assert_eq!(query_from_input(&Value::Null), "");
    }

    #[test]
    fn test_classify_query() {
        assert_eq!(classify_query("find Alice"), "search");
        assert_eq!(classify_query("how many people"), "count");
        assert_eq!(classify_query("Alice"), "general");
    }

    #[test]
    fn test_validate_operation() {
        let (_, exec) = executor();
        let bad = json!({"operation": "delete"});
        assert!(exec.validate(bad.as_object().unwrap()).is_err());
        let ok = json!({"operation": "analyze"});
        assert!(exec.validate(ok.as_object().unwrap()).is_ok());
    }
}
