use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::types::{ExecutionLog, LogLevel};

/// Number of node-scoped log entries kept on each node result.
pub const DEFAULT_LOG_TAIL: usize = 10;

/// Per-run mutable state.
///
/// One context is created for each run and dropped once the aggregate result
/// is built. It is passed by `&mut` through every executor call and is never
/// shared between runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: String,
    debug: bool,
    log_tail: usize,
    logs: Vec<ExecutionLog>,
    outputs: HashMap<String, Value>,
    variables: HashMap<String, Value>,
    run_data: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            debug: false,
            log_tail: DEFAULT_LOG_TAIL,
            logs: Vec::new(),
            outputs: HashMap::new(),
            variables: HashMap::new(),
            run_data: Map::new(),
        }
    }

    /// Echo every log entry to the tracing subscriber.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_log_tail(mut self, log_tail: usize) -> Self {
        self.log_tail = log_tail;
        self
    }

    pub fn with_run_data(mut self, run_data: Map<String, Value>) -> Self {
        self.run_data = run_data;
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Append a log entry.
    pub fn log(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        node_id: Option<&str>,
        details: Option<Value>,
    ) {
        let entry = ExecutionLog {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            node_id: node_id.map(str::to_string),
            details,
        };

        if self.debug {
            let node = entry.node_id.as_deref().unwrap_or("-");
            match level {
                LogLevel::Debug => {
                    tracing::debug!(execution_id = %self.execution_id, node_id = %node, "{}", entry.message)
                }
                LogLevel::Info => {
                    tracing::info!(execution_id = %self.execution_id, node_id = %node, "{}", entry.message)
                }
                LogLevel::Warning => {
                    tracing::warn!(execution_id = %self.execution_id, node_id = %node, "{}", entry.message)
                }
                LogLevel::Error => {
                    tracing::error!(execution_id = %self.execution_id, node_id = %node, "{}", entry.message)
                }
            }
        }

        self.logs.push(entry);
    }

    /// Append a log entry scoped to a node.
    pub fn node_log(&mut self, level: LogLevel, node_id: &str, message: impl Into<String>) {
        self.log(level, message, Some(node_id), None);
    }

    pub fn logs(&self) -> &[ExecutionLog] {
        &self.logs
    }

    /// The most recent entries for one node, oldest first.
    pub fn node_log_tail(&self, node_id: &str) -> Vec<ExecutionLog> {
        let mut tail: Vec<ExecutionLog> = self
            .logs
            .iter()
            .rev()
            .filter(|l| l.node_id.as_deref() == Some(node_id))
            .take(self.log_tail)
            .cloned()
            .collect();
        tail.reverse();
        tail
    }

    /// Consume the context, returning the full log.
    pub fn into_logs(self) -> Vec<ExecutionLog> {
        self.logs
    }

    /// Store a node's output. The first write for a node id wins.
    pub fn record_output(&mut self, node_id: impl Into<String>, output: Value) -> bool {
        let node_id = node_id.into();
        if self.outputs.contains_key(&node_id) {
            return false;
        }
        self.outputs.insert(node_id, output);
        true
    }

    pub fn get_output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn has_output(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id)
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn get_variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn set_run_data(&mut self, key: impl Into<String>, value: Value) {
        self.run_data.insert(key.into(), value);
    }

    pub fn get_run_data(&self, key: &str) -> Option<&Value> {
        self.run_data.get(key)
    }

    /// String value from the run data bag, if present and non-empty.
    pub fn run_data_str(&self, key: &str) -> Option<&str> {
        self.run_data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outputs_are_write_once() {
        let mut ctx = ExecutionContext::new("run-1");
        assert!(ctx.record_output("a", json!("first")));
        assert!(!ctx.record_output("a", json!("second")));
        assert_eq!(ctx.get_output("a"), Some(&json!("first")));
        assert!(ctx.get_output("b").is_none());
    }

    #[test]
    fn test_node_log_tail_is_bounded() {
        let mut ctx = ExecutionContext::new("run-1").with_log_tail(3);
        for i in 0..5 {
            ctx.node_log(LogLevel::Info, "a", format!("a{i}"));
            ctx.node_log(LogLevel::Info, "b", format!("b{i}"));
        }
        let tail = ctx.node_log_tail("a");
        let messages: Vec<&str> = tail.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["a2", "a3", "a4"]);
        assert_eq!(ctx.logs().len(), 10);
    }

    #[test]
    fn test_variables_and_run_data() {
        let mut data = Map::new();
        data.insert("claude4".into(), json!("sk-ant-test"));
        data.insert("gemini".into(), json!(""));
        let mut ctx = ExecutionContext::new("run-1").with_run_data(data);

        ctx.set_variable("flag", json!(true));
        assert_eq!(ctx.get_variable("flag"), Some(&json!(true)));

        assert_eq!(ctx.run_data_str("claude4"), Some("sk-ant-test"));
        assert_eq!(ctx.run_data_str("gemini"), None);

        ctx.set_run_data("groqllama", json!("gsk-test"));
        assert_eq!(ctx.get_run_data("groqllama"), Some(&json!("gsk-test")));
    }

    #[test]
    fn test_log_details_kept() {
        let mut ctx = ExecutionContext::new("run-1").with_debug(true);
        ctx.log(
            LogLevel::Warning,
            "config incomplete",
            Some("ai-1"),
            Some(json!({"missing": "model"})),
        );
        let entry = &ctx.logs()[0];
        assert_eq!(entry.level, LogLevel::Warning);
        assert_eq!(entry.node_id.as_deref(), Some("ai-1"));
        assert_eq!(entry.details, Some(json!({"missing": "model"})));
    }
}
