use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use flowforge_core::context::ExecutionContext;
use flowforge_core::error::Result;
use flowforge_core::traits::NodeExecutor;
use flowforge_core::types::{LogLevel, WorkflowNode};

use super::{node_settings, parse_settings};

const FALSY_STRINGS: [&str; 8] = ["false", "no", "off", "0", "null", "undefined", "none", ""];

/// AND/OR gate over upstream outputs.
pub struct LogicalExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    And,
    Or,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

#[derive(Deserialize)]
struct LogicalSettings {
    #[serde(default = "default_operation", deserialize_with = "lowercase_operation")]
    operation: Operation,
}

fn default_operation() -> Operation {
    Operation::And
}

fn lowercase_operation<'de, D>(deserializer: D) -> std::result::Result<Operation, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.to_lowercase().as_str() {
        "and" => Ok(Operation::And),
        "or" => Ok(Operation::Or),
        other => Err(serde::de::Error::custom(format!(
            "unsupported logical operation '{other}'"
        ))),
    }
}

impl NodeExecutor for LogicalExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let settings: LogicalSettings = node_settings(node)?;
            let op = settings.operation;
            let inputs = flatten_inputs(input);

            if inputs.is_empty() {
                ctx.node_log(
                    LogLevel::Warning,
                    &node.id,
                    "No inputs provided for logical operation",
                );
                return Ok(json!({
                    "operation": op.as_str(),
                    "inputs": [],
                    "result": false,
                    "message": "No inputs provided",
                }));
            }

            let truthy_count = inputs.iter().filter(|v| is_truthy(v)).count();
            let result = match op {
                Operation::And => truthy_count == inputs.len(),
                Operation::Or => truthy_count > 0,
            };

            ctx.node_log(
                LogLevel::Info,
                &node.id,
                format!(
                    "Logical {} over {} inputs: {result}",
                    op.as_str().to_uppercase(),
                    inputs.len()
                ),
            );

            Ok(json!({
                "operation": op.as_str(),
                "result": result,
                "input_count": inputs.len(),
                "truthy_count": truthy_count,
                "falsy_count": inputs.len() - truthy_count,
                "inputs": inputs,
            }))
        })
    }

    fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String> {
        parse_settings::<LogicalSettings>(config).map(|_| ())
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["and", "or"]},
                "inputs": {"type": "array"},
                "result": {"type": "boolean"},
                "input_count": {"type": "integer"},
                "truthy_count": {"type": "integer"},
                "falsy_count": {"type": "integer"}
            },
            "required": ["operation", "inputs", "result"]
        })
    }
}

/// Object values (one per upstream node), array items, or a single scalar.
fn flatten_inputs(input: Value) -> Vec<Value> {
    match input {
        Value::Null => vec![],
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !FALSY_STRINGS.contains(&s.trim().to_lowercase().as_str()),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::types::NodeKind;

    async fn run(config: Value, input: Value) -> Value {
        let node = WorkflowNode::new("gate", NodeKind::LogicalConnector).with_config(config);
        let mut ctx = ExecutionContext::new("run");
        let result = LogicalExecutor.execute(&node, &mut ctx, input).await;
        assert!(result.succeeded(), "{:?}", result.error_message);
        result.output_data
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!(" No "),
            json!("OFF"), json!("undefined"), json!([]), json!({})]
        {
            assert!(!is_truthy(&falsy), "{falsy}");
        }
        for truthy in [json!(true), json!(-1), json!("yes"), json!("anything"), json!([0]),
            json!({"success": false})]
        {
            assert!(is_truthy(&truthy), "{truthy}");
        }
    }

    #[tokio::test]
    async fn test_and_over_predecessor_map() {
        let out = run(json!({}), json!({"a": true, "b": "no"})).await;
        assert_eq!(out["operation"], "and");
        assert_eq!(out["result"], false);
        assert_eq!(out["truthy_count"], 1);
        assert_eq!(out["falsy_count"], 1);
    }

    #[tokio::test]
    async fn test_or_case_insensitive() {
        let out = run(json!({"operation": "OR"}), json!([0, "", "yes"])).await;
        assert_eq!(out["operation"], "or");
        assert_eq!(out["result"], true);
        assert_eq!(out["input_count"], 3);
    }

    #[tokio::test]
    async fn test_no_inputs() {
        let out = run(json!({"operation": "or"}), Value::Null).await;
        assert_eq!(out["result"], false);
        assert_eq!(out["message"], "No inputs provided");
    }

    #[test]
    fn test_validate_rejects_unknown_operation() {
        let bad = json!({"operation": "xor"});
        assert!(LogicalExecutor.validate(bad.as_object().unwrap()).is_err());
    }
}
