use futures::future::BoxFuture;
use serde_json::{json, Value};

use flowforge_core::context::ExecutionContext;
use flowforge_core::error::Result;
use flowforge_core::traits::NodeExecutor;
use flowforge_core::types::{LogLevel, NodeKind, WorkflowNode};

const EMBEDDING_DIMENSIONS: usize = 1536;

/// Stand-in for node kinds without a real executor. Honors the full
/// contract and returns synthetic output shaped like the real thing. One
/// instance serves every kind; the output follows `node.kind`.
pub struct PlaceholderExecutor;

impl NodeExecutor for PlaceholderExecutor {
    fn run<'a>(
        &'a self,
        node: &'a WorkflowNode,
        ctx: &'a mut ExecutionContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            ctx.node_log(
                LogLevel::Warning,
                &node.id,
                format!("{} executor not yet implemented, returning placeholder output", node.kind),
            );
            let text = input.as_str().map(str::to_string);

            let output = match node.kind {
                NodeKind::Image => json!({
                    "prompt": text.unwrap_or_else(|| "placeholder prompt".into()),
                    "image_url": "https://via.placeholder.com/512x512.png?text=Generated+Image",
                    "metadata": {"width": 512, "height": 512, "format": "PNG", "placeholder": true},
                }),
                NodeKind::Embeddings => json!({
                    "text": text.unwrap_or_else(|| "placeholder text".into()),
                    "embeddings": vec![0.1; EMBEDDING_DIMENSIONS],
                    "metadata": {
                        "dimensions": EMBEDDING_DIMENSIONS,
                        "model": "text-embedding-ada-002",
                        "placeholder": true,
                    },
                }),
                NodeKind::Vapi => json!({
                    "audio_input": "placeholder audio input",
                    "transcription": text.unwrap_or_else(|| "placeholder transcription".into()),
                    "metadata": {"duration": 5.0, "language": "en", "placeholder": true},
                }),
                _ => json!({
                    "input": input,
                    "output": format!("Placeholder output from {} node", node.kind),
                    "metadata": {"processed": true, "placeholder": true},
                }),
            };
            Ok(output)
        })
    }

    fn is_placeholder(&self) -> bool {
        true
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": {"type": "any"},
                "output": {"type": "any"},
                "metadata": {"type": "object"}
            }
        })
    }
}
