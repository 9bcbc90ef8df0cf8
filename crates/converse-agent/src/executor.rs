use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use converse_core::message::{Message, ToolCall};

use crate::tools::ToolRegistry;

/// Normalises model-emitted tool calls and dispatches them to the registry.
///
/// Tool failures are never fatal: they become an error string inside the
/// tool-role message and the model decides what to do next.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Fill a missing or empty `type` with `"function"`, leaving id, name,
    /// and arguments untouched. Idempotent.
    pub fn fix_tool_calls(&self, calls: Vec<ToolCall>) -> Vec<ToolCall> {
        calls
            .into_iter()
            .map(|mut call| {
                match call.call_type.as_deref() {
                    Some(t) if !t.is_empty() => {}
                    _ => call.call_type = Some("function".to_string()),
                }
                call
            })
            .collect()
    }

    /// Execute one call, packaging the result as a tool-role message keyed
    /// by the originating call id.
    pub async fn execute_tool_call(&self, call: &ToolCall, conversation_id: &str) -> Message {
        let started = Instant::now();
        let content = match self
            .registry
            .execute(&call.function.name, &call.function.arguments)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    tool = %call.function.name,
                    conversation_id,
                    error = %e,
                    "tool execution failed"
                );
                format!("Ошибка: {e}")
            }
        };
        info!(
            tool = %call.function.name,
            conversation_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "tool executed"
        );
        Message::tool(content, &call.id)
    }

    /// Execute calls strictly in order — the model reads their results as a
    /// sequence, so no parallelism within one assistant turn.
    pub async fn execute_tool_calls(
        &self,
        calls: &[ToolCall],
        conversation_id: &str,
    ) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_tool_call(call, conversation_id).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FunctionTool, ToolError};
    use converse_core::message::Role;

    fn executor() -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(
            FunctionTool::builder("ok_tool", "always succeeds")
                .handler(|_| async move { Ok("готово".to_string()) }),
        ));
        registry.register(Arc::new(
            FunctionTool::builder("bad_tool", "always fails").handler(|_| async move {
                Err(ToolError::Execution("сломалось".to_string()))
            }),
        ));
        ToolExecutor::new(registry)
    }

    #[test]
    fn fix_fills_missing_type_and_is_idempotent() {
        let executor = executor();
        let call = ToolCall {
            id: "t1".to_string(),
            call_type: None,
            function: converse_core::message::FunctionCall {
                name: "ok_tool".to_string(),
                arguments: "{}".to_string(),
            },
        };

        let fixed = executor.fix_tool_calls(vec![call]);
        assert_eq!(fixed[0].call_type.as_deref(), Some("function"));

        let twice = executor.fix_tool_calls(fixed.clone());
        assert_eq!(fixed, twice);
    }

    #[tokio::test]
    async fn results_keep_order_and_carry_call_ids() {
        let executor = executor();
        let calls = vec![
            ToolCall::new("t1", "ok_tool", "{}"),
            ToolCall::new("t2", "bad_tool", "{}"),
            ToolCall::new("t3", "missing_tool", "{}"),
        ];

        let results = executor.execute_tool_calls(&calls, "c1").await;
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].role, Role::Tool);
        assert_eq!(results[0].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(results[0].content.as_deref(), Some("готово"));

        // Failures become error strings, not panics.
        assert!(results[1].content.as_deref().unwrap().starts_with("Ошибка:"));
        assert!(results[2].content.as_deref().unwrap().starts_with("Ошибка:"));
        assert_eq!(results[2].tool_call_id.as_deref(), Some("t3"));
    }
}
