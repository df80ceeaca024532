// Tool execution engine
//
// Turns tool calls into tool results. Every failure (unknown tool, bad
// arguments, denied command, timeout) becomes a result with is_error set so
// the backend can react to it.

use crate::metrics::METRICS;
use crate::tools::registry::ToolSet;
use crate::tools::types::{ToolCall, ToolResult};
use tracing::{debug, error, info, instrument};

pub const UNKNOWN_TOOL_LABEL: &str = "unknown";

/// Tool executor bound to one frozen tool set
#[derive(Clone)]
pub struct ToolExecutor {
    tools: ToolSet,
}

impl ToolExecutor {
    pub fn new(tools: ToolSet) -> Self {
        Self { tools }
    }

    /// Execute a single tool call
    #[instrument(skip(self, call), fields(tool = %call.name, id = %call.id))]
    pub async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        info!("Executing tool: {}", call.name);

        let result = match self.tools.resolve(&call.name) {
            Err(e) => {
                error!("Tool lookup failed: {}", e);
                // Names the model made up share one metrics label
                METRICS.record_tool_call(UNKNOWN_TOOL_LABEL, true);
                return ToolResult::error(call.id.clone(), e.to_string());
            }
            Ok(tool) => match self.tools.validate(&call.name, &call.input) {
                Err(e) => {
                    error!("Tool input rejected: {}", e);
                    ToolResult::error(call.id.clone(), e.to_string())
                }
                Ok(()) => match tool.execute(call.input.clone()).await {
                    Ok(output) => {
                        debug!(bytes = output.len(), "Tool executed successfully");
                        ToolResult::success(call.id.clone(), output)
                    }
                    Err(e) => {
                        error!("Tool execution failed: {}", e);
                        ToolResult::error(call.id.clone(), format!("Execution error: {}", e))
                    }
                },
            },
        };

        METRICS.record_tool_call(&call.name, result.is_error);
        result
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolError;
    use crate::tools::registry::{Tool, ToolRegistry};
    use crate::tools::types::ToolInputSchema;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    // Mock tool for testing
    struct MockTool {
        should_fail: bool,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            "mock"
        }

        fn description(&self) -> &str {
            "A mock tool"
        }

        fn input_schema(&self) -> ToolInputSchema {
            ToolInputSchema::simple(vec![("param", "Test parameter")])
        }

        async fn execute(&self, input: Value) -> Result<String, ToolError> {
            if self.should_fail {
                return Err(ToolError::Failed("Mock failure".to_string()));
            }
            Ok(format!("Mock result: {}", input["param"]))
        }
    }

    fn create_test_executor(tool_should_fail: bool) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(MockTool {
                should_fail: tool_should_fail,
            }))
            .unwrap();
        ToolExecutor::new(registry.snapshot())
    }

    #[tokio::test]
    async fn test_execute_tool_success() {
        let executor = create_test_executor(false);
        let call = ToolCall::new("mock", json!({"param": "value"}));

        let result = executor.execute_tool(&call).await;

        assert_eq!(result.tool_call_id, call.id);
        assert!(!result.is_error);
        assert!(result.content.contains("Mock result"));
    }

    #[tokio::test]
    async fn test_execute_tool_not_found() {
        let executor = create_test_executor(false);
        let call = ToolCall::new("nonexistent", json!({"param": "value"}));

        let result = executor.execute_tool(&call).await;

        assert_eq!(result.tool_call_id, call.id);
        assert!(result.is_error);
        assert!(result.content.contains("not found"));
    }

    #[tokio::test]
    async fn test_execute_tool_invalid_arguments() {
        let executor = create_test_executor(false);
        let call = ToolCall::new("mock", json!({"other": 1}));

        let result = executor.execute_tool(&call).await;

        assert!(result.is_error);
        assert!(result.content.contains("missing required parameter 'param'"));
    }

    #[tokio::test]
    async fn test_execute_tool_execution_failure() {
        let executor = create_test_executor(true);
        let call = ToolCall::new("mock", json!({"param": "value"}));

        let result = executor.execute_tool(&call).await;

        assert!(result.is_error);
        assert!(result.content.contains("Execution error"));
    }

    #[tokio::test]
    async fn test_unknown_tools_share_one_metrics_label() {
        let executor = create_test_executor(false);
        let before = METRICS.tool_call_count(UNKNOWN_TOOL_LABEL, "error");

        for name in ["invented_tool_1", "invented_tool_2"] {
            let result = executor.execute_tool(&ToolCall::new(name, json!({}))).await;
            assert!(result.is_error);
        }

        assert!(METRICS.tool_call_count(UNKNOWN_TOOL_LABEL, "error") >= before + 2);
        assert_eq!(METRICS.tool_call_count("invented_tool_1", "error"), 0);
    }
}
