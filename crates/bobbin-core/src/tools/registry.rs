//! Tool registry: name-keyed capabilities with ordered definitions

use crate::conversation::ContentFragment;
use crate::tools::tool::{ExecutionContext, Tool};
use crate::tools::types::{ToolOutput, ToolSpec};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Registry of the tools available to one session
///
/// Registration happens before the conversation loop starts; the
/// orchestrator holds the registry by shared reference and never mutates
/// it while executing.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so `definitions()` is stable across calls
    order: Vec<String>,
    execution_timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry with the default per-tool timeout
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            execution_timeout: Duration::from_secs(300),
        }
    }

    /// Create a registry with a custom per-tool timeout
    pub fn with_timeout(execution_timeout: Duration) -> Self {
        Self {
            execution_timeout,
            ..Self::new()
        }
    }

    /// Register a tool; re-registering a name replaces the previous tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Register multiple tools
    pub fn register_all(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    /// Check if a tool is registered
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names in registration order
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool specs for the next model request, in registration order
    pub fn definitions(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    /// Execute a tool by name, always producing a `tool_result` fragment
    ///
    /// Unknown names, executor errors and timeouts all come back as
    /// error-flagged results; nothing here panics or propagates upward.
    pub async fn execute(
        &self,
        name: &str,
        input: &Map<String, Value>,
        request_id: &str,
        context: &ExecutionContext,
    ) -> ContentFragment {
        let tool = match self.tools.get(name) {
            Some(tool) => tool,
            None => {
                tracing::warn!(tool = name, "model requested an unknown tool");
                return ToolOutput::error(format!("Tool '{name}' not found"))
                    .into_fragment(request_id);
            }
        };

        let output = match timeout(self.execution_timeout, tool.execute(input, context)).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                tracing::warn!(tool = name, %error, "tool execution failed");
                ToolOutput::error(error.to_string())
            }
            Err(_) => {
                tracing::warn!(tool = name, timeout = ?self.execution_timeout, "tool execution timed out");
                ToolOutput::error(format!(
                    "Tool execution timed out after {:?}",
                    self.execution_timeout
                ))
            }
        };

        output.into_fragment(request_id)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::error::ToolError;
    use crate::tools::types::ToolParameter;
    use async_trait::async_trait;

    struct StaticTool {
        name: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "replies with a fixed string"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec::new(self.name, self.description(), vec![])
        }

        async fn execute(
            &self,
            _input: &Map<String, Value>,
            _context: &ExecutionContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(self.reply))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec::new(
                "broken",
                "always fails",
                vec![ToolParameter::string("reason", "ignored")],
            )
        }

        async fn execute(
            &self,
            _input: &Map<String, Value>,
            _context: &ExecutionContext,
        ) -> Result<ToolOutput, ToolError> {
            Err(ToolError::execution_failed("no such window"))
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool {
            name: "greet",
            reply: "hello",
        }));
        registry.register(Arc::new(StaticTool {
            name: "greet",
            reply: "replaced",
        }));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn test_definitions_stable_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(StaticTool { name, reply: "" }));
        }

        let first: Vec<String> = registry.definitions().iter().map(|s| s.name.clone()).collect();
        let second: Vec<String> = registry.definitions().iter().map(|s| s.name.clone()).collect();
        assert_eq!(first, vec!["zeta", "alpha", "mid"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_error_result() {
        let registry = ToolRegistry::new();
        let fragment = registry
            .execute("missing", &Map::new(), "t1", &ExecutionContext::empty())
            .await;

        match fragment {
            ContentFragment::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(is_error);
                assert!(content[0].as_text().unwrap().contains("missing"));
            }
            _ => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn test_executor_error_becomes_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));

        let fragment = registry
            .execute("broken", &Map::new(), "t2", &ExecutionContext::empty())
            .await;

        match fragment {
            ContentFragment::ToolResult {
                content, is_error, ..
            } => {
                assert!(is_error);
                assert!(content[0].as_text().unwrap().contains("no such window"));
            }
            _ => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool {
            name: "greet",
            reply: "hello",
        }));

        let fragment = registry
            .execute("greet", &Map::new(), "t3", &ExecutionContext::empty())
            .await;

        match fragment {
            ContentFragment::ToolResult {
                content, is_error, ..
            } => {
                assert!(!is_error);
                assert_eq!(content[0].as_text(), Some("hello"));
            }
            _ => panic!("expected tool result"),
        }
    }
}
