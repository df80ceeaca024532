// Tool registry and trait definition
//
// Registration happens at startup. Sessions work against a frozen ToolSet.

use crate::errors::ToolError;
use crate::tools::types::{ToolDefinition, ToolInputSchema};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

/// Tool trait - all tools must implement this
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (e.g., "get_weather", "run_terminal_command")
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema defining expected input parameters
    fn input_schema(&self) -> ToolInputSchema;

    /// Execute the tool with already validated input
    async fn execute(&self, input: Value) -> Result<String, ToolError>;

    /// Get full tool definition (for backends)
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Registry of available tools, kept in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names are unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Resolve a tool by name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.index
            .get(name)
            .map(|&idx| Arc::clone(&self.tools[idx]))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Check if tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// Tool definitions in registration order
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Validate arguments for a named tool
    pub fn validate(&self, name: &str, input: &Value) -> Result<(), ToolError> {
        let tool = self.resolve(name)?;
        tool.input_schema()
            .validate(input)
            .map_err(|reason| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason,
            })
    }

    /// Build a registry holding only the named catalog tools, in the given order
    pub fn from_names(names: &[String], catalog: &ToolRegistry) -> Result<ToolRegistry, ToolError> {
        let mut registry = ToolRegistry::new();
        for name in names {
            registry.register(catalog.resolve(name)?)?;
        }
        Ok(registry)
    }

    /// Freeze the current tools for a session
    pub fn snapshot(&self) -> ToolSet {
        ToolSet(Arc::new(self.clone()))
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Immutable, shareable view of a registry at a point in time
#[derive(Clone, Default)]
pub struct ToolSet(Arc<ToolRegistry>);

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }
}

impl Deref for ToolSet {
    type Target = ToolRegistry;

    fn deref(&self) -> &ToolRegistry {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mock tool for testing
    struct MockTool {
        name: String,
    }

    impl MockTool {
        fn arc(name: &str) -> Arc<dyn Tool> {
            Arc::new(MockTool {
                name: name.to_string(),
            })
        }
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "A mock tool for testing"
        }

        fn input_schema(&self) -> ToolInputSchema {
            ToolInputSchema::simple(vec![("param", "A test parameter")])
        }

        async fn execute(&self, _input: Value) -> Result<String, ToolError> {
            Ok("Mock result".to_string())
        }
    }

    #[test]
    fn test_registry_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::arc("test")).unwrap();

        assert!(registry.has_tool("test"));
        assert!(!registry.has_tool("nonexistent"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::arc("test")).unwrap();

        let err = registry.register(MockTool::arc("test")).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool(name) if name == "test"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.resolve("delete_everything").err().unwrap();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "delete_everything"));
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(MockTool::arc(name)).unwrap();
        }

        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.tool_names(), names);
    }

    #[test]
    fn test_validate_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::arc("test")).unwrap();

        assert!(registry
            .validate("test", &serde_json::json!({"param": "x"}))
            .is_ok());

        let err = registry
            .validate("test", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = registry
            .validate("missing", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::arc("first")).unwrap();

        let snapshot = registry.snapshot();
        registry.register(MockTool::arc("second")).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.has_tool("second"));
        assert!(registry.has_tool("second"));
    }

    #[test]
    fn test_from_names() {
        let mut registry = ToolRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(MockTool::arc(name)).unwrap();
        }

        let picked =
            ToolRegistry::from_names(&["c".to_string(), "a".to_string()], &registry).unwrap();
        assert_eq!(picked.tool_names(), vec!["c", "a"]);

        let err = ToolRegistry::from_names(&["nope".to_string()], &registry)
            .err()
            .unwrap();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_tool_execution() {
        let tool = MockTool::arc("test");
        let result = tool
            .execute(serde_json::json!({"param": "value"}))
            .await
            .unwrap();
        assert_eq!(result, "Mock result");
    }
}
