//! Tool registry for managing available tools

use std::collections::HashMap;
use std::sync::Arc;

use llm_core::{ToolCall, ToolDefinition};
use tracing::{debug, instrument};

use super::{Tool, ToolContext, ToolResult};
use crate::error::{AgentError, Result};

/// Registry of available tools. Read-only once built.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Names must be unique.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AgentError::Configuration(format!(
                "Tool '{}' is already registered",
                name
            )));
        }
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Tool definitions advertised to the model, sorted by name
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool call.
    ///
    /// Calling with an unregistered name is a caller bug and yields a
    /// configuration error.
    #[instrument(skip(self, call, ctx), fields(tool = %call.name(), id = %call.id))]
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult> {
        let tool = self.get(call.name()).ok_or_else(|| {
            AgentError::Configuration(format!("dispatch called for unregistered tool '{}'", call.name()))
        })?;

        let args = &call.function.arguments;
        if !args.is_object() {
            return Err(AgentError::MalformedResponse(format!(
                "arguments for '{}' are not a JSON object: {}",
                call.name(),
                call.arguments_text()
            )));
        }

        let missing = tool.parameters_schema().missing_required(args).join(", ");
        if !missing.is_empty() {
            return Err(AgentError::MalformedResponse(format!(
                "missing required argument(s) for '{}': {}",
                call.name(),
                missing
            )));
        }

        let mut result = tool
            .execute(args, ctx)
            .await
            .map_err(|e| AgentError::ToolDispatch {
                tool: call.name().to_string(),
                message: format!("{:#}", e),
            })?;
        result.output = ctx.truncate(result.output);
        Ok(result)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParameterProperty, ParameterSchema};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes input"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new().with_required("text", ParameterProperty::string("Text to echo"))
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            if text == "fail" {
                anyhow::bail!("echo refused");
            }
            Ok(ToolResult::success(text))
        }
    }

    struct AlphaTool;

    #[async_trait]
    impl Tool for AlphaTool {
        fn name(&self) -> &str {
            "alpha"
        }

        fn description(&self) -> &str {
            "First alphabetically"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success("alpha"))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(AlphaTool).unwrap();
        registry
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry.register(EchoTool).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_list_is_sorted() {
        let defs = registry().list();
        let names: Vec<&str> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "echo"]);
        assert_eq!(defs[1].function.parameters["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let call = ToolCall::new("t1", "echo", json!({"text": "hello"}));
        let result = registry().dispatch(&call, &ToolContext::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_is_configuration_error() {
        let call = ToolCall::new("t1", "nonexistent", json!({}));
        let err = registry().dispatch(&call, &ToolContext::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_dispatch_malformed_arguments() {
        let registry = registry();
        let ctx = ToolContext::default();

        let raw = ToolCall::new("t1", "echo", Value::String("{text: oops".into()));
        assert!(matches!(
            registry.dispatch(&raw, &ctx).await,
            Err(AgentError::MalformedResponse(_))
        ));

        let missing = ToolCall::new("t2", "echo", json!({}));
        assert!(matches!(
            registry.dispatch(&missing, &ctx).await,
            Err(AgentError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_execution_error() {
        let call = ToolCall::new("t1", "echo", json!({"text": "fail"}));
        let err = registry().dispatch(&call, &ToolContext::default()).await.unwrap_err();
        match err {
            AgentError::ToolDispatch { tool, message } => {
                assert_eq!(tool, "echo");
                assert!(message.contains("echo refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
