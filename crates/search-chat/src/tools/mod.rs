//! Tool framework: capabilities the model may invoke before answering

pub mod builtin;
pub mod registry;
pub mod router;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use llm_core::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::ToolRegistry;
pub use router::ToolRouter;

/// Result of tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed result
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Content for the tool message answering this call
    pub fn to_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("tool failed"))
        }
    }
}

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Maximum output length (truncate if exceeded)
    pub max_output_len: usize,
    /// Timeout for one execution
    pub timeout: Duration,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            max_output_len: 50000,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ToolContext {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cut `output` down to `max_output_len` characters
    pub fn truncate(&self, output: String) -> String {
        if output.chars().count() <= self.max_output_len {
            return output;
        }
        let mut cut: String = output.chars().take(self.max_output_len).collect();
        cut.push_str("\n[output truncated]");
        cut
    }
}

/// Schema for a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, boolean, array, object)
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    fn typed(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// JSON schema describing tool input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Type is always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }

    /// Names of required parameters missing from `args`
    pub fn missing_required<'a>(&'a self, args: &Value) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|name| args.get(name.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect()
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// The Tool trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get a description of what the tool does
    fn description(&self) -> &str;

    /// Get the parameter schema
    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute the tool with the given arguments
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult>;

    /// Convert to a tool definition for the model
    fn to_definition(&self) -> ToolDefinition {
        let parameters = serde_json::to_value(self.parameters_schema()).unwrap_or_default();
        ToolDefinition::new(self.name(), self.description(), parameters)
    }
}
