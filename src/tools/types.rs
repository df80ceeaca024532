// Core types for the tool execution system
//
// Tool definitions follow the JSON-schema shape every supported backend accepts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool definition as exposed to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

/// JSON Schema for tool input parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String, // Always "object"
    pub properties: Value,
    pub required: Vec<String>,
}

impl ToolInputSchema {
    /// Empty object schema
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Value::Object(Map::new()),
            required: Vec::new(),
        }
    }

    /// Create a simple schema with required string parameters
    pub fn simple(params: Vec<(&str, &str)>) -> Self {
        params
            .into_iter()
            .fold(Self::object(), |schema, (name, desc)| {
                schema.property(name, "string", desc, true)
            })
    }

    /// Add a typed property
    pub fn property(mut self, name: &str, json_type: &str, description: &str, required: bool) -> Self {
        if let Value::Object(properties) = &mut self.properties {
            let mut spec = serde_json::json!({
                "type": json_type,
                "description": description,
            });
            if json_type == "array" {
                spec["items"] = serde_json::json!({ "type": "string" });
            }
            properties.insert(name.to_string(), spec);
        }
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Check arguments against the schema
    ///
    /// Covers what the tools rely on: an object, required keys present, and
    /// primitive types matching where a property declares one.
    pub fn validate(&self, input: &Value) -> Result<(), String> {
        let args = input
            .as_object()
            .ok_or_else(|| format!("expected a JSON object, got {}", json_type_name(input)))?;

        for name in &self.required {
            match args.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required parameter '{}'", name))
                }
                Some(_) => {}
            }
        }

        let Some(properties) = self.properties.as_object() else {
            return Ok(());
        };

        for (name, value) in args {
            if value.is_null() {
                continue;
            }
            let Some(expected) = properties
                .get(name)
                .and_then(|spec| spec.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            if !matches_json_type(value, expected) {
                return Err(format!(
                    "parameter '{}' must be {}, got {}",
                    name,
                    expected,
                    json_type_name(value)
                ));
            }
        }

        Ok(())
    }
}

fn matches_json_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Tool call requested by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,   // Correlates the result with this request
    pub name: String, // Tool name
    pub input: Value, // Tool parameters (JSON object)
    /// Opaque backend token that must be sent back with the call (Gemini)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ToolCall {
    /// Generate a unique call id, for backends that do not assign one
    pub fn generate_id() -> String {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            id: Self::generate_id(),
            name: name.into(),
            input,
            signature: None,
        }
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

/// Tool execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: String, content: String) -> Self {
        Self {
            tool_call_id,
            content,
            is_error: false,
        }
    }

    pub fn error(tool_call_id: String, error_message: String) -> Self {
        Self {
            tool_call_id,
            content: error_message,
            is_error: true,
        }
    }
}
