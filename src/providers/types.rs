// Unified request/response types for multi-backend LLM support
//
// These types abstract over backend-specific formats (OpenAI-compatible, Gemini)
// allowing the session to work with a single reply shape.

use crate::agent::Message;
use crate::tools::types::{ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Unified request format for all backends
///
/// Each backend implementation transforms this into its own API format.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    /// Conversation so far, in transcript order
    pub messages: Vec<Message>,

    /// Model name (backend default when empty)
    pub model: String,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tool definitions (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ProviderRequest {
    /// Create a new request from messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: String::new(), // Filled in by the backend
            max_tokens: None,
            tools: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Add tools to the request; an empty list sends none
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Model to use, falling back to the backend default
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.model.is_empty() {
            default
        } else {
            &self.model
        }
    }
}

/// What a backend answered: a final text XOR a batch of tool calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendReply {
    Final {
        text: String,
    },
    ToolCalls {
        /// Text emitted alongside the calls, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

impl BackendReply {
    /// Build a reply from parsed parts; no calls means a final answer
    pub fn from_parts(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        let text = text.filter(|t| !t.is_empty());
        if calls.is_empty() {
            BackendReply::Final {
                text: text.unwrap_or_default(),
            }
        } else {
            BackendReply::ToolCalls { text, calls }
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        BackendReply::Final { text: text.into() }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        BackendReply::ToolCalls { text: None, calls }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, BackendReply::Final { .. })
    }

    /// Requested calls, empty for a final answer
    pub fn calls(&self) -> &[ToolCall] {
        match self {
            BackendReply::Final { .. } => &[],
            BackendReply::ToolCalls { calls, .. } => calls,
        }
    }
}

/// Unified response from a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Response ID (backend-specific)
    pub id: String,

    /// Model that generated the response
    pub model: String,

    /// Backend name
    pub provider: String,

    /// Why the model stopped generating
    pub stop_reason: Option<String>,

    pub reply: BackendReply,
}

impl ProviderResponse {
    /// Text of the reply, empty for a bare tool-call batch
    pub fn text(&self) -> &str {
        match &self.reply {
            BackendReply::Final { text } => text,
            BackendReply::ToolCalls { text, .. } => text.as_deref().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_parts_without_calls_is_final() {
        let reply = BackendReply::from_parts(Some("hi".to_string()), vec![]);
        assert_eq!(reply, BackendReply::final_text("hi"));

        let reply = BackendReply::from_parts(None, vec![]);
        assert_eq!(reply, BackendReply::final_text(""));
    }

    #[test]
    fn test_from_parts_with_calls() {
        let call = ToolCall::with_id("c1", "get_weather", json!({"city": "sf"}));
        let reply = BackendReply::from_parts(Some(String::new()), vec![call.clone()]);
        assert_eq!(
            reply,
            BackendReply::ToolCalls {
                text: None,
                calls: vec![call]
            }
        );
        assert!(!reply.is_final());
    }

    #[test]
    fn test_request_builders() {
        let request = ProviderRequest::new(vec![Message::user("hi")])
            .with_max_tokens(1000)
            .with_temperature(0.8)
            .with_tools(vec![]);

        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.temperature, Some(0.8));
        assert!(request.tools.is_none());
        assert_eq!(request.model_or("qwen2.5:1.5b"), "qwen2.5:1.5b");
        assert_eq!(request.with_model("x").model_or("y"), "x");
    }
}
