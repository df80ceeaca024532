// Conversation transcript
//
// Ordered, append-only record of one session. Backends receive it as-is and
// the final answer is looked up by role.

use crate::tools::types::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Calls requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Id of the call a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.tool_call_id.clone()),
            is_error: result.is_error,
            ..Self::plain(Role::Tool, result.content.clone())
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a transcript saved by an earlier session
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text of the most recent assistant turn that did not request tools
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.has_tool_calls())
            .map(|m| m.content.as_str())
    }

    /// All tool calls requested so far, in order
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.messages.iter().flat_map(|m| m.tool_calls.iter())
    }

    /// Check that each tool message answers exactly one earlier call
    ///
    /// Returns the offending id on failure.
    pub fn verify_correlation(&self) -> Result<(), String> {
        let mut requested: HashSet<&str> = HashSet::new();
        let mut answered: HashSet<&str> = HashSet::new();

        for message in &self.messages {
            for call in &message.tool_calls {
                if !requested.insert(call.id.as_str()) {
                    return Err(call.id.clone());
                }
            }
            if message.role == Role::Tool {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                if !requested.contains(id) || !answered.insert(id) {
                    return Err(id.to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_assistant_text_skips_tool_turns() {
        let call = ToolCall::with_id("call_1", "get_weather", json!({"city": "sf"}));
        let mut transcript = Transcript::new();
        transcript.push(Message::user("weather?"));
        transcript.push(Message::assistant("first"));
        transcript.push(Message::assistant_with_tool_calls("", vec![call]));
        transcript.push(Message::tool_result(&ToolResult::success(
            "call_1".to_string(),
            "sunny".to_string(),
        )));

        assert_eq!(transcript.last_assistant_text(), Some("first"));

        transcript.push(Message::assistant("It is sunny"));
        assert_eq!(transcript.last_assistant_text(), Some("It is sunny"));
    }

    #[test]
    fn test_last_assistant_text_none() {
        let mut transcript = Transcript::new();
        transcript.push(Message::system("be brief"));
        transcript.push(Message::user("hi"));
        assert_eq!(transcript.last_assistant_text(), None);
    }

    #[test]
    fn test_verify_correlation() {
        let mut transcript = Transcript::new();
        transcript.push(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::with_id("a", "t", json!({})),
                ToolCall::with_id("b", "t", json!({})),
            ],
        ));
        transcript.push(Message::tool_result(&ToolResult::success("a".into(), "1".into())));
        transcript.push(Message::tool_result(&ToolResult::error("b".into(), "2".into())));
        assert!(transcript.verify_correlation().is_ok());

        transcript.push(Message::tool_result(&ToolResult::success("a".into(), "again".into())));
        assert_eq!(transcript.verify_correlation(), Err("a".to_string()));
    }

    #[test]
    fn test_verify_correlation_unknown_id() {
        let mut transcript = Transcript::new();
        transcript.push(Message::tool_result(&ToolResult::success("ghost".into(), "x".into())));
        assert_eq!(transcript.verify_correlation(), Err("ghost".to_string()));
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));

        let tool = Message::tool_result(&ToolResult::error("call_9".into(), "boom".into()));
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_9");
        assert_eq!(value["is_error"], true);
    }
}
