// OpenAI-compatible chat completions backend
//
// Works for Groq, Ollama's /v1 endpoint and OpenAI itself since they share
// the chat completions wire format.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use super::retry::{transport_error, with_retry, RetryPolicy};
use super::sse::SseBuffer;
use super::types::{BackendReply, ProviderRequest, ProviderResponse};
use super::{ModelBackend, TextStream};
use crate::agent::{Message, Role};
use crate::errors::BackendError;
use crate::tools::types::ToolCall;

const REQUEST_TIMEOUT_SECS: u64 = 120;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai";
pub const GROQ_DEFAULT_MODEL: &str = "openai/gpt-oss-120b";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "qwen2.5:1.5b";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// OpenAI-compatible backend
#[derive(Clone)]
pub struct OpenAiCompatBackend {
    client: Client,
    name: String,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl OpenAiCompatBackend {
    /// Create a backend with custom settings
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            name: name.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            temperature: None,
            max_tokens: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Groq cloud (backs the `gpt` route)
    pub fn groq(api_key: Option<String>) -> Result<Self> {
        Self::new("gpt", GROQ_BASE_URL, GROQ_DEFAULT_MODEL, api_key)
    }

    /// Local Ollama server (backs the `krypton` routes)
    pub fn ollama() -> Result<Self> {
        Ok(Self::new("krypton", OLLAMA_BASE_URL, OLLAMA_DEFAULT_MODEL, None)?
            .with_temperature(0.8)
            .with_max_tokens(1000))
    }

    pub fn openai(api_key: Option<String>) -> Result<Self> {
        Self::new("openai", OPENAI_BASE_URL, "gpt-4o", api_key)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Convert ProviderRequest to the chat completions format
    fn to_openai_request(&self, request: &ProviderRequest, stream: bool) -> OpenAIRequest {
        let messages = request.messages.iter().map(to_openai_message).collect();

        let tools = request.tools.as_ref().map(|tool_defs| {
            tool_defs
                .iter()
                .map(|tool| {
                    let parameters = match serde_json::to_value(&tool.input_schema) {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::warn!(
                                "Failed to convert tool schema for '{}': {}",
                                tool.name,
                                e
                            );
                            serde_json::json!({"type": "object"})
                        }
                    };

                    OpenAITool {
                        tool_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: tool.name.clone(),
                            description: tool.description.clone(),
                            parameters,
                        },
                    }
                })
                .collect()
        });

        OpenAIRequest {
            model: request.model_or(&self.default_model).to_string(),
            messages,
            max_tokens: request.max_tokens.or(self.max_tokens),
            temperature: request.temperature.or(self.temperature),
            tools,
            stream,
        }
    }

    /// Convert a chat completions response to ProviderResponse
    fn from_openai_response(&self, response: OpenAIResponse) -> Result<ProviderResponse, BackendError> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            BackendError::MalformedResponse {
                backend: self.name.clone(),
                message: "no choices in response".to_string(),
            }
        })?;

        let mut calls = Vec::new();
        for tool_call in choice.message.tool_calls.unwrap_or_default() {
            calls.push(parse_tool_call(&self.name, tool_call)?);
        }

        Ok(ProviderResponse {
            id: response.id.unwrap_or_default(),
            model: response.model.unwrap_or_else(|| self.default_model.clone()),
            provider: self.name.clone(),
            stop_reason: choice.finish_reason,
            reply: BackendReply::from_parts(choice.message.content, calls),
        })
    }

    async fn post(&self, body: &OpenAIRequest) -> Result<reqwest::Response, BackendError> {
        let mut builder = self
            .client
            .post(self.url())
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                backend: self.name.clone(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Send a single request (no retry)
    async fn send_message_once(&self, request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
        let openai_request = self.to_openai_request(request, false);

        tracing::debug!(backend = %self.name, model = %openai_request.model, "Sending chat completion");

        let response = self.post(&openai_request).await?;
        let openai_response: OpenAIResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse {
                    backend: self.name.clone(),
                    message: e.to_string(),
                })?;

        self.from_openai_response(openai_response)
    }

    /// Open a streaming request (no retry)
    async fn send_message_stream_once(&self, request: &ProviderRequest) -> Result<TextStream, BackendError> {
        let openai_request = self.to_openai_request(request, true);
        let response = self.post(&openai_request).await?;

        let (tx, rx) = mpsc::channel(100);
        let backend = self.name.clone();

        // Spawn task to parse the SSE stream
        tokio::spawn(async move {
            tracing::debug!(backend = %backend, "Streaming task started");
            let mut stream = response.bytes_stream();
            let mut sse = SseBuffer::new();

            'outer: while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!("Stream error: {}", e);
                        let _ = tx.send(Err(transport_error(&backend, e))).await;
                        break;
                    }
                };

                for payload in sse.push(&bytes) {
                    if payload == "[DONE]" {
                        break 'outer;
                    }
                    let Ok(chunk) = serde_json::from_str::<OpenAIStreamChunk>(&payload) else {
                        tracing::debug!("Skipping unparseable stream chunk");
                        continue;
                    };
                    let delta = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty());
                    if let Some(content) = delta {
                        if tx.send(Ok(content)).await.is_err() {
                            break 'outer;
                        }
                    }
                }
            }

            tracing::debug!(backend = %backend, "Streaming task finished");
        });

        Ok(rx)
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    async fn send_message(&self, request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
        with_retry(&self.name, &self.retry, || self.send_message_once(request)).await
    }

    async fn send_message_stream(&self, request: &ProviderRequest) -> Result<TextStream, BackendError> {
        with_retry(&self.name, &self.retry, || self.send_message_stream_once(request)).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

fn to_openai_message(message: &Message) -> OpenAIMessage {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    tool_type: "function".to_string(),
                    function: OpenAIToolFunction {
                        name: call.name.clone(),
                        arguments: Value::String(call.input.to_string()),
                    },
                })
                .collect(),
        )
    };

    // Assistant turns that only carry calls send a null content
    let content = if message.role == Role::Assistant && message.content.is_empty() && tool_calls.is_some() {
        None
    } else {
        Some(message.content.clone())
    };

    OpenAIMessage {
        role: message.role.as_str().to_string(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Turn a wire tool call into a ToolCall, rejecting malformed payloads
fn parse_tool_call(backend: &str, tool_call: OpenAIToolCall) -> Result<ToolCall, BackendError> {
    let malformed = |message: String| BackendError::MalformedToolCall {
        backend: backend.to_string(),
        message,
    };

    if tool_call.id.trim().is_empty() {
        return Err(malformed("tool call without an id".to_string()));
    }
    if tool_call.function.name.trim().is_empty() {
        return Err(malformed(format!("tool call '{}' without a name", tool_call.id)));
    }

    let input = match tool_call.function.arguments {
        Value::String(raw) if raw.trim().is_empty() => Value::Object(Default::default()),
        Value::String(raw) => serde_json::from_str(&raw).map_err(|e| {
            malformed(format!(
                "arguments for '{}' are not valid JSON: {}",
                tool_call.function.name, e
            ))
        })?,
        Value::Null => Value::Object(Default::default()),
        other => other,
    };

    if !input.is_object() {
        return Err(malformed(format!(
            "arguments for '{}' must be a JSON object",
            tool_call.function.name
        )));
    }

    Ok(ToolCall::with_id(tool_call.id, tool_call.function.name, input))
}

// Chat completions wire types

#[derive(Debug, Clone, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "is_false")]
    stream: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    tool_type: String,
    function: OpenAIToolFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIToolFunction {
    #[serde(default)]
    name: String,
    /// JSON string on the wire; some servers send an object
    #[serde(default)]
    arguments: Value,
}

// Streaming types

#[derive(Debug, Clone, Deserialize)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolResult;
    use serde_json::json;

    fn wire_call(id: &str, name: &str, arguments: Value) -> OpenAIToolCall {
        OpenAIToolCall {
            id: id.to_string(),
            tool_type: "function".to_string(),
            function: OpenAIToolFunction {
                name: name.to_string(),
                arguments,
            },
        }
    }

    #[test]
    fn test_presets() {
        let groq = OpenAiCompatBackend::groq(Some("key".to_string())).unwrap();
        assert_eq!(groq.name(), "gpt");
        assert_eq!(groq.default_model(), "openai/gpt-oss-120b");
        assert_eq!(groq.url(), "https://api.groq.com/openai/v1/chat/completions");

        let ollama = OpenAiCompatBackend::ollama().unwrap();
        assert_eq!(ollama.default_model(), "qwen2.5:1.5b");
        assert_eq!(ollama.temperature, Some(0.8));
        assert_eq!(ollama.max_tokens, Some(1000));
        assert!(ollama.api_key.is_none());
    }

    #[test]
    fn test_parse_tool_call_string_arguments() {
        let call = parse_tool_call(
            "gpt",
            wire_call("call_1", "get_weather", json!("{\"city\":\"sf\"}")),
        )
        .unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.input, json!({"city": "sf"}));
    }

    #[test]
    fn test_parse_tool_call_object_and_empty_arguments() {
        let call = parse_tool_call("gpt", wire_call("c", "t", json!({"a": 1}))).unwrap();
        assert_eq!(call.input, json!({"a": 1}));

        let call = parse_tool_call("gpt", wire_call("c", "t", json!(""))).unwrap();
        assert_eq!(call.input, json!({}));
    }

    #[test]
    fn test_parse_tool_call_rejects_malformed() {
        let bad_json = parse_tool_call("gpt", wire_call("c", "t", json!("{not json")));
        assert!(matches!(bad_json, Err(BackendError::MalformedToolCall { .. })));

        let not_object = parse_tool_call("gpt", wire_call("c", "t", json!("[1,2]")));
        assert!(matches!(not_object, Err(BackendError::MalformedToolCall { .. })));

        let no_id = parse_tool_call("gpt", wire_call("", "t", json!("{}")));
        assert!(matches!(no_id, Err(BackendError::MalformedToolCall { .. })));

        let no_name = parse_tool_call("gpt", wire_call("c", " ", json!("{}")));
        assert!(matches!(no_name, Err(BackendError::MalformedToolCall { .. })));
    }

    #[test]
    fn test_request_serialization() {
        let backend = OpenAiCompatBackend::ollama().unwrap();
        let call = ToolCall::with_id("call_1", "get_weather", json!({"city": "sf"}));
        let request = ProviderRequest::new(vec![
            Message::system("be brief"),
            Message::user("weather in sf?"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool_result(&ToolResult::success(
                "call_1".to_string(),
                "It's always sunny in sf!".to_string(),
            )),
        ]);

        let body = serde_json::to_value(backend.to_openai_request(&request, false)).unwrap();

        assert_eq!(body["model"], "qwen2.5:1.5b");
        assert_eq!(body["max_tokens"], 1000);
        assert!(body.get("stream").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["content"], Value::Null);
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"city\":\"sf\"}"
        );
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_response_without_choices_is_malformed() {
        let backend = OpenAiCompatBackend::ollama().unwrap();
        let response: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            backend.from_openai_response(response),
            Err(BackendError::MalformedResponse { .. })
        ));
    }
}
