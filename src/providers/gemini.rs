// Gemini generateContent backend

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use super::retry::{transport_error, with_retry, RetryPolicy};
use super::sse::SseBuffer;
use super::types::{BackendReply, ProviderRequest, ProviderResponse};
use super::{ModelBackend, TextStream};
use crate::agent::{Message, Role};
use crate::errors::BackendError;
use crate::tools::types::{ToolCall, ToolDefinition};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-3-flash-preview";

const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct GeminiBackend {
    client: Client,
    name: String,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl GeminiBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
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

    /// Google AI Studio with the default flash preview model
    pub fn google(api_key: Option<String>) -> Result<Self> {
        Self::new("gemini", GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL, api_key)
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

    fn api_url(&self, model: &str, stream: bool) -> String {
        if stream {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, model
            )
        } else {
            format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
        }
    }

    /// Build the JSON request body for the Gemini API
    fn build_request_body(&self, request: &ProviderRequest) -> Value {
        // functionResponse parts carry the tool name, not the call id
        let call_names: HashMap<&str, &str> = request
            .messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .map(|call| (call.id.as_str(), call.name.as_str()))
            .collect();

        let mut contents = Vec::new();
        let mut system_parts = Vec::new();
        // All responses to one model turn go out as a single user content
        let mut responses = Vec::new();

        for msg in &request.messages {
            if msg.role != Role::Tool && !responses.is_empty() {
                contents.push(json!({ "role": "user", "parts": std::mem::take(&mut responses) }));
            }
            match msg.role {
                Role::System => system_parts.push(json!({ "text": msg.content })),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": msg.content }]
                })),
                Role::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": model_parts(msg)
                })),
                Role::Tool => responses.push(function_response_part(msg, &call_names)),
            }
        }
        if !responses.is_empty() {
            contents.push(json!({ "role": "user", "parts": responses }));
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature.or(self.temperature) {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }

        let mut body = json!({ "contents": contents });
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            let declarations: Vec<Value> = tools.iter().map(to_function_declaration).collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        body
    }

    /// Parse a generateContent response
    fn parse_response(&self, model: &str, body: Value) -> Result<ProviderResponse, BackendError> {
        let malformed = |message: &str| BackendError::MalformedResponse {
            backend: self.name.clone(),
            message: message.to_string(),
        };

        let first = body["candidates"]
            .as_array()
            .ok_or_else(|| malformed("no candidates in response"))?
            .first()
            .ok_or_else(|| malformed("empty candidates"))?;

        let parts = first["content"]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut text = String::new();
        let mut calls = Vec::new();

        for part in &parts {
            if let Some(fragment) = part["text"].as_str() {
                text.push_str(fragment);
            }
            if let Some(fc) = part.get("functionCall") {
                let call = parse_function_call(&self.name, fc)?;
                calls.push(match part["thoughtSignature"].as_str() {
                    Some(signature) => call.with_signature(signature),
                    None => call,
                });
            }
        }

        Ok(ProviderResponse {
            id: body["responseId"].as_str().unwrap_or_default().to_string(),
            model: body["modelVersion"].as_str().unwrap_or(model).to_string(),
            provider: self.name.clone(),
            stop_reason: first["finishReason"].as_str().map(str::to_string),
            reply: BackendReply::from_parts(Some(text), calls),
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, BackendError> {
        let mut builder = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-goog-api-key", key);
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

    async fn send_message_once(&self, request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
        let model = request.model_or(&self.default_model);
        let body = self.build_request_body(request);

        tracing::debug!(backend = %self.name, model, "Sending generateContent request");

        let response = self.post(&self.api_url(model, false), &body).await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse {
                backend: self.name.clone(),
                message: e.to_string(),
            })?;

        self.parse_response(model, json)
    }

    async fn send_message_stream_once(&self, request: &ProviderRequest) -> Result<TextStream, BackendError> {
        let model = request.model_or(&self.default_model);
        let body = self.build_request_body(request);
        let response = self.post(&self.api_url(model, true), &body).await?;

        let (tx, rx) = mpsc::channel(100);
        let backend = self.name.clone();

        tokio::spawn(async move {
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
                    let Ok(event) = serde_json::from_str::<Value>(&payload) else {
                        continue;
                    };
                    let text: String = event["candidates"][0]["content"]["parts"]
                        .as_array()
                        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
                        .unwrap_or_default();
                    if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                        break 'outer;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
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

fn model_parts(msg: &Message) -> Vec<Value> {
    let mut parts = Vec::new();
    if !msg.content.is_empty() {
        parts.push(json!({ "text": msg.content }));
    }
    for call in &msg.tool_calls {
        let mut part = json!({
            "functionCall": { "id": call.id, "name": call.name, "args": call.input }
        });
        if let Some(signature) = &call.signature {
            part["thoughtSignature"] = json!(signature);
        }
        parts.push(part);
    }
    if parts.is_empty() {
        parts.push(json!({ "text": "" }));
    }
    parts
}

fn function_response_part(msg: &Message, call_names: &HashMap<&str, &str>) -> Value {
    let id = msg.tool_call_id.as_deref().unwrap_or_default();
    let name = call_names.get(id).copied().unwrap_or(id);
    let response = if msg.is_error {
        json!({ "error": msg.content })
    } else {
        json!({ "result": msg.content })
    };
    json!({
        "functionResponse": { "id": id, "name": name, "response": response }
    })
}

fn to_function_declaration(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.input_schema,
    })
}

fn parse_function_call(backend: &str, fc: &Value) -> Result<ToolCall, BackendError> {
    let malformed = |message: String| BackendError::MalformedToolCall {
        backend: backend.to_string(),
        message,
    };

    let name = fc["name"].as_str().unwrap_or_default();
    if name.trim().is_empty() {
        return Err(malformed("functionCall without a name".to_string()));
    }

    let input = match &fc["args"] {
        Value::Null => json!({}),
        args @ Value::Object(_) => args.clone(),
        _ => return Err(malformed(format!("args for '{}' must be an object", name))),
    };

    // Gemini only sometimes assigns call ids
    match fc["id"].as_str().filter(|id| !id.is_empty()) {
        Some(id) => Ok(ToolCall::with_id(id, name, input)),
        None => Ok(ToolCall::new(name, input)),
    }
}
