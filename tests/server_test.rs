// Integration tests for the HTTP surface

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use krypton::agent::{Role, SessionConfig};
use krypton::config::{ServerConfig, SpeechConfig};
use krypton::errors::BackendError;
use krypton::providers::{BackendReply, ModelBackend, ProviderRequest, ProviderResponse, TextStream};
use krypton::router::{Route, Router};
use krypton::server::AgentServer;
use krypton::speech::SpeechService;
use krypton::tools::{ToolCall, ToolSet};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Echoes the last user message and remembers it
#[derive(Default)]
struct EchoBackend {
    last_user: Mutex<Option<String>>,
}

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn send_message(&self, request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        *self.last_user.lock().unwrap() = Some(user.clone());
        Ok(ProviderResponse {
            id: "echo".to_string(),
            model: "echo".to_string(),
            provider: "echo".to_string(),
            stop_reason: None,
            reply: BackendReply::final_text(format!("echo: {}", user)),
        })
    }

    async fn send_message_stream(&self, _request: &ProviderRequest) -> Result<TextStream, BackendError> {
        unimplemented!()
    }

    fn name(&self) -> &str {
        "echo"
    }

    fn default_model(&self) -> &str {
        "echo"
    }
}

/// Requests an unknown tool forever
struct LoopingBackend;

#[async_trait]
impl ModelBackend for LoopingBackend {
    async fn send_message(&self, _request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
        Ok(ProviderResponse {
            id: "loop".to_string(),
            model: "loop".to_string(),
            provider: "loop".to_string(),
            stop_reason: None,
            reply: BackendReply::tool_calls(vec![ToolCall::new("spin", json!({}))]),
        })
    }

    async fn send_message_stream(&self, _request: &ProviderRequest) -> Result<TextStream, BackendError> {
        unimplemented!()
    }

    fn name(&self) -> &str {
        "loop"
    }

    fn default_model(&self) -> &str {
        "loop"
    }
}

/// Fails like an unreachable provider
struct DownBackend;

#[async_trait]
impl ModelBackend for DownBackend {
    async fn send_message(&self, _request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
        Err(BackendError::Unavailable {
            backend: "down".to_string(),
            attempts: 3,
            message: "connection refused".to_string(),
        })
    }

    async fn send_message_stream(&self, _request: &ProviderRequest) -> Result<TextStream, BackendError> {
        unimplemented!()
    }

    fn name(&self) -> &str {
        "down"
    }

    fn default_model(&self) -> &str {
        "down"
    }
}

fn unconfigured_speech() -> SpeechConfig {
    SpeechConfig {
        api_key_env: "KRYPTON_TEST_UNSET_SPEECH_KEY".to_string(),
        ..SpeechConfig::default()
    }
}

fn build_app(echo: Arc<EchoBackend>, speech: SpeechConfig) -> axum::Router {
    let mut router = Router::new();
    for name in ["krypton", "krypton-agent", "gpt", "gemini"] {
        router
            .add_route(Route::new(name, echo.clone(), ToolSet::empty(), SessionConfig::default()))
            .unwrap();
    }
    router
        .add_route(Route::new(
            "looping",
            Arc::new(LoopingBackend),
            ToolSet::empty(),
            SessionConfig::default().with_max_rounds(2),
        ))
        .unwrap();
    router
        .add_route(Route::new("down", Arc::new(DownBackend), ToolSet::empty(), SessionConfig::default()))
        .unwrap();

    let speech = SpeechService::from_config(&speech).unwrap();
    AgentServer::new(router, speech, ServerConfig::default()).into_app()
}

fn app() -> axum::Router {
    build_app(Arc::new(EchoBackend::default()), unconfigured_speech())
}

fn chat_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "krypton-test-boundary";

fn multipart_request(uri: &str, field: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n",
            BOUNDARY, field
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_fixed_chat_endpoints() {
    for uri in [
        "/v1/chat/krypton/",
        "/v1/chat/krypton/agent/",
        "/v1/chat/gpt/",
        "/v1/chat/gemini/3/flash/preview/",
    ] {
        let response = app()
            .oneshot(chat_request(uri, json!({"chat": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        assert_eq!(json_body(response).await, json!({"reply": "echo: hello"}));
    }
}

#[tokio::test]
async fn test_named_route_endpoint() {
    let response = app()
        .oneshot(chat_request("/v1/chat/gpt", json!({"chat": "hi"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["reply"], "echo: hi");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = app()
        .oneshot(chat_request("/v1/chat/nope", json!({"chat": "hi"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["type"], "unknown_route");
}

#[tokio::test]
async fn test_empty_chat_is_400() {
    let response = app()
        .oneshot(chat_request("/v1/chat/gpt/", json!({"chat": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn test_aborted_session_is_422_with_transcript() {
    let response = app()
        .oneshot(chat_request("/v1/chat/looping", json!({"chat": "spin"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "session_aborted");
    let transcript = body["error"]["transcript"].as_array().unwrap();
    assert_eq!(transcript[0]["role"], "user");
    assert_eq!(transcript[0]["content"], "spin");
    let tool_results = transcript.iter().filter(|m| m["role"] == "tool").count();
    assert_eq!(tool_results, 2);
}

#[tokio::test]
async fn test_backend_down_is_502() {
    let response = app()
        .oneshot(chat_request("/v1/chat/down", json!({"chat": "hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "backend_unavailable");
    assert!(body["error"]["message"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_routes_listing() {
    let response = app()
        .oneshot(Request::get("/v1/routes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["krypton", "krypton-agent", "gpt", "gemini", "looping", "down"]);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["routes"], 6);

    let response = app()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_transcribe_without_key_is_503() {
    let response = app()
        .oneshot(multipart_request("/v1/transcribe/", "file", b"RIFF0000WAVE"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["type"], "speech_not_configured");
}

#[tokio::test]
async fn test_transcribe_without_file_is_400() {
    let response = app()
        .oneshot(multipart_request("/v1/transcribe/", "audio", b"RIFF0000WAVE"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_live_conversation_round_trip() {
    let mut speech_api = mockito::Server::new_async().await;
    let transcription = speech_api
        .mock("POST", "/v1/audio/transcriptions")
        .match_header("authorization", "Bearer live-test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"text":" what time is it ","language":"English","duration":1.2}"#)
        .create_async()
        .await;
    let synthesis = speech_api
        .mock("POST", "/v1/audio/speech")
        .match_body(mockito::Matcher::PartialJson(json!({
            "voice": "autumn",
            "response_format": "wav"
        })))
        .with_status(200)
        .with_header("content-type", "audio/wav")
        .with_body(b"RIFFfakeaudio")
        .create_async()
        .await;

    std::env::set_var("KRYPTON_TEST_LIVE_SPEECH_KEY", "live-test-key");
    let speech = SpeechConfig {
        base_url: speech_api.url(),
        api_key_env: "KRYPTON_TEST_LIVE_SPEECH_KEY".to_string(),
        ..SpeechConfig::default()
    };
    let echo = Arc::new(EchoBackend::default());

    let response = build_app(echo.clone(), speech)
        .oneshot(multipart_request("/v1/live/conv/", "file", b"RIFF0000WAVE"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    let audio = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&audio[..], b"RIFFfakeaudio");

    let prompt = echo.last_user.lock().unwrap().clone().unwrap();
    assert!(prompt.starts_with("use less words"));
    assert!(prompt.ends_with(" what time is it"));

    transcription.assert_async().await;
    synthesis.assert_async().await;
}
