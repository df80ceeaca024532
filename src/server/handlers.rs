// HTTP request handlers

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AgentServer;
use crate::errors::{RouterError, SessionError, SpeechError};
use crate::metrics::METRICS;
use crate::router::RouteInfo;

/// Create the main application router
pub fn create_router(server: Arc<AgentServer>) -> Router {
    Router::new()
        // Fixed chat endpoints
        .route("/v1/chat/krypton/", post(chat_krypton))
        .route("/v1/chat/krypton/agent/", post(chat_krypton_agent))
        .route("/v1/chat/gpt/", post(chat_gpt))
        .route("/v1/chat/gemini/3/flash/preview/", post(chat_gemini))
        // Any configured route
        .route("/v1/chat/:route", post(chat_route))
        .route("/v1/routes", get(list_routes))
        // Speech
        .route("/v1/transcribe/", post(transcribe))
        .route("/v1/live/conv/", post(live_conversation))
        // Health and metrics
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(server)
}

/// Request body for the chat endpoints
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub chat: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// Handle POST /v1/chat/:route
async fn chat_route(
    State(server): State<Arc<AgentServer>>,
    Path(route): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    run_chat(&server, &route, request).await
}

async fn chat_krypton(
    State(server): State<Arc<AgentServer>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    run_chat(&server, "krypton", request).await
}

async fn chat_krypton_agent(
    State(server): State<Arc<AgentServer>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    run_chat(&server, "krypton-agent", request).await
}

async fn chat_gpt(
    State(server): State<Arc<AgentServer>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    run_chat(&server, "gpt", request).await
}

async fn chat_gemini(
    State(server): State<Arc<AgentServer>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    run_chat(&server, "gemini", request).await
}

async fn run_chat(
    server: &AgentServer,
    route: &str,
    request: ChatRequest,
) -> Result<Json<ChatResponse>, AppError> {
    if request.chat.trim().is_empty() {
        return Err(BadRequest("'chat' must not be empty".to_string()).into());
    }

    let outcome = server.router().dispatch(route, &request.chat).await?;
    Ok(Json(ChatResponse {
        reply: outcome.answer,
    }))
}

/// Handle GET /v1/routes
async fn list_routes(State(server): State<Arc<AgentServer>>) -> Json<Vec<RouteInfo>> {
    Json(server.router().describe())
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub text: String,
}

/// Handle POST /v1/transcribe/ - multipart upload with a `file` field
async fn transcribe(
    State(server): State<Arc<AgentServer>>,
    multipart: Multipart,
) -> Result<Json<TranscribeResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let transcription = server
        .speech()
        .transcription
        .transcribe(upload.data, &upload.filename)
        .await?;

    Ok(Json(TranscribeResponse {
        text: transcription.text,
    }))
}

/// Handle POST /v1/live/conv/ - transcribe, answer briefly, speak the answer
async fn live_conversation(
    State(server): State<Arc<AgentServer>>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let upload = read_upload(multipart).await?;
    let speech = server.speech();

    let transcription = speech
        .transcription
        .transcribe(upload.data, &upload.filename)
        .await?;
    tracing::debug!(chars = transcription.text.len(), "Transcribed live audio");

    let settings = server.settings();
    let prompt = format!(
        "{} {}",
        settings.live_reply_instruction.trim(),
        transcription.text.trim()
    );
    let outcome = server.router().dispatch(&settings.live_route, &prompt).await?;

    let audio = speech.synthesis.synthesize(&outcome.answer).await?;
    Ok((
        [(header::CONTENT_TYPE, audio.content_type)],
        Body::from_stream(audio.stream),
    )
        .into_response())
}

struct Upload {
    filename: String,
    data: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("audio.wav").to_string();
        let data = field.bytes().await.map_err(|e| BadRequest(e.to_string()))?;
        if data.is_empty() {
            return Err(BadRequest("uploaded file is empty".to_string()).into());
        }
        return Ok(Upload {
            filename,
            data: data.to_vec(),
        });
    }

    Err(BadRequest("missing multipart field 'file'".to_string()).into())
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub uptime_seconds: u64,
    pub routes: usize,
}

/// Handle GET /health - Health check endpoint
pub async fn health_check(State(server): State<Arc<AgentServer>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        uptime_seconds: server.uptime().as_secs(),
        routes: server.router().route_names().len(),
    })
}

/// Handle GET /metrics - Prometheus metrics endpoint
pub async fn metrics_endpoint() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.gather_text(),
    )
        .into_response()
}

/// Client sent something unusable
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BadRequest(pub String);

/// Application error wrapper for proper HTTP error responses
pub struct AppError(anyhow::Error);

impl AppError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        if self.0.downcast_ref::<BadRequest>().is_some() {
            return (StatusCode::BAD_REQUEST, "invalid_request");
        }
        if let Some(err) = self.0.downcast_ref::<RouterError>() {
            return match err {
                RouterError::UnknownRoute(_) => (StatusCode::NOT_FOUND, "unknown_route"),
                RouterError::DuplicateRoute(_) => (StatusCode::INTERNAL_SERVER_ERROR, "api_error"),
                RouterError::Session(SessionError::Aborted { .. }) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "session_aborted")
                }
                RouterError::Session(SessionError::Backend(_)) => {
                    (StatusCode::BAD_GATEWAY, "backend_unavailable")
                }
                RouterError::Session(SessionError::Cancelled { .. }) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "session_cancelled")
                }
            };
        }
        if let Some(err) = self.0.downcast_ref::<SpeechError>() {
            return match err {
                SpeechError::NotConfigured(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "speech_not_configured")
                }
                _ => (StatusCode::BAD_GATEWAY, "speech_error"),
            };
        }
        (StatusCode::INTERNAL_SERVER_ERROR, "api_error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::warn!(error = %self.0, "Request rejected");
        }

        let mut body = serde_json::json!({
            "error": {
                "message": self.0.to_string(),
                "type": error_type
            }
        });

        // Aborted sessions hand back what they got done
        let transcript = match self.0.downcast_ref::<RouterError>() {
            Some(RouterError::Session(err)) => err.transcript(),
            _ => None,
        };
        if let Some(transcript) = transcript {
            body["error"]["transcript"] = serde_json::to_value(transcript.messages())
                .unwrap_or(serde_json::Value::Null);
        }

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
