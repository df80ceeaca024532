// Text-to-speech over an OpenAI-compatible audio API
//
// The audio body is handed back as a byte stream and never decoded.

use axum::body::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::errors::SpeechError;

/// Streamed audio with the content type the service declared
pub struct SynthesizedAudio {
    pub content_type: String,
    pub stream: BoxStream<'static, Result<Bytes, SpeechError>>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

pub struct SynthesisClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    response_format: String,
}

impl SynthesisClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        response_format: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            voice: voice.into(),
            response_format: response_format.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/audio/speech", self.base_url)
    }

    fn default_content_type(&self) -> String {
        match self.response_format.as_str() {
            "mp3" => "audio/mpeg".to_string(),
            "flac" => "audio/flac".to_string(),
            "ogg" | "opus" => "audio/ogg".to_string(),
            other => format!("audio/{}", other),
        }
    }

    pub async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SpeechError::NotConfigured("no API key for speech synthesis".to_string()))?;

        debug!(model = %self.model, voice = %self.voice, chars = text.len(), "Speech request");

        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: &self.response_format,
        };

        let response = self
            .http
            .post(self.url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("audio/"))
            .map(str::to_string)
            .unwrap_or_else(|| self.default_content_type());

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SpeechError::Request(e.to_string())))
            .boxed();

        Ok(SynthesizedAudio {
            content_type,
            stream,
        })
    }
}
