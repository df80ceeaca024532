// Speech-to-text over an OpenAI-compatible audio API (Groq Whisper)

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SpeechError;

/// Transcribed text plus what the service reports about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Audio length in seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

pub struct TranscriptionClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    language: Option<String>,
}

impl TranscriptionClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            language: language.filter(|l| !l.is_empty()),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/audio/transcriptions", self.base_url)
    }

    /// Transcribe raw audio; `filename` is the hint sent with the upload
    pub async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<Transcription, SpeechError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SpeechError::NotConfigured("no API key for transcription".to_string()))?;

        debug!(model = %self.model, size = audio.len(), "Transcription request");

        let file_part = Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str(mime_for(filename))
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .http
            .post(self.url())
            .bearer_auth(api_key)
            .multipart(form)
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

        response
            .json::<Transcription>()
            .await
            .map_err(|e| SpeechError::Parse(e.to_string()))
    }
}

fn mime_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "mp3" => "audio/mpeg",
        Some(ext) if ext == "m4a" || ext == "mp4" => "audio/mp4",
        Some(ext) if ext == "webm" => "audio/webm",
        Some(ext) if ext == "ogg" => "audio/ogg",
        Some(ext) if ext == "flac" => "audio/flac",
        _ => "audio/wav",
    }
}
