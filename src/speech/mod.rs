// Speech collaborators: transcription in, synthesis out

pub mod synthesis;
pub mod transcription;

pub use synthesis::{SynthesisClient, SynthesizedAudio};
pub use transcription::{Transcription, TranscriptionClient};

use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::SpeechConfig;

/// Both speech clients, sharing one HTTP client
pub struct SpeechService {
    pub transcription: TranscriptionClient,
    pub synthesis: SynthesisClient,
}

impl SpeechService {
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; /v1/transcribe/ and /v1/live/conv/ will be unavailable",
                config.api_key_env
            );
        }

        Ok(Self {
            transcription: TranscriptionClient::new(
                http.clone(),
                config.base_url.clone(),
                api_key.clone(),
                config.transcription_model.clone(),
                Some(config.language.clone()),
            ),
            synthesis: SynthesisClient::new(
                http,
                config.base_url.clone(),
                api_key,
                config.tts_model.clone(),
                config.voice.clone(),
                config.response_format.clone(),
            ),
        })
    }
}
