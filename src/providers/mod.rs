// Multi-backend LLM support
//
// This module provides an abstraction layer over different chat-completion
// backends (Groq, Ollama, OpenAI, Gemini) so routes and sessions can swap
// them freely behind one interface.

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use crate::errors::BackendError;

pub mod types;

// Backend implementations
pub mod gemini;
pub mod openai;

pub mod fallback_chain;
pub mod retry;
pub(crate) mod sse;

// Backend factory
pub mod factory;

// Re-export commonly used types
pub use factory::{create_backend, create_backends};
pub use fallback_chain::FallbackChain;
pub use gemini::GeminiBackend;
pub use openai::OpenAiCompatBackend;
pub use retry::RetryPolicy;
pub use types::{BackendReply, ProviderRequest, ProviderResponse};

/// Stream of text fragments from a streaming call
pub type TextStream = Receiver<Result<String, BackendError>>;

/// Trait for chat-completion backends
///
/// All backends implement this trait, providing a unified interface for
/// sending a transcript and streaming replies.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send the transcript and get a final answer or a batch of tool calls
    async fn send_message(&self, request: &ProviderRequest)
        -> Result<ProviderResponse, BackendError>;

    /// Send the transcript and stream the answer text
    ///
    /// The channel closes when the stream is complete. Each call starts a
    /// fresh stream from the beginning.
    async fn send_message_stream(&self, request: &ProviderRequest)
        -> Result<TextStream, BackendError>;

    /// Backend name as configured (e.g., "gpt", "krypton")
    fn name(&self) -> &str;

    /// Model used when the request does not name one
    fn default_model(&self) -> &str;
}

/// Drain a text stream into one string
pub async fn collect_stream(mut rx: TextStream) -> Result<String, BackendError> {
    let mut text = String::new();
    while let Some(fragment) = rx.recv().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}
