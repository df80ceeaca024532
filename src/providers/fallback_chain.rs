// Fallback chain for automatic backend failover
//
// Tries backends in priority order until one succeeds. A backend that answers
// but breaks the response contract stops the chain; trying another backend
// would hide the violation from the session.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ModelBackend, ProviderRequest, ProviderResponse, TextStream};
use crate::errors::BackendError;

/// A chain of backends to try in order
pub struct FallbackChain {
    name: String,
    backends: Vec<Arc<dyn ModelBackend>>,
}

impl FallbackChain {
    /// Create a new fallback chain with backends in priority order
    pub fn new(name: impl Into<String>, backends: Vec<Arc<dyn ModelBackend>>) -> Self {
        Self {
            name: name.into(),
            backends,
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Get the primary backend (first in chain)
    pub fn primary(&self) -> Option<&dyn ModelBackend> {
        self.backends.first().map(|b| b.as_ref())
    }

    /// Request with the model reset so each backend uses its own default
    fn request_for(&self, idx: usize, request: &ProviderRequest) -> ProviderRequest {
        if idx == 0 {
            return request.clone();
        }
        ProviderRequest {
            model: String::new(),
            ..request.clone()
        }
    }

    fn exhausted(&self, errors: Vec<String>) -> BackendError {
        BackendError::Unavailable {
            backend: self.name.clone(),
            attempts: errors.len() as u32,
            message: if errors.is_empty() {
                "no backends configured".to_string()
            } else {
                errors.join("; ")
            },
        }
    }

    /// Try sending message with automatic fallback
    pub async fn send_message_with_fallback(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, BackendError> {
        let mut errors = Vec::new();

        for (idx, backend) in self.backends.iter().enumerate() {
            tracing::info!(
                "Trying backend {} ({}/{})",
                backend.name(),
                idx + 1,
                self.backends.len()
            );

            match backend.send_message(&self.request_for(idx, request)).await {
                Ok(response) => {
                    if idx > 0 {
                        tracing::info!(
                            "Backend {} succeeded after {} failed attempts",
                            backend.name(),
                            idx
                        );
                    }
                    return Ok(response);
                }
                Err(e) if e.is_contract_violation() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Backend {} failed (attempt {}/{}): {}",
                        backend.name(),
                        idx + 1,
                        self.backends.len(),
                        e
                    );
                    errors.push(e.to_string());
                }
            }
        }

        Err(self.exhausted(errors))
    }

    /// Try streaming with automatic fallback
    pub async fn send_message_stream_with_fallback(
        &self,
        request: &ProviderRequest,
    ) -> Result<TextStream, BackendError> {
        let mut errors = Vec::new();

        for (idx, backend) in self.backends.iter().enumerate() {
            match backend.send_message_stream(&self.request_for(idx, request)).await {
                Ok(receiver) => return Ok(receiver),
                Err(e) => {
                    tracing::warn!(
                        "Backend {} streaming failed (attempt {}/{}): {}",
                        backend.name(),
                        idx + 1,
                        self.backends.len(),
                        e
                    );
                    errors.push(e.to_string());
                }
            }
        }

        Err(self.exhausted(errors))
    }
}

#[async_trait]
impl ModelBackend for FallbackChain {
    async fn send_message(&self, request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
        self.send_message_with_fallback(request).await
    }

    async fn send_message_stream(&self, request: &ProviderRequest) -> Result<TextStream, BackendError> {
        self.send_message_stream_with_fallback(request).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        self.primary().map(|b| b.default_model()).unwrap_or("default")
    }
}
