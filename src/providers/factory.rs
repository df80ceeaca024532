// Backend factory
//
// Creates model backends from configuration

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

use super::fallback_chain::FallbackChain;
use super::gemini::GeminiBackend;
use super::openai::OpenAiCompatBackend;
use super::retry::RetryPolicy;
use super::ModelBackend;
use crate::config::{BackendKind, BackendSettings, Config};

/// Create a single backend, without its fallbacks
pub fn create_backend(settings: &BackendSettings) -> Result<Arc<dyn ModelBackend>> {
    let api_key = settings.api_key();
    if api_key.is_none() {
        if let Some(var) = &settings.api_key_env {
            tracing::warn!(
                backend = %settings.name,
                "{} is not set; requests to this backend will likely be rejected",
                var
            );
        }
    }

    let retry = RetryPolicy {
        max_attempts: settings.max_attempts.max(1),
        ..RetryPolicy::default()
    };

    let backend: Arc<dyn ModelBackend> = match settings.kind {
        BackendKind::OpenAi => {
            let mut backend = OpenAiCompatBackend::new(
                settings.name.clone(),
                settings.base_url(),
                settings.model(),
                api_key,
            )?
            .with_retry_policy(retry);
            if let Some(temperature) = settings.temperature {
                backend = backend.with_temperature(temperature);
            }
            if let Some(max_tokens) = settings.max_tokens {
                backend = backend.with_max_tokens(max_tokens);
            }
            Arc::new(backend)
        }

        BackendKind::Gemini => {
            let mut backend = GeminiBackend::new(
                settings.name.clone(),
                settings.base_url(),
                settings.model(),
                api_key,
            )?
            .with_retry_policy(retry);
            if let Some(temperature) = settings.temperature {
                backend = backend.with_temperature(temperature);
            }
            if let Some(max_tokens) = settings.max_tokens {
                backend = backend.with_max_tokens(max_tokens);
            }
            Arc::new(backend)
        }
    };

    Ok(backend)
}

/// Create every configured backend, keyed by name
///
/// A backend with a fallback list is wrapped in a FallbackChain that tries
/// the backend itself first.
pub fn create_backends(config: &Config) -> Result<HashMap<String, Arc<dyn ModelBackend>>> {
    let mut plain = HashMap::new();
    for settings in &config.backends {
        let backend = create_backend(settings)
            .with_context(|| format!("Failed to create backend '{}'", settings.name))?;
        plain.insert(settings.name.clone(), backend);
    }

    let mut backends = HashMap::new();
    for settings in &config.backends {
        let primary = Arc::clone(&plain[&settings.name]);
        if settings.fallback.is_empty() {
            backends.insert(settings.name.clone(), primary);
            continue;
        }

        let mut chain = vec![primary];
        for name in &settings.fallback {
            let fallback = plain.get(name).with_context(|| {
                format!("Backend '{}' falls back to unknown '{}'", settings.name, name)
            })?;
            chain.push(Arc::clone(fallback));
        }
        let chain: Arc<dyn ModelBackend> = Arc::new(FallbackChain::new(settings.name.clone(), chain));
        backends.insert(settings.name.clone(), chain);
    }

    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_default_backends() {
        let backends = create_backends(&Config::default()).unwrap();

        assert_eq!(backends.len(), 3);
        assert_eq!(backends["krypton"].default_model(), "qwen2.5:1.5b");
        assert_eq!(backends["gpt"].default_model(), "openai/gpt-oss-120b");
        assert_eq!(backends["gemini"].default_model(), "gemini-3-flash-preview");
        assert_eq!(backends["gemini"].name(), "gemini");
    }

    #[test]
    fn test_fallback_backend_is_chained() {
        let mut config = Config::default();
        config.backends[1].fallback = vec!["krypton".to_string()];

        let backends = create_backends(&config).unwrap();
        let gpt = &backends["gpt"];
        assert_eq!(gpt.name(), "gpt");
        assert_eq!(gpt.default_model(), "openai/gpt-oss-120b");
    }

    #[test]
    fn test_unknown_fallback_fails() {
        let mut config = Config::default();
        config.backends[0].fallback = vec!["ghost".to_string()];
        assert!(create_backends(&config).is_err());
    }
}
