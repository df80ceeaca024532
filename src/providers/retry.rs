// Bounded retry with exponential backoff for backend calls
//
// Transient failures (transport errors, 429, 5xx) are retried a fixed number
// of times. Once the attempts run out the caller sees BackendError::Unavailable.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::errors::BackendError;
use crate::metrics::METRICS;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based), with up to 25% jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let base = exp.min(self.max_backoff);
        let jitter_ms = (base.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Run `op` under `policy`, labelling failures with `backend`
pub async fn with_retry<T, F, Fut>(
    backend: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                METRICS.record_backend_request(backend, "ok");
                return Ok(value);
            }
            Err(e) if e.is_retryable() => {
                METRICS.record_backend_request(backend, "retryable_error");
                if attempt >= max_attempts {
                    tracing::error!(
                        backend,
                        attempts = attempt,
                        "Backend unavailable, giving up: {}",
                        e
                    );
                    return Err(BackendError::Unavailable {
                        backend: backend.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }

                let delay = policy.backoff(attempt);
                tracing::warn!(
                    backend,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient backend failure, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                METRICS.record_backend_request(backend, "error");
                return Err(e);
            }
        }
    }
}

/// Map a reqwest failure onto the backend error taxonomy
pub(crate) fn transport_error(backend: &str, err: reqwest::Error) -> BackendError {
    BackendError::Transport {
        backend: backend.to_string(),
        message: err.to_string(),
    }
}
