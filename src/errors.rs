// Error taxonomy
//
// Tool-level failures are absorbed into tool results by the session.
// Session-level failures are surfaced to the caller.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::agent::Transcript;

/// Errors raised while registering, resolving or executing a tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Command not permitted: {0}")]
    CommandDenied(String),

    #[error("Command '{command}' timed out after {}ms", timeout.as_millis())]
    ExecutionTimeout { command: String, timeout: Duration },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

/// Errors raised by a model backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Retries exhausted on a transient failure
    #[error("Backend '{backend}' unavailable after {attempts} attempt(s): {message}")]
    Unavailable {
        backend: String,
        attempts: u32,
        message: String,
    },

    #[error("Backend '{backend}' request failed: {message}")]
    Transport { backend: String, message: String },

    #[error("Backend '{backend}' rejected the request\n\nStatus: {status}\nBody: {body}")]
    Rejected {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response from '{backend}': {message}")]
    MalformedResponse { backend: String, message: String },

    #[error("Malformed tool call from '{backend}': {message}")]
    MalformedToolCall { backend: String, message: String },
}

impl BackendError {
    /// Connection failures, rate limits and server errors are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport { .. } => true,
            BackendError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The backend answered, but broke the response contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            BackendError::MalformedResponse { .. } | BackendError::MalformedToolCall { .. }
        )
    }
}

/// Why a session was forced into the aborted state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    RoundLimitExceeded { max_rounds: usize },
    MalformedBackendResponse(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::RoundLimitExceeded { max_rounds } => {
                write!(f, "round limit of {} exceeded", max_rounds)
            }
            AbortReason::MalformedBackendResponse(message) => {
                write!(f, "malformed backend response: {}", message)
            }
        }
    }
}

/// Errors that terminate a tool-call session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session aborted: {reason}")]
    Aborted {
        reason: AbortReason,
        transcript: Transcript,
    },

    #[error(transparent)]
    Backend(BackendError),

    #[error("Session cancelled")]
    Cancelled { transcript: Transcript },
}

impl SessionError {
    /// Partial transcript, when the session got far enough to have one
    pub fn transcript(&self) -> Option<&Transcript> {
        match self {
            SessionError::Aborted { transcript, .. } | SessionError::Cancelled { transcript } => {
                Some(transcript)
            }
            SessionError::Backend(_) => None,
        }
    }
}

/// Errors from the route table
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Route '{0}' is already defined")]
    DuplicateRoute(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors from the transcription and synthesis services
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Speech service is not configured: {0}")]
    NotConfigured(String),

    #[error("Speech request failed: {0}")]
    Request(String),

    #[error("Speech service rejected the request\n\nStatus: {status}\nBody: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to parse speech response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16) -> BackendError {
        BackendError::Rejected {
            backend: "gpt".to_string(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(rejected(429).is_retryable());
        assert!(rejected(503).is_retryable());
        assert!(!rejected(400).is_retryable());
        assert!(!rejected(401).is_retryable());

        let transport = BackendError::Transport {
            backend: "gpt".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(transport.is_retryable());

        let malformed = BackendError::MalformedToolCall {
            backend: "gpt".to_string(),
            message: "bad json".to_string(),
        };
        assert!(!malformed.is_retryable());
        assert!(malformed.is_contract_violation());
    }

    #[test]
    fn test_timeout_message() {
        let err = ToolError::ExecutionTimeout {
            command: "sleep 100".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Command 'sleep 100' timed out after 250ms");
    }

    #[test]
    fn test_abort_reason_display() {
        let reason = AbortReason::RoundLimitExceeded { max_rounds: 5 };
        assert_eq!(reason.to_string(), "round limit of 5 exceeded");
    }
}
