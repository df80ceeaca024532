// Bounded tool-call session
//
// One user request, one session. The session alternates between asking the
// backend and executing the tools it requests until the backend produces a
// final answer, the round bound is hit, or the backend breaks the contract.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::transcript::{Message, Transcript};
use crate::config::DEFAULT_MAX_ROUNDS;
use crate::errors::{AbortReason, SessionError};
use crate::providers::{BackendReply, ModelBackend, ProviderRequest};
use crate::tools::{ToolCall, ToolExecutor, ToolSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingBackend,
    AwaitingToolResults,
    Completed,
    Aborted,
}

/// Per-route session settings
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Maximum number of backend invocations
    pub max_rounds: usize,
    pub system_prompt: Option<String>,
    /// Overrides the backend's default model
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            system_prompt: None,
            model: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl SessionConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Result of a completed session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub answer: String,
    pub transcript: Transcript,
    /// Backend invocations used
    pub rounds: usize,
}

pub struct ToolCallSession {
    id: String,
    backend: Arc<dyn ModelBackend>,
    executor: ToolExecutor,
    config: SessionConfig,
    transcript: Transcript,
    state: SessionState,
    rounds: usize,
    seen_ids: HashSet<String>,
}

impl ToolCallSession {
    /// Start a session seeded with the optional system prompt and the user message
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        tools: ToolSet,
        config: SessionConfig,
        user_message: impl Into<String>,
    ) -> Self {
        let mut transcript = Transcript::new();
        if let Some(prompt) = config.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            transcript.push(Message::system(prompt));
        }
        transcript.push(Message::user(user_message));
        Self::from_transcript(backend, tools, config, transcript)
    }

    /// Continue from an existing transcript prefix
    ///
    /// Call ids already present count as used. The round counter starts at zero.
    pub fn from_transcript(
        backend: Arc<dyn ModelBackend>,
        tools: ToolSet,
        config: SessionConfig,
        transcript: Transcript,
    ) -> Self {
        let seen_ids = transcript.tool_calls().map(|c| c.id.clone()).collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            backend,
            executor: ToolExecutor::new(tools),
            config,
            transcript,
            state: SessionState::AwaitingBackend,
            rounds: 0,
            seen_ids,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run to completion
    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        self.drive().await
    }

    /// Run until completion or until `token` is cancelled
    ///
    /// Cancelling drops the pending backend call or tool execution. A running
    /// command is killed along with it. The session stays readable afterwards,
    /// so `rounds()` reports how far it got.
    pub async fn run_until_cancelled(
        &mut self,
        token: CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.drive() => Some(result),
        };

        match result {
            Some(result) => result,
            None => {
                warn!(session_id = %self.id, rounds = self.rounds, "Session cancelled");
                self.state = SessionState::Aborted;
                Err(SessionError::Cancelled {
                    transcript: std::mem::take(&mut self.transcript),
                })
            }
        }
    }

    #[instrument(skip_all, fields(session_id = %self.id, backend = %self.backend.name()))]
    async fn drive(&mut self) -> Result<SessionOutcome, SessionError> {
        loop {
            if self.rounds >= self.config.max_rounds {
                warn!(rounds = self.rounds, "Round limit reached");
                return Err(self.abort(AbortReason::RoundLimitExceeded {
                    max_rounds: self.config.max_rounds,
                }));
            }

            self.rounds += 1;
            self.state = SessionState::AwaitingBackend;
            debug!(round = self.rounds, "Invoking backend");

            let request = self.build_request();
            let response = match self.backend.send_message(&request).await {
                Ok(response) => response,
                Err(e) if e.is_contract_violation() => {
                    return Err(self.abort(AbortReason::MalformedBackendResponse(e.to_string())));
                }
                Err(e) => {
                    self.state = SessionState::Aborted;
                    return Err(SessionError::Backend(e));
                }
            };

            match response.reply {
                BackendReply::Final { text } => {
                    self.transcript.push(Message::assistant(text));
                    self.state = SessionState::Completed;
                    info!(rounds = self.rounds, "Session completed");

                    let answer = self
                        .transcript
                        .last_assistant_text()
                        .unwrap_or_default()
                        .to_string();
                    return Ok(SessionOutcome {
                        answer,
                        transcript: std::mem::take(&mut self.transcript),
                        rounds: self.rounds,
                    });
                }
                BackendReply::ToolCalls { text, calls } => {
                    if let Err(reason) = self.check_calls(&calls) {
                        return Err(self.abort(AbortReason::MalformedBackendResponse(reason)));
                    }

                    self.transcript.push(Message::assistant_with_tool_calls(
                        text.unwrap_or_default(),
                        calls.clone(),
                    ));
                    self.state = SessionState::AwaitingToolResults;
                    debug!(round = self.rounds, count = calls.len(), "Executing tool calls");

                    for call in &calls {
                        let result = self.executor.execute_tool(call).await;
                        self.transcript.push(Message::tool_result(&result));
                    }
                }
            }
        }
    }

    fn build_request(&self) -> ProviderRequest {
        let mut request = ProviderRequest::new(self.transcript.messages().to_vec())
            .with_tools(self.executor.tools().list());
        if let Some(model) = &self.config.model {
            request = request.with_model(model.clone());
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }

    /// Ids must be present and never reused within the session
    fn check_calls(&mut self, calls: &[ToolCall]) -> Result<(), String> {
        for call in calls {
            if call.id.trim().is_empty() {
                return Err(format!("tool call '{}' has an empty id", call.name));
            }
            if call.name.trim().is_empty() {
                return Err(format!("tool call '{}' has an empty name", call.id));
            }
            if !call.input.is_object() {
                return Err(format!("arguments of tool call '{}' are not an object", call.id));
            }
            if !self.seen_ids.insert(call.id.clone()) {
                return Err(format!("tool call id '{}' was already used", call.id));
            }
        }
        Ok(())
    }

    fn abort(&mut self, reason: AbortReason) -> SessionError {
        warn!(session_id = %self.id, "Session aborted: {}", reason);
        self.state = SessionState::Aborted;
        SessionError::Aborted {
            reason,
            transcript: std::mem::take(&mut self.transcript),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Role;
    use crate::errors::BackendError;
    use crate::providers::{ProviderResponse, TextStream};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    // Replays canned replies and records every request it sees
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<BackendReply, BackendError>>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<BackendReply, BackendError>>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn send_message(&self, request: &ProviderRequest) -> Result<ProviderResponse, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(BackendReply::final_text("out of script")))?;
            Ok(ProviderResponse {
                id: "r".to_string(),
                model: "stub".to_string(),
                provider: "stub".to_string(),
                stop_reason: None,
                reply,
            })
        }

        async fn send_message_stream(&self, _request: &ProviderRequest) -> Result<TextStream, BackendError> {
            unimplemented!("not used by sessions")
        }

        fn name(&self) -> &str {
            "stub"
        }

        fn default_model(&self) -> &str {
            "stub"
        }
    }

    fn no_tools() -> ToolSet {
        ToolSet::empty()
    }

    #[tokio::test]
    async fn test_final_answer_in_one_round() {
        let backend = ScriptedBackend::new(vec![Ok(BackendReply::final_text("hello"))]);
        let config = SessionConfig::default().with_system_prompt("be brief");

        let outcome = ToolCallSession::new(backend.clone(), no_tools(), config, "hi")
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.answer, "hello");
        assert_eq!(outcome.rounds, 1);
        let roles: Vec<Role> = outcome.transcript.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_none());
    }

    #[tokio::test]
    async fn test_empty_system_prompt_is_skipped() {
        let backend = ScriptedBackend::new(vec![Ok(BackendReply::final_text("ok"))]);
        let config = SessionConfig::default().with_system_prompt("");

        let outcome = ToolCallSession::new(backend, no_tools(), config, "hi")
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.transcript.messages()[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_not_fatal() {
        let call = ToolCall::with_id("c1", "delete_everything", json!({}));
        let backend = ScriptedBackend::new(vec![
            Ok(BackendReply::tool_calls(vec![call])),
            Ok(BackendReply::final_text("could not do that")),
        ]);

        let outcome = ToolCallSession::new(backend, no_tools(), SessionConfig::default(), "go")
            .run()
            .await
            .unwrap();

        let tool_msg = &outcome.transcript.messages()[2];
        assert_eq!(tool_msg.role, Role::Tool);
        assert!(tool_msg.is_error);
        assert!(tool_msg.content.contains("delete_everything"));
        assert_eq!(outcome.rounds, 2);
    }

    #[tokio::test]
    async fn test_duplicate_call_id_aborts() {
        let backend = ScriptedBackend::new(vec![
            Ok(BackendReply::tool_calls(vec![ToolCall::with_id("same", "t", json!({}))])),
            Ok(BackendReply::tool_calls(vec![ToolCall::with_id("same", "t", json!({}))])),
        ]);

        let err = ToolCallSession::new(backend, no_tools(), SessionConfig::default(), "go")
            .run()
            .await
            .unwrap_err();

        match err {
            SessionError::Aborted {
                reason: AbortReason::MalformedBackendResponse(reason),
                transcript,
            } => {
                assert!(reason.contains("already used"));
                assert_eq!(transcript.len(), 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_backend_reply_aborts() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::MalformedToolCall {
            backend: "stub".to_string(),
            message: "arguments are not JSON".to_string(),
        })]);

        let err = ToolCallSession::new(backend, no_tools(), SessionConfig::default(), "go")
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Aborted {
                reason: AbortReason::MalformedBackendResponse(_),
                ..
            }
        ));
        assert_eq!(err.transcript().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_unavailable_is_surfaced() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Unavailable {
            backend: "stub".to_string(),
            attempts: 3,
            message: "connection refused".to_string(),
        })]);

        let err = ToolCallSession::new(backend, no_tools(), SessionConfig::default(), "go")
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Backend(BackendError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_round_limit_of_one() {
        let backend = ScriptedBackend::new(vec![Ok(BackendReply::tool_calls(vec![
            ToolCall::with_id("c1", "t", json!({})),
        ]))]);
        let config = SessionConfig::default().with_max_rounds(1);

        let err = ToolCallSession::new(backend.clone(), no_tools(), config, "go")
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Aborted {
                reason: AbortReason::RoundLimitExceeded { max_rounds: 1 },
                ..
            }
        ));
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_from_transcript_remembers_ids() {
        let mut prefix = Transcript::new();
        prefix.push(Message::user("go"));
        prefix.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::with_id("old", "t", json!({}))],
        ));

        let backend = ScriptedBackend::new(vec![Ok(BackendReply::tool_calls(vec![
            ToolCall::with_id("old", "t", json!({})),
        ]))]);

        let session =
            ToolCallSession::from_transcript(backend, no_tools(), SessionConfig::default(), prefix);
        assert_eq!(session.state(), SessionState::AwaitingBackend);
        assert_eq!(session.transcript().len(), 2);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, SessionError::Aborted { .. }));
    }
}
