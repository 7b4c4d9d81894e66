use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use quill_rpc::{ClientInfo, NotificationHandler, RpcConnection, RpcError, TransportConfig};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::engine::{TransformEngine, TransformRequest};
use crate::error::EngineError;
use crate::extract::{
    assistant_fragments, error_message, join_fragments, notification_thread_id,
    notification_turn_id, started_thread_id, started_turn_id, thread_read_fragments,
};

pub const DEFAULT_STDIO_COMMAND: &str = "codex app-server --listen stdio://";
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_SANDBOX_MODE: &str = "workspace-write";
const THREAD_READ_TIMEOUT_CAP: Duration = Duration::from_secs(10);
const SESSION_STDERR_TAIL_CAPACITY: usize = 10;
const BASE_INSTRUCTIONS: &str =
    "You are a deterministic text transformer. Never use tools. Return transformed text only.";
const FAILED_TURN_MESSAGE: &str = "Transform failed.";
const UNRECOVERABLE_ERROR_MESSAGE: &str = "App server reported an unrecoverable error.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates the protocol phases of one transform session.
pub enum SessionPhase {
    Uninitialized,
    Initialized,
    ThreadStarted,
    TurnStarted,
    Finished { failed: bool },
}

/// Mutable state of one session, shared between the caller and the
/// notification handler running on the dispatch task.
#[derive(Debug)]
pub struct SessionState {
    phase: SessionPhase,
    thread_id: Option<String>,
    turn_id: Option<String>,
    terminal_error: Option<String>,
    assistant_segments: Vec<String>,
    stdout_closed: bool,
    completion: Option<oneshot::Sender<()>>,
}

impl SessionState {
    /// Returns the state and the receiver that fires once the session
    /// finishes or the server closes stdout.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                phase: SessionPhase::Uninitialized,
                thread_id: None,
                turn_id: None,
                terminal_error: None,
                assistant_segments: Vec::new(),
                stdout_closed: false,
                completion: Some(sender),
            },
            receiver,
        )
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.turn_id.as_deref()
    }

    pub fn terminal_error(&self) -> Option<&str> {
        self.terminal_error.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, SessionPhase::Finished { .. })
    }

    pub fn stdout_closed(&self) -> bool {
        self.stdout_closed
    }

    pub fn assistant_segments(&self) -> &[String] {
        &self.assistant_segments
    }

    pub fn merged_output(&self) -> String {
        join_fragments(&self.assistant_segments)
    }

    /// Moves to `phase` unless the session already finished.
    pub fn advance(&mut self, phase: SessionPhase) {
        if !self.is_finished() {
            self.phase = phase;
        }
    }

    pub fn record_thread_id(&mut self, thread_id: String) {
        self.thread_id = Some(thread_id);
    }

    pub fn record_turn_id(&mut self, turn_id: String) {
        self.turn_id = Some(turn_id);
    }

    /// True when every id embedded in `params` equals the id this session
    /// already knows. Unknown session ids accept anything.
    pub fn matches_active_run(&self, params: &Value) -> bool {
        let thread_matches = match (notification_thread_id(params), self.thread_id.as_deref()) {
            (Some(embedded), Some(active)) => embedded == active,
            _ => true,
        };
        let turn_matches = match (notification_turn_id(params), self.turn_id.as_deref()) {
            (Some(embedded), Some(active)) => embedded == active,
            _ => true,
        };
        thread_matches && turn_matches
    }

    /// Applies one notification. After the session finished only assistant
    /// text is still collected; lifecycle and completion events are ignored.
    pub fn apply_notification(&mut self, method: &str, params: &Value) {
        let carries_text = matches!(method, "item/agentMessage/delta" | "item/completed");
        if self.is_finished() && !carries_text {
            tracing::trace!(method, "ignoring notification after session finished");
            return;
        }
        if !self.matches_active_run(params) {
            tracing::debug!(method, "ignoring notification for another thread or turn");
            return;
        }
        match method {
            "thread/started" => {
                if let Some(thread_id) = notification_thread_id(params) {
                    self.thread_id = Some(thread_id.to_string());
                }
            }
            "turn/started" => {
                if let Some(turn_id) = notification_turn_id(params) {
                    self.turn_id = Some(turn_id.to_string());
                }
            }
            "item/agentMessage/delta" => {
                if let Some(delta) = params.get("delta").and_then(Value::as_str) {
                    self.append_segment(delta);
                }
            }
            "item/completed" => {
                if let Some(item) = params.get("item").filter(|item| item.is_object()) {
                    for fragment in assistant_fragments(item) {
                        self.append_segment(&fragment);
                    }
                }
            }
            "turn/completed" => {
                let turn = params.get("turn");
                let failed = turn
                    .and_then(|turn| turn.get("status"))
                    .and_then(Value::as_str)
                    == Some("failed");
                if failed {
                    let message = error_message(turn.and_then(|turn| turn.get("error")))
                        .unwrap_or_else(|| FAILED_TURN_MESSAGE.to_string());
                    self.terminal_error = Some(message);
                }
                self.finish();
            }
            "error" => {
                let will_retry = params
                    .get("willRetry")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if will_retry {
                    tracing::debug!("app server reported a retryable error");
                    return;
                }
                let message = error_message(params.get("error"))
                    .unwrap_or_else(|| UNRECOVERABLE_ERROR_MESSAGE.to_string());
                self.terminal_error = Some(message);
                self.finish();
            }
            _ => {}
        }
    }

    pub fn mark_stdout_closed(&mut self) {
        self.stdout_closed = true;
        self.signal_completion();
    }

    fn append_segment(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.assistant_segments.push(trimmed.to_string());
        }
    }

    fn finish(&mut self) {
        if self.is_finished() {
            return;
        }
        self.phase = SessionPhase::Finished {
            failed: self.terminal_error.is_some(),
        };
        self.signal_completion();
    }

    fn signal_completion(&mut self) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(());
        }
    }
}

struct SessionNotifications {
    state: Arc<Mutex<SessionState>>,
}

impl NotificationHandler for SessionNotifications {
    fn handle_notification(&mut self, method: &str, params: &Value) {
        tracing::trace!(method, "session notification");
        lock_or_recover(&self.state).apply_notification(method, params);
    }

    fn connection_closed(&mut self) {
        lock_or_recover(&self.state).mark_stdout_closed();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `AppServerEngineConfig` used across Quill components.
pub struct AppServerEngineConfig {
    pub launch_command: String,
    pub timeout: Duration,
    /// Working directory reported in `thread/start`; defaults to the process cwd.
    pub cwd: Option<PathBuf>,
    /// Sandbox mode requested in `thread/start`.
    pub sandbox: String,
    pub client: ClientInfo,
    pub transport: TransportConfig,
}

impl Default for AppServerEngineConfig {
    fn default() -> Self {
        Self {
            launch_command: DEFAULT_STDIO_COMMAND.to_string(),
            timeout: DEFAULT_TRANSFORM_TIMEOUT,
            cwd: None,
            sandbox: DEFAULT_SANDBOX_MODE.to_string(),
            client: ClientInfo::default(),
            transport: TransportConfig {
                stderr_tail_capacity: SESSION_STDERR_TAIL_CAPACITY,
                label: "transform".to_string(),
                ..TransportConfig::default()
            },
        }
    }
}

/// Runs each transform as a fresh app-server conversation: one subprocess,
/// one thread, one turn.
#[derive(Debug, Clone)]
pub struct AppServerEngine {
    config: AppServerEngineConfig,
}

impl AppServerEngine {
    pub fn new(config: AppServerEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppServerEngineConfig {
        &self.config
    }
}

#[async_trait]
impl TransformEngine for AppServerEngine {
    async fn transform(&self, request: TransformRequest) -> Result<String, EngineError> {
        let (state, completion) = SessionState::new();
        let state = Arc::new(Mutex::new(state));
        let connection = RpcConnection::open(
            &self.config.launch_command,
            &self.config.transport,
            SessionNotifications {
                state: Arc::clone(&state),
            },
        )?;
        tracing::debug!(
            label = %self.config.transport.label,
            model = %request.model,
            prompt_chars = request.prompt.chars().count(),
            "starting transform session"
        );

        let session = ConversationSession {
            connection: &connection,
            state: &state,
            config: &self.config,
        };
        let outcome = session.run(&request, completion).await;
        connection.shutdown().await;
        outcome
    }
}

struct ConversationSession<'a> {
    connection: &'a RpcConnection,
    state: &'a Arc<Mutex<SessionState>>,
    config: &'a AppServerEngineConfig,
}

impl ConversationSession<'_> {
    async fn run(
        &self,
        request: &TransformRequest,
        completion: oneshot::Receiver<()>,
    ) -> Result<String, EngineError> {
        let timeout = self.config.timeout;

        self.connection
            .initialize(&self.config.client, timeout)
            .await?;
        lock_or_recover(self.state).advance(SessionPhase::Initialized);

        let thread_result = self
            .connection
            .request(
                "thread/start",
                json!({
                    "model": request.model,
                    "cwd": self.working_directory(),
                    "approvalPolicy": "never",
                    "sandbox": self.config.sandbox,
                    "baseInstructions": BASE_INSTRUCTIONS,
                }),
                timeout,
            )
            .await?;
        let thread_id = {
            let mut state = lock_or_recover(self.state);
            let thread_id = started_thread_id(&thread_result)
                .or_else(|| state.thread_id().map(str::to_string))
                .ok_or_else(|| {
                    RpcError::InvalidResponse("thread/start did not return thread.id".to_string())
                })?;
            state.record_thread_id(thread_id.clone());
            state.advance(SessionPhase::ThreadStarted);
            thread_id
        };
        tracing::debug!(thread_id = %thread_id, "thread started");

        let turn_result = self
            .connection
            .request(
                "turn/start",
                json!({
                    "threadId": thread_id,
                    "input": [{ "type": "text", "text": request.prompt }],
                    "model": request.model,
                    "summary": "none",
                    "effort": "low",
                    "approvalPolicy": "never",
                }),
                timeout,
            )
            .await?;
        {
            let mut state = lock_or_recover(self.state);
            if let Some(turn_id) = started_turn_id(&turn_result) {
                state.record_turn_id(turn_id);
            }
            state.advance(SessionPhase::TurnStarted);
            tracing::debug!(turn_id = state.turn_id().unwrap_or("<pending>"), "turn started");
        }

        let signalled = tokio::time::timeout(timeout, completion).await.is_ok();
        let (finished, terminal_error) = {
            let state = lock_or_recover(self.state);
            (state.is_finished(), state.terminal_error().map(str::to_string))
        };

        if !finished {
            if let Some(output) = self.read_thread_output().await {
                tracing::debug!("recovered output from thread/read after incomplete turn");
                return Ok(output);
            }
            let error = if signalled {
                self.connection.closed_error().await
            } else {
                self.connection.timeout_error("turn completion")
            };
            return Err(error.into());
        }

        if let Some(message) = terminal_error {
            return Err(RpcError::Rpc(message).into());
        }
        if let Some(output) = self.read_thread_output().await {
            return Ok(output);
        }
        let merged = lock_or_recover(self.state).merged_output();
        if !merged.is_empty() {
            return Ok(merged);
        }
        Err(EngineError::NoOutput {
            stderr: self.connection.stderr_summary(),
        })
    }

    async fn read_thread_output(&self) -> Option<String> {
        let thread_id = lock_or_recover(self.state).thread_id()?.to_string();
        let timeout = self.config.timeout.min(THREAD_READ_TIMEOUT_CAP);
        let result = self
            .connection
            .request(
                "thread/read",
                json!({ "threadId": thread_id, "includeTurns": true }),
                timeout,
            )
            .await;
        match result {
            Ok(result) => {
                let output = join_fragments(&thread_read_fragments(&result));
                (!output.is_empty()).then_some(output)
            }
            Err(error) => {
                tracing::debug!(error = %error, "thread/read fallback failed");
                None
            }
        }
    }

    fn working_directory(&self) -> String {
        self.config
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| ".".to_string())
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AppServerEngineConfig, SessionPhase, SessionState};

    fn started_session() -> (SessionState, tokio::sync::oneshot::Receiver<()>) {
        let (mut state, completion) = SessionState::new();
        state.record_thread_id("t-1".to_string());
        state.record_turn_id("u-1".to_string());
        state.advance(SessionPhase::TurnStarted);
        (state, completion)
    }

    #[test]
    fn unit_default_config_uses_session_tail_and_codex_command() {
        let config = AppServerEngineConfig::default();
        assert_eq!(config.launch_command, "codex app-server --listen stdio://");
        assert_eq!(config.timeout.as_secs(), 90);
        assert_eq!(config.transport.stderr_tail_capacity, 10);
        assert_eq!(config.sandbox, "workspace-write");
    }

    #[test]
    fn unit_deltas_accumulate_trimmed_segments() {
        let (mut state, _completion) = started_session();
        state.apply_notification("item/agentMessage/delta", &json!({"delta": " O "}));
        state.apply_notification("item/agentMessage/delta", &json!({"delta": "   "}));
        state.apply_notification("item/agentMessage/delta", &json!({"delta": "K"}));
        assert_eq!(state.assistant_segments(), ["O", "K"]);
        assert_eq!(state.merged_output(), "OK");
    }

    #[test]
    fn unit_notifications_for_other_thread_or_turn_are_ignored() {
        let (mut state, _completion) = started_session();
        state.apply_notification(
            "item/agentMessage/delta",
            &json!({"threadId": "t-other", "delta": "wrong thread"}),
        );
        state.apply_notification(
            "item/agentMessage/delta",
            &json!({"threadId": "t-1", "turnId": "u-other", "delta": "wrong turn"}),
        );
        state.apply_notification(
            "turn/completed",
            &json!({"turn": {"id": "u-other", "status": "completed"}}),
        );
        state.apply_notification(
            "item/agentMessage/delta",
            &json!({"threadId": "t-1", "turnId": "u-1", "delta": "right"}),
        );
        assert_eq!(state.merged_output(), "right");
        assert!(!state.is_finished());
    }

    #[test]
    fn unit_unknown_session_ids_accept_any_notification() {
        let (mut state, _completion) = SessionState::new();
        assert!(state.matches_active_run(&json!({"threadId": "t-9", "turnId": "u-9"})));
        state.apply_notification("thread/started", &json!({"thread": {"id": "t-9"}}));
        state.apply_notification("turn/started", &json!({"turn": {"id": "u-9", "threadId": "t-9"}}));
        assert_eq!(state.thread_id(), Some("t-9"));
        assert_eq!(state.turn_id(), Some("u-9"));
        assert!(!state.matches_active_run(&json!({"turnId": "u-1"})));
    }

    #[test]
    fn unit_item_completed_collects_only_assistant_text() {
        let (mut state, _completion) = started_session();
        state.apply_notification(
            "item/completed",
            &json!({"item": {"type": "userMessage", "content": [{"text": "prompt"}]}}),
        );
        state.apply_notification(
            "item/completed",
            &json!({"item": {"type": "agentMessage", "turnId": "u-1", "text": "Final"}}),
        );
        assert_eq!(state.merged_output(), "Final");
    }

    #[test]
    fn functional_turn_completed_finishes_exactly_once() {
        let (mut state, mut completion) = started_session();
        state.apply_notification("turn/completed", &json!({"turn": {"id": "u-1", "status": "completed"}}));
        assert_eq!(state.phase(), SessionPhase::Finished { failed: false });
        assert!(completion.try_recv().is_ok());

        state.apply_notification(
            "turn/completed",
            &json!({"turn": {"id": "u-1", "status": "failed"}}),
        );
        assert_eq!(state.phase(), SessionPhase::Finished { failed: false });
        assert_eq!(state.terminal_error(), None);
        state.advance(SessionPhase::TurnStarted);
        assert!(state.is_finished());
    }

    #[test]
    fn functional_failed_turn_records_embedded_or_default_message() {
        let (mut state, _completion) = started_session();
        state.apply_notification(
            "turn/completed",
            &json!({"turn": {"id": "u-1", "status": "failed", "error": {"message": "boom"}}}),
        );
        assert_eq!(state.terminal_error(), Some("boom"));
        assert_eq!(state.phase(), SessionPhase::Finished { failed: true });

        let (mut bare, _completion) = started_session();
        bare.apply_notification("turn/completed", &json!({"turn": {"status": "failed"}}));
        assert_eq!(bare.terminal_error(), Some("Transform failed."));
    }

    #[test]
    fn functional_error_notification_respects_will_retry() {
        let (mut state, _completion) = started_session();
        state.apply_notification(
            "error",
            &json!({"willRetry": true, "error": {"message": "stream hiccup"}}),
        );
        assert!(!state.is_finished());
        assert_eq!(state.terminal_error(), None);

        state.apply_notification("error", &json!({"error": {"message": "quota exceeded"}}));
        assert!(state.is_finished());
        assert_eq!(state.terminal_error(), Some("quota exceeded"));
    }

    #[test]
    fn regression_assistant_text_after_turn_completed_is_kept() {
        let (mut state, _completion) = started_session();
        state.apply_notification(
            "turn/completed",
            &json!({"turn": {"id": "u-1", "status": "completed"}}),
        );
        state.apply_notification(
            "item/agentMessage/delta",
            &json!({"threadId": "t-1", "turnId": "u-1", "delta": "Trailing"}),
        );
        state.apply_notification(
            "item/completed",
            &json!({"turnId": "u-1", "item": {"type": "agentMessage", "text": " text"}}),
        );
        state.apply_notification(
            "item/agentMessage/delta",
            &json!({"threadId": "t-other", "delta": "foreign"}),
        );
        state.apply_notification("error", &json!({"error": {"message": "late failure"}}));

        assert_eq!(state.merged_output(), "Trailingtext");
        assert_eq!(state.phase(), SessionPhase::Finished { failed: false });
        assert_eq!(state.terminal_error(), None);
    }

    #[test]
    fn regression_stdout_close_signals_without_finishing() {
        let (mut state, mut completion) = started_session();
        state.mark_stdout_closed();
        assert!(completion.try_recv().is_ok());
        assert!(state.stdout_closed());
        assert!(!state.is_finished());
    }
}
