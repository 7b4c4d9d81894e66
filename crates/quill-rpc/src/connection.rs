use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RpcError;
use crate::message::{notification_frame, request_frame, MessageKind, RpcMessage};
use crate::responder::{encode_server_reply, server_request_result};
use crate::transport::{
    lock_or_recover, truncate_for_log, LineWriter, ProcessTransport, TransportConfig,
};

const LOG_LINE_PREVIEW_CHARS: usize = 240;
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Receives server notifications in arrival order on the dispatch task.
pub trait NotificationHandler: Send + 'static {
    fn handle_notification(&mut self, method: &str, params: &Value);

    /// Called once when stdout closes, before pending requests are released.
    fn connection_closed(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreNotifications;

impl NotificationHandler for IgnoreNotifications {
    fn handle_notification(&mut self, method: &str, _params: &Value) {
        tracing::trace!(method, "ignoring notification");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Public struct `ClientInfo` sent with the `initialize` handshake.
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "quill".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Table of in-flight requests keyed by normalized request id.
///
/// Each waiter is removed before it is completed, so a request resolves at
/// most once no matter how many responses carry its id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: HashMap<String, oneshot::Sender<RpcMessage>>,
    settled: HashSet<String>,
    closed: bool,
}

impl PendingRequests {
    /// Once the table is closed the returned receiver is already disconnected.
    pub fn register(&mut self, id: &str) -> oneshot::Receiver<RpcMessage> {
        let (sender, receiver) = oneshot::channel();
        if !self.closed {
            self.waiters.insert(id.to_string(), sender);
        }
        receiver
    }

    pub fn cancel(&mut self, id: &str) -> bool {
        let removed = self.waiters.remove(id).is_some();
        if removed {
            self.settled.insert(id.to_string());
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.waiters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Hands `message` to the request it answers.
    ///
    /// A message whose id names a pending request completes it. A response
    /// whose id matches nothing completes the sole pending request when
    /// exactly one is in flight, unless its id belongs to a request that was
    /// already settled. Returns the message when no request claims it.
    pub fn settle(&mut self, message: RpcMessage) -> Option<RpcMessage> {
        let id_key = message.id_key();
        let is_server_request = message.method.is_some() && !message.is_response();
        if let Some(id) = id_key.as_deref() {
            if !is_server_request && self.waiters.contains_key(id) {
                let id = id.to_string();
                self.complete(&id, message);
                return None;
            }
        }
        if !message.is_response() {
            return Some(message);
        }

        let replays_settled = id_key
            .as_deref()
            .is_some_and(|id| self.settled.contains(id));
        if self.waiters.len() == 1 && !replays_settled {
            if let Some(sole_id) = self.waiters.keys().next().cloned() {
                tracing::debug!(
                    response_id = id_key.as_deref().unwrap_or("<none>"),
                    request_id = %sole_id,
                    "matched response to the only pending request"
                );
                self.complete(&sole_id, message);
                return None;
            }
        }
        if self.waiters.len() > 1 {
            tracing::warn!(
                response_id = id_key.as_deref().unwrap_or("<none>"),
                pending = self.waiters.len(),
                "response id matched no pending request; dropping it"
            );
        }
        Some(message)
    }

    /// Releases every waiter; their receivers observe a closed channel.
    pub fn clear(&mut self) {
        self.waiters.clear();
    }

    /// Clears the table and rejects later registrations.
    pub fn close(&mut self) {
        self.closed = true;
        self.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn complete(&mut self, id: &str, message: RpcMessage) {
        if let Some(waiter) = self.waiters.remove(id) {
            self.settled.insert(id.to_string());
            if waiter.send(message).is_err() {
                tracing::debug!(request_id = id, "caller stopped waiting for response");
            }
        }
    }
}

/// JSON-RPC client bound to one subprocess.
///
/// A single dispatch task reads stdout, completes pending requests, answers
/// server requests and forwards notifications to the [`NotificationHandler`].
pub struct RpcConnection {
    transport: ProcessTransport,
    writer: LineWriter,
    pending: Arc<Mutex<PendingRequests>>,
    next_request_id: AtomicU64,
    dispatch_task: JoinHandle<()>,
    label: String,
}

impl RpcConnection {
    pub fn open<H>(
        command_line: &str,
        config: &TransportConfig,
        handler: H,
    ) -> Result<Self, RpcError>
    where
        H: NotificationHandler,
    {
        let (transport, lines) = ProcessTransport::start(command_line, config)?;
        let writer = transport.writer();
        let pending = Arc::new(Mutex::new(PendingRequests::default()));
        let dispatch_task = tokio::spawn(dispatch_lines(
            lines,
            Arc::clone(&pending),
            writer.clone(),
            handler,
            config.label.clone(),
        ));
        Ok(Self {
            transport,
            writer,
            pending,
            next_request_id: AtomicU64::new(1),
            dispatch_task,
            label: config.label.clone(),
        })
    }

    /// Sends a request and waits up to `timeout` for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self
            .next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let receiver = lock_or_recover(&self.pending).register(&id);

        let sent = match serde_json::to_vec(&request_frame(&id, method, params)) {
            Ok(payload) => self.writer.write_line(&payload).await,
            Err(error) => Err(RpcError::from(error)),
        };
        if let Err(error) = sent {
            lock_or_recover(&self.pending).cancel(&id);
            return Err(self.write_failure(error).await);
        }
        tracing::debug!(label = %self.label, request_id = %id, method, "sent request");

        let response = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(self.closed_error().await),
            Err(_) => {
                lock_or_recover(&self.pending).cancel(&id);
                tracing::debug!(
                    label = %self.label,
                    request_id = %id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                return Err(self.timeout_error(&format!("response to {method}")));
            }
        };
        response_into_result(method, response)
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let payload = serde_json::to_vec(&notification_frame(method, params))?;
        if let Err(error) = self.writer.write_line(&payload).await {
            return Err(self.write_failure(error).await);
        }
        tracing::debug!(label = %self.label, method, "sent notification");
        Ok(())
    }

    /// Performs the `initialize` request followed by the `initialized` notification.
    pub async fn initialize(
        &self,
        client: &ClientInfo,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "clientInfo": client,
                    "capabilities": { "experimentalApi": false },
                }),
                timeout,
            )
            .await?;
        self.notify("initialized", json!({})).await?;
        Ok(result)
    }

    /// Builds the error reported when a wait elapses. A process that printed
    /// nothing on stdout but complained on stderr is reported as not
    /// responding, with the stderr tail attached.
    pub fn timeout_error(&self, waiting_for: &str) -> RpcError {
        let stderr = self.stderr_summary();
        if self.transport.stdout_lines_seen() == 0 && !stderr.is_empty() {
            RpcError::NoResponse { stderr }
        } else {
            RpcError::Timeout {
                waiting_for: waiting_for.to_string(),
                stderr,
            }
        }
    }

    pub fn stderr_summary(&self) -> String {
        self.transport.stderr_summary()
    }

    /// Error for a connection whose process is gone. Waits briefly for
    /// stderr to drain so the tail carries the exit diagnostics.
    pub async fn closed_error(&self) -> RpcError {
        self.transport.drain_stderr(STDERR_DRAIN_GRACE).await;
        RpcError::NoResponse {
            stderr: self.stderr_summary(),
        }
    }

    async fn write_failure(&self, error: RpcError) -> RpcError {
        match &error {
            RpcError::Io(io_error) if io_error.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(label = %self.label, "stdio process closed its stdin");
                self.closed_error().await
            }
            _ => error,
        }
    }

    pub fn pending_requests(&self) -> usize {
        lock_or_recover(&self.pending).len()
    }

    pub async fn shutdown(self) {
        let Self {
            transport,
            dispatch_task,
            ..
        } = self;
        transport.stop().await;
        dispatch_task.abort();
    }
}

fn response_into_result(method: &str, response: RpcMessage) -> Result<Value, RpcError> {
    if let Some(message) = response.error_message() {
        return Err(RpcError::Rpc(message.to_string()));
    }
    match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(RpcError::InvalidResponse(format!(
            "{method} failed without an error message: {error}"
        ))),
        (None, None) => Err(RpcError::InvalidResponse(format!(
            "{method} response carried neither result nor error"
        ))),
    }
}

async fn dispatch_lines<H>(
    mut lines: mpsc::UnboundedReceiver<String>,
    pending: Arc<Mutex<PendingRequests>>,
    writer: LineWriter,
    mut handler: H,
    label: String,
) where
    H: NotificationHandler,
{
    while let Some(line) = lines.recv().await {
        let Some(message) = RpcMessage::parse(&line) else {
            tracing::trace!(
                label = %label,
                line = %truncate_for_log(&line, LOG_LINE_PREVIEW_CHARS),
                "ignoring non-JSON stdout line"
            );
            continue;
        };
        let unclaimed = {
            let mut table = lock_or_recover(&pending);
            table.settle(message)
        };
        let Some(message) = unclaimed else {
            continue;
        };

        match message.kind() {
            MessageKind::Request => answer_server_request(&writer, &message, &label).await,
            MessageKind::Notification => match message.method.as_deref() {
                Some(method) => handler.handle_notification(method, message.params_or_null()),
                None => tracing::trace!(label = %label, "ignoring message without method"),
            },
            MessageKind::Response => {
                tracing::debug!(
                    label = %label,
                    response_id = message.id_key().as_deref().unwrap_or("<none>"),
                    "ignoring unmatched response"
                );
            }
        }
    }

    tracing::debug!(label = %label, "stdout closed");
    handler.connection_closed();
    lock_or_recover(&pending).close();
}

async fn answer_server_request(writer: &LineWriter, message: &RpcMessage, label: &str) {
    let (Some(id), Some(method)) = (message.id.as_ref(), message.method.as_deref()) else {
        return;
    };
    tracing::debug!(label, method, "answering server request");
    let reply = encode_server_reply(id, server_request_result(method));
    if reply.is_empty() {
        return;
    }
    if let Err(error) = writer.write_line(&reply).await {
        tracing::warn!(label, method, error = %error, "failed to answer server request");
    }
}
