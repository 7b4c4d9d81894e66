use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::RpcError;

pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_STDERR_TAIL_CAPACITY: usize = 20;
const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(50);
const STDOUT_READ_CHUNK_BYTES: usize = 8 * 1024;
const LOG_LINE_PREVIEW_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `TransportConfig` describing how the subprocess is launched.
pub struct TransportConfig {
    pub shell: String,
    /// Runs the shell with `-lc` so login profiles put the tool on `PATH`.
    pub login_shell: bool,
    pub stderr_tail_capacity: usize,
    pub stop_grace: Duration,
    /// Tag attached to log records for this process.
    pub label: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            login_shell: false,
            stderr_tail_capacity: DEFAULT_STDERR_TAIL_CAPACITY,
            stop_grace: DEFAULT_STOP_GRACE,
            label: "app-server".to_string(),
        }
    }
}

/// Splits a byte stream into newline-terminated lines.
///
/// Lines are trimmed and blank lines are dropped. Bytes after the last newline
/// stay buffered until more data arrives or [`LineBuffer::finish`] is called.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut scanned = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(offset) = self.pending[scanned..].iter().position(|byte| *byte == b'\n') {
            let end = scanned + offset;
            let raw = self.pending.drain(..=end).collect::<Vec<_>>();
            if let Some(line) = decode_line(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
            scanned = 0;
        }
        lines
    }

    /// Drains the unterminated remainder at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.pending);
        decode_line(&remainder)
    }

    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Bounded window over the most recent non-empty stderr lines.
#[derive(Debug, Clone)]
pub struct StderrTail {
    capacity: usize,
    lines: VecDeque<String>,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.lines.push_back(line.to_string());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn summary(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join(" | ")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Cloneable handle that writes whole lines to the child's stdin.
///
/// Writers share one async mutex, so concurrent callers never interleave
/// bytes within a line.
#[derive(Debug, Clone)]
pub struct LineWriter {
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
}

impl LineWriter {
    fn new(stdin: ChildStdin) -> Self {
        Self {
            stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))),
        }
    }

    pub async fn write_line(&self, payload: &[u8]) -> Result<(), RpcError> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            RpcError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdio process stdin is closed",
            ))
        })?;
        stdin.write_all(&frame).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Closes stdin; later writes fail with a broken-pipe error.
    pub async fn close(&self) {
        let mut guard = self.stdin.lock().await;
        if let Some(mut stdin) = guard.take() {
            let _ = stdin.shutdown().await;
        }
    }
}

/// A running subprocess with line-framed stdout and a captured stderr tail.
pub struct ProcessTransport {
    child: Child,
    writer: LineWriter,
    stderr_tail: Arc<Mutex<StderrTail>>,
    stdout_lines_seen: Arc<AtomicU64>,
    stderr_closed: watch::Receiver<bool>,
    reader_tasks: Vec<JoinHandle<()>>,
    stop_grace: Duration,
}

impl ProcessTransport {
    /// Launches `command_line` through the configured shell.
    ///
    /// Returns the transport together with the receiver that yields complete
    /// stdout lines in arrival order. The receiver closes when stdout reaches
    /// end of stream. Must be called from within a Tokio runtime.
    pub fn start(
        command_line: &str,
        config: &TransportConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>), RpcError> {
        let command_line = command_line.trim();
        if command_line.is_empty() {
            return Err(RpcError::EmptyCommand);
        }

        let mut command = Command::new(&config.shell);
        command
            .arg(if config.login_shell { "-lc" } else { "-c" })
            .arg(command_line)
            .env("NO_COLOR", "1")
            .env("TERM", "dumb")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|error| {
            RpcError::Launch(format!(
                "failed to spawn shell '{}' for '{}': {error}",
                config.shell, command_line
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Launch("stdio process stdin pipe unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Launch("stdio process stdout pipe unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RpcError::Launch("stdio process stderr pipe unavailable".to_string()))?;

        tracing::debug!(
            label = %config.label,
            shell = %config.shell,
            login_shell = config.login_shell,
            pid = child.id(),
            "started stdio process"
        );

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let stderr_tail = Arc::new(Mutex::new(StderrTail::new(config.stderr_tail_capacity)));
        let stdout_lines_seen = Arc::new(AtomicU64::new(0));
        let (stderr_closed_tx, stderr_closed) = watch::channel(false);
        let reader_tasks = vec![
            spawn_stdout_reader(stdout, line_tx, Arc::clone(&stdout_lines_seen)),
            spawn_stderr_reader(
                stderr,
                Arc::clone(&stderr_tail),
                stderr_closed_tx,
                config.label.clone(),
            ),
        ];

        Ok((
            Self {
                child,
                writer: LineWriter::new(stdin),
                stderr_tail,
                stdout_lines_seen,
                stderr_closed,
                reader_tasks,
                stop_grace: config.stop_grace,
            },
            line_rx,
        ))
    }

    pub fn writer(&self) -> LineWriter {
        self.writer.clone()
    }

    pub async fn write_line(&self, payload: &[u8]) -> Result<(), RpcError> {
        self.writer.write_line(payload).await
    }

    pub fn stderr_summary(&self) -> String {
        lock_or_recover(&self.stderr_tail).summary()
    }

    pub fn stdout_lines_seen(&self) -> u64 {
        self.stdout_lines_seen.load(Ordering::Relaxed)
    }

    /// Waits up to `grace` for stderr to reach end of stream so the tail
    /// holds the last words of a process that already exited.
    pub async fn drain_stderr(&self, grace: Duration) {
        let mut closed = self.stderr_closed.clone();
        let _ = tokio::time::timeout(grace, closed.wait_for(|closed| *closed)).await;
    }

    /// Closes stdin, signals the child if it is still running and waits a
    /// short grace period for it to exit.
    pub async fn stop(mut self) {
        self.writer.close().await;
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(status = %status, "stdio process already exited");
            }
            _ => {
                if let Err(error) = self.child.start_kill() {
                    tracing::debug!(error = %error, "failed to signal stdio process");
                }
                let _ = tokio::time::timeout(self.stop_grace, self.child.wait()).await;
            }
        }
        for task in self.reader_tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        for task in &self.reader_tasks {
            task.abort();
        }
    }
}

fn spawn_stdout_reader<R>(
    mut reader: R,
    line_tx: mpsc::UnboundedSender<String>,
    lines_seen: Arc<AtomicU64>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = LineBuffer::default();
        let mut chunk = vec![0_u8; STDOUT_READ_CHUNK_BYTES];
        loop {
            let read = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) => {
                    tracing::debug!(error = %error, "stdio stdout read failed");
                    break;
                }
            };
            for line in buffer.push(&chunk[..read]) {
                lines_seen.fetch_add(1, Ordering::Relaxed);
                if line_tx.send(line).is_err() {
                    return;
                }
            }
        }
        if let Some(line) = buffer.finish() {
            lines_seen.fetch_add(1, Ordering::Relaxed);
            let _ = line_tx.send(line);
        }
    })
}

fn spawn_stderr_reader<R>(
    reader: R,
    tail: Arc<Mutex<StderrTail>>,
    closed: watch::Sender<bool>,
    label: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    tracing::trace!(
                        label = %label,
                        line = %truncate_for_log(line.trim(), LOG_LINE_PREVIEW_CHARS),
                        "stdio stderr"
                    );
                    lock_or_recover(&tail).push(&line);
                }
                Err(error) => {
                    tracing::debug!(error = %error, "stdio stderr read failed");
                    break;
                }
            }
        }
        let _ = closed.send(true);
    })
}

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated = text.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}
