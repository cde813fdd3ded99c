//! Subprocess transport implementation using Claude Code CLI

use async_trait::async_trait;
use futures::StreamExt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use super::stderr::{self, StderrSink};
use super::{CommandSpec, MESSAGE_CHANNEL_CAPACITY, Transport};
use crate::error::{ClaudeError, Result};
use crate::message::parse_message;
use crate::types::{
    ClaudeAgentOptions, DEFAULT_CLOSE_TIMEOUT, DEFAULT_MAX_BUFFER_SIZE, Message, StderrCallback,
};

/// Runtime settings of a [`SubprocessTransport`]
#[derive(Clone)]
pub struct TransportSettings {
    /// Upper bound on one line of output; longer lines are skipped
    pub max_buffer_size: usize,
    /// Grace period before the process is killed on close
    pub close_timeout: Duration,
    /// Receives every stderr line
    pub stderr: Option<StderrCallback>,
    /// File stderr lines are appended to
    pub stderr_log_file: Option<PathBuf>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            stderr: None,
            stderr_log_file: None,
        }
    }
}

impl TransportSettings {
    /// Settings taken from session options
    #[must_use]
    pub fn from_options(options: &ClaudeAgentOptions) -> Self {
        Self {
            max_buffer_size: options.max_buffer_size(),
            close_timeout: options.close_timeout(),
            stderr: options.stderr.clone(),
            stderr_log_file: options.stderr_log_path(),
        }
    }
}

impl std::fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSettings")
            .field("max_buffer_size", &self.max_buffer_size)
            .field("close_timeout", &self.close_timeout)
            .field("stderr", &self.stderr.as_ref().map(|_| "<callback>"))
            .field("stderr_log_file", &self.stderr_log_file)
            .finish()
    }
}

#[derive(Default)]
struct Status {
    ready: bool,
    closed: bool,
    error: Option<ClaudeError>,
}

// State shared with the background readers
struct Shared {
    status: StdMutex<Status>,
    span: Span,
}

impl Shared {
    fn status(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, err: ClaudeError) {
        let mut status = self.status();
        if status.error.is_none() {
            tracing::debug!(parent: &self.span, error = %err, "transport error recorded");
            status.error = Some(err);
        } else {
            tracing::trace!(parent: &self.span, error = %err, "transport error ignored, first error kept");
        }
    }
}

#[derive(Default)]
struct Process {
    child: Option<Child>,
    messages: Option<mpsc::Receiver<Message>>,
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

/// Subprocess transport for Claude Code CLI
///
/// Runs the command described by a [`CommandSpec`] with all three standard
/// streams piped. Stdout is decoded line by line into [`Message`]s; stderr is
/// forwarded to the configured callback and log file and scanned for fatal
/// conditions, which become the sticky error.
pub struct SubprocessTransport {
    spec: CommandSpec,
    settings: TransportSettings,
    shared: Arc<Shared>,
    stdin: Mutex<Option<ChildStdin>>,
    process: Mutex<Process>,
    cancel: CancellationToken,
}

impl SubprocessTransport {
    /// Create a transport for `spec`; nothing is started until `connect`
    #[must_use]
    pub fn new(spec: CommandSpec, settings: TransportSettings, span: Span) -> Self {
        Self {
            spec,
            settings,
            shared: Arc::new(Shared {
                status: StdMutex::new(Status::default()),
                span,
            }),
            stdin: Mutex::new(None),
            process: Mutex::new(Process::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// The command this transport runs
    #[must_use]
    pub fn command(&self) -> &CommandSpec {
        &self.spec
    }

    fn not_ready() -> ClaudeError {
        ClaudeError::connection("transport is not ready for writing")
    }
}

async fn read_stdout(
    stdout: ChildStdout,
    max_line: usize,
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let span = shared.span.clone();
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(max_line));
    // FramedRead yields one `None` after a decode error before resuming
    let mut resuming = false;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(parent: &span, "stdout reader cancelled");
                break;
            }
            next = lines.next() => next,
        };

        let line = match next {
            None if resuming => {
                resuming = false;
                continue;
            }
            None => {
                tracing::debug!(parent: &span, "stdout reached end of stream");
                break;
            }
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                resuming = true;
                shared.record_error(ClaudeError::json_decode(
                    format!("message line exceeded maximum buffer size of {max_line} bytes"),
                    "",
                    None,
                ));
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) if e.kind() == io::ErrorKind::InvalidData => {
                // The codec has already consumed the offending line
                resuming = true;
                tracing::warn!(parent: &span, error = %e, "skipping line that is not valid UTF-8");
                shared.record_error(ClaudeError::json_decode(
                    "message line is not valid UTF-8",
                    "",
                    Some(Arc::new(e)),
                ));
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                shared.record_error(ClaudeError::json_decode(
                    "failed to read JSON line from subprocess",
                    "",
                    Some(Arc::new(e)),
                ));
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message = match parse_message(line) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(parent: &span, error = %err, "skipping undecodable line");
                shared.record_error(err);
                continue;
            }
        };
        tracing::trace!(parent: &span, message_type = message.message_type(), "received message");

        tokio::select! {
            () = cancel.cancelled() => break,
            sent = tx.send(message) => {
                if sent.is_err() {
                    tracing::debug!(parent: &span, "message receiver dropped");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn connect(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.child.is_some() {
            return Ok(());
        }
        if self.shared.status().closed {
            return Err(ClaudeError::connection("transport is closed"));
        }

        let span = self.shared.span.clone();
        tracing::debug!(
            parent: &span,
            program = %self.spec.program.display(),
            args = ?self.spec.args,
            "starting subprocess"
        );

        let mut child = self
            .spec
            .to_command()
            .spawn()
            .map_err(|e| ClaudeError::connection_with("failed to start subprocess", e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClaudeError::connection("failed to create stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClaudeError::connection("failed to create stdout pipe"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClaudeError::connection("failed to create stderr pipe"))?;

        let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let max_line = self.settings.max_buffer_size;

        process.stdout_task = Some(tokio::spawn(read_stdout(
            stdout,
            max_line,
            tx,
            Arc::clone(&self.shared),
            self.cancel.child_token(),
        )));

        let sink = StderrSink {
            callback: self.settings.stderr.clone(),
            log_file: self.settings.stderr_log_file.clone(),
        };
        let shared = Arc::clone(&self.shared);
        process.stderr_task = Some(tokio::spawn(stderr::drain(
            stderr,
            max_line,
            sink,
            move |err| shared.record_error(err),
            self.cancel.child_token(),
            span.clone(),
        )));

        tracing::debug!(parent: &span, pid = ?child.id(), "subprocess started");
        process.child = Some(child);
        process.messages = Some(rx);
        *self.stdin.lock().await = Some(stdin);
        self.shared.status().ready = true;
        Ok(())
    }

    async fn write(&self, line: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(Self::not_ready());
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(Self::not_ready)?;

        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            let err = ClaudeError::connection_with("failed to write to subprocess stdin", e);
            self.shared.status().ready = false;
            self.shared.record_error(err.clone());
            return Err(err);
        }

        tracing::trace!(parent: &self.shared.span, bytes = line.len() + 1, "wrote line");
        Ok(())
    }

    async fn read_messages(&self) -> Result<mpsc::Receiver<Message>> {
        let mut process = self.process.lock().await;
        if process.child.is_none() {
            return Err(ClaudeError::connection("not connected"));
        }
        process
            .messages
            .take()
            .ok_or_else(|| ClaudeError::connection("message channel already taken"))
    }

    async fn close(&self) -> Result<()> {
        {
            let mut status = self.shared.status();
            status.ready = false;
            status.closed = true;
        }
        self.cancel.cancel();

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }

        let mut process = self.process.lock().await;
        process.messages = None;
        for task in [process.stdout_task.take(), process.stderr_task.take()]
            .into_iter()
            .flatten()
        {
            let _ = task.await;
        }

        let Some(mut child) = process.child.take() else {
            return Ok(());
        };

        let span = &self.shared.span;
        match tokio::time::timeout(self.settings.close_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!(parent: span, "subprocess exited");
                Ok(())
            }
            Ok(Ok(status)) => {
                tracing::debug!(parent: span, code = ?status.code(), "subprocess exited with error");
                Err(ClaudeError::process(
                    "subprocess exited with error",
                    status.code(),
                ))
            }
            Ok(Err(e)) => Err(ClaudeError::process_with(
                "failed to wait for subprocess",
                None,
                e,
            )),
            Err(_) => {
                tracing::warn!(
                    parent: span,
                    timeout = ?self.settings.close_timeout,
                    "subprocess did not exit in time, killing"
                );
                let _ = child.kill().await;
                Err(ClaudeError::process(
                    "subprocess did not exit gracefully, killed",
                    None,
                ))
            }
        }
    }

    fn on_error(&self, err: ClaudeError) {
        self.shared.record_error(err);
    }

    fn is_ready(&self) -> bool {
        self.shared.status().ready
    }

    fn error(&self) -> Option<ClaudeError> {
        self.shared.status().error.clone()
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
        let process = self.process.get_mut();
        for task in [process.stdout_task.take(), process.stderr_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        if let Some(child) = process.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::SystemKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shell(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    fn transport(script: &str) -> SubprocessTransport {
        SubprocessTransport::new(shell(script), TransportSettings::default(), Span::none())
    }

    async fn wait_for_error(transport: &SubprocessTransport) -> Option<ClaudeError> {
        for _ in 0..100 {
            if let Some(err) = transport.error() {
                return Some(err);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_reads_messages_until_end_of_stream() {
        let transport = transport(
            r#"printf '%s\n' '{"type":"assistant","message":{"model":"m","content":[{"type":"text","text":"hi"}]}}' '' '{"type":"result","subtype":"success","session_id":"s1"}'"#,
        );
        transport.connect().await.unwrap();
        let mut rx = transport.read_messages().await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message_type(), "assistant");
        let second = rx.recv().await.unwrap();
        assert!(second.is_result());
        assert!(rx.recv().await.is_none());

        transport.close().await.unwrap();
        assert!(transport.error().is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped_and_recorded() {
        let transport = transport(
            r#"printf '%s\n' 'not json' '{"type":"result","subtype":"success"}'"#,
        );
        transport.connect().await.unwrap();
        let mut rx = transport.read_messages().await.unwrap();

        assert!(rx.recv().await.unwrap().is_result());
        assert!(rx.recv().await.is_none());
        let err = transport.error().unwrap();
        assert!(err.is_json_decode());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let settings = TransportSettings {
            max_buffer_size: 64,
            ..TransportSettings::default()
        };
        let long = "x".repeat(200);
        let script = format!(
            r#"printf '%s\n' '{{"type":"system","subtype":"info","pad":"{long}"}}' '{{"type":"result"}}'"#
        );
        let transport = SubprocessTransport::new(shell(&script), settings, Span::none());
        transport.connect().await.unwrap();
        let mut rx = transport.read_messages().await.unwrap();

        assert!(rx.recv().await.unwrap().is_result());
        assert!(transport.error().unwrap().is_json_decode());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let script = r#"printf '\377\376 junk\n'; printf '%s\n' '{"type":"result"}'"#;
        let transport = transport(script);
        transport.connect().await.unwrap();
        let mut rx = transport.read_messages().await.unwrap();

        assert!(rx.recv().await.unwrap().is_result());
        assert!(transport.error().unwrap().is_json_decode());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stderr_survives_invalid_utf8_line() {
        let script = r#"printf '\377\376 noise\n' >&2; echo 'No conversation found with session ID: abc' >&2; cat >/dev/null"#;
        let transport = transport(script);
        transport.connect().await.unwrap();

        let err = wait_for_error(&transport).await.unwrap();
        assert!(err.is_session_not_found());
        assert_eq!(err.session_id(), Some("abc"));
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_appends_newline() {
        let transport = transport("cat");
        transport.connect().await.unwrap();
        let mut rx = transport.read_messages().await.unwrap();

        transport
            .write(r#"{"type":"system","subtype":"info","echo":true}"#)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            Message::System(system) => {
                assert_eq!(system.kind, SystemKind::System);
                assert_eq!(system.data["echo"], serde_json::json!(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        transport.close().await.unwrap();
        assert!(!transport.is_ready());
    }

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let transport = transport("cat");
        let err = transport.write("{}").await.unwrap_err();
        assert!(err.is_connection());
        assert!(transport.read_messages().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_and_channel_taken_once() {
        let transport = transport("cat");
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_ready());

        let _rx = transport.read_messages().await.unwrap();
        assert!(transport.read_messages().await.is_err());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let transport = SubprocessTransport::new(
            CommandSpec::new("/nonexistent/claude-binary"),
            TransportSettings::default(),
            Span::none(),
        );
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!transport.is_ready());
    }

    #[tokio::test]
    async fn test_stderr_session_not_found_becomes_sticky_error() {
        let lines = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&lines);
        let settings = TransportSettings {
            stderr: Some(Arc::new(move |_line: String| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..TransportSettings::default()
        };
        let script = "echo 'warming up' >&2; \
                      echo 'No conversation found with session ID: 8587b432-e504-42c8-b9a7-e3fd0b4b2c60' >&2; \
                      echo 'later noise: No conversation found with session ID: other' >&2; \
                      cat >/dev/null";
        let transport = SubprocessTransport::new(shell(script), settings, Span::none());
        transport.connect().await.unwrap();

        let err = wait_for_error(&transport).await.unwrap();
        assert!(err.is_session_not_found());
        assert_eq!(err.session_id(), Some("8587b432-e504-42c8-b9a7-e3fd0b4b2c60"));

        transport.close().await.unwrap();
        assert!(lines.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            transport.error().unwrap().session_id(),
            Some("8587b432-e504-42c8-b9a7-e3fd0b4b2c60")
        );
    }

    #[tokio::test]
    async fn test_stderr_log_file_receives_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("cli_stderr.log");
        let settings = TransportSettings {
            stderr_log_file: Some(log.clone()),
            ..TransportSettings::default()
        };
        let transport =
            SubprocessTransport::new(shell("echo 'diagnostic line' >&2"), settings, Span::none());
        transport.connect().await.unwrap();
        let mut rx = transport.read_messages().await.unwrap();
        assert!(rx.recv().await.is_none());
        for _ in 0..50 {
            if std::fs::read_to_string(&log).is_ok_and(|s| s.contains("diagnostic line")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        transport.close().await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "diagnostic line\n");
    }

    #[tokio::test]
    async fn test_close_reports_non_zero_exit() {
        let transport = transport("exit 3");
        transport.connect().await.unwrap();
        let err = transport.close().await.unwrap_err();
        assert!(err.is_process());
        assert_eq!(err.exit_code(), Some(3));

        transport.close().await.unwrap();
        assert!(transport.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_close_kills_after_grace_period() {
        let settings = TransportSettings {
            close_timeout: Duration::from_millis(200),
            ..TransportSettings::default()
        };
        let transport = SubprocessTransport::new(shell("sleep 5"), settings, Span::none());
        transport.connect().await.unwrap();

        let started = std::time::Instant::now();
        let err = transport.close().await.unwrap_err();
        assert!(err.is_process());
        assert!(err.to_string().contains("killed"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_runs_in_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell(r#"printf '{"type":"system","subtype":"info","cwd":"%s"}\n' "$(pwd)""#)
            .cwd(dir.path());
        let transport = SubprocessTransport::new(spec, TransportSettings::default(), Span::none());
        transport.connect().await.unwrap();
        let mut rx = transport.read_messages().await.unwrap();

        let Some(Message::System(system)) = rx.recv().await else {
            panic!("expected system message");
        };
        let reported = PathBuf::from(system.data["cwd"].as_str().unwrap());
        assert_eq!(
            std::fs::canonicalize(reported).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
        transport.close().await.unwrap();
    }
}
