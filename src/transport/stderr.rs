//! Handling of the CLI's diagnostic stream

use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStderr;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::ClaudeError;
use crate::types::StderrCallback;
use crate::utils::first_token;

const SESSION_NOT_FOUND_PATTERN: &str = "No conversation found with session ID:";

const SESSION_NOT_FOUND_MESSAGE: &str =
    "Claude CLI could not find this conversation. It may have been deleted or the CLI was reinstalled.";

/// Recognize fatal conditions reported on stderr
pub(crate) fn extract_session_not_found(line: &str) -> Option<ClaudeError> {
    let (_, rest) = line.split_once(SESSION_NOT_FOUND_PATTERN)?;
    let session_id = first_token(rest)?;
    Some(ClaudeError::session_not_found(
        session_id,
        SESSION_NOT_FOUND_MESSAGE,
    ))
}

/// Where diagnostic lines go besides the error extractor
pub(crate) struct StderrSink {
    pub(crate) callback: Option<StderrCallback>,
    pub(crate) log_file: Option<PathBuf>,
}

async fn open_log(path: &Path, span: &Span) -> Option<File> {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(parent: span, path = %path.display(), error = %e, "cannot create stderr log directory");
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!(parent: span, path = %path.display(), error = %e, "cannot open stderr log file");
            None
        }
    }
}

/// Drain stderr line by line until end of stream or cancellation
pub(crate) async fn drain<F>(
    stderr: ChildStderr,
    max_line: usize,
    sink: StderrSink,
    on_error: F,
    cancel: CancellationToken,
    span: Span,
) where
    F: Fn(ClaudeError) + Send,
{
    let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(max_line));
    let mut log = match sink.log_file {
        Some(ref path) => open_log(path, &span).await,
        None => None,
    };

    // FramedRead yields one `None` after a decode error before resuming
    let mut resuming = false;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = lines.next() => next,
        };
        let line = match next {
            None if resuming => {
                resuming = false;
                continue;
            }
            None => break,
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                resuming = true;
                tracing::debug!(parent: &span, max_line, "skipped overlong stderr line");
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) if e.kind() == io::ErrorKind::InvalidData => {
                resuming = true;
                tracing::debug!(parent: &span, error = %e, "skipped stderr line that is not valid UTF-8");
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::debug!(parent: &span, error = %e, "stderr read failed");
                break;
            }
        };

        tracing::trace!(parent: &span, line = %line, "cli stderr");

        if let Some(file) = log.as_mut() {
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await
            }
            .await;
            if let Err(e) = written {
                tracing::warn!(parent: &span, error = %e, "stderr log write failed, disabling log");
                log = None;
            }
        }

        if let Some(err) = extract_session_not_found(&line) {
            tracing::warn!(parent: &span, error = %err, "fatal condition reported on stderr");
            on_error(err);
        }

        if let Some(ref callback) = sink.callback {
            (**callback)(line);
        }
    }
}
