//! One-shot queries
//!
//! [`query`] starts a CLI process, sends a single prompt and streams the
//! answer. The process is stopped once the [`Message::Result`] has been
//! yielded, or in the background if the stream is dropped early.

use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tracing::Span;

use crate::client::{prepare_options, subprocess_transport, user_envelope};
use crate::control::ControlRouter;
use crate::error::{ClaudeError, Result};
use crate::transport::Transport;
use crate::types::{ClaudeAgentOptions, Message};

/// Session id used when not resuming an existing conversation
const ONE_SHOT_SESSION_ID: &str = "default-session";

/// Stops the router and the transport exactly once
struct Teardown {
    router: Arc<ControlRouter>,
    transport: Arc<dyn Transport>,
    done: bool,
}

impl Teardown {
    async fn finish(&mut self) -> Result<()> {
        self.done = true;
        self.router.stop().await;
        self.transport.close().await
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let router = Arc::clone(&self.router);
        let transport = Arc::clone(&self.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    router.stop().await;
                    if let Err(e) = transport.close().await {
                        tracing::debug!(error = %e, "one-shot transport closed with error");
                    }
                });
            }
            Err(_) => tracing::warn!("no runtime available to stop the CLI process"),
        }
    }
}

/// Query Claude Code once
///
/// # Examples
///
/// ```no_run
/// use claude_agent_control::{Message, query};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = query("What is 2 + 2?", None).await?;
/// let mut stream = Box::pin(stream);
///
/// while let Some(message) = stream.next().await {
///     if let Message::Result(result) = message {
///         println!("{:?}", result.result);
///     }
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - `InvalidArgument` for an empty prompt
/// - `InvalidConfig` for conflicting options
/// - `CliNotFound` if no CLI binary can be located
/// - connection error if the CLI cannot be started or written to
pub async fn query(
    prompt: impl Into<String>,
    options: Option<ClaudeAgentOptions>,
) -> Result<impl Stream<Item = Message> + Send + 'static> {
    let prompt = prompt.into();
    if prompt.is_empty() {
        return Err(ClaudeError::invalid_argument("prompt cannot be empty"));
    }
    let options = prepare_options(options.unwrap_or_default())?;
    let span = tracing::debug_span!("claude_query");
    let transport = subprocess_transport(&options, span.clone())?;
    run(prompt, options, transport, span).await
}

/// Query once over a caller-supplied transport
///
/// Permission, hook and MCP requests issued by the CLI during the turn are
/// still answered from `options`.
///
/// # Errors
/// Same as [`query`], minus CLI discovery
pub async fn query_with_transport(
    prompt: impl Into<String>,
    options: ClaudeAgentOptions,
    transport: Arc<dyn Transport>,
) -> Result<impl Stream<Item = Message> + Send + 'static> {
    let prompt = prompt.into();
    if prompt.is_empty() {
        return Err(ClaudeError::invalid_argument("prompt cannot be empty"));
    }
    let options = prepare_options(options)?;
    run(prompt, options, transport, tracing::debug_span!("claude_query")).await
}

async fn run(
    prompt: String,
    options: ClaudeAgentOptions,
    transport: Arc<dyn Transport>,
    span: Span,
) -> Result<impl Stream<Item = Message> + Send + 'static> {
    transport
        .connect()
        .await
        .map_err(|e| ClaudeError::connection_with("failed to connect to Claude CLI", e))?;

    let router = Arc::new(ControlRouter::new(
        Arc::clone(&transport),
        &options,
        false,
        span.clone(),
    ));
    let mut teardown = Teardown {
        router: Arc::clone(&router),
        transport: Arc::clone(&transport),
        done: false,
    };

    let session_id: &str = match options.resume {
        Some(ref id) => id.as_ref(),
        None => ONE_SHOT_SESSION_ID,
    };
    let started = async {
        router.start().await?;
        let messages = router
            .take_messages()
            .ok_or_else(|| ClaudeError::control_protocol("message channel unavailable"))?;
        let line = user_envelope(&Value::String(prompt), session_id)?;
        transport.write(&line).await?;
        Ok::<_, ClaudeError>(messages)
    }
    .await;

    let mut messages = match started {
        Ok(messages) => messages,
        Err(err) => {
            let _ = teardown.finish().await;
            return Err(err);
        }
    };
    tracing::debug!(parent: &span, "one-shot prompt sent");

    Ok(async_stream::stream! {
        while let Some(message) = messages.recv().await {
            let done = message.is_result();
            yield message;
            if done {
                break;
            }
        }
        drop(messages);
        if let Err(e) = teardown.finish().await {
            tracing::debug!(parent: &span, error = %e, "one-shot transport closed with error");
        }
    })
}
