//! `ClaudeSDKClient` for bidirectional communication
//!
//! The client owns one CLI process for the life of a session and moves
//! through three states:
//!
//! ```text
//! Created --connect()--> Connected --close()--> Closed
//!    |                                            ^
//!    +-----------------close()--------------------+
//! ```
//!
//! A closed client cannot reconnect; build a new one instead.
//!
//! # Example: Basic Usage
//!
//! ```no_run
//! use claude_agent_control::{ClaudeAgentOptions, ClaudeSDKClient, Message};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = ClaudeSDKClient::new(ClaudeAgentOptions::default())?;
//! client.connect().await?;
//!
//! client.query("Hello, Claude!").await?;
//! let mut messages = Box::pin(client.receive_response()?);
//! while let Some(message) = messages.next().await {
//!     if let Message::Assistant(assistant) = &message {
//!         for block in &assistant.content {
//!             if let Some(text) = block.as_text() {
//!                 println!("Claude: {text}");
//!             }
//!         }
//!     }
//! }
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Permissions
//!
//! ```no_run
//! use claude_agent_control::callbacks::FnPermissionCallback;
//! use claude_agent_control::types::PermissionResult;
//! use claude_agent_control::{ClaudeAgentOptions, ClaudeSDKClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = FnPermissionCallback::new(|tool_name, _input, _ctx| {
//!     Box::pin(async move {
//!         if tool_name == "Write" {
//!             Ok(PermissionResult::deny("disabled"))
//!         } else {
//!             Ok(PermissionResult::allow())
//!         }
//!     })
//! });
//!
//! let options = ClaudeAgentOptions::builder()
//!     .can_use_tool(Arc::new(policy) as _)
//!     .build();
//! let mut client = ClaudeSDKClient::new(options)?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::Stream;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::callbacks::McpServer;
use crate::control::{ControlRouter, Payload};
use crate::error::{ClaudeError, Result};
use crate::transport::subprocess::TransportSettings;
use crate::transport::{CommandSpec, SubprocessTransport, Transport, find_cli};
use crate::types::{ClaudeAgentOptions, Message, PermissionMode};

/// Session id placed in outbound user envelopes
const DEFAULT_SESSION_ID: &str = "default";

/// Permission prompt tool used when a `can_use_tool` callback answers requests
const STDIO_PERMISSION_TOOL: &str = "stdio";

#[derive(Serialize)]
struct UserEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: UserTurn<'a>,
    parent_tool_use_id: Option<&'a str>,
    session_id: &'a str,
}

#[derive(Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a Value,
}

/// Encode one user turn as a wire line
pub(crate) fn user_envelope(content: &Value, session_id: &str) -> Result<String> {
    serde_json::to_string(&UserEnvelope {
        kind: "user",
        message: UserTurn {
            role: "user",
            content,
        },
        parent_tool_use_id: None,
        session_id,
    })
    .map_err(|e| ClaudeError::control_protocol_with("failed to encode user message", e))
}

/// Validate callback related options and fill in the permission prompt tool
pub(crate) fn prepare_options(mut options: ClaudeAgentOptions) -> Result<ClaudeAgentOptions> {
    if options.can_use_tool.is_some() {
        if options.permission_prompt_tool_name.is_some() {
            return Err(ClaudeError::invalid_config(
                "can_use_tool callback cannot be used with permission_prompt_tool_name",
            ));
        }
        options.permission_prompt_tool_name = Some(STDIO_PERMISSION_TOOL.to_string());
    }
    Ok(options)
}

/// Build the subprocess transport for `options`, discovering the CLI if needed
pub(crate) fn subprocess_transport(
    options: &ClaudeAgentOptions,
    span: Span,
) -> Result<Arc<dyn Transport>> {
    let cli_path = match options.cli_path {
        Some(ref path) => path.clone(),
        None => find_cli()?,
    };
    let spec = CommandSpec::from_options(&cli_path, options)?;
    Ok(Arc::new(SubprocessTransport::new(
        spec,
        TransportSettings::from_options(options),
        span,
    )))
}

/// Lifecycle state of a [`ClaudeSDKClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Built but not yet connected
    Created,
    /// Handshake done, queries accepted
    Connected,
    /// Closed; terminal
    Closed,
}

/// Interactive, stateful client for Claude Code
pub struct ClaudeSDKClient {
    options: ClaudeAgentOptions,
    transport: Arc<dyn Transport>,
    router: Option<ControlRouter>,
    messages: Option<Arc<Mutex<mpsc::Receiver<Message>>>>,
    state: ClientState,
    cancel: CancellationToken,
    span: Span,
}

impl ClaudeSDKClient {
    /// Create a client that will run the Claude Code CLI
    ///
    /// # Errors
    /// Returns `InvalidConfig` for conflicting options, `CliNotFound` if no
    /// CLI binary can be located
    pub fn new(options: ClaudeAgentOptions) -> Result<Self> {
        let options = prepare_options(options)?;
        let span = tracing::debug_span!("claude_session");
        let transport = subprocess_transport(&options, span.clone())?;
        Ok(Self::assemble(options, transport, span))
    }

    /// Create a client over a caller-supplied transport
    ///
    /// # Errors
    /// Returns `InvalidConfig` for conflicting options
    pub fn with_transport(
        options: ClaudeAgentOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let options = prepare_options(options)?;
        let span = tracing::debug_span!("claude_session");
        Ok(Self::assemble(options, transport, span))
    }

    fn assemble(options: ClaudeAgentOptions, transport: Arc<dyn Transport>, span: Span) -> Self {
        Self {
            options,
            transport,
            router: None,
            messages: None,
            state: ClientState::Created,
            cancel: CancellationToken::new(),
            span,
        }
    }

    fn not_connected() -> ClaudeError {
        ClaudeError::connection("not connected - call connect() first")
    }

    fn connected_router(&self) -> Result<&ControlRouter> {
        match (self.state, self.router.as_ref()) {
            (ClientState::Connected, Some(router)) => Ok(router),
            _ => Err(Self::not_connected()),
        }
    }

    /// Start the CLI and run the control protocol handshake
    ///
    /// # Errors
    /// - control protocol error if already connected
    /// - connection error if closed or the CLI cannot be started
    /// - the transport's sticky error if the CLI failed right away
    /// - control protocol error if the handshake fails
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ClientState::Connected => {
                return Err(ClaudeError::control_protocol("client already connected"));
            }
            ClientState::Closed => {
                return Err(ClaudeError::connection(
                    "client is closed; create a new client to reconnect",
                ));
            }
            ClientState::Created => {}
        }

        tracing::debug!(parent: &self.span, "connecting");
        if let Err(e) = self.transport.connect().await {
            self.state = ClientState::Closed;
            return Err(ClaudeError::connection_with(
                "failed to connect to Claude CLI",
                e,
            ));
        }

        if let Some(err) = self.transport.error() {
            tracing::warn!(parent: &self.span, error = %err, "CLI failed during startup");
            self.state = ClientState::Closed;
            let _ = self.transport.close().await;
            return Err(err);
        }

        let router = ControlRouter::new(
            Arc::clone(&self.transport),
            &self.options,
            true,
            self.span.clone(),
        );
        let handshake = async {
            router.start().await?;
            router.initialize(&self.cancel).await
        }
        .await;

        if let Err(err) = handshake {
            router.stop().await;
            let _ = self.transport.close().await;
            self.state = ClientState::Closed;
            let cause = self.transport.error().unwrap_or(err);
            return Err(ClaudeError::control_protocol_with(
                "failed to initialize control protocol",
                cause,
            ));
        }

        self.messages = router
            .take_messages()
            .map(|rx| Arc::new(Mutex::new(rx)));
        self.router = Some(router);
        self.state = ClientState::Connected;
        tracing::debug!(parent: &self.span, "connected");
        Ok(())
    }

    /// Send a text prompt
    ///
    /// # Errors
    /// Fails if not connected, the prompt is empty or the write fails
    pub async fn query(&self, prompt: impl Into<String>) -> Result<()> {
        self.connected_router()?;
        let prompt = prompt.into();
        if prompt.is_empty() {
            return Err(ClaudeError::invalid_argument("prompt cannot be empty"));
        }
        self.send_user(&Value::String(prompt)).await
    }

    /// Send structured content, e.g. a list of text and image blocks
    ///
    /// # Errors
    /// Fails if not connected, the content is empty or the write fails
    pub async fn query_with_content(&self, content: Value) -> Result<()> {
        self.connected_router()?;
        let empty = match content {
            Value::Null => true,
            Value::String(ref s) => s.is_empty(),
            Value::Array(ref blocks) => blocks.is_empty(),
            _ => false,
        };
        if empty {
            return Err(ClaudeError::invalid_argument("content cannot be empty"));
        }
        self.send_user(&content).await
    }

    async fn send_user(&self, content: &Value) -> Result<()> {
        let line = user_envelope(content, DEFAULT_SESSION_ID)?;
        tracing::debug!(parent: &self.span, "sending user message");
        self.transport.write(&line).await
    }

    /// Stream messages up to and including the next [`Message::Result`]
    ///
    /// The returned stream holds the session's receive lock until it ends or
    /// is dropped, so concurrent calls take turns. If the CLI stops
    /// unexpectedly the stream simply ends; check
    /// [`transport_error`](Self::transport_error) for the cause.
    ///
    /// # Errors
    /// Fails if not connected
    pub fn receive_response(&self) -> Result<impl Stream<Item = Message> + Send + 'static> {
        self.connected_router()?;
        let messages = self.messages.clone().ok_or_else(Self::not_connected)?;
        let cancel = self.cancel.clone();

        Ok(async_stream::stream! {
            let mut rx = messages.lock_owned().await;
            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => None,
                    message = rx.recv() => message,
                };
                let Some(message) = next else { break };
                let done = message.is_result();
                yield message;
                if done {
                    break;
                }
            }
        })
    }

    /// Ask the CLI to stop the current turn
    ///
    /// # Errors
    /// Fails if not connected or the CLI rejects the request
    pub async fn interrupt(&self) -> Result<()> {
        let router = self.connected_router()?;
        let mut request = Payload::new();
        request.insert("subtype".to_string(), json!("interrupt"));
        router.send_control_request(request, &self.cancel).await?;
        Ok(())
    }

    /// Change the permission mode for the rest of the session
    ///
    /// # Errors
    /// Fails if not connected or the CLI rejects the request
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        let router = self.connected_router()?;
        let mut request = Payload::new();
        request.insert("subtype".to_string(), json!("set_permission_mode"));
        request.insert("mode".to_string(), json!(mode.as_str()));
        router.send_control_request(request, &self.cancel).await?;
        Ok(())
    }

    /// Register a handler for an SDK-hosted MCP server
    ///
    /// The server is only declared to the CLI at startup; one added later
    /// must match a name the CLI already routes to the SDK.
    pub fn add_mcp_server(&mut self, name: impl Into<String>, server: Arc<dyn McpServer>) {
        let name = name.into();
        if let Some(ref router) = self.router {
            router.add_mcp_server(name.clone(), Arc::clone(&server));
        }
        self.options.mcp_servers.insert(name, server);
    }

    /// First error reported by the transport, if any
    #[must_use]
    pub fn transport_error(&self) -> Option<ClaudeError> {
        self.transport.error()
    }

    /// Whether the client is connected and the transport is writable
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected && self.transport.is_ready()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Token cancelled when the client closes
    ///
    /// Cancelling it aborts a pending `connect` handshake, in-flight control
    /// requests and open response streams.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Close the session and stop the CLI
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    /// Returns the transport's process error if the CLI exited abnormally
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ClientState::Closed {
            return Ok(());
        }
        let was_connected = self.state == ClientState::Connected;
        self.state = ClientState::Closed;
        self.cancel.cancel();

        if let Some(router) = self.router.take() {
            router.stop().await;
        }
        self.messages = None;

        if !was_connected {
            return Ok(());
        }
        tracing::debug!(parent: &self.span, "closing");
        self.transport.close().await
    }
}

impl Drop for ClaudeSDKClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ClaudeSDKClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeSDKClient")
            .field("state", &self.state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
