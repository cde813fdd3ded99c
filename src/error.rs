//! Error types for the control-protocol client
//!
//! Every variant that describes a failure of the child process or of the
//! protocol carries an optional cause. Causes are reference counted so the
//! error is `Clone`, which lets the transport hand out its sticky error as
//! often as it is asked for.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::utils::truncate_for_display;

/// Shared, type-erased error used as the cause of a [`ClaudeError`].
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Maximum number of bytes of an offending line kept in a decode error.
pub const RAW_SNIPPET_LIMIT: usize = 100;

/// Main error type
#[derive(Error, Debug, Clone)]
pub enum ClaudeError {
    /// Claude Code CLI not found or not installed
    #[error("Claude Code CLI not found: {message}")]
    CliNotFound {
        /// Error message
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// The child process could not be reached or written to
    #[error("Connection error: {message}")]
    Connection {
        /// Error message
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// The child process exited abnormally or had to be killed
    #[error("Process error: {message}{}", exit_code_suffix(.exit_code))]
    Process {
        /// Error message
        message: String,
        /// Exit code, when the process exited normally
        exit_code: Option<i32>,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// A line from the child process was not valid JSON
    #[error("JSON decode error: {message}")]
    JsonDecode {
        /// Error message
        message: String,
        /// Truncated copy of the offending input
        raw: String,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// A well-formed message had an unknown or invalid shape
    #[error("Message parse error: {message}{}", message_type_suffix(.message_type))]
    MessageParse {
        /// Error message
        message: String,
        /// Discriminator of the message or block that failed
        message_type: Option<String>,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// The control request/response contract was violated
    #[error("Control protocol error: {message}")]
    ControlProtocol {
        /// Error message
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// A tool use was terminally denied
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Error message
        message: String,
        /// Tool that was denied
        tool_name: Option<String>,
        /// Reason given for the denial
        reason: Option<String>,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// The CLI reported that the requested session does not exist
    #[error("Session not found: {message} (session ID: {session_id})")]
    SessionNotFound {
        /// Error message
        message: String,
        /// Session the CLI could not find
        session_id: String,
        /// Underlying cause
        #[source]
        source: Option<Cause>,
    },

    /// An operation was cancelled before it completed
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument passed by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn exit_code_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) if *code != 0 => format!(" (exit code: {code})"),
        _ => String::new(),
    }
}

fn message_type_suffix(message_type: &Option<String>) -> String {
    match message_type {
        Some(kind) => format!(" (type: {kind})"),
        None => String::new(),
    }
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, ClaudeError>;

fn cause(err: impl StdError + Send + Sync + 'static) -> Option<Cause> {
    Some(Arc::new(err))
}

impl ClaudeError {
    /// Create a CLI not found error with installation guidance
    #[must_use]
    pub fn cli_not_found() -> Self {
        Self::CliNotFound {
            message: "Claude Code not found. Install with:\n\
                      npm install -g @anthropic-ai/claude-code\n\
                      \n\
                      If already installed locally, try:\n\
                      export PATH=\"$HOME/node_modules/.bin:$PATH\"\n\
                      \n\
                      Or set cli_path in ClaudeAgentOptions"
                .to_string(),
            source: None,
        }
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping a cause
    pub fn connection_with(
        msg: impl Into<String>,
        err: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: cause(err),
        }
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
            source: None,
        }
    }

    /// Create a process error wrapping a cause
    pub fn process_with(
        msg: impl Into<String>,
        exit_code: Option<i32>,
        err: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
            source: cause(err),
        }
    }

    /// Create a JSON decode error, keeping at most 100 bytes of the input
    pub fn json_decode(
        msg: impl Into<String>,
        raw: &str,
        err: Option<Cause>,
    ) -> Self {
        Self::JsonDecode {
            message: msg.into(),
            raw: truncate_for_display(raw, RAW_SNIPPET_LIMIT),
            source: err,
        }
    }

    /// Create a message parse error
    pub fn message_parse(msg: impl Into<String>, message_type: Option<&str>) -> Self {
        Self::MessageParse {
            message: msg.into(),
            message_type: message_type.map(str::to_string),
            source: None,
        }
    }

    /// Create a control protocol error
    pub fn control_protocol(msg: impl Into<String>) -> Self {
        Self::ControlProtocol {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a control protocol error wrapping a cause
    pub fn control_protocol_with(
        msg: impl Into<String>,
        err: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::ControlProtocol {
            message: msg.into(),
            source: cause(err),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(
        msg: impl Into<String>,
        tool_name: Option<String>,
        reason: Option<String>,
    ) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
            tool_name,
            reason,
            source: None,
        }
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SessionNotFound {
            message: msg.into(),
            session_id: session_id.into(),
            source: None,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Direct cause of this error, if any
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::CliNotFound { source, .. }
            | Self::Connection { source, .. }
            | Self::Process { source, .. }
            | Self::JsonDecode { source, .. }
            | Self::MessageParse { source, .. }
            | Self::ControlProtocol { source, .. }
            | Self::PermissionDenied { source, .. }
            | Self::SessionNotFound { source, .. } => source.as_deref(),
            Self::Cancelled(_) | Self::InvalidConfig(_) | Self::InvalidArgument(_) => None,
        }
    }

    /// Iterate over this error and every `ClaudeError` in its cause chain.
    pub fn chain(&self) -> impl Iterator<Item = &ClaudeError> + '_ {
        std::iter::successors(Some(self), |&err| {
            ClaudeError::cause(err).and_then(|inner| inner.downcast_ref::<ClaudeError>())
        })
    }

    /// First error in the chain matching `predicate`
    pub fn find(&self, predicate: impl Fn(&ClaudeError) -> bool) -> Option<&ClaudeError> {
        self.chain().find(|err| predicate(err))
    }

    /// True if this error or any wrapped cause is a CLI-not-found error
    #[must_use]
    pub fn is_cli_not_found(&self) -> bool {
        self.chain()
            .any(|err| matches!(err, Self::CliNotFound { .. }))
    }

    /// True if this error or any wrapped cause is a connection error
    #[must_use]
    pub fn is_connection(&self) -> bool {
        self.chain()
            .any(|err| matches!(err, Self::Connection { .. }))
    }

    /// True if this error or any wrapped cause is a process error
    #[must_use]
    pub fn is_process(&self) -> bool {
        self.chain().any(|err| matches!(err, Self::Process { .. }))
    }

    /// True if this error or any wrapped cause is a JSON decode error
    #[must_use]
    pub fn is_json_decode(&self) -> bool {
        self.chain()
            .any(|err| matches!(err, Self::JsonDecode { .. }))
    }

    /// True if this error or any wrapped cause is a message parse error
    #[must_use]
    pub fn is_message_parse(&self) -> bool {
        self.chain()
            .any(|err| matches!(err, Self::MessageParse { .. }))
    }

    /// True if this error or any wrapped cause is a control protocol error
    #[must_use]
    pub fn is_control_protocol(&self) -> bool {
        self.chain()
            .any(|err| matches!(err, Self::ControlProtocol { .. }))
    }

    /// True if this error or any wrapped cause is a permission denial
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        self.chain()
            .any(|err| matches!(err, Self::PermissionDenied { .. }))
    }

    /// True if this error or any wrapped cause is a session-not-found error
    #[must_use]
    pub fn is_session_not_found(&self) -> bool {
        self.chain()
            .any(|err| matches!(err, Self::SessionNotFound { .. }))
    }

    /// True if this error or any wrapped cause is a cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.chain().any(|err| matches!(err, Self::Cancelled(_)))
    }

    /// Exit code of the first process error in the chain
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.chain().find_map(|err| match err {
            Self::Process { exit_code, .. } => *exit_code,
            _ => None,
        })
    }

    /// Session id of the first session-not-found error in the chain
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.chain().find_map(|err| match err {
            Self::SessionNotFound { session_id, .. } => Some(session_id.as_str()),
            _ => None,
        })
    }
}
