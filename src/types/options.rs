//! Session configuration options

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;

use super::hooks::{HookEvent, HookMatcher};
use super::identifiers::{SessionId, ToolName};
use super::permissions::{CanUseToolCallback, PermissionMode};
use crate::callbacks::McpServer;

/// Callback receiving every line the CLI writes to stderr
pub type StderrCallback = Arc<dyn Fn(String) + Send + Sync>;

/// SDK-hosted MCP servers keyed by logical server name
pub type McpServers = HashMap<String, Arc<dyn McpServer>>;

/// Hook matchers keyed by event
pub type HookRegistry = HashMap<HookEvent, Vec<HookMatcher>>;

/// Default upper bound on one line of CLI output (1 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default grace period between closing stdin and killing the CLI
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default location of the stderr log file, `~/.claude/agents_server/cli_stderr.log`
#[must_use]
pub fn default_stderr_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".claude")
            .join("agents_server")
            .join("cli_stderr.log")
    })
}

// ============================================================================
// Claude Agent Options
// ============================================================================

/// Options for [`ClaudeSDKClient`](crate::ClaudeSDKClient) and [`query`](crate::query())
///
/// # Example
/// ```
/// use claude_agent_control::ClaudeAgentOptions;
/// use claude_agent_control::types::PermissionMode;
///
/// let options = ClaudeAgentOptions::builder()
///     .model("claude-sonnet-4-5")
///     .permission_mode(PermissionMode::AcceptEdits)
///     .max_turns(3)
///     .build();
/// assert_eq!(options.max_turns, Some(3));
/// ```
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Default, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for ClaudeAgentOptions"),
    builder_type(doc = "Builder for ClaudeAgentOptions", vis = "pub"),
    build_method(doc = "Build the ClaudeAgentOptions")
)]
pub struct ClaudeAgentOptions {
    /// Tools the model may use without asking
    #[builder(default, setter(into))]
    pub allowed_tools: Vec<ToolName>,

    /// Tools the model may never use
    #[builder(default, setter(into))]
    pub disallowed_tools: Vec<ToolName>,

    /// Replacement system prompt
    #[builder(default, setter(strip_option, into))]
    pub system_prompt: Option<String>,

    /// Permission mode
    #[builder(default, setter(strip_option))]
    pub permission_mode: Option<PermissionMode>,

    /// MCP tool the CLI asks for permission decisions
    #[builder(default, setter(strip_option, into))]
    pub permission_prompt_tool_name: Option<String>,

    /// Model name, also exported as `ANTHROPIC_MODEL`
    #[builder(default, setter(strip_option, into))]
    pub model: Option<String>,

    /// API base URL, exported as `ANTHROPIC_BASE_URL`
    #[builder(default, setter(strip_option, into))]
    pub base_url: Option<String>,

    /// Maximum number of agent turns
    #[builder(default, setter(strip_option))]
    pub max_turns: Option<u32>,

    /// Session to resume
    #[builder(default, setter(strip_option, into))]
    pub resume: Option<SessionId>,

    /// Fork the resumed session instead of continuing it
    #[builder(default)]
    pub fork_session: bool,

    /// Emit `stream_event` messages
    #[builder(default)]
    pub include_partial_messages: bool,

    /// Allow the CLI to skip permission checks
    #[builder(default)]
    pub allow_dangerously_skip_permissions: bool,

    /// Skip permission checks; ignored unless allowed above
    #[builder(default)]
    pub dangerously_skip_permissions: bool,

    /// Working directory of the CLI
    #[builder(default, setter(strip_option, into))]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables, applied last
    #[builder(default)]
    pub env: HashMap<String, String>,

    /// Path to the CLI binary; discovered when unset
    #[builder(default, setter(strip_option, into))]
    pub cli_path: Option<PathBuf>,

    /// Upper bound on one line of CLI output
    #[builder(default, setter(strip_option))]
    pub max_buffer_size: Option<usize>,

    /// Grace period before the CLI is killed on close
    #[builder(default, setter(strip_option))]
    pub close_timeout: Option<Duration>,

    /// Permission callback answering `can_use_tool` requests
    #[builder(default, setter(strip_option))]
    pub can_use_tool: Option<CanUseToolCallback>,

    /// Hook callbacks registered at `initialize`
    #[builder(default, setter(strip_option))]
    pub hooks: Option<HookRegistry>,

    /// SDK-hosted MCP servers answering `mcp_message` requests
    #[builder(default)]
    pub mcp_servers: McpServers,

    /// Callback receiving CLI stderr lines
    #[builder(default, setter(strip_option))]
    pub stderr: Option<StderrCallback>,

    /// File that CLI stderr lines are appended to
    #[builder(default, setter(strip_option, into))]
    pub stderr_log_file: Option<PathBuf>,

    /// Append CLI stderr to [`default_stderr_log_path`] when no
    /// `stderr_log_file` is set
    #[builder(default)]
    pub stderr_log: bool,
}

impl ClaudeAgentOptions {
    /// Effective maximum line size
    #[must_use]
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Effective close grace period
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        self.close_timeout.unwrap_or(DEFAULT_CLOSE_TIMEOUT)
    }

    /// Effective stderr log file: the explicit path, else the default
    /// location when `stderr_log` is on
    #[must_use]
    pub fn stderr_log_path(&self) -> Option<PathBuf> {
        self.stderr_log_file
            .clone()
            .or_else(|| self.stderr_log.then(default_stderr_log_path).flatten())
    }
}

impl std::fmt::Debug for ClaudeAgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut servers: Vec<&String> = self.mcp_servers.keys().collect();
        servers.sort();
        f.debug_struct("ClaudeAgentOptions")
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("system_prompt", &self.system_prompt)
            .field("permission_mode", &self.permission_mode)
            .field(
                "permission_prompt_tool_name",
                &self.permission_prompt_tool_name,
            )
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_turns", &self.max_turns)
            .field("resume", &self.resume)
            .field("fork_session", &self.fork_session)
            .field("include_partial_messages", &self.include_partial_messages)
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("cli_path", &self.cli_path)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("close_timeout", &self.close_timeout)
            .field("can_use_tool", &self.can_use_tool.as_ref().map(|_| "<callback>"))
            .field("hooks", &self.hooks)
            .field("mcp_servers", &servers)
            .field("stderr", &self.stderr.as_ref().map(|_| "<callback>"))
            .field("stderr_log_file", &self.stderr_log_file)
            .field("stderr_log", &self.stderr_log)
            .finish()
    }
}
