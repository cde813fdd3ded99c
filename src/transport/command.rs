//! Translation of [`ClaudeAgentOptions`] into a CLI invocation

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::VERSION;
use crate::error::{ClaudeError, Result};
use crate::types::ClaudeAgentOptions;

// Environment variables that must not be injected into the CLI's environment
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

/// Fully resolved process invocation: binary, argv, working directory and
/// extra environment on top of the inherited one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Binary to execute
    pub program: PathBuf,
    /// Arguments, excluding the program itself
    pub args: Vec<String>,
    /// Working directory; inherited when `None`
    pub cwd: Option<PathBuf>,
    /// Variables added to the inherited environment
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Invocation of `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Build the streaming-mode CLI invocation for `options`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `options.env` names a loader or interpreter
    /// injection variable
    pub fn from_options(cli_path: &Path, options: &ClaudeAgentOptions) -> Result<Self> {
        let dangerous: Vec<&str> = options
            .env
            .keys()
            .map(String::as_str)
            .filter(|key| DANGEROUS_ENV_VARS.contains(key))
            .collect();
        if !dangerous.is_empty() {
            let vars = dangerous.join(", ");
            tracing::warn!(vars = %vars, "rejected dangerous environment variables");
            return Err(ClaudeError::invalid_config(format!(
                "dangerous environment variables are not allowed: [{vars}]"
            )));
        }

        let mut spec = Self::new(cli_path).args([
            "--input-format",
            "stream-json",
            "--output-format",
            "stream-json",
            "--verbose",
        ]);

        if let Some(ref prompt) = options.system_prompt {
            spec = spec.arg("--system-prompt").arg(prompt);
        }

        if !options.allowed_tools.is_empty() {
            spec = spec
                .arg("--allowedTools")
                .arg(join_names(&options.allowed_tools));
        }

        if !options.disallowed_tools.is_empty() {
            spec = spec
                .arg("--disallowedTools")
                .arg(join_names(&options.disallowed_tools));
        }

        if let Some(max_turns) = options.max_turns {
            spec = spec.arg("--max-turns").arg(max_turns.to_string());
        }

        if let Some(ref model) = options.model {
            spec = spec.arg("--model").arg(model);
        }

        if let Some(ref tool) = options.permission_prompt_tool_name {
            spec = spec.arg("--permission-prompt-tool").arg(tool);
        }

        if let Some(mode) = options.permission_mode {
            spec = spec.arg("--permission-mode").arg(mode.as_str());
        }

        if let Some(ref session_id) = options.resume {
            spec = spec.arg("--resume").arg(session_id.as_str());
        }

        if options.fork_session {
            spec = spec.arg("--fork-session");
        }

        if options.include_partial_messages {
            spec = spec.arg("--include-partial-messages");
        }

        if !options.mcp_servers.is_empty() {
            spec = spec.arg("--mcp-config").arg(sdk_mcp_config(options));
        }

        if options.allow_dangerously_skip_permissions {
            spec = spec.arg("--allow-dangerously-skip-permissions");
            if options.dangerously_skip_permissions {
                spec = spec.arg("--dangerously-skip-permissions");
            }
        }

        spec = spec
            .env("CLAUDE_CODE_ENTRYPOINT", "sdk-rust")
            .env("CLAUDE_AGENT_SDK_VERSION", VERSION);
        if let Some(ref model) = options.model {
            spec = spec.env("ANTHROPIC_MODEL", model);
        }
        if let Some(ref base_url) = options.base_url {
            spec = spec.env("ANTHROPIC_BASE_URL", base_url);
        }
        for (key, value) in &options.env {
            spec = spec.env(key, value);
        }

        if let Some(ref cwd) = options.cwd {
            spec = spec.cwd(cwd);
        }

        Ok(spec)
    }

    /// Build a tokio command with all three standard streams piped
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(OsStr::new))
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd).env("PWD", cwd);
        }
        cmd
    }
}

fn join_names<T: AsRef<str>>(names: &[T]) -> String {
    names.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",")
}

fn sdk_mcp_config(options: &ClaudeAgentOptions) -> String {
    let mut names: Vec<&String> = options.mcp_servers.keys().collect();
    names.sort();
    let servers: serde_json::Map<String, serde_json::Value> = names
        .into_iter()
        .map(|name| {
            (
                name.clone(),
                serde_json::json!({"type": "sdk", "name": name}),
            )
        })
        .collect();
    serde_json::json!({ "mcpServers": servers }).to_string()
}
