//! # Claude Agent Control
//!
//! Drive the Claude Code CLI as a subprocess over its line-delimited JSON
//! control protocol. Async/await, strong typing, tokio-based.
//!
//! ## Quick Start
//!
//! One-shot prompt with [`query()`]:
//!
//! ```no_run
//! use claude_agent_control::{Message, query};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = query("What is 2 + 2?", None).await?;
//!     let mut stream = Box::pin(stream);
//!
//!     while let Some(message) = stream.next().await {
//!         if let Message::Assistant(assistant) = &message {
//!             for block in &assistant.content {
//!                 if let Some(text) = block.as_text() {
//!                     println!("Claude: {text}");
//!                 }
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Interactive sessions
//!
//! [`ClaudeSDKClient`] keeps one CLI process alive across turns and answers
//! the CLI's permission, hook and MCP requests from registered callbacks:
//!
//! ```no_run
//! # use claude_agent_control::{ClaudeAgentOptions, ClaudeSDKClient, PermissionMode};
//! # use futures::StreamExt;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ClaudeAgentOptions::builder()
//!     .max_turns(10)
//!     .permission_mode(PermissionMode::AcceptEdits)
//!     .build();
//!
//! let mut client = ClaudeSDKClient::new(options)?;
//! client.connect().await?;
//!
//! client.query("List the files in this directory").await?;
//! let mut response = Box::pin(client.receive_response()?);
//! while let Some(message) = response.next().await {
//!     println!("{}", message.message_type());
//! }
//! drop(response);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Hooks
//!
//! ```no_run
//! # use claude_agent_control::{
//! #     ClaudeAgentOptions, FnHookCallback, HookDecision, HookEvent, HookMatcher, HookOutput,
//! # };
//! # use std::collections::HashMap;
//! # use std::sync::Arc;
//! let block_rm = FnHookCallback::new(|input, _tool_use_id, _ctx| {
//!     Box::pin(async move {
//!         let command = input["tool_input"]["command"].as_str().unwrap_or_default();
//!         if command.contains("rm -rf") {
//!             Ok(HookOutput {
//!                 decision: Some(HookDecision::Block),
//!                 reason: Some("destructive command".to_string()),
//!                 ..HookOutput::default()
//!             })
//!         } else {
//!             Ok(HookOutput::default())
//!         }
//!     })
//! });
//!
//! let mut hooks = HashMap::new();
//! hooks.insert(
//!     HookEvent::PreToolUse,
//!     vec![HookMatcher::new(Some("Bash")).hook(Arc::new(block_rm))],
//! );
//! let options = ClaudeAgentOptions::builder().hooks(hooks).build();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod client;
pub mod control;
pub mod error;
pub mod message;
pub mod query;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use callbacks::{
    FnHookCallback, FnPermissionCallback, HookCallback, McpServer, PermissionCallback,
    SharedHookCallback, SharedMcpServer, SharedPermissionCallback,
};
pub use client::{ClaudeSDKClient, ClientState};
pub use control::ControlRouter;
pub use error::{ClaudeError, Result};
pub use message::parse_message;
pub use query::{query, query_with_transport};
pub use transport::subprocess::TransportSettings;
pub use transport::{CommandSpec, SubprocessTransport, Transport, find_cli};
pub use types::{
    AssistantMessage, CanUseToolCallback, ClaudeAgentOptions, ClaudeAgentOptionsBuilder,
    ContentBlock, ContentValue, HookContext, HookDecision, HookEvent, HookMatcher, HookOutput,
    McpServers, Message, PermissionBehavior, PermissionMode, PermissionResult,
    PermissionResultAllow, PermissionResultDeny, PermissionRuleValue, PermissionUpdate,
    PermissionUpdateDestination, RequestId, ResultMessage, SessionId, StreamEvent, SystemMessage,
    ToolName, ToolPermissionContext, UserMessage,
};

/// Version of the SDK
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
