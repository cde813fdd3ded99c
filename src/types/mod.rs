//! Type definitions for the agent control SDK
//!
//! Identifiers, wire messages, permission and hook types, and session options.

pub mod hooks;
pub mod identifiers;
pub mod messages;
pub mod options;
pub mod permissions;

pub use hooks::{HookContext, HookDecision, HookEvent, HookMatcher, HookOutput};
pub use identifiers::{CallbackId, RequestId, SessionId, ToolName};
pub use messages::{
    AssistantMessage, ContentBlock, ContentValue, Message, ResultMessage, StreamEvent, SystemKind,
    SystemMessage, UserContent, UserMessage, system_subtype,
};
pub use options::{
    ClaudeAgentOptions, ClaudeAgentOptionsBuilder, DEFAULT_CLOSE_TIMEOUT, DEFAULT_MAX_BUFFER_SIZE,
    HookRegistry, McpServers, StderrCallback, default_stderr_log_path,
};
pub use permissions::{
    CanUseToolCallback, PermissionBehavior, PermissionMode, PermissionResult,
    PermissionResultAllow, PermissionResultDeny, PermissionRuleValue, PermissionUpdate,
    PermissionUpdateDestination, ToolPermissionContext,
};
