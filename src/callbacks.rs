//! Callback traits for requests the CLI sends to the SDK.
//!
//! Three kinds of inbound control requests are answered by user code:
//! permission checks (`can_use_tool`), hook invocations (`hook_callback`)
//! and MCP traffic for SDK-hosted servers (`mcp_message`). Each one has a
//! trait here. Implement the trait on your own type, or wrap a closure in
//! [`FnHookCallback`] / [`FnPermissionCallback`].
//!
//! # Example: a permission policy
//!
//! ```no_run
//! use claude_agent_control::callbacks::PermissionCallback;
//! use claude_agent_control::types::{PermissionResult, ToolPermissionContext};
//! use claude_agent_control::Result;
//! use async_trait::async_trait;
//!
//! struct ReadOnly;
//!
//! #[async_trait]
//! impl PermissionCallback for ReadOnly {
//!     async fn call(
//!         &self,
//!         tool_name: String,
//!         _input: serde_json::Value,
//!         _context: ToolPermissionContext,
//!     ) -> Result<PermissionResult> {
//!         match tool_name.as_str() {
//!             "Read" | "Glob" | "Grep" => Ok(PermissionResult::allow()),
//!             _ => Ok(PermissionResult::deny("only read operations are allowed")),
//!         }
//!     }
//! }
//! ```
//!
//! # Example: an SDK-hosted MCP server
//!
//! ```no_run
//! use claude_agent_control::callbacks::McpServer;
//! use claude_agent_control::Result;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl McpServer for Echo {
//!     async fn handle_message(&self, message: Value) -> Result<Value> {
//!         Ok(json!({"jsonrpc": "2.0", "id": message["id"], "result": {}}))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{HookContext, HookOutput, PermissionResult, ToolPermissionContext};

/// Boxed future returned by closure callbacks
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

// ============================================================================
// Hook Callback Trait
// ============================================================================

/// Handler for `hook_callback` requests.
///
/// Registered through [`HookMatcher`](crate::types::HookMatcher); each
/// callback gets its own id when the session initializes.
///
/// ```no_run
/// use claude_agent_control::callbacks::HookCallback;
/// use claude_agent_control::types::{HookContext, HookDecision, HookOutput};
/// use claude_agent_control::Result;
/// use async_trait::async_trait;
///
/// struct BlockRm;
///
/// #[async_trait]
/// impl HookCallback for BlockRm {
///     async fn call(
///         &self,
///         input: serde_json::Value,
///         _tool_use_id: Option<String>,
///         _context: HookContext,
///     ) -> Result<HookOutput> {
///         let command = input["tool_input"]["command"].as_str().unwrap_or_default();
///         if command.starts_with("rm ") {
///             return Ok(HookOutput {
///                 decision: Some(HookDecision::Block),
///                 reason: Some("rm is not allowed".to_string()),
///                 ..Default::default()
///             });
///         }
///         Ok(HookOutput::default())
///     }
/// }
/// ```
#[async_trait]
pub trait HookCallback: Send + Sync {
    /// Called when the CLI fires a hook event.
    ///
    /// * `input` - the event payload sent by the CLI
    /// * `tool_use_id` - present for tool-related events
    /// * `context` - carries a token cancelled on shutdown or timeout
    async fn call(
        &self,
        input: Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<HookOutput>;
}

#[async_trait]
impl HookCallback for Box<dyn HookCallback> {
    async fn call(
        &self,
        input: Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<HookOutput> {
        (**self).call(input, tool_use_id, context).await
    }
}

#[async_trait]
impl<T: HookCallback + ?Sized> HookCallback for Arc<T> {
    async fn call(
        &self,
        input: Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<HookOutput> {
        (**self).call(input, tool_use_id, context).await
    }
}

// ============================================================================
// Permission Callback Trait
// ============================================================================

/// Handler for `can_use_tool` requests.
#[async_trait]
pub trait PermissionCallback: Send + Sync {
    /// Decide whether `tool_name` may run with `input`.
    ///
    /// Returning an error sends an error response to the CLI; it does not
    /// end the session.
    async fn call(
        &self,
        tool_name: String,
        input: Value,
        context: ToolPermissionContext,
    ) -> Result<PermissionResult>;
}

#[async_trait]
impl PermissionCallback for Box<dyn PermissionCallback> {
    async fn call(
        &self,
        tool_name: String,
        input: Value,
        context: ToolPermissionContext,
    ) -> Result<PermissionResult> {
        (**self).call(tool_name, input, context).await
    }
}

#[async_trait]
impl<T: PermissionCallback + ?Sized> PermissionCallback for Arc<T> {
    async fn call(
        &self,
        tool_name: String,
        input: Value,
        context: ToolPermissionContext,
    ) -> Result<PermissionResult> {
        (**self).call(tool_name, input, context).await
    }
}

// ============================================================================
// MCP Server Trait
// ============================================================================

/// An MCP server hosted inside the SDK process.
///
/// The CLI routes JSON-RPC messages for the server through `mcp_message`
/// control requests; the returned value is sent back as `mcp_response`.
#[async_trait]
pub trait McpServer: Send + Sync {
    /// Handle one JSON-RPC message and return the JSON-RPC response
    async fn handle_message(&self, message: Value) -> Result<Value>;
}

#[async_trait]
impl<T: McpServer + ?Sized> McpServer for Arc<T> {
    async fn handle_message(&self, message: Value) -> Result<Value> {
        (**self).handle_message(message).await
    }
}

/// Shared hook callback
pub type SharedHookCallback = Arc<dyn HookCallback>;

/// Shared permission callback
pub type SharedPermissionCallback = Arc<dyn PermissionCallback>;

/// Shared MCP server
pub type SharedMcpServer = Arc<dyn McpServer>;

// ============================================================================
// Closure-based callback wrappers
// ============================================================================

/// Adapts a closure into a [`HookCallback`].
///
/// ```no_run
/// use claude_agent_control::callbacks::{FnHookCallback, HookCallback};
/// use claude_agent_control::types::HookOutput;
/// use std::sync::Arc;
///
/// let callback = FnHookCallback::new(|_input, tool_use_id, ctx| {
///     Box::pin(async move {
///         println!("hook for {tool_use_id:?}, cancelled: {}", ctx.is_cancelled());
///         Ok(HookOutput::default())
///     })
/// });
/// let shared: Arc<dyn HookCallback> = Arc::new(callback);
/// ```
pub struct FnHookCallback<F>
where
    F: Fn(Value, Option<String>, HookContext) -> BoxFuture<HookOutput> + Send + Sync,
{
    func: F,
}

impl<F> FnHookCallback<F>
where
    F: Fn(Value, Option<String>, HookContext) -> BoxFuture<HookOutput> + Send + Sync,
{
    /// Wrap `func`
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> HookCallback for FnHookCallback<F>
where
    F: Fn(Value, Option<String>, HookContext) -> BoxFuture<HookOutput> + Send + Sync,
{
    async fn call(
        &self,
        input: Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<HookOutput> {
        (self.func)(input, tool_use_id, context).await
    }
}

/// Adapts a closure into a [`PermissionCallback`].
///
/// ```no_run
/// use claude_agent_control::callbacks::{FnPermissionCallback, PermissionCallback};
/// use claude_agent_control::types::PermissionResult;
/// use std::sync::Arc;
///
/// let callback = FnPermissionCallback::new(|tool_name, _input, _ctx| {
///     Box::pin(async move {
///         if tool_name == "Bash" {
///             Ok(PermissionResult::deny("shell access is disabled"))
///         } else {
///             Ok(PermissionResult::allow())
///         }
///     })
/// });
/// let shared: Arc<dyn PermissionCallback> = Arc::new(callback);
/// ```
pub struct FnPermissionCallback<F>
where
    F: Fn(String, Value, ToolPermissionContext) -> BoxFuture<PermissionResult> + Send + Sync,
{
    func: F,
}

impl<F> FnPermissionCallback<F>
where
    F: Fn(String, Value, ToolPermissionContext) -> BoxFuture<PermissionResult> + Send + Sync,
{
    /// Wrap `func`
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> PermissionCallback for FnPermissionCallback<F>
where
    F: Fn(String, Value, ToolPermissionContext) -> BoxFuture<PermissionResult> + Send + Sync,
{
    async fn call(
        &self,
        tool_name: String,
        input: Value,
        context: ToolPermissionContext,
    ) -> Result<PermissionResult> {
        (self.func)(tool_name, input, context).await
    }
}
