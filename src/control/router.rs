//! Control request routing and response correlation

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::callbacks::{HookCallback, McpServer};
use crate::error::{ClaudeError, Result};
use crate::transport::{MESSAGE_CHANNEL_CAPACITY, Transport};
use crate::types::{
    CallbackId, CanUseToolCallback, ClaudeAgentOptions, HookContext, HookRegistry, Message,
    PermissionResult, PermissionUpdate, RequestId, SystemKind, SystemMessage,
    ToolPermissionContext,
};

/// Body of a control request or response
pub type Payload = Map<String, Value>;

/// Conversation messages held back while the consumer is slow. Once full,
/// inbound reading pauses and control responses wait with it.
const BACKLOG_LIMIT: usize = 100;

/// Time handler tasks get to finish on stop before they are aborted
const HANDLER_GRACE: Duration = Duration::from_secs(2);

// JSON-RPC error codes used for SDK-hosted MCP servers
const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;
const JSONRPC_INTERNAL_ERROR: i64 = -32603;

type ResponseSlot = oneshot::Sender<Result<Payload>>;

#[derive(Default)]
struct RouterState {
    pending: HashMap<RequestId, ResponseSlot>,
    hook_callbacks: HashMap<CallbackId, (Arc<dyn HookCallback>, Option<Duration>)>,
    mcp_servers: HashMap<String, Arc<dyn McpServer>>,
    // Set once no response can arrive any more
    closed: bool,
}

// ============================================================================
// Wire envelopes
// ============================================================================

#[derive(Serialize)]
struct ControlRequestEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    request_id: &'a str,
    request: &'a Payload,
}

#[derive(Serialize)]
struct ControlResponseEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    response: ControlResponseBody<'a>,
}

#[derive(Serialize)]
#[serde(tag = "subtype", rename_all = "lowercase")]
enum ControlResponseBody<'a> {
    Success { request_id: &'a str, response: Payload },
    Error { request_id: &'a str, error: String },
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
enum PermissionReply {
    #[serde(rename_all = "camelCase")]
    Allow {
        updated_input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_permissions: Option<Vec<PermissionUpdate>>,
    },
    Deny {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt: Option<bool>,
    },
}

impl PermissionReply {
    fn new(decision: PermissionResult, original_input: Value) -> Self {
        match decision {
            PermissionResult::Allow(allow) => Self::Allow {
                updated_input: allow.updated_input.unwrap_or(original_input),
                updated_permissions: allow.updated_permissions.filter(|p| !p.is_empty()),
            },
            PermissionResult::Deny(deny) => Self::Deny {
                message: (!deny.message.is_empty()).then_some(deny.message),
                interrupt: deny.interrupt.then_some(true),
            },
        }
    }
}

fn to_payload<T: Serialize>(value: &T, what: &str) -> Result<Payload> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ClaudeError::control_protocol(format!(
            "{what} must return a JSON object"
        ))),
        Err(e) => Err(ClaudeError::control_protocol_with(
            format!("failed to serialize {what} result"),
            e,
        )),
    }
}

fn str_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

// ============================================================================
// Shared router state
// ============================================================================

struct RouterShared {
    transport: Arc<dyn Transport>,
    span: Span,
    state: StdMutex<RouterState>,
    next_request: AtomicU64,
    next_callback: AtomicU64,
    can_use_tool: Option<CanUseToolCallback>,
    hooks: Option<HookRegistry>,
    handlers: StdMutex<JoinSet<()>>,
    cancel: CancellationToken,
}

// Removes a pending entry when the waiting request goes away
struct PendingSlot<'a> {
    shared: &'a RouterShared,
    id: RequestId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.shared.state().pending.remove(&self.id);
    }
}

impl RouterShared {
    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_request(&self, request: Payload, cancel: &CancellationToken) -> Result<Payload> {
        let id = RequestId::sequenced(self.next_request.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state();
            if state.closed {
                return Err(self.closed_error());
            }
            state.pending.insert(id.clone(), tx);
        }
        let _slot = PendingSlot {
            shared: self,
            id: id.clone(),
        };

        let line = serde_json::to_string(&ControlRequestEnvelope {
            kind: "control_request",
            request_id: id.as_str(),
            request: &request,
        })
        .map_err(|e| ClaudeError::control_protocol_with("failed to send control request", e))?;

        tracing::debug!(
            parent: &self.span,
            request_id = %id,
            subtype = str_field(&request, "subtype").unwrap_or_default(),
            "sending control request"
        );
        self.transport
            .write(&line)
            .await
            .map_err(|e| ClaudeError::control_protocol_with("failed to send control request", e))?;

        tokio::select! {
            response = rx => response.unwrap_or_else(|_| {
                Err(ClaudeError::control_protocol("control request abandoned"))
            }),
            () = cancel.cancelled() => {
                tracing::debug!(parent: &self.span, request_id = %id, "control request cancelled");
                Err(ClaudeError::cancelled(format!("control request {id} cancelled")))
            }
            () = self.cancel.cancelled() => {
                Err(ClaudeError::cancelled(format!("control request {id} cancelled: router stopped")))
            }
        }
    }

    fn closed_error(&self) -> ClaudeError {
        const MESSAGE: &str = "transport closed before control response";
        match self.transport.error() {
            Some(cause) => ClaudeError::connection_with(MESSAGE, cause),
            None => ClaudeError::connection(MESSAGE),
        }
    }

    /// Fail every waiting request and refuse new ones
    fn fail_pending(&self) {
        let slots: Vec<(RequestId, ResponseSlot)> = {
            let mut state = self.state();
            state.closed = true;
            state.pending.drain().collect()
        };
        if slots.is_empty() {
            return;
        }
        tracing::debug!(parent: &self.span, pending = slots.len(), "failing pending control requests");
        for (_, slot) in slots {
            let _ = slot.send(Err(self.closed_error()));
        }
    }

    fn initialize_request(&self) -> Payload {
        let mut request = Payload::new();
        request.insert("subtype".to_string(), json!("initialize"));

        let Some(hooks) = self.hooks.as_ref().filter(|h| !h.is_empty()) else {
            return request;
        };

        let mut events: Vec<_> = hooks.keys().copied().collect();
        events.sort();

        let mut state = self.state();
        let mut config = Payload::new();
        for event in events {
            let mut groups = Vec::new();
            for matcher in hooks.get(&event).into_iter().flatten() {
                let mut ids = Vec::with_capacity(matcher.hooks.len());
                for callback in &matcher.hooks {
                    let id =
                        CallbackId::sequenced(self.next_callback.fetch_add(1, Ordering::SeqCst) + 1);
                    state
                        .hook_callbacks
                        .insert(id.clone(), (Arc::clone(callback), matcher.timeout));
                    ids.push(id);
                }
                let mut group = Payload::new();
                group.insert("hookCallbackIds".to_string(), json!(ids));
                if let Some(ref pattern) = matcher.matcher {
                    group.insert("matcher".to_string(), json!(pattern));
                }
                groups.push(Value::Object(group));
            }
            config.insert(event.as_str().to_string(), Value::Array(groups));
        }
        request.insert("hooks".to_string(), Value::Object(config));
        request
    }

    async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Message>, consumer: mpsc::Sender<Message>) {
        let mut backlog: VecDeque<Message> = VecDeque::new();
        let mut inbound_open = true;
        let mut consumer_open = true;

        loop {
            if !inbound_open && backlog.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!(parent: &self.span, "message loop cancelled");
                    break;
                }
                permit = consumer.reserve(), if !backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(message) = backlog.pop_front() {
                            permit.send(message);
                        }
                    }
                    Err(_) => {
                        tracing::debug!(parent: &self.span, dropped = backlog.len(), "consumer gone");
                        consumer_open = false;
                        backlog.clear();
                    }
                },
                message = inbound.recv(), if inbound_open && backlog.len() < BACKLOG_LIMIT => match message {
                    Some(message) => self.route(message, &mut backlog, consumer_open),
                    None => {
                        tracing::debug!(parent: &self.span, pending = backlog.len(), "transport stream ended");
                        inbound_open = false;
                        self.fail_pending();
                    }
                },
            }
        }
        self.fail_pending();
    }

    fn route(self: &Arc<Self>, message: Message, backlog: &mut VecDeque<Message>, consumer_open: bool) {
        match message {
            Message::System(system) if system.kind == SystemKind::ControlResponse => {
                self.resolve(system);
            }
            Message::System(system) if system.kind == SystemKind::ControlRequest => {
                self.dispatch(system);
            }
            message if consumer_open => backlog.push_back(message),
            message => {
                tracing::trace!(parent: &self.span, message_type = message.message_type(), "no consumer, message dropped");
            }
        }
    }

    fn resolve(&self, system: SystemMessage) {
        let Some(response) = system.response else {
            tracing::warn!(parent: &self.span, "invalid control response format: response field is nil");
            return;
        };
        let Some(request_id) = str_field(&response, "request_id") else {
            tracing::warn!(parent: &self.span, "missing request_id in control response");
            return;
        };

        let Some(slot) = self.state().pending.remove(request_id) else {
            tracing::debug!(parent: &self.span, request_id, "no pending request for control response");
            return;
        };

        let result = if str_field(&response, "subtype") == Some("error") {
            Err(ClaudeError::control_protocol(
                str_field(&response, "error").unwrap_or("unknown control protocol error"),
            ))
        } else {
            Ok(response
                .get("response")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default())
        };
        tracing::debug!(parent: &self.span, request_id, ok = result.is_ok(), "control response matched");
        let _ = slot.send(result);
    }

    fn dispatch(self: &Arc<Self>, system: SystemMessage) {
        let shared = Arc::clone(self);
        let mut handlers = self.handlers();
        while handlers.try_join_next().is_some() {}
        handlers.spawn(async move { shared.answer(system).await });
    }

    async fn answer(&self, system: SystemMessage) {
        let request = system.request.unwrap_or_default();
        let request_id = system
            .request_id
            .map(RequestId::into_inner)
            .or_else(|| str_field(&request, "request_id").map(str::to_string));

        let Some(request_id) = request_id else {
            tracing::warn!(parent: &self.span, "control request without request_id");
            self.reply(
                "",
                Err(ClaudeError::control_protocol("invalid control request format")),
            )
            .await;
            return;
        };

        let subtype = str_field(&request, "subtype").unwrap_or_default();
        tracing::debug!(parent: &self.span, request_id = %request_id, subtype, "handling control request");

        let handled = async {
            match subtype {
                "can_use_tool" => self.handle_permission(&request).await,
                "hook_callback" => self.handle_hook(&request).await,
                "mcp_message" => self.handle_mcp(&request).await,
                "interrupt" | "set_permission_mode" => Ok(Payload::new()),
                other => Err(ClaudeError::control_protocol(format!(
                    "unsupported control request subtype: {other}"
                ))),
            }
        };

        let result = tokio::select! {
            () = self.cancel.cancelled() => {
                tracing::debug!(parent: &self.span, request_id = %request_id, "control request abandoned on stop");
                return;
            }
            result = handled => result,
        };
        self.reply(&request_id, result).await;
    }

    async fn reply(&self, request_id: &str, result: Result<Payload>) {
        let body = match result {
            Ok(response) => ControlResponseBody::Success {
                request_id,
                response,
            },
            Err(err) => {
                tracing::debug!(parent: &self.span, request_id, error = %err, "control request failed");
                ControlResponseBody::Error {
                    request_id,
                    error: err.to_string(),
                }
            }
        };
        let envelope = ControlResponseEnvelope {
            kind: "control_response",
            response: body,
        };

        let line = match serde_json::to_string(&envelope) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(parent: &self.span, request_id, error = %e, "failed to encode control response");
                return;
            }
        };
        if let Err(e) = self.transport.write(&line).await {
            tracing::warn!(parent: &self.span, request_id, error = %e, "failed to write control response");
        }
    }

    async fn handle_permission(&self, request: &Payload) -> Result<Payload> {
        let callback = self
            .can_use_tool
            .as_ref()
            .ok_or_else(|| ClaudeError::control_protocol("canUseTool callback is not provided"))?;

        let (Some(tool_name), Some(input)) = (str_field(request, "tool_name"), request.get("input"))
        else {
            return Err(ClaudeError::control_protocol(
                "missing tool_name or input in permission request",
            ));
        };

        let suggestions: Vec<PermissionUpdate> = request
            .get("permission_suggestions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        let context = ToolPermissionContext::new(suggestions, self.cancel.child_token());
        let decision = callback
            .call(tool_name.to_string(), input.clone(), context)
            .await?;
        to_payload(&PermissionReply::new(decision, input.clone()), "permission callback")
    }

    async fn handle_hook(&self, request: &Payload) -> Result<Payload> {
        let callback_id = str_field(request, "callback_id").ok_or_else(|| {
            ClaudeError::control_protocol("missing callback_id in hook callback request")
        })?;

        let registered = self.state().hook_callbacks.get(callback_id).cloned();
        let (callback, timeout) = registered.ok_or_else(|| {
            ClaudeError::control_protocol(format!("no hook callback found for ID: {callback_id}"))
        })?;

        let input = request.get("input").cloned().unwrap_or(Value::Null);
        let tool_use_id = str_field(request, "tool_use_id").map(str::to_string);
        let token = self.cancel.child_token();
        let call = callback.call(input, tool_use_id, HookContext::new(token.clone()));

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(output) => output?,
                Err(_) => {
                    token.cancel();
                    return Err(ClaudeError::control_protocol(format!(
                        "hook callback {callback_id} timed out after {limit:?}"
                    )));
                }
            },
            None => call.await?,
        };
        to_payload(&output, "hook callback")
    }

    async fn handle_mcp(&self, request: &Payload) -> Result<Payload> {
        let (Some(server_name), Some(message)) =
            (str_field(request, "server_name"), request.get("message"))
        else {
            return Err(ClaudeError::control_protocol(
                "missing server_name or message in MCP request",
            ));
        };

        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let server = self.state().mcp_servers.get(server_name).cloned();
        let mcp_response = match server {
            None => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": JSONRPC_METHOD_NOT_FOUND,
                    "message": format!("Server '{server_name}' not found"),
                },
            }),
            Some(server) => match server.handle_message(message.clone()).await {
                Ok(response) => response,
                Err(err) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": JSONRPC_INTERNAL_ERROR,
                        "message": err.to_string(),
                    },
                }),
            },
        };

        let mut payload = Payload::new();
        payload.insert("mcp_response".to_string(), mcp_response);
        Ok(payload)
    }
}

// ============================================================================
// Control Router
// ============================================================================

/// Splits the transport's message stream into conversation messages and
/// control traffic, and correlates control requests with their responses.
///
/// In streaming mode the router performs the `initialize` handshake and can
/// send control requests. In one-shot mode it only answers inbound control
/// requests and forwards messages.
pub struct ControlRouter {
    shared: Arc<RouterShared>,
    streaming: bool,
    started: AtomicBool,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    messages: StdMutex<Option<mpsc::Receiver<Message>>>,
    init_result: Mutex<Option<Payload>>,
}

impl ControlRouter {
    /// Create a router over `transport`, taking callbacks from `options`
    pub fn new(
        transport: Arc<dyn Transport>,
        options: &ClaudeAgentOptions,
        streaming: bool,
        span: Span,
    ) -> Self {
        let state = RouterState {
            mcp_servers: options.mcp_servers.clone(),
            ..RouterState::default()
        };
        Self {
            shared: Arc::new(RouterShared {
                transport,
                span,
                state: StdMutex::new(state),
                next_request: AtomicU64::new(0),
                next_callback: AtomicU64::new(0),
                can_use_tool: options.can_use_tool.clone(),
                hooks: options.hooks.clone(),
                handlers: StdMutex::new(JoinSet::new()),
                cancel: CancellationToken::new(),
            }),
            streaming,
            started: AtomicBool::new(false),
            loop_task: Mutex::new(None),
            messages: StdMutex::new(None),
            init_result: Mutex::new(None),
        }
    }

    /// Whether the router runs in streaming mode
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Take the transport's message channel and start the message loop
    ///
    /// # Errors
    /// Fails if already started or the transport's channel is unavailable
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClaudeError::control_protocol("router already started"));
        }

        let inbound = self.shared.transport.read_messages().await?;
        let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        *self
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(rx);

        let shared = Arc::clone(&self.shared);
        *self.loop_task.lock().await = Some(tokio::spawn(shared.run(inbound, tx)));
        tracing::debug!(parent: &self.shared.span, streaming = self.streaming, "control router started");
        Ok(())
    }

    /// Take the consumer channel of conversation messages
    ///
    /// Returns `None` before `start` or if already taken.
    pub fn take_messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Run the `initialize` handshake, registering hook callbacks
    ///
    /// Returns `None` in one-shot mode. After a successful handshake the
    /// cached result is returned without contacting the CLI again.
    ///
    /// # Errors
    /// Returns a control protocol error if the request fails or is cancelled
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<Option<Payload>> {
        if !self.streaming {
            return Ok(None);
        }

        let mut cached = self.init_result.lock().await;
        if let Some(ref result) = *cached {
            return Ok(Some(result.clone()));
        }

        let request = self.shared.initialize_request();
        let result = self
            .shared
            .send_request(request, cancel)
            .await
            .map_err(|e| ClaudeError::control_protocol_with("initialization failed", e))?;

        tracing::debug!(parent: &self.shared.span, "control protocol initialized");
        *cached = Some(result.clone());
        Ok(Some(result))
    }

    /// Send a control request and wait for its response
    ///
    /// # Errors
    /// Fails outside streaming mode, if the write fails, if the CLI answers
    /// with an error, or with `Cancelled` if `cancel` fires first
    pub async fn send_control_request(
        &self,
        request: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload> {
        if !self.streaming {
            return Err(ClaudeError::control_protocol(
                "control requests require streaming mode",
            ));
        }
        self.shared.send_request(request, cancel).await
    }

    /// Register an SDK-hosted MCP server
    pub fn add_mcp_server(&self, name: impl Into<String>, server: Arc<dyn McpServer>) {
        self.shared.state().mcp_servers.insert(name.into(), server);
    }

    /// Number of control requests waiting for a response
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Stop the message loop and every handler task
    ///
    /// Closes the consumer channel and drops all pending requests. Safe to
    /// call more than once.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();

        if let Some(task) = self.loop_task.lock().await.take() {
            let _ = task.await;
        }

        let mut handlers = std::mem::take(&mut *self.shared.handlers());
        let drained = tokio::time::timeout(HANDLER_GRACE, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(parent: &self.shared.span, remaining = handlers.len(), "aborting control handlers");
            handlers.shutdown().await;
        }

        self.shared.state().pending.clear();
        tracing::debug!(parent: &self.shared.span, "control router stopped");
    }
}

impl Drop for ControlRouter {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        self.shared.handlers().abort_all();
    }
}
