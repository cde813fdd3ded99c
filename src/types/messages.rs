//! Message types exchanged with the CLI
//!
//! Decoding lives in [`crate::message`]; these types only describe the
//! shapes and know how to serialize themselves back to the wire form.

use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::identifiers::{RequestId, SessionId};

/// Known subtypes of `system` messages
pub mod system_subtype {
    /// Session initialization
    pub const INIT: &str = "init";
    /// Warning notice
    pub const WARNING: &str = "warning";
    /// Error notice
    pub const ERROR: &str = "error";
    /// Informational notice
    pub const INFO: &str = "info";
    /// Debug output
    pub const DEBUG: &str = "debug";
    /// Session ended
    pub const SESSION_END: &str = "session_end";
    /// Session information
    pub const SESSION_INFO: &str = "session_info";
}

// ============================================================================
// Content Blocks
// ============================================================================

/// Content of a tool result: plain text or a list of raw blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
    /// Plain text
    String(String),
    /// Raw content blocks
    Blocks(Vec<Value>),
}

/// Content block inside user and assistant messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text block
    Text {
        /// Text content
        text: String,
    },
    /// Extended thinking block
    Thinking {
        /// Thinking content
        thinking: String,
        /// Signature over the thinking content
        #[serde(default)]
        signature: String,
    },
    /// Tool invocation
    ToolUse {
        /// Tool use id, unique within the message
        id: String,
        /// Tool name
        name: String,
        /// Tool parameters
        #[serde(default)]
        input: Map<String, Value>,
    },
    /// Result of a tool invocation
    ToolResult {
        /// Id of the tool use this result answers
        tool_use_id: String,
        /// Result content
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ContentValue>,
        /// Whether the tool failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    /// Discriminator used on the wire
    #[must_use]
    pub fn block_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    /// Text of a text block
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// User message content: a plain string or a list of content blocks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Plain text
    String(String),
    /// Content blocks (typically tool results)
    Blocks(Vec<ContentBlock>),
}

/// Message authored by the user, or echoed tool results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    /// Message content
    pub content: UserContent,
    /// Parent tool use, for messages produced inside a sub-agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    /// Session the message belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Message produced by the model
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AssistantMessage {
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
    /// Model that produced the message
    pub model: String,
    /// Parent tool use, for messages produced inside a sub-agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    /// Session the message belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Wire discriminator of a [`SystemMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemKind {
    /// `system`
    #[default]
    System,
    /// `control_request`
    ControlRequest,
    /// `control_response`
    ControlResponse,
}

impl SystemKind {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::ControlRequest => "control_request",
            Self::ControlResponse => "control_response",
        }
    }
}

/// System notice or control-protocol envelope.
///
/// Control envelopes share this shape: `request_id` and `request` are set for
/// `control_request`, `response` for `control_response`. Any other top-level
/// field is kept in `data`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Wire discriminator
    #[serde(skip)]
    pub kind: SystemKind,
    /// Subtype, e.g. `init`
    #[serde(default)]
    pub subtype: String,
    /// Control request id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Control request payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Map<String, Value>>,
    /// Control response payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Map<String, Value>>,
    /// Remaining fields
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Terminal message of one query/response cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultMessage {
    /// Result subtype, e.g. `success`
    pub subtype: String,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Time spent in API calls
    pub duration_api_ms: u64,
    /// Whether the turn ended in error
    pub is_error: bool,
    /// Number of turns taken
    pub num_turns: u32,
    /// Session id
    pub session_id: SessionId,
    /// Total cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// Final result text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Partial streaming event, emitted with `include_partial_messages`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamEvent {
    /// Event uuid
    pub uuid: String,
    /// Session id
    pub session_id: SessionId,
    /// Raw API stream event
    pub event: Map<String, Value>,
    /// Parent tool use, for events produced inside a sub-agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// Any message read from the CLI
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// User message
    User(UserMessage),
    /// Assistant message
    Assistant(AssistantMessage),
    /// System message or control envelope
    System(SystemMessage),
    /// End of a response cycle
    Result(ResultMessage),
    /// Partial streaming event
    StreamEvent(StreamEvent),
}

impl Message {
    /// Wire discriminator of this message
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::System(msg) => msg.kind.as_str(),
            Self::Result(_) => "result",
            Self::StreamEvent(_) => "stream_event",
        }
    }

    /// True for the terminal message of a response cycle
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// True for control-protocol envelopes, which are never shown to consumers
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::System(SystemMessage {
                kind: SystemKind::ControlRequest | SystemKind::ControlResponse,
                ..
            })
        )
    }

    /// Whether a chat UI would normally render this message.
    ///
    /// System `init` and `debug` notices, results and stream events are
    /// bookkeeping and return false.
    #[must_use]
    pub fn should_display_to_user(&self) -> bool {
        match self {
            Self::User(_) | Self::Assistant(_) => true,
            Self::System(msg) => !matches!(
                msg.subtype.as_str(),
                system_subtype::INIT | system_subtype::DEBUG
            ),
            Self::Result(_) | Self::StreamEvent(_) => false,
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = match self {
            Self::User(msg) => serde_json::to_value(msg),
            Self::Assistant(msg) => serde_json::to_value(msg),
            Self::System(msg) => serde_json::to_value(msg),
            Self::Result(msg) => serde_json::to_value(msg),
            Self::StreamEvent(msg) => serde_json::to_value(msg),
        }
        .map_err(S::Error::custom)?;

        let mut object = match body {
            Value::Object(object) => object,
            _ => return Err(S::Error::custom("message did not serialize to an object")),
        };
        object.insert("type".to_string(), Value::from(self.message_type()));
        object.serialize(serializer)
    }
}
