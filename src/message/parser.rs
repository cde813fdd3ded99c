//! Line decoder: discriminator dispatch with fail-closed handling of unknown types

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{ClaudeError, Result};
use crate::types::{
    AssistantMessage, ContentBlock, Message, ResultMessage, SessionId, StreamEvent, SystemKind,
    SystemMessage, UserContent, UserMessage,
};

/// Decode one line of CLI output.
///
/// Malformed JSON yields [`ClaudeError::JsonDecode`] carrying a truncated copy
/// of the line; an unknown `type` yields [`ClaudeError::MessageParse`] naming it.
///
/// # Errors
/// Returns an error if the line is not a known, well-formed message.
///
/// # Example
/// ```
/// use claude_agent_control::message::parse_message;
/// use claude_agent_control::types::Message;
///
/// let msg = parse_message(r#"{"type":"result","subtype":"success","session_id":"s1"}"#).unwrap();
/// assert!(matches!(msg, Message::Result(_)));
/// ```
pub fn parse_message(line: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        ClaudeError::json_decode("failed to decode message line", line, Some(Arc::new(e)))
    })?;
    parse_message_value(value).map_err(|err| match err {
        ClaudeError::JsonDecode {
            message, source, ..
        } => ClaudeError::json_decode(message, line, source),
        other => other,
    })
}

/// Decode an already-parsed JSON value.
///
/// # Errors
/// Returns an error if the value is not a known, well-formed message.
pub fn parse_message_value(value: Value) -> Result<Message> {
    let Value::Object(object) = value else {
        return Err(ClaudeError::message_parse(
            "message is not a JSON object",
            None,
        ));
    };

    let message_type = object
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match message_type.as_str() {
        "user" => parse_user(object).map(Message::User),
        "assistant" => parse_assistant(object).map(Message::Assistant),
        "system" => parse_system(object, SystemKind::System).map(Message::System),
        "control_request" => {
            parse_system(object, SystemKind::ControlRequest).map(Message::System)
        }
        "control_response" => {
            parse_system(object, SystemKind::ControlResponse).map(Message::System)
        }
        "result" => decode_as::<ResultMessage>(object, "result").map(Message::Result),
        "stream_event" => decode_as::<StreamEvent>(object, "stream_event").map(Message::StreamEvent),
        other => Err(ClaudeError::message_parse(
            "unknown message type",
            Some(other),
        )),
    }
}

/// Decode a single content block, rejecting unknown block types by name.
///
/// # Errors
/// Returns [`ClaudeError::MessageParse`] for an unknown `type` and
/// [`ClaudeError::JsonDecode`] when a known block is missing required fields.
pub fn parse_content_block(value: Value) -> Result<ContentBlock> {
    let block_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match block_type.as_str() {
        "text" | "thinking" | "tool_use" | "tool_result" => serde_json::from_value(value)
            .map_err(|e| {
                ClaudeError::json_decode(
                    format!("failed to decode {block_type} block"),
                    "",
                    Some(Arc::new(e)),
                )
            }),
        other => Err(ClaudeError::message_parse(
            "unknown content block type",
            Some(other),
        )),
    }
}

fn decode_as<T: DeserializeOwned>(object: Map<String, Value>, message_type: &str) -> Result<T> {
    serde_json::from_value(Value::Object(object)).map_err(|e| {
        ClaudeError::json_decode(
            format!("failed to decode {message_type} message"),
            "",
            Some(Arc::new(e)),
        )
    })
}

fn parse_blocks(values: Vec<Value>) -> Result<Vec<ContentBlock>> {
    values.into_iter().map(parse_content_block).collect()
}

/// Content of the nested `message` envelope, falling back to the top level.
fn take_content(object: &mut Map<String, Value>) -> Option<Value> {
    let nested = object
        .get_mut("message")
        .and_then(Value::as_object_mut)
        .and_then(|inner| inner.remove("content"));
    nested.or_else(|| object.remove("content"))
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_user(mut object: Map<String, Value>) -> Result<UserMessage> {
    let content = match take_content(&mut object) {
        Some(Value::String(text)) => UserContent::String(text),
        Some(Value::Array(blocks)) => UserContent::Blocks(parse_blocks(blocks)?),
        _ => {
            return Err(ClaudeError::message_parse(
                "content must be string or array of content blocks",
                Some("user"),
            ));
        }
    };

    Ok(UserMessage {
        content,
        parent_tool_use_id: string_field(&object, "parent_tool_use_id"),
        session_id: string_field(&object, "session_id").map(SessionId::from),
    })
}

fn parse_assistant(mut object: Map<String, Value>) -> Result<AssistantMessage> {
    let model = object
        .get("message")
        .and_then(|inner| inner.get("model"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| string_field(&object, "model"))
        .unwrap_or_default();

    let content = match take_content(&mut object) {
        Some(Value::Array(blocks)) => parse_blocks(blocks)?,
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            return Err(ClaudeError::message_parse(
                "assistant content must be an array of content blocks",
                Some("assistant"),
            ));
        }
    };

    Ok(AssistantMessage {
        content,
        model,
        parent_tool_use_id: string_field(&object, "parent_tool_use_id"),
        session_id: string_field(&object, "session_id").map(SessionId::from),
    })
}

fn parse_system(mut object: Map<String, Value>, kind: SystemKind) -> Result<SystemMessage> {
    object.remove("type");
    let mut message: SystemMessage = decode_as(object, kind.as_str())?;
    message.kind = kind;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentValue;
    use serde_json::json;

    #[test]
    fn test_text_block() {
        let block = parse_content_block(json!({"type": "text", "text": "Hello"}));
        assert_eq!(
            block.ok(),
            Some(ContentBlock::Text {
                text: "Hello".to_string()
            })
        );
    }

    #[test]
    fn test_tool_result_without_content() {
        let block = parse_content_block(json!({"type": "tool_result", "tool_use_id": "123"}));
        match block {
            Ok(ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            }) => {
                assert_eq!(tool_use_id, "123");
                assert!(content.is_none());
                assert!(is_error.is_none());
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_block_type_is_named() {
        let err = parse_content_block(json!({"type": "bogus"})).unwrap_err();
        assert!(err.is_message_parse());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_user_message_with_nested_tool_result() {
        let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"ok"}]}}"#;
        let Ok(Message::User(user)) = parse_message(line) else {
            panic!("expected a user message");
        };
        let UserContent::Blocks(blocks) = user.content else {
            panic!("expected block content");
        };
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0],
            ContentBlock::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: Some(ContentValue::String("ok".to_string())),
                is_error: None,
            }
        );
    }

    #[test]
    fn test_user_message_string_content() {
        let line = r#"{"type":"user","content":"hi there","session_id":"s1"}"#;
        let Ok(Message::User(user)) = parse_message(line) else {
            panic!("expected a user message");
        };
        assert_eq!(user.content, UserContent::String("hi there".to_string()));
        assert_eq!(user.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_user_message_rejects_other_content_shapes() {
        let err = parse_message(r#"{"type":"user","content":42}"#).unwrap_err();
        assert!(err.is_message_parse());
        assert!(err.to_string().contains("content must be string"));
    }

    #[test]
    fn test_assistant_prefers_nested_content() {
        let line = r#"{"type":"assistant","content":[{"type":"text","text":"top"}],"message":{"model":"claude-x","content":[{"type":"text","text":"nested"}]}}"#;
        let Ok(Message::Assistant(assistant)) = parse_message(line) else {
            panic!("expected an assistant message");
        };
        assert_eq!(assistant.model, "claude-x");
        assert_eq!(assistant.content.len(), 1);
        assert_eq!(assistant.content[0].as_text(), Some("nested"));
    }

    #[test]
    fn test_assistant_falls_back_to_top_level_content() {
        let line = r#"{"type":"assistant","model":"m","content":[{"type":"thinking","thinking":"hmm","signature":"sig"}]}"#;
        let Ok(Message::Assistant(assistant)) = parse_message(line) else {
            panic!("expected an assistant message");
        };
        assert_eq!(assistant.model, "m");
        assert_eq!(assistant.content[0].block_type(), "thinking");
    }

    #[test]
    fn test_control_envelopes_decode_as_system() {
        let line = r#"{"type":"control_request","request_id":"cli_1","request":{"subtype":"can_use_tool","tool_name":"Write","input":{}}}"#;
        let Ok(Message::System(msg)) = parse_message(line) else {
            panic!("expected a control envelope");
        };
        assert_eq!(msg.kind, SystemKind::ControlRequest);
        assert_eq!(msg.request_id.as_deref(), Some("cli_1"));
        assert!(msg.data.is_empty());
        assert_eq!(
            msg.request.and_then(|r| r.get("subtype").cloned()),
            Some(json!("can_use_tool"))
        );
    }

    #[test]
    fn test_system_message_keeps_extra_fields() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc","cwd":"/tmp"}"#;
        let Ok(Message::System(msg)) = parse_message(line) else {
            panic!("expected a system message");
        };
        assert_eq!(msg.subtype, "init");
        assert_eq!(msg.data.get("cwd"), Some(&json!("/tmp")));
        assert!(!msg.data.contains_key("type"));
    }

    #[test]
    fn test_unknown_message_type_is_named() {
        let err = parse_message(r#"{"type":"mystery"}"#).unwrap_err();
        assert!(err.is_message_parse());
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_malformed_json_keeps_truncated_snippet() {
        let line = format!("{{not json {}", "z".repeat(300));
        match parse_message(&line) {
            Err(ClaudeError::JsonDecode { raw, .. }) => {
                assert!(raw.starts_with("{not json"));
                assert!(raw.len() <= crate::error::RAW_SNIPPET_LIMIT + 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_field_types_are_decode_errors() {
        let err = parse_message(r#"{"type":"result","duration_ms":"slow"}"#).unwrap_err();
        assert!(err.is_json_decode());
    }

    #[test]
    fn test_encoded_messages_decode_to_equal_values() {
        let messages = vec![
            Message::User(UserMessage {
                content: UserContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_9".to_string(),
                    content: Some(ContentValue::Blocks(vec![json!({"type": "text", "text": "x"})])),
                    is_error: Some(true),
                }]),
                parent_tool_use_id: None,
                session_id: Some(SessionId::new("s")),
            }),
            Message::Assistant(AssistantMessage {
                content: vec![
                    ContentBlock::Text {
                        text: "hi".to_string(),
                    },
                    ContentBlock::ToolUse {
                        id: "toolu_2".to_string(),
                        name: "Bash".to_string(),
                        input: json!({"command": "ls"}).as_object().cloned().unwrap_or_default(),
                    },
                ],
                model: "claude-sonnet".to_string(),
                parent_tool_use_id: Some("toolu_1".to_string()),
                session_id: None,
            }),
            Message::System(SystemMessage {
                subtype: "warning".to_string(),
                data: json!({"text": "careful"}).as_object().cloned().unwrap_or_default(),
                ..Default::default()
            }),
            Message::Result(ResultMessage {
                subtype: "success".to_string(),
                duration_ms: 1200,
                duration_api_ms: 900,
                num_turns: 2,
                session_id: SessionId::new("s"),
                total_cost_usd: Some(0.25),
                result: Some("done".to_string()),
                ..Default::default()
            }),
            Message::StreamEvent(StreamEvent {
                uuid: "u-1".to_string(),
                session_id: SessionId::new("s"),
                event: json!({"type": "content_block_delta"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
                parent_tool_use_id: None,
            }),
        ];

        for message in messages {
            let line = serde_json::to_string(&message).unwrap();
            let decoded = parse_message(&line).unwrap();
            assert_eq!(decoded, message, "mismatch for {line}");
        }
    }
}
