//! Integration tests for one-shot queries over an in-memory transport

mod support;

use std::sync::Arc;
use std::time::Duration;

use claude_agent_control::callbacks::FnPermissionCallback;
use claude_agent_control::types::PermissionResult;
use claude_agent_control::{
    ClaudeAgentOptions, ClaudeError, Message, SessionId, query_with_transport,
};
use futures::StreamExt;
use serde_json::json;
use support::{MockTransport, assistant_text, control_request, result_success};

async fn wait_for_close(mock: &MockTransport) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while mock.close_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transport was not closed");
}

#[tokio::test]
async fn test_one_shot_query_streams_until_result() -> anyhow::Result<()> {
    let mock = MockTransport::new();
    let stream = query_with_transport(
        "What is 2 + 2?",
        ClaudeAgentOptions::default(),
        mock.as_transport(),
    )
    .await?;

    let sent = mock.next_write().await;
    assert_eq!(
        sent,
        json!({
            "type": "user",
            "message": {"role": "user", "content": "What is 2 + 2?"},
            "parent_tool_use_id": null,
            "session_id": "default-session",
        })
    );

    mock.push(assistant_text("4")).await;
    mock.push(result_success()).await;

    let messages: Vec<Message> = stream.collect().await;
    assert_eq!(messages.len(), 2);
    assert!(matches!(messages[1], Message::Result(ref result) if result.result.as_deref() == Some("4")));
    assert_eq!(mock.close_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_resume_uses_session_id() -> anyhow::Result<()> {
    let mock = MockTransport::new();
    let options = ClaudeAgentOptions::builder()
        .resume(SessionId::from("sess-42"))
        .build();
    let _stream = query_with_transport("continue", options, mock.as_transport()).await?;

    let sent = mock.next_write().await;
    assert_eq!(sent["session_id"], "sess-42");
    Ok(())
}

#[tokio::test]
async fn test_one_shot_answers_permission_requests() {
    let callback = FnPermissionCallback::new(|_tool, _input, _ctx| {
        Box::pin(async { Ok(PermissionResult::deny("read only session")) })
    });
    let options = ClaudeAgentOptions::builder()
        .can_use_tool(Arc::new(callback) as _)
        .build();

    let mock = MockTransport::new();
    let stream = query_with_transport("delete tmp", options, mock.as_transport())
        .await
        .unwrap();
    mock.next_write().await;

    mock.push(control_request(
        "cli_1",
        json!({"subtype": "can_use_tool", "tool_name": "Bash", "input": {"command": "rm -r tmp"}}),
    ))
    .await;
    let reply = mock.next_write().await;
    assert_eq!(
        reply["response"]["response"],
        json!({"behavior": "deny", "message": "read only session"})
    );

    mock.push(result_success()).await;
    let messages: Vec<Message> = stream.collect().await;
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_empty_prompt_is_rejected_before_connect() {
    let mock = MockTransport::new();
    let result = query_with_transport("", ClaudeAgentOptions::default(), mock.as_transport()).await;
    assert!(matches!(result.err(), Some(ClaudeError::InvalidArgument(_))));
    assert!(!mock.is_closed());
    assert!(mock.try_next_write().await.is_none());
}

#[tokio::test]
async fn test_dropping_stream_early_stops_cli() {
    let mock = MockTransport::new();
    let stream = query_with_transport("long task", ClaudeAgentOptions::default(), mock.as_transport())
        .await
        .unwrap();
    mock.next_write().await;

    let mut stream = Box::pin(stream);
    mock.push(assistant_text("step 1")).await;
    let first = stream.next().await.unwrap();
    assert_eq!(first.message_type(), "assistant");
    drop(stream);

    wait_for_close(&mock).await;
    assert_eq!(mock.close_calls(), 1);
}

#[tokio::test]
async fn test_stream_ends_when_cli_exits_without_result() {
    let mock = MockTransport::new();
    let stream = query_with_transport("hi", ClaudeAgentOptions::default(), mock.as_transport())
        .await
        .unwrap();
    mock.next_write().await;

    mock.push(assistant_text("partial")).await;
    mock.end_stream();

    let messages: Vec<Message> = stream.collect().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(mock.close_calls(), 1);
}
