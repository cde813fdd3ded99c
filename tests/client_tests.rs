//! Integration tests for the session client over an in-memory transport

mod support;

use std::sync::Arc;
use std::time::Duration;

use claude_agent_control::{
    ClaudeAgentOptions, ClaudeError, ClaudeSDKClient, ClientState, Message, PermissionMode,
    Transport,
};
use futures::StreamExt;
use serde_json::json;
use support::{MockTransport, assistant_text, result_success};

async fn connected_client(mock: &Arc<MockTransport>) -> ClaudeSDKClient {
    let mut client =
        ClaudeSDKClient::with_transport(ClaudeAgentOptions::default(), mock.as_transport())
            .unwrap();
    let (connected, _) = tokio::join!(client.connect(), mock.accept_initialize());
    connected.unwrap();
    client
}

#[tokio::test]
async fn test_connect_query_receive_close() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;
    assert_eq!(client.state(), ClientState::Connected);
    assert!(client.is_connected());

    client.query("What is 2 + 2?").await.unwrap();
    assert_eq!(
        mock.next_write().await,
        json!({
            "type": "user",
            "message": {"role": "user", "content": "What is 2 + 2?"},
            "parent_tool_use_id": null,
            "session_id": "default",
        })
    );

    mock.push(assistant_text("4")).await;
    mock.push(result_success()).await;
    // Belongs to the next turn
    mock.push(assistant_text("later")).await;

    let messages: Vec<Message> = client.receive_response().unwrap().collect().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message_type(), "assistant");
    assert!(messages[1].is_result());

    let next: Vec<Message> = {
        let mut stream = Box::pin(client.receive_response().unwrap());
        let first = stream.next().await.unwrap();
        vec![first]
    };
    assert_eq!(next[0].message_type(), "assistant");

    client.close().await.unwrap();
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(mock.close_calls(), 1);
}

#[tokio::test]
async fn test_structured_content_is_sent_verbatim() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;

    let content = json!([
        {"type": "text", "text": "Describe this image"},
        {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBOR"}},
    ]);
    client.query_with_content(content.clone()).await.unwrap();
    let sent = mock.next_write().await;
    assert_eq!(sent["message"]["content"], content);

    for empty in [json!(null), json!(""), json!([])] {
        let err = client.query_with_content(empty).await.unwrap_err();
        assert!(matches!(err, ClaudeError::InvalidArgument(_)));
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_query_before_connect_fails() {
    let mock = MockTransport::new();
    let client =
        ClaudeSDKClient::with_transport(ClaudeAgentOptions::default(), mock.as_transport())
            .unwrap();

    let err = client.query("hello").await.unwrap_err();
    assert!(err.is_connection());
    assert!(err.to_string().contains("not connected"));
    assert!(client.receive_response().is_err());
    assert!(client.interrupt().await.is_err());
}

#[tokio::test]
async fn test_empty_prompt_is_rejected() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;
    let err = tokio_test::assert_err!(client.query("").await);
    assert!(matches!(err, ClaudeError::InvalidArgument(_)));
    assert!(mock.try_next_write().await.is_none());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_twice_fails() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;
    let err = client.connect().await.unwrap_err();
    assert!(err.is_control_protocol());
    assert!(err.to_string().contains("already connected"));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;

    tokio_test::assert_ok!(client.close().await);
    tokio_test::assert_ok!(client.close().await);
    assert_eq!(mock.close_calls(), 1);

    let err = client.connect().await.unwrap_err();
    assert!(err.is_connection());
    assert!(client.query("hello").await.is_err());
}

#[tokio::test]
async fn test_close_before_connect_skips_transport() {
    let mock = MockTransport::new();
    let mut client =
        ClaudeSDKClient::with_transport(ClaudeAgentOptions::default(), mock.as_transport())
            .unwrap();
    client.close().await.unwrap();
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(mock.close_calls(), 0);
}

#[tokio::test]
async fn test_close_reports_process_error() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;
    mock.close_with(ClaudeError::process("Claude CLI exited with an error", Some(1)));

    let err = client.close().await.unwrap_err();
    assert!(err.is_process());
    assert_eq!(err.exit_code(), Some(1));
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn test_startup_error_surfaces_on_connect() {
    let mock = MockTransport::failing_with(ClaudeError::session_not_found(
        "abc-123",
        "Claude CLI could not find this conversation.",
    ));
    let mut client =
        ClaudeSDKClient::with_transport(ClaudeAgentOptions::default(), mock.as_transport())
            .unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(err.is_session_not_found());
    assert_eq!(err.session_id(), Some("abc-123"));
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(mock.close_calls(), 1);
}

#[tokio::test]
async fn test_rejected_handshake_closes_client() {
    let mock = MockTransport::new();
    let mut client =
        ClaudeSDKClient::with_transport(ClaudeAgentOptions::default(), mock.as_transport())
            .unwrap();

    let (connected, ()) = tokio::join!(client.connect(), async {
        let request = mock.next_write().await;
        mock.respond_error(&request, "unsupported protocol").await;
    });
    let err = connected.unwrap_err();
    assert!(err.is_control_protocol());
    assert!(err.to_string().contains("failed to initialize control protocol"));
    assert!(err.chain().any(|e| e.to_string().contains("unsupported protocol")));
    assert_eq!(client.state(), ClientState::Closed);
    assert!(mock.is_closed());
}

#[tokio::test]
async fn test_connect_fails_when_cli_exits_during_handshake() {
    let mock = MockTransport::new();
    let mut client =
        ClaudeSDKClient::with_transport(ClaudeAgentOptions::default(), mock.as_transport())
            .unwrap();

    let (connected, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(3), client.connect()),
        async {
            mock.next_write().await;
            mock.on_error(ClaudeError::process("Claude CLI exited with an error", Some(1)));
            mock.end_stream();
        }
    );
    let err = connected
        .expect("connect should not hang after the CLI exits")
        .unwrap_err();
    assert!(err.is_control_protocol());
    assert!(err.is_process());
    assert_eq!(err.exit_code(), Some(1));
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn test_interrupt_and_permission_mode_requests() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;

    let (interrupted, ()) = tokio::join!(client.interrupt(), async {
        let request = mock.next_write().await;
        assert_eq!(request["request"], json!({"subtype": "interrupt"}));
        mock.respond(&request, json!({})).await;
    });
    interrupted.unwrap();

    let (changed, ()) = tokio::join!(client.set_permission_mode(PermissionMode::AcceptEdits), async {
        let request = mock.next_write().await;
        assert_eq!(
            request["request"],
            json!({"subtype": "set_permission_mode", "mode": "acceptEdits"})
        );
        mock.respond_error(&request, "mode locked by policy").await;
    });
    let err = changed.unwrap_err();
    assert!(err.to_string().contains("mode locked by policy"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_cancels_waiting_stream() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;
    let token = client.cancellation_token();

    let mut stream = Box::pin(client.receive_response().unwrap());
    token.cancel();
    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("stream should end after cancellation");
    assert!(next.is_none());
    drop(stream);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_ends_when_cli_exits() {
    let mock = MockTransport::new();
    let mut client = connected_client(&mock).await;

    mock.push(assistant_text("partial")).await;
    mock.on_error(ClaudeError::process("Claude CLI exited unexpectedly", Some(2)));
    mock.end_stream();

    let messages: Vec<Message> = client.receive_response().unwrap().collect().await;
    assert_eq!(messages.len(), 1);
    let err = client.transport_error().unwrap();
    assert_eq!(err.exit_code(), Some(2));

    client.close().await.unwrap();
}
