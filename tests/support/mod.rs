//! In-memory transport shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use claude_agent_control::{ClaudeError, Message, Result, Transport, parse_message};
use serde_json::{Value, json};
use tokio::sync::mpsc;

const WRITE_WAIT: Duration = Duration::from_secs(5);

/// Log to the test output; filter with `RUST_LOG=claude_agent_control=debug`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transport backed by channels: tests push CLI lines in and read SDK lines out
pub struct MockTransport {
    inbound_tx: Mutex<Option<mpsc::Sender<Message>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    writes_tx: mpsc::UnboundedSender<Value>,
    writes_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    connected: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    error: Mutex<Option<ClaudeError>>,
    close_result: Mutex<Option<ClaudeError>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        init_tracing();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            writes_tx,
            writes_rx: tokio::sync::Mutex::new(writes_rx),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            error: Mutex::new(None),
            close_result: Mutex::new(None),
        })
    }

    /// Transport whose CLI reports `err` right after start
    pub fn failing_with(err: ClaudeError) -> Arc<Self> {
        let mock = Self::new();
        *mock.error.lock().unwrap() = Some(err);
        mock
    }

    /// Make `close` return `err`
    pub fn close_with(&self, err: ClaudeError) {
        *self.close_result.lock().unwrap() = Some(err);
    }

    pub fn as_transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::clone(self) as Arc<dyn Transport>
    }

    /// Deliver one CLI line
    pub async fn push(&self, value: Value) {
        let message = parse_message(&value.to_string()).expect("test line must parse");
        let tx = self.inbound_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(message).await;
        }
    }

    /// Simulate the CLI closing stdout
    pub fn end_stream(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    /// Next line written by the SDK, parsed as JSON
    pub async fn next_write(&self) -> Value {
        let mut rx = self.writes_rx.lock().await;
        tokio::time::timeout(WRITE_WAIT, rx.recv())
            .await
            .expect("timed out waiting for a write")
            .expect("write channel closed")
    }

    /// A write that is already queued, if any
    pub async fn try_next_write(&self) -> Option<Value> {
        self.writes_rx.lock().await.try_recv().ok()
    }

    /// Answer a control request with success
    pub async fn respond(&self, request: &Value, response: Value) {
        let request_id = request["request_id"].clone();
        self.push(json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": response,
            }
        }))
        .await;
    }

    /// Answer a control request with an error
    pub async fn respond_error(&self, request: &Value, error: &str) {
        let request_id = request["request_id"].clone();
        self.push(json!({
            "type": "control_response",
            "response": {
                "subtype": "error",
                "request_id": request_id,
                "error": error,
            }
        }))
        .await;
    }

    /// Wait for the `initialize` request and acknowledge it
    pub async fn accept_initialize(&self) -> Value {
        let request = self.next_write().await;
        assert_eq!(request["type"], "control_request");
        assert_eq!(request["request"]["subtype"], "initialize");
        self.respond(&request, json!({"commands": []})).await;
        request
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClaudeError::connection("transport is closed"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, line: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(ClaudeError::connection("transport is not ready for writing"));
        }
        let value: Value = serde_json::from_str(line).expect("SDK wrote invalid JSON");
        let _ = self.writes_tx.send(value);
        Ok(())
    }

    async fn read_messages(&self) -> Result<mpsc::Receiver<Message>> {
        self.inbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ClaudeError::connection("message stream already taken"))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.end_stream();
        match self.close_result.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn on_error(&self, err: ClaudeError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<ClaudeError> {
        self.error.lock().unwrap().clone()
    }
}

pub fn assistant_text(text: &str) -> Value {
    json!({
        "type": "assistant",
        "message": {
            "model": "claude-sonnet-4-5",
            "content": [{"type": "text", "text": text}],
        },
        "session_id": "s-1",
    })
}

pub fn result_success() -> Value {
    json!({
        "type": "result",
        "subtype": "success",
        "duration_ms": 1200,
        "duration_api_ms": 900,
        "is_error": false,
        "num_turns": 1,
        "session_id": "s-1",
        "result": "4",
    })
}

pub fn control_request(request_id: &str, request: Value) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}
