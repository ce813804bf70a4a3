//! Mock appliance server for tests.
//!
//! Speaks just enough of the middleware protocol to exercise the client:
//! JSON-RPC 2.0 over WebSocket, `auth.login_with_api_key`, `core.ping`,
//! and per-method canned or computed responses. Requests are recorded for
//! assertions; replies can be delayed with deterministic jitter so
//! concurrent calls complete out of order.
//!
//! Lives in the library (rather than a test module) because the
//! orchestration crate's integration tests drive it too.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RpcError;

/// A canned reply for one method.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    /// The `result` value; `None` serializes as `null`.
    pub result: Option<Value>,
    /// The `error` value; takes precedence over `result`.
    pub error: Option<RpcError>,
}

impl MockResponse {
    /// A successful reply carrying `result`.
    pub fn ok(result: impl Serialize) -> Self {
        Self {
            result: Some(serde_json::to_value(result).expect("mock result must serialize")),
            error: None,
        }
    }

    /// An error reply.
    pub fn err(code: i64, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// An error reply with a `data` payload.
    pub fn err_with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }
}

/// A request the mock received, minus authentication traffic.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Method name.
    pub method: String,
    /// Positional parameters as sent.
    pub params: Value,
}

/// Dynamic response generator: `(method, params) -> reply`.
pub type ResponseFn = dyn Fn(&str, &Value) -> MockResponse + Send + Sync;

#[derive(Debug, Deserialize)]
struct IncomingRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

struct MockState {
    responses: Mutex<HashMap<String, MockResponse>>,
    response_fn: Mutex<Option<Arc<ResponseFn>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    api_key: Mutex<String>,
    auth_failure: AtomicBool,
    connection_count: AtomicUsize,
    reply_delay: Mutex<Option<Duration>>,
    reply_jitter: Mutex<Option<Duration>>,
    reply_seq: AtomicU64,
    conn_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Mock middleware server bound to a random local port.
pub struct MockServer {
    url: String,
    state: Arc<MockState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MockServer {
    /// Binds and starts serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        let url = format!("ws://{}", addr);

        let state = Arc::new(MockState {
            responses: Mutex::new(HashMap::new()),
            response_fn: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            api_key: Mutex::new("test-api-key".to_string()),
            auth_failure: AtomicBool::new(false),
            connection_count: AtomicUsize::new(0),
            reply_delay: Mutex::new(None),
            reply_jitter: Mutex::new(None),
            reply_seq: AtomicU64::new(0),
            conn_tasks: Mutex::new(Vec::new()),
        });

        let server = Self {
            url,
            state: Arc::clone(&state),
            tasks: Mutex::new(Vec::new()),
        };

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_state.connection_count.fetch_add(1, Ordering::SeqCst);
                let conn_state = Arc::clone(&accept_state);
                let handle = tokio::spawn(handle_connection(stream, Arc::clone(&conn_state)));
                let mut tasks = conn_state.conn_tasks.lock().unwrap();
                tasks.retain(|t| !t.is_finished());
                tasks.push(handle);
            }
        });
        server.tasks.lock().unwrap().push(accept);
        server
    }

    /// The `ws://` URL clients should dial.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Expected API key; defaults to `test-api-key`.
    pub fn set_api_key(&self, key: impl Into<String>) {
        *self.state.api_key.lock().unwrap() = key.into();
    }

    /// Makes every login attempt fail with an RPC error.
    pub fn set_auth_failure(&self, fail: bool) {
        self.state.auth_failure.store(fail, Ordering::SeqCst);
    }

    /// Registers a canned reply for a method.
    pub fn set_response(&self, method: impl Into<String>, response: MockResponse) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(method.into(), response);
    }

    /// Registers a dynamic response generator, consulted before the canned
    /// replies.
    pub fn set_response_fn<F>(&self, f: F)
    where
        F: Fn(&str, &Value) -> MockResponse + Send + Sync + 'static,
    {
        *self.state.response_fn.lock().unwrap() = Some(Arc::new(f));
    }

    /// Delays every reply by a fixed duration.
    pub fn set_reply_delay(&self, delay: Duration) {
        *self.state.reply_delay.lock().unwrap() = Some(delay);
    }

    /// Delays each reply by a deterministic multiple of `base` so
    /// concurrent responses interleave out of order.
    pub fn set_reply_jitter(&self, base: Duration) {
        *self.state.reply_jitter.lock().unwrap() = Some(base);
    }

    /// All recorded requests (authentication traffic excluded).
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Recorded requests for one method.
    pub fn requests_for(&self, method: &str) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Forgets all recorded requests.
    pub fn clear_requests(&self) {
        self.state.requests.lock().unwrap().clear();
    }

    /// How many WebSocket connections have been accepted.
    pub fn connection_count(&self) -> usize {
        self.state.connection_count.load(Ordering::SeqCst)
    }

    /// Severs every live connection while continuing to accept new ones;
    /// simulates involuntary transport loss.
    pub fn drop_connections(&self) {
        for task in self.state.conn_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Stops the server and drops all connections.
    pub fn close(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.drop_connections();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, state: Arc<MockState>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (sink, mut reader) = ws.split();
    let sink = Arc::new(tokio::sync::Mutex::new(sink));

    while let Some(Ok(message)) = reader.next().await {
        let text = match message {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(request) = serde_json::from_str::<IncomingRequest>(&text) else {
            continue;
        };

        if request.method != "auth.login_with_api_key" {
            state.requests.lock().unwrap().push(RecordedRequest {
                method: request.method.clone(),
                params: request.params.clone(),
            });
        }

        // Notifications carry no id and get no reply.
        let Some(id) = request.id.clone() else {
            continue;
        };

        let reply = build_reply(&state, &request, id);
        let mut delay = state.reply_delay.lock().unwrap().unwrap_or(Duration::ZERO);
        if let Some(base) = *state.reply_jitter.lock().unwrap() {
            let seq = state.reply_seq.fetch_add(1, Ordering::SeqCst);
            delay += base * ((seq % 5) as u32);
        }

        let reply_sink = Arc::clone(&sink);
        tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            let mut sink = reply_sink.lock().await;
            let _ = sink.send(Message::text(reply.to_string())).await;
        });
    }
}

fn build_reply(state: &MockState, request: &IncomingRequest, id: Value) -> Value {
    if request.method == "auth.login_with_api_key" {
        if state.auth_failure.load(Ordering::SeqCst) {
            return error_frame(
                id,
                &RpcError {
                    code: -1,
                    message: "Authentication failed".to_string(),
                    data: None,
                },
            );
        }
        let presented = request
            .params
            .as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let expected = state.api_key.lock().unwrap().clone();
        return result_frame(id, json!(presented == expected));
    }

    if request.method == "core.ping" {
        return result_frame(id, json!("pong"));
    }

    let response_fn = state.response_fn.lock().unwrap().clone();
    if let Some(f) = response_fn {
        return response_to_frame(id, f(&request.method, &request.params));
    }

    if let Some(canned) = state.responses.lock().unwrap().get(&request.method) {
        return response_to_frame(id, canned.clone());
    }

    result_frame(id, Value::Null)
}

fn response_to_frame(id: Value, response: MockResponse) -> Value {
    match response.error {
        Some(err) => error_frame(id, &err),
        None => result_frame(id, response.result.unwrap_or(Value::Null)),
    }
}

fn result_frame(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_frame(id: Value, error: &RpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}
