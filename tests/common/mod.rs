#![allow(dead_code)]

use async_trait::async_trait;
use deribit_rpc::core::errors::DeribitError;
use deribit_rpc::core::kernel::{HttpRequest, HttpResponse, HttpTransport, WsConnector, WsHandle};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// One request the mock exchange received
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub connection: usize,
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
}

#[derive(Default)]
struct ExchangeState {
    sent: Mutex<Vec<Sent>>,
    connections: Mutex<Vec<mpsc::UnboundedSender<Result<Message, DeribitError>>>>,
    connects: AtomicUsize,
    refuse: AtomicUsize,
    reject_auth: AtomicBool,
    drop_after: Mutex<Option<(usize, String)>>,
    auth_count: AtomicUsize,
    pongs: AtomicUsize,
}

/// In-memory Deribit WebSocket endpoint that answers every request with an id
#[derive(Clone, Default)]
pub struct MockExchange {
    state: Arc<ExchangeState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn WsConnector> {
        Arc::new(self.clone())
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.state.refuse.store(count, Ordering::SeqCst);
    }

    pub fn reject_auth(&self, reject: bool) {
        self.state.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Close `connection` right after answering its `method` request
    pub fn drop_after(&self, connection: usize, method: &str) {
        *self.state.drop_after.lock().unwrap() = Some((connection, method.to_string()));
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.state.connections.lock().unwrap().len()
    }

    pub fn pongs(&self) -> usize {
        self.state.pongs.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn methods_on(&self, connection: usize) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| s.connection == connection)
            .map(|s| s.method)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.sent().iter().filter(|s| s.method == method).count()
    }

    pub fn last(&self, method: &str) -> Option<Sent> {
        self.sent().into_iter().rev().find(|s| s.method == method)
    }

    /// Push a JSON message to the client on `connection`
    pub fn push(&self, connection: usize, message: Value) {
        self.push_frame(connection, Message::Text(message.to_string()));
    }

    pub fn push_frame(&self, connection: usize, frame: Message) {
        let connections = self.state.connections.lock().unwrap();
        connections[connection].unbounded_send(Ok(frame)).unwrap();
    }

    /// Abnormal close: the client sees its stream end
    pub fn drop_connection(&self, connection: usize) {
        let connections = self.state.connections.lock().unwrap();
        connections[connection].close_channel();
    }

    /// Deliver a transport error to the client on `connection`
    pub fn fail_connection(&self, connection: usize) {
        let connections = self.state.connections.lock().unwrap();
        let _ = connections[connection].unbounded_send(Err(DeribitError::ConnectionClosed(
            "connection reset by peer".to_string(),
        )));
    }
}

impl ExchangeState {
    fn reply(&self, id: u64, method: &str, params: &Value) -> Value {
        let result = match method {
            "public/auth" if self.reject_auth.load(Ordering::SeqCst) => {
                return json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": 13004, "message": "invalid_credentials"}
                });
            }
            "public/auth" => {
                let n = self.auth_count.fetch_add(1, Ordering::SeqCst) + 1;
                json!({
                    "access_token": format!("token-{}", n),
                    "refresh_token": format!("refresh-{}", n),
                    "expires_in": 900,
                    "scope": "connection mainaccount",
                    "token_type": "bearer"
                })
            }
            "public/hello" | "public/test" => json!({"version": "1.2.26"}),
            m if m.ends_with("/subscribe") => params["channels"].clone(),
            _ => json!("ok"),
        };
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }
}

#[async_trait]
impl WsConnector for MockExchange {
    async fn connect(&self, _url: &str) -> Result<WsHandle, DeribitError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .state
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DeribitError::NetworkError("connection refused".to_string()));
        }

        let (client_tx, mut from_client) = mpsc::unbounded::<Message>();
        let (to_client, client_rx) = mpsc::unbounded::<Result<Message, DeribitError>>();

        let connection = {
            let mut connections = self.state.connections.lock().unwrap();
            connections.push(to_client.clone());
            connections.len() - 1
        };

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.next().await {
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Pong(_) => {
                        state.pongs.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                    _ => continue,
                };
                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let id = request["id"].as_u64();
                let params = request["params"].clone();

                state.sent.lock().unwrap().push(Sent {
                    connection,
                    id,
                    method: method.clone(),
                    params: params.clone(),
                });

                if let Some(id) = id {
                    let reply = state.reply(id, &method, &params);
                    let _ = to_client.unbounded_send(Ok(Message::Text(reply.to_string())));
                }

                let drop_here = state.drop_after.lock().unwrap().as_ref()
                    == Some(&(connection, method.clone()));
                if drop_here {
                    to_client.close_channel();
                    break;
                }
            }
        });

        let sink = client_tx.sink_map_err(|e| DeribitError::NetworkError(e.to_string()));
        Ok(WsHandle::new(Box::pin(sink), Box::pin(client_rx)))
    }
}

/// HTTP transport: `public/auth` always succeeds, everything else follows a script
#[derive(Default)]
pub struct MockHttp {
    script: Mutex<VecDeque<HttpResponse>>,
    repeat: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    auth_calls: AtomicUsize,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue responses for non-auth requests, served in order
    pub fn then(&self, status: u16, body: impl Into<String>) -> &Self {
        self.script.lock().unwrap().push_back(HttpResponse {
            status,
            body: body.into(),
        });
        self
    }

    /// Serve this response once the script runs out
    pub fn always(&self, status: u16, body: impl Into<String>) -> &Self {
        *self.repeat.lock().unwrap() = Some(HttpResponse {
            status,
            body: body.into(),
        });
        self
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    /// Non-auth requests seen so far
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.url.ends_with("/public/auth"))
            .cloned()
            .collect()
    }

    pub fn bearer(request: &HttpRequest) -> Option<String> {
        request
            .headers
            .iter()
            .find(|(k, _)| k == "Authorization")
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, DeribitError> {
        let is_auth = request.url.ends_with("/public/auth");
        self.requests.lock().unwrap().push(request);

        if is_auth {
            let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(HttpResponse {
                status: 200,
                body: json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "access_token": format!("token-{}", n),
                        "refresh_token": format!("refresh-{}", n),
                        "expires_in": 900,
                        "scope": "connection",
                        "token_type": "bearer"
                    }
                })
                .to_string(),
            });
        }

        if let Some(response) = self.script.lock().unwrap().pop_front() {
            return Ok(response);
        }
        self.repeat
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DeribitError::NetworkError("no scripted response".to_string()))
    }
}

pub fn rpc_error(code: i64, message: &str) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "error": {"code": code, "message": message}}).to_string()
}

pub fn rpc_result(result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "Timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
