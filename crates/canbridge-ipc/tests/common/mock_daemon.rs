//! Mock CAN bridge daemon for testing the client without a real daemon.
//!
//! Listens on a loopback TCP port, accepts WebSocket connections, and
//! drives the JSON protocol from the server side:
//! - records every request it receives (for wire-shape assertions)
//! - optionally answers with canned replies (see [`MockBehavior`])
//! - lets tests inject arbitrary raw frames and close the connection

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::StreamExt;
use serde_json::json;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// How the mock responds to recorded requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Answer every request with a canned reply.
    Scripted,
    /// Answer only `client_hello`; everything else is just recorded, so
    /// tests control replies via [`MockDaemon::inject`].
    HelloOnly,
    /// Record requests and never reply (timeout tests).
    Silent,
}

enum ServerCmd {
    Send(String),
    Close,
}

pub struct MockDaemon {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
    conn_tx: Arc<Mutex<Option<mpsc::UnboundedSender<ServerCmd>>>>,
}

impl MockDaemon {
    /// Bind a fresh loopback port and start accepting connections.
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock daemon");
        let addr = listener.local_addr().expect("mock daemon local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let conn_tx = Arc::new(Mutex::new(None));

        tokio::spawn(accept_loop(
            listener,
            behavior,
            Arc::clone(&requests),
            Arc::clone(&conn_tx),
        ));

        Self {
            addr,
            requests,
            conn_tx,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("ws://{}", self.addr)).expect("mock daemon url")
    }

    /// Push one raw text frame to the currently connected client.
    pub fn inject(&self, raw: impl Into<String>) {
        self.with_conn(ServerCmd::Send(raw.into()));
    }

    /// Close the current connection from the server side.
    pub fn close_connection(&self) {
        self.with_conn(ServerCmd::Close);
    }

    fn with_conn(&self, cmd: ServerCmd) {
        let guard = self.conn_tx.lock().expect("conn slot poisoned");
        let tx = guard.as_ref().expect("no client connected to mock daemon");
        let _ = tx.send(cmd);
    }

    /// Every request recorded so far, in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests poisoned").clone()
    }

    pub fn requests_of_type(&self, msg_type: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|req| req.get("type").and_then(Value::as_str) == Some(msg_type))
            .collect()
    }

    /// Wait until `count` requests of `msg_type` have been recorded.
    pub async fn wait_for_requests(&self, msg_type: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if self.requests_of_type(msg_type).len() >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} '{msg_type}' request(s); got {:?}",
                self.requests()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    behavior: MockBehavior,
    requests: Arc<Mutex<Vec<Value>>>,
    conn_tx: Arc<Mutex<Option<mpsc::UnboundedSender<ServerCmd>>>>,
) {
    while let Ok((stream, _peer)) = listener.accept().await {
        tokio::spawn(handle_connection(
            stream,
            behavior,
            Arc::clone(&requests),
            Arc::clone(&conn_tx),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    behavior: MockBehavior,
    requests: Arc<Mutex<Vec<Value>>>,
    conn_tx: Arc<Mutex<Option<mpsc::UnboundedSender<ServerCmd>>>>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    *conn_tx.lock().expect("conn slot poisoned") = Some(cmd_tx);

    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ServerCmd::Send(raw)) => {
                    if ws_tx.send(Message::Text(raw)).await.is_err() {
                        break;
                    }
                }
                Some(ServerCmd::Close) => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                None => break,
            },
            incoming = ws_rx.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    _ => break,
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                requests.lock().expect("requests poisoned").push(value.clone());
                for reply in scripted_replies(behavior, &value) {
                    if ws_tx.send(Message::Text(reply)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Canned replies mirroring the real daemon's answers.
fn scripted_replies(behavior: MockBehavior, request: &Value) -> Vec<String> {
    let msg_type = request.get("type").and_then(Value::as_str).unwrap_or_default();
    let reply = match behavior {
        MockBehavior::Silent => return Vec::new(),
        MockBehavior::HelloOnly if msg_type != "client_hello" => return Vec::new(),
        _ => match msg_type {
            "client_hello" => json!({
                "type": "hello_ack",
                "version": "0.9",
                "server_name": "can-bridge-daemon",
                "features": ["ws", "json", "stream"],
            }),
            "ping" => json!({
                "type": "pong",
                "id": request.get("id").cloned().unwrap_or(json!(0)),
            }),
            "list_ifaces" => json!({"type": "ifaces", "items": ["vcan0", "can0"]}),
            "subscribe" => json!({
                "type": "subscribed",
                "ifaces": request.get("ifaces").cloned().unwrap_or(json!([])),
            }),
            "unsubscribe" => json!({"type": "unsubscribed"}),
            "send_frame" => json!({"type": "send_ack", "ok": true}),
            other => json!({"type": "error", "message": format!("unknown request: {other}")}),
        },
    };
    vec![reply.to_string()]
}
