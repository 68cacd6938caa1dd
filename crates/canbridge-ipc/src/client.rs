//! WebSocket client for the CAN bridge daemon.
//!
//! One [`DaemonClient`] owns one WebSocket connection. `connect()` opens the
//! socket and performs the `client_hello`/`hello_ack` handshake; afterwards
//! unary requests (ping, list_ifaces, subscribe, unsubscribe, send_frame)
//! are multiplexed over the connection and correlated with their replies by
//! caller-supplied predicates, while streamed `frame` messages bypass the
//! correlation machinery and go to the registered frame handler.
//!
//! Reconnection is deliberately not provided; callers that want it build it
//! from repeated `connect()`/`close()` cycles.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::stream::SplitStream;
use futures_util::SinkExt;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::error::ClientError;
use crate::pending::PendingRequests;
use crate::pending::WaiterOutcome;
use crate::protocol;
use crate::protocol::ClientRequest;
use crate::protocol::DaemonResponse;
use crate::protocol::FrameEvent;
use crate::protocol::HelloAck;
use crate::protocol::IfaceList;
use crate::protocol::Pong;
use crate::protocol::SendAck;
use crate::protocol::SendFrame;
use crate::protocol::Subscribed;

/// Default budget for `connect()` and every unary request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Observer for streamed CAN frames.
pub type FrameHandler = Box<dyn FnMut(FrameEvent) + Send>;

/// Caller-side parameters for a `send_frame` request.
///
/// `brs` and `esi` default to `false` on the wire when left unset.
#[derive(Debug, Clone)]
pub struct FrameToSend {
    pub iface: String,
    pub arbitration_id: u32,
    pub is_fd: bool,
    pub brs: Option<bool>,
    pub esi: Option<bool>,
    /// Hex-encoded payload, no `0x` prefix; passed through verbatim.
    pub data_hex: String,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Client for the daemon's WebSocket JSON transport.
pub struct DaemonClient {
    url: Url,
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    conn: Option<Conn>,
    pending: PendingRequests,
    on_frame: Option<FrameHandler>,
    /// Bumped on every `connect()` and `close()`; read/write loops from a
    /// superseded connection observe the mismatch and leave state alone.
    generation: u64,
}

struct Conn {
    out_tx: mpsc::UnboundedSender<Message>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl DaemonClient {
    /// Create a client for the daemon at `url`. No I/O happens until
    /// [`connect`](Self::connect).
    pub fn new(url: Url) -> Self {
        Self {
            url,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Open the WebSocket and perform the `client_hello`/`hello_ack`
    /// handshake, returning the daemon's acknowledgement verbatim.
    ///
    /// One deadline (default 3000 ms) covers the socket open *and* the
    /// handshake; it is not restarted in between. A previous connection
    /// that was not closed is clobbered: its socket is dropped and any of
    /// its requests still pending run into their own timeouts. Call
    /// [`close`](Self::close) first to fail them promptly instead.
    pub async fn connect(
        &self,
        client_name: &str,
        timeout: Option<Duration>,
    ) -> Result<HelloAck, ClientError> {
        let budget = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let deadline = Instant::now() + budget;

        debug!(url = %self.url, client = client_name, "connecting to daemon");
        let (socket, _response) = timeout_at(deadline, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
            .map_err(ClientError::ConnectFailed)?;

        let (ws_tx, ws_rx) = socket.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let generation = {
            let mut state = self.shared.lock_state();
            state.generation += 1;
            state.conn = Some(Conn { out_tx });
            state.generation
        };

        // Queue the hello and register its waiter before the read loop
        // exists, so even a daemon that acknowledges eagerly cannot slip
        // its hello_ack past us.
        let hello = ClientRequest::ClientHello {
            client: client_name.to_string(),
            protocol: protocol::PROTOCOL.to_string(),
        };
        let (token, reply_rx) = self.enqueue(hello, |message| {
            matches!(message, DaemonResponse::HelloAck(_))
        })?;

        tokio::spawn(write_loop(ws_tx, out_rx));
        tokio::spawn(read_loop(ws_rx, Arc::clone(&self.shared), generation));

        let remaining = deadline.saturating_duration_since(Instant::now());
        let reply = self.await_reply(token, reply_rx, remaining).await?;
        match reply {
            DaemonResponse::HelloAck(ack) => {
                debug!(version = ?ack.version, server = ?ack.server_name, "daemon handshake complete");
                Ok(ack)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Close the connection and fail every pending request with
    /// [`ClientError::Disconnected`], in registration order.
    ///
    /// Transport shutdown is best-effort (the writer task sends the close
    /// frame once its channel drains); waiter cleanup is unconditional.
    /// Idempotent: closing an already-closed client is a no-op apart from
    /// clearing an empty waiter set. The client stays reusable via a fresh
    /// [`connect`](Self::connect).
    pub fn close(&self) {
        let mut state = self.shared.lock_state();
        state.generation += 1;
        if let Some(conn) = state.conn.take() {
            debug!(pending = state.pending.len(), "closing daemon connection");
            // Dropping the sender ends the write loop, which then performs
            // the WebSocket close handshake.
            drop(conn);
        }
        state.pending.fail_all(|| ClientError::Disconnected);
    }

    /// Install (or with `None` clear) the observer for streamed frames.
    ///
    /// At most one observer is active; installing a new one replaces the
    /// previous silently. The handler runs synchronously on the
    /// connection's read task, in frame arrival order, and must not call
    /// back into this client. Frames arriving with no handler installed
    /// are dropped.
    pub fn set_frame_handler(&self, handler: Option<FrameHandler>) {
        self.shared.lock_state().on_frame = handler;
    }

    /// Liveness probe; resolves with the pong echoing `id`.
    pub async fn ping(&self, id: u64, timeout: Option<Duration>) -> Result<Pong, ClientError> {
        let reply = self
            .issue(
                ClientRequest::Ping { id },
                move |message| matches!(message, DaemonResponse::Pong(pong) if pong.id == id),
                timeout,
            )
            .await?;
        match reply {
            DaemonResponse::Pong(pong) => Ok(pong),
            other => Err(unexpected(&other)),
        }
    }

    /// List the daemon's CAN interfaces.
    pub async fn list_ifaces(&self, timeout: Option<Duration>) -> Result<IfaceList, ClientError> {
        let reply = self
            .issue(
                ClientRequest::ListIfaces,
                |message| matches!(message, DaemonResponse::Ifaces(_)),
                timeout,
            )
            .await?;
        match reply {
            DaemonResponse::Ifaces(list) => Ok(list),
            other => Err(unexpected(&other)),
        }
    }

    /// Subscribe to streamed frames for `ifaces`.
    pub async fn subscribe(
        &self,
        ifaces: Vec<String>,
        timeout: Option<Duration>,
    ) -> Result<Subscribed, ClientError> {
        let reply = self
            .issue(
                ClientRequest::Subscribe { ifaces },
                |message| matches!(message, DaemonResponse::Subscribed(_)),
                timeout,
            )
            .await?;
        match reply {
            DaemonResponse::Subscribed(subscribed) => Ok(subscribed),
            other => Err(unexpected(&other)),
        }
    }

    /// Drop the active frame subscription.
    pub async fn unsubscribe(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        let reply = self
            .issue(
                ClientRequest::Unsubscribe,
                |message| matches!(message, DaemonResponse::Unsubscribed),
                timeout,
            )
            .await?;
        match reply {
            DaemonResponse::Unsubscribed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Transmit a CAN frame.
    ///
    /// A `send_ack` with `ok: false` resolves successfully; interpreting it
    /// as a logical failure is the caller's concern.
    pub async fn send_frame(
        &self,
        frame: FrameToSend,
        timeout: Option<Duration>,
    ) -> Result<SendAck, ClientError> {
        let request = ClientRequest::SendFrame(SendFrame {
            iface: frame.iface,
            id: frame.arbitration_id,
            is_fd: frame.is_fd,
            brs: frame.brs.unwrap_or(false),
            esi: frame.esi.unwrap_or(false),
            data_hex: frame.data_hex,
        });
        let reply = self
            .issue(
                request,
                |message| matches!(message, DaemonResponse::SendAck(_)),
                timeout,
            )
            .await?;
        match reply {
            DaemonResponse::SendAck(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }

    /// Send `request` and suspend until an inbound message satisfying
    /// `matches` arrives or the deadline passes.
    async fn issue<P>(
        &self,
        request: ClientRequest,
        matches: P,
        timeout_override: Option<Duration>,
    ) -> Result<DaemonResponse, ClientError>
    where
        P: Fn(&DaemonResponse) -> bool + Send + 'static,
    {
        let wait = timeout_override.unwrap_or(DEFAULT_TIMEOUT);
        let (token, reply_rx) = self.enqueue(request, matches)?;
        self.await_reply(token, reply_rx, wait).await
    }

    /// Queue `request` on the writer channel and register its waiter.
    ///
    /// Both happen under one lock acquisition, so a reply can never slip
    /// past an unregistered waiter.
    fn enqueue<P>(
        &self,
        request: ClientRequest,
        matches: P,
    ) -> Result<(u64, oneshot::Receiver<WaiterOutcome>), ClientError>
    where
        P: Fn(&DaemonResponse) -> bool + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut state = self.shared.lock_state();
        let conn = state.conn.as_ref().ok_or(ClientError::NotConnected)?;
        let text = serde_json::to_string(&request)?;
        conn.out_tx
            .send(Message::Text(text))
            .map_err(|_| ClientError::NotConnected)?;
        let token = state.pending.register(Box::new(matches), reply_tx);
        Ok((token, reply_rx))
    }

    /// Wait for a registered waiter's outcome; the deadline starts here,
    /// immediately after registration.
    async fn await_reply(
        &self,
        token: u64,
        mut reply_rx: oneshot::Receiver<WaiterOutcome>,
        wait: Duration,
    ) -> Result<DaemonResponse, ClientError> {
        match timeout(wait, &mut reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            // The reply channel died without an outcome; treat it like a
            // lost connection.
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_elapsed) => {
                let removed = self.shared.lock_state().pending.remove(token);
                if removed {
                    return Err(ClientError::ResponseTimeout);
                }
                // The waiter was resolved while the timer fired; its
                // outcome wins over the timeout.
                match reply_rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ClientError::ResponseTimeout),
                }
            }
        }
    }
}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        // Ensures an abandoned client tears its socket tasks down instead
        // of leaving them parked until the daemon closes the connection.
        self.close();
    }
}

fn unexpected(message: &DaemonResponse) -> ClientError {
    ClientError::UnexpectedResponse(format!("{message:?}"))
}

async fn write_loop(mut ws_tx: WsSink, mut out_rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = out_rx.recv().await {
        if let Err(err) = ws_tx.send(message).await {
            warn!(error = %err, "websocket write failed");
            break;
        }
    }
    // Best-effort close handshake; state cleanup happens on the read side.
    let _ = ws_tx.send(Message::Close(None)).await;
}

async fn read_loop(mut ws_rx: WsSource, shared: Arc<Shared>, generation: u64) {
    while let Some(next) = ws_rx.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "websocket read failed");
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Binary payloads and control frames are not protocol messages.
            _ => continue,
        };
        let Some(response) = protocol::decode_inbound(&text) else {
            continue;
        };

        let mut state = shared.lock_state();
        if state.generation != generation {
            // A newer connection owns the client; this loop is done.
            return;
        }
        match response {
            DaemonResponse::Frame(frame) => {
                if let Some(handler) = state.on_frame.as_mut() {
                    handler(frame);
                }
            }
            other => {
                if let Some(ignored) = state.pending.resolve(other) {
                    debug!(message = ?ignored, "no pending request matched daemon message");
                }
            }
        }
    }

    let mut state = shared.lock_state();
    if state.generation == generation {
        debug!(pending = state.pending.len(), "daemon connection lost");
        state.conn = None;
        state.pending.fail_all(|| ClientError::Disconnected);
    }
}
