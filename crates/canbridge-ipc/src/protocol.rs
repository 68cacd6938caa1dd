//! Wire protocol for the CAN bridge daemon's WebSocket JSON transport.
//!
//! One JSON object per text frame, discriminated by a `type` field:
//! `{ "type": "ping", "id": 1 }`. Requests and responses are modeled as
//! serde internally tagged enums so the discriminator is validated during
//! decoding and unknown or malformed payloads never reach callers.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

/// Fixed protocol token carried by `client_hello`.
pub const PROTOCOL: &str = "json";

/// Requests sent *to* the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Handshake greeting; the daemon answers with `hello_ack`.
    ClientHello { client: String, protocol: String },

    /// Liveness test; the daemon echoes `id` back in `pong`.
    Ping { id: u64 },

    /// Ask the daemon for available CAN interfaces.
    ListIfaces,

    /// Subscribe to streamed frames for the given interfaces.
    Subscribe { ifaces: Vec<String> },

    /// Drop the active frame subscription.
    Unsubscribe,

    /// Transmit a CAN frame on one of the daemon's interfaces.
    SendFrame(SendFrame),
}

/// Wire shape of a `send_frame` request.
///
/// `data_hex` is passed through verbatim, without a `0x` prefix and without
/// case normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendFrame {
    pub iface: String,
    /// CAN arbitration id.
    pub id: u32,
    pub is_fd: bool,
    pub brs: bool,
    pub esi: bool,
    pub data_hex: String,
}

/// Messages received *from* the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    /// Handshake acknowledgement.
    HelloAck(HelloAck),

    /// Ping response.
    Pong(Pong),

    /// List of available CAN interfaces.
    Ifaces(IfaceList),

    /// Subscription acknowledgement.
    Subscribed(Subscribed),

    /// Unsubscription acknowledgement.
    Unsubscribed,

    /// Outcome of a `send_frame` request.
    SendAck(SendAck),

    /// Unsolicited streamed CAN frame.
    Frame(FrameEvent),

    /// Generic daemon-side error (protocol, parsing, ...).
    Error(ErrorReply),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfaceList {
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A captured or transmitted CAN frame streamed by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub ts_ms: u64,
    pub iface: String,
    pub dir: Direction,
    /// CAN arbitration id.
    pub id: u32,
    pub is_fd: bool,
    pub data_hex: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub message: String,
}

impl FrameEvent {
    /// Decode `data_hex` into raw payload bytes.
    ///
    /// Returns `None` when the payload is not valid hex (odd length or
    /// non-hex characters). The wire string itself is kept untouched.
    pub fn data(&self) -> Option<Vec<u8>> {
        let raw = self.data_hex.as_bytes();
        if raw.len() % 2 != 0 {
            return None;
        }
        let mut out = Vec::with_capacity(raw.len() / 2);
        for pair in raw.chunks_exact(2) {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            out.push(((hi << 4) | lo) as u8);
        }
        Some(out)
    }
}

/// Decode one inbound text frame into a [`DaemonResponse`].
///
/// Anything that is not a well-formed daemon message (undecodable JSON,
/// a non-object, a missing or non-string `type`, an unknown `type`, or a
/// known `type` with malformed fields) is dropped here and never surfaces
/// to a caller.
pub fn decode_inbound(raw: &str) -> Option<DaemonResponse> {
    match serde_json::from_str(raw) {
        Ok(message) => Some(message),
        Err(err) => {
            debug!(error = %err, "dropping undecodable daemon message");
            None
        }
    }
}
