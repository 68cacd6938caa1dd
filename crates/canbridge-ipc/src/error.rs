use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by [`DaemonClient`](crate::DaemonClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket could not be opened.
    #[error("failed to open websocket connection: {0}")]
    ConnectFailed(#[source] tungstenite::Error),

    /// The WebSocket did not open before the connect deadline.
    #[error("timed out opening websocket connection")]
    ConnectTimeout,

    /// A request was issued while no connection is established.
    #[error("not connected to daemon")]
    NotConnected,

    /// The connection closed while the request was still pending.
    #[error("connection closed while request was pending")]
    Disconnected,

    /// No matching response arrived before the request deadline.
    #[error("timed out waiting for daemon response")]
    ResponseTimeout,

    /// The outbound request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// A matched response did not carry the variant the request expects.
    #[error("unexpected response from daemon: {0}")]
    UnexpectedResponse(String),
}
