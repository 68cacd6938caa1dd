//! WebSocket JSON protocol and client for the CAN bridge daemon.
//!
//! The daemon multiplexes two kinds of traffic over one WebSocket
//! connection: unary request/response exchanges (ping, list_ifaces,
//! subscribe, unsubscribe, send_frame) and an unsolicited stream of
//! captured/transmitted CAN frames. [`DaemonClient`] owns the connection,
//! performs the `client_hello`/`hello_ack` handshake, correlates replies
//! with requests via caller-supplied predicates, and hands streamed frames
//! to an optional observer callback.
//!
//! Correlation is FIFO-first-match over the pending requests: responses
//! carry no universal request id, so predicates must discriminate (pongs
//! are matched on their echoed id). Two concurrent requests whose replies
//! are indistinguishable resolve in the order they were issued; see
//! [`DaemonClient`] for the details of this deliberate simplification.
//!
//! ```no_run
//! use canbridge_ipc::{ConnectionProfile, DaemonClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), canbridge_ipc::ClientError> {
//!     let profile = ConnectionProfile::from_env();
//!     let client = DaemonClient::new(profile.url.clone());
//!
//!     let ack = client.connect(&profile.client_name, None).await?;
//!     tracing::info!(server = ?ack.server_name, "connected");
//!
//!     let pong = client.ping(1, None).await?;
//!     assert_eq!(pong.id, 1);
//!
//!     client.set_frame_handler(Some(Box::new(|frame| {
//!         tracing::info!(iface = %frame.iface, id = frame.id, "frame");
//!     })));
//!     client.subscribe(vec!["can0".to_string()], None).await?;
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod pending;
pub mod profile;
pub mod protocol;

pub use client::DaemonClient;
pub use client::FrameHandler;
pub use client::FrameToSend;
pub use client::DEFAULT_TIMEOUT;
pub use error::ClientError;
pub use profile::ConnectionProfile;
pub use protocol::DaemonResponse;
pub use protocol::Direction;
pub use protocol::ErrorReply;
pub use protocol::FrameEvent;
pub use protocol::HelloAck;
pub use protocol::IfaceList;
pub use protocol::Pong;
pub use protocol::SendAck;
pub use protocol::Subscribed;

pub type Result<T> = std::result::Result<T, ClientError>;
