//! Connection profile: where to reach the daemon and what client name to
//! present in the handshake.
//!
//! The UI layer owns profile management; this module only resolves the two
//! values `connect()` needs, from explicit configuration or from the
//! environment with sensible defaults.

use tracing::warn;
use url::Url;

/// Environment override for the daemon WebSocket address.
pub const WS_ADDR_ENV: &str = "CANBRIDGE_WS_ADDR";

/// Environment override for the client display name sent in `client_hello`.
pub const CLIENT_NAME_ENV: &str = "CANBRIDGE_CLIENT_NAME";

/// The daemon's default WebSocket bind and path.
const DEFAULT_WS_ADDR: &str = "ws://127.0.0.1:9501/ws";

const DEFAULT_CLIENT_NAME: &str = "canbridge-ui";

/// Parameters consumed by [`DaemonClient`](crate::DaemonClient) when
/// connecting.
#[derive(Debug, Clone)]
pub struct ConnectionProfile {
    pub client_name: String,
    pub url: Url,
}

impl ConnectionProfile {
    pub fn new(client_name: impl Into<String>, url: Url) -> Self {
        Self {
            client_name: client_name.into(),
            url,
        }
    }

    /// Resolve a profile from `CANBRIDGE_WS_ADDR` / `CANBRIDGE_CLIENT_NAME`,
    /// falling back to the daemon's default address and a default client
    /// name. Unparseable or non-WebSocket addresses are ignored with a
    /// warning rather than surfaced as errors.
    pub fn from_env() -> Self {
        let url = std::env::var(WS_ADDR_ENV)
            .ok()
            .and_then(|raw| parse_ws_url(raw.trim()))
            .unwrap_or_else(default_url);
        let client_name = std::env::var(CLIENT_NAME_ENV)
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string());
        Self { client_name, url }
    }
}

fn parse_ws_url(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => Some(url),
        Ok(url) => {
            warn!(scheme = %url.scheme(), "ignoring daemon address with non-websocket scheme");
            None
        }
        Err(err) => {
            warn!(error = %err, "ignoring unparseable daemon address");
            None
        }
    }
}

#[allow(
    clippy::expect_used,
    reason = "the default daemon address is a known-good constant"
)]
fn default_url() -> Url {
    Url::parse(DEFAULT_WS_ADDR).expect("default daemon address parses")
}
