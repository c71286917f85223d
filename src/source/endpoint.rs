use crate::runtime::config::FollowMode;
use anyhow::{bail, Result};
use std::fmt;

/// Transport selected by an RPC endpoint URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Http,
    Https,
    WebSocket,
    WebSocketSecure,
}

impl EndpointKind {
    /// Classifies `url` by its scheme.
    pub fn detect(url: &str) -> Result<Self> {
        let url = url.trim();
        let lowered = url.to_ascii_lowercase();
        let kind = if lowered.starts_with("https://") {
            EndpointKind::Https
        } else if lowered.starts_with("http://") {
            EndpointKind::Http
        } else if lowered.starts_with("wss://") {
            EndpointKind::WebSocketSecure
        } else if lowered.starts_with("ws://") {
            EndpointKind::WebSocket
        } else {
            bail!(
                "unsupported endpoint {url:?}; supported schemes are http://, https://, ws:// and wss://"
            );
        };
        Ok(kind)
    }

    /// Whether the transport can push new-head notifications.
    pub fn supports_subscriptions(self) -> bool {
        matches!(self, EndpointKind::WebSocket | EndpointKind::WebSocketSecure)
    }

    /// Follow mode implied by the transport.
    pub fn follow_mode(self) -> FollowMode {
        if self.supports_subscriptions() {
            FollowMode::Subscription
        } else {
            FollowMode::Polling
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EndpointKind::Http => "HTTP",
            EndpointKind::Https => "HTTPS",
            EndpointKind::WebSocket => "WebSocket",
            EndpointKind::WebSocketSecure => "WebSocket Secure",
        };
        f.write_str(label)
    }
}
