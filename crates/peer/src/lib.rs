//! Peer side of p2pburger.
//!
//! A peer joins a room on the relay, negotiates a direct transport with
//! the other occupant through relayed handshake messages, and then moves
//! one file over that transport's data channel.
//!
//! The transport itself is abstract ([`PeerTransport`]). [`WebRtcFactory`]
//! connects two processes over WebRTC; [`loopback`] provides an
//! in-process pair for tests.

pub mod loopback;
mod negotiator;
mod relay_client;
mod rtc;
mod session;
mod transport;

pub use negotiator::{
    Action, NegotiationState, Negotiator, Role, STATUS_CONNECTION_FAILED, STATUS_PEER_DISCONNECTED,
};
pub use relay_client::{RelayClient, RelayEvent};
pub use rtc::{
    BUFFERED_AMOUNT_LOW_THRESHOLD, WebRtcChannel, WebRtcFactory, WebRtcTransport, rtc_ice_servers,
};
pub use session::{Intent, PeerSession, STATUS_RELAY_LOST, SessionOutcome};
pub use transport::{
    ConnectionState, Frame, PeerTransport, TransportError, TransportEvent, TransportFactory,
    TransportFuture,
};

/// Errors produced by the peer crate.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] p2pburger_protocol::ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("transfer error: {0}")]
    Transfer(#[from] p2pburger_transfer::TransferError),

    #[error("relay connection closed")]
    RelayClosed,
}
