//! Rendezvous server for p2pburger.
//!
//! Peers connect over WebSocket, meet in a room of at most two
//! participants, and exchange handshake messages through the relay until
//! they can talk directly. The relay never stores or inspects those
//! messages.

mod connection;
mod handler;
mod registry;
mod relay;
mod server;

pub use connection::{ConnectionMeta, ParticipantId, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use registry::{Departure, JoinOutcome, Notify, RegistryError, RoomRegistry};
pub use relay::RelayHandler;
pub use server::{RelayServer, ServerConfig};

/// Per-connection send buffer capacity.
///
/// A connection only ever receives room notifications and the handshake
/// messages of a single peer, so this is generous.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
