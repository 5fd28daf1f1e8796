//! Wire protocol shared by the p2pburger relay server and its peers.
//!
//! Covers three layers:
//! - the relay envelope ([`Message`]) and its [`MessageType`]s,
//! - the handshake messages peers exchange through the relay,
//! - the control frames sent over the direct transport ahead of file data.

pub mod constants;
pub mod envelope;
pub mod handshake;
pub mod messages;
pub mod room;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Message, WsError};
pub use handshake::{HandshakeMessage, IceCandidate, SdpType, SessionDescription};
pub use room::{RoomId, generate_room_id};
pub use types::{ControlMessage, FileMetadata, IceServer, IceUrls};

/// Errors produced while building or decoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("missing payload for {0:?}")]
    MissingPayload(MessageType),
}
