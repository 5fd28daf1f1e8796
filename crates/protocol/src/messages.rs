use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::handshake::HandshakeMessage;
use crate::types::IceServer;

// ---------------------------------------------------------------------------
// Room payloads
// ---------------------------------------------------------------------------

/// Names a room. Used by `join_room`, `room_created`, `room_joined` and
/// `room_full`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: String,
}

// ---------------------------------------------------------------------------
// Relay payloads
// ---------------------------------------------------------------------------

/// Asks the relay to forward `message` to the other occupant of `room_id`.
///
/// The relay never decodes `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub room_id: String,
    pub message: Box<RawValue>,
}

impl RelayRequest {
    /// Wraps a handshake message for relaying.
    pub fn new(
        room_id: impl Into<String>,
        message: &HandshakeMessage,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            room_id: room_id.into(),
            message: serde_json::value::to_raw_value(message)?,
        })
    }
}

/// A handshake message delivered by the relay from the other occupant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub message: Box<RawValue>,
}

impl RelayedMessage {
    /// Decodes the carried handshake message.
    pub fn handshake(&self) -> Result<HandshakeMessage, serde_json::Error> {
        serde_json::from_str(self.message.get())
    }
}

// ---------------------------------------------------------------------------
// Configuration payloads
// ---------------------------------------------------------------------------

/// Connectivity-assist servers, pushed to every client right after it
/// connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportAssistConfig {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}
