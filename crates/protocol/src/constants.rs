use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong (or any incoming frame) before the relay
/// considers a connection dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the relay pings its clients.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(25);

/// Maximum relay message size in bytes (64 KiB).
///
/// Relay traffic is limited to handshake messages; session descriptions
/// are a few kilobytes at most.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum number of participants in a room.
pub const ROOM_CAPACITY: usize = 2;

/// Maximum accepted room identifier length.
pub const ROOM_ID_MAX_LEN: usize = 64;

/// Length of generated room identifiers.
pub const ROOM_ID_GENERATED_LEN: usize = 7;

/// Label of the data channel opened by the offerer.
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";

/// Relay message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Client -> relay
    #[serde(rename = "join_room")]
    JoinRoom,

    // Relay -> client
    #[serde(rename = "room_created")]
    RoomCreated,
    #[serde(rename = "room_joined")]
    RoomJoined,
    #[serde(rename = "room_full")]
    RoomFull,
    #[serde(rename = "peers_ready")]
    PeersReady,
    #[serde(rename = "peer_disconnected")]
    PeerDisconnected,
    #[serde(rename = "transport_assist_config")]
    TransportAssistConfig,

    // Both directions
    #[serde(rename = "relay")]
    Relay,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common relay error codes.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_CONFLICT: i32 = 409;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::JoinRoom).unwrap(),
            "\"join_room\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::PeersReady).unwrap(),
            "\"peers_ready\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::TransportAssistConfig).unwrap(),
            "\"transport_assist_config\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"peer_disconnected\"").unwrap();
        assert_eq!(mt, MessageType::PeerDisconnected);
    }

    #[test]
    fn unknown_message_type() {
        let mt: MessageType = serde_json::from_str("\"some_future_type\"").unwrap();
        assert_eq!(mt, MessageType::Unknown);
    }
}
