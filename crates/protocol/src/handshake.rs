//! Handshake messages exchanged through the relay to set up the direct
//! transport.
//!
//! The JSON shapes follow the browser objects: a session description is
//! `{"type":"offer","sdp":"..."}` and a candidate is
//! `{"type":"candidate","label":0,"id":"0","candidate":"..."}`.

use serde::{Deserialize, Serialize};

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A transport description produced by one side of the negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Media line index the candidate belongs to.
    #[serde(rename = "label", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// Media stream identification tag.
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    pub candidate: String,
}

/// One handshake message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandshakeMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
    /// Any other `type`. Receivers ignore it.
    #[serde(other)]
    Unknown,
}

impl HandshakeMessage {
    /// Returns the session description carried by an offer or answer.
    pub fn description(&self) -> Option<SessionDescription> {
        match self {
            HandshakeMessage::Offer { sdp } => Some(SessionDescription::offer(sdp.clone())),
            HandshakeMessage::Answer { sdp } => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeMessage::Offer { .. } => "offer",
            HandshakeMessage::Answer { .. } => "answer",
            HandshakeMessage::Candidate(_) => "candidate",
            HandshakeMessage::Unknown => "unknown",
        }
    }
}

impl From<SessionDescription> for HandshakeMessage {
    fn from(desc: SessionDescription) -> Self {
        match desc.sdp_type {
            SdpType::Offer => HandshakeMessage::Offer { sdp: desc.sdp },
            SdpType::Answer => HandshakeMessage::Answer { sdp: desc.sdp },
        }
    }
}

impl From<IceCandidate> for HandshakeMessage {
    fn from(candidate: IceCandidate) -> Self {
        HandshakeMessage::Candidate(candidate)
    }
}
