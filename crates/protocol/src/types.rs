use serde::{Deserialize, Serialize};

/// One or more URLs of a connectivity-assist server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    /// Iterates over all URLs.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            IceUrls::One(url) => std::slice::from_ref(url),
            IceUrls::Many(urls) => urls,
        };
        slice.iter().map(String::as_str)
    }
}

/// A connectivity-assist (STUN/TURN) server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A server that needs no credentials (typically STUN).
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }

    /// A relay server with credentials (typically TURN).
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Describes the file about to be sent over the direct transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Media type, empty when unknown.
    #[serde(rename = "type", default)]
    pub mime_type: String,
}

/// Text-framed control message on the direct transport.
///
/// Binary frames carry file data; text frames carry one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ControlMessage {
    Metadata(FileMetadata),
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_wire_shape() {
        let msg = ControlMessage::Metadata(FileMetadata {
            name: "burger.png".into(),
            size: 40_000,
            mime_type: "image/png".into(),
        });
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"metadata","payload":{"name":"burger.png","size":40000,"type":"image/png"}}"#
        );
    }

    #[test]
    fn metadata_without_media_type() {
        let json = r#"{"type":"metadata","payload":{"name":"notes","size":3}}"#;
        let ControlMessage::Metadata(meta) = ControlMessage::from_json(json).unwrap();
        assert_eq!(meta.size, 3);
        assert!(meta.mime_type.is_empty());
    }

    #[test]
    fn unknown_control_type_is_an_error() {
        assert!(ControlMessage::from_json(r#"{"type":"eof"}"#).is_err());
        assert!(ControlMessage::from_json("not json").is_err());
    }

    #[test]
    fn ice_server_credentials_are_optional() {
        let stun = IceServer::stun("stun:stun1.l.google.com:19302");
        let json = serde_json::to_string(&stun).unwrap();
        assert_eq!(json, r#"{"urls":"stun:stun1.l.google.com:19302"}"#);

        let turn = IceServer::turn("turn:openrelay.metered.ca:80", "u", "p");
        let back: IceServer = serde_json::from_str(&serde_json::to_string(&turn).unwrap()).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn ice_urls_iterate() {
        let many = IceUrls::Many(vec!["turn:a:80".into(), "turn:a:443".into()]);
        assert_eq!(many.iter().collect::<Vec<_>>(), vec!["turn:a:80", "turn:a:443"]);
        let one = IceUrls::One("stun:x".into());
        assert_eq!(one.iter().count(), 1);
    }
}
