//! The direct transport seam.
//!
//! A [`PeerTransport`] is one peer connection with a single ordered,
//! reliable data channel. Asynchronous operations return boxed futures;
//! everything the transport observes on its own (gathered candidates,
//! state changes, channel traffic) arrives as a [`TransportEvent`] on the
//! channel handed to [`TransportFactory::create`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use p2pburger_protocol::{IceCandidate, IceServer, SessionDescription};
use p2pburger_transfer::DataChannel;
use tokio::sync::mpsc;

use crate::negotiator::Role;

/// A boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Errors reported by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("transport closed")]
    Closed,
}

/// Aggregate connectivity state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A frame received on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local connectivity candidate was gathered.
    LocalCandidate(IceCandidate),
    ConnectionState(ConnectionState),
    /// The data channel is open for sending.
    DataChannelOpen,
    DataChannelClosed,
    /// The outgoing buffer drained below its low-water mark.
    BufferedAmountLow,
    Message(Frame),
}

/// One peer connection.
pub trait PeerTransport: Send {
    type Channel: DataChannel + Send;

    /// Creates an offer and applies it as the local description.
    fn create_offer(&mut self) -> TransportFuture<'_, SessionDescription>;

    /// Creates an answer to the applied remote offer and applies it as the
    /// local description.
    fn create_answer(&mut self) -> TransportFuture<'_, SessionDescription>;

    fn set_remote_description(&mut self, desc: SessionDescription) -> TransportFuture<'_, ()>;

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> TransportFuture<'_, ()>;

    /// The data channel, once it exists.
    fn data_channel(&mut self) -> Option<&mut Self::Channel>;

    /// Closes the data channel and the connection. Idempotent.
    fn close(&mut self);
}

/// Builds transports for a [`Negotiator`](crate::Negotiator).
pub trait TransportFactory: Send {
    type Transport: PeerTransport;

    /// Creates a transport. An [`Role::Offerer`] transport creates its data
    /// channel immediately; an answerer's arrives from the remote peer.
    fn create<'a>(
        &'a mut self,
        ice_servers: &'a [IceServer],
        role: Role,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportFuture<'a, Self::Transport>;
}
