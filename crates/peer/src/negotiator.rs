//! Negotiation state machine.
//!
//! [`Negotiator`] drives one participant from joining a room to an open
//! data channel. Relay messages and transport events go in; a list of
//! [`Action`]s for the host comes out. The negotiator owns the transport
//! and tears it down on every terminal transition.

use std::fmt;

use p2pburger_protocol::{HandshakeMessage, IceCandidate, IceServer, RoomId, SessionDescription};
use tokio::sync::mpsc;

use crate::transport::{ConnectionState, PeerTransport, TransportEvent, TransportFactory};

pub const STATUS_CONNECTION_FAILED: &str =
    "Connection failed. Please check your network or try again.";
pub const STATUS_PEER_DISCONNECTED: &str = "The other user has disconnected.";

/// Negotiation progress of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingPeer,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingPeer => "awaiting_peer",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which side of the offer/answer exchange this participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the room; sends the offer and the file.
    Offerer,
    /// Joined the room; answers and receives the file.
    Answerer,
}

/// Work for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this message to the peer through the relay.
    Relay(HandshakeMessage),
    /// Show this line to the user.
    Status(String),
    /// The data channel is open; start sending the file.
    BeginSend,
    /// The data channel is open; expect an incoming file.
    BeginReceive,
    /// The session ended normally.
    Closed,
    /// The session failed; the string is the user-visible reason.
    Failed(String),
}

pub struct Negotiator<F: TransportFactory> {
    factory: F,
    events: mpsc::UnboundedSender<TransportEvent>,
    ice_servers: Vec<IceServer>,
    state: NegotiationState,
    role: Option<Role>,
    room: Option<RoomId>,
    transport: Option<F::Transport>,
    remote: Option<SessionDescription>,
}

impl<F: TransportFactory> Negotiator<F> {
    /// Transports built by `factory` report to `events`.
    pub fn new(factory: F, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            factory,
            events,
            ice_servers: Vec::new(),
            state: NegotiationState::Idle,
            role: None,
            room: None,
            transport: None,
            remote: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// The open data channel, while connected.
    pub fn data_channel(&mut self) -> Option<&mut <F::Transport as PeerTransport>::Channel> {
        self.transport.as_mut()?.data_channel()
    }

    /// Connectivity-assist servers used for transports created from now on.
    pub fn set_ice_servers(&mut self, servers: Vec<IceServer>) {
        self.ice_servers = servers;
    }

    /// Records that a join request for `room` was issued.
    pub fn join(&mut self, room: RoomId) -> Vec<Action> {
        if self.state != NegotiationState::Idle {
            tracing::warn!(state = %self.state, "join ignored");
            return Vec::new();
        }
        let status = format!("Connecting to room {room}...");
        self.room = Some(room);
        self.state = NegotiationState::AwaitingPeer;
        vec![Action::Status(status)]
    }

    pub fn on_room_created(&mut self, room: &RoomId) -> Vec<Action> {
        if !self.take_role(room, Role::Offerer) {
            return Vec::new();
        }
        vec![Action::Status(format!(
            "Room {room} created. Waiting for the other peer..."
        ))]
    }

    pub fn on_room_joined(&mut self, room: &RoomId) -> Vec<Action> {
        if !self.take_role(room, Role::Answerer) {
            return Vec::new();
        }
        vec![Action::Status(
            "Peer has joined. Establishing connection...".into(),
        )]
    }

    fn take_role(&mut self, room: &RoomId, role: Role) -> bool {
        if self.state != NegotiationState::AwaitingPeer || self.role.is_some() {
            tracing::warn!(state = %self.state, ?role, "room response ignored");
            return false;
        }
        self.room = Some(room.clone());
        self.role = Some(role);
        true
    }

    pub fn on_room_full(&mut self, room: &RoomId) -> Vec<Action> {
        if self.state != NegotiationState::AwaitingPeer {
            return Vec::new();
        }
        self.teardown();
        self.state = NegotiationState::Closed;
        vec![
            Action::Status(format!("Error: Room {room} is full.")),
            Action::Closed,
        ]
    }

    /// Both participants are present: build the transport and, as the
    /// offerer, send the offer.
    pub async fn on_peers_ready(&mut self) -> Vec<Action> {
        let Some(role) = self.role else {
            tracing::warn!(state = %self.state, "peers_ready before room response, ignored");
            return Vec::new();
        };
        if self.state != NegotiationState::AwaitingPeer {
            return Vec::new();
        }

        let mut actions = vec![Action::Status("Establishing peer connection...".into())];
        let transport = match self
            .factory
            .create(&self.ice_servers, role, self.events.clone())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("failed to create transport: {e}");
                self.state = NegotiationState::Negotiating;
                actions.extend(self.fail(STATUS_CONNECTION_FAILED));
                return actions;
            }
        };
        self.transport = Some(transport);
        self.state = NegotiationState::Negotiating;
        tracing::info!(?role, "negotiation started");

        if role == Role::Offerer {
            actions.push(Action::Status("Creating offer...".into()));
            let Some(transport) = self.transport.as_mut() else {
                return actions;
            };
            match transport.create_offer().await {
                Ok(offer) => actions.push(Action::Relay(offer.into())),
                Err(e) => {
                    tracing::error!("failed to create offer: {e}");
                    actions.extend(self.fail(STATUS_CONNECTION_FAILED));
                }
            }
        }
        actions
    }

    /// Applies a handshake message relayed from the peer.
    pub async fn on_handshake(&mut self, msg: HandshakeMessage) -> Vec<Action> {
        if !matches!(
            self.state,
            NegotiationState::Negotiating | NegotiationState::Connected
        ) {
            tracing::debug!(kind = msg.kind(), state = %self.state, "handshake ignored");
            return Vec::new();
        }

        match msg {
            HandshakeMessage::Offer { sdp } => self.on_offer(SessionDescription::offer(sdp)).await,
            HandshakeMessage::Answer { sdp } => self.on_answer(SessionDescription::answer(sdp)).await,
            HandshakeMessage::Candidate(candidate) => {
                self.on_candidate(candidate).await;
                Vec::new()
            }
            HandshakeMessage::Unknown => {
                tracing::debug!("unknown handshake message ignored");
                Vec::new()
            }
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription) -> Vec<Action> {
        if self.role != Some(Role::Answerer) {
            tracing::warn!("offer received by the offerer, ignored");
            return Vec::new();
        }
        if self.remote.as_ref() == Some(&offer) {
            tracing::debug!("duplicate offer ignored");
            return Vec::new();
        }
        let Some(transport) = self.transport.as_mut() else {
            return Vec::new();
        };

        let result = async {
            transport.set_remote_description(offer.clone()).await?;
            transport.create_answer().await
        }
        .await;

        match result {
            Ok(answer) => {
                self.remote = Some(offer);
                vec![Action::Relay(answer.into())]
            }
            Err(e) => {
                tracing::error!("failed to answer offer: {e}");
                self.fail(STATUS_CONNECTION_FAILED)
            }
        }
    }

    async fn on_answer(&mut self, answer: SessionDescription) -> Vec<Action> {
        if self.role != Some(Role::Offerer) {
            tracing::warn!("answer received by the answerer, ignored");
            return Vec::new();
        }
        if self.remote.as_ref() == Some(&answer) {
            tracing::debug!("duplicate answer ignored");
            return Vec::new();
        }
        let Some(transport) = self.transport.as_mut() else {
            return Vec::new();
        };

        match transport.set_remote_description(answer.clone()).await {
            Ok(()) => {
                self.remote = Some(answer);
                Vec::new()
            }
            Err(e) => {
                tracing::error!("failed to apply answer: {e}");
                self.fail(STATUS_CONNECTION_FAILED)
            }
        }
    }

    async fn on_candidate(&mut self, candidate: IceCandidate) {
        let Some(transport) = self.transport.as_mut() else {
            tracing::debug!("candidate before transport, ignored");
            return;
        };
        // One unusable candidate does not doom the connection.
        if let Err(e) = transport.add_ice_candidate(candidate).await {
            tracing::warn!("failed to add candidate: {e}");
        }
    }

    /// Reacts to a transport event. Data channel traffic is not handled
    /// here; the host routes it to the transfer.
    pub fn on_transport_event(&mut self, event: &TransportEvent) -> Vec<Action> {
        if !matches!(
            self.state,
            NegotiationState::Negotiating | NegotiationState::Connected
        ) {
            return Vec::new();
        }

        match event {
            TransportEvent::LocalCandidate(c) => vec![Action::Relay(c.clone().into())],
            TransportEvent::ConnectionState(state) => {
                let mut actions = vec![Action::Status(format!("Connection state: {state}"))];
                match state {
                    ConnectionState::Connected => {
                        self.state = NegotiationState::Connected;
                    }
                    ConnectionState::Failed => {
                        actions.extend(self.fail(STATUS_CONNECTION_FAILED));
                    }
                    _ => {}
                }
                actions
            }
            TransportEvent::DataChannelOpen => {
                self.state = NegotiationState::Connected;
                match self.role {
                    Some(Role::Offerer) => vec![
                        Action::Status("Connection established! Sending file...".into()),
                        Action::BeginSend,
                    ],
                    Some(Role::Answerer) => vec![
                        Action::Status("Connection established! Waiting for file...".into()),
                        Action::BeginReceive,
                    ],
                    None => Vec::new(),
                }
            }
            TransportEvent::DataChannelClosed
            | TransportEvent::BufferedAmountLow
            | TransportEvent::Message(_) => Vec::new(),
        }
    }

    pub fn on_peer_disconnected(&mut self) -> Vec<Action> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        tracing::info!(state = %self.state, "peer disconnected");
        self.teardown();
        self.state = NegotiationState::Closed;
        vec![
            Action::Status(STATUS_PEER_DISCONNECTED.into()),
            Action::Closed,
        ]
    }

    /// The transfer finished; release the transport.
    pub fn complete(&mut self) -> Vec<Action> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.teardown();
        self.state = NegotiationState::Closed;
        vec![Action::Closed]
    }

    /// Moves to `Failed` from `Negotiating` or `Connected`.
    pub fn fail(&mut self, reason: &str) -> Vec<Action> {
        if !matches!(
            self.state,
            NegotiationState::Negotiating | NegotiationState::Connected
        ) {
            return Vec::new();
        }
        tracing::warn!(state = %self.state, "negotiation failed: {reason}");
        self.teardown();
        self.state = NegotiationState::Failed;
        vec![
            Action::Status(reason.to_owned()),
            Action::Failed(reason.to_owned()),
        ]
    }

    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.remote = None;
    }
}
