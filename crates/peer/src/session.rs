//! The peer session actor.
//!
//! [`PeerSession`] ties a [`RelayClient`], a [`Negotiator`] and one side of
//! a file transfer together. It processes one relay event or transport
//! event at a time until the session closes or fails.

use std::fs::File;
use std::path::PathBuf;

use p2pburger_protocol::{RoomId, generate_room_id};
use p2pburger_transfer::{
    FileReceiver, FileSender, PumpOutcome, ReceiverEvent, SpeedCalculator, TransferError,
    TransferProgress, save_received_file,
};
use tokio::sync::mpsc;

use crate::PeerError;
use crate::negotiator::{Action, NegotiationState, Negotiator, Role};
use crate::relay_client::{RelayClient, RelayEvent};
use crate::transport::{Frame, TransportEvent, TransportFactory};

pub const STATUS_RELAY_LOST: &str = "Lost connection to the relay server.";

/// What this participant came to do.
#[derive(Debug, Clone)]
pub enum Intent {
    /// Offer a file in a new room.
    Send { path: PathBuf, mime_type: String },
    /// Receive a file from an existing room and save it into `save_dir`.
    Receive { room: RoomId, save_dir: PathBuf },
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every byte was handed to the data channel.
    Sent { bytes: u64 },
    /// The file was received and saved at this path.
    Received(PathBuf),
    /// The session closed before a transfer finished.
    Closed,
    /// The session failed; the string is the user-visible reason.
    Failed(String),
}

enum Transfer {
    None,
    Sending(FileSender<File>),
    Sent(u64),
    Receiving(FileReceiver),
}

pub struct PeerSession<F: TransportFactory> {
    relay: RelayClient,
    relay_events: mpsc::Receiver<RelayEvent>,
    negotiator: Negotiator<F>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    intent: Intent,
    room: RoomId,
    transfer: Transfer,
    speed: SpeedCalculator,
    last_bytes: u64,
    status: mpsc::UnboundedSender<String>,
    outcome: Option<SessionOutcome>,
}

impl<F: TransportFactory> PeerSession<F> {
    /// Connects to the relay. Status lines for the user arrive on the
    /// returned receiver.
    ///
    /// A [`Intent::Send`] session picks a fresh room id; see
    /// [`room`](Self::room).
    pub async fn connect(
        relay_url: &str,
        intent: Intent,
        factory: F,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>), PeerError> {
        let room = match &intent {
            Intent::Send { .. } => generate_room_id(),
            Intent::Receive { room, .. } => room.clone(),
        };
        let (relay, relay_events) = RelayClient::connect(relay_url).await?;
        let (events_tx, transport_events) = mpsc::unbounded_channel();
        let (status, status_rx) = mpsc::unbounded_channel();

        let session = Self {
            relay,
            relay_events,
            negotiator: Negotiator::new(factory, events_tx),
            transport_events,
            intent,
            room,
            transfer: Transfer::None,
            speed: SpeedCalculator::default(),
            last_bytes: 0,
            status,
            outcome: None,
        };
        Ok((session, status_rx))
    }

    /// The room this session joins.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Runs the session to its end.
    pub async fn run(mut self) -> Result<SessionOutcome, PeerError> {
        self.relay.join_room(&self.room)?;
        let actions = self.negotiator.join(self.room.clone());
        self.apply(actions);

        let mut relay_open = true;
        loop {
            tokio::select! {
                event = self.relay_events.recv(), if relay_open => {
                    match event {
                        Some(RelayEvent::Disconnected) | None => {
                            relay_open = false;
                            self.on_relay_lost();
                        }
                        Some(event) => self.on_relay_event(event).await,
                    }
                }

                Some(event) = self.transport_events.recv() => {
                    self.on_transport_event(event);
                }

                else => {
                    self.outcome.get_or_insert(SessionOutcome::Closed);
                }
            }

            if let Some(outcome) = self.outcome.take() {
                tracing::info!(room = %self.room, ?outcome, "session finished");
                self.relay.close();
                return Ok(outcome);
            }
        }
    }

    async fn on_relay_event(&mut self, event: RelayEvent) {
        let actions = match event {
            RelayEvent::AssistConfig(servers) => {
                tracing::debug!(count = servers.len(), "received connectivity-assist servers");
                self.negotiator.set_ice_servers(servers);
                Vec::new()
            }
            RelayEvent::RoomCreated(room) => {
                if matches!(self.intent, Intent::Receive { .. }) {
                    self.finish_failed(format!("Error: Room {room} has no sender."));
                    return;
                }
                self.negotiator.on_room_created(&room)
            }
            RelayEvent::RoomJoined(room) => {
                if matches!(self.intent, Intent::Send { .. }) {
                    self.finish_failed(format!("Error: Room {room} is already in use."));
                    return;
                }
                self.negotiator.on_room_joined(&room)
            }
            RelayEvent::RoomFull(room) => self.negotiator.on_room_full(&room),
            RelayEvent::PeersReady => self.negotiator.on_peers_ready().await,
            RelayEvent::Handshake(msg) => self.negotiator.on_handshake(msg).await,
            RelayEvent::PeerDisconnected => self.negotiator.on_peer_disconnected(),
            RelayEvent::Error(err) => {
                tracing::warn!(code = err.code, "relay error: {}", err.message);
                self.send_status(format!("Error: {}", err.message));
                Vec::new()
            }
            RelayEvent::Disconnected => Vec::new(),
        };
        self.apply(actions);
    }

    fn on_relay_lost(&mut self) {
        if matches!(self.transfer, Transfer::Sent(_)) {
            self.finish_sent();
            return;
        }
        // An established connection no longer needs the relay.
        if self.negotiator.state() == NegotiationState::Connected {
            tracing::info!("relay connection lost, continuing on the direct transport");
            return;
        }
        let actions = self.negotiator.fail(STATUS_RELAY_LOST);
        if actions.is_empty() {
            self.send_status(STATUS_RELAY_LOST.into());
        }
        self.apply(actions);
        self.outcome
            .get_or_insert_with(|| SessionOutcome::Failed(STATUS_RELAY_LOST.into()));
    }

    /// A handshake message could not be queued for the relay.
    ///
    /// Once connected the direct transport carries the session, so the
    /// message is dropped. Before that the negotiation cannot finish.
    fn on_relay_send_failed(&mut self, err: PeerError) {
        if self.negotiator.state() == NegotiationState::Connected {
            tracing::warn!("relay send failed after connecting, message dropped: {err}");
            return;
        }
        tracing::error!("relay send failed during negotiation: {err}");
        self.on_relay_lost();
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let actions = self.negotiator.on_transport_event(&event);
        self.apply(actions);
        if self.outcome.is_some() {
            return;
        }

        match event {
            TransportEvent::BufferedAmountLow => self.pump(),
            TransportEvent::Message(frame) => self.on_frame(frame),
            TransportEvent::DataChannelClosed => match self.transfer {
                Transfer::Sent(_) => self.finish_sent(),
                Transfer::Sending(_) | Transfer::Receiving(_) => {
                    let actions = self
                        .negotiator
                        .fail("Data channel closed before the transfer completed.");
                    self.apply(actions);
                }
                Transfer::None => {}
            },
            _ => {}
        }
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Relay(msg) => {
                    if let Err(e) = self.relay.send_handshake(&self.room, &msg) {
                        self.on_relay_send_failed(e);
                    }
                }
                Action::Status(line) => self.send_status(line),
                Action::BeginSend => self.begin_send(),
                Action::BeginReceive => {
                    self.transfer = Transfer::Receiving(FileReceiver::new());
                    self.speed.reset();
                    self.last_bytes = 0;
                }
                Action::Closed => {
                    if matches!(self.transfer, Transfer::Sent(_)) {
                        self.finish_sent();
                    } else if self.outcome.is_none() {
                        self.outcome = Some(SessionOutcome::Closed);
                    }
                }
                Action::Failed(reason) => {
                    self.transfer = Transfer::None;
                    self.outcome = Some(SessionOutcome::Failed(reason));
                }
            }
        }
    }

    fn begin_send(&mut self) {
        let Intent::Send { path, mime_type } = &self.intent else {
            return;
        };
        if !matches!(self.transfer, Transfer::None) {
            return;
        }
        match FileSender::from_path(path, mime_type.clone()) {
            Ok(sender) => {
                self.transfer = Transfer::Sending(sender);
                self.speed.reset();
                self.last_bytes = 0;
                self.pump()
            }
            Err(e) => self.transfer_failed(e),
        }
    }

    /// Writes chunks until the channel is full or the file is sent.
    fn pump(&mut self) {
        let Transfer::Sending(sender) = &mut self.transfer else {
            return;
        };
        let Some(channel) = self.negotiator.data_channel() else {
            return;
        };

        match sender.pump(channel) {
            Ok(PumpOutcome::Paused(progress)) => {
                tracing::trace!(%progress, "send paused, waiting for buffer to drain");
                self.report_progress("Sending", progress);
            }
            Ok(PumpOutcome::Complete(progress)) => {
                tracing::info!(name = %sender.metadata().name, bytes = progress.bytes, "file sent");
                self.transfer = Transfer::Sent(progress.bytes);
                self.report_progress("Sending", progress);
                self.send_status("File sent!".into());
            }
            Err(e) => self.transfer_failed(e),
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        let Transfer::Receiving(receiver) = &mut self.transfer else {
            tracing::warn!("data channel frame outside a receive, ignored");
            return;
        };

        let result = match frame {
            Frame::Text(text) => receiver.on_text(&text),
            Frame::Binary(data) => receiver.on_binary(&data),
        };

        match result {
            Ok(ReceiverEvent::Started(meta)) => {
                self.send_status(format!("Incoming file: {}", meta.name));
            }
            Ok(ReceiverEvent::Progress(progress)) => {
                self.report_progress("Receiving", progress);
            }
            Ok(ReceiverEvent::Complete { file, progress }) => {
                self.report_progress("Receiving", progress);
                let Intent::Receive { save_dir, .. } = &self.intent else {
                    return;
                };
                let path = match save_received_file(save_dir, &file) {
                    Ok(p) => p,
                    Err(e) => return self.transfer_failed(e),
                };
                self.transfer = Transfer::None;
                self.send_status("File received successfully!".into());
                let actions = self.negotiator.complete();
                self.apply(actions);
                self.outcome = Some(SessionOutcome::Received(path));
            }
            Err(e) => self.transfer_failed(e),
        }
    }

    /// Sends a `"{verb}... 41% (16384/40000 bytes)"` line, with the rate and
    /// the time left once there are enough samples.
    fn report_progress(&mut self, verb: &str, progress: TransferProgress) {
        self.speed
            .add_sample(progress.bytes.saturating_sub(self.last_bytes));
        self.last_bytes = progress.bytes;

        let mut line = format!("{verb}... {progress}");
        let rate = self.speed.bytes_per_second();
        if rate > 0.0 {
            line.push_str(&format!(" at {:.1} KiB/s", rate / 1024.0));
            let eta = self
                .speed
                .eta(progress.remaining())
                .filter(|_| !progress.is_complete());
            if let Some(eta) = eta {
                line.push_str(&format!(", {}s left", eta.as_secs()));
            }
        }
        self.send_status(line);
    }

    fn transfer_failed(&mut self, err: TransferError) {
        tracing::error!("transfer failed: {err}");
        self.transfer = Transfer::None;
        let reason = format!("Transfer failed: {err}");
        let actions = self.negotiator.fail(&reason);
        self.apply(actions);
        if self.outcome.is_none() {
            self.outcome = Some(SessionOutcome::Failed(reason));
        }
    }

    fn finish_sent(&mut self) {
        if let Transfer::Sent(bytes) = self.transfer {
            if !self.negotiator.state().is_terminal() {
                self.negotiator.complete();
            }
            self.outcome = Some(SessionOutcome::Sent { bytes });
        }
    }

    fn finish_failed(&mut self, reason: String) {
        self.send_status(reason.clone());
        self.outcome = Some(SessionOutcome::Failed(reason));
    }

    fn send_status(&self, line: String) {
        tracing::info!(room = %self.room, "{line}");
        let _ = self.status.send(line);
    }

    /// The role this session plays, once the relay assigned one.
    pub fn role(&self) -> Option<Role> {
        self.negotiator.role()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use p2pburger_protocol::{IceCandidate, IceServer};
    use p2pburger_rendezvous::{RelayHandler, RelayServer, ServerConfig};

    use crate::loopback::{LoopbackFactory, LoopbackNetwork};
    use crate::transport::ConnectionState;

    async fn start_relay() -> (Arc<RelayServer<RelayHandler>>, tokio::task::JoinHandle<()>, String) {
        let handler = RelayHandler::new(vec![IceServer::stun("stun:stun.l.google.com:19302")]);
        let server = RelayServer::new(ServerConfig { port: 0 }, handler);
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;
        (server, handle, format!("ws://127.0.0.1:{port}"))
    }

    fn late_candidate() -> TransportEvent {
        TransportEvent::LocalCandidate(IceCandidate {
            sdp_mline_index: Some(0),
            sdp_mid: Some("0".into()),
            candidate: "candidate:7 1 udp 1686052607 203.0.113.9 61000 typ srflx".into(),
        })
    }

    /// A receive session whose negotiator has built its transport.
    async fn negotiating_receiver(url: &str, save_dir: &std::path::Path) -> PeerSession<LoopbackFactory> {
        let (_net, _offerer, answerer) = LoopbackNetwork::new();
        let room = RoomId::parse("abc1234").unwrap();
        let intent = Intent::Receive {
            room: room.clone(),
            save_dir: save_dir.to_path_buf(),
        };
        let (mut session, _status) = PeerSession::connect(url, intent, answerer).await.unwrap();
        session.negotiator.join(room.clone());
        session.negotiator.on_room_joined(&room);
        session.negotiator.on_peers_ready().await;
        assert_eq!(session.negotiator.state(), NegotiationState::Negotiating);
        session
    }

    async fn close_relay(session: &PeerSession<LoopbackFactory>) {
        session.relay.close();
        // Let the write pump observe the cancellation and drop its queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.relay.is_connected());
    }

    #[tokio::test]
    async fn late_candidate_after_relay_loss_is_dropped() {
        let (server, handle, url) = start_relay().await;
        let dir = tempfile::tempdir().unwrap();
        let mut session = negotiating_receiver(&url, dir.path()).await;

        session.on_transport_event(TransportEvent::ConnectionState(ConnectionState::Connected));
        assert_eq!(session.negotiator.state(), NegotiationState::Connected);

        close_relay(&session).await;
        session.on_relay_lost();
        assert_eq!(session.outcome, None);

        session.on_transport_event(late_candidate());
        assert_eq!(session.outcome, None);
        assert_eq!(session.negotiator.state(), NegotiationState::Connected);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn relay_send_failure_while_negotiating_fails_session() {
        let (server, handle, url) = start_relay().await;
        let dir = tempfile::tempdir().unwrap();
        let mut session = negotiating_receiver(&url, dir.path()).await;

        close_relay(&session).await;
        session.on_transport_event(late_candidate());
        assert_eq!(
            session.outcome,
            Some(SessionOutcome::Failed(STATUS_RELAY_LOST.into()))
        );
        assert_eq!(session.negotiator.state(), NegotiationState::Failed);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn relay_loss_before_connecting_fails_session() {
        let (server, handle, url) = start_relay().await;
        let dir = tempfile::tempdir().unwrap();
        let mut session = negotiating_receiver(&url, dir.path()).await;

        session.on_relay_lost();
        assert_eq!(
            session.outcome,
            Some(SessionOutcome::Failed(STATUS_RELAY_LOST.into()))
        );

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn progress_lines_carry_rate_and_time_left() {
        let (server, handle, url) = start_relay().await;
        let dir = tempfile::tempdir().unwrap();
        let (_net, _offerer, answerer) = LoopbackNetwork::new();
        let intent = Intent::Receive {
            room: RoomId::parse("abc1234").unwrap(),
            save_dir: dir.path().to_path_buf(),
        };
        let (mut session, mut status) = PeerSession::connect(&url, intent, answerer).await.unwrap();

        session.report_progress("Receiving", TransferProgress::new(16384, 40_000));
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.report_progress("Receiving", TransferProgress::new(32768, 40_000));
        session.report_progress("Receiving", TransferProgress::new(40_000, 40_000));

        assert_eq!(status.recv().await.unwrap(), "Receiving... 41% (16384/40000 bytes)");
        let middle = status.recv().await.unwrap();
        assert!(middle.starts_with("Receiving... 82% (32768/40000 bytes) at "), "{middle}");
        assert!(middle.ends_with("s left"), "{middle}");
        let last = status.recv().await.unwrap();
        assert!(last.contains(" KiB/s"), "{last}");
        assert!(!last.contains("left"), "{last}");

        server.shutdown();
        handle.await.unwrap();
    }
}
