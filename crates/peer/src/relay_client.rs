//! WebSocket client for the rendezvous relay.
//!
//! Incoming envelopes are decoded into typed [`RelayEvent`]s and delivered
//! on an `mpsc` channel; outgoing requests are fire-and-forget.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use p2pburger_protocol::constants::{MessageType, WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use p2pburger_protocol::envelope::{Message, WsError};
use p2pburger_protocol::messages::{RelayRequest, RelayedMessage, RoomPayload, TransportAssistConfig};
use p2pburger_protocol::{HandshakeMessage, IceServer, RoomId};

use crate::PeerError;

/// Capacity of the outgoing and incoming queues.
const CLIENT_BUFFER_SIZE: usize = 256;

/// Something the relay told us.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    AssistConfig(Vec<IceServer>),
    RoomCreated(RoomId),
    RoomJoined(RoomId),
    RoomFull(RoomId),
    PeersReady,
    Handshake(HandshakeMessage),
    PeerDisconnected,
    /// The relay rejected a request.
    Error(WsError),
    /// The relay connection is gone. Always the last event.
    Disconnected,
}

/// Connection to the relay server.
pub struct RelayClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    /// Connects to the relay at `url` (`ws://host:port`).
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<RelayEvent>), PeerError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();
        debug!(%url, "connected to relay");

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(CLIENT_BUFFER_SIZE);
        let (event_tx, event_rx) = mpsc::channel::<RelayEvent>(CLIENT_BUFFER_SIZE);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(write_pump(write, write_rx, cancel.clone()));
        let read_handle = tokio::spawn(read_pump(read, event_tx, write_tx.clone(), cancel.clone()));

        let client = Self {
            write_tx,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
        };
        Ok((client, event_rx))
    }

    /// Asks the relay to seat us in `room`.
    pub fn join_room(&self, room: &RoomId) -> Result<(), PeerError> {
        let payload = RoomPayload {
            room_id: room.to_string(),
        };
        self.send(&Message::new(MessageType::JoinRoom, Some(&payload))?)
    }

    /// Sends a handshake message to the other occupant of `room`.
    pub fn send_handshake(&self, room: &RoomId, msg: &HandshakeMessage) -> Result<(), PeerError> {
        let request = RelayRequest::new(room.as_str(), msg)?;
        self.send(&Message::new(MessageType::Relay, Some(&request))?)
    }

    fn send(&self, msg: &Message) -> Result<(), PeerError> {
        let json = msg.to_json()?;
        self.write_tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|_| PeerError::RelayClosed)
    }

    /// Returns `true` while the connection is up.
    pub fn is_connected(&self) -> bool {
        !self.write_tx.is_closed() && !self.cancel.is_cancelled()
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<tungstenite::Message>, cancel: CancellationToken)
where
    S: futures_util::Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    warn!("relay write error: {e}");
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_pump<S>(
    mut read: S,
    events: mpsc::Sender<RelayEvent>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    // Any incoming frame resets the deadline; the relay pings well within it.
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("relay silent for too long, closing");
                break;
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        match frame {
                            tungstenite::Message::Text(text) => {
                                if let Some(event) = decode_event(&text) {
                                    if events.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.try_send(tungstenite::Message::Pong(data));
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("relay sent close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        debug!("relay read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    cancel.cancel();
    let _ = events.send(RelayEvent::Disconnected).await;
}

/// Decodes a relay envelope. Unknown or malformed messages yield `None`.
fn decode_event(text: &str) -> Option<RelayEvent> {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("invalid relay message: {e}");
            return None;
        }
    };

    let room = |msg: &Message| -> Option<RoomId> {
        let payload: RoomPayload = msg.require_payload().ok()?;
        RoomId::parse(&payload.room_id).ok()
    };

    let event = match msg.msg_type {
        MessageType::TransportAssistConfig => {
            let cfg: TransportAssistConfig = msg.require_payload().ok()?;
            RelayEvent::AssistConfig(cfg.ice_servers)
        }
        MessageType::RoomCreated => RelayEvent::RoomCreated(room(&msg)?),
        MessageType::RoomJoined => RelayEvent::RoomJoined(room(&msg)?),
        MessageType::RoomFull => RelayEvent::RoomFull(room(&msg)?),
        MessageType::PeersReady => RelayEvent::PeersReady,
        MessageType::PeerDisconnected => RelayEvent::PeerDisconnected,
        MessageType::Relay => {
            let relayed: RelayedMessage = msg.require_payload().ok()?;
            match relayed.handshake() {
                Ok(handshake) => RelayEvent::Handshake(handshake),
                Err(e) => {
                    warn!("undecodable handshake message: {e}");
                    return None;
                }
            }
        }
        MessageType::Error => RelayEvent::Error(msg.error?),
        other => {
            debug!(msg_type = ?other, "ignoring relay message");
            return None;
        }
    };
    Some(event)
}
