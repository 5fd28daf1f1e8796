//! Participant connection management: read/write pumps, ping/pong, send buffering.

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use p2pburger_protocol::constants::{
    MessageType, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_NOT_IMPLEMENTED, WS_MAX_MESSAGE_SIZE,
    WS_PING_PERIOD, WS_PONG_WAIT,
};
use p2pburger_protocol::envelope::Message;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;
use crate::registry::Notify;

/// Opaque identity assigned to each connection by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantId(uuid::Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Metadata about a connected participant.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub participant: ParticipantId,
    pub remote_addr: String,
}

/// Handle for sending messages to a connected participant.
///
/// Cloneable; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` if the buffer is full or the participant is gone.
    pub fn send_msg(&self, msg: &Message) -> Result<(), SendError> {
        let json = msg.to_json().map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an `error` envelope.
    pub fn send_error(&self, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(&Message::error(code, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn channel() -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        (Self { tx }, rx)
    }
}

impl Notify for Sender {
    fn notify(&self, msg: &Message) {
        let _ = self.send_msg(msg);
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Serves one WebSocket connection until it closes or `cancel` fires.
///
/// The write pump runs as a background task; the read pump runs on the
/// caller's task. `on_connected` runs before the first frame is read and
/// `on_disconnected` after the read pump exits.
pub async fn serve_connection<S, H>(
    ws_stream: S,
    meta: ConnectionMeta,
    handler: Arc<H>,
    server_cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };
    let participant = meta.participant;

    let (ws_sink, ws_stream) = ws_stream.split();
    let writer = tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    handler.on_connected(participant, sender.clone()).await;
    read_pump(ws_stream, participant, sender, Arc::clone(&handler), cancel.clone()).await;

    // When the read pump exits, stop the write pump too.
    cancel.cancel();
    handler.on_disconnected(participant).await;
    let _ = writer.await;
    tracing::info!(%participant, remote = %meta.remote_addr, "[Disconnection] participant left");
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
async fn read_pump<S, H>(
    mut stream: S,
    participant: ParticipantId,
    sender: Sender,
    handler: Arc<H>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut got_pong = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !got_pong {
                    tracing::warn!(%participant, "pong timeout, closing connection");
                    break;
                }
                got_pong = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if text.len() > WS_MAX_MESSAGE_SIZE {
                            tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                            continue;
                        }
                        got_pong = true;
                        dispatch_text(&handler, participant, &sender, &text).await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        tracing::warn!(%participant, len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        got_pong = true;
                        pong_deadline.reset();
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::debug!(%participant, "received close frame");
                        break;
                    }
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::debug!(%participant, "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(
    handler: &Arc<H>,
    participant: ParticipantId,
    sender: &Sender,
    text: &str,
) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(%participant, "invalid message JSON: {e}");
            let _ = sender.send_error(WS_ERR_CODE_BAD_REQUEST, "invalid message");
            return;
        }
    };

    let s = sender.clone();
    match msg.msg_type {
        MessageType::JoinRoom => handler.on_join_room(participant, s, msg).await,
        MessageType::Relay => handler.on_relay(participant, s, msg).await,
        other => {
            tracing::warn!(%participant, msg_type = ?other, "unhandled message type");
            let _ = sender.send_error(WS_ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}
