//! The relay logic: room joins, handshake forwarding and departure notices.

use p2pburger_protocol::constants::{
    MessageType, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_CONFLICT,
};
use p2pburger_protocol::envelope::Message;
use p2pburger_protocol::messages::{RelayRequest, RoomPayload, TransportAssistConfig};
use p2pburger_protocol::room::RoomId;
use p2pburger_protocol::types::IceServer;

use crate::connection::{ParticipantId, Sender};
use crate::handler::{Handler, HandlerFuture};
use crate::registry::{JoinOutcome, RegistryError, RoomRegistry};

/// [`Handler`] that implements the rendezvous service.
///
/// Every new connection first receives the connectivity-assist server list.
/// Joins go through the [`RoomRegistry`]; relay requests are forwarded
/// verbatim to the other occupant of the named room.
pub struct RelayHandler {
    registry: RoomRegistry<Sender>,
    assist: TransportAssistConfig,
}

impl RelayHandler {
    pub fn new(ice_servers: Vec<IceServer>) -> Self {
        Self {
            registry: RoomRegistry::new(),
            assist: TransportAssistConfig { ice_servers },
        }
    }

    pub fn registry(&self) -> &RoomRegistry<Sender> {
        &self.registry
    }

    fn join(
        &self,
        participant: ParticipantId,
        sender: Sender,
        msg: &Message,
    ) -> Result<(RoomId, JoinOutcome), RegistryError> {
        let payload: RoomPayload = msg.require_payload()?;
        let room = RoomId::parse(&payload.room_id)?;
        tracing::info!(%participant, room = %room, "[Join Attempt] participant requested room");

        let outcome = self.registry.join(&room, participant, sender)?;
        Ok((room, outcome))
    }
}

impl Handler for RelayHandler {
    fn on_connected(&self, participant: ParticipantId, sender: Sender) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::info!(%participant, "[Connection] new participant connected");
            match Message::new(MessageType::TransportAssistConfig, Some(&self.assist)) {
                Ok(msg) => {
                    let _ = sender.send_msg(&msg);
                }
                Err(e) => tracing::error!("failed to encode transport assist config: {e}"),
            }
        })
    }

    fn on_join_room(
        &self,
        participant: ParticipantId,
        sender: Sender,
        msg: Message,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            match self.join(participant, sender.clone(), &msg) {
                Ok((room, JoinOutcome::Created)) => {
                    tracing::info!(%participant, room = %room, "[Room Created] first participant seated");
                }
                Ok((room, JoinOutcome::Joined)) => {
                    tracing::info!(%participant, room = %room, "[Room Joined] second participant seated, peers ready");
                }
                Ok((room, JoinOutcome::Full)) => {
                    tracing::info!(%participant, room = %room, "[Room Full] join rejected");
                }
                Err(e @ RegistryError::AlreadySeated { .. }) => {
                    tracing::warn!(%participant, "join rejected: {e}");
                    let _ = sender.send_error(WS_ERR_CODE_CONFLICT, &e.to_string());
                }
                Err(e @ (RegistryError::InvalidRoomId(_) | RegistryError::MalformedRequest(_))) => {
                    tracing::warn!(%participant, "join rejected: {e}");
                    let _ = sender.send_error(WS_ERR_CODE_BAD_REQUEST, &e.to_string());
                }
            }
        })
    }

    fn on_relay(&self, participant: ParticipantId, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let request: RelayRequest = match msg.require_payload() {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(%participant, "malformed relay request: {e}");
                    let _ = sender.send_error(WS_ERR_CODE_BAD_REQUEST, &e.to_string());
                    return;
                }
            };
            let room = match RoomId::parse(&request.room_id) {
                Ok(r) => r,
                Err(e) => {
                    let _ = sender.send_error(WS_ERR_CODE_BAD_REQUEST, &e.to_string());
                    return;
                }
            };

            match self.registry.relay(&room, participant, request.message) {
                Some(to) => {
                    tracing::debug!(from = %participant, %to, room = %room, "[Relay] message forwarded");
                }
                None => {
                    tracing::debug!(from = %participant, room = %room, "[Relay] no peer, message dropped");
                }
            }
        })
    }

    fn on_disconnected(&self, participant: ParticipantId) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(departure) = self.registry.leave(participant) {
                match departure.notified {
                    Some(peer) => tracing::info!(
                        %participant,
                        room = %departure.room,
                        %peer,
                        "[Disconnection] notified remaining peer"
                    ),
                    None => tracing::info!(
                        %participant,
                        room = %departure.room,
                        "[Disconnection] room is now empty"
                    ),
                }
            }
        })
    }
}
