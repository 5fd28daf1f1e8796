//! Room membership.
//!
//! [`RoomRegistry`] maps each room to at most [`ROOM_CAPACITY`] participant
//! handles. All membership changes and the notifications they cause happen
//! under one lock, so two simultaneous joiners can never both create the
//! same room and a departure notice can never overtake a `peers_ready`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use p2pburger_protocol::constants::{MessageType, ROOM_CAPACITY};
use p2pburger_protocol::envelope::Message;
use p2pburger_protocol::messages::{RelayedMessage, RoomPayload};
use p2pburger_protocol::room::RoomId;
use serde_json::value::RawValue;

use crate::connection::ParticipantId;

/// Delivery side of a participant handle.
///
/// Delivery is fire-and-forget: a handle whose connection is already gone
/// drops the message.
pub trait Notify: Clone + Send + Sync + 'static {
    fn notify(&self, msg: &Message);
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room was empty; the requester is its first occupant.
    Created,
    /// The requester is the second occupant; both were told to start.
    Joined,
    /// The room already has two occupants; nothing changed.
    Full,
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("participant {participant} is already in room {room}")]
    AlreadySeated {
        participant: ParticipantId,
        room: RoomId,
    },

    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    /// The request payload was absent or did not decode.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl From<p2pburger_protocol::ProtocolError> for RegistryError {
    fn from(e: p2pburger_protocol::ProtocolError) -> Self {
        match e {
            p2pburger_protocol::ProtocolError::InvalidRoomId(reason) => Self::InvalidRoomId(reason),
            other @ (p2pburger_protocol::ProtocolError::Json(_)
            | p2pburger_protocol::ProtocolError::MissingPayload(_)) => {
                Self::MalformedRequest(other.to_string())
            }
        }
    }
}

/// What a departure left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: RoomId,
    /// The occupant that was told about the departure, if any.
    pub notified: Option<ParticipantId>,
}

struct Member<H> {
    id: ParticipantId,
    handle: H,
}

struct Inner<H> {
    rooms: HashMap<RoomId, Vec<Member<H>>>,
    seats: HashMap<ParticipantId, RoomId>,
}

/// Room membership service.
pub struct RoomRegistry<H: Notify> {
    inner: Mutex<Inner<H>>,
}

impl<H: Notify> RoomRegistry<H> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rooms: HashMap::new(),
                seats: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<H>> {
        // Registry state stays consistent across a panicking notifier.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seats `participant` in `room`, or reports the room full.
    ///
    /// Sends `room_created`, `room_joined` + `peers_ready` (to both) or
    /// `room_full` to the relevant handles before returning.
    pub fn join(
        &self,
        room: &RoomId,
        participant: ParticipantId,
        handle: H,
    ) -> Result<JoinOutcome, RegistryError> {
        let mut inner = self.lock();

        if let Some(current) = inner.seats.get(&participant) {
            return Err(RegistryError::AlreadySeated {
                participant,
                room: current.clone(),
            });
        }

        let members = inner.rooms.entry(room.clone()).or_default();
        let outcome = match members.len() {
            0 => {
                handle.notify(&room_message(MessageType::RoomCreated, room));
                members.push(Member {
                    id: participant,
                    handle,
                });
                JoinOutcome::Created
            }
            n if n < ROOM_CAPACITY => {
                handle.notify(&room_message(MessageType::RoomJoined, room));
                members.push(Member {
                    id: participant,
                    handle,
                });
                let ready = Message::signal(MessageType::PeersReady);
                for member in members.iter() {
                    member.handle.notify(&ready);
                }
                JoinOutcome::Joined
            }
            _ => {
                handle.notify(&room_message(MessageType::RoomFull, room));
                return Ok(JoinOutcome::Full);
            }
        };

        inner.seats.insert(participant, room.clone());
        Ok(outcome)
    }

    /// Forwards `message` from `sender` to the other occupant of `room`.
    ///
    /// Returns the recipient, or `None` when the message was dropped
    /// because `sender` is not in `room` or is alone there.
    pub fn relay(
        &self,
        room: &RoomId,
        sender: ParticipantId,
        message: Box<RawValue>,
    ) -> Option<ParticipantId> {
        let inner = self.lock();
        if inner.seats.get(&sender) != Some(room) {
            return None;
        }
        let other = inner
            .rooms
            .get(room)?
            .iter()
            .find(|m| m.id != sender)?;

        let payload = RelayedMessage { message };
        match Message::new(MessageType::Relay, Some(&payload)) {
            Ok(msg) => other.handle.notify(&msg),
            Err(e) => {
                tracing::error!("failed to encode relayed message: {e}");
                return None;
            }
        }
        Some(other.id)
    }

    /// Removes `participant` from its room and tells the remaining
    /// occupant, if any, with `peer_disconnected`.
    ///
    /// Returns `None` if the participant was not seated.
    pub fn leave(&self, participant: ParticipantId) -> Option<Departure> {
        let mut inner = self.lock();
        let room = inner.seats.remove(&participant)?;

        let mut notified = None;
        let now_empty = match inner.rooms.get_mut(&room) {
            Some(members) => {
                members.retain(|m| m.id != participant);
                if let Some(remaining) = members.first() {
                    remaining
                        .handle
                        .notify(&Message::signal(MessageType::PeerDisconnected));
                    notified = Some(remaining.id);
                }
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.rooms.remove(&room);
        }

        Some(Departure { room, notified })
    }

    /// Number of participants currently in `room`.
    pub fn occupancy(&self, room: &RoomId) -> usize {
        self.lock().rooms.get(room).map_or(0, Vec::len)
    }

    /// The room `participant` is seated in.
    pub fn room_of(&self, participant: ParticipantId) -> Option<RoomId> {
        self.lock().seats.get(&participant).cloned()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }
}

impl<H: Notify> Default for RoomRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn room_message(msg_type: MessageType, room: &RoomId) -> Message {
    let payload = RoomPayload {
        room_id: room.to_string(),
    };
    // A struct with one string field always serializes.
    Message::new(msg_type, Some(&payload)).unwrap_or_else(|_| Message::signal(msg_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records every message delivered to it.
    #[derive(Clone, Default)]
    struct Inbox(Arc<Mutex<Vec<Message>>>);

    impl Notify for Inbox {
        fn notify(&self, msg: &Message) {
            self.0.lock().unwrap().push(msg.clone());
        }
    }

    impl Inbox {
        fn types(&self) -> Vec<MessageType> {
            self.0.lock().unwrap().iter().map(|m| m.msg_type).collect()
        }

        fn last(&self) -> Message {
            self.0.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_owned()).unwrap()
    }

    #[test]
    fn created_joined_full_scenario() {
        let registry = RoomRegistry::new();
        let r = room("abc1234");
        let (x, y, z) = (Inbox::default(), Inbox::default(), Inbox::default());
        let (xid, yid, zid) = (ParticipantId::new(), ParticipantId::new(), ParticipantId::new());

        assert_eq!(registry.join(&r, xid, x.clone()).unwrap(), JoinOutcome::Created);
        assert_eq!(x.types(), vec![MessageType::RoomCreated]);

        assert_eq!(registry.join(&r, yid, y.clone()).unwrap(), JoinOutcome::Joined);
        assert_eq!(y.types(), vec![MessageType::RoomJoined, MessageType::PeersReady]);
        assert_eq!(x.types(), vec![MessageType::RoomCreated, MessageType::PeersReady]);

        assert_eq!(registry.join(&r, zid, z.clone()).unwrap(), JoinOutcome::Full);
        assert_eq!(z.types(), vec![MessageType::RoomFull]);
        assert_eq!(registry.occupancy(&r), 2);
        assert_eq!(registry.room_of(zid), None);

        let full: RoomPayload = z.last().require_payload().unwrap();
        assert_eq!(full.room_id, "abc1234");
    }

    #[test]
    fn third_joiner_never_added_in_any_room() {
        let registry = RoomRegistry::new();
        for id in ["a", "room-2", "Z_9"] {
            let r = room(id);
            registry.join(&r, ParticipantId::new(), Inbox::default()).unwrap();
            registry.join(&r, ParticipantId::new(), Inbox::default()).unwrap();
            for _ in 0..3 {
                let outcome = registry
                    .join(&r, ParticipantId::new(), Inbox::default())
                    .unwrap();
                assert_eq!(outcome, JoinOutcome::Full);
                assert_eq!(registry.occupancy(&r), 2);
            }
        }
    }

    #[test]
    fn seated_participant_cannot_join_again() {
        let registry = RoomRegistry::new();
        let id = ParticipantId::new();
        registry.join(&room("one"), id, Inbox::default()).unwrap();
        let err = registry.join(&room("two"), id, Inbox::default()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadySeated {
                participant: id,
                room: room("one"),
            }
        );
        assert_eq!(registry.occupancy(&room("two")), 0);
    }

    #[test]
    fn leave_notifies_remaining_occupant_once() {
        let registry = RoomRegistry::new();
        let r = room("abc1234");
        let (a, b) = (Inbox::default(), Inbox::default());
        let (aid, bid) = (ParticipantId::new(), ParticipantId::new());
        registry.join(&r, aid, a).unwrap();
        registry.join(&r, bid, b.clone()).unwrap();

        let departure = registry.leave(aid).unwrap();
        assert_eq!(departure.room, r);
        assert_eq!(departure.notified, Some(bid));
        assert!(registry.leave(aid).is_none());

        let disconnects = b
            .types()
            .into_iter()
            .filter(|t| *t == MessageType::PeerDisconnected)
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(registry.occupancy(&r), 1);
    }

    #[test]
    fn empty_room_is_destroyed_and_recreated() {
        let registry = RoomRegistry::new();
        let r = room("abc1234");
        let id = ParticipantId::new();
        registry.join(&r, id, Inbox::default()).unwrap();
        assert_eq!(registry.room_count(), 1);

        let departure = registry.leave(id).unwrap();
        assert_eq!(departure.notified, None);
        assert_eq!(registry.room_count(), 0);

        let again = registry
            .join(&r, ParticipantId::new(), Inbox::default())
            .unwrap();
        assert_eq!(again, JoinOutcome::Created);
    }

    #[test]
    fn leaving_frees_a_seat() {
        let registry = RoomRegistry::new();
        let r = room("abc1234");
        let first = ParticipantId::new();
        registry.join(&r, first, Inbox::default()).unwrap();
        registry.join(&r, ParticipantId::new(), Inbox::default()).unwrap();
        registry.leave(first);

        let late = Inbox::default();
        let outcome = registry.join(&r, ParticipantId::new(), late.clone()).unwrap();
        assert_eq!(outcome, JoinOutcome::Joined);
        assert_eq!(late.types(), vec![MessageType::RoomJoined, MessageType::PeersReady]);
    }

    #[test]
    fn relay_reaches_only_the_other_occupant() {
        let registry = RoomRegistry::new();
        let r = room("abc1234");
        let (a, b) = (Inbox::default(), Inbox::default());
        let (aid, bid) = (ParticipantId::new(), ParticipantId::new());
        registry.join(&r, aid, a.clone()).unwrap();
        registry.join(&r, bid, b.clone()).unwrap();

        let to = registry.relay(&r, aid, raw(r#"{"type":"offer","sdp":"v=0"}"#));
        assert_eq!(to, Some(bid));

        let delivered = b.last();
        assert_eq!(delivered.msg_type, MessageType::Relay);
        let relayed: RelayedMessage = delivered.require_payload().unwrap();
        assert_eq!(relayed.message.get(), r#"{"type":"offer","sdp":"v=0"}"#);
        assert_eq!(a.last().msg_type, MessageType::PeersReady);
    }

    #[test]
    fn relay_without_second_occupant_is_dropped() {
        let registry = RoomRegistry::new();
        let r = room("abc1234");
        let a = Inbox::default();
        let aid = ParticipantId::new();
        registry.join(&r, aid, a.clone()).unwrap();

        assert_eq!(registry.relay(&r, aid, raw("{}")), None);
        assert_eq!(a.types(), vec![MessageType::RoomCreated]);
    }

    #[test]
    fn relay_from_outsider_is_dropped() {
        let registry = RoomRegistry::new();
        let r = room("abc1234");
        let b = Inbox::default();
        registry.join(&r, ParticipantId::new(), Inbox::default()).unwrap();
        registry.join(&r, ParticipantId::new(), b.clone()).unwrap();
        let before = b.types().len();

        assert_eq!(registry.relay(&r, ParticipantId::new(), raw("{}")), None);
        assert_eq!(b.types().len(), before);
    }

    #[test]
    fn concurrent_joins_create_room_once() {
        let registry = Arc::new(RoomRegistry::new());
        let r = room("race");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let r = r.clone();
                std::thread::spawn(move || {
                    registry
                        .join(&r, ParticipantId::new(), Inbox::default())
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<JoinOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let count = |o: JoinOutcome| outcomes.iter().filter(|x| **x == o).count();
        assert_eq!(count(JoinOutcome::Created), 1);
        assert_eq!(count(JoinOutcome::Joined), 1);
        assert_eq!(count(JoinOutcome::Full), 6);
        assert_eq!(registry.occupancy(&r), 2);
    }

    #[test]
    fn protocol_errors_keep_their_kind() {
        use p2pburger_protocol::ProtocolError;

        let missing = RegistryError::from(ProtocolError::MissingPayload(MessageType::JoinRoom));
        assert!(matches!(missing, RegistryError::MalformedRequest(_)));

        let garbled = serde_json::from_str::<RoomPayload>("{").unwrap_err();
        assert!(matches!(
            RegistryError::from(ProtocolError::from(garbled)),
            RegistryError::MalformedRequest(_)
        ));

        let bad_id = RoomId::parse("../x").unwrap_err();
        assert!(matches!(RegistryError::from(bad_id), RegistryError::InvalidRoomId(_)));
    }
}
