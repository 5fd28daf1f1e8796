//! Handler trait for processing rendezvous messages.
//!
//! The server framework owns connection management and routing; a
//! [`Handler`] supplies what happens for each message type.

use std::future::Future;
use std::pin::Pin;

use p2pburger_protocol::constants::WS_ERR_CODE_NOT_IMPLEMENTED;
use p2pburger_protocol::envelope::Message;

use crate::connection::{ParticipantId, Sender};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from connected participants.
///
/// Default implementations reply with "not implemented" so handlers only
/// need to override the message types they care about.
pub trait Handler: Send + Sync + 'static {
    /// Called once per connection, before any message is read.
    fn on_connected(&self, participant: ParticipantId, sender: Sender) -> HandlerFuture<'_> {
        let _ = (participant, sender);
        Box::pin(async {})
    }

    /// Called for `join_room`.
    fn on_join_room(
        &self,
        participant: ParticipantId,
        sender: Sender,
        msg: Message,
    ) -> HandlerFuture<'_> {
        let _ = (participant, msg);
        Box::pin(async move {
            let _ = sender.send_error(WS_ERR_CODE_NOT_IMPLEMENTED, "join_room not implemented");
        })
    }

    /// Called for `relay`.
    fn on_relay(&self, participant: ParticipantId, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        let _ = (participant, msg);
        Box::pin(async move {
            let _ = sender.send_error(WS_ERR_CODE_NOT_IMPLEMENTED, "relay not implemented");
        })
    }

    /// Called once the connection has closed, for any reason.
    fn on_disconnected(&self, participant: ParticipantId) -> HandlerFuture<'_> {
        let _ = participant;
        Box::pin(async {})
    }
}
