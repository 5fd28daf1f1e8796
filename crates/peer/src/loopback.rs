//! In-process transport pair.
//!
//! [`LoopbackNetwork`] hands out two [`LoopbackFactory`] values that build
//! transports connected to each other. The pair "connects" once each side
//! has a local description, a remote description and at least one remote
//! candidate, which is enough to drive a [`Negotiator`](crate::Negotiator)
//! through every state without a network stack.
//!
//! Frames are delivered immediately. The buffered amount the channels
//! report is set by hand with [`LoopbackNetwork::set_buffered_amount`] and
//! released with [`LoopbackNetwork::drain`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use p2pburger_protocol::{IceCandidate, IceServer, SdpType, SessionDescription};
use p2pburger_transfer::{DataChannel, TransferError};
use tokio::sync::mpsc;

use crate::negotiator::Role;
use crate::transport::{
    ConnectionState, Frame, PeerTransport, TransportError, TransportEvent, TransportFactory,
    TransportFuture,
};

#[derive(Default)]
struct Side {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    generation: u64,
    ready: bool,
    open: bool,
}

#[derive(Default)]
struct Link {
    sides: [Side; 2],
    connected: bool,
    buffered: usize,
}

impl Link {
    fn emit(&self, side: usize, event: TransportEvent) {
        if let Some(tx) = &self.sides[side].events {
            let _ = tx.send(event);
        }
    }

    fn emit_both(&self, event: TransportEvent) {
        self.emit(0, event.clone());
        self.emit(1, event);
    }
}

type SharedLink = Arc<Mutex<Link>>;

fn lock(link: &SharedLink) -> MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pair of connected transport factories.
pub struct LoopbackNetwork {
    link: SharedLink,
}

impl LoopbackNetwork {
    /// Returns the network handle and one factory per peer.
    pub fn new() -> (Self, LoopbackFactory, LoopbackFactory) {
        let link = SharedLink::default();
        let a = LoopbackFactory {
            link: Arc::clone(&link),
            side: 0,
        };
        let b = LoopbackFactory {
            link: Arc::clone(&link),
            side: 1,
        };
        (Self { link }, a, b)
    }

    /// Reports a failed connectivity state to both peers.
    pub fn fail(&self) {
        let link = lock(&self.link);
        link.emit_both(TransportEvent::ConnectionState(ConnectionState::Failed));
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link).connected
    }

    /// Makes both data channels report `amount` queued bytes.
    pub fn set_buffered_amount(&self, amount: usize) {
        lock(&self.link).buffered = amount;
    }

    /// Empties the queues and signals `BufferedAmountLow` to each open side.
    pub fn drain(&self) {
        let mut link = lock(&self.link);
        link.buffered = 0;
        for side in 0..link.sides.len() {
            if link.sides[side].open {
                link.emit(side, TransportEvent::BufferedAmountLow);
            }
        }
    }
}

/// Builds the transport for one side of a [`LoopbackNetwork`].
pub struct LoopbackFactory {
    link: SharedLink,
    side: usize,
}

impl TransportFactory for LoopbackFactory {
    type Transport = LoopbackTransport;

    fn create<'a>(
        &'a mut self,
        _ice_servers: &'a [IceServer],
        role: Role,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportFuture<'a, LoopbackTransport> {
        let transport = self.build(role, events);
        Box::pin(async move { Ok(transport) })
    }
}

impl LoopbackFactory {
    fn build(&self, role: Role, events: mpsc::UnboundedSender<TransportEvent>) -> LoopbackTransport {
        let mut link = lock(&self.link);
        let side = &mut link.sides[self.side];
        side.events = Some(events);
        side.generation += 1;
        side.ready = false;
        side.open = false;
        let generation = side.generation;
        link.connected = false;

        let channel = LoopbackChannel {
            link: Arc::clone(&self.link),
            peer: 1 - self.side,
        };
        LoopbackTransport {
            link: Arc::clone(&self.link),
            side: self.side,
            generation,
            local: None,
            remote: None,
            remote_candidates: 0,
            // The offerer creates the channel up front; the answerer's
            // appears when the connection opens.
            channel: (role == Role::Offerer).then(|| channel.clone()),
            pending_channel: channel,
            closed: false,
        }
    }
}

/// One side of a loopback connection.
pub struct LoopbackTransport {
    link: SharedLink,
    side: usize,
    generation: u64,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: usize,
    channel: Option<LoopbackChannel>,
    pending_channel: LoopbackChannel,
    closed: bool,
}

impl LoopbackTransport {
    fn check_closed(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn set_local(&mut self, sdp_type: SdpType) -> SessionDescription {
        let desc = SessionDescription {
            sdp_type,
            sdp: format!(
                "v=0\r\no=loopback {} {} IN IP4 127.0.0.1\r\n",
                self.side, self.generation
            ),
        };
        self.local = Some(desc.clone());

        let link = lock(&self.link);
        link.emit(
            self.side,
            TransportEvent::LocalCandidate(IceCandidate {
                sdp_mline_index: Some(0),
                sdp_mid: Some("0".into()),
                candidate: format!(
                    "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                    self.side,
                    50000 + self.side
                ),
            }),
        );
        desc
    }

    /// Opens the connection once both sides are ready.
    fn try_connect(&mut self) {
        if self.closed {
            return;
        }
        if self.local.is_none() || self.remote.is_none() || self.remote_candidates == 0 {
            return;
        }

        let mut link = lock(&self.link);
        let me = &mut link.sides[self.side];
        if me.generation != self.generation || me.ready {
            return;
        }
        me.ready = true;
        link.emit(
            self.side,
            TransportEvent::ConnectionState(ConnectionState::Connecting),
        );

        if link.sides.iter().all(|s| s.ready) && !link.connected {
            link.connected = true;
            for side in &mut link.sides {
                side.open = true;
            }
            link.emit_both(TransportEvent::ConnectionState(ConnectionState::Connected));
            link.emit_both(TransportEvent::DataChannelOpen);
        }
    }
}

impl PeerTransport for LoopbackTransport {
    type Channel = LoopbackChannel;

    fn create_offer(&mut self) -> TransportFuture<'_, SessionDescription> {
        Box::pin(async move {
            self.check_closed()?;
            let offer = self.set_local(SdpType::Offer);
            self.try_connect();
            Ok(offer)
        })
    }

    fn create_answer(&mut self) -> TransportFuture<'_, SessionDescription> {
        Box::pin(async move {
            self.check_closed()?;
            match &self.remote {
                Some(d) if d.sdp_type == SdpType::Offer => {}
                _ => {
                    return Err(TransportError::Negotiation(
                        "no remote offer to answer".into(),
                    ));
                }
            }
            let answer = self.set_local(SdpType::Answer);
            self.try_connect();
            Ok(answer)
        })
    }

    fn set_remote_description(&mut self, desc: SessionDescription) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.check_closed()?;
            if desc.sdp.is_empty() {
                return Err(TransportError::Negotiation("empty description".into()));
            }
            self.remote = Some(desc);
            self.try_connect();
            Ok(())
        })
    }

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.check_closed()?;
            if !candidate.candidate.starts_with("candidate:") {
                return Err(TransportError::InvalidCandidate(candidate.candidate));
            }
            self.remote_candidates += 1;
            self.try_connect();
            Ok(())
        })
    }

    fn data_channel(&mut self) -> Option<&mut LoopbackChannel> {
        if self.closed {
            return None;
        }
        if self.channel.is_none() && lock(&self.link).sides[self.side].open {
            self.channel = Some(self.pending_channel.clone());
        }
        self.channel.as_mut()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel = None;

        let mut link = lock(&self.link);
        let me = &mut link.sides[self.side];
        if me.generation != self.generation {
            return;
        }
        let was_open = me.open;
        me.open = false;
        me.ready = false;
        me.events = None;
        link.connected = false;

        let peer = 1 - self.side;
        if was_open && link.sides[peer].open {
            link.sides[peer].open = false;
            link.emit(peer, TransportEvent::DataChannelClosed);
            link.emit(
                peer,
                TransportEvent::ConnectionState(ConnectionState::Disconnected),
            );
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Data channel of a loopback transport. Frames are delivered to the peer
/// in send order.
#[derive(Clone)]
pub struct LoopbackChannel {
    link: SharedLink,
    peer: usize,
}

impl LoopbackChannel {
    fn deliver(&self, frame: Frame) -> Result<(), TransferError> {
        let link = lock(&self.link);
        let peer = &link.sides[self.peer];
        match &peer.events {
            Some(tx) if peer.open => tx
                .send(TransportEvent::Message(frame))
                .map_err(|_| TransferError::ChannelClosed),
            _ => Err(TransferError::ChannelClosed),
        }
    }
}

impl DataChannel for LoopbackChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransferError> {
        self.deliver(Frame::Text(text.to_owned()))
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.deliver(Frame::Binary(data.to_vec()))
    }

    fn buffered_amount(&self) -> usize {
        lock(&self.link).buffered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn candidates(events: &[TransportEvent]) -> Vec<IceCandidate> {
        events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::LocalCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn pair_connects_and_delivers_frames() {
        let (net, mut fa, mut fb) = LoopbackNetwork::new();
        let (atx, mut arx) = mpsc::unbounded_channel();
        let (btx, mut brx) = mpsc::unbounded_channel();
        let mut a = fa.create(&[], Role::Offerer, atx).await.unwrap();
        let mut b = fb.create(&[], Role::Answerer, btx).await.unwrap();
        assert!(b.data_channel().is_none());

        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        for c in candidates(&drain(&mut arx)) {
            b.add_ice_candidate(c).await.unwrap();
        }
        for c in candidates(&drain(&mut brx)) {
            a.add_ice_candidate(c).await.unwrap();
        }

        assert!(net.is_connected());
        assert!(drain(&mut arx).contains(&TransportEvent::DataChannelOpen));
        assert!(drain(&mut brx).contains(&TransportEvent::DataChannelOpen));

        a.data_channel().unwrap().send_text("hi").unwrap();
        a.data_channel().unwrap().send_binary(&[1, 2, 3]).unwrap();
        assert_eq!(
            drain(&mut brx),
            vec![
                TransportEvent::Message(Frame::Text("hi".into())),
                TransportEvent::Message(Frame::Binary(vec![1, 2, 3])),
            ]
        );

        b.data_channel().unwrap();
        b.close();
        let after = drain(&mut arx);
        assert!(after.contains(&TransportEvent::DataChannelClosed));
        assert!(a.data_channel().unwrap().send_text("late").is_err());
    }

    #[tokio::test]
    async fn answer_without_offer_fails() {
        let (_net, _fa, mut fb) = LoopbackNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut b = fb.create(&[], Role::Answerer, tx).await.unwrap();
        assert!(matches!(
            b.create_answer().await,
            Err(TransportError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn fail_reaches_both_sides() {
        let (net, mut fa, mut fb) = LoopbackNetwork::new();
        let (atx, mut arx) = mpsc::unbounded_channel();
        let (btx, mut brx) = mpsc::unbounded_channel();
        let _a = fa.create(&[], Role::Offerer, atx).await.unwrap();
        let _b = fb.create(&[], Role::Answerer, btx).await.unwrap();

        net.fail();
        let failed = TransportEvent::ConnectionState(ConnectionState::Failed);
        assert_eq!(drain(&mut arx), vec![failed.clone()]);
        assert_eq!(drain(&mut brx), vec![failed]);
    }

    #[tokio::test]
    async fn buffered_amount_holds_until_drained() {
        let (net, mut fa, mut fb) = LoopbackNetwork::new();
        let (atx, mut arx) = mpsc::unbounded_channel();
        let (btx, mut brx) = mpsc::unbounded_channel();
        let mut a = fa.create(&[], Role::Offerer, atx).await.unwrap();
        let mut b = fb.create(&[], Role::Answerer, btx).await.unwrap();

        // Not open yet: nobody hears about the drain.
        net.drain();
        assert!(drain(&mut arx).is_empty());

        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(answer).await.unwrap();
        for c in candidates(&drain(&mut arx)) {
            b.add_ice_candidate(c).await.unwrap();
        }
        for c in candidates(&drain(&mut brx)) {
            a.add_ice_candidate(c).await.unwrap();
        }
        drain(&mut arx);
        drain(&mut brx);

        net.set_buffered_amount(2 * 1024 * 1024);
        assert_eq!(a.data_channel().unwrap().buffered_amount(), 2 * 1024 * 1024);

        net.drain();
        assert_eq!(a.data_channel().unwrap().buffered_amount(), 0);
        assert_eq!(drain(&mut arx), vec![TransportEvent::BufferedAmountLow]);
        assert_eq!(drain(&mut brx), vec![TransportEvent::BufferedAmountLow]);
    }

    #[tokio::test]
    async fn closed_transport_rejects_operations() {
        let (_net, mut fa, _fb) = LoopbackNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut a = fa.create(&[], Role::Offerer, tx).await.unwrap();
        a.close();
        assert!(matches!(a.create_offer().await, Err(TransportError::Closed)));
        assert!(a.data_channel().is_none());
    }
}
