//! Direct transport on a WebRTC peer connection.
//!
//! [`WebRtcFactory`] builds one `RTCPeerConnection` per negotiation, fed
//! with the connectivity-assist servers pushed by the relay. The offerer
//! opens the [`DATA_CHANNEL_LABEL`] channel; the answerer receives it.
//!
//! The data channel's send calls are asynchronous, so [`WebRtcChannel`]
//! queues frames to a writer task. Its buffered amount counts both the
//! frames still in that queue and the bytes the SCTP stream holds.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use bytes::Bytes;
use p2pburger_protocol::constants::DATA_CHANNEL_LABEL;
use p2pburger_protocol::{IceCandidate, IceServer, SdpType, SessionDescription};
use p2pburger_transfer::{DataChannel, MAX_BUFFERED_AMOUNT, TransferError};
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::negotiator::Role;
use crate::transport::{
    ConnectionState, Frame, PeerTransport, TransportError, TransportEvent, TransportFactory,
    TransportFuture,
};

/// A paused sender is woken once the buffered amount falls to this level.
pub const BUFFERED_AMOUNT_LOW_THRESHOLD: usize = MAX_BUFFERED_AMOUNT / 4;

fn negotiation(err: webrtc::Error) -> TransportError {
    TransportError::Negotiation(err.to_string())
}

/// Converts relay-supplied servers into the peer connection's form.
pub fn rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.iter().map(String::from).collect(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn candidate_to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: None,
    }
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        sdp_mline_index: init.sdp_mline_index,
        sdp_mid: init.sdp_mid,
        candidate: init.candidate,
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// Builds [`WebRtcTransport`]s.
pub struct WebRtcFactory {
    api: API,
}

impl WebRtcFactory {
    pub fn new() -> Result<Self, TransportError> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(negotiation)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

impl TransportFactory for WebRtcFactory {
    type Transport = WebRtcTransport;

    fn create<'a>(
        &'a mut self,
        ice_servers: &'a [IceServer],
        role: Role,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportFuture<'a, WebRtcTransport> {
        Box::pin(async move {
            let config = RTCConfiguration {
                ice_servers: rtc_ice_servers(ice_servers),
                ..Default::default()
            };
            let pc = Arc::new(
                self.api
                    .new_peer_connection(config)
                    .await
                    .map_err(negotiation)?,
            );

            let tx = events.clone();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                Box::pin(async move {
                    // `None` marks the end of gathering.
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = tx.send(TransportEvent::LocalCandidate(candidate_from_init(init)));
                        }
                        Err(e) => tracing::warn!("unserializable local candidate: {e}"),
                    }
                })
            }));

            let tx = events.clone();
            pc.on_peer_connection_state_change(Box::new(move |state| {
                let tx = tx.clone();
                Box::pin(async move {
                    tracing::debug!(%state, "peer connection state changed");
                    if let Some(state) = connection_state(state) {
                        let _ = tx.send(TransportEvent::ConnectionState(state));
                    }
                })
            }));

            let slot = ChannelSlot::default();
            match role {
                Role::Offerer => {
                    let dc = pc
                        .create_data_channel(DATA_CHANNEL_LABEL, None)
                        .await
                        .map_err(negotiation)?;
                    slot.attach(dc, events.clone()).await;
                }
                Role::Answerer => {
                    let slot = slot.clone();
                    let tx = events.clone();
                    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                        let slot = slot.clone();
                        let tx = tx.clone();
                        Box::pin(async move {
                            if dc.label() != DATA_CHANNEL_LABEL {
                                tracing::warn!(label = dc.label(), "unexpected data channel ignored");
                                return;
                            }
                            slot.attach(dc, tx).await;
                        })
                    }));
                }
            }

            Ok(WebRtcTransport {
                pc,
                slot,
                channel: None,
                closed: false,
            })
        })
    }
}

/// Holds the data channel once it exists. The answerer's arrives on a
/// callback, so the slot is shared with it.
#[derive(Clone, Default)]
struct ChannelSlot(Arc<Mutex<Option<WebRtcChannel>>>);

impl ChannelSlot {
    async fn attach(&self, dc: Arc<RTCDataChannel>, events: mpsc::UnboundedSender<TransportEvent>) {
        let buffered = Arc::new(Buffered::default());

        let tx = events.clone();
        dc.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                tracing::info!("data channel open");
                let _ = tx.send(TransportEvent::DataChannelOpen);
            })
        }));

        let tx = events.clone();
        dc.on_close(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                tracing::info!("data channel closed");
                let _ = tx.send(TransportEvent::DataChannelClosed);
            })
        }));

        let tx = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                let frame = if msg.is_string {
                    Frame::Text(String::from_utf8_lossy(&msg.data).into_owned())
                } else {
                    Frame::Binary(msg.data.to_vec())
                };
                let _ = tx.send(TransportEvent::Message(frame));
            })
        }));

        dc.set_buffered_amount_low_threshold(BUFFERED_AMOUNT_LOW_THRESHOLD)
            .await;
        let weak: Weak<RTCDataChannel> = Arc::downgrade(&dc);
        let state = Arc::clone(&buffered);
        let tx = events.clone();
        dc.on_buffered_amount_low(Box::new(move || {
            let weak = weak.clone();
            let state = Arc::clone(&state);
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(dc) = weak.upgrade() {
                    state.sctp.store(dc.buffered_amount().await, Ordering::SeqCst);
                }
                state.notify_if_drained(&tx);
            })
        }))
        .await;

        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(
            Arc::clone(&dc),
            rx,
            Arc::clone(&buffered),
            events,
        ));

        let channel = WebRtcChannel { queue, buffered };
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    fn take(&self) -> Option<WebRtcChannel> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// A peer connection with one data channel.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    slot: ChannelSlot,
    channel: Option<WebRtcChannel>,
    closed: bool,
}

impl WebRtcTransport {
    fn check_closed(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl PeerTransport for WebRtcTransport {
    type Channel = WebRtcChannel;

    fn create_offer(&mut self) -> TransportFuture<'_, SessionDescription> {
        Box::pin(async move {
            self.check_closed()?;
            let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
            let sdp = offer.sdp.clone();
            self.pc
                .set_local_description(offer)
                .await
                .map_err(negotiation)?;
            Ok(SessionDescription::offer(sdp))
        })
    }

    fn create_answer(&mut self) -> TransportFuture<'_, SessionDescription> {
        Box::pin(async move {
            self.check_closed()?;
            let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
            let sdp = answer.sdp.clone();
            self.pc
                .set_local_description(answer)
                .await
                .map_err(negotiation)?;
            Ok(SessionDescription::answer(sdp))
        })
    }

    fn set_remote_description(&mut self, desc: SessionDescription) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.check_closed()?;
            let remote = match desc.sdp_type {
                SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
                SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            }
            .map_err(negotiation)?;
            self.pc
                .set_remote_description(remote)
                .await
                .map_err(negotiation)
        })
    }

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.check_closed()?;
            self.pc
                .add_ice_candidate(candidate_to_init(candidate))
                .await
                .map_err(|e| TransportError::InvalidCandidate(e.to_string()))
        })
    }

    fn data_channel(&mut self) -> Option<&mut WebRtcChannel> {
        if self.closed {
            return None;
        }
        if self.channel.is_none() {
            self.channel = self.slot.take();
        }
        self.channel.as_mut()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Dropping the queue stops the writer task.
        self.channel = None;
        self.slot.take();

        let pc = Arc::clone(&self.pc);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = pc.close().await {
                        tracing::debug!("peer connection close error: {e}");
                    }
                });
            }
            Err(_) => tracing::warn!("no runtime to close the peer connection on"),
        }
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bytes waiting in the writer queue and in the SCTP stream.
#[derive(Default)]
struct Buffered {
    queued: AtomicUsize,
    sctp: AtomicUsize,
    /// The sender saw a full buffer and waits for `BufferedAmountLow`.
    waiting: AtomicBool,
}

impl Buffered {
    fn total(&self) -> usize {
        self.queued.load(Ordering::SeqCst) + self.sctp.load(Ordering::SeqCst)
    }

    fn notify_if_drained(&self, events: &mpsc::UnboundedSender<TransportEvent>) {
        if self.total() <= BUFFERED_AMOUNT_LOW_THRESHOLD && self.waiting.swap(false, Ordering::SeqCst) {
            let _ = events.send(TransportEvent::BufferedAmountLow);
        }
    }
}

enum Outgoing {
    Text(String),
    Binary(Bytes),
}

impl Outgoing {
    fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }
}

/// Hands queued frames to the data channel in order.
async fn write_loop(
    dc: Arc<RTCDataChannel>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    buffered: Arc<Buffered>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(frame) = rx.recv().await {
        let len = frame.len();
        let result = match frame {
            Outgoing::Text(text) => dc.send_text(text).await,
            Outgoing::Binary(data) => dc.send(&data).await,
        };
        buffered.queued.fetch_sub(len, Ordering::SeqCst);
        if let Err(e) = result {
            tracing::warn!("data channel send failed: {e}");
            break;
        }
        buffered.sctp.store(dc.buffered_amount().await, Ordering::SeqCst);
        buffered.notify_if_drained(&events);
    }
    tracing::debug!("data channel writer stopped");
}

/// Sending half of the WebRTC data channel.
pub struct WebRtcChannel {
    queue: mpsc::UnboundedSender<Outgoing>,
    buffered: Arc<Buffered>,
}

impl WebRtcChannel {
    fn enqueue(&mut self, frame: Outgoing) -> Result<(), TransferError> {
        let len = frame.len();
        self.buffered.queued.fetch_add(len, Ordering::SeqCst);
        self.queue.send(frame).map_err(|_| {
            self.buffered.queued.fetch_sub(len, Ordering::SeqCst);
            TransferError::ChannelClosed
        })
    }
}

impl DataChannel for WebRtcChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransferError> {
        self.enqueue(Outgoing::Text(text.to_owned()))
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.enqueue(Outgoing::Binary(Bytes::copy_from_slice(data)))
    }

    fn buffered_amount(&self) -> usize {
        // Raise the flag before reading so a concurrent drain sees it.
        self.buffered.waiting.store(true, Ordering::SeqCst);
        let total = self.buffered.total();
        if total < MAX_BUFFERED_AMOUNT {
            self.buffered.waiting.store(false, Ordering::SeqCst);
        }
        total
    }
}
