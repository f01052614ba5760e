use crate::config::{DataChannelConfig, NegotiationConfig};
use crate::connection::{
    ConnectionEvent, ConnectionFactory, ConnectivityState, MediaTrack, PeerConnection,
    RemoteTrack, TransceiverDirection, TransceiverSnapshot,
};
use crate::error::ConnectionError;
use async_trait::async_trait;
use bytes::Bytes;
use concord_core::{IceCandidate, MediaKind, PeerId, SdpKind, SessionDescription};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// A webrtc-rs local track usable as a [`MediaTrack`].
#[derive(Clone)]
pub struct WebrtcTrack {
    inner: Arc<dyn TrackLocal + Send + Sync>,
    kind: MediaKind,
}

impl WebrtcTrack {
    /// Returns `None` for tracks whose codec type is neither audio nor video.
    pub fn new(inner: Arc<dyn TrackLocal + Send + Sync>) -> Option<Self> {
        let kind = media_kind(inner.kind())?;
        Some(Self { inner, kind })
    }

    pub fn inner(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.clone()
    }
}

impl std::fmt::Debug for WebrtcTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebrtcTrack")
            .field("id", &self.inner.id())
            .field("kind", &self.kind)
            .finish()
    }
}

impl MediaTrack for WebrtcTrack {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct WebrtcConnection {
    pub peer_id: PeerId,
    pub peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    /// Last sub-channel created locally, kept until its offer is committed or abandoned.
    local_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    event_tx: mpsc::Sender<ConnectionEvent>,
}

impl WebrtcConnection {
    /// Build a webrtc-rs peer connection and wire its callbacks into `event_tx`.
    pub async fn new(
        peer_id: PeerId,
        config: &NegotiationConfig,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Self, ConnectionError> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ice_candidate_pool_size: config.ice_candidate_pool_size,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);
        let data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));

        let state_tx = event_tx.clone();
        let uid_state = peer_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let uid = uid_state.clone();

                Box::pin(async move {
                    info!("Peer connection state for {}: {:?}", uid, s);
                    let Some(state) = connectivity_state(s) else {
                        return;
                    };
                    let _ = tx
                        .send(ConnectionEvent::ConnectivityChanged {
                            peer_id: uid,
                            state,
                        })
                        .await;
                })
            },
        ));

        let ice_state_tx = event_tx.clone();
        let uid_ice_state = peer_id.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let tx = ice_state_tx.clone();
                let uid = uid_ice_state.clone();

                Box::pin(async move {
                    debug!("ICE state for {}: {:?}", uid, s);
                    if s == RTCIceConnectionState::Failed {
                        let _ = tx.send(ConnectionEvent::IceFailed { peer_id: uid }).await;
                    }
                })
            },
        ));

        let ice_tx = event_tx.clone();
        let uid_ice = peer_id.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let uid = uid_ice.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let _ = tx
                    .send(ConnectionEvent::LocalCandidate {
                        peer_id: uid,
                        candidate: from_rtc_candidate(init),
                    })
                    .await;
            })
        }));

        let track_tx = event_tx.clone();
        let uid_track = peer_id.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();
                let uid = uid_track.clone();

                Box::pin(async move {
                    let Some(kind) = media_kind(track.kind()) else {
                        return;
                    };
                    let _ = tx
                        .send(ConnectionEvent::RemoteTrack {
                            peer_id: uid,
                            track: RemoteTrack {
                                kind,
                                track_id: track.id(),
                                stream_id: track.stream_id(),
                            },
                        })
                        .await;
                })
            },
        ));

        let dc_tx = event_tx.clone();
        let uid_dc = peer_id.clone();
        let dc_slot = data_channel.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = dc_tx.clone();
            let uid = uid_dc.clone();
            let slot = dc_slot.clone();

            Box::pin(async move {
                debug!("Remote opened data channel '{}' for {}", dc.label(), uid);
                wire_data_channel(&dc, uid, tx);
                *slot.lock().await = Some(dc);
            })
        }));

        Ok(Self {
            peer_id,
            peer_connection,
            data_channel,
            local_channel: Mutex::new(None),
            event_tx,
        })
    }
}

#[async_trait]
impl PeerConnection for WebrtcConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, ConnectionError> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self.peer_connection.create_offer(Some(options)).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ConnectionError> {
        let desc = match desc.kind {
            SdpKind::Rollback => {
                let pending = self.peer_connection.pending_local_description().await;
                rollback_of(pending, "local")?
            }
            _ => to_rtc_description(desc)?,
        };
        self.peer_connection.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let desc = match desc.kind {
            SdpKind::Rollback => {
                let pending = self.peer_connection.pending_remote_description().await;
                rollback_of(pending, "remote")?
            }
            _ => to_rtc_description(desc)?,
        };
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.peer_connection.remote_description().await.is_some()
    }

    fn connection_state(&self) -> ConnectivityState {
        connectivity_state(self.peer_connection.connection_state())
            .unwrap_or(ConnectivityState::New)
    }

    async fn transceivers(&self) -> Vec<TransceiverSnapshot> {
        let mut snapshots = Vec::new();
        for transceiver in self.peer_connection.get_transceivers().await {
            let Some(kind) = media_kind(transceiver.kind()) else {
                continue;
            };
            let track_id = transceiver
                .sender()
                .await
                .track()
                .await
                .map(|track| track.id().to_owned());
            snapshots.push(TransceiverSnapshot {
                kind,
                direction: transceiver_direction(transceiver.direction()),
                track_id,
            });
        }
        snapshots
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), ConnectionError> {
        let native = native_track(track.as_ref())?;
        self.peer_connection.add_track(native).await?;
        Ok(())
    }

    async fn replace_track(&self, track: Arc<dyn MediaTrack>) -> Result<bool, ConnectionError> {
        let native = native_track(track.as_ref())?;
        for sender in self.peer_connection.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if media_kind(current.kind()) == Some(track.kind()) {
                sender.replace_track(Some(native)).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remove_track(&self, kind: MediaKind) -> Result<bool, ConnectionError> {
        for sender in self.peer_connection.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if media_kind(current.kind()) == Some(kind) {
                self.peer_connection.remove_track(&sender).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn add_recv_only_transceiver(&self, kind: MediaKind) -> Result<(), ConnectionError> {
        let codec_type = match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        };
        self.peer_connection
            .add_transceiver_from_kind(
                codec_type,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn ensure_data_channel(
        &self,
        label: &str,
        config: &DataChannelConfig,
    ) -> Result<bool, ConnectionError> {
        let mut slot = self.data_channel.lock().await;
        if slot.is_some() {
            return Ok(false);
        }

        let init = RTCDataChannelInit {
            ordered: Some(config.ordered),
            max_retransmits: config.max_retransmits,
            ..Default::default()
        };
        let dc = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await?;
        // Locally created channels report through the same event path as remote ones.
        wire_data_channel(&dc, self.peer_id.clone(), self.event_tx.clone());
        *self.local_channel.lock().await = Some(dc.clone());
        *slot = Some(dc);
        Ok(true)
    }

    async fn discard_data_channel(&self) -> Result<bool, ConnectionError> {
        let Some(dc) = self.local_channel.lock().await.take() else {
            return Ok(false);
        };
        {
            let mut slot = self.data_channel.lock().await;
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &dc)) {
                *slot = None;
            }
        }
        debug!("Discarding data channel '{}' for {}", dc.label(), self.peer_id);
        dc.close().await?;
        Ok(true)
    }

    async fn data_channel_label(&self) -> Option<String> {
        self.data_channel
            .lock()
            .await
            .as_ref()
            .map(|dc| dc.label().to_owned())
    }

    async fn send_data(&self, data: Bytes) -> Result<(), ConnectionError> {
        let dc = self.data_channel.lock().await.clone();
        let Some(dc) = dc else {
            return Err(ConnectionError::ChannelUnavailable);
        };
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(ConnectionError::ChannelUnavailable);
        }
        dc.send(&data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Creates [`WebrtcConnection`]s from a shared [`NegotiationConfig`].
#[derive(Clone, Default)]
pub struct WebrtcConnectionFactory {
    config: NegotiationConfig,
}

impl WebrtcConnectionFactory {
    pub fn new(config: NegotiationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionFactory for WebrtcConnectionFactory {
    async fn create(
        &self,
        peer_id: PeerId,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, ConnectionError> {
        let connection = WebrtcConnection::new(peer_id, &self.config, events).await?;
        Ok(Arc::new(connection))
    }
}

fn wire_data_channel(
    dc: &Arc<RTCDataChannel>,
    peer_id: PeerId,
    tx: mpsc::Sender<ConnectionEvent>,
) {
    let tx_open = tx.clone();
    let uid_open = peer_id.clone();
    let label = dc.label().to_owned();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            info!("Data channel '{}' open for {}", label, uid_open);
            let _ = tx_open
                .send(ConnectionEvent::DataChannelOpen {
                    peer_id: uid_open,
                    label,
                })
                .await;
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        let uid = peer_id.clone();
        Box::pin(async move {
            if tx
                .send(ConnectionEvent::Message {
                    peer_id: uid,
                    data: msg.data,
                })
                .await
                .is_err()
            {
                warn!("Dropping data channel message: session loop is gone");
            }
        })
    }));
}

fn native_track(
    track: &dyn MediaTrack,
) -> Result<Arc<dyn TrackLocal + Send + Sync>, ConnectionError> {
    track
        .as_any()
        .downcast_ref::<WebrtcTrack>()
        .map(WebrtcTrack::inner)
        .ok_or_else(|| ConnectionError::UnsupportedTrack(track.id().to_owned()))
}

fn to_rtc_description(
    desc: SessionDescription,
) -> Result<RTCSessionDescription, ConnectionError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpKind::Rollback => {
            return Err(ConnectionError::InvalidState(
                "rollback needs a pending offer".to_owned(),
            ));
        }
    };
    parsed.map_err(|e| ConnectionError::MalformedDescription(e.to_string()))
}

/// webrtc-rs parses rollback bodies, so the pending offer's SDP is reused.
fn rollback_of(
    pending: Option<RTCSessionDescription>,
    side: &str,
) -> Result<RTCSessionDescription, ConnectionError> {
    let pending = pending
        .ok_or_else(|| ConnectionError::InvalidState(format!("no pending {side} offer")))?;
    let mut rollback = RTCSessionDescription::default();
    rollback.sdp_type = RTCSdpType::Rollback;
    rollback.sdp = pending.sdp;
    Ok(rollback)
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn media_kind(codec_type: RTPCodecType) -> Option<MediaKind> {
    match codec_type {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        _ => None,
    }
}

fn connectivity_state(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

fn transceiver_direction(direction: RTCRtpTransceiverDirection) -> TransceiverDirection {
    match direction {
        RTCRtpTransceiverDirection::Sendrecv => TransceiverDirection::SendRecv,
        RTCRtpTransceiverDirection::Sendonly => TransceiverDirection::SendOnly,
        RTCRtpTransceiverDirection::Recvonly => TransceiverDirection::RecvOnly,
        _ => TransceiverDirection::Inactive,
    }
}
