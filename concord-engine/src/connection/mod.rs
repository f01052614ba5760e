mod connection_event;
mod webrtc_connection;

pub use connection_event::*;
pub use webrtc_connection::*;

use crate::config::DataChannelConfig;
use crate::error::ConnectionError;
use async_trait::async_trait;
use bytes::Bytes;
use concord_core::{IceCandidate, MediaKind, PeerId, SessionDescription};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

/// Point-in-time view of one transceiver on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverSnapshot {
    pub kind: MediaKind,
    pub direction: TransceiverDirection,
    /// Id of the local track currently sent, if any.
    pub track_id: Option<String>,
}

/// A local media track that can be attached to a connection.
///
/// Backends downcast through [`MediaTrack::as_any`] to reach their native track type.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn as_any(&self) -> &dyn Any;
}

/// Capability set the coordinator needs from a connection object.
///
/// Any runtime able to provide these operations can back the coordinator:
/// the bundled [`WebrtcConnection`] does it with webrtc-rs.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, ConnectionError>;

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError>;

    /// Commit a local offer or answer, or revert a pending local offer with
    /// [`SessionDescription::rollback`].
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ConnectionError>;

    async fn set_remote_description(&self, desc: SessionDescription)
    -> Result<(), ConnectionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError>;

    async fn has_remote_description(&self) -> bool;

    fn connection_state(&self) -> ConnectivityState;

    async fn transceivers(&self) -> Vec<TransceiverSnapshot>;

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), ConnectionError>;

    /// Swap the track sent for `track.kind()`. Returns `false` when nothing of that kind is sent.
    async fn replace_track(&self, track: Arc<dyn MediaTrack>) -> Result<bool, ConnectionError>;

    /// Stop sending `kind`. Returns `false` when nothing of that kind is sent.
    async fn remove_track(&self, kind: MediaKind) -> Result<bool, ConnectionError>;

    async fn add_recv_only_transceiver(&self, kind: MediaKind) -> Result<(), ConnectionError>;

    /// Create the data sub-channel unless one already exists. Returns `true` if created.
    async fn ensure_data_channel(
        &self,
        label: &str,
        config: &DataChannelConfig,
    ) -> Result<bool, ConnectionError>;

    /// Close a sub-channel created by [`ensure_data_channel`](Self::ensure_data_channel)
    /// whose offer was abandoned. Returns `false` when there was none.
    async fn discard_data_channel(&self) -> Result<bool, ConnectionError>;

    async fn data_channel_label(&self) -> Option<String>;

    async fn send_data(&self, data: Bytes) -> Result<(), ConnectionError>;

    async fn close(&self) -> Result<(), ConnectionError>;
}

/// Builds connection objects. `events` receives everything the connection reports
/// asynchronously (local candidates, state changes, data, remote tracks).
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: PeerId,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, ConnectionError>;
}
