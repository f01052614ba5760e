use crate::connection::{ConnectivityState, RemoteTrack};
use crate::error::{ConnectionError, NegotiationError};
use crate::negotiation::CollisionResolution;
use async_trait::async_trait;
use bytes::Bytes;
use concord_core::{IceCandidate, PeerId};

/// Application hooks for everything the coordinator and session report.
///
/// Every method defaults to a no-op. Implementations must not block; calling back
/// into the coordinator from a hook is allowed.
#[async_trait]
pub trait NegotiationObserver: Send + Sync + 'static {
    async fn on_connectivity_state_changed(&self, _peer_id: &PeerId, _state: ConnectivityState) {}

    /// Called exactly once per closed peer.
    async fn on_peer_closed(&self, _peer_id: &PeerId) {}

    async fn on_collision(&self, _peer_id: &PeerId, _resolution: CollisionResolution) {}

    async fn on_candidate_rejected(
        &self,
        _peer_id: &PeerId,
        _candidate: &IceCandidate,
        _error: &ConnectionError,
    ) {
    }

    /// A failure that needs an explicit close to recover from.
    async fn on_peer_failed(&self, _peer_id: &PeerId, _error: &NegotiationError) {}

    async fn on_data_channel_open(&self, _peer_id: &PeerId, _label: &str) {}

    async fn on_data_message(&self, _peer_id: &PeerId, _data: Bytes) {}

    async fn on_remote_track(&self, _peer_id: &PeerId, _track: RemoteTrack) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl NegotiationObserver for NoopObserver {}
