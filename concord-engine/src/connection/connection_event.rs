use crate::connection::ConnectivityState;
use bytes::Bytes;
use concord_core::{IceCandidate, MediaKind, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub kind: MediaKind,
    pub track_id: String,
    pub stream_id: String,
}

/// Events a connection object reports back to the session loop.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A local ICE candidate was gathered and must be relayed to the peer.
    LocalCandidate {
        peer_id: PeerId,
        candidate: IceCandidate,
    },

    ConnectivityChanged {
        peer_id: PeerId,
        state: ConnectivityState,
    },

    /// Connectivity checks failed after negotiation succeeded.
    IceFailed { peer_id: PeerId },

    DataChannelOpen { peer_id: PeerId, label: String },

    Message { peer_id: PeerId, data: Bytes },

    RemoteTrack { peer_id: PeerId, track: RemoteTrack },
}

impl ConnectionEvent {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            ConnectionEvent::LocalCandidate { peer_id, .. }
            | ConnectionEvent::ConnectivityChanged { peer_id, .. }
            | ConnectionEvent::IceFailed { peer_id }
            | ConnectionEvent::DataChannelOpen { peer_id, .. }
            | ConnectionEvent::Message { peer_id, .. }
            | ConnectionEvent::RemoteTrack { peer_id, .. } => peer_id,
        }
    }
}
