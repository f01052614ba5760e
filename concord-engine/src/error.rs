use concord_core::PeerId;
use thiserror::Error;

/// Failure reported by the underlying connection object.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid signaling transition: {0}")]
    InvalidState(String),

    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    #[error("malformed ICE candidate: {0}")]
    MalformedCandidate(String),

    #[error("track {0} cannot be attached to this connection")]
    UnsupportedTrack(String),

    #[error("data channel is not open")]
    ChannelUnavailable,

    #[error("connection is closed")]
    Closed,

    #[error(transparent)]
    Webrtc(#[from] webrtc::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of a single peer-scoped operation. Never affects other peers.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("failed to create connection for {peer_id}: {source}")]
    ConnectionSetup {
        peer_id: PeerId,
        #[source]
        source: ConnectionError,
    },

    #[error("description negotiation with {peer_id} failed: {source}")]
    Description {
        peer_id: PeerId,
        #[source]
        source: ConnectionError,
    },

    #[error("cannot deliver data to {peer_id}: {source}")]
    Delivery {
        peer_id: PeerId,
        #[source]
        source: ConnectionError,
    },

    #[error("connectivity restart for {peer_id} exhausted after {attempts} attempts")]
    RestartExhausted { peer_id: PeerId, attempts: u32 },

    #[error("no negotiation state for {0}")]
    UnknownPeer(PeerId),
}

impl NegotiationError {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            NegotiationError::ConnectionSetup { peer_id, .. }
            | NegotiationError::Description { peer_id, .. }
            | NegotiationError::Delivery { peer_id, .. }
            | NegotiationError::RestartExhausted { peer_id, .. }
            | NegotiationError::UnknownPeer(peer_id) => peer_id,
        }
    }
}

pub type Result<T, E = NegotiationError> = std::result::Result<T, E>;
