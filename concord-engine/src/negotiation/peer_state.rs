use crate::connection::{ConnectivityState, PeerConnection};
use crate::negotiation::{CandidateQueue, Role};
use concord_core::PeerId;
use std::fmt;
use std::sync::Arc;

/// Local mirror of the native signaling state for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingPhase {
    /// Idle before the first exchange, settled after each completed one.
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    /// Terminal.
    Closed,
}

impl fmt::Display for SignalingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingPhase::Stable => "stable",
            SignalingPhase::HaveLocalOffer => "have-local-offer",
            SignalingPhase::HaveRemoteOffer => "have-remote-offer",
            SignalingPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Negotiation record for one remote peer. Owned by the coordinator.
pub(crate) struct PeerState {
    pub peer_id: PeerId,
    pub role: Role,
    pub connection: Option<Arc<dyn PeerConnection>>,
    pub phase: SignalingPhase,
    pub making_offer: bool,
    /// Bumped each time an offer starts; lets a resumed offer detect it was superseded.
    pub offer_epoch: u64,
    pub queue: CandidateQueue,
    /// At least one offer/answer exchange completed.
    pub negotiated: bool,
    pub last_remote_offer: Option<String>,
    pub restart_attempts: u32,
    /// Leading attempts made for this peer, feeds the progressive lead delay.
    pub lead_attempts: u32,
}

impl PeerState {
    pub fn new(peer_id: PeerId, role: Role) -> Self {
        Self {
            peer_id,
            role,
            connection: None,
            phase: SignalingPhase::Stable,
            making_offer: false,
            offer_epoch: 0,
            queue: CandidateQueue::new(),
            negotiated: false,
            last_remote_offer: None,
            restart_attempts: 0,
            lead_attempts: 0,
        }
    }

    pub async fn snapshot(&self) -> PeerSnapshot {
        let (has_remote_description, connectivity) = match &self.connection {
            Some(connection) => (
                connection.has_remote_description().await,
                connection.connection_state(),
            ),
            None => (false, ConnectivityState::New),
        };

        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            role: self.role,
            phase: self.phase,
            making_offer: self.making_offer,
            queued_candidates: self.queue.len(),
            has_connection: self.connection.is_some(),
            has_remote_description,
            negotiated: self.negotiated,
            restart_attempts: self.restart_attempts,
            connectivity,
        }
    }
}

/// Read-only view of a peer's negotiation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub role: Role,
    pub phase: SignalingPhase,
    pub making_offer: bool,
    pub queued_candidates: usize,
    pub has_connection: bool,
    pub has_remote_description: bool,
    pub negotiated: bool,
    pub restart_attempts: u32,
    pub connectivity: ConnectivityState,
}
