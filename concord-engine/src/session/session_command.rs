use concord_core::{PeerId, Signal, SignalEnvelope};

/// Inbound events from the signaling transport and the application.
#[derive(Debug)]
pub enum SessionCommand {
    /// A signal already attributed to its sender.
    Remote { from: PeerId, signal: Signal },

    /// A relayed envelope. Envelopes sent by or not addressed to the local peer are dropped.
    Envelope(SignalEnvelope),

    PeerJoined { peer_id: PeerId },

    PeerLeft { peer_id: PeerId },

    /// Begin negotiation now, regardless of who would lead.
    Start { peer_id: PeerId },

    Close { peer_id: PeerId },

    CloseAll,
}
