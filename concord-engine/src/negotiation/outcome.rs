use crate::negotiation::SignalingPhase;
use std::fmt;

/// What a negotiation operation did. Races and collisions end up here, not in errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    OfferSent,
    Answered { rolled_back: bool },
    AnswerApplied,
    CandidateApplied,
    CandidateQueued,
    /// The connection refused the candidate. Reported to the observer.
    CandidateRejected,
    Ignored(IgnoreReason),
}

impl Outcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Closed,
    NotStable(SignalingPhase),
    OfferInFlight,
    AlreadyNegotiated,
    NotNegotiated,
    DuplicateOffer,
    /// Impolite side kept its own offer.
    CollisionYielded,
    StrayAnswer(SignalingPhase),
    UnknownPeer,
    OwnIdentity,
    /// A rollback or close overtook the offer while it was being built.
    Superseded,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::Closed => f.write_str("peer is closed"),
            IgnoreReason::NotStable(phase) => write!(f, "phase is {phase}"),
            IgnoreReason::OfferInFlight => f.write_str("offer already in flight"),
            IgnoreReason::AlreadyNegotiated => f.write_str("already negotiated"),
            IgnoreReason::NotNegotiated => f.write_str("no completed negotiation"),
            IgnoreReason::DuplicateOffer => f.write_str("duplicate offer"),
            IgnoreReason::CollisionYielded => f.write_str("collision, keeping local offer"),
            IgnoreReason::StrayAnswer(phase) => write!(f, "answer received in {phase}"),
            IgnoreReason::UnknownPeer => f.write_str("unknown peer"),
            IgnoreReason::OwnIdentity => f.write_str("own identity"),
            IgnoreReason::Superseded => f.write_str("superseded"),
        }
    }
}

/// How a collision was settled on the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionResolution {
    /// Local offer rolled back, remote offer accepted.
    RolledBack,
    /// Remote offer discarded, local offer kept.
    IgnoredRemote,
}
