mod candidate_queue;
mod coordinator;
mod negotiation_observer;
mod outcome;
mod peer_state;
mod politeness;

pub use candidate_queue::*;
pub use coordinator::*;
pub use negotiation_observer::*;
pub use outcome::*;
pub use peer_state::{PeerSnapshot, SignalingPhase};
pub use politeness::*;

pub(crate) use peer_state::PeerState;
