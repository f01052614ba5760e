mod media;
mod peer;
mod signaling;

pub use media::MediaKind;
pub use peer::PeerId;
pub use signaling::{
    IceCandidate, IceServerConfig, SdpKind, SessionDescription, Signal, SignalEnvelope,
};
