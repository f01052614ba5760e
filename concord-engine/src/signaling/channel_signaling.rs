use crate::signaling::SignalingOutput;
use async_trait::async_trait;
use concord_core::{PeerId, Signal, SignalEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// [`SignalingOutput`] that hands addressed envelopes to a channel.
///
/// The receiving end typically serializes them onto a WebSocket.
#[derive(Clone)]
pub struct ChannelSignaling {
    local_id: PeerId,
    tx: mpsc::UnboundedSender<SignalEnvelope>,
}

impl ChannelSignaling {
    pub fn new(local_id: PeerId) -> (Self, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { local_id, tx }, rx)
    }
}

#[async_trait]
impl SignalingOutput for ChannelSignaling {
    async fn send_signal(&self, peer_id: PeerId, signal: Signal) {
        debug!("Sending {} to {}", signal.name(), peer_id);

        let envelope = SignalEnvelope::new(self.local_id.clone(), peer_id, signal);
        if let Err(e) = self.tx.send(envelope) {
            error!("Signaling channel closed, dropping {}", e.0.signal.name());
        }
    }
}
