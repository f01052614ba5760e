use concord_core::{PeerId, Signal};
use async_trait::async_trait;

/// Outbound half of the signaling transport.
///
/// Implemented by whatever relays messages between peers (WebSocket, broker, test harness).
#[async_trait]
pub trait SignalingOutput: Send + Sync {
    /// Deliver `signal` to `peer_id`. Delivery is best effort; the coordinator tolerates loss.
    async fn send_signal(&self, peer_id: PeerId, signal: Signal);
}
