use async_trait::async_trait;
use concord_core::{PeerId, Signal, SignalEnvelope};
use concord_engine::{
    ChannelKind, ConnectionFactory, NegotiationConfig, NegotiationCoordinator, Session,
    SessionCommand, SignalingOutput,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use super::mock_connection::MockConnectionFactory;
use super::mock_observer::TestObserver;
use super::mock_signaling::SentSignal;

/// In-process signaling relay between sessions, standing in for a room server.
#[derive(Clone, Default)]
pub struct Relay {
    routes: Arc<Mutex<HashMap<PeerId, mpsc::Sender<SessionCommand>>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, peer_id: PeerId, tx: mpsc::Sender<SessionCommand>) {
        self.routes.lock().await.insert(peer_id, tx);
    }

    pub async fn disconnect(&self, peer_id: &PeerId) {
        self.routes.lock().await.remove(peer_id);
    }

    pub fn output(&self, from: PeerId) -> RelaySignaling {
        RelaySignaling {
            from,
            relay: self.clone(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Announce every connected peer to every other, as a room does on join.
    pub async fn announce_all(&self) {
        let routes = self.routes.lock().await.clone();
        for (peer_id, tx) in &routes {
            for other in routes.keys().filter(|other| *other != peer_id) {
                let _ = tx
                    .send(SessionCommand::PeerJoined {
                        peer_id: other.clone(),
                    })
                    .await;
            }
        }
    }
}

#[derive(Clone)]
pub struct RelaySignaling {
    from: PeerId,
    relay: Relay,
    sent: Arc<Mutex<Vec<SentSignal>>>,
}

impl RelaySignaling {
    pub async fn sent(&self) -> Vec<SentSignal> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self, name: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| s.signal.name() == name)
            .count()
    }
}

#[async_trait]
impl SignalingOutput for RelaySignaling {
    async fn send_signal(&self, peer_id: PeerId, signal: Signal) {
        self.sent.lock().await.push(SentSignal {
            to: peer_id.clone(),
            signal: signal.clone(),
        });

        let route = self.relay.routes.lock().await.get(&peer_id).cloned();
        let Some(tx) = route else {
            tracing::warn!("[Relay] no route to {}", peer_id);
            return;
        };
        let envelope = SignalEnvelope::new(self.from.clone(), peer_id, signal);
        let _ = tx.send(SessionCommand::Envelope(envelope)).await;
    }
}

/// A running [`Session`] plus handles to everything around it.
pub struct TestSession {
    pub id: PeerId,
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    pub coordinator: Arc<NegotiationCoordinator>,
    pub observer: TestObserver,
    pub signaling: RelaySignaling,
}

impl TestSession {
    pub async fn send(&self, cmd: SessionCommand) {
        self.cmd_tx.send(cmd).await.expect("session loop is gone");
    }
}

pub async fn spawn_session(
    relay: &Relay,
    id: &str,
    kind: ChannelKind,
    config: NegotiationConfig,
    factory: Arc<dyn ConnectionFactory>,
) -> TestSession {
    let id = PeerId::from(id);
    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(100);
    let observer = TestObserver::new();
    let signaling = relay.output(id.clone());

    let session = Session::new(
        id.clone(),
        kind,
        config,
        factory,
        Arc::new(signaling.clone()),
        Arc::new(observer.clone()),
        cmd_rx,
    );
    let coordinator = session.coordinator();
    relay.connect(id.clone(), cmd_tx.clone()).await;

    tokio::spawn(async move {
        session.run().await;
    });

    TestSession {
        id,
        cmd_tx,
        coordinator,
        observer,
        signaling,
    }
}

pub async fn spawn_mock_session(
    relay: &Relay,
    id: &str,
    kind: ChannelKind,
    config: NegotiationConfig,
) -> (TestSession, MockConnectionFactory) {
    let factory = MockConnectionFactory::new(PeerId::from(id));
    let session = spawn_session(relay, id, kind, config, Arc::new(factory.clone())).await;
    (session, factory)
}

/// Poll `check` until it returns `true` or `timeout_ms` elapses.
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);

    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
