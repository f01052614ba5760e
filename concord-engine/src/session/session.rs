use crate::config::NegotiationConfig;
use crate::connection::{ConnectionEvent, ConnectionFactory, ConnectivityState};
use crate::error::NegotiationError;
use crate::negotiation::{NegotiationCoordinator, NegotiationObserver, Outcome};
use crate::session::SessionCommand;
use crate::signaling::SignalingOutput;
use crate::strategy::ChannelKind;
use concord_core::{PeerId, Signal};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Event pump tying the signaling transport and the connections to one coordinator.
///
/// Run it with `tokio::spawn(session.run())`. Dropping every sender of the command
/// channel stops the loop and closes all peers.
pub struct Session {
    coordinator: Arc<NegotiationCoordinator>,
    command_rx: mpsc::Receiver<SessionCommand>,
    events_rx: mpsc::Receiver<ConnectionEvent>,
}

impl Session {
    pub fn new(
        local_id: PeerId,
        kind: ChannelKind,
        config: NegotiationConfig,
        factory: Arc<dyn ConnectionFactory>,
        signaling: Arc<dyn SignalingOutput>,
        observer: Arc<dyn NegotiationObserver>,
        command_rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let (coordinator, events_rx) =
            NegotiationCoordinator::new(local_id, kind, config, factory, signaling, observer);

        Self {
            coordinator: Arc::new(coordinator),
            command_rx,
            events_rx,
        }
    }

    /// Shared handle for direct calls (local media, messaging, introspection).
    pub fn coordinator(&self) -> Arc<NegotiationCoordinator> {
        self.coordinator.clone()
    }

    pub async fn run(mut self) {
        info!(
            "Session loop started for {} ({})",
            self.coordinator.local_id(),
            self.coordinator.kind()
        );

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c).await,
                        None => {
                            info!("Command channel closed. Shutting down session.");
                            break;
                        }
                    }
                }

                evt = self.events_rx.recv() => {
                    match evt {
                        Some(e) => self.handle_connection_event(e).await,
                        None => {
                            warn!("Connection event channel closed unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        self.coordinator.close_all().await;
        info!("Session loop finished");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Remote { from, signal } => self.handle_remote(from, signal).await,

            SessionCommand::Envelope(envelope) => {
                let local_id = self.coordinator.local_id();
                if envelope.from == *local_id {
                    debug!("Dropping own {} echoed back", envelope.signal.name());
                    return;
                }
                if envelope.to != *local_id {
                    debug!(
                        "Dropping {} addressed to {}",
                        envelope.signal.name(),
                        envelope.to
                    );
                    return;
                }
                self.handle_remote(envelope.from, envelope.signal).await;
            }

            SessionCommand::PeerJoined { peer_id } => self.handle_peer_joined(peer_id).await,

            SessionCommand::PeerLeft { peer_id } => {
                info!("Peer {} left", peer_id);
                self.coordinator.close(&peer_id).await;
            }

            SessionCommand::Start { peer_id } => {
                let result = self.coordinator.start(&peer_id).await;
                log_outcome(&peer_id, "start", result);
            }

            SessionCommand::Close { peer_id } => {
                self.coordinator.close(&peer_id).await;
            }

            SessionCommand::CloseAll => self.coordinator.close_all().await,
        }
    }

    async fn handle_remote(&self, from: PeerId, signal: Signal) {
        let name = signal.name();
        let result = self.coordinator.submit_remote_signal(&from, signal).await;
        log_outcome(&from, name, result);
    }

    async fn handle_peer_joined(&self, peer_id: PeerId) {
        if peer_id == *self.coordinator.local_id() {
            return;
        }

        self.coordinator.register(&peer_id);
        if !self.coordinator.leads(&peer_id) {
            debug!("Waiting for {} to offer", peer_id);
            return;
        }

        let attempts = self
            .coordinator
            .next_lead_attempt(&peer_id)
            .await
            .unwrap_or(0);
        let delay = self.coordinator.config().lead_delay.delay_for(attempts);
        info!("Peer {} joined, leading offer in {:?}", peer_id, delay);

        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A peer that left during the delay stays gone.
            let result = coordinator.start_registered(&peer_id).await;
            log_outcome(&peer_id, "start", result);
        });
    }

    async fn handle_connection_event(&self, event: ConnectionEvent) {
        if !self.coordinator.contains(event.peer_id()) {
            debug!("Dropping event for closed peer {}", event.peer_id());
            return;
        }

        match event {
            ConnectionEvent::LocalCandidate { peer_id, candidate } => {
                self.coordinator
                    .signaling()
                    .send_signal(peer_id, Signal::Candidate(candidate))
                    .await;
            }

            ConnectionEvent::ConnectivityChanged { peer_id, state } => {
                info!("Connectivity with {} is now {:?}", peer_id, state);
                self.coordinator.note_connectivity(&peer_id, state).await;
                self.coordinator
                    .observer()
                    .on_connectivity_state_changed(&peer_id, state)
                    .await;

                if state == ConnectivityState::Closed {
                    self.coordinator.close(&peer_id).await;
                }
            }

            ConnectionEvent::IceFailed { peer_id } => {
                warn!("Connectivity checks failed for {}", peer_id);
                match self.coordinator.restart_connectivity(&peer_id).await {
                    Err(NegotiationError::RestartExhausted { .. })
                        if self.coordinator.config().close_on_failure =>
                    {
                        self.coordinator.close(&peer_id).await;
                    }
                    result => log_outcome(&peer_id, "restart", result),
                }
            }

            ConnectionEvent::DataChannelOpen { peer_id, label } => {
                self.coordinator
                    .observer()
                    .on_data_channel_open(&peer_id, &label)
                    .await;
            }

            ConnectionEvent::Message { peer_id, data } => {
                self.coordinator
                    .observer()
                    .on_data_message(&peer_id, data)
                    .await;
            }

            ConnectionEvent::RemoteTrack { peer_id, track } => {
                if !self.coordinator.kind().accepts(track.kind) {
                    debug!(
                        "Ignoring remote {} track from {} in {} session",
                        track.kind,
                        peer_id,
                        self.coordinator.kind()
                    );
                    return;
                }
                self.coordinator
                    .observer()
                    .on_remote_track(&peer_id, track)
                    .await;
            }
        }
    }
}

fn log_outcome(peer_id: &PeerId, op: &str, result: Result<Outcome, NegotiationError>) {
    match result {
        Ok(Outcome::Ignored(reason)) => debug!("{} for {} ignored: {}", op, peer_id, reason),
        Ok(outcome) => debug!("{} for {}: {:?}", op, peer_id, outcome),
        Err(e) => error!("{} for {} failed: {}", op, peer_id, e),
    }
}
