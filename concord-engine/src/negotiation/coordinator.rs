use crate::config::NegotiationConfig;
use crate::connection::{
    ConnectionEvent, ConnectionFactory, ConnectivityState, MediaTrack, PeerConnection,
};
use crate::error::{ConnectionError, NegotiationError, Result};
use crate::negotiation::{
    CollisionResolution, IgnoreReason, NegotiationObserver, Outcome, PeerSnapshot, PeerState,
    Role, SignalingPhase,
};
use crate::signaling::SignalingOutput;
use crate::strategy::{AttachPurpose, ChannelKind, ChannelStrategy};
use bytes::Bytes;
use concord_core::{IceCandidate, MediaKind, PeerId, SessionDescription, Signal};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

type PeerSlot = Arc<Mutex<PeerState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfferIntent {
    Fresh,
    Renegotiate,
    IceRestart,
}

/// Drives offer/answer/candidate exchange with every remote peer of one session.
///
/// Each peer has its own state behind its own lock; operations on different
/// peers never wait on each other. Locks are released while an offer is being
/// built, so an incoming offer can overtake it and trigger collision handling.
pub struct NegotiationCoordinator {
    local_id: PeerId,
    config: NegotiationConfig,
    strategy: ChannelStrategy,
    factory: Arc<dyn ConnectionFactory>,
    signaling: Arc<dyn SignalingOutput>,
    observer: Arc<dyn NegotiationObserver>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    peers: DashMap<PeerId, PeerSlot>,
}

impl NegotiationCoordinator {
    /// Returns the coordinator and the receiver of every event its connections report.
    pub fn new(
        local_id: PeerId,
        kind: ChannelKind,
        config: NegotiationConfig,
        factory: Arc<dyn ConnectionFactory>,
        signaling: Arc<dyn SignalingOutput>,
        observer: Arc<dyn NegotiationObserver>,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let strategy = ChannelStrategy::new(kind, config.data_channel.clone());

        let coordinator = Self {
            local_id,
            config,
            strategy,
            factory,
            signaling,
            observer,
            events_tx,
            peers: DashMap::new(),
        };
        (coordinator, events_rx)
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn kind(&self) -> ChannelKind {
        self.strategy.kind()
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub(crate) fn observer(&self) -> &Arc<dyn NegotiationObserver> {
        &self.observer
    }

    pub(crate) fn signaling(&self) -> &Arc<dyn SignalingOutput> {
        &self.signaling
    }

    /// Whether the local side leads negotiation with `peer_id`.
    pub fn leads(&self, peer_id: &PeerId) -> bool {
        Role::resolve(&self.local_id, peer_id) == Some(Role::Impolite)
    }

    // ---- state map ----

    fn slot(&self, peer_id: &PeerId) -> Option<PeerSlot> {
        self.peers.get(peer_id).map(|entry| entry.value().clone())
    }

    fn slot_or_create(&self, peer_id: &PeerId, role: Role) -> PeerSlot {
        self.peers
            .entry(peer_id.clone())
            .or_insert_with(|| {
                debug!("Creating negotiation state for {} as {:?}", peer_id, role);
                Arc::new(Mutex::new(PeerState::new(peer_id.clone(), role)))
            })
            .value()
            .clone()
    }

    /// Track `peer_id` without offering, so early candidates are queued instead of dropped.
    /// Returns `true` if the peer was not known yet.
    pub fn register(&self, peer_id: &PeerId) -> bool {
        let Some(role) = Role::resolve(&self.local_id, peer_id) else {
            return false;
        };
        if self.peers.contains_key(peer_id) {
            return false;
        }
        self.slot_or_create(peer_id, role);
        true
    }

    async fn ensure_connection(&self, state: &mut PeerState) -> Result<Arc<dyn PeerConnection>> {
        if let Some(connection) = &state.connection {
            return Ok(connection.clone());
        }

        let connection = self
            .factory
            .create(state.peer_id.clone(), self.events_tx.clone())
            .await
            .map_err(|source| NegotiationError::ConnectionSetup {
                peer_id: state.peer_id.clone(),
                source,
            })?;
        info!("Created connection for {}", state.peer_id);
        state.connection = Some(connection.clone());
        Ok(connection)
    }

    // ---- offers ----

    /// Begin negotiation with `peer_id` unless it is already underway or done.
    pub async fn start(&self, peer_id: &PeerId) -> Result<Outcome> {
        let Some(role) = Role::resolve(&self.local_id, peer_id) else {
            return Ok(Outcome::Ignored(IgnoreReason::OwnIdentity));
        };
        let slot = self.slot_or_create(peer_id, role);
        self.make_offer(peer_id, slot, OfferIntent::Fresh).await
    }

    /// Lead an offer to a peer tracked through [`register`](Self::register).
    /// Does nothing once the peer has been closed.
    pub(crate) async fn start_registered(&self, peer_id: &PeerId) -> Result<Outcome> {
        let Some(slot) = self.slot(peer_id) else {
            return Ok(Outcome::Ignored(IgnoreReason::UnknownPeer));
        };
        self.make_offer(peer_id, slot, OfferIntent::Fresh).await
    }

    /// Re-offer on an established connection after local media changed.
    pub async fn renegotiate(&self, peer_id: &PeerId) -> Result<Outcome> {
        let Some(slot) = self.slot(peer_id) else {
            return Ok(Outcome::Ignored(IgnoreReason::UnknownPeer));
        };
        self.make_offer(peer_id, slot, OfferIntent::Renegotiate).await
    }

    /// Re-offer with fresh ICE credentials after connectivity was lost.
    ///
    /// Fails with [`NegotiationError::RestartExhausted`] once the configured number of
    /// restart offers has been sent without reaching `Connected`. Calls that end up
    /// ignored do not count.
    pub async fn restart_connectivity(&self, peer_id: &PeerId) -> Result<Outcome> {
        let Some(slot) = self.slot(peer_id) else {
            return Ok(Outcome::Ignored(IgnoreReason::UnknownPeer));
        };

        {
            let state = slot.lock().await;
            if state.phase == SignalingPhase::Closed {
                return Ok(Outcome::Ignored(IgnoreReason::Closed));
            }
            if !state.negotiated {
                return Ok(Outcome::Ignored(IgnoreReason::NotNegotiated));
            }

            if state.restart_attempts >= self.config.max_ice_restarts {
                let err = NegotiationError::RestartExhausted {
                    peer_id: peer_id.clone(),
                    attempts: state.restart_attempts,
                };
                drop(state);
                error!("{}", err);
                self.observer.on_peer_failed(peer_id, &err).await;
                return Err(err);
            }
        }

        let outcome = self
            .make_offer(peer_id, slot.clone(), OfferIntent::IceRestart)
            .await?;
        if outcome == Outcome::OfferSent {
            let mut state = slot.lock().await;
            state.restart_attempts += 1;
            info!(
                "Restarted connectivity with {} (attempt {}/{})",
                peer_id, state.restart_attempts, self.config.max_ice_restarts
            );
        }
        Ok(outcome)
    }

    async fn make_offer(
        &self,
        peer_id: &PeerId,
        slot: PeerSlot,
        intent: OfferIntent,
    ) -> Result<Outcome> {
        let (connection, epoch, phase) = {
            let mut state = slot.lock().await;

            match state.phase {
                SignalingPhase::Closed => return Ok(Outcome::Ignored(IgnoreReason::Closed)),
                SignalingPhase::Stable => {}
                SignalingPhase::HaveLocalOffer if intent == OfferIntent::IceRestart => {}
                other => return Ok(Outcome::Ignored(IgnoreReason::NotStable(other))),
            }
            if state.making_offer {
                return Ok(Outcome::Ignored(IgnoreReason::OfferInFlight));
            }
            match intent {
                OfferIntent::Fresh if state.negotiated => {
                    return Ok(Outcome::Ignored(IgnoreReason::AlreadyNegotiated));
                }
                OfferIntent::Renegotiate if !state.negotiated => {
                    return Ok(Outcome::Ignored(IgnoreReason::NotNegotiated));
                }
                _ => {}
            }

            let connection = self.ensure_connection(&mut state).await?;
            state.making_offer = true;
            state.offer_epoch += 1;
            (connection, state.offer_epoch, state.phase)
        };

        let mut created_channel = false;
        let built = async {
            let report = self
                .strategy
                .attach(connection.as_ref(), AttachPurpose::Offer)
                .await?;
            created_channel = report.data_channel_created;
            connection
                .create_offer(intent == OfferIntent::IceRestart)
                .await
        }
        .await;

        let mut state = slot.lock().await;
        if !state.making_offer || state.offer_epoch != epoch || state.phase != phase {
            debug!("Offer to {} was superseded while being built", peer_id);
            // The answering side adopts the remote's sub-channel instead.
            if created_channel
                && let Err(e) = connection.discard_data_channel().await
            {
                warn!("Failed to discard unused data channel for {}: {}", peer_id, e);
            }
            return Ok(Outcome::Ignored(IgnoreReason::Superseded));
        }

        let committed = match built {
            Ok(offer) => connection
                .set_local_description(offer.clone())
                .await
                .map(|()| offer),
            Err(e) => Err(e),
        };
        state.making_offer = false;

        let offer = committed.map_err(|source| {
            warn!("Failed to create offer for {}: {}", peer_id, source);
            NegotiationError::Description {
                peer_id: peer_id.clone(),
                source,
            }
        })?;
        state.phase = SignalingPhase::HaveLocalOffer;
        drop(state);

        info!("Sending {:?} offer to {}", intent, peer_id);
        self.signaling
            .send_signal(peer_id.clone(), Signal::Offer { sdp: offer.sdp })
            .await;
        Ok(Outcome::OfferSent)
    }

    // ---- inbound signals ----

    /// Dispatch a signal received from `peer_id`.
    pub async fn submit_remote_signal(
        &self,
        peer_id: &PeerId,
        signal: Signal,
    ) -> Result<Outcome> {
        match signal {
            Signal::Offer { sdp } => self.handle_offer(peer_id, sdp).await,
            Signal::Answer { sdp } => self.handle_answer(peer_id, sdp).await,
            Signal::Candidate(candidate) => self.add_remote_candidate(peer_id, candidate).await,
        }
    }

    pub async fn handle_offer(&self, peer_id: &PeerId, sdp: String) -> Result<Outcome> {
        let Some(role) = Role::resolve(&self.local_id, peer_id) else {
            return Ok(Outcome::Ignored(IgnoreReason::OwnIdentity));
        };
        let slot = self.slot_or_create(peer_id, role);
        let mut state = slot.lock().await;

        match state.phase {
            SignalingPhase::Closed => return Ok(Outcome::Ignored(IgnoreReason::Closed)),
            SignalingPhase::HaveRemoteOffer => {
                return Ok(Outcome::Ignored(IgnoreReason::DuplicateOffer));
            }
            SignalingPhase::Stable if state.last_remote_offer.as_deref() == Some(sdp.as_str()) => {
                debug!("Ignoring retransmitted offer from {}", peer_id);
                return Ok(Outcome::Ignored(IgnoreReason::DuplicateOffer));
            }
            _ => {}
        }

        let desc_err = |source: ConnectionError| NegotiationError::Description {
            peer_id: peer_id.clone(),
            source,
        };

        let collision = state.phase == SignalingPhase::HaveLocalOffer || state.making_offer;
        let mut rolled_back = false;
        if collision {
            if !state.role.is_polite() {
                drop(state);
                info!("Offer collision with {}: keeping local offer", peer_id);
                self.observer
                    .on_collision(peer_id, CollisionResolution::IgnoredRemote)
                    .await;
                return Ok(Outcome::Ignored(IgnoreReason::CollisionYielded));
            }

            if state.phase == SignalingPhase::HaveLocalOffer
                && let Some(connection) = state.connection.clone()
            {
                connection
                    .set_local_description(SessionDescription::rollback())
                    .await
                    .map_err(desc_err)?;
                if !state.negotiated
                    && let Err(e) = connection.discard_data_channel().await
                {
                    warn!("Failed to discard unused data channel for {}: {}", peer_id, e);
                }
            }
            info!("Offer collision with {}: rolled back local offer", peer_id);
            state.phase = SignalingPhase::Stable;
            state.making_offer = false;
            rolled_back = true;
        }

        let connection = self.ensure_connection(&mut state).await?;
        connection
            .set_remote_description(SessionDescription::offer(sdp.clone()))
            .await
            .map_err(desc_err)?;
        state.phase = SignalingPhase::HaveRemoteOffer;

        let rejected = drain_candidates(&mut state, &connection).await;

        let answered = async {
            self.strategy
                .attach(connection.as_ref(), AttachPurpose::Answer)
                .await?;
            let answer = connection.create_answer().await?;
            connection.set_local_description(answer.clone()).await?;
            Ok::<_, ConnectionError>(answer)
        }
        .await;

        let answer = match answered {
            Ok(answer) => answer,
            Err(source) => {
                warn!("Failed to answer {}, rolling back its offer: {}", peer_id, source);
                if let Err(e) = connection
                    .set_remote_description(SessionDescription::rollback())
                    .await
                {
                    warn!("Rollback of remote offer from {} failed: {}", peer_id, e);
                }
                state.phase = SignalingPhase::Stable;
                drop(state);

                self.report_rejected(peer_id, rejected).await;
                return Err(desc_err(source));
            }
        };

        state.phase = SignalingPhase::Stable;
        state.negotiated = true;
        state.last_remote_offer = Some(sdp);
        drop(state);

        self.report_rejected(peer_id, rejected).await;
        if rolled_back {
            self.observer
                .on_collision(peer_id, CollisionResolution::RolledBack)
                .await;
        }

        info!("Sending answer to {}", peer_id);
        self.signaling
            .send_signal(peer_id.clone(), Signal::Answer { sdp: answer.sdp })
            .await;
        Ok(Outcome::Answered { rolled_back })
    }

    pub async fn handle_answer(&self, peer_id: &PeerId, sdp: String) -> Result<Outcome> {
        if *peer_id == self.local_id {
            return Ok(Outcome::Ignored(IgnoreReason::OwnIdentity));
        }
        let Some(slot) = self.slot(peer_id) else {
            return Ok(Outcome::Ignored(IgnoreReason::UnknownPeer));
        };
        let mut state = slot.lock().await;

        let phase = state.phase;
        let connection = match (&state.connection, phase) {
            (_, SignalingPhase::Closed) => return Ok(Outcome::Ignored(IgnoreReason::Closed)),
            (Some(connection), SignalingPhase::HaveLocalOffer) => connection.clone(),
            _ => {
                debug!("Ignoring answer from {} in {}", peer_id, phase);
                return Ok(Outcome::Ignored(IgnoreReason::StrayAnswer(phase)));
            }
        };

        connection
            .set_remote_description(SessionDescription::answer(sdp))
            .await
            .map_err(|source| NegotiationError::Description {
                peer_id: peer_id.clone(),
                source,
            })?;

        let rejected = drain_candidates(&mut state, &connection).await;
        state.phase = SignalingPhase::Stable;
        state.negotiated = true;
        drop(state);

        self.report_rejected(peer_id, rejected).await;
        debug!("Applied answer from {}", peer_id);
        Ok(Outcome::AnswerApplied)
    }

    pub async fn add_remote_candidate(
        &self,
        peer_id: &PeerId,
        candidate: IceCandidate,
    ) -> Result<Outcome> {
        if *peer_id == self.local_id {
            return Ok(Outcome::Ignored(IgnoreReason::OwnIdentity));
        }
        let Some(slot) = self.slot(peer_id) else {
            warn!("Dropping candidate for unknown peer {}", peer_id);
            return Ok(Outcome::Ignored(IgnoreReason::UnknownPeer));
        };
        let mut state = slot.lock().await;

        if state.phase == SignalingPhase::Closed {
            return Ok(Outcome::Ignored(IgnoreReason::Closed));
        }

        let ready = match &state.connection {
            Some(connection) if connection.has_remote_description().await => {
                Some(connection.clone())
            }
            _ => None,
        };

        let Some(connection) = ready else {
            state.queue.enqueue(candidate);
            debug!(
                "Queued candidate for {} ({} pending)",
                peer_id,
                state.queue.len()
            );
            return Ok(Outcome::CandidateQueued);
        };
        drop(state);

        match connection.add_ice_candidate(candidate.clone()).await {
            Ok(()) => Ok(Outcome::CandidateApplied),
            Err(e) => {
                self.report_rejected(peer_id, vec![(candidate, e)]).await;
                Ok(Outcome::CandidateRejected)
            }
        }
    }

    async fn report_rejected(
        &self,
        peer_id: &PeerId,
        rejected: Vec<(IceCandidate, ConnectionError)>,
    ) {
        for (candidate, e) in rejected {
            warn!("Candidate from {} rejected: {}", peer_id, e);
            self.observer
                .on_candidate_rejected(peer_id, &candidate, &e)
                .await;
        }
    }

    // ---- teardown ----

    /// Tear down `peer_id`. Returns `false` if there was nothing to close.
    pub async fn close(&self, peer_id: &PeerId) -> bool {
        let Some((_, slot)) = self.peers.remove(peer_id) else {
            return false;
        };

        let connection = {
            let mut state = slot.lock().await;
            state.phase = SignalingPhase::Closed;
            state.making_offer = false;
            let dropped = state.queue.clear();
            if dropped > 0 {
                debug!("Discarded {} queued candidates for {}", dropped, peer_id);
            }
            state.connection.take()
        };

        if let Some(connection) = connection
            && let Err(e) = connection.close().await
        {
            warn!("Error closing connection to {}: {}", peer_id, e);
        }

        info!("Closed peer {}", peer_id);
        self.observer.on_peer_closed(peer_id).await;
        true
    }

    pub async fn close_all(&self) {
        let peers = self.peers();
        join_all(peers.iter().map(|peer_id| self.close(peer_id))).await;
    }

    // ---- local media ----

    pub async fn set_local_tracks(
        &self,
        tracks: Vec<Arc<dyn MediaTrack>>,
    ) -> Vec<NegotiationError> {
        if !self.strategy.set_tracks(tracks).await {
            return Vec::new();
        }
        self.renegotiate_all().await
    }

    pub async fn add_local_track(&self, track: Arc<dyn MediaTrack>) -> Vec<NegotiationError> {
        if !self.strategy.add_track(track).await {
            return Vec::new();
        }
        self.renegotiate_all().await
    }

    pub async fn remove_local_tracks(&self, kind: MediaKind) -> Vec<NegotiationError> {
        if !self.strategy.remove_kind(kind).await {
            return Vec::new();
        }
        self.renegotiate_all().await
    }

    pub async fn clear_local_tracks(&self) -> Vec<NegotiationError> {
        if !self.strategy.clear().await {
            return Vec::new();
        }
        self.renegotiate_all().await
    }

    pub async fn local_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.strategy.local_tracks().await
    }

    /// Renegotiate every established peer concurrently, collecting per-peer failures.
    async fn renegotiate_all(&self) -> Vec<NegotiationError> {
        let peers = self.peers();
        let results = join_all(peers.iter().map(|peer_id| self.renegotiate(peer_id))).await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(Outcome::Ignored(reason)) => {
                    debug!("Renegotiation skipped: {}", reason);
                    None
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Renegotiation failed: {}", e);
                    Some(e)
                }
            })
            .collect()
    }

    // ---- data sub-channel ----

    pub async fn send_to(&self, peer_id: &PeerId, data: Bytes) -> Result<()> {
        let connection = match self.slot(peer_id) {
            Some(slot) => slot.lock().await.connection.clone(),
            None => None,
        };
        let Some(connection) = connection else {
            return Err(NegotiationError::UnknownPeer(peer_id.clone()));
        };

        connection
            .send_data(data)
            .await
            .map_err(|source| NegotiationError::Delivery {
                peer_id: peer_id.clone(),
                source,
            })
    }

    /// Send `data` to every peer with a connection. Failures are collected per peer.
    pub async fn broadcast(&self, data: Bytes) -> Vec<NegotiationError> {
        let mut targets = Vec::new();
        for (peer_id, slot) in self.slots() {
            if slot.lock().await.connection.is_some() {
                targets.push(peer_id);
            }
        }

        let results = join_all(
            targets
                .iter()
                .map(|peer_id| self.send_to(peer_id, data.clone())),
        )
        .await;

        results
            .into_iter()
            .filter_map(|result| {
                let e = result.err()?;
                warn!("Broadcast skipped {}: {}", e.peer_id(), e);
                Some(e)
            })
            .collect()
    }

    // ---- introspection ----

    fn slots(&self) -> Vec<(PeerId, PeerSlot)> {
        self.peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Known peers, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .peers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub async fn snapshot(&self, peer_id: &PeerId) -> Option<PeerSnapshot> {
        let slot = self.slot(peer_id)?;
        let state = slot.lock().await;
        Some(state.snapshot().await)
    }

    pub async fn connectivity_state(&self, peer_id: &PeerId) -> Option<ConnectivityState> {
        let slot = self.slot(peer_id)?;
        let connection = slot.lock().await.connection.clone()?;
        Some(connection.connection_state())
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let mut connected = Vec::new();
        for (peer_id, slot) in self.slots() {
            let connection = slot.lock().await.connection.clone();
            if connection.is_some_and(|c| c.connection_state() == ConnectivityState::Connected) {
                connected.push(peer_id);
            }
        }
        connected.sort();
        connected
    }

    // ---- session hooks ----

    /// Record a connectivity change. `Connected` resets the restart budget.
    pub(crate) async fn note_connectivity(
        &self,
        peer_id: &PeerId,
        connectivity: ConnectivityState,
    ) {
        let Some(slot) = self.slot(peer_id) else {
            return;
        };
        if connectivity == ConnectivityState::Connected {
            slot.lock().await.restart_attempts = 0;
        }
    }

    /// Count a leading attempt towards `peer_id` and return how many came before it.
    pub(crate) async fn next_lead_attempt(&self, peer_id: &PeerId) -> Option<u32> {
        let slot = self.slot(peer_id)?;
        let mut state = slot.lock().await;
        let attempts = state.lead_attempts;
        state.lead_attempts += 1;
        Some(attempts)
    }
}

async fn drain_candidates(
    state: &mut PeerState,
    connection: &Arc<dyn PeerConnection>,
) -> Vec<(IceCandidate, ConnectionError)> {
    if state.queue.is_empty() {
        return Vec::new();
    }

    let report = state
        .queue
        .drain(|candidate| {
            let connection = connection.clone();
            async move { connection.add_ice_candidate(candidate).await }
        })
        .await;
    debug!(
        "Drained candidates for {}: {} applied, {} rejected",
        state.peer_id,
        report.applied,
        report.failed.len()
    );
    report.failed
}
