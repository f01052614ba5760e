use crate::config::DataChannelConfig;
use crate::connection::{MediaTrack, PeerConnection};
use crate::error::ConnectionError;
use crate::strategy::ChannelKind;
use concord_core::MediaKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Which half of an exchange the contribution is attached for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPurpose {
    Offer,
    Answer,
}

/// Changes made to a connection by one [`ChannelStrategy::attach`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttachReport {
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
    pub recv_only: usize,
    pub data_channel_created: bool,
}

impl AttachReport {
    pub fn is_noop(&self) -> bool {
        *self == AttachReport::default()
    }
}

/// Attaches the local contribution for one [`ChannelKind`] to a connection.
///
/// Holds the local media shared by every peer of the session, at most one track per kind.
pub struct ChannelStrategy {
    kind: ChannelKind,
    data_channel: DataChannelConfig,
    local: RwLock<HashMap<MediaKind, Arc<dyn MediaTrack>>>,
    attach_lock: Mutex<()>,
}

impl ChannelStrategy {
    pub fn new(kind: ChannelKind, data_channel: DataChannelConfig) -> Self {
        Self {
            kind,
            data_channel,
            local: RwLock::new(HashMap::new()),
            attach_lock: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub async fn local_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        let local = self.local.read().await;
        self.kind
            .media_kinds()
            .iter()
            .filter_map(|kind| local.get(kind).cloned())
            .collect()
    }

    /// Replace the whole local set. Returns `true` if anything changed.
    pub async fn set_tracks(&self, tracks: Vec<Arc<dyn MediaTrack>>) -> bool {
        let mut next = HashMap::new();
        for track in tracks {
            if self.accepts(track.as_ref()) {
                next.insert(track.kind(), track);
            }
        }

        let mut local = self.local.write().await;
        let changed = !same_tracks(&local, &next);
        *local = next;
        changed
    }

    /// Add a track, replacing any local track of the same kind.
    pub async fn add_track(&self, track: Arc<dyn MediaTrack>) -> bool {
        if !self.accepts(track.as_ref()) {
            return false;
        }

        let mut local = self.local.write().await;
        let unchanged = local
            .get(&track.kind())
            .is_some_and(|current| current.id() == track.id());
        local.insert(track.kind(), track);
        !unchanged
    }

    pub async fn remove_kind(&self, kind: MediaKind) -> bool {
        self.local.write().await.remove(&kind).is_some()
    }

    pub async fn clear(&self) -> bool {
        let mut local = self.local.write().await;
        let changed = !local.is_empty();
        local.clear();
        changed
    }

    /// Bring `connection` in line with the local media set.
    ///
    /// Safe to repeat: a track already sent is left alone, a different track of
    /// the same kind is swapped in place. The data sub-channel is only opened by
    /// the offering side.
    pub async fn attach(
        &self,
        connection: &dyn PeerConnection,
        purpose: AttachPurpose,
    ) -> Result<AttachReport, ConnectionError> {
        let _guard = self.attach_lock.lock().await;

        let local = self.local.read().await.clone();
        let transceivers = connection.transceivers().await;
        let mut report = AttachReport::default();

        for &kind in self.kind.media_kinds() {
            let sent = transceivers
                .iter()
                .find(|t| t.kind == kind && t.track_id.is_some());

            match (local.get(&kind), sent) {
                (Some(track), Some(current)) if current.track_id.as_deref() == Some(track.id()) => {}
                (Some(track), Some(_)) => {
                    if connection.replace_track(track.clone()).await? {
                        report.replaced += 1;
                    } else {
                        connection.add_track(track.clone()).await?;
                        report.added += 1;
                    }
                }
                (Some(track), None) => {
                    connection.add_track(track.clone()).await?;
                    report.added += 1;
                }
                (None, Some(_)) => {
                    if connection.remove_track(kind).await? {
                        report.removed += 1;
                    }
                }
                (None, None) => {
                    if !transceivers.iter().any(|t| t.kind == kind) {
                        connection.add_recv_only_transceiver(kind).await?;
                        report.recv_only += 1;
                    }
                }
            }
        }

        if purpose == AttachPurpose::Offer {
            report.data_channel_created = connection
                .ensure_data_channel(self.kind.data_channel_label(), &self.data_channel)
                .await?;
        }

        if !report.is_noop() {
            debug!("Attached {} contribution: {:?}", self.kind, report);
        }
        Ok(report)
    }

    fn accepts(&self, track: &dyn MediaTrack) -> bool {
        if self.kind.accepts(track.kind()) {
            return true;
        }
        warn!(
            "Ignoring {} track {} for {} session",
            track.kind(),
            track.id(),
            self.kind
        );
        false
    }
}

fn same_tracks(
    a: &HashMap<MediaKind, Arc<dyn MediaTrack>>,
    b: &HashMap<MediaKind, Arc<dyn MediaTrack>>,
) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(kind, track)| b.get(kind).is_some_and(|other| other.id() == track.id()))
}
