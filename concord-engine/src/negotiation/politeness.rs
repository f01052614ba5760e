use concord_core::PeerId;

/// Role of the local side towards one remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Leads negotiation and keeps its own offer on collision.
    Impolite,
    /// Yields on collision by rolling back its pending offer.
    Polite,
}

impl Role {
    /// Role of `local` towards `remote`. `None` when both name the same identity.
    pub fn resolve(local: &PeerId, remote: &PeerId) -> Option<Role> {
        if local == remote {
            return None;
        }

        Some(if local_leads(local, remote) {
            Role::Impolite
        } else {
            Role::Polite
        })
    }

    pub fn is_polite(self) -> bool {
        self == Role::Polite
    }
}

/// The lower identity leads.
pub fn local_leads(local: &PeerId, remote: &PeerId) -> bool {
    local < remote
}
