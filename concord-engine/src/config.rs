use concord_core::IceServerConfig;
use concord_core::utils::{
    DEFAULT_STUN_ADDR, DEFAULT_STUN_ADDR_2, DEFAULT_STUN_ADDR_3, DEFAULT_STUN_ADDR_4,
};
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Configuration handed to the coordinator at construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub ice_candidate_pool_size: u8,
    pub lead_delay: LeadDelayConfig,
    /// Restarts allowed before a connectivity failure becomes terminal.
    pub max_ice_restarts: u32,
    pub data_channel: DataChannelConfig,
    pub close_on_failure: bool,
}

impl NegotiationConfig {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec![
                    DEFAULT_STUN_ADDR.to_owned(),
                    DEFAULT_STUN_ADDR_2.to_owned(),
                    DEFAULT_STUN_ADDR_3.to_owned(),
                    DEFAULT_STUN_ADDR_4.to_owned(),
                ],
                username: None,
                credential: None,
            }],
            ice_candidate_pool_size: 10,
            lead_delay: LeadDelayConfig::default(),
            max_ice_restarts: 3,
            data_channel: DataChannelConfig::default(),
            close_on_failure: true,
        }
    }
}

/// Progressive randomized delay applied before leading an offer.
///
/// Spreads out offers when many peers join at once. Correctness never depends
/// on it; collisions are resolved by politeness.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LeadDelayConfig {
    pub base_ms: u64,
    pub step_ms: u64,
    pub jitter_ms: u64,
}

impl LeadDelayConfig {
    pub fn none() -> Self {
        Self {
            base_ms: 0,
            step_ms: 0,
            jitter_ms: 0,
        }
    }

    pub fn delay_for(&self, attempts: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        };
        let progressive = self.step_ms.saturating_mul(u64::from(attempts));
        Duration::from_millis(self.base_ms.saturating_add(progressive).saturating_add(jitter))
    }
}

impl Default for LeadDelayConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            step_ms: 200,
            jitter_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataChannelConfig {
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            ordered: true,
            max_retransmits: Some(10),
        }
    }
}
