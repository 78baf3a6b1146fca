use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a session side (host or listener). Defaults match the
/// deployed behavior; tests shrink the timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// STUN servers used for ICE gathering. No TURN relay is configured, so
    /// peers behind symmetric NATs may fail to connect.
    pub stun_servers: Vec<String>,
    /// Seconds allowed from offer creation to ICE connected before a
    /// negotiation is declared abandoned and torn down.
    pub negotiation_timeout_secs: u64,
    /// Seconds to wait after the session ends before removing the signaling
    /// subtree, letting in-flight late messages drain.
    pub cleanup_grace_secs: u64,
    /// How often the manager sweeps for stalled negotiations.
    pub sweep_interval_secs: u64,
    /// Capacity of the processed-message-ID cache guarding against
    /// at-least-once delivery.
    pub dedup_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            negotiation_timeout_secs: 30,
            cleanup_grace_secs: 300,
            sweep_interval_secs: 5,
            dedup_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
