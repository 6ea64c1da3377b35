use std::time::Duration;

use crate::error::{NodeError, Result};

/// Timing configuration for a simulated node.
///
/// All durations are in milliseconds. The defaults use a one-second time unit:
/// a 3 unit discovery window, 5 unit registration window and so on.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// How long a fresh node collects `Alive` announcements.
    pub discovery_window_ms: u64,
    /// How long to wait for a `RegistrationResponse` once a leader is known.
    pub registration_window_ms: u64,
    /// How long to wait for a heartbeat when no leader is known yet.
    pub heartbeat_wait_ms: u64,
    /// Pause between self-distribution and the first election.
    pub settle_delay_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Confirmations received later than this after a heartbeat are ignored.
    /// Must be shorter than `heartbeat_interval_ms`.
    pub confirmation_window_ms: u64,
    /// Upper bound for `send_to_sync` / `receive_from_sync`.
    pub rendezvous_timeout_ms: u64,
    /// Pause before a node that does not want the token passes it on.
    pub token_hop_delay_ms: u64,
    pub ephemeral_id_min: u64,
    pub ephemeral_id_max: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::scaled(1000)
    }
}

impl NodeConfig {
    /// Build a configuration where one protocol time unit lasts `unit_ms`.
    pub fn scaled(unit_ms: u64) -> Self {
        Self {
            discovery_window_ms: 3 * unit_ms,
            registration_window_ms: 5 * unit_ms,
            heartbeat_wait_ms: 3 * unit_ms,
            settle_delay_ms: unit_ms,
            election_timeout_min_ms: 5 * unit_ms,
            election_timeout_max_ms: 10 * unit_ms,
            heartbeat_interval_ms: 3 * unit_ms,
            confirmation_window_ms: 2 * unit_ms,
            rendezvous_timeout_ms: 30 * unit_ms,
            token_hop_delay_ms: (unit_ms / 10).max(1),
            ephemeral_id_min: 10_000,
            ephemeral_id_max: 99_999,
        }
    }

    pub fn with_rendezvous_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.rendezvous_timeout_ms = timeout_ms;
        self
    }

    pub fn with_election_timeout_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.election_timeout_min_ms = min_ms;
        self.election_timeout_max_ms = max_ms;
        self
    }

    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(NodeError::InvalidConfig(format!(
                "election timeout range {}..{} is inverted",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.confirmation_window_ms >= self.heartbeat_interval_ms {
            return Err(NodeError::InvalidConfig(format!(
                "confirmation window {}ms must be shorter than heartbeat interval {}ms",
                self.confirmation_window_ms, self.heartbeat_interval_ms
            )));
        }
        if self.ephemeral_id_min > self.ephemeral_id_max {
            return Err(NodeError::InvalidConfig(
                "ephemeral id range is inverted".to_string(),
            ));
        }
        Ok(())
    }
}
