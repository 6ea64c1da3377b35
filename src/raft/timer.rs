use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::NodeConfig;

/// Random election timeout drawn from the configured range, inclusive.
pub fn election_timeout(config: &NodeConfig) -> Duration {
    let (min_ms, max_ms) = (config.election_timeout_min_ms, config.election_timeout_max_ms);
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Point in time at which a follower that heard nothing starts a candidacy.
pub fn election_deadline(config: &NodeConfig) -> Instant {
    Instant::now() + election_timeout(config)
}
