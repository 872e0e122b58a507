//! Tunable timings for the election timer and replication driver.

use std::time::Duration;

/// Timing knobs for a [`crate::raft::Raft`] replica.
///
/// The defaults match the literal values called out by the consensus design:
/// a 350-500ms randomized election window and a 100ms replication heartbeat.
/// Tests that need the suite to run quickly can shrink these with
/// [`RaftConfig::with_fast_timers`] without changing any behavior, only its
/// wall-clock scale.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            election_timeout_min: Duration::from_millis(350),
            election_timeout_max: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(100),
        }
    }
}

impl RaftConfig {
    /// Scales down the election window and heartbeat interval for tests,
    /// keeping their ratio (election window is ~3-5x the heartbeat) intact.
    pub fn with_fast_timers() -> Self {
        RaftConfig {
            election_timeout_min: Duration::from_millis(60),
            election_timeout_max: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(20),
        }
    }
}
