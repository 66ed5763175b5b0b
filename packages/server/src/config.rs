//! Engine configuration.

use std::time::Duration;

/// Tunables of the synchronization engine
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Maximum acceptable cross-client timing difference
    pub tolerance_ms: u64,
    /// Minimum coordination buffer for `play`/`seek`
    pub preload_buffer_ms: u64,
    /// Coordination buffer grows as `latency_multiplier * latency + latency_margin_ms`
    pub latency_multiplier: f64,
    pub latency_margin_ms: u64,
    /// Coordination buffer for `pause`
    pub pause_buffer_ms: u64,
    /// Readiness wait ends this long before the scheduled instant
    pub readiness_margin_ms: u64,
    pub clock_sync_interval: Duration,
    pub heartbeat_interval: Duration,
    pub activity_timeout: Duration,
    /// Offline records are kept this long for diagnostics
    pub purge_grace: Duration,
    pub drift_check_interval: Duration,
    /// Re-seek players to the server timeline when drift exceeds `realign_threshold_ms`
    pub auto_realign: bool,
    pub realign_threshold_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 100,
            preload_buffer_ms: 2_000,
            latency_multiplier: 3.0,
            latency_margin_ms: 500,
            pause_buffer_ms: 200,
            readiness_margin_ms: 500,
            clock_sync_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            activity_timeout: Duration::from_secs(60),
            purge_grace: Duration::from_secs(5 * 60),
            drift_check_interval: Duration::from_secs(5),
            auto_realign: false,
            realign_threshold_ms: 500,
        }
    }
}

impl SyncConfig {
    pub fn activity_timeout_ms(&self) -> i64 {
        self.activity_timeout.as_millis() as i64
    }

    pub fn purge_grace_ms(&self) -> i64 {
        self.purge_grace.as_millis() as i64
    }
}
