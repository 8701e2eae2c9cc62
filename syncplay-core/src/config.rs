//! Tunables for clock sync, command scheduling and drift correction

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cadence of the first few clock measurements after joining (ms)
const DEFAULT_GREEDY_INTERVAL_MS: u64 = 1000;

/// Cadence once the estimate has converged (ms)
const DEFAULT_LOW_PROFILE_INTERVAL_MS: u64 = 60_000;

/// Number of measurements taken in greedy mode
const DEFAULT_GREEDY_MEASUREMENTS: u32 = 3;

/// Number of clock samples kept for minimum-delay selection
const DEFAULT_SAMPLE_CAPACITY: usize = 8;

/// Round trips above this are treated as stalled measurements (ms)
const DEFAULT_MAX_ROUND_TRIP_MS: i64 = 5000;

/// Upper bound for a single time oracle call (ms)
const DEFAULT_ORACLE_TIMEOUT_MS: u64 = 5000;

/// Dedup window; the seen-set is flushed once it is twice this old (ms)
const DEFAULT_DEDUP_WINDOW_MS: i64 = 1000;

/// Commands due sooner than this are executed immediately (ms)
const DEFAULT_MIN_SCHEDULE_DELAY_MS: i64 = 10;

/// Drift correction tick (ms)
const DEFAULT_DRIFT_TICK_MS: u64 = 1000;

/// Minimum time between two drift corrections (ms)
const DEFAULT_DRIFT_COOLDOWN_MS: i64 = 3000;

/// Drift below this is left alone (ms)
const DEFAULT_DRIFT_SPEED_THRESHOLD_MS: i64 = 200;

/// Drift at or above this is corrected with a seek (ms)
const DEFAULT_DRIFT_SEEK_THRESHOLD_MS: i64 = 2000;

/// Number of drift samples kept for debug display
const DEFAULT_DRIFT_HISTORY: usize = 10;

/// Configuration for the group playback engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between clock measurements while in greedy mode
    pub greedy_interval_ms: u64,
    /// Interval between clock measurements once converged
    pub low_profile_interval_ms: u64,
    /// How many measurements run at the greedy cadence
    pub greedy_measurements: u32,
    /// Bounded clock sample history (FIFO eviction)
    pub sample_capacity: usize,
    /// Samples with a round trip above this are discarded
    pub max_round_trip_ms: i64,
    /// Timeout applied to each time oracle call
    pub oracle_timeout_ms: u64,
    /// Duplicate command suppression window
    pub dedup_window_ms: i64,
    /// Below this delay a scheduled command runs immediately
    pub min_schedule_delay_ms: i64,
    /// Drift corrector tick interval
    pub drift_tick_ms: u64,
    /// Cooldown between corrective actions
    pub drift_cooldown_ms: i64,
    /// Drift that triggers speed nudging
    pub drift_speed_threshold_ms: i64,
    /// Drift that triggers a hard seek
    pub drift_seek_threshold_ms: i64,
    /// Playback speed used when the client is ahead
    pub slow_speed: f32,
    /// Playback speed used when the client is behind
    pub fast_speed: f32,
    /// Drift samples kept for the status display
    pub drift_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            greedy_interval_ms: DEFAULT_GREEDY_INTERVAL_MS,
            low_profile_interval_ms: DEFAULT_LOW_PROFILE_INTERVAL_MS,
            greedy_measurements: DEFAULT_GREEDY_MEASUREMENTS,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            max_round_trip_ms: DEFAULT_MAX_ROUND_TRIP_MS,
            oracle_timeout_ms: DEFAULT_ORACLE_TIMEOUT_MS,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            min_schedule_delay_ms: DEFAULT_MIN_SCHEDULE_DELAY_MS,
            drift_tick_ms: DEFAULT_DRIFT_TICK_MS,
            drift_cooldown_ms: DEFAULT_DRIFT_COOLDOWN_MS,
            drift_speed_threshold_ms: DEFAULT_DRIFT_SPEED_THRESHOLD_MS,
            drift_seek_threshold_ms: DEFAULT_DRIFT_SEEK_THRESHOLD_MS,
            slow_speed: 0.95,
            fast_speed: 1.05,
            drift_history: DEFAULT_DRIFT_HISTORY,
        }
    }
}

impl SyncConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn drift_tick(&self) -> Duration {
        Duration::from_millis(self.drift_tick_ms)
    }
}
