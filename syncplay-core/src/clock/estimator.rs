//! Offset estimation with NTP minimum-delay selection

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::source::SharedClock;
use super::{parse_utc_ms, SyncError, TimeOracle};
use crate::config::SyncConfig;

/// One accepted clock measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSyncSample {
    /// Estimated server clock minus local clock
    pub offset_ms: i64,
    /// Round trip excluding server processing time
    pub round_trip_ms: i64,
    /// Half of the total local round trip
    pub network_delay_ms: i64,
    /// Local time at which the request was sent
    pub taken_at_ms: i64,
}

impl ClockSyncSample {
    /// Build a sample from the four round-trip timestamps.
    ///
    /// `t0`/`t3` are local send/receive, `t1`/`t2` are server receive/send.
    pub fn from_timestamps(t0: i64, t1: i64, t2: i64, t3: i64) -> Self {
        Self {
            offset_ms: ((t1 - t0) + (t2 - t3)) / 2,
            round_trip_ms: (t3 - t0) - (t2 - t1),
            network_delay_ms: (t3 - t0) / 2,
            taken_at_ms: t0,
        }
    }
}

/// Measurement cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Fast cadence right after joining
    Greedy,
    /// Slow cadence once converged
    LowProfile,
}

impl SyncMode {
    /// Mode after `measurement_count` measurements have been attempted
    pub fn for_measurement(measurement_count: u32, greedy_measurements: u32) -> Self {
        if measurement_count < greedy_measurements {
            SyncMode::Greedy
        } else {
            SyncMode::LowProfile
        }
    }
}

/// Published estimate read by the scheduler and the drift corrector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockEstimate {
    pub offset_ms: i64,
    pub round_trip_ms: i64,
    pub sample_count: usize,
}

/// Owns the sample history and the measurement counter.
///
/// Only the clock sync loop mutates it; everyone else reads the published
/// [`ClockEstimate`] through a [`SyncedClock`].
pub struct ClockSyncEstimator {
    clock: SharedClock,
    samples: VecDeque<ClockSyncSample>,
    active: Option<ClockSyncSample>,
    measurement_count: u32,
    config: SyncConfig,
    estimate_tx: watch::Sender<ClockEstimate>,
}

impl ClockSyncEstimator {
    pub fn new(clock: SharedClock, config: SyncConfig) -> Self {
        let (estimate_tx, _) = watch::channel(ClockEstimate::default());
        Self {
            clock,
            samples: VecDeque::with_capacity(config.sample_capacity),
            active: None,
            measurement_count: 0,
            config,
            estimate_tx,
        }
    }

    /// Read handle that follows this estimator
    pub fn synced_clock(&self) -> SyncedClock {
        SyncedClock {
            clock: self.clock.clone(),
            estimate_rx: self.estimate_tx.subscribe(),
        }
    }

    /// Ask the oracle once and fold the result into the estimate.
    ///
    /// Rejected or failed measurements leave the history untouched.
    pub async fn measure(&mut self, oracle: &dyn TimeOracle) -> Result<ClockSyncSample, SyncError> {
        self.measurement_count = self.measurement_count.saturating_add(1);

        let t0 = self.clock.now_ms();
        let response = tokio::time::timeout(self.config.oracle_timeout(), oracle.ping_server_time())
            .await
            .map_err(|_| SyncError::Timeout(self.config.oracle_timeout_ms))??;
        let t3 = self.clock.now_ms();

        let t1 = parse_utc_ms(&response.request_reception_time)?;
        let t2 = parse_utc_ms(&response.response_transmission_time)?;

        let sample = ClockSyncSample::from_timestamps(t0, t1, t2, t3);
        if sample.round_trip_ms < 0 || sample.round_trip_ms > self.config.max_round_trip_ms {
            return Err(SyncError::RoundTripOutOfRange(sample.round_trip_ms));
        }

        self.record(sample);
        Ok(sample)
    }

    /// Add an accepted sample and reselect the active one
    pub fn record(&mut self, sample: ClockSyncSample) {
        if self.samples.len() >= self.config.sample_capacity.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        // Lowest delay wins: asymmetric path error shrinks with the delay
        self.active = self
            .samples
            .iter()
            .min_by_key(|s| s.network_delay_ms)
            .copied();

        let estimate = self.estimate();
        debug!(
            "Clock sync: offset={}ms, rtt={}ms (sample offset={}ms, delay={}ms, {} samples)",
            estimate.offset_ms,
            estimate.round_trip_ms,
            sample.offset_ms,
            sample.network_delay_ms,
            estimate.sample_count
        );
        self.estimate_tx.send_replace(estimate);
    }

    /// Drop all history (leaving a group)
    pub fn reset(&mut self) {
        self.samples.clear();
        self.active = None;
        self.measurement_count = 0;
        self.estimate_tx.send_replace(ClockEstimate::default());
    }

    pub fn estimate(&self) -> ClockEstimate {
        ClockEstimate {
            offset_ms: self.current_offset_ms(),
            round_trip_ms: self.round_trip_ms(),
            sample_count: self.samples.len(),
        }
    }

    pub fn current_offset_ms(&self) -> i64 {
        self.active.map(|s| s.offset_ms).unwrap_or(0)
    }

    pub fn round_trip_ms(&self) -> i64 {
        self.active.map(|s| s.round_trip_ms).unwrap_or(0)
    }

    pub fn server_time_now(&self) -> i64 {
        self.clock.now_ms() + self.current_offset_ms()
    }

    pub fn local_time_for(&self, server_time_ms: i64) -> i64 {
        server_time_ms - self.current_offset_ms()
    }

    pub fn active_sample(&self) -> Option<&ClockSyncSample> {
        self.active.as_ref()
    }

    pub fn samples(&self) -> impl Iterator<Item = &ClockSyncSample> {
        self.samples.iter()
    }

    pub fn measurement_count(&self) -> u32 {
        self.measurement_count
    }

    pub fn mode(&self) -> SyncMode {
        SyncMode::for_measurement(self.measurement_count, self.config.greedy_measurements)
    }

    /// Wait before the next measurement
    /// Upper bound for any request the sync loop makes on the estimator's behalf
    pub fn request_timeout(&self) -> Duration {
        self.config.oracle_timeout()
    }

    pub fn next_interval(&self) -> Duration {
        match self.mode() {
            SyncMode::Greedy => Duration::from_millis(self.config.greedy_interval_ms),
            SyncMode::LowProfile => Duration::from_millis(self.config.low_profile_interval_ms),
        }
    }
}

/// Cloneable read side of the clock estimate
#[derive(Clone)]
pub struct SyncedClock {
    clock: SharedClock,
    estimate_rx: watch::Receiver<ClockEstimate>,
}

impl SyncedClock {
    pub fn estimate(&self) -> ClockEstimate {
        *self.estimate_rx.borrow()
    }

    pub fn current_offset_ms(&self) -> i64 {
        self.estimate_rx.borrow().offset_ms
    }

    pub fn round_trip_ms(&self) -> i64 {
        self.estimate_rx.borrow().round_trip_ms
    }

    pub fn local_now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn server_time_now(&self) -> i64 {
        self.clock.now_ms() + self.current_offset_ms()
    }

    pub fn local_time_for(&self, server_time_ms: i64) -> i64 {
        server_time_ms - self.current_offset_ms()
    }
}
