//! Periodic driver for the clock estimator

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::estimator::ClockSyncEstimator;
use super::{SyncError, TimeOracle};
use crate::service::GroupService;

/// Running measurement loop.
///
/// The loop task owns the estimator while it runs and hands it back on
/// [`ClockSyncLoop::stop`], reset and ready for the next group.
pub struct ClockSyncLoop {
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<ClockSyncEstimator>,
}

impl ClockSyncLoop {
    /// Start measuring immediately, then at the estimator's cadence.
    ///
    /// When `ping_reporter` is set, the active round trip is reported to the
    /// group service after every accepted sample.
    pub fn start(
        estimator: ClockSyncEstimator,
        oracle: Arc<dyn TimeOracle>,
        ping_reporter: Option<Arc<dyn GroupService>>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run(estimator, oracle, ping_reporter, cancel_rx));
        Self {
            cancel_tx: Some(cancel_tx),
            handle,
        }
    }

    /// Cancel the loop and take the estimator back, cleared
    pub async fn stop(mut self) -> Option<ClockSyncEstimator> {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.handle).await {
            Ok(mut estimator) => {
                estimator.reset();
                Some(estimator)
            }
            Err(e) => {
                warn!("Clock sync task ended abnormally: {}", e);
                None
            }
        }
    }
}

impl Drop for ClockSyncLoop {
    fn drop(&mut self) {
        if self.cancel_tx.is_some() {
            self.handle.abort();
        }
    }
}

async fn run(
    mut estimator: ClockSyncEstimator,
    oracle: Arc<dyn TimeOracle>,
    ping_reporter: Option<Arc<dyn GroupService>>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> ClockSyncEstimator {
    info!("Clock sync loop started");

    loop {
        let attempt = AssertUnwindSafe(estimator.measure(oracle.as_ref())).catch_unwind();
        let result = tokio::select! {
            _ = &mut cancel_rx => break,
            result = attempt => result,
        };
        let result = result.unwrap_or_else(|_| {
            warn!("Clock sync: measurement panicked, dropping sample history");
            estimator.reset();
            Err(SyncError::Oracle("time oracle panicked".to_string()))
        });

        match result {
            Ok(sample) => {
                debug!(
                    "Clock sync: measurement #{} accepted (offset={}ms, rtt={}ms, mode={:?})",
                    estimator.measurement_count(),
                    sample.offset_ms,
                    sample.round_trip_ms,
                    estimator.mode()
                );
                if let Some(reporter) = &ping_reporter {
                    let rtt_ms = estimator.round_trip_ms();
                    let report = AssertUnwindSafe(tokio::time::timeout(
                        estimator.request_timeout(),
                        reporter.report_ping(rtt_ms),
                    ))
                    .catch_unwind();
                    tokio::select! {
                        _ = &mut cancel_rx => break,
                        reported = report => match reported {
                            Ok(Ok(Ok(()))) => {}
                            Ok(Ok(Err(e))) => debug!("Ping report failed: {}", e),
                            Ok(Err(_)) => debug!("Ping report timed out"),
                            Err(_) => warn!("Ping report panicked"),
                        }
                    }
                }
            }
            Err(e) => {
                // Skip this sample; history stays as it was
                debug!(
                    "Clock sync: measurement #{} skipped: {}",
                    estimator.measurement_count(),
                    e
                );
            }
        }

        let interval = estimator.next_interval();
        tokio::select! {
            _ = &mut cancel_rx => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Clock sync loop stopped");
    estimator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{format_utc_ms, Clock, MonotonicClock, SyncError};
    use crate::config::SyncConfig;
    use crate::testing::{RecordingService, ScriptedOracle};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_greedy_then_low_profile_cadence() {
        let clock = Arc::new(MonotonicClock::starting_at(1_000_000));
        let estimator = ClockSyncEstimator::new(clock.clone(), SyncConfig::default());
        let oracle = Arc::new(ScriptedOracle::tracking(clock.clone(), 0));

        let sync = ClockSyncLoop::start(estimator, oracle.clone(), None);

        // t=0, 1s, 2s are greedy; the fourth waits for the low profile interval
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(oracle.calls(), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(oracle.calls(), 3);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(oracle.calls(), 4);

        let estimator = sync.stop().await.unwrap();
        assert_eq!(estimator.measurement_count(), 0);
        assert_eq!(estimator.samples().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_skipped() {
        let clock = Arc::new(MonotonicClock::starting_at(1_000_000));
        let estimator = ClockSyncEstimator::new(clock.clone(), SyncConfig::default());
        let synced = estimator.synced_clock();
        let now = clock.now_ms();
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Ok((format_utc_ms(now + 400), format_utc_ms(now + 400))),
            Err(SyncError::Oracle("offline".to_string())),
        ]));

        let sync = ClockSyncLoop::start(estimator, oracle.clone(), None);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(oracle.calls(), 2);
        assert_eq!(synced.current_offset_ms(), 400);

        sync.stop().await;
        assert_eq!(synced.current_offset_ms(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_oracle_times_out() {
        let clock = Arc::new(MonotonicClock::starting_at(1_000_000));
        let estimator = ClockSyncEstimator::new(clock.clone(), SyncConfig::default());
        let oracle = Arc::new(ScriptedOracle::stalled());

        let sync = ClockSyncLoop::start(estimator, oracle.clone(), None);

        // 5s timeout + 1s greedy interval, then the next attempt starts
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(oracle.calls(), 2);

        sync.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_round_trip() {
        let clock = Arc::new(MonotonicClock::starting_at(1_000_000));
        let estimator = ClockSyncEstimator::new(clock.clone(), SyncConfig::default());
        let oracle = Arc::new(ScriptedOracle::tracking(clock.clone(), 0));
        let service = Arc::new(RecordingService::new());

        let sync = ClockSyncLoop::start(estimator, oracle, Some(service.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sync.stop().await;

        assert_eq!(service.calls(), vec!["ping 0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ping_report_does_not_stall_measuring() {
        let clock = Arc::new(MonotonicClock::starting_at(1_000_000));
        let estimator = ClockSyncEstimator::new(clock.clone(), SyncConfig::default());
        let oracle = Arc::new(ScriptedOracle::tracking(clock.clone(), 0));
        let service = Arc::new(RecordingService::new());
        service.stall_pings();

        let sync = ClockSyncLoop::start(estimator, oracle.clone(), Some(service.clone()));

        // Each report gives up after the 5s request timeout
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(oracle.calls(), 2);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(oracle.calls() >= 4, "only {} measurements", oracle.calls());

        let estimator = sync.stop().await;
        assert!(estimator.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_oracle_keeps_loop_alive() {
        let clock = Arc::new(MonotonicClock::starting_at(1_000_000));
        let estimator = ClockSyncEstimator::new(clock.clone(), SyncConfig::default());
        let oracle = Arc::new(ScriptedOracle::panicking());

        let sync = ClockSyncLoop::start(estimator, oracle.clone(), None);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(oracle.calls(), 3);

        let estimator = sync.stop().await.unwrap();
        assert_eq!(estimator.samples().count(), 0);
    }
}
