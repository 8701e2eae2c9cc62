//! Drift correction for group playback
//!
//! Compares the player's position with the position extrapolated from the
//! group's last sync point and nudges playback speed (small drift) or seeks
//! (large drift) to bring the client back in line.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::SyncedClock;
use crate::config::SyncConfig;
use crate::group::{GroupPhase, GroupSession, SyncPoint};
use crate::player::{ms_to_ticks, ticks_to_ms, PlayerController, SharedPlayer};

const NORMAL_SPEED: f32 = 1.0;

/// What a single correction tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftAction {
    /// Group not playing or player paused; speed forced back to normal
    Skipped,
    /// Drift is small enough to leave alone
    InSync,
    /// Drift needs correcting but the last correction is too recent
    Cooldown,
    /// Playback speed changed to close the gap
    Nudge(f32),
    /// Hard seek to the expected position (ticks)
    Seek(i64),
}

/// One drift measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSample {
    pub expected_position_ms: i64,
    pub actual_position_ms: i64,
    /// Positive = ahead of the group, negative = behind
    pub drift_ms: i64,
    /// Server time the sample was taken
    pub taken_at_ms: i64,
    pub action: DriftAction,
}

/// Sync status for debug display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriftStatus {
    /// Latest drift, None until the first measurement while playing
    pub drift_ms: Option<i64>,
    pub playback_speed: f32,
    pub offset_ms: i64,
    pub round_trip_ms: i64,
    pub in_cooldown: bool,
    /// Recent samples (newest last)
    pub samples: Vec<DriftSample>,
}

/// Position the group is at right now according to the sync point
pub fn expected_position_ms(sync: SyncPoint, server_now_ms: i64) -> i64 {
    sync.position_ms() + (server_now_ms - sync.server_time_ms)
}

/// Closed-loop drift controller.
///
/// Holds the only mutable correction state (speed, cooldown, history); it is
/// owned by the drift loop task while attached.
pub struct DriftCorrector {
    speed_threshold_ms: i64,
    seek_threshold_ms: i64,
    cooldown_ms: i64,
    slow_speed: f32,
    fast_speed: f32,
    history_len: usize,
    current_speed: f32,
    last_correction_ms: Option<i64>,
    history: VecDeque<DriftSample>,
    status_tx: watch::Sender<DriftStatus>,
}

impl DriftCorrector {
    pub fn new(config: &SyncConfig) -> Self {
        let (status_tx, _) = watch::channel(DriftStatus {
            playback_speed: NORMAL_SPEED,
            ..Default::default()
        });
        Self {
            speed_threshold_ms: config.drift_speed_threshold_ms,
            seek_threshold_ms: config.drift_seek_threshold_ms,
            cooldown_ms: config.drift_cooldown_ms,
            slow_speed: config.slow_speed,
            fast_speed: config.fast_speed,
            history_len: config.drift_history,
            current_speed: NORMAL_SPEED,
            last_correction_ms: None,
            history: VecDeque::new(),
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DriftStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_speed(&self) -> f32 {
        self.current_speed
    }

    /// One control step.
    ///
    /// `phase`/`sync` come from the current session snapshot, `server_now_ms`
    /// from the synchronized clock.
    pub fn tick(
        &mut self,
        phase: GroupPhase,
        sync: SyncPoint,
        server_now_ms: i64,
        player: &dyn PlayerController,
    ) -> DriftAction {
        if phase != GroupPhase::Playing || !player.is_playing() {
            self.ensure_speed(player, NORMAL_SPEED);
            return DriftAction::Skipped;
        }

        let expected_ms = expected_position_ms(sync, server_now_ms);
        let actual_ms = ticks_to_ms(player.current_position_ticks());
        let drift_ms = actual_ms - expected_ms;
        let magnitude = drift_ms.abs();
        let in_cooldown = self.in_cooldown(server_now_ms);

        let action = if magnitude < self.speed_threshold_ms {
            self.ensure_speed(player, NORMAL_SPEED);
            DriftAction::InSync
        } else if in_cooldown {
            DriftAction::Cooldown
        } else if magnitude < self.seek_threshold_ms {
            let speed = if drift_ms > 0 {
                self.slow_speed
            } else {
                self.fast_speed
            };
            self.ensure_speed(player, speed);
            self.last_correction_ms = Some(server_now_ms);
            info!(
                "Drift {:+}ms (expected {}ms, actual {}ms), playback speed {}",
                drift_ms, expected_ms, actual_ms, speed
            );
            DriftAction::Nudge(speed)
        } else {
            let target_ticks = ms_to_ticks(expected_ms);
            info!(
                "Drift {:+}ms exceeds {}ms, seeking to {}ms",
                drift_ms, self.seek_threshold_ms, expected_ms
            );
            player.seek_to(target_ticks);
            player.set_playback_speed(NORMAL_SPEED);
            self.current_speed = NORMAL_SPEED;
            self.last_correction_ms = Some(server_now_ms);
            DriftAction::Seek(target_ticks)
        };

        debug!(
            "Sync: drift {:+}ms (expected: {}ms, actual: {}ms) -> {:?}",
            drift_ms, expected_ms, actual_ms, action
        );
        self.record(DriftSample {
            expected_position_ms: expected_ms,
            actual_position_ms: actual_ms,
            drift_ms,
            taken_at_ms: server_now_ms,
            action,
        });
        action
    }

    /// Put speed back to normal (detaching)
    pub fn reset(&mut self, player: &dyn PlayerController) {
        self.ensure_speed(player, NORMAL_SPEED);
        self.last_correction_ms = None;
        self.history.clear();
    }

    /// Publish the current status for the UI
    pub fn publish(&self, clock: &SyncedClock) {
        let estimate = clock.estimate();
        let server_now_ms = clock.server_time_now();
        self.status_tx.send_replace(DriftStatus {
            drift_ms: self.history.back().map(|s| s.drift_ms),
            playback_speed: self.current_speed,
            offset_ms: estimate.offset_ms,
            round_trip_ms: estimate.round_trip_ms,
            in_cooldown: self.in_cooldown(server_now_ms),
            samples: self.history.iter().copied().collect(),
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &DriftSample> {
        self.history.iter()
    }

    fn in_cooldown(&self, now_ms: i64) -> bool {
        self.last_correction_ms
            .map(|last| now_ms - last < self.cooldown_ms)
            .unwrap_or(false)
    }

    fn ensure_speed(&mut self, player: &dyn PlayerController, speed: f32) {
        if self.current_speed != speed {
            player.set_playback_speed(speed);
            self.current_speed = speed;
        }
    }

    fn record(&mut self, sample: DriftSample) {
        self.history.push_back(sample);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
    }
}

/// Periodic driver of a [`DriftCorrector`] attached to one player
pub struct DriftLoop {
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<DriftCorrector>,
    player: SharedPlayer,
}

impl DriftLoop {
    /// Start ticking every `tick` against `player`
    pub fn attach(
        corrector: DriftCorrector,
        player: SharedPlayer,
        session_rx: watch::Receiver<Option<GroupSession>>,
        clock: SyncedClock,
        tick: Duration,
    ) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run(corrector, player.clone(), session_rx, clock, tick, cancel_rx));
        Self {
            cancel_tx: Some(cancel_tx),
            handle,
            player,
        }
    }

    /// Stop ticking, restore normal speed and return the corrector
    pub async fn detach(mut self) -> Option<DriftCorrector> {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.handle).await {
            Ok(mut corrector) => {
                corrector.reset(self.player.as_ref());
                Some(corrector)
            }
            Err(e) => {
                debug!("Drift loop ended abnormally: {}", e);
                None
            }
        }
    }
}

impl Drop for DriftLoop {
    fn drop(&mut self) {
        if self.cancel_tx.is_some() {
            self.handle.abort();
        }
    }
}

async fn run(
    mut corrector: DriftCorrector,
    player: SharedPlayer,
    session_rx: watch::Receiver<Option<GroupSession>>,
    clock: SyncedClock,
    tick: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
) -> DriftCorrector {
    info!("Drift corrector attached");

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut cancel_rx => break,
            _ = interval.tick() => {}
        }

        let snapshot = session_rx
            .borrow()
            .as_ref()
            .map(|s| (s.phase(), s.last_sync()));
        let (phase, sync) = snapshot.unwrap_or((GroupPhase::Idle, SyncPoint::default()));

        corrector.tick(phase, sync, clock.server_time_now(), player.as_ref());
        corrector.publish(&clock);
    }

    info!("Drift corrector detached");
    corrector
}
