//! Caller-facing coordinator handle

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{format_utc_ms, ClockSyncEstimator, MonotonicClock, SharedClock, SyncedClock, TimeOracle};
use crate::config::SyncConfig;
use crate::drift::{DriftCorrector, DriftStatus};
use crate::group::{BufferingReport, GroupEvent, GroupInfo, GroupPhase, GroupSession, RepeatMode, ShuffleMode};
use crate::player::SharedPlayer;
use crate::scheduler::CommandScheduler;
use crate::service::{GroupService, ServiceError};

use super::handlers::{Control, CoordinatorTask};
use super::types::CoreError;

/// Handle to one client's participation in group playback.
///
/// Must be created inside a tokio runtime. Dropping the handle stops the
/// event loop and tears down any active session.
pub struct GroupCoordinator {
    service: Arc<dyn GroupService>,
    clock: SyncedClock,
    control_tx: mpsc::UnboundedSender<Control>,
    session_rx: watch::Receiver<Option<GroupSession>>,
    groups_tx: watch::Sender<Vec<GroupInfo>>,
    drift_rx: watch::Receiver<DriftStatus>,
    /// Whether playback was running when local buffering began
    buffering_from_playing: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GroupCoordinator {
    pub fn new(config: SyncConfig, oracle: Arc<dyn TimeOracle>, service: Arc<dyn GroupService>) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()), oracle, service)
    }

    /// Like [`new`](Self::new) with an explicit local clock
    pub fn with_clock(
        config: SyncConfig,
        clock: SharedClock,
        oracle: Arc<dyn TimeOracle>,
        service: Arc<dyn GroupService>,
    ) -> Self {
        info!("Initializing group coordinator");

        let estimator = ClockSyncEstimator::new(clock, config.clone());
        let synced = estimator.synced_clock();
        let corrector = DriftCorrector::new(&config);
        let drift_rx = corrector.subscribe();

        let (session_tx, session_rx) = watch::channel(None);
        let (groups_tx, _) = watch::channel(Vec::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (due_tx, due_rx) = mpsc::unbounded_channel();

        let task = CoordinatorTask {
            scheduler: CommandScheduler::new(synced.clone(), &config, due_tx),
            config,
            oracle,
            service: service.clone(),
            clock: synced.clone(),
            session: None,
            session_tx,
            player: None,
            estimator: Some(estimator),
            clock_loop: None,
            corrector: Some(corrector),
            drift_loop: None,
        };
        let handle = tokio::spawn(task.run(control_rx, due_rx));

        Self {
            service,
            clock: synced,
            control_tx,
            session_rx,
            groups_tx,
            drift_rx,
            buffering_from_playing: AtomicBool::new(false),
            task: Mutex::new(Some(handle)),
        }
    }

    // === Groups ===

    /// Fetch the server's group list and publish it to group subscribers
    pub async fn refresh_groups(&self) -> Result<Vec<GroupInfo>, CoreError> {
        let groups = self.service.list_groups().await.map_err(|e| {
            warn!("Listing groups failed: {}", e);
            e
        })?;
        debug!("{} group(s) available", groups.len());
        self.groups_tx.send_replace(groups.clone());
        Ok(groups)
    }

    pub fn subscribe_groups(&self) -> watch::Receiver<Vec<GroupInfo>> {
        self.groups_tx.subscribe()
    }

    /// Ask the server to create a group; the session starts on `GroupJoined`
    pub async fn create_group(&self, group_name: &str) -> Result<(), CoreError> {
        info!("Creating group '{}'", group_name);
        checked("Create group", self.service.create_group(group_name).await)
    }

    /// Ask the server to join a group; the session starts on `GroupJoined`
    pub async fn join_group(&self, group_id: &str) -> Result<(), CoreError> {
        info!("Joining group {}", group_id);
        checked("Join group", self.service.join_group(group_id).await)
    }

    /// Leave the current group.
    ///
    /// The local session is torn down even when the server request fails;
    /// the request's error is still returned.
    pub async fn leave_group(&self) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        info!("Leaving group");
        let result = self.service.leave_group().await;

        let (done_tx, done_rx) = oneshot::channel();
        self.send(Control::Leave { done: done_tx })?;
        done_rx.await.map_err(|_| CoreError::Closed)?;

        checked("Leave group", result)
    }

    // === Playback requests ===
    //
    // These only ask the server; the group's state changes when the
    // resulting command arrives.

    pub async fn request_play(&self) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked("Unpause request", self.service.request_unpause().await)
    }

    pub async fn request_pause(&self) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked("Pause request", self.service.request_pause().await)
    }

    pub async fn request_seek(&self, position_ticks: i64) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked("Seek request", self.service.request_seek(position_ticks).await)
    }

    pub async fn request_stop(&self) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked("Stop request", self.service.request_stop().await)
    }

    // === Queue ===

    /// Replace the group queue, starting at `start_index`
    pub async fn set_queue(&self, item_ids: &[String], start_index: usize) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked(
            "Set queue",
            self.service.set_new_queue(item_ids, start_index, 0).await,
        )
    }

    pub async fn add_to_queue(&self, item_ids: &[String]) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked("Add to queue", self.service.add_to_queue(item_ids).await)
    }

    pub async fn remove_from_queue(&self, playlist_item_ids: &[String]) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked(
            "Remove from queue",
            self.service.remove_from_queue(playlist_item_ids).await,
        )
    }

    pub async fn move_queue_item(&self, playlist_item_id: &str, new_index: usize) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked(
            "Move queue item",
            self.service.move_queue_item(playlist_item_id, new_index).await,
        )
    }

    /// Jump to a queued item
    pub async fn set_queue_item(&self, playlist_item_id: &str) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked(
            "Set queue item",
            self.service.set_queue_item(playlist_item_id).await,
        )
    }

    pub async fn next_item(&self) -> Result<(), CoreError> {
        let current = self.current_playlist_item_id()?;
        checked("Next item", self.service.next_item(&current).await)
    }

    pub async fn previous_item(&self) -> Result<(), CoreError> {
        let current = self.current_playlist_item_id()?;
        checked("Previous item", self.service.previous_item(&current).await)
    }

    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked("Set repeat mode", self.service.set_repeat_mode(mode).await)
    }

    pub async fn set_shuffle_mode(&self, mode: ShuffleMode) -> Result<(), CoreError> {
        self.ensure_in_group()?;
        checked("Set shuffle mode", self.service.set_shuffle_mode(mode).await)
    }

    // === Buffering ===

    /// Report that the local player stalled.
    ///
    /// The session shows `Buffering` right away, before the server answers.
    pub async fn report_buffering(&self, position_ticks: i64) -> Result<(), CoreError> {
        let phase = self.phase();
        self.ensure_in_group()?;
        if phase != GroupPhase::Buffering {
            self.buffering_from_playing
                .store(phase == GroupPhase::Playing, Ordering::SeqCst);
        }
        self.send(Control::Buffering)?;

        let report = self.buffering_report(position_ticks, phase == GroupPhase::Playing);
        checked("Buffering report", self.service.report_buffering(&report).await)
    }

    /// Report that the local player can play again.
    ///
    /// Leaves the phase alone; the server answers with a command.
    pub async fn report_ready(&self, position_ticks: i64) -> Result<(), CoreError> {
        let phase = self.phase();
        self.ensure_in_group()?;
        let is_playing = match phase {
            GroupPhase::Buffering => self.buffering_from_playing.swap(false, Ordering::SeqCst),
            other => other == GroupPhase::Playing,
        };

        let report = self.buffering_report(position_ticks, is_playing);
        checked("Ready report", self.service.report_ready(&report).await)
    }

    // === Inbound events ===

    /// Hand one server event to the event loop
    pub fn on_group_event(&self, event: GroupEvent) -> Result<(), CoreError> {
        self.send(Control::Event(event))
    }

    /// Forward every event of `events` until the stream ends
    pub async fn pump_events<S>(&self, events: S) -> Result<(), CoreError>
    where
        S: Stream<Item = GroupEvent>,
    {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            self.on_group_event(event)?;
        }
        debug!("Group event stream ended");
        Ok(())
    }

    // === Player ===

    /// Attach (or replace) the local player; drift correction runs against
    /// it while a session is active.
    pub fn attach_player(&self, player: SharedPlayer) -> Result<(), CoreError> {
        self.send(Control::AttachPlayer(player))
    }

    pub fn detach_player(&self) -> Result<(), CoreError> {
        self.send(Control::DetachPlayer)
    }

    // === Observation ===

    /// Snapshot of the current session, if joined
    pub fn session(&self) -> Option<GroupSession> {
        self.session_rx.borrow().clone()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Option<GroupSession>> {
        self.session_rx.clone()
    }

    /// Phase of the current session (`Idle` outside a group)
    pub fn phase(&self) -> GroupPhase {
        self.session_rx
            .borrow()
            .as_ref()
            .map(|s| s.phase())
            .unwrap_or_default()
    }

    pub fn is_in_group(&self) -> bool {
        self.session_rx.borrow().is_some()
    }

    pub fn drift_status(&self) -> DriftStatus {
        self.drift_rx.borrow().clone()
    }

    pub fn subscribe_drift_status(&self) -> watch::Receiver<DriftStatus> {
        self.drift_rx.clone()
    }

    /// Server-synchronized clock (offset, round trip, server time)
    pub fn clock(&self) -> &SyncedClock {
        &self.clock
    }

    /// Stop the event loop, tearing down any active session
    pub async fn shutdown(&self) {
        let _ = self.control_tx.send(Control::Shutdown);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Coordinator event loop ended abnormally: {}", e);
            }
        }
        info!("Group coordinator shut down");
    }

    fn send(&self, control: Control) -> Result<(), CoreError> {
        self.control_tx.send(control).map_err(|_| CoreError::Closed)
    }

    fn ensure_in_group(&self) -> Result<(), CoreError> {
        if self.is_in_group() {
            Ok(())
        } else {
            Err(CoreError::NotInGroup)
        }
    }

    fn current_playlist_item_id(&self) -> Result<String, CoreError> {
        let session = self.session_rx.borrow();
        let session = session.as_ref().ok_or(CoreError::NotInGroup)?;
        session
            .current_item()
            .map(|item| item.playlist_item_id.clone())
            .ok_or(CoreError::NoCurrentItem)
    }

    fn buffering_report(&self, position_ticks: i64, is_playing: bool) -> BufferingReport {
        let playlist_item_id = self
            .session_rx
            .borrow()
            .as_ref()
            .and_then(|s| s.current_item())
            .map(|item| item.playlist_item_id.clone());
        BufferingReport {
            position_ticks,
            is_playing,
            playlist_item_id,
            when: format_utc_ms(self.clock.server_time_now()),
        }
    }
}

fn checked(operation: &str, result: Result<(), ServiceError>) -> Result<(), CoreError> {
    if let Err(e) = &result {
        warn!("{} failed: {}", operation, e);
    }
    result.map_err(CoreError::from)
}
