//! Event loop owning the group session

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::clock::{parse_utc_ms, ClockSyncEstimator, ClockSyncLoop, SyncedClock, TimeOracle};
use crate::config::SyncConfig;
use crate::drift::{DriftCorrector, DriftLoop};
use crate::group::{
    GroupErrorKind, GroupEvent, GroupJoinedInfo, GroupMember, GroupPhase, GroupSession, InboundCommand,
    PlayQueueUpdate,
};
use crate::player::SharedPlayer;
use crate::scheduler::{apply_command, CommandScheduler, DueCommand};
use crate::service::GroupService;

/// Requests from the facade to the event loop
pub(super) enum Control {
    Event(GroupEvent),
    AttachPlayer(SharedPlayer),
    DetachPlayer,
    /// Local buffering, shown to the group before the server confirms
    Buffering,
    Leave { done: oneshot::Sender<()> },
    Shutdown,
}

/// Sole writer of the group session.
///
/// Group events, due commands and facade requests are handled one at a
/// time, so session updates never interleave.
pub(super) struct CoordinatorTask {
    pub(super) config: SyncConfig,
    pub(super) oracle: Arc<dyn TimeOracle>,
    pub(super) service: Arc<dyn GroupService>,
    pub(super) clock: SyncedClock,
    pub(super) session: Option<GroupSession>,
    pub(super) session_tx: watch::Sender<Option<GroupSession>>,
    pub(super) scheduler: CommandScheduler,
    pub(super) player: Option<SharedPlayer>,
    /// Parked here while no clock sync loop runs
    pub(super) estimator: Option<ClockSyncEstimator>,
    pub(super) clock_loop: Option<ClockSyncLoop>,
    /// Parked here while no player is attached
    pub(super) corrector: Option<DriftCorrector>,
    pub(super) drift_loop: Option<DriftLoop>,
}

impl CoordinatorTask {
    pub(super) async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut due_rx: mpsc::UnboundedReceiver<DueCommand>,
    ) {
        debug!("Coordinator event loop started");

        loop {
            tokio::select! {
                control = control_rx.recv() => match control {
                    Some(Control::Shutdown) | None => break,
                    Some(control) => self.handle_control(control).await,
                },
                Some(due) = due_rx.recv() => self.handle_due(due),
            }
        }

        self.teardown("coordinator shut down").await;
        debug!("Coordinator event loop ended");
    }

    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::Event(event) => self.handle_event(event).await,
            Control::AttachPlayer(player) => {
                self.stop_drift().await;
                self.player = Some(player);
                if self.session.is_some() {
                    self.start_drift();
                }
                info!("Player attached");
            }
            Control::DetachPlayer => {
                self.stop_drift().await;
                self.player = None;
                info!("Player detached");
            }
            Control::Buffering => {
                if let Some(session) = self.session.as_mut() {
                    session.set_phase(GroupPhase::Buffering);
                    self.publish();
                }
            }
            Control::Leave { done } => {
                self.teardown("left group").await;
                let _ = done.send(());
            }
            Control::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: GroupEvent) {
        match event {
            GroupEvent::GroupJoined(info) => self.handle_group_joined(info).await,
            GroupEvent::GroupLeft => self.teardown("group left").await,
            GroupEvent::GroupError(kind) => self.handle_group_error(kind).await,
            GroupEvent::StateUpdate { state, reason } => self.handle_state_update(&state, &reason),
            GroupEvent::PlayQueue(update) => self.handle_play_queue(update),
            GroupEvent::UserJoined(member) => self.handle_user_joined(member),
            GroupEvent::UserLeft { user_id } => self.handle_user_left(&user_id),
            GroupEvent::Command(command) => self.handle_command(command),
        }
    }

    async fn handle_group_joined(&mut self, info: GroupJoinedInfo) {
        if self.session.is_some() {
            self.teardown("switching group").await;
        }

        let synced_at_ms = match info.last_updated_at.as_deref().map(parse_utc_ms) {
            Some(Ok(ms)) => ms,
            Some(Err(e)) => {
                warn!("{}; using current server time for join position", e);
                self.clock.server_time_now()
            }
            None => self.clock.server_time_now(),
        };

        let session = GroupSession::from_joined(info, synced_at_ms);
        info!(
            "Joined group '{}' ({}): phase={:?}, {} member(s)",
            session.group_name,
            session.group_id,
            session.phase(),
            session.member_count()
        );
        self.session = Some(session);
        self.publish();

        self.start_clock_sync();
        self.start_drift();
    }

    async fn handle_group_error(&mut self, kind: GroupErrorKind) {
        match kind {
            GroupErrorKind::NotInGroup | GroupErrorKind::GroupDoesNotExist => {
                warn!("Group error {:?}, dropping session", kind);
                self.teardown("group error").await;
            }
            GroupErrorKind::LibraryAccessDenied => {
                warn!("Group refused access to the current library item");
            }
        }
    }

    fn handle_state_update(&mut self, state: &str, reason: &str) {
        let Some(session) = self.session.as_mut() else {
            debug!("Ignoring state update outside a group");
            return;
        };
        if session.apply_state_update(state) {
            debug!("Group state -> {:?} ({})", session.phase(), reason);
            self.publish();
        }
    }

    fn handle_play_queue(&mut self, update: PlayQueueUpdate) {
        let Some(session) = self.session.as_mut() else {
            debug!("Ignoring play queue update outside a group");
            return;
        };
        debug!(
            "Play queue update ({}): {} item(s), index {}",
            update.reason,
            update.items.len(),
            update.playing_item_index
        );
        session.apply_queue_update(update);
        self.publish();
    }

    fn handle_user_joined(&mut self, member: GroupMember) {
        if let Some(session) = self.session.as_mut() {
            info!("{} joined the group", member.display_name);
            session.upsert_member(member);
            self.publish();
        }
    }

    fn handle_user_left(&mut self, user_id: &str) {
        if let Some(session) = self.session.as_mut() {
            if let Some(member) = session.remove_member(user_id) {
                info!("{} left the group", member.display_name);
                self.publish();
            }
        }
    }

    fn handle_command(&mut self, command: InboundCommand) {
        if self.session.is_none() {
            debug!("Ignoring {:?} command outside a group", command.kind);
            return;
        }
        self.scheduler.on_command(command);
    }

    fn handle_due(&mut self, due: DueCommand) {
        if !self.scheduler.is_current(&due) {
            debug!("Dropping {:?} scheduled before the last teardown", due.command.kind);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        apply_command(session, self.player.as_deref(), &due);
        self.publish();
    }

    fn publish(&self) {
        self.session_tx.send_replace(self.session.clone());
    }

    fn start_clock_sync(&mut self) {
        if self.clock_loop.is_some() {
            return;
        }
        match self.estimator.take() {
            Some(estimator) => {
                self.clock_loop = Some(ClockSyncLoop::start(
                    estimator,
                    self.oracle.clone(),
                    Some(self.service.clone()),
                ));
            }
            None => warn!("Clock estimator unavailable, running without clock sync"),
        }
    }

    async fn stop_clock_sync(&mut self) {
        if let Some(clock_loop) = self.clock_loop.take() {
            match clock_loop.stop().await {
                Some(estimator) => self.estimator = Some(estimator),
                None => warn!("Clock sync task lost its estimator, clock sync stays off"),
            }
        }
    }

    fn start_drift(&mut self) {
        if self.drift_loop.is_some() {
            return;
        }
        let Some(player) = self.player.clone() else {
            return;
        };
        let corrector = self
            .corrector
            .take()
            .unwrap_or_else(|| DriftCorrector::new(&self.config));
        self.drift_loop = Some(DriftLoop::attach(
            corrector,
            player,
            self.session_tx.subscribe(),
            self.clock.clone(),
            self.config.drift_tick(),
        ));
    }

    async fn stop_drift(&mut self) {
        if let Some(drift_loop) = self.drift_loop.take() {
            if let Some(corrector) = drift_loop.detach().await {
                self.corrector = Some(corrector);
            }
        }
    }

    /// Drift first so no speed or seek call races the teardown, then clock
    /// sync, then pending commands, then the session itself.
    async fn teardown(&mut self, reason: &str) {
        let had_session = self.session.is_some();

        self.stop_drift().await;
        self.stop_clock_sync().await;
        self.scheduler.cancel_all();

        if had_session {
            self.session = None;
            self.publish();
            info!("Session closed: {}", reason);
        }
    }
}
