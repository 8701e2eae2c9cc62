//! Command Scheduler
//!
//! Converts each command's server execution time to local time, waits for
//! it, and hands the due command back to the coordinator, which applies due
//! commands one at a time.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::{parse_utc_ms, SyncedClock};
use crate::config::SyncConfig;
use crate::dedup::{command_key, CommandDeduplicator};
use crate::group::{CommandKind, GroupPhase, GroupSession, InboundCommand};
use crate::player::PlayerController;

/// A command whose execution time has arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCommand {
    pub command: InboundCommand,
    /// Server time the command was scheduled for
    pub server_execute_ms: i64,
    /// Schedule the command belongs to; bumped by [`CommandScheduler::cancel_all`]
    pub generation: u64,
}

pub struct CommandScheduler {
    clock: SyncedClock,
    dedup: CommandDeduplicator,
    min_delay_ms: i64,
    due_tx: mpsc::UnboundedSender<DueCommand>,
    pending: JoinSet<()>,
    generation: u64,
}

impl CommandScheduler {
    pub fn new(clock: SyncedClock, config: &SyncConfig, due_tx: mpsc::UnboundedSender<DueCommand>) -> Self {
        Self {
            clock,
            dedup: CommandDeduplicator::new(config.dedup_window_ms),
            min_delay_ms: config.min_schedule_delay_ms,
            due_tx,
            pending: JoinSet::new(),
            generation: 0,
        }
    }

    /// Schedule a command. Returns false when it was a duplicate.
    ///
    /// Never blocks: the wait happens on a spawned task.
    pub fn on_command(&mut self, command: InboundCommand) -> bool {
        let key = command_key(command.kind, command.position_ticks, &command.scheduled_at_utc);
        if !self.dedup.should_process(&key, self.clock.local_now_ms()) {
            debug!("Dropping duplicate command {}", key);
            return false;
        }

        let server_execute_ms = match parse_utc_ms(&command.scheduled_at_utc) {
            Ok(ms) => ms,
            Err(e) => {
                // Executing late beats not executing at all
                warn!("{}; executing {:?} now", e, command.kind);
                self.clock.server_time_now()
            }
        };

        let local_execute_ms = self.clock.local_time_for(server_execute_ms);
        let delay_ms = local_execute_ms - self.clock.local_now_ms();

        info!(
            "Scheduling {:?} at {} ticks in {}ms (offset={}ms)",
            command.kind,
            command.position_ticks,
            delay_ms,
            self.clock.current_offset_ms()
        );

        self.reap_finished();

        let due = DueCommand {
            command,
            server_execute_ms,
            generation: self.generation,
        };
        if delay_ms > self.min_delay_ms {
            let due_tx = self.due_tx.clone();
            self.pending.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
                let _ = due_tx.send(due);
            });
        } else {
            // Already due (or late): apply right away
            let _ = self.due_tx.send(due);
        }
        true
    }

    /// Commands still waiting for their execution time
    pub fn pending_count(&mut self) -> usize {
        self.reap_finished();
        self.pending.len()
    }

    /// False for a command that was already on its way when the schedule
    /// was cancelled
    pub fn is_current(&self, due: &DueCommand) -> bool {
        due.generation == self.generation
    }

    /// Abort all waiting commands and forget seen keys.
    ///
    /// Commands already handed over but not yet applied are invalidated too,
    /// see [`is_current`](Self::is_current).
    pub fn cancel_all(&mut self) {
        let aborted = self.pending.len();
        self.pending.abort_all();
        self.dedup.clear();
        self.generation = self.generation.wrapping_add(1);
        if aborted > 0 {
            debug!("Cancelled {} scheduled command(s)", aborted);
        }
    }

    fn reap_finished(&mut self) {
        while self.pending.try_join_next().is_some() {}
    }
}

/// Apply a due command to the session and the player.
///
/// The sync point is replaced first so the drift corrector never sees the
/// new phase with the old reference point.
pub fn apply_command(session: &mut GroupSession, player: Option<&dyn PlayerController>, due: &DueCommand) {
    let command = &due.command;
    session.set_sync_point(due.server_execute_ms, command.position_ticks);

    match command.kind {
        CommandKind::Unpause => {
            if let Some(player) = player {
                player.seek_to(command.position_ticks);
                player.play();
            }
            session.set_phase(GroupPhase::Playing);
        }
        CommandKind::Pause => {
            if let Some(player) = player {
                player.pause();
                player.seek_to(command.position_ticks);
            }
            session.set_phase(GroupPhase::Paused);
        }
        CommandKind::Seek => {
            if let Some(player) = player {
                player.seek_to(command.position_ticks);
            }
        }
        CommandKind::Stop => {
            if let Some(player) = player {
                player.pause();
            }
            session.set_phase(GroupPhase::Idle);
        }
    }

    debug!(
        "Applied {:?}: phase={:?}, sync point {} ticks @ {}",
        command.kind,
        session.phase(),
        command.position_ticks,
        due.server_execute_ms
    );
}
