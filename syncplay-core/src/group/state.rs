//! Group Session State

use std::collections::HashMap;
use tracing::warn;

use super::protocol::{GroupJoinedInfo, GroupMember, PlayQueueUpdate, QueueItem, RepeatMode, ShuffleMode};
use crate::player::ticks_to_ms;

/// Shared playback phase of the group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GroupPhase {
    #[default]
    Idle,
    Waiting,
    Paused,
    Playing,
    Buffering,
}

impl GroupPhase {
    /// Map a server phase name; unknown names yield None
    pub fn from_server(state: &str) -> Option<Self> {
        match state.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(GroupPhase::Idle),
            "waiting" => Some(GroupPhase::Waiting),
            "paused" => Some(GroupPhase::Paused),
            "playing" => Some(GroupPhase::Playing),
            "buffering" => Some(GroupPhase::Buffering),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupPhase::Idle => "Idle",
            GroupPhase::Waiting => "Waiting",
            GroupPhase::Paused => "Paused",
            GroupPhase::Playing => "Playing",
            GroupPhase::Buffering => "Buffering",
        }
    }
}

/// Reference point for position extrapolation.
///
/// Both halves are always written together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPoint {
    pub server_time_ms: i64,
    pub position_ticks: i64,
}

impl SyncPoint {
    pub fn position_ms(&self) -> i64 {
        ticks_to_ms(self.position_ticks)
    }
}

/// State of the group we are in
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSession {
    pub group_id: String,
    pub group_name: String,
    phase: GroupPhase,
    /// Members keyed by user id
    members: HashMap<String, GroupMember>,
    queue: Vec<QueueItem>,
    current_queue_index: Option<usize>,
    repeat_mode: RepeatMode,
    shuffle_mode: ShuffleMode,
    last_sync: SyncPoint,
}

impl GroupSession {
    pub fn new(group_id: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            group_name: group_name.into(),
            phase: GroupPhase::Idle,
            members: HashMap::new(),
            queue: Vec::new(),
            current_queue_index: None,
            repeat_mode: RepeatMode::default(),
            shuffle_mode: ShuffleMode::default(),
            last_sync: SyncPoint::default(),
        }
    }

    /// Build the session from the server's join snapshot.
    ///
    /// `synced_at_ms` is the server time the reported position refers to.
    pub fn from_joined(info: GroupJoinedInfo, synced_at_ms: i64) -> Self {
        let mut session = Self::new(info.group_id, info.group_name);
        match GroupPhase::from_server(&info.state) {
            Some(phase) => session.phase = phase,
            None => warn!("Joined group with unknown state '{}', staying idle", info.state),
        }
        for member in info.participants {
            session.upsert_member(member);
        }
        session.set_sync_point(synced_at_ms, info.position_ticks);
        session
    }

    pub fn phase(&self) -> GroupPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: GroupPhase) {
        self.phase = phase;
    }

    /// Apply an authoritative phase name. Unknown names are ignored.
    pub fn apply_state_update(&mut self, state: &str) -> bool {
        match GroupPhase::from_server(state) {
            Some(phase) => {
                self.phase = phase;
                true
            }
            None => {
                warn!("Ignoring unknown group state '{}'", state);
                false
            }
        }
    }

    pub fn last_sync(&self) -> SyncPoint {
        self.last_sync
    }

    pub fn last_sync_server_time_ms(&self) -> i64 {
        self.last_sync.server_time_ms
    }

    pub fn last_sync_position_ticks(&self) -> i64 {
        self.last_sync.position_ticks
    }

    /// Replace the extrapolation reference point
    pub fn set_sync_point(&mut self, server_time_ms: i64, position_ticks: i64) {
        self.last_sync = SyncPoint {
            server_time_ms,
            position_ticks,
        };
    }

    /// Add or replace a member
    pub fn upsert_member(&mut self, member: GroupMember) {
        self.members.insert(member.user_id.clone(), member);
    }

    pub fn remove_member(&mut self, user_id: &str) -> Option<GroupMember> {
        self.members.remove(user_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    /// Members, host first, then by display name
    pub fn member_list(&self) -> Vec<&GroupMember> {
        let mut list: Vec<&GroupMember> = self.members.values().collect();
        list.sort_by(|a, b| match (a.is_host, b.is_host) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a
                .display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase()),
        });
        list
    }

    pub fn queue(&self) -> &[QueueItem] {
        &self.queue
    }

    pub fn current_queue_index(&self) -> Option<usize> {
        self.current_queue_index
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.current_queue_index.and_then(|i| self.queue.get(i))
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        self.shuffle_mode
    }

    /// Replace the queue with the server's version
    pub fn apply_queue_update(&mut self, update: PlayQueueUpdate) {
        self.current_queue_index = usize::try_from(update.playing_item_index)
            .ok()
            .filter(|i| *i < update.items.len());
        self.queue = update.items;
        self.repeat_mode = update.repeat_mode;
        self.shuffle_mode = update.shuffle_mode;
    }
}
