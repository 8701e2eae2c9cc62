//! Test doubles for the engine's collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock::{format_utc_ms, Clock, ServerTimeResponse, SyncError, TimeOracle};
use crate::group::{BufferingReport, GroupInfo, RepeatMode, ShuffleMode};
use crate::player::PlayerController;
use crate::service::{GroupService, ServiceError};

/// Manually driven clock
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCall {
    Play,
    Pause,
    Seek(i64),
    Speed(f32),
}

struct PlayerState {
    position_ticks: i64,
    playing: bool,
    calls: Vec<PlayerCall>,
}

/// Player that records every call and tracks play state and position
pub struct RecordingPlayer {
    state: Mutex<PlayerState>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayerState {
                position_ticks: 0,
                playing: false,
                calls: Vec::new(),
            }),
        }
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    pub fn set_position_ticks(&self, ticks: i64) {
        self.state.lock().position_ticks = ticks;
    }

    pub fn take_calls(&self) -> Vec<PlayerCall> {
        std::mem::take(&mut self.state.lock().calls)
    }
}

impl PlayerController for RecordingPlayer {
    fn current_position_ticks(&self) -> i64 {
        self.state.lock().position_ticks
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn set_playback_speed(&self, speed: f32) {
        self.state.lock().calls.push(PlayerCall::Speed(speed));
    }

    fn seek_to(&self, position_ticks: i64) {
        let mut state = self.state.lock();
        state.position_ticks = position_ticks;
        state.calls.push(PlayerCall::Seek(position_ticks));
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.calls.push(PlayerCall::Pause);
    }

    fn play(&self) {
        let mut state = self.state.lock();
        state.playing = true;
        state.calls.push(PlayerCall::Play);
    }
}

enum OracleMode {
    Scripted(Mutex<VecDeque<Result<(String, String), SyncError>>>),
    Tracking { clock: Arc<dyn Clock>, offset_ms: i64 },
    Stalled,
    Panicking,
}

/// Time oracle with canned, clock-following or never-arriving answers
pub struct ScriptedOracle {
    mode: OracleMode,
    advance: Option<(Arc<FixedClock>, i64)>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    /// Answers `(reception, transmission)` pairs in order, then fails
    pub fn new(script: Vec<Result<(String, String), SyncError>>) -> Self {
        Self::with_mode(OracleMode::Scripted(Mutex::new(script.into())))
    }

    /// Answers with the clock's time shifted by `offset_ms`
    pub fn tracking(clock: Arc<dyn Clock>, offset_ms: i64) -> Self {
        Self::with_mode(OracleMode::Tracking { clock, offset_ms })
    }

    /// Never answers
    pub fn stalled() -> Self {
        Self::with_mode(OracleMode::Stalled)
    }

    /// Panics on every call
    pub fn panicking() -> Self {
        Self::with_mode(OracleMode::Panicking)
    }

    /// Move `clock` forward by `ms` during each call
    pub fn advancing(mut self, clock: Arc<FixedClock>, ms: i64) -> Self {
        self.advance = Some((clock, ms));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with_mode(mode: OracleMode) -> Self {
        Self {
            mode,
            advance: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TimeOracle for ScriptedOracle {
    async fn ping_server_time(&self) -> Result<ServerTimeResponse, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.mode, OracleMode::Stalled) {
            std::future::pending::<()>().await;
        }
        let answer = match &self.mode {
            OracleMode::Scripted(script) => {
                let next = script.lock().pop_front();
                next.unwrap_or_else(|| Err(SyncError::Oracle("script exhausted".to_string())))
            }
            OracleMode::Tracking { clock, offset_ms } => {
                let server_now = format_utc_ms(clock.now_ms() + offset_ms);
                Ok((server_now.clone(), server_now))
            }
            OracleMode::Stalled => Err(SyncError::Oracle("stalled".to_string())),
            OracleMode::Panicking => panic!("time oracle exploded"),
        };
        if let Some((clock, ms)) = &self.advance {
            clock.advance(*ms);
        }
        answer.map(|(reception, transmission)| ServerTimeResponse {
            request_reception_time: reception,
            response_transmission_time: transmission,
        })
    }
}

/// Group service that records requests as short strings
pub struct RecordingService {
    calls: Mutex<Vec<String>>,
    groups: Mutex<Vec<GroupInfo>>,
    failure: Mutex<Option<ServiceError>>,
    stall_pings: AtomicBool,
}

impl RecordingService {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            groups: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            stall_pings: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn set_groups(&self, groups: Vec<GroupInfo>) {
        *self.groups.lock() = groups;
    }

    /// Make every following request fail
    pub fn fail_with(&self, error: ServiceError) {
        *self.failure.lock() = Some(error);
    }

    /// Ping reports are recorded but never answered
    pub fn stall_pings(&self) {
        self.stall_pings.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: String) -> Result<(), ServiceError> {
        self.calls.lock().push(call);
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GroupService for RecordingService {
    async fn list_groups(&self) -> Result<Vec<GroupInfo>, ServiceError> {
        self.record("list".to_string())?;
        Ok(self.groups.lock().clone())
    }

    async fn create_group(&self, group_name: &str) -> Result<(), ServiceError> {
        self.record(format!("create {}", group_name))
    }

    async fn join_group(&self, group_id: &str) -> Result<(), ServiceError> {
        self.record(format!("join {}", group_id))
    }

    async fn leave_group(&self) -> Result<(), ServiceError> {
        self.record("leave".to_string())
    }

    async fn request_unpause(&self) -> Result<(), ServiceError> {
        self.record("unpause".to_string())
    }

    async fn request_pause(&self) -> Result<(), ServiceError> {
        self.record("pause".to_string())
    }

    async fn request_seek(&self, position_ticks: i64) -> Result<(), ServiceError> {
        self.record(format!("seek {}", position_ticks))
    }

    async fn request_stop(&self) -> Result<(), ServiceError> {
        self.record("stop".to_string())
    }

    async fn set_new_queue(
        &self,
        item_ids: &[String],
        start_index: usize,
        start_position_ticks: i64,
    ) -> Result<(), ServiceError> {
        self.record(format!(
            "set_queue {} {} {}",
            item_ids.join(","),
            start_index,
            start_position_ticks
        ))
    }

    async fn add_to_queue(&self, item_ids: &[String]) -> Result<(), ServiceError> {
        self.record(format!("add {}", item_ids.join(",")))
    }

    async fn remove_from_queue(&self, playlist_item_ids: &[String]) -> Result<(), ServiceError> {
        self.record(format!("remove {}", playlist_item_ids.join(",")))
    }

    async fn move_queue_item(&self, playlist_item_id: &str, new_index: usize) -> Result<(), ServiceError> {
        self.record(format!("move {} {}", playlist_item_id, new_index))
    }

    async fn set_queue_item(&self, playlist_item_id: &str) -> Result<(), ServiceError> {
        self.record(format!("set_item {}", playlist_item_id))
    }

    async fn next_item(&self, playlist_item_id: &str) -> Result<(), ServiceError> {
        self.record(format!("next {}", playlist_item_id))
    }

    async fn previous_item(&self, playlist_item_id: &str) -> Result<(), ServiceError> {
        self.record(format!("previous {}", playlist_item_id))
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), ServiceError> {
        self.record(format!("repeat {:?}", mode))
    }

    async fn set_shuffle_mode(&self, mode: ShuffleMode) -> Result<(), ServiceError> {
        self.record(format!("shuffle {:?}", mode))
    }

    async fn report_buffering(&self, report: &BufferingReport) -> Result<(), ServiceError> {
        self.record(format!("buffering {} {}", report.position_ticks, report.is_playing))
    }

    async fn report_ready(&self, report: &BufferingReport) -> Result<(), ServiceError> {
        self.record(format!("ready {} {}", report.position_ticks, report.is_playing))
    }

    async fn report_ping(&self, ping_ms: i64) -> Result<(), ServiceError> {
        self.record(format!("ping {}", ping_ms))?;
        if self.stall_pings.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
