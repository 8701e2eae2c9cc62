//! Group Service boundary
//!
//! Remote procedure calls into the server's group playback API. Each call
//! only signals whether the request was accepted; resulting state changes
//! come back through the event stream.

use async_trait::async_trait;
use thiserror::Error;

use crate::group::{BufferingReport, GroupInfo, RepeatMode, ShuffleMode};

/// Errors reported by a group service implementation
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Group service unavailable")]
    Unavailable,
}

#[async_trait]
pub trait GroupService: Send + Sync {
    // === Group lifecycle ===
    async fn list_groups(&self) -> Result<Vec<GroupInfo>, ServiceError>;
    async fn create_group(&self, group_name: &str) -> Result<(), ServiceError>;
    async fn join_group(&self, group_id: &str) -> Result<(), ServiceError>;
    async fn leave_group(&self) -> Result<(), ServiceError>;

    // === Playback requests ===
    async fn request_unpause(&self) -> Result<(), ServiceError>;
    async fn request_pause(&self) -> Result<(), ServiceError>;
    async fn request_seek(&self, position_ticks: i64) -> Result<(), ServiceError>;
    async fn request_stop(&self) -> Result<(), ServiceError>;

    // === Queue requests ===
    async fn set_new_queue(
        &self,
        item_ids: &[String],
        start_index: usize,
        start_position_ticks: i64,
    ) -> Result<(), ServiceError>;
    async fn add_to_queue(&self, item_ids: &[String]) -> Result<(), ServiceError>;
    async fn remove_from_queue(&self, playlist_item_ids: &[String]) -> Result<(), ServiceError>;
    async fn move_queue_item(&self, playlist_item_id: &str, new_index: usize) -> Result<(), ServiceError>;
    async fn set_queue_item(&self, playlist_item_id: &str) -> Result<(), ServiceError>;
    async fn next_item(&self, playlist_item_id: &str) -> Result<(), ServiceError>;
    async fn previous_item(&self, playlist_item_id: &str) -> Result<(), ServiceError>;
    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), ServiceError>;
    async fn set_shuffle_mode(&self, mode: ShuffleMode) -> Result<(), ServiceError>;

    // === Telemetry ===
    async fn report_buffering(&self, report: &BufferingReport) -> Result<(), ServiceError>;
    async fn report_ready(&self, report: &BufferingReport) -> Result<(), ServiceError>;
    async fn report_ping(&self, ping_ms: i64) -> Result<(), ServiceError>;
}
