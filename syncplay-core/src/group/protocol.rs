//! Group Events and Commands
//!
//! Field names follow the server's PascalCase JSON so transports can hand
//! payloads straight to serde.

use serde::{Deserialize, Serialize};

/// Playback command kinds the server schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Unpause,
    Pause,
    Seek,
    Stop,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Unpause => "Unpause",
            CommandKind::Pause => "Pause",
            CommandKind::Seek => "Seek",
            CommandKind::Stop => "Stop",
        }
    }
}

/// A playback command with a server-assigned execution time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundCommand {
    #[serde(rename = "Command")]
    pub kind: CommandKind,
    pub position_ticks: i64,
    /// Server time (ISO 8601) at which every member applies the command
    #[serde(rename = "When")]
    pub scheduled_at_utc: String,
    #[serde(default)]
    pub playlist_item_id: Option<String>,
}

impl InboundCommand {
    pub fn new(kind: CommandKind, position_ticks: i64, scheduled_at_utc: impl Into<String>) -> Self {
        Self {
            kind,
            position_ticks,
            scheduled_at_utc: scheduled_at_utc.into(),
            playlist_item_id: None,
        }
    }
}

/// Member of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupMember {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_host: bool,
}

/// Entry of the shared play queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueItem {
    /// Library item
    pub item_id: String,
    /// Position-independent id of this queue entry
    #[serde(default)]
    pub playlist_item_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub runtime_ticks: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatMode {
    RepeatOne,
    RepeatAll,
    #[default]
    RepeatNone,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShuffleMode {
    #[default]
    Sorted,
    Shuffle,
}

/// Group listed as joinable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    pub group_id: String,
    pub group_name: String,
    pub state: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// Snapshot delivered when we enter a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupJoinedInfo {
    pub group_id: String,
    pub group_name: String,
    /// Server phase name
    pub state: String,
    #[serde(default)]
    pub position_ticks: i64,
    /// Server time the position was captured at; "now" when absent
    #[serde(default)]
    pub last_updated_at: Option<String>,
    #[serde(default)]
    pub participants: Vec<GroupMember>,
}

/// Queue replacement pushed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayQueueUpdate {
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "Playlist")]
    pub items: Vec<QueueItem>,
    /// Index of the current item, negative when nothing is selected
    pub playing_item_index: i64,
    #[serde(default)]
    pub start_position_ticks: i64,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub shuffle_mode: ShuffleMode,
}

/// Server-side refusal delivered on the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupErrorKind {
    NotInGroup,
    GroupDoesNotExist,
    LibraryAccessDenied,
}

/// Everything the group service pushes to us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Data")]
pub enum GroupEvent {
    GroupJoined(GroupJoinedInfo),
    GroupLeft,
    #[serde(rename_all = "PascalCase")]
    StateUpdate {
        state: String,
        #[serde(default)]
        reason: String,
    },
    PlayQueue(PlayQueueUpdate),
    UserJoined(GroupMember),
    #[serde(rename_all = "PascalCase")]
    UserLeft {
        user_id: String,
    },
    Command(InboundCommand),
    GroupError(GroupErrorKind),
}

/// Telemetry sent with buffering/ready reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BufferingReport {
    pub position_ticks: i64,
    pub is_playing: bool,
    #[serde(default)]
    pub playlist_item_id: Option<String>,
    /// Local time converted to server time (ISO 8601)
    pub when: String,
}
