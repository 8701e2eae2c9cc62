//! Duplicate command suppression
//!
//! The server may deliver the same scheduled command more than once (socket
//! reconnects, replays). Exact repeats seen within the window are dropped.

use std::collections::HashSet;

use crate::group::CommandKind;

/// Key identifying one scheduled command
pub fn command_key(kind: CommandKind, position_ticks: i64, scheduled_at_utc: &str) -> String {
    format!("{}:{}:{}", kind.as_str(), position_ticks, scheduled_at_utc)
}

/// Bounded set of recently seen command keys.
///
/// Keys live in two generations. Once the current generation is older than
/// the window it becomes the previous one and the old previous generation is
/// dropped whole, so a key is remembered for at least one window and at most
/// two. Real duplicates arrive close together.
#[derive(Debug)]
pub struct CommandDeduplicator {
    current: HashSet<String>,
    previous: HashSet<String>,
    window_ms: i64,
    /// Local time the current generation was started
    started_at_ms: Option<i64>,
}

impl CommandDeduplicator {
    pub fn new(window_ms: i64) -> Self {
        Self {
            current: HashSet::new(),
            previous: HashSet::new(),
            window_ms,
            started_at_ms: None,
        }
    }

    /// Returns false for a key seen within the last window
    pub fn should_process(&mut self, key: &str, now_ms: i64) -> bool {
        self.rotate(now_ms);
        if self.previous.contains(key) {
            return false;
        }
        self.current.insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty()
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.previous.clear();
        self.started_at_ms = None;
    }

    fn rotate(&mut self, now_ms: i64) {
        let Some(started) = self.started_at_ms else {
            self.started_at_ms = Some(now_ms);
            return;
        };
        let age = now_ms - started;
        if age > self.window_ms * 2 {
            // Idle long enough that both generations are stale
            self.current.clear();
            self.previous.clear();
            self.started_at_ms = Some(now_ms);
        } else if age > self.window_ms {
            self.previous = std::mem::take(&mut self.current);
            self.started_at_ms = Some(now_ms);
        }
    }
}
