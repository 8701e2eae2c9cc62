//! Player Controller boundary
//!
//! The engine never decodes media itself. It drives whatever player the host
//! application plugs in through this trait.

use std::sync::Arc;

/// Media positions are expressed in 100ns ticks
pub const TICKS_PER_MS: i64 = 10_000;

pub fn ticks_to_ms(ticks: i64) -> i64 {
    ticks / TICKS_PER_MS
}

pub fn ms_to_ticks(ms: i64) -> i64 {
    ms.saturating_mul(TICKS_PER_MS)
}

/// Control surface of the local media player.
///
/// Calls are synchronous and expected to return quickly; implementations
/// forward them to their playback backend.
pub trait PlayerController: Send + Sync {
    fn current_position_ticks(&self) -> i64;
    fn is_playing(&self) -> bool;
    fn set_playback_speed(&self, speed: f32);
    fn seek_to(&self, position_ticks: i64);
    fn pause(&self);
    fn play(&self);
}

/// Shared player handle
pub type SharedPlayer = Arc<dyn PlayerController>;
