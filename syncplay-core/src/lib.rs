//! Jellyfin SyncPlay - Core Library
//!
//! Keeps media playback in lock-step across the clients of a watch group.
//! The server decides what the group does and when; this crate estimates
//! the server clock, runs the server's commands at the agreed instant and
//! nudges the local player back whenever it drifts.
//!
//! Transport, authentication and the player itself stay with the host
//! application, behind [`TimeOracle`], [`GroupService`] and
//! [`PlayerController`].

use std::sync::Once;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod drift;
pub mod group;
pub mod player;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use clock::{ClockEstimate, ServerTimeResponse, SyncError, SyncedClock, TimeOracle};
pub use config::SyncConfig;
pub use coordinator::{CoreError, GroupCoordinator};
pub use drift::DriftStatus;
pub use group::{GroupEvent, GroupPhase, GroupSession};
pub use player::{PlayerController, SharedPlayer};
pub use service::{GroupService, ServiceError};

static TRACING_INIT: Once = Once::new();

/// Install the crate's log subscriber (stderr, `RUST_LOG` aware).
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::from_default_env().add_directive(
            "syncplay_core=debug"
                .parse()
                .unwrap_or_else(|_| LevelFilter::DEBUG.into()),
        );

        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
