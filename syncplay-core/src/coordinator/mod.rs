//! Group Coordinator
//!
//! Public entry point of the engine. The [`GroupCoordinator`] handle forwards
//! user requests to the group service and feeds group events to an event
//! loop that owns the session, the clock sync loop, the command scheduler
//! and the drift corrector.

mod facade;
mod handlers;
mod types;

pub use facade::*;
pub use types::*;
