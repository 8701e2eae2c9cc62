//! Group Model
//!
//! Membership, queue and the shared playback phase of a sync group.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;
