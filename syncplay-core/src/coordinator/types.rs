//! Coordinator error types

use thiserror::Error;

use crate::service::ServiceError;

/// Errors returned by [`GroupCoordinator`](super::GroupCoordinator) operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not in a group")]
    NotInGroup,

    #[error("Nothing is playing from the group queue")]
    NoCurrentItem,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Coordinator has shut down")]
    Closed,
}
