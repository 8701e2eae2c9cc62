//! Clock Synchronization
//!
//! Estimates the offset between the local clock and the server clock with
//! NTP-style round-trip measurements against a server time oracle.

mod estimator;
mod source;
mod sync_loop;

pub use estimator::*;
pub use source::*;
pub use sync_loop::ClockSyncLoop;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by a single clock measurement.
///
/// None of these are fatal: the sync loop skips the sample and tries again
/// on its next scheduled attempt.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Time oracle call failed: {0}")]
    Oracle(String),

    #[error("Time oracle did not answer within {0}ms")]
    Timeout(u64),

    #[error("Unparseable server timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Round trip of {0}ms is out of range")]
    RoundTripOutOfRange(i64),
}

/// Server answer to a time request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerTimeResponse {
    /// When the server received the request (ISO 8601, UTC)
    pub request_reception_time: String,
    /// When the server sent the response (ISO 8601, UTC)
    pub response_transmission_time: String,
}

/// Source of authoritative server time.
///
/// Implementations perform one network round trip per call. They should
/// carry their own timeout; the estimator bounds each call as well.
#[async_trait]
pub trait TimeOracle: Send + Sync {
    async fn ping_server_time(&self) -> Result<ServerTimeResponse, SyncError>;
}

/// Parse an ISO 8601 UTC timestamp into milliseconds since the Unix epoch.
///
/// Accepts RFC 3339 strings with any number of fractional digits and, as a
/// fallback, timestamps without an offset which are taken as UTC.
pub fn parse_utc_ms(timestamp: &str) -> Result<i64, SyncError> {
    let trimmed = timestamp.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|_| SyncError::InvalidTimestamp(timestamp.to_string()))
}

/// Format milliseconds since the Unix epoch as an RFC 3339 UTC timestamp
pub fn format_utc_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}
