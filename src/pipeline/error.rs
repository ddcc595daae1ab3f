//! Error types and reporting for pipeline stations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Errors that can occur during station processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// One item failed; the station drops it and keeps going.
    Recoverable(String),
    /// The downstream channel stayed full past the enqueue timeout; the output was dropped.
    Saturated(String),
    /// The station cannot continue. Ends the run.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Saturated(msg) => write!(f, "Channel saturated: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Reporter that logs through `tracing`.
///
/// Saturation is logged at `warn` the first time per station and at `debug`
/// afterwards, so a stalled consumer does not flood the log.
#[derive(Debug, Default)]
pub struct LogReporter {
    drops: Mutex<HashMap<String, u64>>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saturation drops reported for `station`.
    pub fn drop_count(&self, station: &str) -> u64 {
        self.drops
            .lock()
            .map(|drops| drops.get(station).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_drop(&self, station: &str) -> u64 {
        match self.drops.lock() {
            Ok(mut drops) => {
                let count = drops.entry(station.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 0,
        }
    }
}

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => warn!(station, "{msg}"),
            StationError::Saturated(msg) => {
                let dropped = self.record_drop(station);
                if dropped == 1 {
                    warn!(station, "{msg} (further drops logged at debug level)");
                } else {
                    debug!(station, dropped, "{msg}");
                }
            }
            StationError::Fatal(msg) => error!(station, "{msg}"),
        }
    }
}
