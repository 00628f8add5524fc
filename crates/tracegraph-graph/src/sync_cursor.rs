use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// "Beginning of time": every trace start time is after it.
pub const BEGINNING_OF_TIME: i64 = i64::MIN;

/// Last processed trace start time, shared across sync runs.
///
/// The cursor only moves forward; it is advanced by the sync pipeline after a
/// merge has succeeded.
#[derive(Debug)]
pub struct SyncCursor {
    last_sync_timestamp: AtomicI64,
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncCursor {
    pub fn new() -> Self {
        Self::starting_at(BEGINNING_OF_TIME)
    }

    pub fn starting_at(timestamp: i64) -> Self {
        Self {
            last_sync_timestamp: AtomicI64::new(timestamp),
        }
    }

    pub fn get(&self) -> i64 {
        self.last_sync_timestamp.load(Ordering::Acquire)
    }

    pub fn is_initial(&self) -> bool {
        self.get() == BEGINNING_OF_TIME
    }

    /// Move forward to `timestamp`; returns the resulting cursor value.
    pub fn advance(&self, timestamp: i64) -> i64 {
        let previous = self
            .last_sync_timestamp
            .fetch_max(timestamp, Ordering::AcqRel);
        previous.max(timestamp)
    }

    /// Wall-clock rendering, assuming microseconds since the epoch (Jaeger).
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        if self.is_initial() {
            return None;
        }
        DateTime::from_timestamp_micros(self.get())
    }
}
