//! Freshness-checked cache of the most recent response per command code
//!
//! The head answers queries asynchronously and also volunteers unsolicited
//! frames, so the session keeps the last decoded response per code together
//! with its arrival time. Readers ask for presence and age; entries are
//! overwritten on every decoded frame and never evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One cached response with its arrival timestamp
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub fields: HashMap<String, String>,
    pub received_at: Instant,
}

/// Last-write-wins store of decoded responses keyed by command code
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<i32, CachedResponse>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the fields of a decoded response, overwriting any prior entry
    /// for the same code.
    pub fn put(&mut self, code: i32, fields: HashMap<String, String>, now: Instant) {
        self.entries.insert(
            code,
            CachedResponse {
                fields,
                received_at: now,
            },
        );
    }

    /// Most recent response for a code, if one was ever seen
    pub fn get(&self, code: i32) -> Option<&CachedResponse> {
        self.entries.get(&code)
    }

    /// Whether any response for this code has been seen
    pub fn contains(&self, code: i32) -> bool {
        self.entries.contains_key(&code)
    }

    /// Age of the cached entry for a code, or `None` if never seen.
    ///
    /// `now` must come from the same monotonic clock as the `put` timestamps.
    pub fn age_of(&self, code: i32, now: Instant) -> Option<Duration> {
        self.entries
            .get(&code)
            .map(|entry| now.saturating_duration_since(entry.received_at))
    }
}
