use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lfs_types::Oid;
use tracing::warn;

/// Per-object count of failed attempts, bounded by a maximum.
///
/// Owned by one queue and dropped with it; nothing persists across runs.
#[derive(Debug)]
pub struct RetryCounter {
    max_attempts: u32,
    counts: Mutex<HashMap<Oid, u32>>,
}

impl RetryCounter {
    /// `max_attempts` below 1 is raised to 1 so every object gets one try.
    pub fn new(max_attempts: u32) -> Self {
        let max_attempts = if max_attempts < 1 {
            warn!(max_attempts, "max attempts < 1, using 1");
            1
        } else {
            max_attempts
        };
        Self {
            max_attempts,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record one failed attempt. Returns the new count.
    pub fn increment(&self, oid: &Oid) -> u32 {
        let mut counts = self.lock();
        let count = counts.entry(*oid).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count_for(&self, oid: &Oid) -> u32 {
        self.lock().get(oid).copied().unwrap_or(0)
    }

    /// Current count and whether another attempt is allowed.
    pub fn can_retry(&self, oid: &Oid) -> (u32, bool) {
        let count = self.count_for(oid);
        (count, count < self.max_attempts)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Oid, u32>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
