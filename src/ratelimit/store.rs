//! Per-identity attempt storage.
//!
//! A [`WindowStore`] keeps, for every client identity, the timestamps of its
//! attempts inside the trailing window. The in-memory implementation shards
//! its map with `DashMap`, so operations on different identities only contend
//! when they hash to the same shard and never on a global lock.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

use super::identity::ClientIdentity;

/// Errors raised by a window store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Window store unavailable: {0}")]
    Unavailable(String),
    /// Stored state could not be read back.
    #[error("Window store corrupted: {0}")]
    Corrupted(String),
}

/// Keyed storage of recent attempts.
///
/// Every operation takes the evaluation time and window explicitly; the store
/// holds no policy or clock of its own. An attempt recorded at `t` is expired
/// once `now - t >= window` and is never counted afterwards.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Register one attempt at `at`, expire stale attempts, and return the
    /// number of live attempts including the new one.
    ///
    /// Must be atomic per identity: concurrent calls never lose an attempt.
    async fn record_attempt(
        &self,
        identity: &ClientIdentity,
        at: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<u64, StorageError>;

    /// Remove one attempt previously recorded at exactly `at`.
    ///
    /// Returns `false` when no such attempt is stored (it may already have
    /// expired or been purged).
    async fn retract_attempt(
        &self,
        identity: &ClientIdentity,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// `max(0, limit - live attempts)`, without recording anything.
    async fn count_remaining(
        &self,
        identity: &ClientIdentity,
        limit: u64,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<u64, StorageError>;

    /// Timestamp of the oldest live attempt, if any.
    async fn oldest_attempt_time(
        &self,
        identity: &ClientIdentity,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Expire stale attempts across all identities and drop empty records.
    ///
    /// Returns the number of identities removed.
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<usize, StorageError>;

    /// Number of identities currently holding a record.
    async fn tracked_identities(&self) -> Result<usize, StorageError>;
}

/// Attempt timestamps for one identity, oldest first.
#[derive(Debug, Default)]
struct AttemptRecord {
    attempts: VecDeque<DateTime<Utc>>,
}

impl AttemptRecord {
    fn expire(&mut self, now: DateTime<Utc>, window: TimeDelta) {
        while let Some(&oldest) = self.attempts.front() {
            if now - oldest >= window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, at: DateTime<Utc>) -> u64 {
        // Keep the deque sorted even if the clock stepped backwards.
        let idx = self.attempts.partition_point(|t| *t <= at);
        self.attempts.insert(idx, at);
        self.attempts.len() as u64
    }

    fn retract(&mut self, at: DateTime<Utc>) -> bool {
        match self.attempts.iter().rposition(|t| *t == at) {
            Some(pos) => {
                self.attempts.remove(pos);
                true
            }
            None => false,
        }
    }

    fn count(&self) -> u64 {
        self.attempts.len() as u64
    }

    fn oldest(&self) -> Option<DateTime<Utc>> {
        self.attempts.front().copied()
    }

    fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// In-process window store.
///
/// State lives for the lifetime of the process and is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    records: DashMap<ClientIdentity, AttemptRecord>,
}

impl MemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire the identity's record, read it, and drop it if nothing is left.
    fn with_live_record<T>(
        &self,
        identity: &ClientIdentity,
        now: DateTime<Utc>,
        window: TimeDelta,
        read: impl FnOnce(&AttemptRecord) -> T,
    ) -> Option<T> {
        let (value, empty) = {
            let mut record = self.records.get_mut(identity)?;
            record.expire(now, window);
            (read(&*record), record.is_empty())
        };

        if empty {
            self.drop_if_empty(identity);
        }
        Some(value)
    }

    fn drop_if_empty(&self, identity: &ClientIdentity) {
        if self
            .records
            .remove_if(identity, |_, record| record.is_empty())
            .is_some()
        {
            trace!(identity = %identity, "Dropped empty attempt record");
        }
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn record_attempt(
        &self,
        identity: &ClientIdentity,
        at: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<u64, StorageError> {
        let mut record = self.records.entry(identity.clone()).or_default();
        record.expire(at, window);
        let count = record.record(at);

        trace!(identity = %identity, count = count, "Recorded attempt");
        Ok(count)
    }

    async fn retract_attempt(
        &self,
        identity: &ClientIdentity,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let (removed, empty) = match self.records.get_mut(identity) {
            Some(mut record) => {
                let removed = record.retract(at);
                (removed, record.is_empty())
            }
            None => return Ok(false),
        };

        if empty {
            self.drop_if_empty(identity);
        }
        Ok(removed)
    }

    async fn count_remaining(
        &self,
        identity: &ClientIdentity,
        limit: u64,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<u64, StorageError> {
        let count = self
            .with_live_record(identity, now, window, AttemptRecord::count)
            .unwrap_or(0);
        Ok(limit.saturating_sub(count))
    }

    async fn oldest_attempt_time(
        &self,
        identity: &ClientIdentity,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .with_live_record(identity, now, window, AttemptRecord::oldest)
            .flatten())
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<usize, StorageError> {
        let mut removed = 0;
        self.records.retain(|_, record| {
            record.expire(now, window);
            if record.is_empty() {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn tracked_identities(&self) -> Result<usize, StorageError> {
        Ok(self.records.len())
    }
}
