//! Test doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::identity::ClientIdentity;
use super::store::{MemoryWindowStore, StorageError, WindowStore};

/// A store whose backend is always down.
pub(crate) struct UnreachableStore;

fn refused() -> StorageError {
    StorageError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl WindowStore for UnreachableStore {
    async fn record_attempt(
        &self,
        _identity: &ClientIdentity,
        _at: DateTime<Utc>,
        _window: TimeDelta,
    ) -> Result<u64, StorageError> {
        Err(refused())
    }

    async fn retract_attempt(
        &self,
        _identity: &ClientIdentity,
        _at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        Err(refused())
    }

    async fn count_remaining(
        &self,
        _identity: &ClientIdentity,
        _limit: u64,
        _now: DateTime<Utc>,
        _window: TimeDelta,
    ) -> Result<u64, StorageError> {
        Err(refused())
    }

    async fn oldest_attempt_time(
        &self,
        _identity: &ClientIdentity,
        _now: DateTime<Utc>,
        _window: TimeDelta,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Err(refused())
    }

    async fn purge_expired(
        &self,
        _now: DateTime<Utc>,
        _window: TimeDelta,
    ) -> Result<usize, StorageError> {
        Err(refused())
    }

    async fn tracked_identities(&self) -> Result<usize, StorageError> {
        Err(refused())
    }
}

/// An in-memory store whose oldest-attempt lookup can be made to fail.
pub(crate) struct FlakyOldestStore {
    inner: MemoryWindowStore,
    fail_oldest: AtomicBool,
}

impl FlakyOldestStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryWindowStore::new(),
            fail_oldest: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_oldest(&self, fail: bool) {
        self.fail_oldest.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WindowStore for FlakyOldestStore {
    async fn record_attempt(
        &self,
        identity: &ClientIdentity,
        at: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<u64, StorageError> {
        self.inner.record_attempt(identity, at, window).await
    }

    async fn retract_attempt(
        &self,
        identity: &ClientIdentity,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.inner.retract_attempt(identity, at).await
    }

    async fn count_remaining(
        &self,
        identity: &ClientIdentity,
        limit: u64,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<u64, StorageError> {
        self.inner.count_remaining(identity, limit, now, window).await
    }

    async fn oldest_attempt_time(
        &self,
        identity: &ClientIdentity,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        if self.fail_oldest.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("lookup timed out".to_string()));
        }
        self.inner.oldest_attempt_time(identity, now, window).await
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<usize, StorageError> {
        self.inner.purge_expired(now, window).await
    }

    async fn tracked_identities(&self) -> Result<usize, StorageError> {
        self.inner.tracked_identities().await
    }
}
