//! Sliding-window rate decisions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::identity::ClientIdentity;
use super::policy::Policy;
use super::store::{MemoryWindowStore, StorageError, WindowStore};

/// Outcome of evaluating one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the attempt may proceed
    pub allowed: bool,
    /// The policy limit the attempt was checked against
    pub limit: u64,
    /// Attempts left in the current window
    pub remaining: u64,
    /// When the oldest counted attempt leaves the window
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// Time left until `reset_at`, zero if it has already passed.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Evaluates attempts against a [`Policy`] using a [`WindowStore`].
///
/// One decider owns one store. Share it between request tasks with an `Arc`;
/// all methods take `&self`.
///
/// Counting is strict: every attempt is recorded atomically before it is
/// compared with the limit, so `N` concurrent attempts for one identity yield
/// exactly `min(N, limit)` allowed. Denied attempts are retracted once the
/// decision is made and never count against later windows.
pub struct RateDecider<S: WindowStore = MemoryWindowStore> {
    policy: Policy,
    store: S,
    clock: Arc<dyn Clock>,
}

impl RateDecider<MemoryWindowStore> {
    /// Create a decider with an in-memory store and the system clock.
    pub fn new(policy: Policy) -> Self {
        Self::with_store(policy, MemoryWindowStore::new(), Arc::new(SystemClock))
    }
}

impl<S: WindowStore> RateDecider<S> {
    /// Create a decider over an explicit store and time source.
    pub fn with_store(policy: Policy, store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    /// Record an attempt for `identity` and decide whether it may proceed.
    ///
    /// Storage failures are returned as-is; no decision is made on the
    /// caller's behalf.
    pub async fn evaluate(&self, identity: &ClientIdentity) -> Result<Decision, StorageError> {
        let now = self.clock.now();
        let span = self.policy.span();
        let limit = self.policy.limit();

        let count = self.store.record_attempt(identity, now, span).await?;
        let allowed = count <= limit;
        let remaining = limit.saturating_sub(count);

        // A denied attempt is retracted before any other store call.
        if !allowed {
            self.store.retract_attempt(identity, now).await?;
        }

        let oldest = self.store.oldest_attempt_time(identity, now, span).await?;
        let reset_at = reset_time(oldest, now, span);

        if allowed {
            trace!(
                identity = %identity,
                count = count,
                limit = limit,
                "Attempt allowed"
            );
        } else {
            debug!(
                identity = %identity,
                count = count,
                limit = limit,
                reset_at = %reset_at,
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            allowed,
            limit,
            remaining,
            reset_at,
        })
    }

    /// Attempts `identity` may still make in the current window.
    pub async fn remaining(&self, identity: &ClientIdentity) -> Result<u64, StorageError> {
        self.store
            .count_remaining(identity, self.policy.limit(), self.clock.now(), self.policy.span())
            .await
    }

    /// When the window for `identity` resets.
    ///
    /// For an identity with no live attempts this is one full window from now.
    pub async fn reset_at(&self, identity: &ClientIdentity) -> Result<DateTime<Utc>, StorageError> {
        let now = self.clock.now();
        let span = self.policy.span();
        let oldest = self.store.oldest_attempt_time(identity, now, span).await?;
        Ok(reset_time(oldest, now, span))
    }

    /// Drop expired attempts and idle identities from the store.
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        self.store
            .purge_expired(self.clock.now(), self.policy.span())
            .await
    }

    /// Number of identities the store is currently tracking.
    pub async fn tracked_identities(&self) -> Result<usize, StorageError> {
        self.store.tracked_identities().await
    }

    /// The policy this decider enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The current time according to this decider's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn reset_time(oldest: Option<DateTime<Utc>>, now: DateTime<Utc>, span: TimeDelta) -> DateTime<Utc> {
    oldest
        .unwrap_or(now)
        .checked_add_signed(span)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
