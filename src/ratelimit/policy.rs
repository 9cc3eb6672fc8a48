//! Rate limit policy definition.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SluiceError};

/// Time unit for configured rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Immutable limit configuration: at most `limit` attempts per trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    limit: u64,
    window: Duration,
    span: TimeDelta,
}

impl Policy {
    /// Create a validated policy.
    ///
    /// Fails with [`SluiceError::InvalidPolicy`] if `limit` is zero, `window`
    /// is zero, or `window` cannot be represented as a timestamp offset.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(SluiceError::InvalidPolicy(
                "limit must be at least 1".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(SluiceError::InvalidPolicy(
                "window duration must be positive".to_string(),
            ));
        }
        let span = TimeDelta::from_std(window).map_err(|e| {
            SluiceError::InvalidPolicy(format!("window duration {:?} out of range: {}", window, e))
        })?;

        Ok(Self {
            limit,
            window,
            span,
        })
    }

    /// Create a policy of `limit` attempts per `unit`.
    pub fn per(limit: u64, unit: TimeUnit) -> Result<Self> {
        Self::new(limit, unit.duration())
    }

    /// Maximum attempts allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The window as a signed offset for timestamp arithmetic.
    pub fn span(&self) -> TimeDelta {
        self.span
    }
}
