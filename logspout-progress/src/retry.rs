//! Retry bookkeeping for failed offsets.
//!
//! A failed offset waits out an exponential backoff before it may be
//! re-fetched. Attempts are remembered until the offset is finally acked so
//! the backoff keeps growing across repeated failures.

use std::collections::BTreeMap;

use logspout_core::{Offset, Timestamp};
use serde::{Deserialize, Serialize};

/// Default upper bound on a single retry delay (one minute).
pub const RETRY_DELAY_MS_MAX_DEFAULT: u64 = 60_000;

/// Backoff and limit for re-delivering failed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Factor applied to the delay for each further attempt.
    pub delay_multiplier: f64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
    /// Maximum number of failures before a record is abandoned.
    /// `None` retries forever.
    pub retry_limit: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            delay_multiplier: 1.0,
            max_delay_ms: RETRY_DELAY_MS_MAX_DEFAULT,
            retry_limit: None,
        }
    }
}

impl RetryPolicy {
    /// Retries immediately and forever.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Builder: set the backoff curve.
    #[must_use]
    pub fn with_backoff(mut self, initial_delay_ms: u64, multiplier: f64, max_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self.delay_multiplier = multiplier;
        self.max_delay_ms = max_ms;
        self
    }

    /// Builder: set the retry limit.
    #[must_use]
    pub const fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for(&self, attempt: u32) -> u64 {
        if self.initial_delay_ms == 0 {
            return 0;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.delay_multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay.max(0.0) as u64
        }
    }
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The offset will be re-fetched once `retry_at` has passed.
    Scheduled {
        /// Failure count for this offset, including this one.
        attempt: u32,
        /// Earliest time the offset may be re-fetched.
        retry_at: Timestamp,
    },
    /// The retry limit was reached; the offset is given up on.
    Exhausted {
        /// Failure count for this offset.
        attempts: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryEntry {
    attempts: u32,
    /// `None` while a retry is in flight downstream.
    retry_at: Option<Timestamp>,
}

/// Failed offsets and their retry schedule.
#[derive(Debug, Clone, Default)]
pub struct RetryTracker {
    policy: RetryPolicy,
    entries: BTreeMap<Offset, RetryEntry>,
}

impl RetryTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Records a failure of `offset` at `now`.
    pub fn failed(&mut self, offset: Offset, now: Timestamp) -> RetryDecision {
        let attempts = self
            .entries
            .get(&offset)
            .map_or(1, |entry| entry.attempts.saturating_add(1));

        if self.policy.retry_limit.is_some_and(|limit| attempts > limit) {
            self.entries.remove(&offset);
            return RetryDecision::Exhausted { attempts };
        }

        let retry_at = now.plus_millis(self.policy.delay_for(attempts));
        self.entries.insert(
            offset,
            RetryEntry {
                attempts,
                retry_at: Some(retry_at),
            },
        );
        RetryDecision::Scheduled {
            attempt: attempts,
            retry_at,
        }
    }

    /// Marks a waiting offset as re-emitted.
    pub fn retry_started(&mut self, offset: Offset) {
        if let Some(entry) = self.entries.get_mut(&offset) {
            entry.retry_at = None;
        }
    }

    /// Forgets an offset once it has been acked.
    pub fn acked(&mut self, offset: Offset) {
        self.entries.remove(&offset);
    }

    /// Returns true if `offset` is waiting and its backoff has elapsed.
    #[must_use]
    pub fn is_ready(&self, offset: Offset, now: Timestamp) -> bool {
        self.entries
            .get(&offset)
            .and_then(|entry| entry.retry_at)
            .is_some_and(|at| at <= now)
    }

    /// Lowest waiting offset whose backoff has elapsed.
    #[must_use]
    pub fn next_ready(&self, now: Timestamp) -> Option<Offset> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.retry_at.is_some_and(|at| at <= now))
            .map(|(&offset, _)| offset)
    }

    /// Lowest offset waiting for a retry, ready or not.
    #[must_use]
    pub fn min_waiting(&self) -> Option<Offset> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.retry_at.is_some())
            .map(|(&offset, _)| offset)
    }

    /// Number of offsets waiting for a retry.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.retry_at.is_some())
            .count()
    }

    /// Failure count recorded for `offset`, zero if none.
    #[must_use]
    pub fn attempts(&self, offset: Offset) -> u32 {
        self.entries.get(&offset).map_or(0, |entry| entry.attempts)
    }

    /// Drops every entry below `offset`, returning the waiting ones dropped.
    pub fn clear_before(&mut self, offset: Offset) -> Vec<Offset> {
        let kept = self.entries.split_off(&offset);
        let dropped = std::mem::replace(&mut self.entries, kept);
        dropped
            .into_iter()
            .filter(|(_, entry)| entry.retry_at.is_some())
            .map(|(offset, _)| offset)
            .collect()
    }
}
