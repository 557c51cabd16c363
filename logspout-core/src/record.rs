//! Offsets, timestamps and fetched records.
//!
//! A partition is an append-only log; every record in it has an [`Offset`].
//! Brokers return batches of [`FetchedRecord`]s ordered by offset.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Offset in a partition log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw offset value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next offset.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous offset, or `None` at the start of the log.
    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Returns the number of offsets between `earlier` and `self`.
    ///
    /// Saturates at zero when `earlier` is ahead of `self`.
    #[must_use]
    pub const fn distance_from(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall-clock timestamp in milliseconds since the Unix epoch.
///
/// Signed so that differences between two readings can be negative when the
/// system clock is adjusted backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the current system time as a timestamp.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Timestamps won't overflow i64 for centuries.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Milliseconds elapsed since `earlier`. Negative if the clock went back.
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns this timestamp moved forward by `millis`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn plus_millis(self, millis: u64) -> Self {
        let millis = if millis > i64::MAX as u64 {
            i64::MAX
        } else {
            millis as i64
        };
        Self(self.0.saturating_add(millis))
    }
}

/// A record returned by a broker fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    /// Offset of the record in its partition.
    pub offset: Offset,
    /// Producer or broker timestamp, if the broker reports one.
    pub timestamp: Option<Timestamp>,
    /// Optional record key.
    pub key: Option<Bytes>,
    /// Raw record payload.
    pub value: Bytes,
}

impl FetchedRecord {
    /// Creates a record with just a value.
    #[must_use]
    pub fn new(offset: Offset, value: impl Into<Bytes>) -> Self {
        Self {
            offset,
            timestamp: None,
            key: None,
            value: value.into(),
        }
    }

    /// Sets the record key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the record timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Approximate encoded size, used to honour fetch byte limits.
    #[must_use]
    pub fn size(&self) -> usize {
        let key_size = self.key.as_ref().map_or(0, Bytes::len);
        8 + 8 + 4 + key_size + 4 + self.value.len()
    }
}
