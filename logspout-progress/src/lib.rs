//! Consumer progress tracking for logspout.
//!
//! This crate owns the per-partition bookkeeping that decides how far a
//! consumer may safely commit, and the client that persists committed offsets
//! to an external coordination store.
//!
//! # Overview
//!
//! - [`PendingSet`]: offsets emitted downstream but not yet acked or failed.
//!   Backed by a `RoaringTreemap` of absolute offsets, so the lowest pending
//!   offset (the commit frontier) is found without scanning.
//! - [`RetryTracker`]: failed offsets waiting to be re-fetched, with
//!   exponential backoff and an optional retry limit.
//! - [`OffsetStore`]: reads and writes [`CommittedOffsetRecord`]s, one per
//!   partition per owner instance, through a [`CoordinationStore`].
//!
//! # Testing
//!
//! [`SimulatedCoordinationStore`] is an in-memory store with deterministic
//! fault injection:
//!
//! ```ignore
//! use logspout_progress::{SimulatedCoordinationStore, StoreFaultConfig};
//!
//! let store = SimulatedCoordinationStore::with_faults(seed, StoreFaultConfig::flaky());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod offsets;
mod pending;
mod retry;
mod store;

pub use error::{ProgressError, ProgressResult};
pub use offsets::{CommittedOffsetRecord, OffsetStore};
pub use pending::PendingSet;
pub use retry::{RetryDecision, RetryPolicy, RetryTracker};
pub use store::{CoordinationStore, SimulatedCoordinationStore, StoreFaultConfig};
