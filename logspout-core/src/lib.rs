//! Logspout Core - Strongly-typed identifiers and shared types for logspout.
//!
//! This crate provides the vocabulary shared by every logspout crate:
//! partitions and their keys, offsets, message ids handed to the downstream
//! pipeline, fetched records, and the clock abstraction used by the poll loop.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up `BrokerId` with `PartitionId`
//! - **Explicit types**: Use u32/u64, not usize
//! - **Explicit time**: Time is read through [`Clock`] so tests control it
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod clock;
mod error;
mod partition;
mod record;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use partition::{BrokerHost, MessageId, Partition, PartitionKey};
pub use record::{FetchedRecord, Offset, Timestamp};
pub use types::{BrokerId, PartitionId};
