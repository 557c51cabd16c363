//! Logspout Tests - Deterministic simulation testing for logspout.
//!
//! Every test here runs the real engine against the simulated broker and
//! coordination store, driven by a seeded RNG so any failure replays
//! exactly from its seed.
//!
//! ## Test Organization
//!
//! **DST Tests** (`*_dst.rs`): seeded runs with fault injection
//! - `spout_dst`: poll/ack/fail/commit loops checked by [`PropertyChecker`]
//!
//! **Scenario Tests** (`*_tests.rs`): hand-built situations
//! - `scenario_tests`: failing partitions, redelivery order, fairness
//! - `assignment_tests`: ownership across tasks and rebalances
//!
//! **Support Modules**:
//! - `properties`: invariant checker and violation types
//! - `simulation`: multi-task simulation harness
//! - `scenarios`: seeds and fault presets
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<scenario>`
//! - Scenario tests: `test_<component>_<scenario>`
//! - Unit tests: inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod simulation;

pub use properties::{PropertyChecker, Violation};
pub use simulation::{SimConfig, Simulation};

#[cfg(test)]
mod spout_dst;

#[cfg(test)]
mod scenario_tests;
