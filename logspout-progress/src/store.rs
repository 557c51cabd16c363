//! Coordination store abstraction.
//!
//! Provides the `CoordinationStore` trait over a hierarchical key-value
//! metadata store (paths like `/consumers/instance-1/events/partition_0`),
//! and `SimulatedCoordinationStore` for deterministic simulation testing.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ProgressError, ProgressResult};

// -----------------------------------------------------------------------------
// Coordination Store Trait
// -----------------------------------------------------------------------------

/// Hierarchical metadata store shared by every consumer instance.
///
/// Used for committed offsets and, in dynamic mode, broker discovery.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Reads the data stored at `path`.
    ///
    /// Returns `None` if nothing is stored there.
    async fn get(&self, path: &str) -> ProgressResult<Option<Bytes>>;

    /// Writes `data` at `path`, creating or overwriting it.
    async fn put(&self, path: &str, data: Bytes) -> ProgressResult<()>;

    /// Lists the names of the immediate children of `path`.
    async fn children(&self, path: &str) -> ProgressResult<Vec<String>>;

    /// Releases the connection. Later calls fail with `Closed`.
    async fn close(&self) -> ProgressResult<()>;
}

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated store.
#[derive(Debug, Clone, Default)]
pub struct StoreFaultConfig {
    /// Probability of reads (get, children) failing (0.0 - 1.0).
    pub get_fail_rate: f64,
    /// Probability of writes failing (0.0 - 1.0).
    pub put_fail_rate: f64,
    /// Force next read to fail (one-shot).
    pub force_get_fail: bool,
    /// Force next write to fail (one-shot).
    pub force_put_fail: bool,
}

impl StoreFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            get_fail_rate: 0.0,
            put_fail_rate: 0.0,
            force_get_fail: false,
            force_put_fail: false,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            get_fail_rate: 0.05,
            put_fail_rate: 0.05,
            force_get_fail: false,
            force_put_fail: false,
        }
    }

    /// Builder: set get fail rate.
    #[must_use]
    pub const fn with_get_fail_rate(mut self, rate: f64) -> Self {
        self.get_fail_rate = rate;
        self
    }

    /// Builder: set put fail rate.
    #[must_use]
    pub const fn with_put_fail_rate(mut self, rate: f64) -> Self {
        self.put_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// Simulated Coordination Store
// -----------------------------------------------------------------------------

/// In-memory simulated coordination store for DST.
///
/// Clones share state via `Arc` for multi-handle testing, which is how several
/// consumer instances observe each other's committed offsets.
#[derive(Debug, Clone)]
pub struct SimulatedCoordinationStore {
    /// Stored nodes by full path.
    nodes: Arc<Mutex<BTreeMap<String, Bytes>>>,
    /// Fault configuration.
    fault_config: Arc<Mutex<StoreFaultConfig>>,
    /// Set once `close` has been called.
    closed: Arc<AtomicBool>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedCoordinationStore {
    /// Creates a new simulated store with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, StoreFaultConfig::none())
    }

    /// Creates a simulated store with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: StoreFaultConfig) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(BTreeMap::new())),
            fault_config: Arc::new(Mutex::new(config)),
            closed: Arc::new(AtomicBool::new(false)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Opens another client session on the same nodes.
    ///
    /// The session shares data, faults and the fault counter, but closing it
    /// leaves other sessions open.
    #[must_use]
    pub fn session(&self) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            ..self.clone()
        }
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, StoreFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Reads a node directly (bypasses faults, for assertions in tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn snapshot(&self, path: &str) -> Option<Bytes> {
        let nodes = self.nodes.lock().expect("nodes lock poisoned");
        nodes.get(path).cloned()
    }

    /// Writes a node directly (bypasses faults, for seeding tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn seed_node(&self, path: &str, data: impl Into<Bytes>) {
        let mut nodes = self.nodes.lock().expect("nodes lock poisoned");
        nodes.insert(path.to_string(), data.into());
    }

    /// Returns node count (bypasses faults, for assertions in tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let nodes = self.nodes.lock().expect("nodes lock poisoned");
        nodes.len()
    }

    /// Returns true once the store has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deterministic RNG: `(seed + counter) * M` for reproducible faults.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn check_read(&self, operation: &'static str) -> ProgressResult<()> {
        if self.is_closed() {
            return Err(ProgressError::Closed);
        }
        {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_get_fail {
                config.force_get_fail = false;
                return Err(ProgressError::Io {
                    operation,
                    message: "simulated failure (forced)".into(),
                });
            }
        }
        let rate = self.fault_config.lock().expect("lock").get_fail_rate;
        if self.should_inject_fault(rate) {
            return Err(ProgressError::Io {
                operation,
                message: "simulated failure (random)".into(),
            });
        }
        Ok(())
    }

    fn check_write(&self, operation: &'static str) -> ProgressResult<()> {
        if self.is_closed() {
            return Err(ProgressError::Closed);
        }
        {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_put_fail {
                config.force_put_fail = false;
                return Err(ProgressError::Io {
                    operation,
                    message: "simulated failure (forced)".into(),
                });
            }
        }
        let rate = self.fault_config.lock().expect("lock").put_fail_rate;
        if self.should_inject_fault(rate) {
            return Err(ProgressError::Io {
                operation,
                message: "simulated failure (random)".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for SimulatedCoordinationStore {
    async fn get(&self, path: &str) -> ProgressResult<Option<Bytes>> {
        self.check_read("get")?;
        let nodes = self.nodes.lock().expect("nodes lock poisoned");
        Ok(nodes.get(path).cloned())
    }

    async fn put(&self, path: &str, data: Bytes) -> ProgressResult<()> {
        // `TigerStyle`: Assert precondition.
        assert!(path.starts_with('/'), "store paths must be absolute: {path}");

        self.check_write("put")?;
        let mut nodes = self.nodes.lock().expect("nodes lock poisoned");
        nodes.insert(path.to_string(), data);
        Ok(())
    }

    async fn children(&self, path: &str) -> ProgressResult<Vec<String>> {
        self.check_read("children")?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let nodes = self.nodes.lock().expect("nodes lock poisoned");
        let names: BTreeSet<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn close(&self) -> ProgressResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
