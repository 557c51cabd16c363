//! Partition coordination - which partitions this task owns.
//!
//! Partitions are sorted by key and split into contiguous ranges, one per
//! task. Both coordinators use the same rule, so a static list and a
//! discovered list with the same partitions assign identically.

use std::sync::Arc;

use logspout_broker::{ConnectionPool, PartitionDiscovery};
use logspout_core::{Partition, Timestamp};
use logspout_progress::OffsetStore;
use tracing::{debug, info, warn};

use crate::config::{Parallelism, SpoutConfig};
use crate::manager::PartitionManager;

/// Returns the partitions owned by `task_index` out of `total_tasks`.
///
/// The sorted list is cut into `total_tasks` contiguous ranges whose sizes
/// differ by at most one; the first `n % total_tasks` tasks take the larger
/// ranges.
///
/// # Panics
///
/// Panics if `total_tasks` is zero or `task_index >= total_tasks`.
#[must_use]
pub fn assign_partitions(partitions: &[Partition], task_index: u32, total_tasks: u32) -> Vec<Partition> {
    // `TigerStyle`: Assert preconditions.
    assert!(total_tasks > 0, "total_tasks must be positive");
    assert!(
        task_index < total_tasks,
        "task_index ({task_index}) must be < total_tasks ({total_tasks})"
    );

    let mut sorted = partitions.to_vec();
    sorted.sort();
    sorted.dedup();

    if total_tasks as usize > sorted.len() {
        warn!(
            partitions = sorted.len(),
            total_tasks,
            "more tasks than partitions, some tasks will be idle"
        );
    }

    let tasks = total_tasks as usize;
    let index = task_index as usize;
    let base = sorted.len() / tasks;
    let extra = sorted.len() % tasks;
    let start = index * base + index.min(extra);
    let len = base + usize::from(index < extra);

    sorted.drain(start..start + len).collect()
}

/// Coordinator over a fixed partition list.
#[derive(Debug)]
pub struct StaticCoordinator {
    managers: Vec<PartitionManager>,
}

impl StaticCoordinator {
    /// Creates managers for this task's share of `partitions`.
    #[must_use]
    pub fn new(partitions: &[Partition], parallelism: &Parallelism, config: &Arc<SpoutConfig>) -> Self {
        let mine = assign_partitions(partitions, parallelism.task_index, parallelism.total_tasks);
        info!(
            instance = %parallelism.instance_id,
            owned = mine.len(),
            total = partitions.len(),
            "static partition assignment"
        );
        Self {
            managers: mine
                .into_iter()
                .map(|partition| PartitionManager::new(partition, Arc::clone(config)))
                .collect(),
        }
    }
}

/// Coordinator that discovers partitions and follows leader changes.
pub struct DynamicCoordinator {
    discovery: Arc<dyn PartitionDiscovery>,
    config: Arc<SpoutConfig>,
    parallelism: Parallelism,
    refresh_interval_ms: u64,
    last_refresh: Option<Timestamp>,
    /// Every partition of the topic as of the last successful discovery.
    known: Vec<Partition>,
    managers: Vec<PartitionManager>,
}

impl std::fmt::Debug for DynamicCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCoordinator")
            .field("parallelism", &self.parallelism)
            .field("refresh_interval_ms", &self.refresh_interval_ms)
            .field("last_refresh", &self.last_refresh)
            .field("known", &self.known.len())
            .field("managers", &self.managers)
            .finish_non_exhaustive()
    }
}

impl DynamicCoordinator {
    /// Creates a coordinator with no partitions; the first refresh fills it.
    #[must_use]
    pub fn new(
        discovery: Arc<dyn PartitionDiscovery>,
        parallelism: Parallelism,
        config: Arc<SpoutConfig>,
        refresh_interval_ms: u64,
    ) -> Self {
        Self {
            discovery,
            config,
            parallelism,
            refresh_interval_ms,
            last_refresh: None,
            known: Vec::new(),
            managers: Vec::new(),
        }
    }

    fn refresh_due(&self, now: Timestamp) -> bool {
        self.last_refresh.map_or(true, |last| {
            let elapsed = now.millis_since(last);
            elapsed < 0 || elapsed.unsigned_abs() >= self.refresh_interval_ms
        })
    }

    async fn refresh(&mut self, pool: &mut ConnectionPool, offsets: &OffsetStore, now: Timestamp) {
        self.last_refresh = Some(now);

        let mut discovered = match self.discovery.partitions(&self.config.topic).await {
            Ok(partitions) => partitions,
            Err(error) => {
                warn!(
                    topic = %self.config.topic,
                    error = %error,
                    "partition discovery failed, keeping current assignment"
                );
                return;
            }
        };
        discovered.sort();
        discovered.dedup();

        let unchanged = discovered.len() == self.known.len()
            && discovered
                .iter()
                .zip(&self.known)
                .all(|(a, b)| a.same_leader(b));
        if unchanged {
            debug!(topic = %self.config.topic, "partition list unchanged");
            return;
        }

        let mine = assign_partitions(
            &discovered,
            self.parallelism.task_index,
            self.parallelism.total_tasks,
        );

        let (kept, retired): (Vec<_>, Vec<_>) = std::mem::take(&mut self.managers)
            .into_iter()
            .partition(|manager| mine.iter().any(|p| p.same_leader(manager.partition())));

        for mut manager in retired {
            manager.close(pool, offsets, now).await;
        }

        let mut managers = kept;
        for partition in mine {
            if !managers.iter().any(|m| m.partition().same_leader(&partition)) {
                managers.push(PartitionManager::new(partition, Arc::clone(&self.config)));
            }
        }
        managers.sort_by(|a, b| a.partition().cmp(b.partition()));

        info!(
            instance = %self.parallelism.instance_id,
            topic = %self.config.topic,
            owned = managers.len(),
            total = discovered.len(),
            "partition assignment refreshed"
        );
        self.managers = managers;
        self.known = discovered;
    }
}

/// Decides which partitions this task consumes.
#[derive(Debug)]
pub enum PartitionCoordinator {
    /// Fixed partition list.
    Static(StaticCoordinator),
    /// Discovered partition list.
    Dynamic(DynamicCoordinator),
}

impl PartitionCoordinator {
    /// Returns the owned managers, refreshing first if a dynamic refresh is
    /// due or the clock went backwards.
    pub async fn managed_partitions(
        &mut self,
        pool: &mut ConnectionPool,
        offsets: &OffsetStore,
        now: Timestamp,
    ) -> &mut [PartitionManager] {
        if let Self::Dynamic(coordinator) = self {
            if coordinator.refresh_due(now) {
                coordinator.refresh(pool, offsets, now).await;
            }
        }
        self.managers_mut()
    }

    /// Re-evaluates ownership now. No-op for a static coordinator.
    pub async fn refresh(&mut self, pool: &mut ConnectionPool, offsets: &OffsetStore, now: Timestamp) {
        if let Self::Dynamic(coordinator) = self {
            coordinator.refresh(pool, offsets, now).await;
        }
    }

    /// The owned managers, ordered by partition.
    #[must_use]
    pub fn managers(&self) -> &[PartitionManager] {
        match self {
            Self::Static(coordinator) => &coordinator.managers,
            Self::Dynamic(coordinator) => &coordinator.managers,
        }
    }

    /// The owned managers, mutably.
    pub fn managers_mut(&mut self) -> &mut [PartitionManager] {
        match self {
            Self::Static(coordinator) => &mut coordinator.managers,
            Self::Dynamic(coordinator) => &mut coordinator.managers,
        }
    }

    /// The manager for `partition` if it is owned with the same leader.
    pub fn get_manager(&mut self, partition: &Partition) -> Option<&mut PartitionManager> {
        self.managers_mut()
            .iter_mut()
            .find(|manager| manager.partition().same_leader(partition))
    }

    /// The manager for the same topic and partition id, whatever its leader.
    pub fn find_manager(&mut self, partition: &Partition) -> Option<&mut PartitionManager> {
        self.managers_mut()
            .iter_mut()
            .find(|manager| manager.partition() == partition)
    }
}
