//! Spout configuration.
//!
//! Loaded from TOML or built in code. Every field has a default except the
//! topic, the consumer id and (in static mode) the partition list, which
//! [`SpoutConfig::validate`] requires.
//!
//! ```toml
//! topic = "events"
//! consumer_id = "events-indexer"
//! commit_interval_ms = 2000
//!
//! [hosts]
//! mode = "dynamic"
//! broker_path = "/brokers"
//! refresh_interval_ms = 60000
//!
//! [retry]
//! initial_delay_ms = 100
//! delay_multiplier = 2.0
//! retry_limit = 5
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use logspout_broker::StartOffset;
use logspout_core::{BrokerHost, Error, Partition, PartitionId, Result};
use logspout_progress::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{SpoutError, SpoutResult};

/// Default interval between offset commits (2 seconds).
pub const COMMIT_INTERVAL_MS_DEFAULT: u64 = 2_000;

/// Default interval between partition discovery refreshes (60 seconds).
pub const REFRESH_INTERVAL_MS_DEFAULT: u64 = 60_000;

/// Default upper bound on bytes per fetch (1 MiB).
pub const FETCH_MAX_BYTES_DEFAULT: u32 = 1024 * 1024;

/// Default bound on a single broker call (10 seconds).
pub const FETCH_TIMEOUT_MS_DEFAULT: u64 = 10_000;

/// Default stream emitted tuples are tagged with.
pub const OUTPUT_STREAM_DEFAULT: &str = "default";

fn refresh_interval_default() -> u64 {
    REFRESH_INTERVAL_MS_DEFAULT
}

/// A partition listed in a static configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPartition {
    /// Partition id within the topic.
    pub id: PartitionId,
    /// Broker leading the partition.
    pub leader: BrokerHost,
}

impl StaticPartition {
    /// Creates a static partition entry.
    #[must_use]
    pub fn new(id: u64, leader: BrokerHost) -> Self {
        Self {
            id: PartitionId::new(id),
            leader,
        }
    }
}

/// Where the partition list comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BrokerHosts {
    /// A fixed list of partitions and leaders.
    Static {
        /// Every partition of the topic.
        partitions: Vec<StaticPartition>,
    },
    /// Partitions discovered from the coordination store.
    Dynamic {
        /// Root of the broker registry in the store.
        broker_path: String,
        /// How often to re-read the registry.
        #[serde(default = "refresh_interval_default")]
        refresh_interval_ms: u64,
    },
}

impl Default for BrokerHosts {
    fn default() -> Self {
        Self::Static {
            partitions: Vec::new(),
        }
    }
}

/// Configuration for one consumer deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoutConfig {
    /// Topic to consume.
    pub topic: String,
    /// Deployment identity; committed offsets are stored under it.
    pub consumer_id: String,
    /// Root path for committed offsets in the coordination store.
    pub store_root: String,
    /// Partition source.
    pub hosts: BrokerHosts,
    /// Interval between offset commits.
    pub commit_interval_ms: u64,
    /// Where to start when there is no usable committed offset.
    pub start_offset: StartOffset,
    /// Ignore committed offsets and always use `start_offset`.
    pub ignore_committed_offsets: bool,
    /// Jump to the earliest retained offset when the cursor falls out of range.
    pub reset_on_out_of_range: bool,
    /// Maximum lag behind the latest offset before committed progress is
    /// discarded in favour of `start_offset`. `None` never discards it.
    pub max_offset_behind: Option<u64>,
    /// Upper bound on bytes returned by one fetch.
    pub fetch_max_bytes: u32,
    /// Bound on a single broker call.
    pub fetch_timeout_ms: u64,
    /// Retry policy for failed records.
    pub retry: RetryPolicy,
    /// Stream id emitted tuples are tagged with.
    pub output_stream_id: String,
}

impl Default for SpoutConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            consumer_id: String::new(),
            store_root: "/logspout".to_string(),
            hosts: BrokerHosts::default(),
            commit_interval_ms: COMMIT_INTERVAL_MS_DEFAULT,
            start_offset: StartOffset::Earliest,
            ignore_committed_offsets: false,
            reset_on_out_of_range: true,
            max_offset_behind: None,
            fetch_max_bytes: FETCH_MAX_BYTES_DEFAULT,
            fetch_timeout_ms: FETCH_TIMEOUT_MS_DEFAULT,
            retry: RetryPolicy::default(),
            output_stream_id: OUTPUT_STREAM_DEFAULT.to_string(),
        }
    }
}

impl SpoutConfig {
    /// Creates a configuration for `topic` with default settings.
    #[must_use]
    pub fn new(topic: impl Into<String>, consumer_id: impl Into<String>, hosts: BrokerHosts) -> Self {
        Self {
            topic: topic.into(),
            consumer_id: consumer_id.into(),
            hosts,
            ..Self::default()
        }
    }

    /// Creates a configuration suitable for tests: static partitions and a
    /// short commit interval.
    #[must_use]
    pub fn for_testing(topic: &str, partitions: Vec<StaticPartition>) -> Self {
        Self {
            commit_interval_ms: 1_000,
            fetch_max_bytes: 64 * 1024,
            fetch_timeout_ms: 1_000,
            ..Self::new(topic, "test-consumer", BrokerHosts::Static { partitions })
        }
    }

    /// Sets the commit interval.
    #[must_use]
    pub fn with_commit_interval_ms(mut self, interval_ms: u64) -> Self {
        self.commit_interval_ms = interval_ms;
        self
    }

    /// Sets the start offset policy.
    #[must_use]
    pub fn with_start_offset(mut self, start: StartOffset) -> Self {
        self.start_offset = start;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the fetch byte limit.
    #[must_use]
    pub fn with_fetch_max_bytes(mut self, max_bytes: u32) -> Self {
        self.fetch_max_bytes = max_bytes;
        self
    }

    /// Sets the maximum tolerated lag behind the latest offset.
    #[must_use]
    pub fn with_max_offset_behind(mut self, max_behind: u64) -> Self {
        self.max_offset_behind = Some(max_behind);
        self
    }

    /// Partitions of a static configuration, tagged with the topic.
    ///
    /// Empty for a dynamic configuration.
    #[must_use]
    pub fn static_partitions(&self) -> Vec<Partition> {
        match &self.hosts {
            BrokerHosts::Static { partitions } => partitions
                .iter()
                .map(|p| Partition::new(self.topic.clone(), p.id, p.leader.clone()))
                .collect(),
            BrokerHosts::Dynamic { .. } => Vec::new(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::Missing { name: "topic" });
        }
        if self.consumer_id.is_empty() {
            return Err(Error::Missing { name: "consumer_id" });
        }
        if self.consumer_id.contains('/') {
            return Err(Error::InvalidArgument {
                name: "consumer_id",
                reason: "must not contain '/'",
            });
        }
        if !self.store_root.starts_with('/') {
            return Err(Error::InvalidArgument {
                name: "store_root",
                reason: "must be an absolute path",
            });
        }
        if self.commit_interval_ms == 0 {
            return Err(Error::InvalidArgument {
                name: "commit_interval_ms",
                reason: "must be positive",
            });
        }
        if self.fetch_max_bytes == 0 {
            return Err(Error::InvalidArgument {
                name: "fetch_max_bytes",
                reason: "must be positive",
            });
        }
        if self.fetch_timeout_ms == 0 {
            return Err(Error::InvalidArgument {
                name: "fetch_timeout_ms",
                reason: "must be positive",
            });
        }
        if !self.retry.delay_multiplier.is_finite() || self.retry.delay_multiplier < 1.0 {
            return Err(Error::InvalidArgument {
                name: "retry.delay_multiplier",
                reason: "must be a finite value >= 1.0",
            });
        }
        if self.output_stream_id.is_empty() {
            return Err(Error::Missing {
                name: "output_stream_id",
            });
        }

        match &self.hosts {
            BrokerHosts::Static { partitions } => {
                if partitions.is_empty() {
                    return Err(Error::Missing {
                        name: "hosts.partitions",
                    });
                }
                let ids: BTreeSet<PartitionId> = partitions.iter().map(|p| p.id).collect();
                if ids.len() != partitions.len() {
                    return Err(Error::InvalidArgument {
                        name: "hosts.partitions",
                        reason: "partition ids must be unique",
                    });
                }
            }
            BrokerHosts::Dynamic {
                broker_path,
                refresh_interval_ms,
            } => {
                if !broker_path.starts_with('/') {
                    return Err(Error::InvalidArgument {
                        name: "hosts.broker_path",
                        reason: "must be an absolute path",
                    });
                }
                if *refresh_interval_ms == 0 {
                    return Err(Error::InvalidArgument {
                        name: "hosts.refresh_interval_ms",
                        reason: "must be positive",
                    });
                }
            }
        }
        Ok(())
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SpoutResult<Self> {
        let contents =
            std::fs::read_to_string(path.as_ref()).map_err(|e| SpoutError::ConfigIo {
                path: path.as_ref().display().to_string(),
                source: e,
            })?;
        Self::from_toml(&contents)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml: &str) -> SpoutResult<Self> {
        toml::from_str(toml).map_err(|e| SpoutError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Serializes the configuration to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// This task's position among the deployment's parallel consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parallelism {
    /// Zero-based index of this task.
    pub task_index: u32,
    /// Number of parallel tasks in the deployment.
    pub total_tasks: u32,
    /// Label for this task in logs.
    pub instance_id: String,
}

impl Parallelism {
    /// Creates a parallelism descriptor.
    #[must_use]
    pub fn new(task_index: u32, total_tasks: u32) -> Self {
        Self {
            task_index,
            total_tasks,
            instance_id: format!("task-{task_index}"),
        }
    }

    /// A single task owning every partition.
    #[must_use]
    pub fn single() -> Self {
        Self::new(0, 1)
    }

    /// Validates the task index against the task count.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no tasks or the index is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.total_tasks == 0 {
            return Err(Error::InvalidArgument {
                name: "total_tasks",
                reason: "must be positive",
            });
        }
        if self.task_index >= self.total_tasks {
            return Err(Error::OutOfRange {
                name: "task_index",
                max: u64::from(self.total_tasks - 1),
                actual: u64::from(self.task_index),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader() -> BrokerHost {
        BrokerHost::new("broker-1", 9092)
    }

    fn valid() -> SpoutConfig {
        SpoutConfig::for_testing(
            "events",
            vec![StaticPartition::new(0, leader()), StaticPartition::new(1, leader())],
        )
    }

    #[test]
    fn test_valid_config() {
        let config = valid();
        assert!(config.validate().is_ok());

        let partitions = config.static_partitions();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[1].topic(), "events");
    }

    #[test]
    fn test_missing_fields() {
        let mut config = valid();
        config.topic.clear();
        assert_eq!(config.validate(), Err(Error::Missing { name: "topic" }));

        let mut config = valid();
        config.hosts = BrokerHosts::Static {
            partitions: Vec::new(),
        };
        assert_eq!(
            config.validate(),
            Err(Error::Missing {
                name: "hosts.partitions"
            })
        );
    }

    #[test]
    fn test_invalid_values() {
        let config = valid().with_commit_interval_ms(0);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument {
                name: "commit_interval_ms",
                ..
            })
        ));

        let mut config = valid();
        config.hosts = BrokerHosts::Static {
            partitions: vec![StaticPartition::new(3, leader()), StaticPartition::new(3, leader())],
        };
        assert!(config.validate().is_err());

        let mut config = valid();
        config.hosts = BrokerHosts::Dynamic {
            broker_path: "brokers".into(),
            refresh_interval_ms: 1_000,
        };
        assert!(config.validate().is_err());

        let config = valid().with_retry(RetryPolicy::default().with_backoff(10, 0.5, 100));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parallelism_validate() {
        assert!(Parallelism::new(2, 3).validate().is_ok());
        assert_eq!(
            Parallelism::new(3, 3).validate(),
            Err(Error::OutOfRange {
                name: "task_index",
                max: 2,
                actual: 3
            })
        );
        assert!(Parallelism::new(0, 0).validate().is_err());
        assert_eq!(Parallelism::new(1, 2).instance_id, "task-1");
    }

    #[test]
    fn test_from_toml_dynamic() {
        let toml = r#"
            topic = "events"
            consumer_id = "indexer"
            commit_interval_ms = 500
            start_offset = "latest"

            [hosts]
            mode = "dynamic"
            broker_path = "/brokers"

            [retry]
            initial_delay_ms = 100
            delay_multiplier = 2.0
            retry_limit = 5
        "#;

        let config = SpoutConfig::from_toml(toml).unwrap();
        assert_eq!(config.commit_interval_ms, 500);
        assert_eq!(config.start_offset, StartOffset::Latest);
        assert_eq!(
            config.hosts,
            BrokerHosts::Dynamic {
                broker_path: "/brokers".into(),
                refresh_interval_ms: REFRESH_INTERVAL_MS_DEFAULT
            }
        );
        assert_eq!(config.retry.retry_limit, Some(5));
        // Untouched fields keep their defaults.
        assert_eq!(config.fetch_max_bytes, FETCH_MAX_BYTES_DEFAULT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_static() {
        let toml = r#"
            topic = "events"
            consumer_id = "indexer"

            [hosts]
            mode = "static"
            partitions = [
                { id = 0, leader = { host = "b1", port = 9092 } },
                { id = 1, leader = { host = "b2", port = 9093 } },
            ]
        "#;

        let config = SpoutConfig::from_toml(toml).unwrap();
        let partitions = config.static_partitions();
        assert_eq!(partitions[1].leader, BrokerHost::new("b2", 9093));
    }

    #[test]
    fn test_parse_error() {
        let err = SpoutConfig::from_toml("topic = [").unwrap_err();
        assert!(matches!(err, SpoutError::ConfigParse { .. }));
    }
}
