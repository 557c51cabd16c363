//! Property definitions and checkers for logspout simulation tests.
//!
//! The checker is fed everything the simulation observes (emissions, acks,
//! offset snapshots, committed records, assignments) and records a
//! [`Violation`] whenever an invariant breaks.

use std::collections::{BTreeMap, BTreeSet};

use logspout_core::{MessageId, Offset, Partition, PartitionKey};
use logspout_spout::OffsetSnapshot;

// ============================================================================
// Property Violation Types
// ============================================================================

/// A broken consumption invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The resume offset moved backwards.
    ResumeRegressed {
        /// The partition.
        partition: PartitionKey,
        /// Previously observed resume offset.
        old: u64,
        /// Newly observed resume offset.
        new: u64,
    },
    /// The fetch cursor moved backwards.
    FetchCursorRegressed {
        /// The partition.
        partition: PartitionKey,
        /// Previously observed cursor.
        old: u64,
        /// Newly observed cursor.
        new: u64,
    },
    /// The committed offset moved backwards.
    CommittedRegressed {
        /// The partition.
        partition: PartitionKey,
        /// Previously committed offset.
        old: u64,
        /// Newly committed offset.
        new: u64,
    },
    /// A manager reported a committed offset above its resume offset.
    CommittedAboveResume {
        /// The partition.
        partition: PartitionKey,
        /// Committed offset.
        committed: u64,
        /// Resume offset.
        resume: u64,
    },
    /// A persisted offset covers a record that was never acked.
    CommittedUnacked {
        /// The partition.
        partition: PartitionKey,
        /// Persisted resume offset.
        committed: u64,
        /// Lowest offset below it that was never acked.
        unacked: u64,
    },
    /// An acked record was emitted again by the same consumer.
    AckedRedelivered {
        /// The partition.
        partition: PartitionKey,
        /// The offset.
        offset: u64,
    },
    /// A partition is owned by more than one task.
    OwnedTwice {
        /// The partition.
        partition: PartitionKey,
        /// Tasks owning it.
        tasks: Vec<usize>,
    },
    /// A partition is owned by no task.
    Unowned {
        /// The partition.
        partition: PartitionKey,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResumeRegressed { partition, old, new } => {
                write!(f, "{partition}: resume offset regressed {old} -> {new}")
            }
            Self::FetchCursorRegressed { partition, old, new } => {
                write!(f, "{partition}: fetch cursor regressed {old} -> {new}")
            }
            Self::CommittedRegressed { partition, old, new } => {
                write!(f, "{partition}: committed offset regressed {old} -> {new}")
            }
            Self::CommittedAboveResume {
                partition,
                committed,
                resume,
            } => {
                write!(
                    f,
                    "{partition}: committed {committed} is above resume offset {resume}"
                )
            }
            Self::CommittedUnacked {
                partition,
                committed,
                unacked,
            } => {
                write!(
                    f,
                    "{partition}: committed {committed} but offset {unacked} was never acked"
                )
            }
            Self::AckedRedelivered { partition, offset } => {
                write!(f, "{partition}: offset {offset} emitted again after ack")
            }
            Self::OwnedTwice { partition, tasks } => {
                write!(f, "{partition}: owned by tasks {tasks:?}")
            }
            Self::Unowned { partition } => write!(f, "{partition}: owned by no task"),
        }
    }
}

// ============================================================================
// Property Checker
// ============================================================================

#[derive(Debug, Default)]
struct PartitionHistory {
    resume: Option<Offset>,
    fetch_cursor: Option<Offset>,
    committed: Option<Offset>,
    persisted: Option<Offset>,
    acked: BTreeSet<u64>,
}

/// Tracks state across a simulation for property verification.
#[derive(Debug, Default)]
pub struct PropertyChecker {
    partitions: BTreeMap<PartitionKey, PartitionHistory>,
    checks_performed: u64,
    violations: Vec<Violation>,
}

impl PropertyChecker {
    /// Creates a checker with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn history(&mut self, key: &PartitionKey) -> &mut PartitionHistory {
        self.partitions.entry(key.clone()).or_default()
    }

    /// Records an emission.
    pub fn record_emission(&mut self, message_id: &MessageId) {
        self.checks_performed += 1;
        let key = &message_id.partition.key;
        let offset = message_id.offset.get();
        if self.history(key).acked.contains(&offset) {
            self.violations.push(Violation::AckedRedelivered {
                partition: key.clone(),
                offset,
            });
        }
    }

    /// Records an ack the driver accepted.
    pub fn record_ack(&mut self, message_id: &MessageId) {
        let offset = message_id.offset.get();
        self.history(&message_id.partition.key).acked.insert(offset);
    }

    /// Forgets per-consumer history for `key`, as when a fresh consumer
    /// takes the partition over from `resume_from`. Acks at or above it may
    /// legitimately be redelivered.
    pub fn reset_consumer_view(&mut self, key: &PartitionKey, resume_from: Offset) {
        let history = self.history(key);
        history.resume = None;
        history.fetch_cursor = None;
        history.committed = None;
        history.acked.retain(|&offset| offset < resume_from.get());
    }

    /// Checks offset snapshots for regressions.
    pub fn record_snapshots(&mut self, snapshots: &[OffsetSnapshot]) {
        for snapshot in snapshots {
            self.checks_performed += 1;
            let key = snapshot.partition.key.clone();
            let mut found = Vec::new();
            let history = self.history(&key);

            if let Some(old) = history.resume {
                if snapshot.resume < old {
                    found.push(Violation::ResumeRegressed {
                        partition: key.clone(),
                        old: old.get(),
                        new: snapshot.resume.get(),
                    });
                }
            }
            if let Some(old) = history.fetch_cursor {
                if snapshot.fetch_cursor < old {
                    found.push(Violation::FetchCursorRegressed {
                        partition: key.clone(),
                        old: old.get(),
                        new: snapshot.fetch_cursor.get(),
                    });
                }
            }
            if let Some(committed) = snapshot.committed {
                if let Some(old) = history.committed {
                    if committed < old {
                        found.push(Violation::CommittedRegressed {
                            partition: key.clone(),
                            old: old.get(),
                            new: committed.get(),
                        });
                    }
                }
                if committed > snapshot.resume {
                    found.push(Violation::CommittedAboveResume {
                        partition: key.clone(),
                        committed: committed.get(),
                        resume: snapshot.resume.get(),
                    });
                }
                history.committed = Some(committed);
            }
            history.resume = Some(snapshot.resume);
            history.fetch_cursor = Some(snapshot.fetch_cursor);

            self.violations.extend(found);
        }
    }

    /// Checks a persisted offset against the acks seen so far.
    ///
    /// Every offset from `start` up to the persisted one must have been
    /// acked.
    pub fn record_persisted(&mut self, key: &PartitionKey, start: Offset, persisted: Offset) {
        self.checks_performed += 1;
        let mut found = Vec::new();
        let history = self.history(key);

        if let Some(old) = history.persisted {
            if persisted < old {
                found.push(Violation::CommittedRegressed {
                    partition: key.clone(),
                    old: old.get(),
                    new: persisted.get(),
                });
            }
        }
        if let Some(unacked) =
            (start.get()..persisted.get()).find(|offset| !history.acked.contains(offset))
        {
            found.push(Violation::CommittedUnacked {
                partition: key.clone(),
                committed: persisted.get(),
                unacked,
            });
        }
        history.persisted = Some(persisted);

        self.violations.extend(found);
    }

    /// Checks that `owned[task]` partitions cover `all` exactly once.
    pub fn check_assignment(&mut self, all: &[Partition], owned: &[Vec<Partition>]) {
        self.checks_performed += 1;
        let mut owners: BTreeMap<&PartitionKey, Vec<usize>> =
            all.iter().map(|partition| (&partition.key, Vec::new())).collect();
        for (task, partitions) in owned.iter().enumerate() {
            for partition in partitions {
                owners.entry(&partition.key).or_default().push(task);
            }
        }
        for (key, tasks) in owners {
            match tasks.len() {
                0 => self.violations.push(Violation::Unowned {
                    partition: key.clone(),
                }),
                1 => {}
                _ => self.violations.push(Violation::OwnedTwice {
                    partition: key.clone(),
                    tasks,
                }),
            }
        }
    }

    /// Acked offsets seen for `key`.
    #[must_use]
    pub fn acked_count(&self, key: &PartitionKey) -> usize {
        self.partitions.get(key).map_or(0, |history| history.acked.len())
    }

    /// Violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Returns true if no violation was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Prints a one-line summary.
    pub fn print_summary(&self, label: &str) {
        println!(
            "{label}: checks={}, partitions={}, violations={}",
            self.checks_performed,
            self.partitions.len(),
            self.violations.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use logspout_core::{BrokerHost, PartitionId};

    use super::*;

    fn partition(id: u64) -> Partition {
        Partition::new("events", PartitionId::new(id), BrokerHost::new("b", 1))
    }

    #[test]
    fn test_detects_redelivery_after_ack() {
        let mut checker = PropertyChecker::new();
        let id = MessageId::new(partition(0), Offset::new(3));

        checker.record_emission(&id);
        checker.record_ack(&id);
        assert!(checker.is_clean());

        checker.record_emission(&id);
        assert_eq!(
            checker.violations(),
            &[Violation::AckedRedelivered {
                partition: partition(0).key,
                offset: 3
            }]
        );
    }

    #[test]
    fn test_detects_unacked_commit() {
        let mut checker = PropertyChecker::new();
        let key = partition(0).key;
        checker.record_ack(&MessageId::new(partition(0), Offset::new(0)));
        checker.record_ack(&MessageId::new(partition(0), Offset::new(2)));

        checker.record_persisted(&key, Offset::new(0), Offset::new(1));
        assert!(checker.is_clean());

        checker.record_persisted(&key, Offset::new(0), Offset::new(3));
        assert!(matches!(
            checker.violations(),
            [Violation::CommittedUnacked { unacked: 1, .. }]
        ));
    }

    #[test]
    fn test_detects_bad_assignment() {
        let mut checker = PropertyChecker::new();
        let all = vec![partition(0), partition(1), partition(2)];

        checker.check_assignment(&all, &[vec![partition(0)], vec![partition(0), partition(1)]]);
        assert_eq!(checker.violations().len(), 2);
    }
}
