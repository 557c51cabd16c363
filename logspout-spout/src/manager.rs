//! Partition manager - fetch, emit, ack, fail and commit for one partition.
//!
//! # Offsets
//!
//! - `fetch_cursor`: next offset to request for new records. Only moves
//!   forward.
//! - pending: emitted and not yet acked or failed.
//! - retries: failed and waiting out their backoff.
//! - buffer: fetched and not yet emitted.
//!
//! The resume offset is the lowest offset in pending, buffer or retries, or
//! the end of the last fetched batch when all three are empty. Everything
//! below it is resolved, so it is what gets committed. It never decreases.

use std::collections::VecDeque;
use std::sync::Arc;

use logspout_broker::{ConnectionPool, FetchError, StartOffset};
use logspout_core::{FetchedRecord, MessageId, Offset, Partition, Timestamp};
use logspout_progress::{OffsetStore, PendingSet, RetryDecision, RetryTracker};
use tracing::{debug, info, warn};

use crate::config::SpoutConfig;
use crate::decoder::RecordDecoder;
use crate::emitter::PipelineEmitter;
use crate::error::{SpoutError, SpoutResult};

/// Outcome of one [`PartitionManager::next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitState {
    /// A record was emitted and more are buffered.
    EmittedMoreLeft,
    /// A record was emitted and the buffer is now empty.
    EmittedEnd,
    /// Nothing was emitted.
    NoEmitted,
}

/// Collaborators a manager borrows from the driver for one call.
pub struct ManagerContext<'a> {
    /// Broker connections.
    pub pool: &'a mut ConnectionPool,
    /// Committed-offset client.
    pub offsets: &'a OffsetStore,
    /// Record decoder.
    pub decoder: &'a dyn RecordDecoder,
    /// Downstream pipeline.
    pub emitter: &'a mut dyn PipelineEmitter,
    /// Current time.
    pub now: Timestamp,
}

/// Point-in-time view of a manager's offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSnapshot {
    /// The partition.
    pub partition: Partition,
    /// Next offset requested for new records.
    pub fetch_cursor: Offset,
    /// Resume offset of the last successful commit.
    pub committed: Option<Offset>,
    /// Resume offset if a commit happened now.
    pub resume: Offset,
    /// Emitted and unresolved.
    pub pending: u64,
    /// Failed and waiting to be retried.
    pub waiting_retry: usize,
    /// Fetched and not yet emitted.
    pub buffered: usize,
}

impl OffsetSnapshot {
    /// Highest offset below which every record is resolved.
    ///
    /// `None` when nothing has completed yet.
    #[must_use]
    pub const fn last_completed(&self) -> Option<Offset> {
        self.resume.prev()
    }

    /// Number of records between the last commit and the fetch cursor.
    #[must_use]
    pub fn uncommitted(&self) -> u64 {
        self.committed
            .map_or(0, |committed| self.fetch_cursor.distance_from(committed))
    }
}

/// Counters kept by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerMetrics {
    /// Fetch requests issued.
    pub fetch_calls: u64,
    /// Fetch requests that failed.
    pub fetch_failures: u64,
    /// Records returned by fetches.
    pub fetched: u64,
    /// Tuples emitted, retries included.
    pub emitted: u64,
    /// Records the decoder rejected.
    pub skipped: u64,
    /// Acks for pending offsets.
    pub acked: u64,
    /// Fails for pending offsets.
    pub failed: u64,
    /// Records given up on after exhausting retries.
    pub abandoned: u64,
    /// Pending or failed records dropped by an out-of-range reset.
    pub lost: u64,
    /// Successful commits.
    pub commits: u64,
    /// Failed commit writes.
    pub commit_failures: u64,
}

impl ManagerMetrics {
    /// Adds `other` into `self`.
    pub fn accumulate(&mut self, other: &Self) {
        self.fetch_calls += other.fetch_calls;
        self.fetch_failures += other.fetch_failures;
        self.fetched += other.fetched;
        self.emitted += other.emitted;
        self.skipped += other.skipped;
        self.acked += other.acked;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
        self.lost += other.lost;
        self.commits += other.commits;
        self.commit_failures += other.commit_failures;
    }
}

/// Cursor state, present once the manager has initialized.
#[derive(Debug)]
struct Cursor {
    fetch_cursor: Offset,
    /// Cursor to adopt once the buffer drains.
    batch_end: Offset,
    committed: Offset,
    pending: PendingSet,
    buffer: VecDeque<FetchedRecord>,
}

impl Cursor {
    fn new(start: Offset) -> Self {
        Self {
            fetch_cursor: start,
            batch_end: start,
            committed: start,
            pending: PendingSet::new(),
            buffer: VecDeque::new(),
        }
    }
}

/// Per-partition consumption state machine.
#[derive(Debug)]
pub struct PartitionManager {
    partition: Partition,
    config: Arc<SpoutConfig>,
    retries: RetryTracker,
    /// `None` until the first successful initialization.
    cursor: Option<Cursor>,
    metrics: ManagerMetrics,
}

impl PartitionManager {
    /// Creates a manager. It reads its committed offset lazily on the first
    /// [`Self::next`].
    #[must_use]
    pub fn new(partition: Partition, config: Arc<SpoutConfig>) -> Self {
        let retries = RetryTracker::new(config.retry.clone());
        Self {
            partition,
            config,
            retries,
            cursor: None,
            metrics: ManagerMetrics::default(),
        }
    }

    /// The partition this manager consumes, with the leader it was created for.
    #[must_use]
    pub const fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Returns true once the starting offset has been resolved.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.cursor.is_some()
    }

    /// Returns the counters.
    #[must_use]
    pub const fn metrics(&self) -> ManagerMetrics {
        self.metrics
    }

    /// Returns the current offsets, or `None` before initialization.
    #[must_use]
    pub fn offset_snapshot(&self) -> Option<OffsetSnapshot> {
        let cursor = self.cursor.as_ref()?;
        Some(OffsetSnapshot {
            partition: self.partition.clone(),
            fetch_cursor: cursor.fetch_cursor,
            committed: Some(cursor.committed),
            resume: self.resume_offset(cursor),
            pending: cursor.pending.len(),
            waiting_retry: self.retries.waiting_count(),
            buffered: cursor.buffer.len(),
        })
    }

    // ---- Emission ----

    /// Emits at most one record.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization or the fetch fails. Nothing is
    /// emitted in that case and the call can simply be retried.
    pub async fn next(&mut self, ctx: &mut ManagerContext<'_>) -> SpoutResult<EmitState> {
        if self.cursor.is_none() {
            let cursor = self.initialize(ctx).await?;
            self.cursor = Some(cursor);
        }
        if self.cursor.as_ref().is_some_and(|cursor| cursor.buffer.is_empty()) {
            self.fill(ctx).await?;
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(EmitState::NoEmitted);
        };
        while let Some(record) = cursor.buffer.pop_front() {
            if cursor.buffer.is_empty() {
                cursor.fetch_cursor = cursor.fetch_cursor.max(cursor.batch_end);
            }
            let offset = record.offset;

            let Some(tuple) = ctx.decoder.decode(&record) else {
                self.retries.acked(offset);
                self.metrics.skipped += 1;
                debug!(partition = %self.partition.key, offset = offset.get(), "decoder skipped record");
                continue;
            };

            cursor.pending.insert(offset);
            self.retries.retry_started(offset);
            ctx.emitter.emit(
                &self.config.output_stream_id,
                tuple,
                MessageId::new(self.partition.clone(), offset),
            );
            self.metrics.emitted += 1;

            return Ok(if cursor.buffer.is_empty() {
                EmitState::EmittedEnd
            } else {
                EmitState::EmittedMoreLeft
            });
        }
        Ok(EmitState::NoEmitted)
    }

    async fn initialize(&mut self, ctx: &mut ManagerContext<'_>) -> SpoutResult<Cursor> {
        let committed = if self.config.ignore_committed_offsets {
            None
        } else {
            match ctx
                .offsets
                .read(&self.partition, &self.config.consumer_id)
                .await
            {
                Ok(record) => record.map(|record| record.offset),
                Err(error) => {
                    warn!(
                        partition = %self.partition.key,
                        error = %error,
                        "unreadable committed offset, using start policy"
                    );
                    None
                }
            }
        };

        let start = match committed {
            Some(committed) => match self.config.max_offset_behind {
                Some(max_behind) => {
                    let latest = self.resolve(ctx, StartOffset::Latest).await?;
                    if latest.distance_from(committed) > max_behind {
                        let start = self.resolve(ctx, self.config.start_offset).await?;
                        warn!(
                            partition = %self.partition.key,
                            committed = committed.get(),
                            latest = latest.get(),
                            start = start.get(),
                            "committed offset too far behind, skipping ahead"
                        );
                        start
                    } else {
                        committed
                    }
                }
                None => committed,
            },
            None => self.resolve(ctx, self.config.start_offset).await?,
        };

        info!(
            partition = %self.partition,
            committed = ?committed.map(Offset::get),
            start = start.get(),
            "partition manager initialized"
        );
        Ok(Cursor::new(start))
    }

    async fn resolve(&self, ctx: &mut ManagerContext<'_>, start: StartOffset) -> SpoutResult<Offset> {
        ctx.pool
            .offset_for(&self.partition, start)
            .await
            .map_err(|source| SpoutError::fetch(self.partition.key.clone(), source))
    }

    /// Fetches the next batch into the empty buffer.
    async fn fill(&mut self, ctx: &mut ManagerContext<'_>) -> SpoutResult<()> {
        let Some(cursor) = self.cursor.as_ref() else {
            return Ok(());
        };
        let fetch_cursor = cursor.fetch_cursor;
        let from = self
            .retries
            .next_ready(ctx.now)
            .filter(|&retry| retry < fetch_cursor)
            .unwrap_or(fetch_cursor);

        self.metrics.fetch_calls += 1;
        let result = ctx
            .pool
            .fetch(&self.partition, from, self.config.fetch_max_bytes)
            .await;

        let records = match result {
            Ok(records) => records,
            Err(FetchError::OffsetOutOfRange { .. }) if self.config.reset_on_out_of_range => {
                return self.reset_out_of_range(ctx, from).await;
            }
            Err(source) => {
                self.metrics.fetch_failures += 1;
                return Err(SpoutError::fetch(self.partition.key.clone(), source));
            }
        };

        self.metrics.fetched += records.len() as u64;
        let now = ctx.now;
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(());
        };
        let mut batch_end = fetch_cursor;
        for record in records {
            let offset = record.offset;
            if offset >= fetch_cursor {
                batch_end = batch_end.max(offset.next());
                cursor.buffer.push_back(record);
            } else if self.retries.is_ready(offset, now) {
                cursor.buffer.push_back(record);
            }
        }
        cursor.batch_end = batch_end;
        if cursor.buffer.is_empty() {
            cursor.fetch_cursor = cursor.fetch_cursor.max(batch_end);
        }
        Ok(())
    }

    /// Moves past offsets the broker no longer retains.
    async fn reset_out_of_range(&mut self, ctx: &mut ManagerContext<'_>, from: Offset) -> SpoutResult<()> {
        let earliest = self.resolve(ctx, StartOffset::Earliest).await?;
        if earliest <= from {
            // Past the end of the log; moving the cursor back is not allowed.
            self.metrics.fetch_failures += 1;
            return Err(SpoutError::fetch(
                self.partition.key.clone(),
                FetchError::OffsetOutOfRange {
                    partition: self.partition.key.clone(),
                    offset: from,
                },
            ));
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(());
        };
        let lost_pending = cursor.pending.clear_before(earliest);
        let lost_retries = self.retries.clear_before(earliest).len() as u64;
        let lost = lost_pending + lost_retries;
        self.metrics.lost += lost;

        let previous = cursor.fetch_cursor;
        cursor.fetch_cursor = cursor.fetch_cursor.max(earliest);
        cursor.batch_end = cursor.fetch_cursor;
        warn!(
            partition = %self.partition.key,
            requested = from.get(),
            earliest = earliest.get(),
            previous_cursor = previous.get(),
            lost,
            "offset out of range, skipping to earliest retained offset"
        );
        Ok(())
    }

    // ---- Resolution ----

    /// Resolves a pending offset as processed.
    ///
    /// Returns false if the offset was not pending.
    pub fn ack(&mut self, offset: Offset) -> bool {
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };
        if !cursor.pending.remove(offset) {
            return false;
        }
        self.retries.acked(offset);
        self.metrics.acked += 1;
        true
    }

    /// Marks a pending offset as failed and schedules its retry.
    ///
    /// Returns false if the offset was not pending.
    pub fn fail(&mut self, offset: Offset, now: Timestamp) -> bool {
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };
        if !cursor.pending.remove(offset) {
            return false;
        }
        self.metrics.failed += 1;

        match self.retries.failed(offset, now) {
            RetryDecision::Scheduled { attempt, retry_at } => {
                debug!(
                    partition = %self.partition.key,
                    offset = offset.get(),
                    attempt,
                    retry_at = retry_at.as_millis(),
                    "scheduled retry"
                );
            }
            RetryDecision::Exhausted { attempts } => {
                self.metrics.abandoned += 1;
                warn!(
                    partition = %self.partition.key,
                    offset = offset.get(),
                    attempts,
                    "retry limit reached, abandoning record"
                );
            }
        }
        true
    }

    // ---- Commit ----

    fn resume_offset(&self, cursor: &Cursor) -> Offset {
        [
            cursor.pending.min(),
            cursor.buffer.front().map(|record| record.offset),
            self.retries.min_waiting(),
        ]
        .into_iter()
        .flatten()
        .fold(cursor.fetch_cursor.max(cursor.batch_end), Offset::min)
    }

    /// Writes the resume offset if it moved since the last commit.
    ///
    /// Returns true if a record was written. Write failures are logged and
    /// left for the next commit.
    pub async fn commit(&mut self, offsets: &OffsetStore, now: Timestamp) -> bool {
        let Some(cursor) = self.cursor.as_ref() else {
            return false;
        };
        let resume = self.resume_offset(cursor);
        if resume == cursor.committed {
            return false;
        }
        // `TigerStyle`: Assert invariant.
        assert!(
            resume > cursor.committed,
            "commit frontier regressed for {}: {} -> {}",
            self.partition.key,
            cursor.committed,
            resume
        );

        let result = offsets
            .write(&self.partition, resume, &self.config.consumer_id, now)
            .await;
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };
        match result {
            Ok(_) => {
                debug!(
                    partition = %self.partition.key,
                    from = cursor.committed.get(),
                    to = resume.get(),
                    "committed offset"
                );
                cursor.committed = resume;
                self.metrics.commits += 1;
                true
            }
            Err(error) => {
                self.metrics.commit_failures += 1;
                warn!(
                    partition = %self.partition.key,
                    offset = resume.get(),
                    error = %error,
                    "failed to commit offset, will retry"
                );
                false
            }
        }
    }

    /// Commits a final time and releases the pooled connection.
    pub async fn close(&mut self, pool: &mut ConnectionPool, offsets: &OffsetStore, now: Timestamp) {
        self.commit(offsets, now).await;
        pool.release(&self.partition.key).await;
        info!(partition = %self.partition, "partition manager closed");
    }
}
