//! Per-worker import context.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use geo::AffineTransform;
use rusqlite::{Connection, Error as SqliteError, TransactionBehavior};
use strata_core::{
    BatchReport, CommitStatus, Feature, FeatureDescriptor, ImportLogEntry, ImportLogger,
    transform::apply_affine,
};

use super::{
    ImportError,
    graph::Stager,
    options::{ImportOptions, TransactionMode},
    tables::TableSet,
};
use crate::{reference::ReferenceCache, sequence::SequenceAllocator};

/// Everything one worker needs to persist features.
///
/// A helper owns a single connection that it only writes through explicit
/// batch transactions; id reservations are the one exception and run in
/// autocommit mode between batches. Rows and cache entries are buffered
/// until [`execute_batch`](Self::execute_batch) writes them.
#[derive(Debug)]
pub struct ImportHelper {
    worker: usize,
    connection: Connection,
    tables: TableSet,
    sequences: SequenceAllocator,
    cache: ReferenceCache,
    log: PendingLog,
    mode: TransactionMode,
    batch_size: usize,
    transform: Option<AffineTransform<f64>>,
    features_since_flush: usize,
}

impl ImportHelper {
    /// Build the context for worker `worker`.
    ///
    /// `max_batch_size` comes from the adapter and caps `options.batch_size`.
    pub fn new(
        worker: usize,
        connection: Connection,
        tables: TableSet,
        cache: ReferenceCache,
        logger: Arc<dyn ImportLogger>,
        options: &ImportOptions,
        max_batch_size: usize,
    ) -> Self {
        Self {
            worker,
            connection,
            tables,
            sequences: SequenceAllocator::new(options.sequence_block_size),
            cache,
            log: PendingLog::new(worker, logger),
            mode: options.mode,
            batch_size: options.effective_batch_size(max_batch_size),
            transform: options.transform.map(|transform| transform.to_affine()),
            features_since_flush: 0,
        }
    }

    pub const fn worker(&self) -> usize {
        self.worker
    }

    /// Feature hierarchies staged since the last executed batch.
    pub const fn pending_features(&self) -> usize {
        self.features_since_flush
    }

    /// Persist one feature hierarchy into the current batch.
    ///
    /// The feature is transformed, validated and staged as a whole; a
    /// rejected feature leaves no rows behind. Unless the session runs in
    /// [`TransactionMode::Explicit`], a full batch is executed before
    /// returning.
    pub fn import(&mut self, mut feature: Feature) -> Result<FeatureDescriptor, ImportError> {
        if let Some(transform) = &self.transform {
            apply_affine(transform, &mut feature);
        }
        feature
            .validate()
            .map_err(|source| ImportError::Feature {
                object_id: feature.object_id.clone(),
                source,
            })?;

        let import_time = unix_time();
        let mut stager = Stager::new(&self.connection, &mut self.sequences, &self.cache, import_time);
        let id = stager.feature(&feature)?;
        let staged = stager.finish();

        for (table, row) in staged.rows {
            self.tables.add_row(table, row);
        }
        for (kind, object_id, target_id) in staged.targets {
            self.cache.record_target(kind, &object_id, target_id);
        }
        for (kind, owner, target) in staged.references {
            self.cache.record_reference(kind, owner, &target);
        }

        let hierarchy_size = feature.hierarchy_size();
        let descriptor = FeatureDescriptor {
            id,
            object_id: feature.object_id,
            feature_type: feature.feature_type,
        };
        self.log.push(descriptor.clone(), hierarchy_size, import_time);
        self.features_since_flush += 1;

        if self.mode != TransactionMode::Explicit {
            self.execute_batch(false, true)?;
        }
        Ok(descriptor)
    }

    /// Write the buffered batch.
    ///
    /// Nothing happens when no rows are pending, or when `force` is false and
    /// fewer than `batch_size` features are buffered. The batch is committed
    /// when `commit` is true outside dry-run mode and rolled back otherwise.
    /// A failed batch is rolled back, its features are logged as failed and
    /// the error is returned.
    pub fn execute_batch(&mut self, force: bool, commit: bool) -> Result<(), ImportError> {
        let rows = self.tables.pending_rows();
        if rows == 0 && self.log.is_empty() {
            return Ok(());
        }
        if !force && self.features_since_flush < self.batch_size {
            return Ok(());
        }

        let commit = commit && self.mode != TransactionMode::DryRun;
        let outcome = self.write_batch(commit);
        let status = match (&outcome, commit) {
            (Ok(()), true) => CommitStatus::Committed,
            (Ok(()), false) => CommitStatus::RolledBack,
            (Err(_), _) => CommitStatus::Failed,
        };
        if outcome.is_err() {
            self.tables.clear();
            self.cache.discard_pending();
        }
        let features = self.log.report(status);
        self.log.batch_executed(features, rows, status);
        log::debug!(
            "worker {} {status} batch of {features} feature(s), {rows} row(s)",
            self.worker
        );
        self.features_since_flush = 0;
        outcome
    }

    fn write_batch(&mut self, commit: bool) -> Result<(), ImportError> {
        let worker = self.worker;
        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(batch_error(worker, "begin batch transaction"))?;
        self.tables
            .execute(&transaction)
            .map_err(|(table, source)| ImportError::Table {
                worker,
                table,
                source,
            })?;
        if commit {
            self.cache.persist()?;
            transaction
                .commit()
                .map_err(batch_error(worker, "commit batch transaction"))
        } else {
            self.cache.discard_pending();
            transaction
                .rollback()
                .map_err(batch_error(worker, "roll back batch transaction"))
        }
    }

    /// Release the helper without writing pending rows.
    ///
    /// Features still buffered are logged as rolled back.
    pub fn close(self) -> Result<(), ImportError> {
        let Self {
            worker,
            connection,
            tables,
            mut log,
            ..
        } = self;
        log.report(CommitStatus::RolledBack);
        drop(tables);
        connection
            .close()
            .map_err(|(_, source)| ImportError::Close { worker, source })
    }
}

#[derive(Debug)]
struct PendingEntry {
    descriptor: FeatureDescriptor,
    hierarchy_size: usize,
    import_time: i64,
}

/// Log notifications waiting for the outcome of their batch.
struct PendingLog {
    worker: usize,
    logger: Arc<dyn ImportLogger>,
    entries: Vec<PendingEntry>,
}

impl std::fmt::Debug for PendingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLog")
            .field("worker", &self.worker)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl PendingLog {
    fn new(worker: usize, logger: Arc<dyn ImportLogger>) -> Self {
        Self {
            worker,
            logger,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, descriptor: FeatureDescriptor, hierarchy_size: usize, import_time: i64) {
        self.entries.push(PendingEntry {
            descriptor,
            hierarchy_size,
            import_time,
        });
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Notify the logger of every pending entry; returns how many there were.
    fn report(&mut self, status: CommitStatus) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            self.logger.log(&ImportLogEntry {
                descriptor: entry.descriptor,
                hierarchy_size: entry.hierarchy_size,
                import_time: entry.import_time,
                status,
            });
        }
        count
    }

    fn batch_executed(&self, features: usize, rows: usize, status: CommitStatus) {
        self.logger.batch_executed(&BatchReport {
            worker: self.worker,
            features,
            rows,
            status,
        });
    }
}

impl Drop for PendingLog {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.report(CommitStatus::RolledBack);
        }
    }
}

fn batch_error(worker: usize, operation: &'static str) -> impl FnOnce(SqliteError) -> ImportError {
    move |source| ImportError::Batch {
        worker,
        operation,
        source,
    }
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
