//! Session configuration.

use std::{num::NonZeroUsize, thread};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strata_core::Transform;

use crate::sequence::DEFAULT_BLOCK_SIZE;

/// Feature hierarchies per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
/// Queue slots per worker when no queue size is configured.
pub const QUEUE_SLOTS_PER_WORKER: usize = 64;

/// When buffered batches reach the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Each full batch is committed as soon as it fills.
    #[default]
    Normal,
    /// Batches execute and are rolled back; committing the session is refused.
    DryRun,
    /// Nothing is flushed until the session is committed.
    Explicit,
}

/// Options applied to one import session.
///
/// # Examples
/// ```
/// use strata_data::{ImportOptions, TransactionMode};
///
/// let options: ImportOptions =
///     serde_json::from_str(r#"{"batch_size": 50, "mode": "dry_run"}"#).expect("valid options");
/// assert_eq!(options.batch_size, 50);
/// assert_eq!(options.mode, TransactionMode::DryRun);
/// assert!(!options.fail_fast);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Worker threads; defaults to `max(2, available CPUs)`.
    pub threads: Option<NonZeroUsize>,
    /// Feature hierarchies per batch, clamped to the adapter maximum.
    pub batch_size: usize,
    /// Capacity of the job queue; defaults to 64 slots per worker.
    pub queue_size: Option<NonZeroUsize>,
    /// Ids reserved per sequence round trip.
    pub sequence_block_size: u32,
    /// Treat malformed features and dangling references as fatal.
    pub fail_fast: bool,
    /// Directory for the reference cache file; the OS temp dir when unset.
    pub temp_dir: Option<Utf8PathBuf>,
    pub mode: TransactionMode,
    /// Affine transform applied to every incoming feature.
    pub transform: Option<Transform>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            threads: None,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_size: None,
            sequence_block_size: DEFAULT_BLOCK_SIZE,
            fail_fast: false,
            temp_dir: None,
            mode: TransactionMode::Normal,
            transform: None,
        }
    }
}

impl ImportOptions {
    #[must_use]
    pub fn with_threads(mut self, threads: NonZeroUsize) -> Self {
        self.threads = Some(threads);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_queue_size(mut self, queue_size: NonZeroUsize) -> Self {
        self.queue_size = Some(queue_size);
        self
    }

    #[must_use]
    pub fn with_sequence_block_size(mut self, block_size: u32) -> Self {
        self.sequence_block_size = block_size;
        self
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[must_use]
    pub fn with_temp_dir(mut self, temp_dir: impl Into<Utf8PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Number of workers the session will start.
    pub fn worker_count(&self) -> usize {
        self.threads.map_or_else(
            || {
                thread::available_parallelism()
                    .map_or(2, NonZeroUsize::get)
                    .max(2)
            },
            NonZeroUsize::get,
        )
    }

    /// Job queue capacity for `workers` workers.
    pub fn queue_capacity(&self, workers: usize) -> usize {
        self.queue_size.map_or_else(
            || workers.saturating_mul(QUEUE_SLOTS_PER_WORKER),
            NonZeroUsize::get,
        )
    }

    /// Batch size clamped to `[1, max_batch_size]`.
    pub fn effective_batch_size(&self, max_batch_size: usize) -> usize {
        self.batch_size.clamp(1, max_batch_size.max(1))
    }
}
