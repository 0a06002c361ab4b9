//! Records emitted once features have been persisted.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Numeric row identifier assigned by the sequence allocator.
pub type RowId = i64;

/// Correlates a persisted feature with its generated row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureDescriptor {
    /// Generated primary key of the `feature` row.
    pub id: RowId,
    /// Object identifier copied from the input feature.
    pub object_id: Option<String>,
    /// Feature type name.
    pub feature_type: String,
}

/// Outcome of the batch that carried a feature hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CommitStatus {
    /// The batch was committed.
    Committed,
    /// The batch was rolled back on purpose (dry run or abort).
    RolledBack,
    /// Executing the batch failed.
    Failed,
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        })
    }
}

/// One entry per feature hierarchy root once its commit status is known.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImportLogEntry {
    /// The persisted root feature.
    pub descriptor: FeatureDescriptor,
    /// Number of features in the hierarchy, root included.
    pub hierarchy_size: usize,
    /// Seconds since the Unix epoch stamped on the rows.
    pub import_time: i64,
    /// Final status of the carrying batch.
    pub status: CommitStatus,
}

/// Summary of one executed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchReport {
    /// Index of the worker that executed the batch.
    pub worker: usize,
    /// Feature hierarchies carried by the batch.
    pub features: usize,
    /// Rows written across all tables.
    pub rows: usize,
    /// Outcome of the batch.
    pub status: CommitStatus,
}

/// Receives import log notifications from every worker.
///
/// Implementations must be cheap and thread-safe: workers call them while
/// holding no locks, possibly concurrently.
pub trait ImportLogger: Send + Sync {
    /// Record the status of a feature hierarchy.
    fn log(&self, entry: &ImportLogEntry);

    /// Observe a batch once it has been committed or rolled back.
    fn batch_executed(&self, report: &BatchReport) {
        let _ = report;
    }
}

/// Logger that discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopImportLogger;

impl ImportLogger for NoopImportLogger {
    fn log(&self, _entry: &ImportLogEntry) {}
}
