//! Import log that tallies feature hierarchies by type and outcome.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Mutex, PoisonError},
};

use strata_core::{BatchReport, CommitStatus, ImportLogEntry, ImportLogger};

/// Counts for one feature type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCounts {
    pub committed: u64,
    pub rolled_back: u64,
    pub failed: u64,
    /// Features in committed hierarchies, roots included.
    pub committed_features: u64,
}

/// Snapshot of [`ImportStatistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsReport {
    pub by_type: BTreeMap<String, TypeCounts>,
    pub batches_committed: u64,
    pub batches_rolled_back: u64,
    pub batches_failed: u64,
}

impl StatisticsReport {
    /// Committed hierarchy roots across all types.
    pub fn committed(&self) -> u64 {
        self.by_type.values().map(|counts| counts.committed).sum()
    }

    pub fn batches(&self) -> u64 {
        self.batches_committed + self.batches_rolled_back + self.batches_failed
    }
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Imported features:")?;
        if self.by_type.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (feature_type, counts) in &self.by_type {
            write!(f, "  {feature_type}: {} committed", counts.committed)?;
            if counts.committed_features > counts.committed {
                write!(f, " ({} with nested features)", counts.committed_features)?;
            }
            if counts.rolled_back > 0 {
                write!(f, ", {} rolled back", counts.rolled_back)?;
            }
            if counts.failed > 0 {
                write!(f, ", {} failed", counts.failed)?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "Batches: {} committed, {} rolled back, {} failed",
            self.batches_committed, self.batches_rolled_back, self.batches_failed
        )
    }
}

/// Thread-safe [`ImportLogger`] collecting a [`StatisticsReport`].
///
/// # Examples
/// ```
/// use strata_core::{CommitStatus, FeatureDescriptor, ImportLogEntry, ImportLogger};
/// use strata_data::ImportStatistics;
///
/// let statistics = ImportStatistics::new();
/// statistics.log(&ImportLogEntry {
///     descriptor: FeatureDescriptor { id: 1, object_id: None, feature_type: "Building".into() },
///     hierarchy_size: 1,
///     import_time: 0,
///     status: CommitStatus::Committed,
/// });
/// assert_eq!(statistics.report().committed(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ImportStatistics {
    report: Mutex<StatisticsReport>,
}

impl ImportStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> StatisticsReport {
        self.report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ImportLogger for ImportStatistics {
    fn log(&self, entry: &ImportLogEntry) {
        let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        let counts = report
            .by_type
            .entry(entry.descriptor.feature_type.clone())
            .or_default();
        match entry.status {
            CommitStatus::Committed => {
                counts.committed += 1;
                counts.committed_features += entry.hierarchy_size as u64;
            }
            CommitStatus::RolledBack => counts.rolled_back += 1,
            CommitStatus::Failed => counts.failed += 1,
        }
    }

    fn batch_executed(&self, batch: &BatchReport) {
        let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        match batch.status {
            CommitStatus::Committed => report.batches_committed += 1,
            CommitStatus::RolledBack => report.batches_rolled_back += 1,
            CommitStatus::Failed => report.batches_failed += 1,
        }
    }
}
