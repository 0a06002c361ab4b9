//! Errors raised by import sessions.

use std::{io, sync::Arc};

use rusqlite::Error as SqliteError;
use strata_core::FeatureError;
use thiserror::Error;

use super::SessionState;
use crate::{
    adapter::AdapterError,
    reference::ReferenceError,
    schema::Table,
    sequence::SequenceError,
};

/// Errors raised while running an import session.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The call is not valid in the current session state.
    #[error("cannot {operation}: session is {found}, expected {expected}")]
    IllegalState {
        operation: &'static str,
        expected: SessionState,
        found: SessionState,
    },
    /// Dry-run sessions can only be aborted.
    #[error("a dry-run session cannot be committed; abort it instead")]
    DryRunCommit,
    /// Opening or initialising the target database failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// The reference cache or resolution sweep failed.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    /// A worker thread could not be started.
    #[error("failed to spawn import worker {index}")]
    SpawnWorker {
        index: usize,
        #[source]
        source: io::Error,
    },
    /// The feature failed validation and was not staged.
    #[error("feature {} was rejected", .object_id.as_deref().unwrap_or("<anonymous>"))]
    Feature {
        object_id: Option<String>,
        #[source]
        source: FeatureError,
    },
    /// Reserving row ids failed.
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// A JSON column could not be encoded.
    #[error("failed to encode {what} of feature {}", .object_id.as_deref().unwrap_or("<anonymous>"))]
    Encode {
        what: &'static str,
        object_id: Option<String>,
        #[source]
        source: serde_json::Error,
    },
    /// Beginning, committing or rolling back a batch transaction failed.
    #[error("worker {worker} failed to {operation}")]
    Batch {
        worker: usize,
        operation: &'static str,
        #[source]
        source: SqliteError,
    },
    /// A table importer failed while writing its buffered rows.
    #[error("worker {worker} failed to write table {table}")]
    Table {
        worker: usize,
        table: Table,
        #[source]
        source: SqliteError,
    },
    /// Closing a worker connection failed.
    #[error("worker {worker} failed to close its connection")]
    Close {
        worker: usize,
        #[source]
        source: SqliteError,
    },
    /// A worker exited without answering the finish request.
    #[error("import worker {index} stopped unexpectedly")]
    WorkerLost { index: usize },
    /// The job queue was closed before the feature could be queued.
    #[error("the import queue is closed")]
    QueueClosed,
    /// The session stopped because of `source`.
    #[error("import session aborted")]
    Aborted { source: Arc<ImportError> },
}

impl ImportError {
    /// Whether the error only concerns the feature that raised it.
    ///
    /// Such errors skip the feature unless the session runs fail-fast; every
    /// other error stops the session.
    pub const fn is_feature_local(&self) -> bool {
        matches!(self, Self::Feature { .. })
    }
}

/// Render an error followed by its chain of sources.
pub(crate) fn describe(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
