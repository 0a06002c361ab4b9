//! Import engine and storage for the Strata feature database.
//!
//! Responsibilities:
//! - Run concurrent import sessions that persist feature hierarchies in
//!   batches and resolve symbolic references once all batches are committed.
//! - Own the SQLite schema, connections and id sequences.
//! - Read features from newline-delimited JSON and export them back.
//!
//! Boundaries:
//! - Domain types and validation live in `strata-core`.
//! - No async runtime: workers are plain threads and SQLite is blocking.
//!
//! Invariants:
//! - Table writes follow [`schema::COMMIT_ORDER`] in every batch.
//! - Row ids are never reused, even after an aborted session.
//! - No global mutable state.

pub mod adapter;
pub mod export;
pub mod import;
pub mod reader;
pub mod reference;
pub mod schema;
pub mod sequence;
pub mod statistics;
pub mod store;

pub use adapter::{AdapterError, SqliteAdapter};
pub use export::{ExportError, ExportOptions, ExportSummary, export_features};
pub use import::{
    HandleError, ImportError, ImportHandle, ImportHelper, ImportOptions, Importer, SessionState,
    SessionSummary, TransactionMode,
};
pub use reader::{CancelToken, FeatureReader, JsonLinesReader, ReadError};
pub use reference::{DanglingReference, ReferenceError, ReferenceManager, ResolutionReport};
pub use schema::{COMMIT_ORDER, SchemaError, Table, initialise_schema};
pub use statistics::{ImportStatistics, StatisticsReport};
