//! Facade crate for the Strata feature-graph import engine.
//!
//! This crate re-exports the core domain types and, behind the `engine`
//! feature, the import sessions, storage and export entry points.

#![forbid(unsafe_code)]

pub use strata_core::{
    Address, Appearance, BatchReport, CacheKind, CommitStatus, Feature, FeatureDescriptor,
    FeatureError, ImplicitGeometry, ImportLogEntry, ImportLogger, NoopImportLogger, Property,
    PropertyValue, Reference, RowId, SurfaceData, SurfaceDataKind, SurfaceDataProperty, Transform,
    TransformParseError,
};

#[cfg(feature = "test-support")]
pub use strata_core::test_support;

#[cfg(feature = "engine")]
pub use strata_data::{
    ExportError, ExportOptions, ExportSummary, FeatureReader, HandleError, ImportError,
    ImportHandle, ImportOptions, ImportStatistics, Importer, JsonLinesReader, ReadError,
    SessionState, SessionSummary, SqliteAdapter, TransactionMode, export_features,
};
