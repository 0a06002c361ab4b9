//! Core domain types for the Strata import engine.
//!
//! The crate models the feature graphs handed over by format readers and the
//! records the engine emits once they are persisted. It has no knowledge of
//! databases; `strata-data` owns persistence.

pub mod cache_kind;
pub mod descriptor;
pub mod feature;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transform;

pub use cache_kind::CacheKind;
pub use descriptor::{
    BatchReport, CommitStatus, FeatureDescriptor, ImportLogEntry, ImportLogger, NoopImportLogger,
    RowId,
};
pub use feature::{
    Address, Appearance, Feature, FeatureError, ImplicitGeometry, Property, PropertyValue,
    Reference, SurfaceData, SurfaceDataKind, SurfaceDataProperty,
};
pub use transform::{Transform, TransformParseError};
