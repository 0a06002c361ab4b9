//! Error types emitted by the Strata CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use strata_core::TransformParseError;
use strata_data::{ExportError, ImportError, ReadError};
use thiserror::Error;

/// Errors emitted by the Strata CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// A numeric option was zero.
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    /// The transaction mode is not one of the known names.
    #[error("unknown transaction mode {value:?} (expected normal, dry-run or explicit)")]
    InvalidMode { value: String },
    /// The affine transform could not be parsed.
    #[error("invalid transform: {0}")]
    InvalidTransform(#[from] TransformParseError),
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Reading the feature input failed.
    #[error("failed to read features: {0}")]
    Read(#[from] ReadError),
    /// The import session failed.
    #[error("import failed: {0}")]
    Import(#[from] ImportError),
    /// Connecting to the database for export failed.
    #[error("failed to open database {path:?}: {source}")]
    OpenDatabase {
        path: Utf8PathBuf,
        #[source]
        source: strata_data::AdapterError,
    },
    /// Creating the export output file failed.
    #[error("failed to create output file {path:?}: {source}")]
    CreateOutput {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Exporting features failed.
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    /// Writing the command report failed.
    #[error("failed to write report: {0}")]
    WriteReport(#[source] std::io::Error),
}
