//! Import command implementation for the Strata CLI.

use std::{fmt, num::NonZeroUsize, sync::Arc};

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use strata_core::{ImportLogger, Transform};
use strata_data::{
    FeatureReader, ImportOptions, ImportStatistics, Importer, JsonLinesReader, SessionSummary,
    SqliteAdapter, StatisticsReport, TransactionMode,
};

use crate::{
    ARG_BATCH_SIZE, ARG_DATABASE, ARG_FAIL_FAST, ARG_INPUT, ARG_MODE, ARG_QUEUE_SIZE,
    ARG_SEQUENCE_BLOCK_SIZE, ARG_TEMP_DIR, ARG_THREADS, ARG_TRANSFORM, CliError,
    ENV_IMPORT_INPUT, default_database, require_existing, required,
};

/// CLI arguments for the `import` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Import newline-delimited JSON features into a SQLite feature \
                 database. Options can come from CLI flags, configuration \
                 files, or environment variables.",
    about = "Import features into a database"
)]
#[ortho_config(prefix = "STRATA")]
pub(crate) struct ImportArgs {
    /// Newline-delimited JSON file holding one feature per line.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
    /// Target database; created when missing.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Number of import workers (defaults to the available parallelism).
    #[arg(long = ARG_THREADS, value_name = "count")]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
    /// Feature hierarchies per batch transaction.
    #[arg(long = ARG_BATCH_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
    /// Capacity of the job queue.
    #[arg(long = ARG_QUEUE_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) queue_size: Option<usize>,
    /// Ids reserved per sequence round trip.
    #[arg(long = ARG_SEQUENCE_BLOCK_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) sequence_block_size: Option<u32>,
    /// Stop at the first rejected feature or dangling reference.
    #[arg(
        long = ARG_FAIL_FAST,
        value_name = "bool",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    #[serde(default)]
    pub(crate) fail_fast: Option<bool>,
    /// Transaction mode: normal, dry-run or explicit.
    #[arg(long = ARG_MODE, value_name = "mode")]
    #[serde(default)]
    pub(crate) mode: Option<String>,
    /// Directory for the temporary reference cache.
    #[arg(long = ARG_TEMP_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) temp_dir: Option<Utf8PathBuf>,
    /// Affine transform applied to geometries: "a,b,xoff,d,e,yoff".
    #[arg(long = ARG_TRANSFORM, value_name = "coefficients")]
    #[serde(default)]
    pub(crate) transform: Option<String>,
}

impl ImportArgs {
    pub(crate) fn into_config(self) -> Result<ImportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ImportConfig::try_from(merged)
    }
}

/// Resolved `import` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImportConfig {
    pub(crate) input: Utf8PathBuf,
    pub(crate) database: Utf8PathBuf,
    pub(crate) options: ImportOptions,
}

impl ImportConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.input, ARG_INPUT)
    }
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let input = required(args.input, ARG_INPUT, ENV_IMPORT_INPUT)?;
        let mut options = ImportOptions::default();
        if let Some(threads) = args.threads {
            options = options.with_threads(non_zero(threads, ARG_THREADS)?);
        }
        if let Some(batch_size) = args.batch_size {
            options = options.with_batch_size(non_zero(batch_size, ARG_BATCH_SIZE)?.get());
        }
        if let Some(queue_size) = args.queue_size {
            options = options.with_queue_size(non_zero(queue_size, ARG_QUEUE_SIZE)?);
        }
        if let Some(block_size) = args.sequence_block_size {
            if block_size == 0 {
                return Err(CliError::ZeroValue {
                    field: ARG_SEQUENCE_BLOCK_SIZE,
                });
            }
            options = options.with_sequence_block_size(block_size);
        }
        if let Some(mode) = args.mode.as_deref() {
            options = options.with_mode(parse_mode(mode)?);
        }
        if let Some(temp_dir) = args.temp_dir {
            options = options.with_temp_dir(temp_dir);
        }
        if let Some(transform) = args.transform.as_deref() {
            options = options.with_transform(transform.parse::<Transform>()?);
        }
        Ok(Self {
            input,
            database: args.database.unwrap_or_else(default_database),
            options: options.with_fail_fast(args.fail_fast.unwrap_or(false)),
        })
    }
}

fn non_zero(value: usize, field: &'static str) -> Result<NonZeroUsize, CliError> {
    NonZeroUsize::new(value).ok_or(CliError::ZeroValue { field })
}

pub(crate) fn parse_mode(value: &str) -> Result<TransactionMode, CliError> {
    match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "normal" => Ok(TransactionMode::Normal),
        "dry-run" => Ok(TransactionMode::DryRun),
        "explicit" => Ok(TransactionMode::Explicit),
        _ => Err(CliError::InvalidMode {
            value: value.to_owned(),
        }),
    }
}

/// Outcome of an `import` run.
#[derive(Debug, Clone)]
pub(crate) struct ImportReport {
    /// `None` for dry runs, which are rolled back instead of committed.
    pub(crate) summary: Option<SessionSummary>,
    pub(crate) statistics: StatisticsReport,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.statistics)?;
        match &self.summary {
            Some(summary) => write!(
                f,
                "Session committed: {} imported, {} failed, {} cancelled, \
                 {} reference(s) resolved, {} dangling",
                summary.imported,
                summary.failed,
                summary.cancelled,
                summary.references_resolved,
                summary.dangling_references.len()
            ),
            None => write!(f, "Dry run: all changes rolled back"),
        }
    }
}

/// Stream every feature of `config.input` through one import session.
///
/// A read error aborts the session. Dry runs are aborted once the input is
/// exhausted.
pub(crate) fn run_import(config: &ImportConfig) -> Result<ImportReport, CliError> {
    let mut reader = JsonLinesReader::open(&config.input)?;
    let statistics = Arc::new(ImportStatistics::new());
    let logger: Arc<dyn ImportLogger> = statistics.clone();
    let mut importer = Importer::new(logger);
    importer.start_session(&SqliteAdapter::new(config.database.clone()), config.options.clone())?;

    loop {
        let feature = match reader.next_feature() {
            Ok(Some(feature)) => feature,
            Ok(None) => break,
            Err(error) => {
                importer.abort_session()?;
                return Err(error.into());
            }
        };
        let handle = importer.import_feature(feature)?;
        if handle.is_cancelled() {
            log::warn!("import session stopped; no further features are read");
            reader.cancel();
        }
    }

    let summary = if config.options.mode == TransactionMode::DryRun {
        importer.abort_session()?;
        None
    } else {
        Some(importer.commit_session()?)
    };
    Ok(ImportReport {
        summary,
        statistics: statistics.report(),
    })
}
