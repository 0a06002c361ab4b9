//! Command-line interface for the Strata import engine.
#![forbid(unsafe_code)]

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod error;
mod export;
mod import;

pub use error::CliError;

use export::{ExportArgs, ExportConfig};
use import::{ImportArgs, ImportConfig};

pub(crate) const ARG_INPUT: &str = "input";
pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_THREADS: &str = "threads";
pub(crate) const ARG_BATCH_SIZE: &str = "batch-size";
pub(crate) const ARG_QUEUE_SIZE: &str = "queue-size";
pub(crate) const ARG_SEQUENCE_BLOCK_SIZE: &str = "sequence-block-size";
pub(crate) const ARG_FAIL_FAST: &str = "fail-fast";
pub(crate) const ARG_MODE: &str = "mode";
pub(crate) const ARG_TEMP_DIR: &str = "temp-dir";
pub(crate) const ARG_TRANSFORM: &str = "transform";
pub(crate) const ARG_OUTPUT: &str = "output";
pub(crate) const ARG_FEATURE_TYPE: &str = "feature-type";
pub(crate) const ENV_IMPORT_INPUT: &str = "STRATA_CMDS_IMPORT_INPUT";

/// Environment variable holding the log filter directives.
pub const ENV_LOG: &str = "STRATA_LOG";

/// Run the Strata CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    init_logging();
    let mut stdout = io::stdout().lock();
    match cli.command {
        Command::Import(args) => {
            let config = resolve_import_config(args)?;
            let report = import::run_import(&config)?;
            writeln!(stdout, "{report}").map_err(CliError::WriteReport)?;
        }
        Command::Export(args) => {
            let config = resolve_export_config(args)?;
            let summary = export::run_export(&config, &mut stdout)?;
            log::info!("exported {} feature(s)", summary.features);
        }
    }
    Ok(())
}

/// Install the log formatter; `STRATA_LOG` overrides the default `info` filter.
///
/// Records emitted through the `log` facade by the library crates are
/// captured as well. Installing twice is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .is_err()
    {
        log::debug!("log subscriber already installed");
    }
}

fn resolve_import_config(args: ImportArgs) -> Result<ImportConfig, CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    Ok(config)
}

fn resolve_export_config(args: ExportArgs) -> Result<ExportConfig, CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    Ok(config)
}

/// Check that `path` names an existing regular file.
pub(crate) fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match strata_fs::is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::SourcePathNotFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub(crate) fn required<T>(
    value: Option<T>,
    field: &'static str,
    env: &'static str,
) -> Result<T, CliError> {
    value.ok_or(CliError::MissingArgument { field, env })
}

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    about = "Import feature graphs into a Strata database and export them again",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import newline-delimited JSON features into a database.
    Import(ImportArgs),
    /// Export the features stored in a database as newline-delimited JSON.
    Export(ExportArgs),
}

/// Default database file name used when none is configured.
pub(crate) fn default_database() -> Utf8PathBuf {
    Utf8PathBuf::from("strata.db")
}

#[cfg(test)]
mod tests;
