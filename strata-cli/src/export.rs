//! Export command implementation for the Strata CLI.

use std::io::{BufWriter, Write};

use camino::Utf8PathBuf;
use cap_std::fs_utf8::File;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use strata_data::{ExportOptions, ExportSummary, SqliteAdapter, export_features};

use crate::{ARG_DATABASE, ARG_FEATURE_TYPE, ARG_OUTPUT, CliError, default_database, require_existing};

/// CLI arguments for the `export` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Write every top-level feature stored in a database as one \
                 JSON object per line, to a file or standard output.",
    about = "Export features from a database"
)]
#[ortho_config(prefix = "STRATA")]
pub(crate) struct ExportArgs {
    /// Database to export from.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Output file; standard output when omitted.
    #[arg(long = ARG_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Only export features of this type.
    #[arg(long = ARG_FEATURE_TYPE, value_name = "type")]
    #[serde(default)]
    pub(crate) feature_type: Option<String>,
}

impl ExportArgs {
    pub(crate) fn into_config(self) -> Result<ExportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        Ok(ExportConfig::from(merged))
    }
}

/// Resolved `export` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExportConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) output: Option<Utf8PathBuf>,
    pub(crate) options: ExportOptions,
}

impl ExportConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.database, ARG_DATABASE)
    }
}

impl From<ExportArgs> for ExportConfig {
    fn from(args: ExportArgs) -> Self {
        Self {
            database: args.database.unwrap_or_else(default_database),
            output: args.output,
            options: ExportOptions {
                feature_type: args.feature_type,
            },
        }
    }
}

/// Export to `config.output`, or to `stdout` when no output file is set.
pub(crate) fn run_export<W: Write>(
    config: &ExportConfig,
    stdout: W,
) -> Result<ExportSummary, CliError> {
    let connection = SqliteAdapter::new(config.database.clone())
        .connect()
        .map_err(|source| CliError::OpenDatabase {
            path: config.database.clone(),
            source,
        })?;
    let summary = match &config.output {
        Some(path) => {
            let file: File =
                strata_fs::create_file(path).map_err(|source| CliError::CreateOutput {
                    path: path.clone(),
                    source,
                })?;
            export_features(&connection, BufWriter::new(file), &config.options)?
        }
        None => export_features(&connection, stdout, &config.options)?,
    };
    Ok(summary)
}
