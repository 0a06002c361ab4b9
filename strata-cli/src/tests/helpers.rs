//! Test helpers for composing feature files and layered overrides.

use super::*;
use crate::import::{ImportArgs, ImportConfig};
use camino::Utf8PathBuf;
use std::fs;
use strata_core::{Feature, test_support};
use tempfile::TempDir;

#[derive(Debug, Clone, Default)]
pub(super) struct LayerOverrides {
    pub(super) input: Option<Utf8PathBuf>,
    pub(super) database: Option<Utf8PathBuf>,
    pub(super) threads: Option<usize>,
    pub(super) mode: Option<String>,
}

/// Feature files and a database path inside one temporary directory.
#[derive(Debug)]
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        let workspace = Self { _dir: dir, root };
        for name in ["cli.jsonl", "config.jsonl", "env.jsonl"] {
            workspace.write_features(name, &sample_features());
        }
        workspace
    }

    pub(super) fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub(super) fn write_features(&self, name: &str, features: &[Feature]) -> Utf8PathBuf {
        let path = self.path(name);
        let contents: String = features
            .iter()
            .map(|feature| serde_json::to_string(feature).expect("encode feature") + "\n")
            .collect();
        fs::write(&path, contents).expect("write feature file");
        path
    }
}

pub(super) fn sample_features() -> Vec<Feature> {
    vec![
        test_support::building_referencing("BLDG_1", "BLDG_2"),
        test_support::building_with_part("BLDG_2", "PART_1"),
    ]
}

pub(super) fn import_config(input: Utf8PathBuf, database: Utf8PathBuf) -> ImportConfig {
    ImportArgs {
        input: Some(input),
        database: Some(database),
        threads: Some(2),
        ..ImportArgs::default()
    }
    .try_into()
    .expect("valid import arguments")
}

/// Apply file and environment layers the way configuration merging does:
/// CLI values win over environment values, which win over file values.
pub(super) fn merge_layers(
    mut cli_args: ImportArgs,
    file_layer: Option<LayerOverrides>,
    env_layer: Option<LayerOverrides>,
) -> Result<ImportConfig, CliError> {
    merge_field(
        &mut cli_args.input,
        extract_field(&env_layer, |layer| &layer.input),
        extract_field(&file_layer, |layer| &layer.input),
    );
    merge_field(
        &mut cli_args.database,
        extract_field(&env_layer, |layer| &layer.database),
        extract_field(&file_layer, |layer| &layer.database),
    );
    merge_field(
        &mut cli_args.threads,
        extract_field(&env_layer, |layer| &layer.threads),
        extract_field(&file_layer, |layer| &layer.threads),
    );
    merge_field(
        &mut cli_args.mode,
        extract_field(&env_layer, |layer| &layer.mode),
        extract_field(&file_layer, |layer| &layer.mode),
    );
    let config = ImportConfig::try_from(cli_args)?;
    config.validate_sources()?;
    Ok(config)
}

fn merge_field<T: Clone>(target: &mut Option<T>, env_value: Option<T>, file_value: Option<T>) {
    if target.is_none()
        && let Some(value) = env_value.or(file_value)
    {
        *target = Some(value);
    }
}

fn extract_field<T: Clone>(
    layer: &Option<LayerOverrides>,
    accessor: fn(&LayerOverrides) -> &Option<T>,
) -> Option<T> {
    layer.as_ref().and_then(|entry| accessor(entry).clone())
}
