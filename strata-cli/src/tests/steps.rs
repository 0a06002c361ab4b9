//! Behaviour-driven step definitions driving the import CLI scenarios.

use super::helpers::{LayerOverrides, Workspace, merge_layers};
use super::*;
use crate::import::{ImportConfig, ImportReport, run_import};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;
use strata_data::TransactionMode;

/// Aggregates import CLI scenario state so each step only needs a single world
/// argument.
#[derive(Debug)]
struct ImportWorld {
    workspace: Workspace,
    cli_args: RefCell<Vec<String>>,
    cli_result: RefCell<Option<Result<ImportConfig, CliError>>>,
    report: RefCell<Option<Result<ImportReport, CliError>>>,
    config_layer: RefCell<Option<LayerOverrides>>,
    env_layer: RefCell<Option<LayerOverrides>>,
}

impl ImportWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::new(),
            cli_args: RefCell::new(Vec::new()),
            cli_result: RefCell::new(None),
            report: RefCell::new(None),
            config_layer: RefCell::new(None),
            env_layer: RefCell::new(None),
        }
    }

    fn config(&self) -> ImportConfig {
        self.cli_result
            .borrow()
            .as_ref()
            .expect("result recorded")
            .as_ref()
            .expect("expected success")
            .clone()
    }
}

#[fixture]
fn world() -> ImportWorld {
    ImportWorld::new()
}

#[given("a feature file exists on disk")]
fn feature_file_exists(#[from(world)] world: &ImportWorld) {
    assert!(
        world.workspace.path("cli.jsonl").exists(),
        "expected the feature file to exist on disk",
    );
}

#[given("I pass the feature file and two threads with CLI flags")]
fn cli_provides_input(#[from(world)] world: &ImportWorld) {
    let workspace = &world.workspace;
    world.cli_args.borrow_mut().extend([
        workspace.path("cli.jsonl").into_string(),
        format!("--{ARG_DATABASE}"),
        workspace.path("city.db").into_string(),
        format!("--{ARG_THREADS}"),
        "2".to_owned(),
    ]);
}

#[given("I omit all import configuration")]
fn omit_configuration(#[from(world)] world: &ImportWorld) {
    world.cli_args.borrow_mut().clear();
    *world.config_layer.borrow_mut() = None;
    *world.env_layer.borrow_mut() = None;
}

#[given("the input and mode are provided via a config file")]
fn provided_via_config(#[from(world)] world: &ImportWorld) {
    *world.config_layer.borrow_mut() = Some(LayerOverrides {
        input: Some(world.workspace.path("config.jsonl")),
        threads: Some(8),
        mode: Some("explicit".to_owned()),
        ..LayerOverrides::default()
    });
}

#[given("the mode is overridden via environment variables")]
fn mode_overridden_by_env(#[from(world)] world: &ImportWorld) {
    *world.env_layer.borrow_mut() = Some(LayerOverrides {
        mode: Some("dry-run".to_owned()),
        ..LayerOverrides::default()
    });
}

#[when("I configure the import command")]
fn configure_import(#[from(world)] world: &ImportWorld) {
    let mut invocation = vec!["strata".to_owned(), "import".to_owned()];
    invocation.extend(world.cli_args.borrow().iter().cloned());
    let file_layer = world.config_layer.borrow().clone();
    let env_layer = world.env_layer.borrow().clone();
    let outcome = Cli::try_parse_from(invocation)
        .map_err(CliError::ArgumentParsing)
        .and_then(|cli| match cli.command {
            Command::Import(args) => merge_layers(args, file_layer, env_layer),
            Command::Export(_) => panic!("expected the import command"),
        });
    world.cli_result.replace(Some(outcome));
}

#[when("I run the configured import")]
fn run_configured_import(#[from(world)] world: &ImportWorld) {
    let outcome = run_import(&world.config());
    world.report.replace(Some(outcome));
}

#[then("the import plan uses the CLI-provided values")]
fn plan_uses_cli_values(#[from(world)] world: &ImportWorld) {
    let config = world.config();
    assert_eq!(config.input, world.workspace.path("cli.jsonl"));
    assert_eq!(config.database, world.workspace.path("city.db"));
    assert_eq!(config.options.worker_count(), 2);
    assert_eq!(config.options.mode, TransactionMode::Normal);
}

#[then("the CLI reports that the \"input\" argument is missing")]
fn reports_missing_input(#[from(world)] world: &ImportWorld) {
    let borrowed = world.cli_result.borrow();
    let error = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::MissingArgument { field, .. } => assert_eq!(*field, ARG_INPUT),
        other => panic!("unexpected error {other:?}"),
    }
}

#[then("CLI and environment layers override configuration defaults")]
fn precedence_holds(#[from(world)] world: &ImportWorld) {
    let config = world.config();
    assert_eq!(config.input, world.workspace.path("cli.jsonl"));
    assert_eq!(config.options.worker_count(), 2);
    assert_eq!(config.options.mode, TransactionMode::DryRun);
}

#[then("every feature in the file is committed")]
fn features_committed(#[from(world)] world: &ImportWorld) {
    let borrowed = world.report.borrow();
    let report = borrowed
        .as_ref()
        .expect("import attempted")
        .as_ref()
        .expect("expected a successful import");
    let summary = report.summary.as_ref().expect("committed session");
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.references_resolved, 1);
    assert!(report.to_string().contains("Building: 2 committed"));
}

macro_rules! register_import_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/import_command.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: ImportWorld) {
            let _ = world;
        }
    };
}

register_import_scenario!(cli_flag_selection, "configuring an import with CLI flags");
register_import_scenario!(rejecting_missing_input, "rejecting an import without input");
register_import_scenario!(
    layering_cli_config_env,
    "layering CLI, config file, and environment values"
);
register_import_scenario!(importing_feature_file, "importing a feature file");
