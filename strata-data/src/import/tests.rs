//! Unit tests for the session state machine and the per-worker helper.
#![expect(clippy::panic, reason = "tests fail loudly on unexpected variants")]

use std::{num::NonZeroUsize, sync::Arc};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use strata_core::{NoopImportLogger, test_support};
use tempfile::TempDir;

use super::{
    ImportError, ImportHelper, ImportOptions, Importer, SessionState, TableRegistry,
    TransactionMode,
};
use crate::{adapter::SqliteAdapter, reference::ReferenceManager};

struct Database {
    _dir: TempDir,
    adapter: SqliteAdapter,
}

impl Database {
    fn count(&self, table: &str) -> i64 {
        self.adapter
            .connect()
            .expect("connect")
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count rows")
    }
}

#[fixture]
fn database() -> Database {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("city.db")).expect("utf-8 temp path");
    Database {
        _dir: dir,
        adapter: SqliteAdapter::new(path),
    }
}

fn single_worker() -> ImportOptions {
    ImportOptions::default().with_threads(NonZeroUsize::MIN)
}

#[rstest]
fn operations_require_a_started_session() {
    let mut importer = Importer::default();
    assert_eq!(importer.state(), SessionState::NotStarted);
    assert!(matches!(
        importer.import_feature(test_support::building("BLDG_1")),
        Err(ImportError::IllegalState {
            found: SessionState::NotStarted,
            ..
        })
    ));
    assert!(matches!(
        importer.commit_session(),
        Err(ImportError::IllegalState { .. })
    ));
    assert!(matches!(
        importer.abort_session(),
        Err(ImportError::IllegalState { .. })
    ));
}

#[rstest]
fn starting_twice_is_a_no_op(database: Database) {
    let mut importer = Importer::default();
    importer
        .start_session(&database.adapter, single_worker())
        .expect("start session");
    importer
        .start_session(&database.adapter, single_worker())
        .expect("second start is ignored");
    assert_eq!(importer.state(), SessionState::Started);
    assert!(importer.is_running());
    importer.abort_session().expect("abort");
}

#[rstest]
fn committing_again_returns_the_summary(database: Database) {
    let mut importer = Importer::default();
    importer
        .start_session(&database.adapter, single_worker())
        .expect("start session");
    let handle = importer
        .import_feature(test_support::building("BLDG_1"))
        .expect("queue feature");

    let summary = importer.commit_session().expect("commit");

    assert_eq!(handle.wait().expect("imported").object_id.as_deref(), Some("BLDG_1"));
    assert_eq!(summary.imported, 1);
    assert_eq!(importer.commit_session().expect("repeat commit"), summary);
    assert_eq!(importer.summary(), Some(&summary));
    assert!(matches!(
        importer.start_session(&database.adapter, single_worker()),
        Err(ImportError::IllegalState {
            found: SessionState::Committed,
            ..
        })
    ));
}

#[rstest]
fn dry_run_cannot_be_committed(database: Database) {
    let mut importer = Importer::default();
    importer
        .start_session(
            &database.adapter,
            single_worker().with_mode(TransactionMode::DryRun),
        )
        .expect("start session");
    importer
        .import_feature(test_support::building("BLDG_1"))
        .expect("queue feature")
        .wait()
        .expect("imported");

    assert!(matches!(
        importer.commit_session(),
        Err(ImportError::DryRunCommit)
    ));
    assert_eq!(importer.state(), SessionState::Started);

    importer.abort_session().expect("abort");
    importer.abort_session().expect("aborting twice is a no-op");
    assert_eq!(importer.state(), SessionState::Aborted);
    assert_eq!(database.count("feature"), 0);
}

#[rstest]
fn dropping_a_started_importer_aborts(database: Database) {
    let mut importer = Importer::default();
    importer
        .start_session(
            &database.adapter,
            single_worker()
                .with_mode(TransactionMode::Explicit)
                .with_batch_size(100),
        )
        .expect("start session");
    importer
        .import_feature(test_support::building("BLDG_1"))
        .expect("queue feature")
        .wait()
        .expect("staged");

    drop(importer);

    assert_eq!(database.count("feature"), 0);
}

#[rstest]
fn failed_start_leaves_the_importer_idle() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let missing = Utf8PathBuf::from_path_buf(dir.path().join("missing").join("city.db"))
        .expect("utf-8 temp path");
    let mut importer = Importer::default();

    let result = importer.start_session(&SqliteAdapter::new(missing), single_worker());

    assert!(matches!(result, Err(ImportError::Adapter(_))));
    assert_eq!(importer.state(), SessionState::NotStarted);
}

#[rstest]
fn rejected_features_are_skipped_without_fail_fast(database: Database) {
    let mut importer = Importer::default();
    importer
        .start_session(&database.adapter, single_worker())
        .expect("start session");
    let rejected = importer
        .import_feature(strata_core::Feature::new(""))
        .expect("queue feature");
    let accepted = importer
        .import_feature(test_support::building("BLDG_1"))
        .expect("queue feature");

    let summary = importer.commit_session().expect("commit");

    assert!(rejected.wait().is_err());
    assert!(accepted.wait().is_ok());
    assert_eq!((summary.imported, summary.failed), (1, 1));
    assert_eq!(database.count("feature"), 1);
}

#[rstest]
fn helper_flushes_at_the_batch_size(database: Database) {
    let connection = database.adapter.initialise().expect("initialise");
    let references = ReferenceManager::create(None).expect("reference manager");
    let mut helper = ImportHelper::new(
        0,
        connection,
        TableRegistry::new().instantiate(),
        references.cache(),
        Arc::new(NoopImportLogger),
        &single_worker().with_batch_size(2),
        database.adapter.max_batch_size(),
    );

    helper
        .import(test_support::building("BLDG_1"))
        .expect("stage first feature");
    assert_eq!(helper.pending_features(), 1);
    assert_eq!(database.count("feature"), 0);

    helper
        .import(test_support::building("BLDG_2"))
        .expect("stage second feature");
    assert_eq!(helper.pending_features(), 0);
    assert_eq!(database.count("feature"), 2);

    helper.close().expect("close helper");
    references.discard().expect("discard references");
}

#[rstest]
fn helper_leaves_no_rows_for_invalid_features(database: Database) {
    let connection = database.adapter.initialise().expect("initialise");
    let references = ReferenceManager::create(None).expect("reference manager");
    let mut helper = ImportHelper::new(
        0,
        connection,
        TableRegistry::new().instantiate(),
        references.cache(),
        Arc::new(NoopImportLogger),
        &single_worker(),
        database.adapter.max_batch_size(),
    );
    let broken = test_support::building_with_part("BLDG_1", "");

    match helper.import(broken) {
        Err(error) => assert!(error.is_feature_local()),
        Ok(descriptor) => panic!("expected rejection, got {descriptor:?}"),
    }
    helper.execute_batch(true, true).expect("flush");

    assert_eq!(database.count("feature"), 0);
    helper.close().expect("close helper");
    references.discard().expect("discard references");
}
