//! Shared helpers for the import engine integration tests.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use camino::Utf8PathBuf;
use rusqlite::{Connection, Error as SqliteError, Transaction};
use strata_core::Feature;
use strata_data::{
    ImportError, ImportHandle, ImportOptions, Importer, SessionSummary, SqliteAdapter, Table,
    import::{BufferedTableImporter, Row, TableImporter, TableImporterFactory},
};
use tempfile::TempDir;

/// A scratch database that lives as long as the value.
pub struct TestDatabase {
    _dir: TempDir,
    pub adapter: SqliteAdapter,
}

impl TestDatabase {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("create temp dir: {err}"));
        let path = Utf8PathBuf::from_path_buf(dir.path().join("city.db"))
            .unwrap_or_else(|path| panic!("non UTF-8 temp path {path:?}"));
        Self {
            _dir: dir,
            adapter: SqliteAdapter::new(path),
        }
    }

    pub fn connection(&self) -> Connection {
        self.adapter
            .connect()
            .unwrap_or_else(|err| panic!("connect to test database: {err}"))
    }

    pub fn count(&self, table: &str) -> i64 {
        self.connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap_or_else(|err| panic!("count rows in {table}: {err}"))
    }

    /// Reference properties as `(expected target, object id actually linked)`.
    pub fn feature_links(&self) -> Vec<(String, Option<String>)> {
        let connection = self.connection();
        let mut statement = connection
            .prepare(
                "SELECT p.val_reference, f.objectid FROM property p \
                 LEFT JOIN feature f ON f.id = p.val_feature_id \
                 WHERE p.val_relation_type = 0 AND p.val_reference_kind = 'feature' \
                 ORDER BY p.id",
            )
            .unwrap_or_else(|err| panic!("prepare link query: {err}"));
        statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .and_then(Iterator::collect)
            .unwrap_or_else(|err| panic!("read links: {err}"))
    }
}

pub fn options(threads: usize) -> ImportOptions {
    let threads = NonZeroUsize::new(threads).unwrap_or(NonZeroUsize::MIN);
    ImportOptions::default().with_threads(threads)
}

/// Import `features` in one session and commit it.
pub fn import_all(
    database: &TestDatabase,
    options: ImportOptions,
    features: impl IntoIterator<Item = Feature>,
) -> Result<SessionSummary, ImportError> {
    let mut importer = Importer::default();
    importer.start_session(&database.adapter, options)?;
    let handles = features
        .into_iter()
        .map(|feature| importer.import_feature(feature))
        .collect::<Result<Vec<ImportHandle>, _>>()?;
    let summary = importer.commit_session();
    drop(handles);
    summary
}

/// Table importer that counts the batches it executes.
pub struct CountingImporter {
    inner: BufferedTableImporter,
    batches: Arc<AtomicUsize>,
}

impl CountingImporter {
    /// Factory sharing `batches` between every worker's importer.
    pub fn factory(batches: &Arc<AtomicUsize>) -> TableImporterFactory {
        let batches = Arc::clone(batches);
        Arc::new(move |table: Table| -> Box<dyn TableImporter> {
            Box::new(Self {
                inner: BufferedTableImporter::new(table),
                batches: Arc::clone(&batches),
            })
        })
    }

    pub fn count(batches: &Arc<AtomicUsize>) -> usize {
        batches.load(Ordering::SeqCst)
    }
}

impl TableImporter for CountingImporter {
    fn table(&self) -> Table {
        self.inner.table()
    }

    fn add_row(&mut self, row: Row) {
        self.inner.add_row(row);
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }

    fn execute_batch(&mut self, transaction: &Transaction<'_>) -> Result<usize, SqliteError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.execute_batch(transaction)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }
}

/// Table importer that counts the rows staged into it.
pub struct StagingCounter {
    inner: BufferedTableImporter,
    rows: Arc<AtomicUsize>,
}

impl StagingCounter {
    /// Factory sharing `rows` between every worker's importer.
    pub fn factory(rows: &Arc<AtomicUsize>) -> TableImporterFactory {
        let rows = Arc::clone(rows);
        Arc::new(move |table: Table| -> Box<dyn TableImporter> {
            Box::new(Self {
                inner: BufferedTableImporter::new(table),
                rows: Arc::clone(&rows),
            })
        })
    }
}

impl TableImporter for StagingCounter {
    fn table(&self) -> Table {
        self.inner.table()
    }

    fn add_row(&mut self, row: Row) {
        self.rows.fetch_add(1, Ordering::SeqCst);
        self.inner.add_row(row);
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }

    fn execute_batch(&mut self, transaction: &Transaction<'_>) -> Result<usize, SqliteError> {
        self.inner.execute_batch(transaction)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }
}

/// Table importer whose `failing_batch`-th batch fails, counted across workers.
pub struct FailingImporter {
    inner: BufferedTableImporter,
    batches: Arc<AtomicUsize>,
    failing_batch: usize,
}

impl FailingImporter {
    pub fn factory(failing_batch: usize) -> TableImporterFactory {
        let batches = Arc::new(AtomicUsize::new(0));
        Arc::new(move |table: Table| -> Box<dyn TableImporter> {
            Box::new(Self {
                inner: BufferedTableImporter::new(table),
                batches: Arc::clone(&batches),
                failing_batch,
            })
        })
    }
}

impl TableImporter for FailingImporter {
    fn table(&self) -> Table {
        self.inner.table()
    }

    fn add_row(&mut self, row: Row) {
        self.inner.add_row(row);
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }

    fn execute_batch(&mut self, transaction: &Transaction<'_>) -> Result<usize, SqliteError> {
        let batch = self.batches.fetch_add(1, Ordering::SeqCst) + 1;
        if batch == self.failing_batch {
            self.inner.clear();
            return Err(SqliteError::InvalidQuery);
        }
        self.inner.execute_batch(transaction)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }
}
