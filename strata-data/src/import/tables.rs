//! Per-table importers and the registry that builds them.

use std::{collections::BTreeMap, fmt, sync::Arc};

use rusqlite::{Error as SqliteError, Transaction, params_from_iter, types::Value};

use crate::schema::{COMMIT_ORDER, Table};

/// One row of column values, in [`Table::columns`] order.
pub type Row = Vec<Value>;

/// Buffers rows for one table and writes them inside a batch transaction.
///
/// Implementations never touch the database outside
/// [`execute_batch`](TableImporter::execute_batch).
pub trait TableImporter: Send {
    /// Table this importer writes to.
    fn table(&self) -> Table;

    /// Buffer a row for the next batch.
    fn add_row(&mut self, row: Row);

    /// Number of buffered rows.
    fn pending(&self) -> usize;

    /// Insert every buffered row using `transaction` and empty the buffer.
    ///
    /// Returns the number of rows written.
    fn execute_batch(&mut self, transaction: &Transaction<'_>) -> Result<usize, SqliteError>;

    /// Drop buffered rows without writing them.
    fn clear(&mut self);

    /// Release resources. Called once when the owning worker shuts down.
    fn close(&mut self) {
        self.clear();
    }
}

/// Default importer: buffers rows in memory and inserts them with a cached statement.
#[derive(Debug)]
pub struct BufferedTableImporter {
    table: Table,
    sql: String,
    rows: Vec<Row>,
}

impl BufferedTableImporter {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            sql: table.insert_sql(),
            rows: Vec::new(),
        }
    }
}

impl TableImporter for BufferedTableImporter {
    fn table(&self) -> Table {
        self.table
    }

    fn add_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    fn pending(&self) -> usize {
        self.rows.len()
    }

    fn execute_batch(&mut self, transaction: &Transaction<'_>) -> Result<usize, SqliteError> {
        let mut statement = transaction.prepare_cached(&self.sql)?;
        let mut written = 0;
        for row in self.rows.drain(..) {
            written += statement.execute(params_from_iter(row))?;
        }
        Ok(written)
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Builds a fresh importer for a table.
pub type TableImporterFactory = Arc<dyn Fn(Table) -> Box<dyn TableImporter> + Send + Sync>;

/// Maps every table to the factory used to build its importer.
///
/// The registry is consulted once per worker when a session starts. Tables
/// without an explicit registration use [`BufferedTableImporter`].
#[derive(Clone, Default)]
pub struct TableRegistry {
    overrides: BTreeMap<Table, TableImporterFactory>,
}

impl fmt::Debug for TableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRegistry")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `factory` for `table` instead of the buffered default.
    pub fn register(&mut self, table: Table, factory: TableImporterFactory) {
        self.overrides.insert(table, factory);
    }

    /// Build one importer per table, in commit order.
    pub fn instantiate(&self) -> TableSet {
        let importers = COMMIT_ORDER
            .iter()
            .map(|&table| -> Box<dyn TableImporter> {
                match self.overrides.get(&table) {
                    Some(factory) => factory(table),
                    None => Box::new(BufferedTableImporter::new(table)),
                }
            })
            .collect();
        TableSet { importers }
    }
}

/// A worker's importers, one per table, held in commit order.
pub struct TableSet {
    importers: Vec<Box<dyn TableImporter>>,
}

impl fmt::Debug for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSet")
            .field("pending_rows", &self.pending_rows())
            .finish()
    }
}

impl TableSet {
    pub fn add_row(&mut self, table: Table, row: Row) {
        if let Some(importer) = self
            .importers
            .iter_mut()
            .find(|importer| importer.table() == table)
        {
            importer.add_row(row);
        }
    }

    pub fn pending_rows(&self) -> usize {
        self.importers.iter().map(|importer| importer.pending()).sum()
    }

    /// Execute every importer in commit order inside `transaction`.
    pub fn execute(&mut self, transaction: &Transaction<'_>) -> Result<usize, (Table, SqliteError)> {
        let mut written = 0;
        for importer in &mut self.importers {
            written += importer
                .execute_batch(transaction)
                .map_err(|source| (importer.table(), source))?;
        }
        Ok(written)
    }

    pub fn clear(&mut self) {
        for importer in &mut self.importers {
            importer.clear();
        }
    }
}

impl Drop for TableSet {
    fn drop(&mut self) {
        for importer in &mut self.importers {
            importer.close();
        }
    }
}
