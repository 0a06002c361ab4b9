//! Connections to the target feature database.
#![forbid(unsafe_code)]

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, Error as SqliteError};
use thiserror::Error;

use crate::schema::{SchemaError, initialise_schema};

/// Default time a connection waits for a competing writer.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest number of feature hierarchies a single batch may carry.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Errors raised while connecting to the target database.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Failed to open the database file.
    #[error("failed to open database at {path}")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: SqliteError,
    },
    /// Failed to apply a connection pragma.
    #[error("failed to {operation} on database at {path}")]
    Pragma {
        operation: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: SqliteError,
    },
    /// Failed to create or verify the schema.
    #[error("failed to prepare schema in {path}")]
    Schema {
        path: Utf8PathBuf,
        #[source]
        source: SchemaError,
    },
}

/// Describes how to reach a SQLite feature database.
///
/// Every import worker opens its own connection through [`connect`], so the
/// database must live in a file; in-memory databases are private to one
/// connection.
///
/// [`connect`]: SqliteAdapter::connect
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
/// use strata_data::SqliteAdapter;
///
/// let adapter = SqliteAdapter::new("city.db")
///     .with_busy_timeout(Duration::from_secs(5))
///     .with_max_batch_size(500);
/// assert_eq!(adapter.max_batch_size(), 500);
/// let connection = adapter.connect().expect("open database");
/// # drop(connection);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteAdapter {
    path: Utf8PathBuf,
    busy_timeout: Duration,
    max_batch_size: usize,
}

impl SqliteAdapter {
    /// Target the database file at `path`. The file is created on first connect.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Cap the batch size. Zero is treated as one.
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Open a connection with foreign keys, WAL journaling and the busy timeout.
    pub fn connect(&self) -> Result<Connection, AdapterError> {
        let connection = Connection::open(self.path.as_std_path()).map_err(|source| {
            AdapterError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        connection
            .busy_timeout(self.busy_timeout)
            .map_err(|source| self.pragma_error("set busy timeout", source))?;
        connection
            .pragma_update(None, "foreign_keys", true)
            .map_err(|source| self.pragma_error("enable foreign keys", source))?;
        connection
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|source| self.pragma_error("enable WAL journal", source))?;
        Ok(connection)
    }

    /// Connect and create the schema when missing.
    pub fn initialise(&self) -> Result<Connection, AdapterError> {
        let mut connection = self.connect()?;
        initialise_schema(&mut connection).map_err(|source| AdapterError::Schema {
            path: self.path.clone(),
            source,
        })?;
        Ok(connection)
    }

    fn pragma_error(&self, operation: &'static str, source: SqliteError) -> AdapterError {
        AdapterError::Pragma {
            operation,
            path: self.path.clone(),
            source,
        }
    }
}
