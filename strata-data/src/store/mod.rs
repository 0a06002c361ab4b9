//! Disk-backed named maps used to hold reference caches.
//!
//! A [`DiskStore`] is a throwaway SQLite database living in a named
//! temporary file. Each [`DiskMap`] is one table keyed by text. The store is
//! shared by every import worker; a single mutex-guarded connection
//! serializes access so `put_if_absent` is atomic across workers.
#![forbid(unsafe_code)]

use std::{
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, Error as SqliteError, OptionalExtension, params};
use serde::{Serialize, de::DeserializeOwned};
use tempfile::{Builder, TempPath};
use thiserror::Error;

const FILE_PREFIX: &str = "strata-cache-";
const FILE_SUFFIX: &str = ".db";

/// Errors raised by the disk-backed store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured temp directory could not be created or used.
    #[error("temporary storage at {path} is unavailable")]
    TempDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The backing temp file could not be created.
    #[error("failed to create temporary cache file")]
    TempFile {
        #[source]
        source: io::Error,
    },
    /// Opening the backing database failed.
    #[error("failed to open cache database at {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: SqliteError,
    },
    /// Map names become table names, so only `[a-z0-9_]` is accepted.
    #[error("invalid cache map name {name:?}")]
    InvalidMapName { name: String },
    /// A statement against the backing database failed.
    #[error("cache store failed to {operation}")]
    Sqlite {
        operation: &'static str,
        #[source]
        source: SqliteError,
    },
    /// Encoding or decoding a stored value failed.
    #[error("failed to {operation} cache value")]
    Codec {
        operation: &'static str,
        #[source]
        source: bincode::Error,
    },
    /// Another thread panicked while holding the store lock.
    #[error("cache store lock was poisoned")]
    Poisoned,
    /// The store was closed while handles were still in use.
    #[error("cache store is closed")]
    Closed,
    /// Deleting the backing file failed.
    #[error("failed to remove temporary cache file")]
    Remove {
        #[source]
        source: io::Error,
    },
}

// Field order matters: the connection must be released before the file.
#[derive(Debug)]
struct StoreInner {
    connection: Mutex<Option<Connection>>,
    file: Mutex<Option<TempPath>>,
}

impl StoreInner {
    fn with_connection<T>(
        &self,
        operation: &'static str,
        run: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let guard = self.connection.lock().map_err(|_| StoreError::Poisoned)?;
        let connection = guard.as_ref().ok_or(StoreError::Closed)?;
        run(connection).map_err(|source| StoreError::Sqlite { operation, source })
    }
}

/// Thread-safe store of named key/value maps backed by a temp file.
///
/// # Examples
/// ```
/// use strata_data::store::DiskStore;
///
/// # fn main() -> Result<(), strata_data::store::StoreError> {
/// let store = DiskStore::create(None)?;
/// let map = store.get_or_create_map("targets_feature")?;
/// assert_eq!(map.put_if_absent("BLDG_1", b"first")?, None);
/// assert_eq!(map.put_if_absent("BLDG_1", b"second")?, Some(b"first".to_vec()));
/// assert!(map.contains_key("BLDG_1")?);
/// store.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DiskStore {
    inner: Arc<StoreInner>,
}

impl DiskStore {
    /// Create an empty store inside `temp_dir`, or the OS temp dir when `None`.
    pub fn create(temp_dir: Option<&Utf8Path>) -> Result<Self, StoreError> {
        let mut builder = Builder::new();
        builder.prefix(FILE_PREFIX).suffix(FILE_SUFFIX);
        let file = match temp_dir {
            Some(dir) => {
                strata_fs::ensure_dir(dir).map_err(|source| StoreError::TempDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        }
        .map_err(|source| StoreError::TempFile { source })?
        .into_temp_path();

        let connection = Connection::open(&file).map_err(|source| StoreError::Open {
            path: file.to_path_buf(),
            source,
        })?;
        // The cache is disposable, so durability is traded for speed.
        connection
            .pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get::<_, String>(0))
            .map_err(|source| StoreError::Sqlite {
                operation: "disable journaling",
                source,
            })?;
        connection
            .pragma_update(None, "synchronous", "OFF")
            .map_err(|source| StoreError::Sqlite {
                operation: "disable synchronous writes",
                source,
            })?;
        log::debug!("created reference cache store at {}", file.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                connection: Mutex::new(Some(connection)),
                file: Mutex::new(Some(file)),
            }),
        })
    }

    /// Return the map called `name`, creating it on first use.
    pub fn get_or_create_map(&self, name: &str) -> Result<DiskMap, StoreError> {
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_');
        if !valid {
            return Err(StoreError::InvalidMapName {
                name: name.to_owned(),
            });
        }
        let table = format!("map_{name}");
        self.inner.with_connection("create map", |connection| {
            connection.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        key TEXT PRIMARY KEY,
                        value BLOB NOT NULL
                    ) WITHOUT ROWID"
                ),
                [],
            )
        })?;
        Ok(DiskMap::new(Arc::clone(&self.inner), &table))
    }

    /// Close the connection and delete the backing file.
    ///
    /// Handles obtained from this store fail with [`StoreError::Closed`]
    /// afterwards. Closing twice is harmless.
    pub fn close(&self) -> Result<(), StoreError> {
        let connection = self
            .inner
            .connection
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .take();
        if let Some(connection) = connection {
            connection
                .close()
                .map_err(|(_, source)| StoreError::Sqlite {
                    operation: "close",
                    source,
                })?;
        }
        let file = self
            .inner
            .file
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .take();
        if let Some(file) = file {
            file.close().map_err(|source| StoreError::Remove { source })?;
        }
        Ok(())
    }
}

/// Handle to one named map inside a [`DiskStore`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DiskMap {
    inner: Arc<StoreInner>,
    insert_sql: String,
    select_sql: String,
    count_sql: String,
    scan_sql: String,
}

impl DiskMap {
    fn new(inner: Arc<StoreInner>, table: &str) -> Self {
        Self {
            inner,
            insert_sql: format!("INSERT OR IGNORE INTO {table} (key, value) VALUES (?1, ?2)"),
            select_sql: format!("SELECT value FROM {table} WHERE key = ?1"),
            count_sql: format!("SELECT COUNT(*) FROM {table}"),
            scan_sql: format!(
                "SELECT key, value FROM {table} WHERE ?1 IS NULL OR key > ?1 ORDER BY key LIMIT ?2"
            ),
        }
    }

    /// Store `value` unless `key` is present; returns the existing value if it was.
    pub fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.with_connection("insert entry", |connection| {
            let inserted = connection
                .prepare_cached(&self.insert_sql)?
                .execute(params![key, value])?;
            if inserted == 1 {
                return Ok(None);
            }
            connection
                .prepare_cached(&self.select_sql)?
                .query_row([key], |row| row.get(0))
                .map(Some)
        })
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> Result<bool, StoreError> {
        self.get(key).map(|value| value.is_some())
    }

    /// Fetch the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.with_connection("read entry", |connection| {
            connection
                .prepare_cached(&self.select_sql)?
                .query_row([key], |row| row.get(0))
                .optional()
        })
    }

    /// Number of entries.
    pub fn len(&self) -> Result<u64, StoreError> {
        self.inner.with_connection("count entries", |connection| {
            connection
                .prepare_cached(&self.count_sql)?
                .query_row([], |row| row.get(0))
        })
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|len| len == 0)
    }

    /// Return up to `limit` entries with keys strictly after `after`, in key order.
    ///
    /// Pass the last key of one page as `after` to fetch the next page.
    pub fn scan(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.inner.with_connection("scan entries", |connection| {
            let mut statement = connection.prepare_cached(&self.scan_sql)?;
            let rows = statement.query_map(params![after, limit], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect()
        })
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|source| StoreError::Codec {
        operation: "encode",
        source,
    })
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|source| StoreError::Codec {
        operation: "decode",
        source,
    })
}
