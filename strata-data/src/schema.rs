//! Relational layout of the feature database.
#![forbid(unsafe_code)]

use std::fmt;

use rusqlite::{Connection, Error as SqliteError, OptionalExtension, Transaction};
use thiserror::Error;

pub const SCHEMA_VERSION: i64 = 1;

/// `property.val_relation_type` for values embedded inline.
pub const RELATION_CONTAINS: i64 = 1;
/// `property.val_relation_type` for symbolic references.
pub const RELATION_RELATES: i64 = 0;

/// Tables written by the import engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    TexImage,
    Address,
    ImplicitGeometry,
    Feature,
    GeometryData,
    SurfaceData,
    Appearance,
    AppearToSurfaceData,
    Property,
}

/// Foreign-key-safe order in which every worker executes its buffered rows.
///
/// A table appears after every table its non-deferred foreign keys point at.
/// Keys that may point across batches (`tex_image_id`, `surface_data_id` of
/// referenced surface data and the `val_*_id` columns of references) are left
/// `NULL` and filled in by reference resolution instead.
pub const COMMIT_ORDER: [Table; 9] = [
    Table::TexImage,
    Table::Address,
    Table::ImplicitGeometry,
    Table::Feature,
    Table::GeometryData,
    Table::SurfaceData,
    Table::Appearance,
    Table::AppearToSurfaceData,
    Table::Property,
];

impl Table {
    /// SQL table name, also the sequence name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::TexImage => "tex_image",
            Self::Address => "address",
            Self::ImplicitGeometry => "implicit_geometry",
            Self::Feature => "feature",
            Self::GeometryData => "geometry_data",
            Self::SurfaceData => "surface_data",
            Self::Appearance => "appearance",
            Self::AppearToSurfaceData => "appear_to_surface_data",
            Self::Property => "property",
        }
    }

    /// Columns written on insert, primary key first.
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::TexImage => &["id", "image_uri"],
            Self::Address => &[
                "id",
                "objectid",
                "street",
                "house_number",
                "city",
                "zip_code",
                "country",
            ],
            Self::ImplicitGeometry => &["id", "objectid", "mime_type", "geometry"],
            Self::Feature => &[
                "id",
                "objectid",
                "objectclass",
                "attributes",
                "creation_date",
                "last_modification_date",
            ],
            Self::GeometryData => &["id", "feature_id", "geometry"],
            Self::SurfaceData => &[
                "id",
                "objectid",
                "kind",
                "diffuse_color",
                "transparency",
                "image_uri",
                "wrap_mode",
                "tex_image_id",
            ],
            Self::Appearance => &["id", "objectid", "feature_id", "theme"],
            Self::AppearToSurfaceData => &["id", "appearance_id", "surface_data_id", "reference"],
            Self::Property => &[
                "id",
                "feature_id",
                "name",
                "val_feature_id",
                "val_address_id",
                "val_implicitgeom_id",
                "val_reference_kind",
                "val_reference",
                "val_relation_type",
            ],
        }
    }

    /// Parameterised insert statement covering [`Table::columns`].
    pub fn insert_sql(self) -> String {
        let columns = self.columns();
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.name(),
            columns.join(", ")
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Create the feature schema when missing and check its version.
///
/// Every table is created in one transaction together with the sequence and
/// version bookkeeping tables. An existing database recorded with another
/// version is rejected rather than migrated.
///
/// # Examples
/// ```
/// use rusqlite::Connection;
/// use strata_data::schema::{SCHEMA_VERSION, initialise_schema};
///
/// let mut conn = Connection::open_in_memory().expect("create in-memory database");
/// initialise_schema(&mut conn).expect("create feature schema");
/// initialise_schema(&mut conn).expect("schema creation is idempotent");
///
/// let version: i64 = conn
///     .query_row("SELECT version FROM strata_schema_version", [], |row| row.get(0))
///     .expect("read schema version");
/// assert_eq!(version, SCHEMA_VERSION);
/// ```
pub fn initialise_schema(connection: &mut Connection) -> Result<(), SchemaError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| SchemaError::ForeignKeys { source })?;

    let transaction = connection
        .transaction()
        .map_err(|source| SchemaError::Migration {
            step: "begin schema transaction",
            source,
        })?;

    create_tables(&transaction)?;
    create_indexes(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction.commit().map_err(|source| SchemaError::Migration {
        step: "commit schema transaction",
        source,
    })
}

fn create_tables(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create tex_image",
        "CREATE TABLE IF NOT EXISTS tex_image (
            id INTEGER PRIMARY KEY,
            image_uri TEXT NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create address",
        "CREATE TABLE IF NOT EXISTS address (
            id INTEGER PRIMARY KEY,
            objectid TEXT,
            street TEXT,
            house_number TEXT,
            city TEXT,
            zip_code TEXT,
            country TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create implicit_geometry",
        "CREATE TABLE IF NOT EXISTS implicit_geometry (
            id INTEGER PRIMARY KEY,
            objectid TEXT,
            mime_type TEXT,
            geometry TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create feature",
        "CREATE TABLE IF NOT EXISTS feature (
            id INTEGER PRIMARY KEY,
            objectid TEXT,
            objectclass TEXT NOT NULL CHECK (length(trim(objectclass)) > 0),
            attributes TEXT NOT NULL DEFAULT '{}',
            creation_date INTEGER NOT NULL,
            last_modification_date INTEGER NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create geometry_data",
        "CREATE TABLE IF NOT EXISTS geometry_data (
            id INTEGER PRIMARY KEY,
            feature_id INTEGER NOT NULL REFERENCES feature(id) ON DELETE CASCADE,
            geometry TEXT NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create surface_data",
        "CREATE TABLE IF NOT EXISTS surface_data (
            id INTEGER PRIMARY KEY,
            objectid TEXT,
            kind TEXT NOT NULL CHECK (kind IN ('material', 'texture')),
            diffuse_color TEXT,
            transparency REAL,
            image_uri TEXT,
            wrap_mode TEXT,
            tex_image_id INTEGER REFERENCES tex_image(id)
        )",
    )?;
    run_migration_step(
        transaction,
        "create appearance",
        "CREATE TABLE IF NOT EXISTS appearance (
            id INTEGER PRIMARY KEY,
            objectid TEXT,
            feature_id INTEGER NOT NULL REFERENCES feature(id) ON DELETE CASCADE,
            theme TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create appear_to_surface_data",
        "CREATE TABLE IF NOT EXISTS appear_to_surface_data (
            id INTEGER PRIMARY KEY,
            appearance_id INTEGER NOT NULL REFERENCES appearance(id) ON DELETE CASCADE,
            surface_data_id INTEGER REFERENCES surface_data(id),
            reference TEXT
        )",
    )?;
    run_migration_step(
        transaction,
        "create property",
        "CREATE TABLE IF NOT EXISTS property (
            id INTEGER PRIMARY KEY,
            feature_id INTEGER NOT NULL REFERENCES feature(id) ON DELETE CASCADE,
            name TEXT NOT NULL CHECK (length(trim(name)) > 0),
            val_feature_id INTEGER REFERENCES feature(id),
            val_address_id INTEGER REFERENCES address(id),
            val_implicitgeom_id INTEGER REFERENCES implicit_geometry(id),
            val_reference_kind TEXT,
            val_reference TEXT,
            val_relation_type INTEGER NOT NULL CHECK (val_relation_type IN (0, 1))
        )",
    )?;
    run_migration_step(
        transaction,
        "create strata_sequence",
        "CREATE TABLE IF NOT EXISTS strata_sequence (
            name TEXT PRIMARY KEY,
            next_value INTEGER NOT NULL CHECK (next_value > 0)
        ) WITHOUT ROWID",
    )
}

fn create_indexes(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "index feature objectid",
        "CREATE INDEX IF NOT EXISTS idx_feature_objectid ON feature(objectid)",
    )?;
    run_migration_step(
        transaction,
        "index property feature",
        "CREATE INDEX IF NOT EXISTS idx_property_feature ON property(feature_id)",
    )?;
    run_migration_step(
        transaction,
        "index property contained feature",
        "CREATE INDEX IF NOT EXISTS idx_property_val_feature
            ON property(val_feature_id, val_relation_type)",
    )?;
    run_migration_step(
        transaction,
        "index geometry_data feature",
        "CREATE INDEX IF NOT EXISTS idx_geometry_data_feature ON geometry_data(feature_id)",
    )?;
    run_migration_step(
        transaction,
        "index appearance feature",
        "CREATE INDEX IF NOT EXISTS idx_appearance_feature ON appearance(feature_id)",
    )?;
    run_migration_step(
        transaction,
        "index appear_to_surface_data appearance",
        "CREATE INDEX IF NOT EXISTS idx_appear_to_surface_data_appearance
            ON appear_to_surface_data(appearance_id)",
    )
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS strata_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing_version: Option<i64> = transaction
        .query_row(
            "SELECT version FROM strata_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| SchemaError::Migration {
            step: "read schema version",
            source,
        })?;

    match existing_version {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(SchemaError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        }),
        None => transaction
            .execute(
                "INSERT INTO strata_schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )
            .map(|_| ())
            .map_err(|source| SchemaError::Migration {
                step: "record schema version",
                source,
            }),
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), SchemaError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| SchemaError::Migration { step, source })
}

/// Errors raised when initialising the feature schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Failed to enable foreign key enforcement.
    #[error("failed to enable SQLite foreign keys")]
    ForeignKeys {
        #[source]
        source: SqliteError,
    },
    /// A schema creation step failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        step: &'static str,
        #[source]
        source: SqliteError,
    },
    /// The database records a different schema version.
    #[error("expected feature schema version {expected} but found {found}; the database was created by another release")]
    VersionMismatch { expected: i64, found: i64 },
}
