//! Rebuild feature graphs from the database and write them as JSON lines.
//!
//! Only top-level features are written; features embedded inline in another
//! are emitted as part of their parent. References are restored from the
//! stored target object id, so the output re-imports to an equivalent graph
//! whether or not the reference was resolved.
#![forbid(unsafe_code)]

use std::{
    collections::BTreeMap,
    io::{self, Write},
};

use geo::Geometry;
use rusqlite::{Connection, Error as SqliteError, OptionalExtension, Row, params};
use serde::Deserialize;
use strata_core::{
    Address, Appearance, CacheKind, Feature, ImplicitGeometry, Property, PropertyValue, Reference,
    RowId, SurfaceData, SurfaceDataKind, SurfaceDataProperty,
};
use thiserror::Error;

use crate::schema::RELATION_CONTAINS;

/// Errors raised while exporting features.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A query against the feature database failed.
    #[error("failed to {operation}")]
    Query {
        operation: &'static str,
        #[source]
        source: SqliteError,
    },
    /// A stored JSON column could not be decoded.
    #[error("failed to decode {what} of row {id}")]
    Decode {
        what: &'static str,
        id: RowId,
        #[source]
        source: serde_json::Error,
    },
    /// A reference property names a kind that does not exist.
    #[error("property row {id} references unknown kind {kind:?}")]
    UnknownKind { id: RowId, kind: String },
    /// A row linked from another row is missing.
    #[error("row {id} of table {table} is missing")]
    MissingRow { table: &'static str, id: RowId },
    /// A rebuilt feature could not be serialised.
    #[error("failed to serialise feature {id}")]
    Encode {
        id: RowId,
        #[source]
        source: serde_json::Error,
    },
    /// Writing to the output failed.
    #[error("failed to write exported features")]
    Write(#[source] io::Error),
}

/// Which features to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Only export top-level features of this type.
    pub feature_type: Option<String>,
}

impl ExportOptions {
    #[must_use]
    pub fn with_feature_type(mut self, feature_type: impl Into<String>) -> Self {
        self.feature_type = Some(feature_type.into());
        self
    }
}

/// Totals for one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Top-level features written.
    pub features: u64,
    /// Features written including nested ones.
    pub hierarchy_features: u64,
}

const TOP_LEVEL_SQL: &str = "SELECT f.id FROM feature f \
     WHERE (?1 IS NULL OR f.objectclass = ?1) \
     AND NOT EXISTS (SELECT 1 FROM property p \
         WHERE p.val_feature_id = f.id AND p.val_relation_type = ?2) \
     ORDER BY f.id";

/// Write every top-level feature as one JSON object per line.
///
/// # Examples
/// ```
/// use rusqlite::Connection;
/// use strata_data::{ExportOptions, export_features, initialise_schema};
///
/// let mut connection = Connection::open_in_memory().expect("open database");
/// initialise_schema(&mut connection).expect("create schema");
/// let mut output = Vec::new();
/// let summary = export_features(&connection, &mut output, &ExportOptions::default())
///     .expect("export");
/// assert_eq!(summary.features, 0);
/// assert!(output.is_empty());
/// ```
pub fn export_features<W: Write>(
    connection: &Connection,
    mut writer: W,
    options: &ExportOptions,
) -> Result<ExportSummary, ExportError> {
    let ids = {
        let mut statement = connection
            .prepare(TOP_LEVEL_SQL)
            .map_err(query("prepare feature query"))?;
        let rows = statement
            .query_map(
                params![options.feature_type.as_deref(), RELATION_CONTAINS],
                |row| row.get::<_, RowId>(0),
            )
            .map_err(query("query top-level features"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(query("read top-level features"))?
    };

    let loader = Loader { connection };
    let mut summary = ExportSummary::default();
    for id in ids {
        let feature = loader.feature(id)?;
        summary.features += 1;
        summary.hierarchy_features += feature.hierarchy_size() as u64;
        serde_json::to_writer(&mut writer, &feature)
            .map_err(|source| ExportError::Encode { id, source })?;
        writer.write_all(b"\n").map_err(ExportError::Write)?;
    }
    writer.flush().map_err(ExportError::Write)?;
    log::info!(
        "exported {} feature(s), {} including nested features",
        summary.features,
        summary.hierarchy_features
    );
    Ok(summary)
}

struct Loader<'c> {
    connection: &'c Connection,
}

struct PropertyRow {
    id: RowId,
    name: String,
    feature: Option<RowId>,
    address: Option<RowId>,
    implicit_geometry: Option<RowId>,
    reference_kind: Option<String>,
    reference: Option<String>,
    relation: i64,
}

impl<'c> Loader<'c> {
    fn feature(&self, id: RowId) -> Result<Feature, ExportError> {
        let (object_id, feature_type, attributes) = self
            .connection
            .prepare_cached("SELECT objectid, objectclass, attributes FROM feature WHERE id = ?1")
            .map_err(query("prepare feature lookup"))?
            .query_row([id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .optional()
            .map_err(query("load feature"))?
            .ok_or(ExportError::MissingRow {
                table: "feature",
                id,
            })?;

        let mut feature = Feature::new(feature_type);
        feature.object_id = object_id;
        if let Some(attributes) = attributes {
            feature.attributes = decode::<BTreeMap<String, String>>("attributes", id, &attributes)?;
        }
        feature.geometry = self.geometry(id)?;
        for property in self.property_rows(id)? {
            feature.properties.push(self.property(property)?);
        }
        feature.appearances = self.appearances(id)?;
        Ok(feature)
    }

    fn geometry(&self, feature: RowId) -> Result<Option<Geometry<f64>>, ExportError> {
        let stored = self
            .connection
            .prepare_cached(
                "SELECT geometry FROM geometry_data WHERE feature_id = ?1 ORDER BY id LIMIT 1",
            )
            .map_err(query("prepare geometry lookup"))?
            .query_row([feature], |row| row.get::<_, Option<String>>(0))
            .optional()
            .map_err(query("load geometry"))?
            .flatten();
        stored
            .map(|json| decode("geometry", feature, &json))
            .transpose()
    }

    fn property_rows(&self, feature: RowId) -> Result<Vec<PropertyRow>, ExportError> {
        let mut statement = self
            .connection
            .prepare_cached(
                "SELECT id, name, val_feature_id, val_address_id, val_implicitgeom_id, \
                 val_reference_kind, val_reference, val_relation_type \
                 FROM property WHERE feature_id = ?1 ORDER BY id",
            )
            .map_err(query("prepare property lookup"))?;
        let rows = statement
            .query_map([feature], |row| {
                Ok(PropertyRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    feature: row.get(2)?,
                    address: row.get(3)?,
                    implicit_geometry: row.get(4)?,
                    reference_kind: row.get(5)?,
                    reference: row.get(6)?,
                    relation: row.get(7)?,
                })
            })
            .map_err(query("load properties"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(query("read properties"))
    }

    fn property(&self, row: PropertyRow) -> Result<Property, ExportError> {
        let value = if row.relation == RELATION_CONTAINS {
            match (row.feature, row.address, row.implicit_geometry) {
                (Some(child), _, _) => PropertyValue::Feature(Box::new(self.feature(child)?)),
                (None, Some(address), _) => PropertyValue::Address(self.address(address)?),
                (None, None, Some(implicit)) => {
                    PropertyValue::ImplicitGeometry(self.implicit_geometry(implicit)?)
                }
                (None, None, None) => {
                    return Err(ExportError::MissingRow {
                        table: "property value",
                        id: row.id,
                    });
                }
            }
        } else {
            let (Some(kind), Some(target)) = (row.reference_kind, row.reference) else {
                return Err(ExportError::MissingRow {
                    table: "property reference",
                    id: row.id,
                });
            };
            let kind = CacheKind::from_name(&kind)
                .ok_or(ExportError::UnknownKind { id: row.id, kind })?;
            PropertyValue::Reference(Reference::new(kind, target))
        };
        Ok(Property::new(row.name, value))
    }

    fn address(&self, id: RowId) -> Result<Address, ExportError> {
        self.connection
            .prepare_cached(
                "SELECT objectid, street, house_number, city, zip_code, country \
                 FROM address WHERE id = ?1",
            )
            .map_err(query("prepare address lookup"))?
            .query_row([id], |row| {
                Ok(Address {
                    object_id: row.get(0)?,
                    street: row.get(1)?,
                    house_number: row.get(2)?,
                    city: row.get(3)?,
                    zip_code: row.get(4)?,
                    country: row.get(5)?,
                })
            })
            .optional()
            .map_err(query("load address"))?
            .ok_or(ExportError::MissingRow {
                table: "address",
                id,
            })
    }

    fn implicit_geometry(&self, id: RowId) -> Result<ImplicitGeometry, ExportError> {
        let (object_id, mime_type, geometry) = self
            .connection
            .prepare_cached(
                "SELECT objectid, mime_type, geometry FROM implicit_geometry WHERE id = ?1",
            )
            .map_err(query("prepare implicit geometry lookup"))?
            .query_row([id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .optional()
            .map_err(query("load implicit geometry"))?
            .ok_or(ExportError::MissingRow {
                table: "implicit_geometry",
                id,
            })?;
        Ok(ImplicitGeometry {
            object_id,
            mime_type,
            geometry: geometry
                .map(|json| decode("implicit geometry", id, &json))
                .transpose()?,
        })
    }

    fn appearances(&self, feature: RowId) -> Result<Vec<Appearance>, ExportError> {
        let rows = {
            let mut statement = self
                .connection
                .prepare_cached(
                    "SELECT id, objectid, theme FROM appearance WHERE feature_id = ?1 ORDER BY id",
                )
                .map_err(query("prepare appearance lookup"))?;
            let rows = statement
                .query_map([feature], |row| {
                    Ok((
                        row.get::<_, RowId>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })
                .map_err(query("load appearances"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(query("read appearances"))?
        };
        rows.into_iter()
            .map(|(id, object_id, theme)| {
                Ok(Appearance {
                    object_id,
                    theme,
                    surface_data: self.surface_data_links(id)?,
                })
            })
            .collect()
    }

    fn surface_data_links(&self, appearance: RowId) -> Result<Vec<SurfaceDataProperty>, ExportError> {
        let links = {
            let mut statement = self
                .connection
                .prepare_cached(
                    "SELECT id, surface_data_id, reference FROM appear_to_surface_data \
                     WHERE appearance_id = ?1 ORDER BY id",
                )
                .map_err(query("prepare surface data lookup"))?;
            let rows = statement
                .query_map([appearance], |row| {
                    Ok((
                        row.get::<_, RowId>(0)?,
                        row.get::<_, Option<RowId>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })
                .map_err(query("load surface data links"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(query("read surface data links"))?
        };
        links
            .into_iter()
            .map(|(link, surface_data, reference)| match (reference, surface_data) {
                (Some(target), _) => Ok(SurfaceDataProperty::Reference(target)),
                (None, Some(id)) => self.surface_data(id).map(SurfaceDataProperty::Inline),
                (None, None) => Err(ExportError::MissingRow {
                    table: "appear_to_surface_data",
                    id: link,
                }),
            })
            .collect()
    }

    fn surface_data(&self, id: RowId) -> Result<SurfaceData, ExportError> {
        self.connection
            .prepare_cached(
                "SELECT objectid, kind, diffuse_color, transparency, image_uri, wrap_mode \
                 FROM surface_data WHERE id = ?1",
            )
            .map_err(query("prepare surface data lookup"))?
            .query_row([id], surface_data_row)
            .optional()
            .map_err(query("load surface data"))?
            .ok_or(ExportError::MissingRow {
                table: "surface_data",
                id,
            })
    }
}

fn surface_data_row(row: &Row<'_>) -> rusqlite::Result<SurfaceData> {
    let kind: String = row.get(1)?;
    let kind = match row.get::<_, Option<String>>(4)? {
        Some(image_uri) if kind == "texture" => SurfaceDataKind::Texture {
            image_uri,
            wrap_mode: row.get(5)?,
        },
        _ => SurfaceDataKind::Material {
            diffuse_color: row.get(2)?,
            transparency: row.get(3)?,
        },
    };
    Ok(SurfaceData {
        object_id: row.get(0)?,
        kind,
    })
}

fn decode<T: for<'de> Deserialize<'de>>(
    what: &'static str,
    id: RowId,
    json: &str,
) -> Result<T, ExportError> {
    serde_json::from_str(json).map_err(|source| ExportError::Decode { what, id, source })
}

fn query(operation: &'static str) -> impl Fn(SqliteError) -> ExportError {
    move |source| ExportError::Query { operation, source }
}
