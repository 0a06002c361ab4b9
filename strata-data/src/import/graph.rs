//! Flattens a feature hierarchy into table rows and cache entries.
//!
//! Rows are staged in a scratch buffer first and only handed to the table
//! importers once the whole hierarchy has been translated, so a feature that
//! fails half way leaves nothing behind in the batch.

use rusqlite::{Connection, types::Value};
use serde::Serialize;
use strata_core::{
    Address, Appearance, CacheKind, Feature, ImplicitGeometry, Property, PropertyValue, RowId,
    SurfaceData, SurfaceDataKind, SurfaceDataProperty,
};

use super::{ImportError, tables::Row};
use crate::{
    reference::ReferenceCache,
    schema::{RELATION_CONTAINS, RELATION_RELATES, Table},
    sequence::SequenceAllocator,
};

/// Rows and cache entries produced for one hierarchy.
#[derive(Debug, Default)]
pub(crate) struct StagedGraph {
    pub rows: Vec<(Table, Row)>,
    pub targets: Vec<(CacheKind, String, RowId)>,
    pub references: Vec<(CacheKind, RowId, String)>,
}

pub(crate) struct Stager<'a> {
    connection: &'a Connection,
    sequences: &'a mut SequenceAllocator,
    cache: &'a ReferenceCache,
    import_time: i64,
    staged: StagedGraph,
}

#[derive(Default)]
struct PropertyColumns {
    feature: Option<RowId>,
    address: Option<RowId>,
    implicit_geometry: Option<RowId>,
    reference: Option<(CacheKind, String)>,
}

impl<'a> Stager<'a> {
    pub fn new(
        connection: &'a Connection,
        sequences: &'a mut SequenceAllocator,
        cache: &'a ReferenceCache,
        import_time: i64,
    ) -> Self {
        Self {
            connection,
            sequences,
            cache,
            import_time,
            staged: StagedGraph::default(),
        }
    }

    pub fn finish(self) -> StagedGraph {
        self.staged
    }

    /// Stage `feature` and everything it embeds; returns its row id.
    pub fn feature(&mut self, feature: &Feature) -> Result<RowId, ImportError> {
        let object_id = feature.object_id.as_deref();
        let id = self.next_id(Table::Feature)?;
        let attributes = to_json("attributes", object_id, &feature.attributes)?;
        self.push(
            Table::Feature,
            vec![
                Value::Integer(id),
                text(object_id),
                Value::Text(feature.feature_type.clone()),
                Value::Text(attributes),
                Value::Integer(self.import_time),
                Value::Integer(self.import_time),
            ],
        );
        self.target(CacheKind::Feature, object_id, id);

        if let Some(geometry) = &feature.geometry {
            let geometry_id = self.next_id(Table::GeometryData)?;
            let geometry = to_json("geometry", object_id, geometry)?;
            self.push(
                Table::GeometryData,
                vec![
                    Value::Integer(geometry_id),
                    Value::Integer(id),
                    Value::Text(geometry),
                ],
            );
        }
        for property in &feature.properties {
            self.property(id, property)?;
        }
        for appearance in &feature.appearances {
            self.appearance(id, appearance)?;
        }
        Ok(id)
    }

    fn property(&mut self, owner: RowId, property: &Property) -> Result<(), ImportError> {
        let id = self.next_id(Table::Property)?;
        let mut columns = PropertyColumns::default();
        let relation = match &property.value {
            PropertyValue::Feature(child) => {
                columns.feature = Some(self.feature(child)?);
                RELATION_CONTAINS
            }
            PropertyValue::Address(address) => {
                columns.address = Some(self.address(address)?);
                RELATION_CONTAINS
            }
            PropertyValue::ImplicitGeometry(implicit) => {
                columns.implicit_geometry = Some(self.implicit_geometry(implicit)?);
                RELATION_CONTAINS
            }
            PropertyValue::Reference(reference) => {
                self.reference(reference.kind, id, &reference.target);
                columns.reference = Some((reference.kind, reference.target.clone()));
                RELATION_RELATES
            }
        };
        let (kind, target) = columns.reference.map_or((Value::Null, Value::Null), |(kind, target)| {
            (Value::Text(kind.as_str().to_owned()), Value::Text(target))
        });
        self.push(
            Table::Property,
            vec![
                Value::Integer(id),
                Value::Integer(owner),
                Value::Text(property.name.clone()),
                integer(columns.feature),
                integer(columns.address),
                integer(columns.implicit_geometry),
                kind,
                target,
                Value::Integer(relation),
            ],
        );
        Ok(())
    }

    fn address(&mut self, address: &Address) -> Result<RowId, ImportError> {
        let id = self.next_id(Table::Address)?;
        self.push(
            Table::Address,
            vec![
                Value::Integer(id),
                text(address.object_id.as_deref()),
                text(address.street.as_deref()),
                text(address.house_number.as_deref()),
                text(address.city.as_deref()),
                text(address.zip_code.as_deref()),
                text(address.country.as_deref()),
            ],
        );
        self.target(CacheKind::Address, address.object_id.as_deref(), id);
        Ok(id)
    }

    fn implicit_geometry(&mut self, implicit: &ImplicitGeometry) -> Result<RowId, ImportError> {
        let object_id = implicit.object_id.as_deref();
        let id = self.next_id(Table::ImplicitGeometry)?;
        let geometry = match &implicit.geometry {
            Some(geometry) => Value::Text(to_json("implicit geometry", object_id, geometry)?),
            None => Value::Null,
        };
        self.push(
            Table::ImplicitGeometry,
            vec![
                Value::Integer(id),
                text(object_id),
                text(implicit.mime_type.as_deref()),
                geometry,
            ],
        );
        self.target(CacheKind::ImplicitGeometry, object_id, id);
        Ok(id)
    }

    fn appearance(&mut self, owner: RowId, appearance: &Appearance) -> Result<(), ImportError> {
        let id = self.next_id(Table::Appearance)?;
        self.push(
            Table::Appearance,
            vec![
                Value::Integer(id),
                text(appearance.object_id.as_deref()),
                Value::Integer(owner),
                text(appearance.theme.as_deref()),
            ],
        );
        for property in &appearance.surface_data {
            let link = self.next_id(Table::AppearToSurfaceData)?;
            let (surface_data, reference) = match property {
                SurfaceDataProperty::Inline(data) => (Value::Integer(self.surface_data(data)?), Value::Null),
                SurfaceDataProperty::Reference(target) => {
                    self.reference(CacheKind::SurfaceData, link, target);
                    (Value::Null, Value::Text(target.clone()))
                }
            };
            self.push(
                Table::AppearToSurfaceData,
                vec![Value::Integer(link), Value::Integer(id), surface_data, reference],
            );
        }
        Ok(())
    }

    fn surface_data(&mut self, data: &SurfaceData) -> Result<RowId, ImportError> {
        let id = self.next_id(Table::SurfaceData)?;
        let kind = Value::Text(data.kind.name().to_owned());
        let columns = match &data.kind {
            SurfaceDataKind::Material {
                diffuse_color,
                transparency,
            } => [
                text(diffuse_color.as_deref()),
                transparency.map_or(Value::Null, Value::Real),
                Value::Null,
                Value::Null,
            ],
            SurfaceDataKind::Texture {
                image_uri,
                wrap_mode,
            } => {
                self.texture_image(image_uri)?;
                self.reference(CacheKind::TextureImage, id, image_uri);
                [
                    Value::Null,
                    Value::Null,
                    Value::Text(image_uri.clone()),
                    text(wrap_mode.as_deref()),
                ]
            }
        };
        let [diffuse_color, transparency, image_uri, wrap_mode] = columns;
        self.push(
            Table::SurfaceData,
            vec![
                Value::Integer(id),
                text(data.object_id.as_deref()),
                kind,
                diffuse_color,
                transparency,
                image_uri,
                wrap_mode,
                Value::Null,
            ],
        );
        self.target(CacheKind::SurfaceData, data.object_id.as_deref(), id);
        Ok(id)
    }

    /// Insert the `tex_image` row unless another texture already claimed the URI.
    fn texture_image(&mut self, image_uri: &str) -> Result<(), ImportError> {
        if self.cache.has_target(CacheKind::TextureImage, image_uri)? {
            return Ok(());
        }
        let id = self.next_id(Table::TexImage)?;
        if self.cache.claim_target(CacheKind::TextureImage, image_uri, id)? {
            self.push(
                Table::TexImage,
                vec![Value::Integer(id), Value::Text(image_uri.to_owned())],
            );
        }
        Ok(())
    }

    fn next_id(&mut self, table: Table) -> Result<RowId, ImportError> {
        Ok(self.sequences.next_id(self.connection, table)?)
    }

    fn push(&mut self, table: Table, row: Row) {
        self.staged.rows.push((table, row));
    }

    fn target(&mut self, kind: CacheKind, object_id: Option<&str>, id: RowId) {
        if let Some(object_id) = object_id {
            self.staged.targets.push((kind, object_id.to_owned(), id));
        }
    }

    fn reference(&mut self, kind: CacheKind, owner: RowId, target: &str) {
        self.staged.references.push((kind, owner, target.to_owned()));
    }
}

fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_owned()))
}

fn integer(value: Option<RowId>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn to_json<T: Serialize>(
    what: &'static str,
    object_id: Option<&str>,
    value: &T,
) -> Result<String, ImportError> {
    serde_json::to_string(value).map_err(|source| ImportError::Encode {
        what,
        object_id: object_id.map(str::to_owned),
        source,
    })
}
