//! Hierarchical feature graphs produced by format readers.
//!
//! A [`Feature`] owns its attributes, an optional geometry, named properties
//! and appearances. Properties either embed another entity inline or point at
//! one symbolically through a [`Reference`]; references are what the import
//! engine resolves after all batches have been committed.

use std::collections::BTreeMap;

use geo::{CoordsIter, Geometry};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::CacheKind;

/// A city object and everything it contains.
///
/// # Examples
/// ```
/// use geo::{Geometry, Point};
/// use strata_core::{CacheKind, Feature, Property, PropertyValue, Reference};
///
/// let building = Feature::new("Building")
///     .with_object_id("BLDG_1")
///     .with_attribute("function", "residential")
///     .with_geometry(Geometry::Point(Point::new(13.4, 52.5)))
///     .with_property(Property::new(
///         "relatedTo",
///         PropertyValue::Reference(Reference::new(CacheKind::Feature, "BLDG_2")),
///     ));
///
/// assert_eq!(building.object_id.as_deref(), Some("BLDG_1"));
/// assert!(building.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    /// Stable textual identifier, unique per [`CacheKind::Feature`].
    #[cfg_attr(feature = "serde", serde(default))]
    pub object_id: Option<String>,
    /// Type name such as `Building` or `Road`.
    pub feature_type: String,
    /// Simple string attributes keyed by name.
    #[cfg_attr(feature = "serde", serde(default))]
    pub attributes: BTreeMap<String, String>,
    /// Geometry in the source coordinate reference system.
    #[cfg_attr(feature = "serde", serde(default))]
    pub geometry: Option<Geometry<f64>>,
    /// Named properties pointing at nested or related entities.
    #[cfg_attr(feature = "serde", serde(default))]
    pub properties: Vec<Property>,
    /// Themed surface appearances owned by this feature.
    #[cfg_attr(feature = "serde", serde(default))]
    pub appearances: Vec<Appearance>,
}

impl Feature {
    /// Create an empty feature of the given type.
    pub fn new(feature_type: impl Into<String>) -> Self {
        Self {
            object_id: None,
            feature_type: feature_type.into(),
            attributes: BTreeMap::new(),
            geometry: None,
            properties: Vec::new(),
            appearances: Vec::new(),
        }
    }

    /// Set the object identifier.
    #[must_use]
    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    /// Add or replace a string attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the geometry.
    #[must_use]
    pub fn with_geometry(mut self, geometry: Geometry<f64>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Append a property.
    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Append an appearance.
    #[must_use]
    pub fn with_appearance(mut self, appearance: Appearance) -> Self {
        self.appearances.push(appearance);
        self
    }

    /// Iterate over the features embedded inline in this one (not recursive).
    pub fn children(&self) -> impl Iterator<Item = &Self> {
        self.properties.iter().filter_map(|property| match &property.value {
            PropertyValue::Feature(child) => Some(child.as_ref()),
            _ => None,
        })
    }

    /// Count this feature and every feature nested inside it.
    pub fn hierarchy_size(&self) -> usize {
        1 + self.children().map(Self::hierarchy_size).sum::<usize>()
    }

    /// Check the whole hierarchy for malformed input.
    ///
    /// Validation runs before any row is staged, so a rejected feature never
    /// leaves partial rows behind.
    pub fn validate(&self) -> Result<(), FeatureError> {
        require_text(&self.feature_type, FeatureError::MissingFeatureType)?;
        validate_object_id(self.object_id.as_deref())?;
        for name in self.attributes.keys() {
            require_text(name, FeatureError::EmptyName)?;
        }
        if let Some(geometry) = &self.geometry {
            validate_geometry(geometry)?;
        }
        for property in &self.properties {
            property.validate()?;
        }
        for appearance in &self.appearances {
            appearance.validate()?;
        }
        Ok(())
    }
}

/// A named value attached to a feature.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Property {
    /// Property name, for example `consistsOfBuildingPart`.
    pub name: String,
    /// Inline entity or symbolic reference.
    pub value: PropertyValue,
}

impl Property {
    /// Create a property.
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    fn validate(&self) -> Result<(), FeatureError> {
        require_text(&self.name, FeatureError::EmptyName)?;
        match &self.value {
            PropertyValue::Feature(child) => child.validate(),
            PropertyValue::Address(address) => validate_object_id(address.object_id.as_deref()),
            PropertyValue::ImplicitGeometry(implicit) => implicit.validate(),
            PropertyValue::Reference(reference) => {
                if !reference.kind.is_property_target() {
                    return Err(FeatureError::UnsupportedReference {
                        property: self.name.clone(),
                        kind: reference.kind,
                    });
                }
                require_text(&reference.target, FeatureError::EmptyReference)
            }
        }
    }
}

/// The value carried by a [`Property`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PropertyValue {
    /// A nested feature persisted together with its parent.
    Feature(Box<Feature>),
    /// An inline address.
    Address(Address),
    /// An inline implicit geometry.
    ImplicitGeometry(ImplicitGeometry),
    /// A symbolic pointer to an entity imported elsewhere.
    Reference(Reference),
}

/// Symbolic pointer to another entity by object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reference {
    /// Namespace of the target.
    pub kind: CacheKind,
    /// Object identifier of the target.
    pub target: String,
}

impl Reference {
    /// Create a reference.
    pub fn new(kind: CacheKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }
}

/// Postal address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Address {
    pub object_id: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub city: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

/// Prototype geometry shared by many features, in local coordinates.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ImplicitGeometry {
    pub object_id: Option<String>,
    pub mime_type: Option<String>,
    pub geometry: Option<Geometry<f64>>,
}

impl ImplicitGeometry {
    fn validate(&self) -> Result<(), FeatureError> {
        validate_object_id(self.object_id.as_deref())?;
        match &self.geometry {
            Some(geometry) => validate_geometry(geometry),
            None => Ok(()),
        }
    }
}

/// Themed collection of surface data.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Appearance {
    pub object_id: Option<String>,
    pub theme: Option<String>,
    pub surface_data: Vec<SurfaceDataProperty>,
}

impl Appearance {
    fn validate(&self) -> Result<(), FeatureError> {
        validate_object_id(self.object_id.as_deref())?;
        for property in &self.surface_data {
            match property {
                SurfaceDataProperty::Inline(data) => data.validate()?,
                SurfaceDataProperty::Reference(target) => {
                    require_text(target, FeatureError::EmptyReference)?;
                }
            }
        }
        Ok(())
    }
}

/// Surface data embedded in an appearance or referenced by object id.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SurfaceDataProperty {
    Inline(SurfaceData),
    Reference(String),
}

/// Material or texture description.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurfaceData {
    #[cfg_attr(feature = "serde", serde(default))]
    pub object_id: Option<String>,
    pub kind: SurfaceDataKind,
}

impl SurfaceData {
    fn validate(&self) -> Result<(), FeatureError> {
        validate_object_id(self.object_id.as_deref())?;
        match &self.kind {
            SurfaceDataKind::Texture { image_uri, .. } => {
                require_text(image_uri, FeatureError::EmptyImageUri)
            }
            SurfaceDataKind::Material { .. } => Ok(()),
        }
    }
}

/// Concrete surface data variants.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SurfaceDataKind {
    /// Flat material; the colour is a space-separated RGB triple.
    Material {
        diffuse_color: Option<String>,
        transparency: Option<f64>,
    },
    /// Image texture. Images are shared by URI across the whole session.
    Texture {
        image_uri: String,
        wrap_mode: Option<String>,
    },
}

impl SurfaceDataKind {
    /// Discriminator stored in the `surface_data.kind` column.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Material { .. } => "material",
            Self::Texture { .. } => "texture",
        }
    }
}

/// Reasons a feature is rejected before any row is written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeatureError {
    /// The feature has no type.
    #[error("feature type must not be empty")]
    MissingFeatureType,
    /// An object id is present but blank.
    #[error("object id must not be empty when present")]
    EmptyObjectId,
    /// An attribute or property has a blank name.
    #[error("attribute and property names must not be empty")]
    EmptyName,
    /// A reference names no target.
    #[error("reference target must not be empty")]
    EmptyReference,
    /// A property references a kind other than feature, address or implicit geometry.
    #[error("property {property} cannot reference {kind} entities")]
    UnsupportedReference { property: String, kind: CacheKind },
    /// A geometry holds NaN or infinite coordinates.
    #[error("geometry contains non-finite coordinates")]
    NonFiniteGeometry,
    /// A texture has a blank image URI.
    #[error("texture image URI must not be empty")]
    EmptyImageUri,
}

fn require_text(value: &str, error: FeatureError) -> Result<(), FeatureError> {
    if value.trim().is_empty() {
        Err(error)
    } else {
        Ok(())
    }
}

fn validate_object_id(object_id: Option<&str>) -> Result<(), FeatureError> {
    match object_id {
        Some(id) => require_text(id, FeatureError::EmptyObjectId),
        None => Ok(()),
    }
}

fn validate_geometry(geometry: &Geometry<f64>) -> Result<(), FeatureError> {
    if geometry
        .coords_iter()
        .all(|coord| coord.x.is_finite() && coord.y.is_finite())
    {
        Ok(())
    } else {
        Err(FeatureError::NonFiniteGeometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Point};
    use rstest::{fixture, rstest};

    #[fixture]
    fn building() -> Feature {
        Feature::new("Building")
            .with_object_id("BLDG_1")
            .with_geometry(Geometry::Point(Point::new(1.0, 2.0)))
    }

    #[rstest]
    fn accepts_nested_hierarchy(building: Feature) {
        let feature = building.with_property(Property::new(
            "consistsOfBuildingPart",
            PropertyValue::Feature(Box::new(Feature::new("BuildingPart"))),
        ));
        assert_eq!(feature.validate(), Ok(()));
        assert_eq!(feature.hierarchy_size(), 2);
    }

    #[rstest]
    fn rejects_empty_type() {
        assert_eq!(
            Feature::new(" ").validate(),
            Err(FeatureError::MissingFeatureType)
        );
    }

    #[rstest]
    fn rejects_nested_failures(building: Feature) {
        let feature = building.with_property(Property::new(
            "part",
            PropertyValue::Feature(Box::new(Feature::new("Part").with_object_id(""))),
        ));
        assert_eq!(feature.validate(), Err(FeatureError::EmptyObjectId));
    }

    #[rstest]
    fn rejects_surface_data_property_reference(building: Feature) {
        let feature = building.with_property(Property::new(
            "material",
            PropertyValue::Reference(Reference::new(CacheKind::SurfaceData, "MAT_1")),
        ));
        assert!(matches!(
            feature.validate(),
            Err(FeatureError::UnsupportedReference { kind: CacheKind::SurfaceData, .. })
        ));
    }

    #[rstest]
    fn rejects_non_finite_coordinates() {
        let line = LineString::from(vec![(0.0, 0.0), (f64::NAN, 1.0)]);
        let feature = Feature::new("Road").with_geometry(Geometry::LineString(line));
        assert_eq!(feature.validate(), Err(FeatureError::NonFiniteGeometry));
    }

    #[rstest]
    fn rejects_blank_texture_uri(building: Feature) {
        let feature = building.with_appearance(Appearance {
            surface_data: vec![SurfaceDataProperty::Inline(SurfaceData {
                object_id: None,
                kind: SurfaceDataKind::Texture {
                    image_uri: String::new(),
                    wrap_mode: None,
                },
            })],
            ..Appearance::default()
        });
        assert_eq!(feature.validate(), Err(FeatureError::EmptyImageUri));
    }

    #[cfg(feature = "serde")]
    #[rstest]
    fn serde_defaults_optional_collections() {
        let feature: Feature = serde_json::from_str(r#"{"feature_type":"Road"}"#)
            .expect("minimal feature should deserialize");
        assert_eq!(feature, Feature::new("Road"));
    }
}
