//! Builders for feature graphs used by unit and behaviour tests.

use geo::{Geometry, Point};

use crate::{
    Address, Appearance, CacheKind, Feature, Property, PropertyValue, Reference, SurfaceData,
    SurfaceDataKind, SurfaceDataProperty,
};

/// A building with an object id and a point geometry.
pub fn building(object_id: &str) -> Feature {
    Feature::new("Building")
        .with_object_id(object_id)
        .with_attribute("function", "residential")
        .with_geometry(Geometry::Point(Point::new(13.4, 52.5)))
}

/// A building whose `relatedTo` property points at `target`.
pub fn building_referencing(object_id: &str, target: &str) -> Feature {
    building(object_id).with_property(Property::new(
        "relatedTo",
        PropertyValue::Reference(Reference::new(CacheKind::Feature, target)),
    ))
}

/// A building owning one inline building part.
pub fn building_with_part(object_id: &str, part_id: &str) -> Feature {
    building(object_id).with_property(Property::new(
        "consistsOfBuildingPart",
        PropertyValue::Feature(Box::new(
            Feature::new("BuildingPart").with_object_id(part_id),
        )),
    ))
}

/// An inline Berlin address.
pub fn address(object_id: &str) -> Address {
    Address {
        object_id: Some(object_id.to_owned()),
        street: Some("Unter den Linden".to_owned()),
        house_number: Some("1".to_owned()),
        city: Some("Berlin".to_owned()),
        ..Address::default()
    }
}

/// An appearance holding one texture for `image_uri`.
pub fn textured_appearance(texture_id: &str, image_uri: &str) -> Appearance {
    Appearance {
        object_id: None,
        theme: Some("rgbTexture".to_owned()),
        surface_data: vec![SurfaceDataProperty::Inline(SurfaceData {
            object_id: Some(texture_id.to_owned()),
            kind: SurfaceDataKind::Texture {
                image_uri: image_uri.to_owned(),
                wrap_mode: None,
            },
        })],
    }
}
