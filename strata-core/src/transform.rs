//! Affine coordinate transformation applied to incoming features.

use std::str::FromStr;

use geo::{AffineOps, AffineTransform};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Feature, PropertyValue};

/// Six-coefficient affine transform:
/// `x' = a * x + b * y + xoff`, `y' = d * x + e * y + yoff`.
///
/// # Examples
/// ```
/// use geo::{Geometry, Point};
/// use strata_core::{Feature, Transform};
///
/// let shift: Transform = "1,0,100,0,1,-50".parse().expect("valid coefficients");
/// let mut feature = Feature::new("Building").with_geometry(Geometry::Point(Point::new(1.0, 1.0)));
/// shift.apply(&mut feature);
/// assert_eq!(feature.geometry, Some(Geometry::Point(Point::new(101.0, -49.0))));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub xoff: f64,
    pub d: f64,
    pub e: f64,
    pub yoff: f64,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        xoff: 0.0,
        d: 0.0,
        e: 1.0,
        yoff: 0.0,
    };

    /// Convert into the `geo` representation.
    pub fn to_affine(&self) -> AffineTransform<f64> {
        AffineTransform::new(self.a, self.b, self.xoff, self.d, self.e, self.yoff)
    }

    /// Transform the geometry of a feature and of every nested feature.
    ///
    /// Implicit geometries stay untouched: they live in local coordinates.
    pub fn apply(&self, feature: &mut Feature) {
        apply_affine(&self.to_affine(), feature);
    }
}

/// Apply a prepared `geo` transform to a feature hierarchy.
pub fn apply_affine(transform: &AffineTransform<f64>, feature: &mut Feature) {
    if let Some(geometry) = feature.geometry.as_mut() {
        geometry.affine_transform_mut(transform);
    }
    for property in &mut feature.properties {
        if let PropertyValue::Feature(child) = &mut property.value {
            apply_affine(transform, child);
        }
    }
}

/// Errors raised when parsing a transform from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformParseError {
    /// The text does not hold exactly six values.
    #[error("expected 6 comma-separated coefficients, found {found}")]
    Arity { found: usize },
    /// A value is not a finite number.
    #[error("coefficient {index} ({value:?}) is not a finite number")]
    Coefficient { index: usize, value: String },
}

impl FromStr for Transform {
    type Err = TransformParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        let [a, b, xoff, d, e, yoff] = parts.as_slice() else {
            return Err(TransformParseError::Arity { found: parts.len() });
        };
        let parse = |index: usize, value: &str| {
            value
                .parse::<f64>()
                .ok()
                .filter(|number| number.is_finite())
                .ok_or_else(|| TransformParseError::Coefficient {
                    index,
                    value: value.to_owned(),
                })
        };
        Ok(Self {
            a: parse(0, *a)?,
            b: parse(1, *b)?,
            xoff: parse(2, *xoff)?,
            d: parse(3, *d)?,
            e: parse(4, *e)?,
            yoff: parse(5, *yoff)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Property;
    use geo::{Geometry, Point};
    use rstest::rstest;

    #[rstest]
    fn transforms_nested_features() {
        let child = Feature::new("BuildingPart").with_geometry(Geometry::Point(Point::new(2.0, 3.0)));
        let mut feature = Feature::new("Building").with_property(Property::new(
            "consistsOfBuildingPart",
            PropertyValue::Feature(Box::new(child)),
        ));
        let scale = Transform {
            a: 2.0,
            e: 2.0,
            ..Transform::IDENTITY
        };

        scale.apply(&mut feature);

        let nested = feature.children().next().expect("child feature");
        assert_eq!(nested.geometry, Some(Geometry::Point(Point::new(4.0, 6.0))));
    }

    #[rstest]
    #[case("1,0,0,0,1", TransformParseError::Arity { found: 5 })]
    #[case("1,0,x,0,1,0", TransformParseError::Coefficient { index: 2, value: "x".into() })]
    #[case("1,0,inf,0,1,0", TransformParseError::Coefficient { index: 2, value: "inf".into() })]
    fn rejects_malformed_text(#[case] text: &str, #[case] expected: TransformParseError) {
        assert_eq!(text.parse::<Transform>(), Err(expected));
    }
}
