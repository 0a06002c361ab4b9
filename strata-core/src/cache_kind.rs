//! Namespaces that keep reference resolution scoped per entity type.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Entity namespace used by the reference caches.
///
/// Object identifiers only need to be unique within one kind: a feature and
/// an address may share the identifier `"ID_1"` without colliding.
///
/// # Examples
/// ```
/// use strata_core::CacheKind;
///
/// assert_eq!(CacheKind::SurfaceData.as_str(), "surface_data");
/// assert_eq!(CacheKind::ALL.len(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CacheKind {
    /// City objects stored in the `feature` table.
    Feature,
    /// Postal addresses.
    Address,
    /// Materials and textures referenced from appearances.
    SurfaceData,
    /// Shared prototype geometries.
    ImplicitGeometry,
    /// Texture images, keyed by their URI rather than an object id.
    TextureImage,
}

impl CacheKind {
    /// Every kind, in the order the resolution sweep visits them.
    pub const ALL: [Self; 5] = [
        Self::Feature,
        Self::Address,
        Self::SurfaceData,
        Self::ImplicitGeometry,
        Self::TextureImage,
    ];

    /// Stable lowercase name, also used to derive store map names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Address => "address",
            Self::SurfaceData => "surface_data",
            Self::ImplicitGeometry => "implicit_geometry",
            Self::TextureImage => "texture_image",
        }
    }

    /// Parse a name produced by [`CacheKind::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether a feature property may reference an entity of this kind.
    pub const fn is_property_target(self) -> bool {
        matches!(self, Self::Feature | Self::Address | Self::ImplicitGeometry)
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
