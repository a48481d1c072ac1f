//! Georeference component

use bevy::math::DMat4;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::math::ellipsoid::{Ellipsoid, Geodetic};
use crate::math::frames::tangent_frame_from_geodetic;

/// Defines the mapping between local scene coordinates and ECEF.
///
/// The local frame is right-handed, Y-up, in meters: at the origin, +X points
/// east, +Y points up along the ellipsoid normal, and +Z points south.
/// Mutating the origin or ellipsoid through the setters triggers Bevy change
/// detection, which re-derives the local pose of every anchored entity from
/// its globe transform.
#[derive(Component, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Georeference {
    ellipsoid: Ellipsoid,
    origin: Geodetic,
}

impl Default for Georeference {
    fn default() -> Self {
        Self {
            ellipsoid: Ellipsoid::WGS84,
            origin: Geodetic::new(-105.25737, 39.736401, 2250.0),
        }
    }
}

impl Georeference {
    /// A georeference with an explicit ellipsoid and origin.
    pub fn new(ellipsoid: Ellipsoid, origin: Geodetic) -> Self {
        Self { ellipsoid, origin }
    }

    /// A WGS84 georeference with the given origin.
    pub fn from_origin(origin: Geodetic) -> Self {
        Self {
            ellipsoid: Ellipsoid::WGS84,
            origin,
        }
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    pub fn origin(&self) -> Geodetic {
        self.origin
    }

    /// Move the local origin to a new geodetic position.
    pub fn set_origin(&mut self, origin: Geodetic) {
        self.origin = origin;
    }

    /// Replace the ellipsoid model. The origin keeps its geodetic value and
    /// is reinterpreted on the new ellipsoid.
    pub fn set_ellipsoid(&mut self, ellipsoid: Ellipsoid) {
        self.ellipsoid = ellipsoid;
    }

    /// Affine transform from local scene coordinates (meters) to ECEF.
    pub fn local_to_ecef(&self) -> DMat4 {
        let origin_ecef = self.ellipsoid.geodetic_to_ecef(self.origin);
        let (east, north, up) = tangent_frame_from_geodetic(self.origin);
        DMat4::from_cols(
            east.extend(0.0),
            up.extend(0.0),
            (-north).extend(0.0),
            origin_ecef.extend(1.0),
        )
    }

    /// Affine transform from ECEF to local scene coordinates (meters).
    pub fn ecef_to_local(&self) -> DMat4 {
        self.local_to_ecef().inverse()
    }
}
