//! Shared resources for globe anchoring

use bevy::math::DVec3;
use bevy::prelude::*;

/// Floating-origin offset of the engine's render space, in local scene
/// meters.
///
/// Large worlds re-base their origin to keep f32 render coordinates small
/// near the area of interest. Changing the offset re-derives the local pose
/// of every anchored entity from its globe transform; the globe-side state
/// (globe transform, geodetic and ECEF scalars) is untouched.
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq)]
pub struct WorldOrigin {
    /// Offset subtracted from absolute local coordinates to obtain render
    /// coordinates.
    pub offset: DVec3,
}
