//! Globe anchor component: the dual-representation transform engine

use bevy::math::{DMat4, DVec3};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::georeference::components::Georeference;
use crate::math::ellipsoid::{Ellipsoid, Geodetic};
use crate::math::frames::{
    east_south_up_rotation, minimal_rotation_arc, rotate_basis, surface_frame_transport,
};

/// Positions closer than this (meters) count as unmoved for orientation
/// adjustment purposes.
const POSITION_EPSILON_M: f64 = 1e-9;

/// The cached mapping from an entity's local frame to ECEF.
///
/// Modeled as a tagged union rather than a matrix-plus-flag so that reading a
/// pose that was never computed is a checked case, not a garbage value.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum GlobeTransform {
    /// Not yet computed; the entity's `Transform` is the only authoritative
    /// representation of its pose.
    Invalid,
    /// Authoritative pose; the geodetic and ECEF scalars derive from the
    /// matrix translation.
    Valid(DMat4),
}

impl GlobeTransform {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn matrix(&self) -> Option<DMat4> {
        match self {
            Self::Valid(matrix) => Some(*matrix),
            Self::Invalid => None,
        }
    }
}

/// Anchors an entity to the globe and maintains precise placement.
///
/// When the entity is moved through normal engine mechanisms, the globe
/// transform and the geodetic/ECEF scalar fields follow automatically. The
/// entity can also be placed directly in ECEF or geodetic terms with
/// [`move_to_ecef`](Self::move_to_ecef) /
/// [`move_to_geodetic`](Self::move_to_geodetic).
///
/// Serialization persists the globe transform and the two behavioral flags;
/// everything else is derived on load or transient. `Entity` handles are
/// never persisted (they are not stable across sessions).
#[derive(Component, Debug, Serialize, Deserialize)]
#[require(Transform)]
pub struct GlobeAnchor {
    /// The designated georeference. `None` means "use the first one in the
    /// scene, creating a default if necessary".
    #[serde(skip)]
    georeference: Option<Entity>,
    /// Cached result of resolution; cleared on invalidation or when the
    /// designated georeference changes.
    #[serde(skip)]
    resolved_georeference: Option<Entity>,
    globe_transform: GlobeTransform,
    #[serde(skip)]
    geodetic: Geodetic,
    #[serde(skip)]
    ecef: DVec3,
    teleport_when_updating_transform: bool,
    adjust_orientation_for_globe_when_moving: bool,
    /// Set while a write-back of the local pose is in flight so the
    /// resulting change notification is not re-processed.
    #[serde(skip)]
    updating_transform: bool,
}

impl Default for GlobeAnchor {
    fn default() -> Self {
        Self {
            georeference: None,
            resolved_georeference: None,
            globe_transform: GlobeTransform::Invalid,
            geodetic: Geodetic::default(),
            ecef: DVec3::ZERO,
            teleport_when_updating_transform: true,
            adjust_orientation_for_globe_when_moving: true,
            updating_transform: false,
        }
    }
}

/// Duplicating an anchor keeps its settings but resets the globe transform:
/// a copy placed elsewhere cannot assume the original's globe pose is still
/// meaningful, so it recomputes from its new local pose instead.
impl Clone for GlobeAnchor {
    fn clone(&self) -> Self {
        Self {
            georeference: self.georeference,
            resolved_georeference: None,
            globe_transform: GlobeTransform::Invalid,
            geodetic: Geodetic::default(),
            ecef: DVec3::ZERO,
            teleport_when_updating_transform: self.teleport_when_updating_transform,
            adjust_orientation_for_globe_when_moving: self.adjust_orientation_for_globe_when_moving,
            updating_transform: false,
        }
    }
}

impl GlobeAnchor {
    /// Latitude in degrees, in [-90, 90].
    pub fn latitude(&self) -> f64 {
        self.geodetic.latitude
    }

    /// Longitude in degrees, in (-180, 180].
    pub fn longitude(&self) -> f64 {
        self.geodetic.longitude
    }

    /// Height in meters above the ellipsoid. Not a geoid height or height
    /// above mean sea level.
    pub fn height(&self) -> f64 {
        self.geodetic.height
    }

    /// Longitude (x), latitude (y) in degrees and height (z) in meters.
    pub fn longitude_latitude_height(&self) -> DVec3 {
        DVec3::new(
            self.geodetic.longitude,
            self.geodetic.latitude,
            self.geodetic.height,
        )
    }

    pub fn ecef_x(&self) -> f64 {
        self.ecef.x
    }

    pub fn ecef_y(&self) -> f64 {
        self.ecef.y
    }

    pub fn ecef_z(&self) -> f64 {
        self.ecef.z
    }

    /// ECEF position in meters.
    pub fn ecef(&self) -> DVec3 {
        self.ecef
    }

    pub fn globe_transform(&self) -> &GlobeTransform {
        &self.globe_transform
    }

    /// Whether write-backs should move the entity immediately, without
    /// affecting any velocity a physics integration maintains for it.
    pub fn teleport_when_updating_transform(&self) -> bool {
        self.teleport_when_updating_transform
    }

    pub fn set_teleport_when_updating_transform(&mut self, value: bool) {
        self.teleport_when_updating_transform = value;
    }

    /// Whether to rotate the entity to account for globe curvature whenever
    /// its globe position changes. Without this, an entity keeping its
    /// orientation while moving across the surface ends up increasingly
    /// tilted, and upside-down at the antipode.
    pub fn adjust_orientation_for_globe_when_moving(&self) -> bool {
        self.adjust_orientation_for_globe_when_moving
    }

    pub fn set_adjust_orientation_for_globe_when_moving(&mut self, value: bool) {
        self.adjust_orientation_for_globe_when_moving = value;
    }

    /// The designated georeference, if any.
    pub fn georeference(&self) -> Option<Entity> {
        self.georeference
    }

    /// Designate a georeference, invalidating the cached resolution.
    pub fn set_georeference(&mut self, georeference: Option<Entity>) {
        self.georeference = georeference;
        self.resolved_georeference = None;
    }

    /// The cached resolved georeference, if resolution has happened.
    pub fn resolved_georeference(&self) -> Option<Entity> {
        self.resolved_georeference
    }

    /// Clear the cached resolution; the next resolve re-runs the search.
    pub fn invalidate_resolved_georeference(&mut self) {
        self.resolved_georeference = None;
    }

    pub(crate) fn set_resolved_georeference(&mut self, entity: Entity) {
        self.resolved_georeference = Some(entity);
    }

    /// Consume the write-back guard. Returns true when the most recent
    /// `Transform` change was the anchor's own write.
    pub(crate) fn take_transform_write_guard(&mut self) -> bool {
        let was_updating = self.updating_transform;
        self.updating_transform = false;
        was_updating
    }

    /// Recompute the globe transform from the entity's current local pose.
    /// The scalar fields are not touched; callers that need them refreshed
    /// call the scalar updates explicitly.
    pub fn update_globe_from_local(
        &mut self,
        georef: &Georeference,
        transform: &Transform,
        origin: DVec3,
    ) -> DMat4 {
        let matrix = globe_matrix_from_local(georef, transform, origin);
        self.globe_transform = GlobeTransform::Valid(matrix);
        matrix
    }

    /// The local pose derived from the globe transform, or `None` while the
    /// globe transform has not been computed. `origin` is the world-origin
    /// offset to derive against, which makes this the re-basing primitive as
    /// well. Pure; the caller writes the scene graph.
    pub fn local_from_globe(&self, georef: &Georeference, origin: DVec3) -> Option<Transform> {
        let matrix = self.globe_transform.matrix()?;
        let local = georef.ecef_to_local() * matrix;
        let (scale, rotation, translation) = local.to_scale_rotation_translation();
        Some(Transform {
            translation: (translation - origin).as_vec3(),
            rotation: rotation.as_quat(),
            scale: scale.as_vec3(),
        })
    }

    /// Install a new globe transform. When orientation adjustment is enabled
    /// and the position moved, the orientation is first transported along the
    /// surface from the previous pose. Returns the installed transform.
    /// Scalars are the caller's responsibility.
    pub fn set_globe_transform(&mut self, georef: &Georeference, new_transform: DMat4) -> DMat4 {
        let installed = match self.globe_transform {
            GlobeTransform::Valid(old) if self.adjust_orientation_for_globe_when_moving => {
                let old_position = old.w_axis.truncate();
                let new_position = new_transform.w_axis.truncate();
                if old_position.abs_diff_eq(new_position, POSITION_EPSILON_M) {
                    new_transform
                } else {
                    let transport =
                        surface_frame_transport(georef.ellipsoid(), old_position, new_position);
                    rotate_basis(&new_transform, transport)
                }
            }
            _ => new_transform,
        };
        self.globe_transform = GlobeTransform::Valid(installed);
        installed
    }

    /// Refresh the ECEF scalars from the globe transform translation. No
    /// effect until the globe transform has been computed.
    pub fn update_ecef_scalars(&mut self) {
        if let GlobeTransform::Valid(matrix) = self.globe_transform {
            self.ecef = matrix.w_axis.truncate();
        }
    }

    /// Refresh the geodetic scalars from the globe transform translation. No
    /// effect until the globe transform has been computed. On the polar axis
    /// the longitude is undefined and the previous value is kept.
    pub fn update_geodetic_scalars(&mut self, ellipsoid: &Ellipsoid) {
        let GlobeTransform::Valid(matrix) = self.globe_transform else {
            return;
        };
        let position = matrix.w_axis.truncate();
        let mut geodetic = ellipsoid.ecef_to_geodetic(position);
        if position.x.abs() < POSITION_EPSILON_M && position.y.abs() < POSITION_EPSILON_M {
            geodetic.longitude = self.geodetic.longitude;
        }
        self.geodetic = geodetic;
    }

    /// Compute the globe transform and both scalar triples from the local
    /// pose if they have not been computed yet, so that subsequent reads are
    /// consistent with the scene.
    pub fn ensure_globe_transform(
        &mut self,
        georef: &Georeference,
        transform: &Transform,
        origin: DVec3,
    ) {
        if self.globe_transform.is_valid() {
            return;
        }
        self.update_globe_from_local(georef, transform, origin);
        self.update_ecef_scalars();
        self.update_geodetic_scalars(georef.ellipsoid());
    }

    /// Apply the current ECEF scalars: rebuild the globe transform around
    /// them (orientation carried over, curvature-adjusted per the flag),
    /// refresh the geodetic scalars, and write the local pose back.
    pub fn apply_ecef_scalars(
        &mut self,
        georef: &Georeference,
        transform: &mut Transform,
        origin: DVec3,
    ) {
        let target = self.ecef;
        self.ensure_globe_transform(georef, transform, origin);
        let Some(current) = self.globe_transform.matrix() else {
            return;
        };
        let mut candidate = current;
        candidate.w_axis = target.extend(1.0);
        self.set_globe_transform(georef, candidate);
        self.ecef = target;
        self.update_geodetic_scalars(georef.ellipsoid());
        self.push_local_pose(georef, transform, origin);
    }

    /// Apply the current geodetic scalars: rebuild the globe transform around
    /// them (orientation carried over, curvature-adjusted per the flag),
    /// refresh the ECEF scalars, and write the local pose back.
    pub fn apply_geodetic_scalars(
        &mut self,
        georef: &Georeference,
        transform: &mut Transform,
        origin: DVec3,
    ) {
        let target = self.geodetic;
        self.ensure_globe_transform(georef, transform, origin);
        let Some(current) = self.globe_transform.matrix() else {
            return;
        };
        let target_ecef = georef.ellipsoid().geodetic_to_ecef(target);
        let mut candidate = current;
        candidate.w_axis = target_ecef.extend(1.0);
        self.set_globe_transform(georef, candidate);
        self.geodetic = target;
        self.ecef = target_ecef;
        self.push_local_pose(georef, transform, origin);
    }

    /// Move the entity to an ECEF position in meters.
    pub fn move_to_ecef(
        &mut self,
        position: DVec3,
        georef: &Georeference,
        transform: &mut Transform,
        origin: DVec3,
    ) {
        self.ecef = position;
        self.apply_ecef_scalars(georef, transform, origin);
    }

    /// Move the entity to a longitude (degrees), latitude (degrees), height
    /// (meters) position. Longitude wraps; latitude clamps.
    pub fn move_to_geodetic(
        &mut self,
        longitude: f64,
        latitude: f64,
        height: f64,
        georef: &Georeference,
        transform: &mut Transform,
        origin: DVec3,
    ) {
        self.geodetic = Geodetic::new(longitude, latitude, height);
        self.apply_geodetic_scalars(georef, transform, origin);
    }

    /// Rotate the entity minimally so its local +Y axis aligns with the
    /// ellipsoid surface normal at its current position, regardless of the
    /// orientation-adjustment flag, and write the local pose back.
    pub fn snap_local_up_to_ellipsoid_normal(
        &mut self,
        georef: &Georeference,
        transform: &mut Transform,
        origin: DVec3,
    ) {
        self.ensure_globe_transform(georef, transform, origin);
        let Some(matrix) = self.globe_transform.matrix() else {
            return;
        };
        let up = matrix.y_axis.truncate();
        if up.length_squared() < 1e-24 {
            warn!("globe transform has a degenerate basis; cannot snap the up axis");
            return;
        }
        let position = matrix.w_axis.truncate();
        let normal = georef.ellipsoid().geodetic_surface_normal(position);
        let snapped = rotate_basis(&matrix, minimal_rotation_arc(up.normalize(), normal));
        self.globe_transform = GlobeTransform::Valid(snapped);
        self.push_local_pose(georef, transform, origin);
    }

    /// Replace the entity's orientation with the ground-aligned basis at its
    /// current position (+X east, +Z south, +Y up), keeping scale, and write
    /// the local pose back. Any prior heading is discarded.
    pub fn snap_to_east_south_up(
        &mut self,
        georef: &Georeference,
        transform: &mut Transform,
        origin: DVec3,
    ) {
        self.ensure_globe_transform(georef, transform, origin);
        let Some(matrix) = self.globe_transform.matrix() else {
            return;
        };
        let position = matrix.w_axis.truncate();
        let (scale, _, _) = matrix.to_scale_rotation_translation();
        let rotation = east_south_up_rotation(georef.ellipsoid(), position);
        let snapped = DMat4::from_scale_rotation_translation(scale, rotation, position);
        self.globe_transform = GlobeTransform::Valid(snapped);
        self.push_local_pose(georef, transform, origin);
    }

    /// Derive the local pose from the globe transform and write it to the
    /// scene graph, raising the write-back guard so the resulting change
    /// notification is not re-processed.
    pub(crate) fn push_local_pose(
        &mut self,
        georef: &Georeference,
        transform: &mut Transform,
        origin: DVec3,
    ) {
        if let Some(local) = self.local_from_globe(georef, origin) {
            self.updating_transform = true;
            *transform = local;
        }
    }
}

/// The entity-to-ECEF matrix for a local pose under a georeference and
/// world-origin offset.
pub(crate) fn globe_matrix_from_local(
    georef: &Georeference,
    transform: &Transform,
    origin: DVec3,
) -> DMat4 {
    let local = DMat4::from_scale_rotation_translation(
        transform.scale.as_dvec3(),
        transform.rotation.as_dquat(),
        transform.translation.as_dvec3() + origin,
    );
    georef.local_to_ecef() * local
}
