//! Tangent frames on the ellipsoid and orientation transport

use bevy::math::{DMat3, DMat4, DQuat, DVec3};
use std::f64::consts::PI;

use crate::math::ellipsoid::{Ellipsoid, Geodetic};

/// Dot-product threshold below which two unit vectors are treated as
/// antiparallel and the half-turn fallback axis is used.
const ANTIPARALLEL_DOT: f64 = -1.0 + 1e-10;

/// East, north, and up unit vectors at an ECEF position.
///
/// Up is the geodetic surface normal. At the poles east/north are undefined;
/// the longitude-zero parameterization is used there (east = +Y).
pub fn east_north_up(ellipsoid: &Ellipsoid, ecef: DVec3) -> (DVec3, DVec3, DVec3) {
    let up = ellipsoid.geodetic_surface_normal(ecef);
    let east = DVec3::Z.cross(up);
    let east = if east.length_squared() < 1e-12 {
        DVec3::Y
    } else {
        east.normalize()
    };
    let north = up.cross(east);
    (east, north, up)
}

/// East, north, and up unit vectors for a geodetic position, computed in
/// closed form from the longitude and latitude.
pub fn tangent_frame_from_geodetic(geodetic: Geodetic) -> (DVec3, DVec3, DVec3) {
    let lat = geodetic.latitude.to_radians();
    let lon = geodetic.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    let east = DVec3::new(-sin_lon, cos_lon, 0.0);
    let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
    (east, north, up)
}

/// Ground-aligned orientation at an ECEF position: +X east, +Z south, +Y up
/// (the outgoing ellipsoid normal). Right-handed with determinant +1.
pub fn east_south_up_rotation(ellipsoid: &Ellipsoid, ecef: DVec3) -> DQuat {
    let (east, north, up) = east_north_up(ellipsoid, ecef);
    DQuat::from_mat3(&DMat3::from_cols(east, up, -north))
}

/// The minimal-arc rotation taking unit vector `from` to unit vector `to`.
///
/// Antiparallel inputs have no unique shortest arc; they rotate half a turn
/// about a deterministic axis orthogonal to `from`.
pub fn minimal_rotation_arc(from: DVec3, to: DVec3) -> DQuat {
    if from.dot(to) < ANTIPARALLEL_DOT {
        return DQuat::from_axis_angle(from.any_orthonormal_vector(), PI);
    }
    DQuat::from_rotation_arc(from, to)
}

/// Rotation that carries a surface-aligned frame from one globe position to
/// another: the minimal arc between the geodetic surface normals at the two
/// positions. Applying it to an orientation preserves heading and any
/// deliberate tilt relative to the ground while tracking curvature.
pub fn surface_frame_transport(ellipsoid: &Ellipsoid, old_ecef: DVec3, new_ecef: DVec3) -> DQuat {
    let old_up = ellipsoid.geodetic_surface_normal(old_ecef);
    let new_up = ellipsoid.geodetic_surface_normal(new_ecef);
    minimal_rotation_arc(old_up, new_up)
}

/// Rotate the basis vectors of an affine transform, keeping its translation.
/// Scale and shear carried by the basis are preserved.
pub fn rotate_basis(transform: &DMat4, rotation: DQuat) -> DMat4 {
    let mut rotated = DMat4::from_quat(rotation) * *transform;
    rotated.w_axis = transform.w_axis;
    rotated
}
