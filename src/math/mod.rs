//! Geodetic and tangent-frame math
//!
//! All computations are f64; angles are degrees at public boundaries and
//! radians internally.

pub mod ellipsoid;
pub mod frames;

pub use ellipsoid::{Ellipsoid, Geodetic, clamp_latitude, wrap_longitude};
pub use frames::{
    east_north_up, east_south_up_rotation, minimal_rotation_arc, rotate_basis,
    surface_frame_transport, tangent_frame_from_geodetic,
};
