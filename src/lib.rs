//! Globe anchoring for Bevy entities.
//!
//! Attaching a [`GlobeAnchor`] to an entity keeps its local [`Transform`]
//! (f32, scene coordinates) in lockstep with a global geospatial pose held in
//! f64: an entity-to-ECEF affine transform plus derived geodetic
//! (longitude/latitude/height) and ECEF (x/y/z) scalars. Edits can flow in
//! either direction:
//!
//! - Moving or rotating the entity through normal engine mechanisms updates
//!   the globe pose and the scalar fields automatically.
//! - [`GlobeAnchor::move_to_geodetic`] / [`GlobeAnchor::move_to_ecef`] place
//!   the entity at a globe position and write the local pose back.
//!
//! A [`Georeference`] entity defines where the scene's local origin sits on
//! the globe; anchors resolve one lazily (first in the scene, or a default is
//! spawned). When `adjust_orientation_for_globe_when_moving` is enabled, an
//! anchor's orientation is transported along the surface as it moves so its
//! up axis keeps tracking the ellipsoid normal.
//!
//! ```rust,ignore
//! app.add_plugins(GlobeAnchorPlugin);
//! commands.spawn((Transform::default(), GlobeAnchor::default()));
//! ```
//!
//! [`Transform`]: bevy::prelude::Transform

pub mod anchor;
pub mod georeference;
pub mod math;

pub use anchor::{
    AnchorTransformSynced, GlobeAnchor, GlobeAnchorPlugin, GlobeTransform, WorldOrigin,
};
pub use georeference::{Georeference, resolve_georeference};
pub use math::{Ellipsoid, Geodetic};
