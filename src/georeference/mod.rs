//! Georeference: where the scene's local coordinate origin sits on the globe
//!
//! A [`Georeference`] entity defines the ellipsoid and the geodetic position
//! of the local origin, and from them the affine transforms between local
//! scene coordinates and ECEF. Anchors hold `Entity` handles to it and
//! resolve them through [`resolve_georeference`]; the scene owns the entity.

pub mod components;
pub mod resolver;

pub use components::Georeference;
pub use resolver::resolve_georeference;
