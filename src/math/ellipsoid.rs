//! Reference ellipsoid model and geodetic/ECEF conversions

use bevy::math::DVec3;
use serde::{Deserialize, Serialize};

/// Convergence threshold for the iterative ECEF -> geodetic latitude solve,
/// in radians.
const LATITUDE_CONVERGENCE_RAD: f64 = 1e-12;

/// Iteration cap for the latitude solve. The fixed point converges in a
/// handful of steps for any position outside the Earth's core.
const MAX_LATITUDE_ITERATIONS: usize = 10;

/// Below this equatorial distance (meters) a position is treated as polar and
/// its longitude is undefined.
const POLAR_AXIS_EPSILON_M: f64 = 1e-9;

/// A reference ellipsoid of revolution, given by its semi-axes in meters.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    semimajor_axis: f64,
    semiminor_axis: f64,
    first_eccentricity_sq: f64,
}

impl Ellipsoid {
    /// The WGS84 ellipsoid.
    pub const WGS84: Ellipsoid = Ellipsoid::new(6_378_137.0, 6_356_752.314_245_179);

    /// An ellipsoid from its equatorial and polar semi-axes in meters.
    pub const fn new(semimajor_axis: f64, semiminor_axis: f64) -> Self {
        Self {
            semimajor_axis,
            semiminor_axis,
            first_eccentricity_sq: 1.0
                - (semiminor_axis * semiminor_axis) / (semimajor_axis * semimajor_axis),
        }
    }

    /// Equatorial radius in meters.
    pub fn semimajor_axis(&self) -> f64 {
        self.semimajor_axis
    }

    /// Polar radius in meters.
    pub fn semiminor_axis(&self) -> f64 {
        self.semiminor_axis
    }

    /// Prime vertical radius of curvature at a given sine of latitude.
    fn prime_vertical_radius(&self, sin_lat: f64) -> f64 {
        self.semimajor_axis / (1.0 - self.first_eccentricity_sq * sin_lat * sin_lat).sqrt()
    }

    /// Convert a geodetic position to ECEF meters.
    pub fn geodetic_to_ecef(&self, geodetic: Geodetic) -> DVec3 {
        let lat = geodetic.latitude.to_radians();
        let lon = geodetic.longitude.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();

        let n = self.prime_vertical_radius(sin_lat);
        let h = geodetic.height;

        DVec3::new(
            (n + h) * cos_lat * cos_lon,
            (n + h) * cos_lat * sin_lon,
            (n * (1.0 - self.first_eccentricity_sq) + h) * sin_lat,
        )
    }

    /// Convert an ECEF position in meters to geodetic coordinates.
    ///
    /// Latitude is solved iteratively. At the exact poles the longitude is
    /// mathematically undefined and 0 is returned; callers that track a
    /// position over time may prefer to keep their previous longitude.
    pub fn ecef_to_geodetic(&self, ecef: DVec3) -> Geodetic {
        let p = ecef.x.hypot(ecef.y);
        let longitude = if p < POLAR_AXIS_EPSILON_M {
            0.0
        } else {
            ecef.y.atan2(ecef.x).to_degrees()
        };

        // Bootstrap from the closed-form latitude of the height-zero problem.
        let mut lat = ecef.z.atan2(p * (1.0 - self.first_eccentricity_sq));
        for _ in 0..MAX_LATITUDE_ITERATIONS {
            let sin_lat = lat.sin();
            let n = self.prime_vertical_radius(sin_lat);
            let next = (ecef.z + self.first_eccentricity_sq * n * sin_lat).atan2(p);
            let done = (next - lat).abs() < LATITUDE_CONVERGENCE_RAD;
            lat = next;
            if done {
                break;
            }
        }

        let (sin_lat, cos_lat) = lat.sin_cos();
        let n = self.prime_vertical_radius(sin_lat);
        let height = if cos_lat.abs() > 1e-10 {
            p / cos_lat - n
        } else {
            // Polar: the prime vertical degenerates; measure along the axis.
            ecef.z.abs() - self.semiminor_axis
        };

        Geodetic::new(longitude, lat.to_degrees(), height)
    }

    /// Outward geodetic surface normal at an ECEF position.
    ///
    /// This is the ellipsoid gradient direction, not the geocentric
    /// direction; the two differ everywhere except the equator and poles.
    pub fn geodetic_surface_normal(&self, ecef: DVec3) -> DVec3 {
        let a2 = self.semimajor_axis * self.semimajor_axis;
        let b2 = self.semiminor_axis * self.semiminor_axis;
        DVec3::new(ecef.x / a2, ecef.y / a2, ecef.z / b2).normalize_or(DVec3::Z)
    }

    /// Outward geodetic surface normal for a geodetic position.
    pub fn surface_normal_from_geodetic(&self, geodetic: Geodetic) -> DVec3 {
        let lat = geodetic.latitude.to_radians();
        let lon = geodetic.longitude.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
    }
}

/// A geodetic position: longitude and latitude in degrees, height in meters
/// above the ellipsoid.
///
/// Height above the ellipsoid is not a geoid height or a height above mean
/// sea level; those can differ by tens of meters depending on location.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    /// Longitude in degrees, in (-180, 180].
    pub longitude: f64,
    /// Latitude in degrees, in [-90, 90].
    pub latitude: f64,
    /// Height in meters above the ellipsoid.
    pub height: f64,
}

impl Geodetic {
    /// A geodetic position with the longitude wrapped to (-180, 180] and the
    /// latitude clamped to [-90, 90].
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude: wrap_longitude(longitude),
            latitude: clamp_latitude(latitude),
            height,
        }
    }
}

/// Wrap a longitude in degrees to (-180, 180].
pub fn wrap_longitude(degrees: f64) -> f64 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 { 180.0 } else { wrapped }
}

/// Clamp a latitude in degrees to [-90, 90]. Latitudes never wrap; the poles
/// are singular.
pub fn clamp_latitude(degrees: f64) -> f64 {
    degrees.clamp(-90.0, 90.0)
}
