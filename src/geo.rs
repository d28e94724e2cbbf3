//! Great-circle helpers. Angles in degrees, distances in meters, f64 throughout.

use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Haversine distance between two points
pub fn distance_m(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let phi_1 = from.latitude.to_radians();
    let phi_2 = to.latitude.to_radians();
    let delta_phi = (to.latitude - from.latitude).to_radians();
    let delta_lambda = (to.longitude - from.longitude).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi_1.cos() * phi_2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from `from` towards `to`, in [0, 360)
pub fn bearing_deg(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let phi_1 = from.latitude.to_radians();
    let phi_2 = to.latitude.to_radians();
    let delta_lambda = (to.longitude - from.longitude).to_radians();

    let y = delta_lambda.sin() * phi_2.cos();
    let x = phi_1.cos() * phi_2.sin() - phi_1.sin() * phi_2.cos() * delta_lambda.cos();
    wrap_360(y.atan2(x).to_degrees())
}

/// Normalize to [0, 360)
pub fn wrap_360(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Normalize to (-180, 180]
pub fn wrap_180(angle: f64) -> f64 {
    let wrapped = wrap_360(angle);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Signed turn from `heading` to `bearing`, positive means turn right (clockwise).
pub fn heading_error(bearing: f64, heading: f64) -> f64 {
    // compass angles grow clockwise, rotations counter clockwise
    let current = na::Rotation2::new(-heading.to_radians());
    let target = na::Rotation2::new(-bearing.to_radians());
    wrap_180(-current.angle_to(&target).to_degrees())
}
