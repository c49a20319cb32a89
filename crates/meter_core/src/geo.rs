//! Geographic helpers: great-circle distance between coordinates.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Haversine distance between two coordinates in kilometres.
///
/// Symmetric, zero for identical points, never fails. Non-finite inputs yield NaN
/// rather than panicking; callers that care reject such fixes upstream.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    // Rounding can push h a hair above 1.0 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_zero_apart() {
        let point = Coordinate::new(9.0, 38.0);
        assert_eq!(distance_km(point, point), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (Coordinate::new(9.0, 38.0), Coordinate::new(9.001, 38.0)),
            (Coordinate::new(52.52, 13.405), Coordinate::new(48.8566, 2.3522)),
            (Coordinate::new(-33.86, 151.2), Coordinate::new(40.71, -74.0)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance_km(a, b), distance_km(b, a));
        }
    }

    #[test]
    fn one_thousandth_degree_of_latitude_is_about_111_metres() {
        let a = Coordinate::new(9.000, 38.000);
        let b = Coordinate::new(9.001, 38.000);
        let d = distance_km(a, b);
        assert!((d - 0.1112).abs() < 0.001, "got {d}");
    }

    #[test]
    fn distance_grows_with_angular_separation() {
        let origin = Coordinate::new(9.0, 38.0);
        let mut previous = 0.0;
        for step in 1..20 {
            let d = distance_km(origin, Coordinate::new(9.0 + step as f64 * 0.01, 38.0));
            assert!(d > previous);
            previous = d;
        }
    }

    #[test]
    fn antipodal_points_are_half_circumference() {
        let d = distance_km(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }
}
