use geo::{point, GeodesicDistance};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl ReferencePoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Distance in meters between two points on the WGS84 ellipsoid (Karney's geodesic).
pub fn geodesic_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // geo points are x = lon, y = lat
    let a = point!(x: lon1, y: lat1);
    let b = point!(x: lon2, y: lat2);
    a.geodesic_distance(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_points_are_zero() {
        assert_eq!(geodesic_distance(52.52, 13.405, 52.52, 13.405), 0.0);
    }

    #[test]
    fn test_one_degree_of_longitude_on_equator() {
        // WGS84 equatorial radius gives 111_319.49 m per degree
        let dist = geodesic_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_319.49).abs() < 0.5, "got {dist}");
    }

    #[test]
    fn test_short_hop_at_mid_latitude() {
        // 0.001 degrees of latitude near 48N is roughly 111.2 m on the ellipsoid
        let dist = geodesic_distance(48.0, 11.0, 48.001, 11.0);
        assert!((dist - 111.2).abs() < 0.5, "got {dist}");
    }

    #[test]
    fn test_symmetric() {
        let ab = geodesic_distance(51.5074, -0.1278, 48.8566, 2.3522);
        let ba = geodesic_distance(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((ab - ba).abs() < 1e-6);
        assert!((ab - 343_900.0).abs() < 2_000.0, "got {ab}");
    }
}
