//! Geographic helpers: bounding-box prefilter and great-circle distance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers per degree of latitude in the flat-Earth box approximation.
const KM_PER_DEGREE: f64 = 111.0;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True unless either component is NaN.
    pub fn is_valid(&self) -> bool {
        !self.latitude.is_nan() && !self.longitude.is_nan()
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// Rectangular lat/lon region used to narrow the upstream query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        }
    }

    /// Box of half-size `radius_km` around `center`.
    ///
    /// Uses a flat-Earth approximation that only holds for small radii. Close
    /// to the poles the longitude delta blows up and the box degenerates to a
    /// very wide one.
    pub fn around(center: Coordinates, radius_km: f64) -> Self {
        let lat_delta = radius_km / KM_PER_DEGREE;
        let lon_delta = radius_km / (KM_PER_DEGREE * center.latitude.to_radians().cos());

        Self {
            lat_min: center.latitude - lat_delta,
            lon_min: center.longitude - lon_delta,
            lat_max: center.latitude + lat_delta,
            lon_max: center.longitude + lon_delta,
        }
    }

    /// Inclusive containment check.
    pub fn contains(&self, point: Coordinates) -> bool {
        (self.lat_min..=self.lat_max).contains(&point.latitude)
            && (self.lon_min..=self.lon_max).contains(&point.longitude)
    }

    pub fn to_query_string(&self) -> String {
        format!(
            "lamin={}&lomin={}&lamax={}&lomax={}",
            self.lat_min, self.lon_min, self.lat_max, self.lon_max
        )
    }
}

/// Great-circle distance in kilometers.
///
/// NaN inputs propagate; callers reject invalid coordinates first.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).abs().to_radians();
    let dlon = (b.longitude - a.longitude).abs().to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MADRID: Coordinates = Coordinates::new(40.417, -3.704);

    #[test]
    fn test_query_string() {
        let bbox = BoundingBox::new(40.0, -75.0, 45.0, -70.0);
        assert_eq!(bbox.to_query_string(), "lamin=40&lomin=-75&lamax=45&lomax=-70");
    }

    #[test]
    fn test_haversine_identity_and_symmetry() {
        let points = [
            MADRID,
            Coordinates::new(0.0, 0.0),
            Coordinates::new(-33.86, 151.21),
            Coordinates::new(89.9, 179.9),
        ];

        for a in points {
            assert_eq!(haversine_km(a, a), 0.0);
            for b in points {
                assert_eq!(haversine_km(a, b), haversine_km(b, a));
            }
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // Madrid to Barcelona is roughly 505 km
        let barcelona = Coordinates::new(41.3874, 2.1686);
        let d = haversine_km(MADRID, barcelona);
        assert!((d - 505.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_bounding_box_contains_center() {
        for center in [MADRID, Coordinates::new(-45.0, 170.0), Coordinates::new(0.0, 0.0)] {
            let bbox = BoundingBox::around(center, 3.0);
            assert!(bbox.contains(center));
        }
    }

    #[test]
    fn test_bounding_box_radius_due_north_and_south() {
        let radius = 3.0;
        let bbox = BoundingBox::around(MADRID, radius);

        let north = Coordinates::new(MADRID.latitude + radius / 111.0, MADRID.longitude);
        let south = Coordinates::new(MADRID.latitude - radius / 111.0, MADRID.longitude);
        assert!(bbox.contains(north));
        assert!(bbox.contains(south));

        // Longitude span is wider than latitude span away from the equator
        assert!(bbox.lon_max - bbox.lon_min > bbox.lat_max - bbox.lat_min);
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(MADRID.is_valid());
        assert!(!Coordinates::new(f64::NAN, 1.0).is_valid());
        assert!(!Coordinates::new(1.0, f64::NAN).is_valid());
    }
}
