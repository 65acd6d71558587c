//! Great-circle distance and unit conversion helpers.

use crate::model::LatLng;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const METERS_TO_MILES: f64 = 0.000621371;
pub const MILES_TO_METERS: f64 = 1.0 / METERS_TO_MILES;

pub fn to_radians(deg: f64) -> f64 {
    deg.to_radians()
}

/// Haversine distance in meters between two WGS84 coordinates.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    if lat1 == lat2 && lng1 == lng2 {
        return 0.0;
    }
    let dlat = to_radians(lat2 - lat1);
    let dlng = to_radians(lng2 - lng1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_radians(lat1).cos() * to_radians(lat2).cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

pub fn distance_between(a: LatLng, b: LatLng) -> f64 {
    distance_meters(a.lat, a.lng, b.lat, b.lng)
}

/// Sum of consecutive leg distances along `points`.
pub fn path_distance_meters(points: &[LatLng]) -> f64 {
    points
        .windows(2)
        .map(|w| distance_between(w[0], w[1]))
        .sum()
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters * METERS_TO_MILES
}

pub fn miles_to_meters(miles: f64) -> f64 {
    miles * MILES_TO_METERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        let dist = distance_meters(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn identical_points_are_zero_and_distance_is_symmetric() {
        let pairs = [
            (37.7749, -122.4194, 34.0522, -118.2437),
            (51.5074, -0.1278, 48.8566, 2.3522),
            (-33.8688, 151.2093, -37.8136, 144.9631),
            (0.0, 179.9, 0.0, -179.9),
        ];
        for (lat1, lng1, lat2, lng2) in pairs {
            assert_eq!(distance_meters(lat1, lng1, lat1, lng1), 0.0);
            let ab = distance_meters(lat1, lng1, lat2, lng2);
            let ba = distance_meters(lat2, lng2, lat1, lng1);
            assert!((ab - ba).abs() < 1e-6, "{ab} vs {ba}");
        }
    }

    #[test]
    fn san_francisco_to_los_angeles() {
        let d = distance_meters(37.7749, -122.4194, 34.0522, -118.2437);
        assert!((550_000.0..=570_000.0).contains(&d), "got {d}");
        // London to Paris reference: 343.5 km.
        let lp = distance_meters(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((lp - 343_556.0).abs() / 343_556.0 < 0.001, "got {lp}");
    }

    #[test]
    fn mile_conversions() {
        assert!((meters_to_miles(1609.34) - 1.0).abs() < 0.01);
        for x in [0.0, 1.0, 42.195, 1609.34, 123_456.789, 9.9e6] {
            let back = miles_to_meters(meters_to_miles(x));
            let tolerance = if x == 0.0 { 1e-12 } else { x * 1e-6 };
            assert!((back - x).abs() <= tolerance, "{x} -> {back}");
        }
    }

    #[test]
    fn path_distance_sums_legs() {
        let pts = [
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 1.0),
            LatLng::new(0.0, 2.0),
        ];
        let total = path_distance_meters(&pts);
        let leg = distance_meters(0.0, 0.0, 0.0, 1.0);
        assert!((total - 2.0 * leg).abs() < 1e-6);
        assert_eq!(path_distance_meters(&pts[..1]), 0.0);
    }
}
