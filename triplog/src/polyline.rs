//! Route geometry codec compatible with the Google encoded polyline format.
//!
//! Each coordinate is scaled by 1e5, rounded, delta-encoded against the
//! previous point, zig-zag folded and written as little-endian 5-bit groups
//! in the printable range 63..=126. All groups but the last carry 0x20.

use crate::model::LatLng;
use crate::{Result, TripError};

const PRECISION: f64 = 1e5;
const CHAR_OFFSET: u8 = 63;
const CONTINUATION: u64 = 0x20;
const GROUP_MASK: u64 = 0x1f;
const MAX_SHIFT: u32 = 60;

pub fn encode(points: &[LatLng]) -> String {
    let mut out = String::with_capacity(points.len() * 8);
    let mut prev_lat = 0i64;
    let mut prev_lng = 0i64;
    for p in points {
        let lat = scale(p.lat);
        let lng = scale(p.lng);
        write_value(lat.wrapping_sub(prev_lat), &mut out);
        write_value(lng.wrapping_sub(prev_lng), &mut out);
        prev_lat = lat;
        prev_lng = lng;
    }
    out
}

pub fn decode(encoded: &str) -> Result<Vec<LatLng>> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 6);
    let mut pos = 0usize;
    let mut lat = 0i64;
    let mut lng = 0i64;
    while pos < bytes.len() {
        let dlat = read_value(bytes, &mut pos)?;
        if pos >= bytes.len() {
            return Err(TripError::InvalidPolyline {
                offset: pos,
                reason: "latitude without longitude".into(),
            });
        }
        let dlng = read_value(bytes, &mut pos)?;
        lat = lat.wrapping_add(dlat);
        lng = lng.wrapping_add(dlng);
        points.push(LatLng::new(lat as f64 / PRECISION, lng as f64 / PRECISION));
    }
    Ok(points)
}

/// Non-finite coordinates encode as 0; out-of-range ones saturate.
fn scale(coord: f64) -> i64 {
    if !coord.is_finite() {
        return 0;
    }
    (coord * PRECISION).round() as i64
}

fn write_value(delta: i64, out: &mut String) {
    let mut v = (delta << 1) as u64;
    if delta < 0 {
        v = !v;
    }
    while v >= CONTINUATION {
        out.push(char::from(((CONTINUATION | (v & GROUP_MASK)) as u8) + CHAR_OFFSET));
        v >>= 5;
    }
    out.push(char::from((v as u8) + CHAR_OFFSET));
}

fn read_value(bytes: &[u8], pos: &mut usize) -> Result<i64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let Some(&byte) = bytes.get(*pos) else {
            return Err(TripError::InvalidPolyline {
                offset: *pos,
                reason: "truncated value".into(),
            });
        };
        if !(CHAR_OFFSET..=126).contains(&byte) {
            return Err(TripError::InvalidPolyline {
                offset: *pos,
                reason: format!("byte 0x{byte:02x} outside polyline alphabet"),
            });
        }
        if shift > MAX_SHIFT {
            return Err(TripError::InvalidPolyline {
                offset: *pos,
                reason: "value overflows 64 bits".into(),
            });
        }
        let chunk = u64::from(byte - CHAR_OFFSET);
        result |= (chunk & GROUP_MASK) << shift;
        shift += 5;
        *pos += 1;
        if chunk & CONTINUATION == 0 {
            break;
        }
    }
    let value = if result & 1 != 0 {
        !(result >> 1) as i64
    } else {
        (result >> 1) as i64
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<LatLng> {
        vec![
            LatLng::new(38.5, -120.2),
            LatLng::new(40.7, -120.95),
            LatLng::new(43.252, -126.453),
        ]
    }

    #[test]
    fn encodes_reference_fixture() {
        assert_eq!(encode(&fixture()), "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
    }

    #[test]
    fn decodes_reference_fixture() {
        let decoded = decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
        assert_eq!(decoded.len(), 3);
        for (got, want) in decoded.iter().zip(fixture()) {
            assert!((got.lat - want.lat).abs() < 1e-9);
            assert!((got.lng - want.lng).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_input_and_output() {
        assert_eq!(encode(&[]), "");
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn round_trip_keeps_five_decimals() {
        let route = vec![
            LatLng::new(37.77493, -122.41942),
            LatLng::new(37.77501, -122.41873),
            LatLng::new(37.77612, -122.41655),
            LatLng::new(-33.86882, 151.20929),
            LatLng::new(0.00001, -0.00001),
            LatLng::new(89.99999, 179.99999),
            LatLng::new(-89.99999, -179.99999),
        ];
        let decoded = decode(&encode(&route)).unwrap();
        assert_eq!(decoded.len(), route.len());
        for (got, want) in decoded.iter().zip(&route) {
            assert!((got.lat - want.lat).abs() <= 1e-5, "{got:?} vs {want:?}");
            assert!((got.lng - want.lng).abs() <= 1e-5, "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn encoding_is_far_smaller_than_json() {
        let route: Vec<LatLng> = (0..200)
            .map(|i| LatLng::new(37.7749 + i as f64 * 0.00013, -122.4194 + i as f64 * 0.00021))
            .collect();
        let encoded = encode(&route);
        let json = serde_json::to_string(&route).unwrap();
        assert!(encoded.len() * 3 <= json.len(), "{} vs {}", encoded.len(), json.len());
        assert!(encoded.bytes().all(|b| (63..=126).contains(&b)));
    }

    #[test]
    fn degenerate_coordinates_encode_without_overflow() {
        let points = vec![
            LatLng::new(f64::NAN, f64::INFINITY),
            LatLng::new(-1e300, 1e300),
            LatLng::new(1e300, -1e300),
        ];
        let encoded = encode(&points);
        assert!(encoded.bytes().all(|b| (63..=126).contains(&b)));
        assert_eq!(decode(&encoded).unwrap().len(), 3);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            decode("_p~iF~ps|U_ulLnnqC_mqNvxq`"),
            Err(TripError::InvalidPolyline { .. })
        ));
        assert!(matches!(decode("_p~iF"), Err(TripError::InvalidPolyline { .. })));
        assert!(matches!(decode("_p~iF ps|U"), Err(TripError::InvalidPolyline { .. })));
        assert!(matches!(decode("~~~~~~~~~~~~~~~~"), Err(TripError::InvalidPolyline { .. })));
    }
}
