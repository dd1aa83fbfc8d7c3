//! Geographic primitives.
//!
//! All points are (latitude, longitude) pairs in decimal degrees. Distances are
//! great-circle distances on a spherical Earth of radius [`EARTH_RADIUS_KM`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Mean Earth radius used by every distance computation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geohash precision used for the display tag.
pub const GEOHASH_PRECISION: usize = 7;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// A validated (latitude, longitude) pair.
///
/// Construction through [`GeoPoint::new`] or deserialization always validates,
/// so a `GeoPoint` in hand is within range.
///
/// # Examples
///
/// ```
/// use safeguard::GeoPoint;
///
/// let lagos = GeoPoint::new(6.5244, 3.3792).unwrap();
/// assert!(GeoPoint::new(91.0, 0.0).is_err());
/// assert_eq!(lagos.geohash().len(), 7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawPoint> for GeoPoint {
    type Error = ValidationError;

    fn try_from(raw: RawPoint) -> Result<Self, Self::Error> {
        Self::new(raw.latitude, raw.longitude)
    }
}

impl GeoPoint {
    /// Validates and creates a point.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for non-finite values, latitude outside
    /// `[-90, 90]` or longitude outside `[-180, 180]`.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite() {
            return Err(ValidationError::NonFiniteCoordinate { field: "latitude" });
        }
        if !longitude.is_finite() {
            return Err(ValidationError::NonFiniteCoordinate { field: "longitude" });
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::LatitudeOutOfRange { value: latitude });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::LongitudeOutOfRange { value: longitude });
        }
        Ok(Self { latitude, longitude })
    }

    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        haversine_km(self, other)
    }

    /// Base32 geohash of this point.
    ///
    /// Display tag only; matching never looks at it.
    #[must_use]
    pub fn geohash(&self) -> String {
        encode_geohash(self.latitude, self.longitude, GEOHASH_PRECISION)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Haversine distance between two points in kilometres.
///
/// `a = sin²(Δlat/2) + cos(lat1)·cos(lat2)·sin²(Δlon/2)`, `d = 2R·asin(√a)`.
#[must_use]
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.clamp(0.0, 1.0).sqrt().asin()
}

fn encode_geohash(latitude: f64, longitude: f64, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut out = String::with_capacity(precision);
    let mut even_bit = true;
    let mut bit = 0u8;
    let mut idx = 0usize;

    while out.len() < precision {
        let (range, value) = if even_bit {
            (&mut lon_range, longitude)
        } else {
            (&mut lat_range, latitude)
        };
        let mid = (range.0 + range.1) / 2.0;
        if value >= mid {
            idx = (idx << 1) | 1;
            range.0 = mid;
        } else {
            idx <<= 1;
            range.1 = mid;
        }
        even_bit = !even_bit;

        bit += 1;
        if bit == 5 {
            out.push(char::from(GEOHASH_ALPHABET[idx]));
            bit = 0;
            idx = 0;
        }
    }
    out
}

/// A timestamped position report from a client device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Reported position.
    pub point: GeoPoint,
    /// Horizontal accuracy in metres, when the device supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    /// When the device took the fix.
    pub recorded_at: DateTime<Utc>,
}

impl LocationFix {
    /// A fix taken now with no accuracy estimate.
    #[must_use]
    pub fn now(point: GeoPoint) -> Self {
        Self {
            point,
            accuracy_m: None,
            recorded_at: Utc::now(),
        }
    }

    /// A fix taken at `recorded_at`.
    #[must_use]
    pub const fn at(point: GeoPoint, recorded_at: DateTime<Utc>) -> Self {
        Self {
            point,
            accuracy_m: None,
            recorded_at,
        }
    }

    /// Attaches an accuracy estimate.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAccuracy`] for negative or non-finite values.
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Result<Self, ValidationError> {
        if !accuracy_m.is_finite() || accuracy_m < 0.0 {
            return Err(ValidationError::InvalidAccuracy { value: accuracy_m });
        }
        self.accuracy_m = Some(accuracy_m);
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if let Some(acc) = self.accuracy_m {
            if !acc.is_finite() || acc < 0.0 {
                return Err(ValidationError::InvalidAccuracy { value: acc });
            }
        }
        Ok(())
    }
}

/// The circular area inside which a responder receives notifications.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Catchment {
    /// Responder position.
    pub center: GeoPoint,
    /// Radius in kilometres.
    pub radius_km: f64,
}

impl Catchment {
    /// True iff `point` lies within the radius (inclusive).
    #[must_use]
    pub fn covers(&self, point: &GeoPoint) -> bool {
        haversine_km(&self.center, point) <= self.radius_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            GeoPoint::new(90.0001, 0.0),
            Err(ValidationError::LatitudeOutOfRange { .. })
        ));
        assert!(matches!(
            GeoPoint::new(0.0, -180.5),
            Err(ValidationError::LongitudeOutOfRange { .. })
        ));
        assert!(matches!(
            GeoPoint::new(f64::NAN, 0.0),
            Err(ValidationError::NonFiniteCoordinate { field: "latitude" })
        ));
        assert!(GeoPoint::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn deserialization_validates() {
        let ok: GeoPoint = serde_json::from_str(r#"{"latitude":6.5,"longitude":3.38}"#).unwrap();
        assert_eq!(ok.latitude(), 6.5);
        let bad = serde_json::from_str::<GeoPoint>(r#"{"latitude":120.0,"longitude":3.38}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn haversine_known_distances() {
        // Lagos points from the dispatch scenario.
        let responder = p(6.5000, 3.3800);
        let near = p(6.5244, 3.3792);
        let far = p(7.0000, 3.3792);
        let d_near = haversine_km(&responder, &near);
        let d_far = haversine_km(&responder, &far);
        assert!((d_near - 2.71).abs() < 0.05, "got {d_near}");
        assert!((d_far - 55.6).abs() < 0.5, "got {d_far}");

        // One degree of latitude along a meridian.
        let d = haversine_km(&p(0.0, 0.0), &p(1.0, 0.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_identity() {
        let a = p(51.5074, -0.1278);
        let b = p(48.8566, 2.3522);
        assert_eq!(haversine_km(&a, &a), 0.0);
        assert!((haversine_km(&a, &b) - haversine_km(&b, &a)).abs() < 1e-9);
        // London-Paris is roughly 343 km.
        assert!((haversine_km(&a, &b) - 343.5).abs() < 1.0);
    }

    #[test]
    fn antipodal_distance_is_half_circumference() {
        let d = haversine_km(&p(0.0, 0.0), &p(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn geohash_matches_reference_values() {
        assert_eq!(encode_geohash(57.64911, 10.40744, 11), "u4pruydqqvj");
        assert_eq!(encode_geohash(42.6, -5.6, 5), "ezs42");
        assert_eq!(p(42.6, -5.6).geohash().len(), GEOHASH_PRECISION);
    }

    #[test]
    fn catchment_boundary_is_inclusive() {
        let center = p(0.0, 0.0);
        let edge = p(1.0, 0.0);
        let exact = haversine_km(&center, &edge);
        let catchment = Catchment {
            center,
            radius_km: exact,
        };
        assert!(catchment.covers(&edge));
        let smaller = Catchment {
            center,
            radius_km: exact - 1e-6,
        };
        assert!(!smaller.covers(&edge));
    }

    #[test]
    fn fix_accuracy_is_validated() {
        let fix = LocationFix::now(p(1.0, 1.0));
        assert!(fix.clone().with_accuracy(-1.0).is_err());
        let fix = fix.with_accuracy(12.5).unwrap();
        assert_eq!(fix.accuracy_m, Some(12.5));
        assert!(fix.validate().is_ok());
    }
}
