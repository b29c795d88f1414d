//! # Distance Evaluator
//! Great-circle distance between two points and its classification into a
//! presence tier. Pure, no I/O.

use serde::{Deserialize, Serialize};

use crate::error::PlausibilityError;

/// Mean Earth radius in meters (spherical approximation).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default on-site radius in meters.
pub const DEFAULT_NEAR_FIELD_RADIUS_M: f64 = 10.0;

/// A WGS84-ish point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Checked constructor: rejects non-finite or out-of-range values.
    pub fn new(lat: f64, lon: f64) -> Result<Self, PlausibilityError> {
        let c = Self { lat, lon };
        c.validate()?;
        Ok(c)
    }

    /// Re-check a coordinate that was built without `new` (e.g. via serde).
    pub fn validate(&self) -> Result<(), PlausibilityError> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(PlausibilityError::invalid(format!(
                "coordinate must be finite (lat={}, lon={})",
                self.lat, self.lon
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(PlausibilityError::invalid(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(PlausibilityError::invalid(format!(
                "longitude {} outside [-180, 180]",
                self.lon
            )));
        }
        Ok(())
    }

    fn bits(&self) -> (u64, u64) {
        (self.lat.to_bits(), self.lon.to_bits())
    }
}

/// Haversine distance in meters.
///
/// Returns exactly `0.0` for bit-identical inputs. The intermediate term is
/// clamped to `[0, 1]` so rounding near antipodes never reaches `asin` out of
/// domain.
pub fn haversine_meters(a: Coordinate, b: Coordinate) -> f64 {
    if a.bits() == b.bits() {
        return 0.0;
    }
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let s_phi = (d_phi / 2.0).sin();
    let s_lambda = (d_lambda / 2.0).sin();
    let h = s_phi * s_phi + phi1.cos() * phi2.cos() * s_lambda * s_lambda;
    let h = h.clamp(0.0, 1.0);

    let d = 2.0 * EARTH_RADIUS_M * h.sqrt().asin();
    if d.is_finite() {
        d.max(0.0)
    } else {
        0.0
    }
}

/// Discrete presence-confidence bucket for a distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceTier {
    Exact,
    NearField,
    FarField,
}

/// Tier boundaries. Operators tune the on-site radius through config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierPolicy {
    pub near_field_radius_m: f64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            near_field_radius_m: DEFAULT_NEAR_FIELD_RADIUS_M,
        }
    }
}

impl TierPolicy {
    /// Non-finite or negative radii fall back to the default.
    pub fn new(near_field_radius_m: f64) -> Self {
        if near_field_radius_m.is_finite() && near_field_radius_m >= 0.0 {
            Self {
                near_field_radius_m,
            }
        } else {
            Self::default()
        }
    }

    /// `0 → Exact`, `(0, radius] → NearField`, `> radius → FarField`.
    pub fn classify(&self, distance_m: f64) -> DistanceTier {
        if distance_m <= 0.0 {
            DistanceTier::Exact
        } else if distance_m <= self.near_field_radius_m {
            DistanceTier::NearField
        } else {
            DistanceTier::FarField
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn random_coord(rng: &mut impl Rng) -> Coordinate {
        c(rng.random_range(-90.0..=90.0), rng.random_range(-180.0..=180.0))
    }

    #[test]
    fn rejects_out_of_range_and_non_finite() {
        assert!(Coordinate::new(95.0, 0.0).is_err());
        assert!(Coordinate::new(-90.0001, 0.0).is_err());
        assert!(Coordinate::new(0.0, 180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::INFINITY).is_err());
        assert!(Coordinate::new(90.0, -180.0).is_ok());
    }

    #[test]
    fn zero_for_identical_points() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let a = random_coord(&mut rng);
            assert_eq!(haversine_meters(a, a), 0.0);
        }
    }

    #[test]
    fn symmetric_within_micrometers() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let a = random_coord(&mut rng);
            let b = random_coord(&mut rng);
            let ab = haversine_meters(a, b);
            let ba = haversine_meters(b, a);
            assert!((ab - ba).abs() < 1e-6, "asymmetric: {ab} vs {ba}");
            assert!(ab.is_finite() && ab >= 0.0);
        }
    }

    #[test]
    fn antipodes_are_half_circumference_not_nan() {
        let half = std::f64::consts::PI * EARTH_RADIUS_M;
        let d1 = haversine_meters(c(0.0, 0.0), c(0.0, 180.0));
        let d2 = haversine_meters(c(90.0, 0.0), c(-90.0, 0.0));
        assert!((d1 - half).abs() < 1.0, "got {d1}");
        assert!((d2 - half).abs() < 1.0, "got {d2}");
    }

    #[test]
    fn campus_scale_distances() {
        let gate = c(6.0224, 7.0700);
        let near = haversine_meters(c(6.02245, 7.07004), gate);
        assert!((near - 7.10).abs() < 0.05, "got {near}");

        let far = haversine_meters(c(6.0250, 7.0730), gate);
        assert!((far - 440.0).abs() < 1.0, "got {far}");
    }

    #[test]
    fn classify_default_boundaries() {
        let p = TierPolicy::default();
        assert_eq!(p.classify(0.0), DistanceTier::Exact);
        assert_eq!(p.classify(1e-9), DistanceTier::NearField);
        assert_eq!(p.classify(10.0), DistanceTier::NearField);
        assert_eq!(p.classify(10.000_001), DistanceTier::FarField);
    }

    #[test]
    fn classify_respects_configured_radius() {
        let p = TierPolicy::new(25.0);
        assert_eq!(p.classify(20.0), DistanceTier::NearField);
        assert_eq!(p.classify(26.0), DistanceTier::FarField);
        assert_eq!(TierPolicy::new(-3.0), TierPolicy::default());
        assert_eq!(TierPolicy::new(f64::NAN), TierPolicy::default());
    }
}
