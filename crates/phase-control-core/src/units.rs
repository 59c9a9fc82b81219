//! Physical quantities used across the crate
//!
//! Lengths are held in nanometers and angles in radians, the units an
//! operator types, so config files stay readable and round-trip exactly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::f64::consts::TAU;
use std::fmt;
use thiserror::Error;

const NANOMETERS_PER_METER: f64 = 1e9;

/// Errors raised when building a quantity range
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("Inverted range: start {start} nm is above end {end} nm")]
    Inverted { start: f64, end: f64 },

    #[error("Range bounds must be finite")]
    NonFinite,
}

/// A length, stored in nanometers
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Length(f64);

impl Length {
    /// Create a length from a value in meters
    pub fn from_meters(meters: f64) -> Self {
        Self(meters * NANOMETERS_PER_METER)
    }

    /// Create a length from a value in nanometers
    pub const fn from_nanometers(nanometers: f64) -> Self {
        Self(nanometers)
    }

    /// Value in meters
    pub fn meters(self) -> f64 {
        self.0 / NANOMETERS_PER_METER
    }

    /// Value in nanometers
    pub fn nanometers(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} nm", self.nanometers())
    }
}

impl Serialize for Length {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.nanometers())
    }
}

impl<'de> Deserialize<'de> for Length {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Self::from_nanometers)
    }
}

/// A plane angle, stored in radians
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Angle(f64);

impl Angle {
    /// Zero angle
    pub const ZERO: Angle = Angle(0.0);

    /// Create an angle from radians
    pub const fn from_radians(radians: f64) -> Self {
        Self(radians)
    }

    /// Create an angle from degrees
    pub fn from_degrees(degrees: f64) -> Self {
        Self(degrees.to_radians())
    }

    /// Value in radians
    pub fn radians(self) -> f64 {
        self.0
    }

    /// Value in degrees
    pub fn degrees(self) -> f64 {
        self.0.to_degrees()
    }

    /// Absolute value
    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Wrap into `[-period/2, period/2)`
    pub fn wrapped(self, period: f64) -> Self {
        Self(wrap_angle(self.0, period))
    }
}

impl std::ops::Sub for Angle {
    type Output = Angle;

    fn sub(self, rhs: Angle) -> Angle {
        Angle(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Angle {
    type Output = Angle;

    fn neg(self) -> Angle {
        Angle(-self.0)
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} rad", self.0)
    }
}

impl Serialize for Angle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for Angle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Self)
    }
}

/// Wrap `value` into the half-open interval `[-period/2, period/2)`
///
/// The result is the shortest signed distance from zero on a circle of
/// circumference `period`. A non-positive or non-finite period returns the
/// value unchanged.
///
/// # Example
/// ```
/// use phase_control_core::units::wrap_angle;
/// use std::f64::consts::PI;
///
/// let wrapped = wrap_angle(1.5 * PI, 2.0 * PI);
/// assert!((wrapped + 0.5 * PI).abs() < 1e-12);
/// ```
pub fn wrap_angle(value: f64, period: f64) -> f64 {
    if !(period.is_finite() && period > 0.0) {
        return value;
    }
    let half = period / 2.0;
    let wrapped = (value + half).rem_euclid(period) - half;
    // rem_euclid can round up to exactly `period` for tiny negative inputs
    if wrapped >= half {
        wrapped - period
    } else {
        wrapped
    }
}

/// Full-turn period in radians
pub const FULL_TURN: f64 = TAU;

/// Closed wavelength interval, `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRange", into = "RawRange")]
pub struct WavelengthRange {
    start: Length,
    end: Length,
}

#[derive(Serialize, Deserialize)]
struct RawRange {
    start: Length,
    end: Length,
}

impl TryFrom<RawRange> for WavelengthRange {
    type Error = RangeError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        WavelengthRange::new(raw.start, raw.end)
    }
}

impl From<WavelengthRange> for RawRange {
    fn from(range: WavelengthRange) -> Self {
        RawRange {
            start: range.start,
            end: range.end,
        }
    }
}

impl WavelengthRange {
    /// Build a range, rejecting inverted or non-finite bounds
    pub fn new(start: Length, end: Length) -> Result<Self, RangeError> {
        if !(start.nanometers().is_finite() && end.nanometers().is_finite()) {
            return Err(RangeError::NonFinite);
        }
        if start > end {
            return Err(RangeError::Inverted {
                start: start.nanometers(),
                end: end.nanometers(),
            });
        }
        Ok(Self { start, end })
    }

    /// Build a range from nanometer bounds
    pub fn from_nanometers(start: f64, end: f64) -> Result<Self, RangeError> {
        Self::new(Length::from_nanometers(start), Length::from_nanometers(end))
    }

    /// Lower bound
    pub fn start(&self) -> Length {
        self.start
    }

    /// Upper bound
    pub fn end(&self) -> Length {
        self.end
    }

    /// Whether a wavelength in nanometers lies inside the range (inclusive)
    pub fn contains_nm(&self, wavelength_nm: f64) -> bool {
        wavelength_nm >= self.start.nanometers() && wavelength_nm <= self.end.nanometers()
    }
}

impl Default for WavelengthRange {
    fn default() -> Self {
        Self {
            start: Length::from_nanometers(800.0),
            end: Length::from_nanometers(805.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_length_conversion() {
        let l = Length::from_nanometers(802.38);
        assert_abs_diff_eq!(l.meters(), 802.38e-9, epsilon = 1e-18);
        assert_abs_diff_eq!(l.nanometers(), 802.38, epsilon = 1e-9);
    }

    #[test]
    fn test_angle_degrees() {
        let a = Angle::from_degrees(180.0);
        assert_abs_diff_eq!(a.radians(), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(a.degrees(), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wrap_is_idempotent() {
        for &v in &[-10.0, -PI, -0.3, 0.0, 0.3, PI, 3.5, 17.2] {
            let once = wrap_angle(v, TAU);
            let twice = wrap_angle(once, TAU);
            assert_abs_diff_eq!(once, twice, epsilon = 1e-12);
            assert!((-PI..PI).contains(&once), "{once} out of range");
        }
    }

    #[test]
    fn test_wrap_is_periodic() {
        for &v in &[-2.0, -0.5, 0.0, 0.25, 1.0, 3.0] {
            for k in -3..=3 {
                let shifted = v + k as f64 * TAU;
                assert_abs_diff_eq!(wrap_angle(shifted, TAU), wrap_angle(v, TAU), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_wrap_shortest_distance_across_boundary() {
        // 350 deg - 10 deg is -20 deg the short way round
        let d = wrap_angle(350f64.to_radians() - 10f64.to_radians(), TAU);
        assert_abs_diff_eq!(d.to_degrees(), -20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wrap_with_half_period_model() {
        let d = wrap_angle(0.9 * PI, PI);
        assert_abs_diff_eq!(d, -0.1 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_range_rejects_inverted() {
        let err = WavelengthRange::from_nanometers(805.0, 800.0).unwrap_err();
        assert!(matches!(err, RangeError::Inverted { .. }));
        assert!(WavelengthRange::from_nanometers(f64::NAN, 800.0).is_err());
    }

    #[test]
    fn test_range_contains() {
        let r = WavelengthRange::from_nanometers(800.0, 805.0).unwrap();
        assert!(r.contains_nm(800.0));
        assert!(r.contains_nm(805.0));
        assert!(!r.contains_nm(805.1));
    }

    #[test]
    fn test_range_serde_validates() {
        let ok: WavelengthRange = serde_json::from_str(r#"{"start": 800.0, "end": 805.0}"#).unwrap();
        assert_abs_diff_eq!(ok.end().nanometers(), 805.0, epsilon = 1e-9);
        let bad = serde_json::from_str::<WavelengthRange>(r#"{"start": 810.0, "end": 805.0}"#);
        assert!(bad.is_err());
    }
}
