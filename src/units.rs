//! Millimeter to hardware unit conversion.
//!
//! The card works on signed integer coordinates. A loaded correction table
//! defines how many of those units make up one millimeter (the correction
//! factor), separately for XY and Z. [`CorrectionModel`] owns that factor
//! together with the laser origin, optional field limits and the last
//! emitted position used to suppress jumps that would not move the head.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::limits::{DEFAULT_CORRECTION_FACTOR, FIELD_MAX_BITS, FIELD_MIN_BITS};

/// A point in millimeters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    /// X in mm
    pub x: f64,
    /// Y in mm
    pub y: f64,
}

impl Point2D {
    /// Point at (`x`, `y`).
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point2D) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Point at fraction `t` on the way to `other`.
    pub fn lerp(&self, other: &Point2D, t: f64) -> Point2D {
        Point2D {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// A point in hardware units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HwPoint {
    /// X in bits
    pub x: i32,
    /// Y in bits
    pub y: i32,
}

impl HwPoint {
    /// Point at (`x`, `y`).
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Rectangular field in hardware units, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLimits {
    /// Lower left corner
    pub min: HwPoint,
    /// Upper right corner
    pub max: HwPoint,
}

impl FieldLimits {
    /// Clamp `point` into the field.
    pub fn clip(&self, point: HwPoint) -> HwPoint {
        HwPoint {
            x: point.x.clamp(self.min.x, self.max.x),
            y: point.y.clamp(self.min.y, self.max.y),
        }
    }

    /// Whether `point` lies inside the field.
    pub fn contains(&self, point: HwPoint) -> bool {
        (self.min.x..=self.max.x).contains(&point.x) && (self.min.y..=self.max.y).contains(&point.y)
    }
}

/// Correction state of one card.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionModel {
    xy_factor: f64,
    z_factor: f64,
    origin: Point2D,
    field: Option<FieldLimits>,
    position: Option<HwPoint>,
}

impl Default for CorrectionModel {
    fn default() -> Self {
        Self {
            xy_factor: DEFAULT_CORRECTION_FACTOR,
            z_factor: DEFAULT_CORRECTION_FACTOR,
            origin: Point2D::default(),
            field: None,
            position: None,
        }
    }
}

impl CorrectionModel {
    /// Model with explicit factors in units per millimeter.
    pub fn new(xy_factor: f64, z_factor: f64) -> ScanResult<Self> {
        let mut model = Self::default();
        model.set_factors(xy_factor, z_factor)?;
        Ok(model)
    }

    /// Replace both correction factors.
    pub fn set_factors(&mut self, xy_factor: f64, z_factor: f64) -> ScanResult<()> {
        for factor in [xy_factor, z_factor] {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(ScanError::InvalidCorrectionFactor(factor));
            }
        }
        self.xy_factor = xy_factor;
        self.z_factor = z_factor;
        Ok(())
    }

    /// XY units per millimeter.
    pub fn xy_factor(&self) -> f64 {
        self.xy_factor
    }

    /// Z units per millimeter.
    pub fn z_factor(&self) -> f64 {
        self.z_factor
    }

    /// Job-space position of the hardware origin.
    pub fn origin(&self) -> Point2D {
        self.origin
    }

    /// Move the hardware origin; existing field limits stay in hardware units.
    pub fn set_origin(&mut self, origin: Point2D) {
        self.origin = origin;
    }

    /// Active field limits.
    pub fn field(&self) -> Option<FieldLimits> {
        self.field
    }

    /// Restrict output to a rectangle given in millimeters.
    ///
    /// The rectangle is converted with the current origin and factor and must
    /// lie within the card's absolute field with `min < max` on both axes.
    pub fn set_field_mm(&mut self, min: Point2D, max: Point2D) -> ScanResult<()> {
        let invalid = || ScanError::InvalidFieldCoordinates {
            min_x: min.x,
            min_y: min.y,
            max_x: max.x,
            max_y: max.y,
        };
        let values = [min.x, min.y, max.x, max.y];
        if values.iter().any(|v| !v.is_finite()) || min.x >= max.x || min.y >= max.y {
            return Err(invalid());
        }

        let bits = |value: f64, origin: f64| ((value - origin) * self.xy_factor).round();
        let (min_x, min_y) = (bits(min.x, self.origin.x), bits(min.y, self.origin.y));
        let (max_x, max_y) = (bits(max.x, self.origin.x), bits(max.y, self.origin.y));
        let lower = FIELD_MIN_BITS as f64;
        let upper = FIELD_MAX_BITS as f64;
        if min_x < lower || min_y < lower || max_x > upper || max_y > upper {
            return Err(invalid());
        }
        if min_x >= max_x || min_y >= max_y {
            return Err(invalid());
        }

        self.field = Some(FieldLimits {
            min: HwPoint::new(min_x as i32, min_y as i32),
            max: HwPoint::new(max_x as i32, max_y as i32),
        });
        Ok(())
    }

    /// Remove field limits.
    pub fn clear_field(&mut self) {
        self.field = None;
    }

    /// Convert a job-space point to hardware units.
    pub fn to_hw(&self, point: Point2D) -> HwPoint {
        let raw = HwPoint {
            x: to_bits((point.x - self.origin.x) * self.xy_factor),
            y: to_bits((point.y - self.origin.y) * self.xy_factor),
        };
        match self.field {
            Some(field) => field.clip(raw),
            None => raw,
        }
    }

    /// Convert a focus offset in millimeters to Z hardware units.
    pub fn z_to_hw(&self, z_mm: f64) -> i32 {
        to_bits(z_mm * self.z_factor)
    }

    /// Convert a hardware point back to millimeters.
    pub fn to_mm(&self, point: HwPoint) -> Point2D {
        Point2D {
            x: point.x as f64 / self.xy_factor + self.origin.x,
            y: point.y as f64 / self.xy_factor + self.origin.y,
        }
    }

    /// Last emitted hardware position, if known.
    pub fn position(&self) -> Option<HwPoint> {
        self.position
    }

    /// Whether a jump to `target` would move the head.
    pub fn needs_jump(&self, target: HwPoint) -> bool {
        self.position != Some(target)
    }

    /// Remember `target` as the last emitted position.
    pub fn record_position(&mut self, target: HwPoint) {
        self.position = Some(target);
    }

    /// Set the tracked position to the hardware origin.
    pub fn reset_position(&mut self) {
        self.position = Some(HwPoint::default());
    }

    /// Forget the tracked position so the next jump is always emitted.
    pub fn invalidate_position(&mut self) {
        self.position = None;
    }
}

fn to_bits(value: f64) -> i32 {
    value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_with_origin() {
        let mut model = CorrectionModel::new(1000.0, 500.0).unwrap();
        model.set_origin(Point2D::new(1.0, -1.0));
        assert_eq!(model.to_hw(Point2D::new(2.0, 0.0)), HwPoint::new(1000, 1000));
        assert_eq!(model.z_to_hw(2.0), 1000);
        let back = model.to_mm(HwPoint::new(1000, 1000));
        assert!((back.x - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rounding() {
        let model = CorrectionModel::new(3.0, 3.0).unwrap();
        assert_eq!(model.to_hw(Point2D::new(0.5, -0.5)), HwPoint::new(2, -2));
    }

    #[test]
    fn test_invalid_factor_rejected() {
        assert!(matches!(
            CorrectionModel::new(0.0, 1.0),
            Err(ScanError::InvalidCorrectionFactor(_))
        ));
        assert!(CorrectionModel::new(1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_field_clipping() {
        let mut model = CorrectionModel::new(1000.0, 1000.0).unwrap();
        model
            .set_field_mm(Point2D::new(-10.0, -10.0), Point2D::new(10.0, 10.0))
            .unwrap();
        assert_eq!(model.to_hw(Point2D::new(50.0, 0.0)), HwPoint::new(10_000, 0));
        model.clear_field();
        assert_eq!(model.to_hw(Point2D::new(50.0, 0.0)), HwPoint::new(50_000, 0));
    }

    #[test]
    fn test_field_bounds_enforced() {
        let mut model = CorrectionModel::new(10_000.0, 10_000.0).unwrap();
        let err = model
            .set_field_mm(Point2D::new(-100.0, -1.0), Point2D::new(1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidFieldCoordinates { .. }));
        assert!(model
            .set_field_mm(Point2D::new(1.0, 1.0), Point2D::new(1.0, 2.0))
            .is_err());
        assert!(model.field().is_none());
    }

    #[test]
    fn test_null_jump_tracking() {
        let mut model = CorrectionModel::default();
        let target = HwPoint::new(5, 5);
        assert!(model.needs_jump(target));
        model.record_position(target);
        assert!(!model.needs_jump(target));
        model.reset_position();
        assert_eq!(model.position(), Some(HwPoint::default()));
        model.invalidate_position();
        assert!(model.needs_jump(HwPoint::default()));
    }
}
