//! Laser power calibration and output ports.
//!
//! A requested power percentage is first mapped through a
//! [`PowerCalibration`] table and then converted into the digital code of the
//! configured [`LaserPort`].
//!
//! # Calibration Modes
//!
//! The table has three shapes:
//!
//! - **Empty**: identity, the request passes through unchanged.
//! - **Linear**: one point, `(p + offset) * scaling` for every request.
//! - **Piecewise linear**: N sorted points. Inside the covered range the
//!   adjusted values of the two bracketing points are interpolated; outside
//!   it the nearest boundary point's formula is extrapolated.
//!
//! Setpoints are compared at a granularity of 0.005 %, so two points closer
//! than that are treated as duplicates and rejected.
//!
//! # Usage
//!
//! ```rust
//! use galvo_scan::calibration::{CalibrationPoint, PowerCalibration};
//!
//! let mut table = PowerCalibration::default();
//! table.set_piecewise_linear(&[
//!     CalibrationPoint::new(0.0, 0.0, 1.0),
//!     CalibrationPoint::new(50.0, 10.0, 1.0),
//! ])?;
//! assert_eq!(table.resolve(25.0)?, 30.0);
//! # Ok::<(), galvo_scan::ScanError>(())
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::hardware::Command;
use crate::limits::CALIBRATION_GRANULARITY;

/// Denominators below this are treated as a degenerate bracket.
const MIN_BRACKET_WIDTH: f64 = 1e-9;

// =============================================================================
// Calibration points
// =============================================================================

/// One calibration point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Requested power in percent where this point applies
    pub setpoint: f64,
    /// Offset added to the request, in percent
    pub offset: f64,
    /// Factor applied after the offset
    pub scaling: f64,
}

impl CalibrationPoint {
    /// Point at `setpoint` % that maps to `offset + scaling * setpoint`.
    pub fn new(setpoint: f64, offset: f64, scaling: f64) -> Self {
        Self {
            setpoint,
            offset,
            scaling,
        }
    }

    /// Apply this point's formula to `percent`.
    pub fn apply(&self, percent: f64) -> f64 {
        (percent + self.offset) * self.scaling
    }

    /// Adjusted value at the point's own setpoint.
    pub fn adjusted(&self) -> f64 {
        self.apply(self.setpoint)
    }

    fn quantized_setpoint(&self) -> i64 {
        (self.setpoint / CALIBRATION_GRANULARITY).round() as i64
    }

    fn validate(&self) -> ScanResult<()> {
        let valid = self.setpoint.is_finite()
            && self.offset.is_finite()
            && self.scaling.is_finite()
            && self.setpoint >= 0.0
            && self.scaling >= 0.0;
        if valid {
            Ok(())
        } else {
            Err(ScanError::InvalidCalibrationPoint {
                setpoint: self.setpoint,
                scaling: self.scaling,
            })
        }
    }
}

/// Shape of the active calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationMode {
    /// No points; requested power is used as is.
    Identity,
    /// One point applied across the whole range.
    Linear,
    /// Interpolation between sorted points.
    PiecewiseLinear,
}

/// Sorted power calibration table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerCalibration {
    points: Vec<CalibrationPoint>,
}

impl PowerCalibration {
    /// Replace the table with a single linear point.
    pub fn set_linear(&mut self, offset: f64, scaling: f64) -> ScanResult<()> {
        let point = CalibrationPoint::new(0.0, offset, scaling);
        point.validate()?;
        self.points = vec![point];
        Ok(())
    }

    /// Replace the table with `points`, sorted by setpoint.
    ///
    /// The existing table is kept if any point is invalid or two setpoints
    /// coincide at the calibration granularity.
    pub fn set_piecewise_linear(&mut self, points: &[CalibrationPoint]) -> ScanResult<()> {
        for point in points {
            point.validate()?;
        }
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.setpoint.total_cmp(&b.setpoint));
        for pair in sorted.windows(2) {
            if pair[0].quantized_setpoint() == pair[1].quantized_setpoint() {
                return Err(ScanError::DuplicateCalibrationSetpoint(pair[1].setpoint));
            }
        }
        self.points = sorted;
        Ok(())
    }

    /// Return to the identity mapping.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Points in ascending setpoint order.
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Shape of the table.
    pub fn mode(&self) -> CalibrationMode {
        match self.points.len() {
            0 => CalibrationMode::Identity,
            1 => CalibrationMode::Linear,
            _ => CalibrationMode::PiecewiseLinear,
        }
    }

    /// Map a requested percentage to the adjusted percentage.
    pub fn resolve(&self, percent: f64) -> ScanResult<f64> {
        let points = &self.points;
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(percent),
        };
        if points.len() == 1 || percent < first.setpoint {
            return Ok(first.apply(percent));
        }
        if percent >= last.setpoint {
            return Ok(last.apply(percent));
        }

        let upper = points.partition_point(|point| point.setpoint <= percent);
        let lower = upper.wrapping_sub(1);
        let (low, high) = match (points.get(lower), points.get(upper)) {
            (Some(low), Some(high)) if upper - lower == 1 => (low, high),
            _ => return Err(ScanError::CalibrationLookupFailed(percent)),
        };
        let width = high.setpoint - low.setpoint;
        if width.abs() < MIN_BRACKET_WIDTH {
            return Err(ScanError::CalibrationLookupFailed(percent));
        }

        let t = (percent - low.setpoint) / width;
        Ok(low.adjusted() + t * (high.adjusted() - low.adjusted()))
    }
}

// =============================================================================
// Laser output ports
// =============================================================================

/// Output used to set laser power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaserPort {
    /// 8-bit digital port.
    Digital8Bit,
    /// 16-bit digital IO port.
    Digital16Bit,
    /// 12-bit analog output 1.
    Analog1,
    /// 12-bit analog output 2.
    Analog2,
    /// Same value on both analog outputs
    DualAnalog,
}

impl Default for LaserPort {
    fn default() -> Self {
        LaserPort::Analog1
    }
}

impl fmt::Display for LaserPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaserPort::Digital8Bit => "8-bit digital",
            LaserPort::Digital16Bit => "16-bit digital",
            LaserPort::Analog1 => "analog 1",
            LaserPort::Analog2 => "analog 2",
            LaserPort::DualAnalog => "dual analog",
        };
        f.write_str(name)
    }
}

impl LaserPort {
    /// Full-scale code of the port.
    pub fn full_scale(&self) -> u32 {
        match self {
            LaserPort::Digital8Bit => 0xFF,
            LaserPort::Digital16Bit => 0xFFFF,
            LaserPort::Analog1 | LaserPort::Analog2 | LaserPort::DualAnalog => 0x0FFF,
        }
    }

    /// Digital code for `percent`, clipped to [0, 100].
    pub fn digital_code(&self, percent: f64) -> u32 {
        let fraction = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0) / 100.0
        };
        (fraction * self.full_scale() as f64).round() as u32
    }

    /// List commands that set the laser to `percent`.
    pub fn power_commands(&self, percent: f64) -> Vec<Command> {
        let code = self.digital_code(percent);
        match self {
            LaserPort::Digital8Bit => vec![Command::Write8BitPort(code)],
            LaserPort::Digital16Bit => vec![Command::WriteIoPort(code)],
            LaserPort::Analog1 => vec![Command::WriteDa1(code)],
            LaserPort::Analog2 => vec![Command::WriteDa2(code)],
            LaserPort::DualAnalog => vec![Command::WriteDa1(code), Command::WriteDa2(code)],
        }
    }
}
