//! Skywriting parameters.
//!
//! Modes 1 to 4 share the timing parameters; modes 3 and 4 add an angle
//! limit given as the cosine of the corner angle. Mode 0 switches skywriting
//! off. Every parameter is validated before any command is produced.

use serde::{Deserialize, Serialize};

use crate::capabilities::CardCapabilities;
use crate::error::{ScanError, ScanResult};
use crate::hardware::Command;
use crate::toolpath::{skywriting_attr, ToolpathLayer, SKYWRITING_NAMESPACE};

/// Highest skywriting mode known to any card family.
pub const MAX_SKYWRITING_MODE: u32 = 4;

/// Skywriting settings for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkywritingParameters {
    /// Mode 0 to 4; 0 disables skywriting
    pub mode: u32,
    /// Time lag in µs
    pub timelag: f64,
    /// Laser-on shift in 1/64 µs
    pub laser_on_shift: i64,
    /// Pulses before the vector
    pub nprev: i64,
    /// Pulses after the vector
    pub npost: i64,
    /// Cosine angle limit, modes 3 and 4 only
    pub limit: f64,
}

impl SkywritingParameters {
    /// Skywriting off.
    pub fn disabled() -> Self {
        Self {
            mode: 0,
            timelag: 0.0,
            laser_on_shift: 0,
            nprev: 0,
            npost: 0,
            limit: 0.0,
        }
    }

    /// Timing-only modes 1 and 2.
    pub fn timed(mode: u32, timelag: f64, laser_on_shift: i64, nprev: i64, npost: i64) -> Self {
        Self {
            mode,
            timelag,
            laser_on_shift,
            nprev,
            npost,
            limit: 0.0,
        }
    }

    /// Angle-limited modes 3 and 4.
    pub fn limited(
        mode: u32,
        timelag: f64,
        laser_on_shift: i64,
        nprev: i64,
        npost: i64,
        limit: f64,
    ) -> Self {
        Self {
            mode,
            timelag,
            laser_on_shift,
            nprev,
            npost,
            limit,
        }
    }

    /// Read the skywriting attributes of a segment.
    ///
    /// Returns `None` when the segment carries no mode attribute.
    pub fn from_segment(layer: &dyn ToolpathLayer, segment: usize) -> ScanResult<Option<Self>> {
        let Some(mode) =
            layer.segment_integer_attribute(segment, SKYWRITING_NAMESPACE, skywriting_attr::MODE)
        else {
            return Ok(None);
        };
        let mode = u32::try_from(mode).map_err(|_| ScanError::InvalidSkywritingMode(mode))?;
        if mode == 0 {
            return Ok(Some(Self::disabled()));
        }

        let double = |name: &str| layer.segment_double_attribute(segment, SKYWRITING_NAMESPACE, name);
        let integer = |name: &str| layer.segment_integer_attribute(segment, SKYWRITING_NAMESPACE, name);
        let missing = |name: &str| {
            ScanError::InvalidParameter(format!("skywriting attribute '{name}' missing in segment {segment}"))
        };

        let timelag = double(skywriting_attr::TIMELAG).ok_or_else(|| missing(skywriting_attr::TIMELAG))?;
        let laser_on_shift =
            integer(skywriting_attr::LASER_ON_SHIFT).ok_or_else(|| missing(skywriting_attr::LASER_ON_SHIFT))?;
        let nprev = integer(skywriting_attr::NPREV).ok_or_else(|| missing(skywriting_attr::NPREV))?;
        let npost = integer(skywriting_attr::NPOST).ok_or_else(|| missing(skywriting_attr::NPOST))?;
        let limit = if mode >= 3 {
            double(skywriting_attr::LIMIT).ok_or_else(|| missing(skywriting_attr::LIMIT))?
        } else {
            0.0
        };

        Ok(Some(Self {
            mode,
            timelag,
            laser_on_shift,
            nprev,
            npost,
            limit,
        }))
    }

    /// Check every parameter against its range and the card's mode support.
    pub fn validate(&self, capabilities: &CardCapabilities) -> ScanResult<()> {
        if self.mode > MAX_SKYWRITING_MODE {
            return Err(ScanError::InvalidSkywritingMode(self.mode as i64));
        }
        if !capabilities.supports_skywriting_mode(self.mode) {
            return Err(ScanError::SkywritingModeUnsupported(self.mode));
        }
        if self.mode == 0 {
            return Ok(());
        }
        if !self.timelag.is_finite() || self.timelag < 0.0 {
            return Err(ScanError::InvalidSkywritingTimelag(self.timelag));
        }
        if i32::try_from(self.laser_on_shift).is_err() {
            return Err(ScanError::InvalidSkywritingLaserOnShift(self.laser_on_shift));
        }
        for (name, value) in [("nprev", self.nprev), ("npost", self.npost)] {
            if u32::try_from(value).is_err() {
                return Err(ScanError::InvalidSkywritingPulseCount { name, value });
            }
        }
        if self.mode >= 3 && !(self.limit.is_finite() && (-1.0..=1.0).contains(&self.limit)) {
            return Err(ScanError::InvalidSkywritingLimit(self.limit));
        }
        Ok(())
    }

    /// Validate and produce the list commands for these settings.
    pub fn commands(&self, capabilities: &CardCapabilities) -> ScanResult<Vec<Command>> {
        self.validate(capabilities)?;
        if self.mode == 0 {
            return Ok(vec![Command::SetSkyWritingMode(0)]);
        }

        // Ranges were checked above.
        let laser_on_shift = self.laser_on_shift as i32;
        let mut commands = vec![Command::SetSkyWritingParameters {
            timelag: self.timelag,
            laser_on_shift,
            nprev: self.nprev as u32,
            npost: self.npost as u32,
        }];
        if self.mode >= 3 {
            commands.push(Command::SetSkyWritingLimit(self.limit));
        }
        commands.push(Command::SetSkyWritingMode(self.mode));
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolpath::{AttributeValue, MemoryLayer, MemorySegment, SegmentKind, SegmentProfile};

    #[test]
    fn test_negative_timelag_rejected() {
        let params = SkywritingParameters::limited(3, -1.0, 0, 1, 1, 0.5);
        assert!(matches!(
            params.commands(&CardCapabilities::rtc6()),
            Err(ScanError::InvalidSkywritingTimelag(_))
        ));
    }

    #[test]
    fn test_laser_on_shift_range() {
        let params = SkywritingParameters::timed(1, 10.0, i64::from(i32::MAX) + 1, 0, 0);
        assert!(matches!(
            params.validate(&CardCapabilities::rtc6()),
            Err(ScanError::InvalidSkywritingLaserOnShift(_))
        ));
    }

    #[test]
    fn test_limit_is_a_cosine() {
        let caps = CardCapabilities::rtc6();
        assert!(SkywritingParameters::limited(4, 10.0, 0, 1, 1, 1.5).validate(&caps).is_err());
        // Modes 1 and 2 ignore the limit.
        assert!(SkywritingParameters::limited(2, 10.0, 0, 1, 1, 1.5).validate(&caps).is_ok());
    }

    #[test]
    fn test_mode_support_per_family() {
        let params = SkywritingParameters::limited(4, 10.0, 0, 1, 1, 0.5);
        assert!(matches!(
            params.validate(&CardCapabilities::rtc5()),
            Err(ScanError::SkywritingModeUnsupported(4))
        ));
        assert!(matches!(
            SkywritingParameters::timed(5, 0.0, 0, 0, 0).validate(&CardCapabilities::rtc6()),
            Err(ScanError::InvalidSkywritingMode(5))
        ));
    }

    #[test]
    fn test_command_order() {
        let commands = SkywritingParameters::limited(3, 12.5, -64, 2, 3, 0.7)
            .commands(&CardCapabilities::rtc6())
            .unwrap();
        assert_eq!(
            commands,
            vec![
                Command::SetSkyWritingParameters {
                    timelag: 12.5,
                    laser_on_shift: -64,
                    nprev: 2,
                    npost: 3
                },
                Command::SetSkyWritingLimit(0.7),
                Command::SetSkyWritingMode(3),
            ]
        );
    }

    #[test]
    fn test_from_segment_attributes() {
        let segment = MemorySegment::new(SegmentKind::Polyline, vec![], SegmentProfile::default())
            .with_attribute(SKYWRITING_NAMESPACE, "mode", AttributeValue::Integer(1))
            .with_attribute(SKYWRITING_NAMESPACE, "timelag", AttributeValue::Double(20.0))
            .with_attribute(SKYWRITING_NAMESPACE, "laseronshift", AttributeValue::Integer(5))
            .with_attribute(SKYWRITING_NAMESPACE, "nprev", AttributeValue::Integer(1))
            .with_attribute(SKYWRITING_NAMESPACE, "npost", AttributeValue::Integer(2));
        let layer = MemoryLayer::new(1.0).with_segment(segment);
        let params = SkywritingParameters::from_segment(&layer, 0).unwrap().unwrap();
        assert_eq!(params, SkywritingParameters::timed(1, 20.0, 5, 1, 2));
    }

    #[test]
    fn test_missing_attribute_reported() {
        let segment = MemorySegment::new(SegmentKind::Polyline, vec![], SegmentProfile::default())
            .with_attribute(SKYWRITING_NAMESPACE, "mode", AttributeValue::Integer(2));
        let layer = MemoryLayer::new(1.0).with_segment(segment);
        assert!(matches!(
            SkywritingParameters::from_segment(&layer, 0),
            Err(ScanError::InvalidParameter(_))
        ));
    }
}
