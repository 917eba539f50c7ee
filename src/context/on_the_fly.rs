//! Mark on the fly: compensate workpiece motion from encoder feedback.
//!
//! Scales are given in millimeters per encoder step and programmed in bits
//! per step. A negative scale means the encoder counts against the axis, in
//! which case position waits flip their half-plane.

use tracing::info;

use super::ScanContext;
use crate::error::{ScanError, ScanResult};
use crate::hardware::{Command, EncoderAxis};
use crate::limits::validate_motf_scale;

/// Active mark-on-the-fly scales in millimeters per encoder step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkOnTheFly {
    /// Scale on X, if compensated
    pub scale_x: Option<f64>,
    /// Scale on Y, if compensated
    pub scale_y: Option<f64>,
}

impl MarkOnTheFly {
    fn scale(&self, axis: EncoderAxis) -> Option<f64> {
        match axis {
            EncoderAxis::X => self.scale_x,
            EncoderAxis::Y => self.scale_y,
        }
    }
}

impl ScanContext {
    /// Follow both encoders.
    pub fn enable_mark_on_the_fly_2d(&mut self, scale_x_mm: f64, scale_y_mm: f64) -> ScanResult<()> {
        self.enable_mark_on_the_fly(Some(scale_x_mm), Some(scale_y_mm))
    }

    /// Follow the X encoder only.
    pub fn enable_mark_on_the_fly_x(&mut self, scale_mm: f64) -> ScanResult<()> {
        self.enable_mark_on_the_fly(Some(scale_mm), None)
    }

    /// Follow the Y encoder only.
    pub fn enable_mark_on_the_fly_y(&mut self, scale_mm: f64) -> ScanResult<()> {
        self.enable_mark_on_the_fly(None, Some(scale_mm))
    }

    fn enable_mark_on_the_fly(&mut self, scale_x: Option<f64>, scale_y: Option<f64>) -> ScanResult<()> {
        let factor = self.correction.xy_factor();
        let bits_x = scale_x.map(|s| validate_motf_scale(s * factor)).transpose()?;
        let bits_y = scale_y.map(|s| validate_motf_scale(s * factor)).transpose()?;

        let mut commands = Vec::with_capacity(2);
        commands.extend(bits_x.map(Command::SetFlyX));
        commands.extend(bits_y.map(Command::SetFlyY));
        self.emit(&commands)?;

        self.motf = Some(MarkOnTheFly { scale_x, scale_y });
        self.correction.reset_position();
        info!(?scale_x, ?scale_y, "mark on the fly enabled");
        Ok(())
    }

    /// Leave on-the-fly mode and return the head to the origin.
    pub fn disable_mark_on_the_fly(&mut self) -> ScanResult<()> {
        self.emit(&[Command::FlyReturn { x: 0, y: 0 }])?;
        self.motf = None;
        self.correction.reset_position();
        Ok(())
    }

    /// Active scales, or `None` when disabled.
    pub fn mark_on_the_fly(&self) -> Option<MarkOnTheFly> {
        self.motf
    }

    /// Hold the list until the X encoder passes `position_mm`.
    pub fn wait_for_encoder_x(&mut self, position_mm: f64, in_positive_half_plane: bool) -> ScanResult<()> {
        self.wait_for_encoder(EncoderAxis::X, position_mm, in_positive_half_plane)
    }

    /// Hold the list until the Y encoder passes `position_mm`.
    pub fn wait_for_encoder_y(&mut self, position_mm: f64, in_positive_half_plane: bool) -> ScanResult<()> {
        self.wait_for_encoder(EncoderAxis::Y, position_mm, in_positive_half_plane)
    }

    fn wait_for_encoder(&mut self, axis: EncoderAxis, position_mm: f64, positive: bool) -> ScanResult<()> {
        let scale = self
            .motf
            .and_then(|motf| motf.scale(axis))
            .ok_or(ScanError::MarkOnTheFlyNotEnabled)?;
        if !position_mm.is_finite() {
            return Err(ScanError::InvalidParameter(format!("encoder position {position_mm} mm")));
        }
        let steps = (position_mm / scale).round();
        if steps < i32::MIN as f64 || steps > i32::MAX as f64 {
            return Err(ScanError::InvalidParameter(format!(
                "encoder position {position_mm} mm is out of range"
            )));
        }
        let positive_half_plane = if scale < 0.0 { !positive } else { positive };
        self.emit(&[Command::WaitForEncoder {
            axis,
            value: steps as i32,
            positive_half_plane,
        }])
    }
}
