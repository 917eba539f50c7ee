//! Measurement feedback (OIE) recording modes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::hardware::{Command, OieCommand};

/// How a layer brackets measurement feedback.
///
/// Modes differ along two axes: whether measurement runs for the whole layer
/// or only while the laser marks, and whether the layer itself enables the
/// subsystem or relies on it being enabled beforehand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OieRecordingMode {
    /// No measurement commands.
    #[default]
    Disabled,
    /// Enable the subsystem for the layer without measuring.
    EnableOnly,
    /// Measure the whole layer, subsystem already enabled.
    Continuous,
    /// Measure while marking, subsystem already enabled.
    LaserActive,
    /// Enable the subsystem and measure the whole layer.
    EnableAndContinuous,
    /// Enable the subsystem and measure while marking.
    EnableAndLaserActive,
}

impl TryFrom<u32> for OieRecordingMode {
    type Error = ScanError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::EnableOnly),
            2 => Ok(Self::Continuous),
            3 => Ok(Self::LaserActive),
            4 => Ok(Self::EnableAndContinuous),
            5 => Ok(Self::EnableAndLaserActive),
            other => Err(ScanError::UnsupportedOieMode(other)),
        }
    }
}

impl fmt::Display for OieRecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "disabled",
            Self::EnableOnly => "enable only",
            Self::Continuous => "continuous",
            Self::LaserActive => "laser active",
            Self::EnableAndContinuous => "enable and continuous",
            Self::EnableAndLaserActive => "enable and laser active",
        };
        f.write_str(name)
    }
}

impl OieRecordingMode {
    /// Whether any measurement command is emitted.
    pub fn is_active(self) -> bool {
        self != Self::Disabled
    }

    /// Whether the layer enables and disables the subsystem itself.
    pub fn enables_subsystem(self) -> bool {
        matches!(
            self,
            Self::EnableOnly | Self::EnableAndContinuous | Self::EnableAndLaserActive
        )
    }

    /// Whether measurement runs for the whole layer.
    pub fn is_continuous(self) -> bool {
        matches!(self, Self::Continuous | Self::EnableAndContinuous)
    }

    /// Whether measurement is started and stopped around each marked vector.
    pub fn is_per_vector(self) -> bool {
        matches!(self, Self::LaserActive | Self::EnableAndLaserActive)
    }

    /// Commands opening a layer.
    pub fn layer_prologue(self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.enables_subsystem() {
            commands.push(Command::Oie(OieCommand::Enable));
        }
        if self.is_continuous() {
            commands.push(Command::Oie(OieCommand::StartMeasurement));
        }
        commands
    }

    /// Commands closing a layer.
    pub fn layer_epilogue(self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.is_continuous() || self.is_per_vector() {
            commands.push(Command::Oie(OieCommand::StopMeasurement));
        }
        if self.enables_subsystem() {
            commands.push(Command::Oie(OieCommand::Disable));
        }
        commands
    }
}
