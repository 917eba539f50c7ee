//! Laser mode and control signal configuration.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Laser signal mode of the card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaserMode {
    /// CO2 laser.
    #[default]
    Co2,
    /// YAG mode 1.
    Yag1,
    /// YAG mode 2.
    Yag2,
    /// YAG mode 3.
    Yag3,
    /// Laser mode 4.
    Mode4,
    /// YAG mode 5.
    Yag5,
    /// Laser mode 6.
    Mode6,
}

impl LaserMode {
    /// Numeric mode understood by the card.
    pub fn code(self) -> u32 {
        match self {
            LaserMode::Co2 => 0,
            LaserMode::Yag1 => 1,
            LaserMode::Yag2 => 2,
            LaserMode::Yag3 => 3,
            LaserMode::Mode4 => 4,
            LaserMode::Yag5 => 5,
            LaserMode::Mode6 => 6,
        }
    }
}

bitflags! {
    /// Laser control signal options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LaserControlFlags: u32 {
        /// Let the running pulse finish after laser off.
        const FINISH_PULSE_AFTER_ON = 1 << 0;
        /// Shift the laser signals by half a period.
        const PHASE_SHIFT = 1 << 1;
        /// Hold all laser outputs off.
        const DISABLE_LASER = 1 << 2;
        /// Laser on is active low.
        const ON_SIGNAL_LOW_ACTIVE = 1 << 3;
        /// Laser 1 and 2 are active low.
        const HALF_SIGNALS_LOW_ACTIVE = 1 << 4;
        /// Digital input 1 is active high.
        const DIGITAL_IN_ONE_HIGH_ACTIVE = 1 << 5;
        /// Synchronize laser output with the internal clock.
        const OUTPUT_SYNCHRONIZATION = 1 << 6;
    }
}

/// Serializable form of [`LaserControlFlags`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserControlSettings {
    /// See [`LaserControlFlags::FINISH_PULSE_AFTER_ON`]
    pub finish_pulse_after_on: bool,
    /// See [`LaserControlFlags::PHASE_SHIFT`]
    pub phase_shift: bool,
    /// See [`LaserControlFlags::DISABLE_LASER`]
    pub disable_laser: bool,
    /// See [`LaserControlFlags::ON_SIGNAL_LOW_ACTIVE`]
    pub on_signal_low_active: bool,
    /// See [`LaserControlFlags::HALF_SIGNALS_LOW_ACTIVE`]
    pub half_signals_low_active: bool,
    /// See [`LaserControlFlags::DIGITAL_IN_ONE_HIGH_ACTIVE`]
    pub digital_in_one_high_active: bool,
    /// See [`LaserControlFlags::OUTPUT_SYNCHRONIZATION`]
    pub output_synchronization: bool,
}

impl From<LaserControlSettings> for LaserControlFlags {
    fn from(settings: LaserControlSettings) -> Self {
        let mut flags = LaserControlFlags::empty();
        flags.set(Self::FINISH_PULSE_AFTER_ON, settings.finish_pulse_after_on);
        flags.set(Self::PHASE_SHIFT, settings.phase_shift);
        flags.set(Self::DISABLE_LASER, settings.disable_laser);
        flags.set(Self::ON_SIGNAL_LOW_ACTIVE, settings.on_signal_low_active);
        flags.set(Self::HALF_SIGNALS_LOW_ACTIVE, settings.half_signals_low_active);
        flags.set(Self::DIGITAL_IN_ONE_HIGH_ACTIVE, settings.digital_in_one_high_active);
        flags.set(Self::OUTPUT_SYNCHRONIZATION, settings.output_synchronization);
        flags
    }
}
