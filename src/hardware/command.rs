//! Hardware primitives submitted to a scanner card.
//!
//! A [`Command`] is either a list command, which is buffered into the active
//! command list and executed later by the card, or a control command, which
//! takes effect immediately. The split matters for the list state machine:
//! only list commands count against the list capacity.

use std::fmt;

/// Encoder axis used by mark-on-the-fly waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderAxis {
    /// Encoder 0
    X,
    /// Encoder 1
    Y,
}

impl EncoderAxis {
    /// Hardware encoder number.
    pub fn encoder_number(self) -> u32 {
        match self {
            EncoderAxis::X => 0,
            EncoderAxis::Y => 1,
        }
    }
}

/// Measurement-feedback (OIE) control primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OieCommand {
    /// Route trigger signals to the OIE.
    Enable,
    /// Stop routing trigger signals.
    Disable,
    /// Start a measurement window.
    StartMeasurement,
    /// Close the measurement window.
    StopMeasurement,
    /// Select the closed-loop PID parameter set.
    SelectPid(u32),
}

/// One primitive understood by the card.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ---- List framing
    /// Open list `list` for writing at `position`.
    SetStartList {
        /// List number, 1 or 2
        list: u32,
        /// Slot within the list
        position: u32,
    },
    /// Terminate the open list.
    SetEndOfList,
    /// Start executing `list` from `position`.
    ExecuteList {
        /// List number, 1 or 2
        list: u32,
        /// Slot within the list
        position: u32,
    },
    /// Switch to the other list once the current one ends.
    AutoChange {
        /// Slot within the list
        position: u32,
    },
    /// Size the two list buffers.
    ConfigLists {
        /// Size of list 1
        list1: u32,
        /// Size of list 2
        list2: u32,
    },

    // ---- Motion
    /// Absolute jump in hardware units.
    JumpAbs {
        /// X in bits
        x: i32,
        /// Y in bits
        y: i32,
    },
    /// Absolute mark in hardware units.
    MarkAbs {
        /// X in bits
        x: i32,
        /// Y in bits
        y: i32,
    },
    /// Absolute 3D jump in hardware units.
    JumpAbs3d {
        /// X in bits
        x: i32,
        /// Y in bits
        y: i32,
        /// Z in bits
        z: i32,
    },
    /// Absolute 3D mark in hardware units.
    MarkAbs3d {
        /// X in bits
        x: i32,
        /// Y in bits
        y: i32,
        /// Z in bits
        z: i32,
    },
    /// Mark speed in bits per millisecond.
    SetMarkSpeed(f64),
    /// Jump speed in bits per millisecond.
    SetJumpSpeed(f64),

    // ---- Timing
    /// Scanner delays in 10 µs ticks.
    SetScannerDelays {
        /// After jumps
        jump: u32,
        /// After marks
        mark: u32,
        /// At polygon corners
        polygon: u32,
    },
    /// Laser delays in 1/64 µs.
    SetLaserDelays {
        /// Laser on delay
        laser_on: i32,
        /// Laser off delay
        laser_off: u32,
    },
    /// Wait inside the list, in 10 µs ticks.
    LongDelay(u32),

    // ---- Laser output
    /// 12-bit analog output 1.
    WriteDa1(u32),
    /// 12-bit analog output 2.
    WriteDa2(u32),
    /// 8-bit digital port.
    Write8BitPort(u32),
    /// 16-bit digital IO port.
    WriteIoPort(u32),
    /// Masked write to the 16-bit digital IO port.
    WriteIoPortMask {
        /// Value to write
        value: u32,
        /// Bits the write may change
        mask: u32,
    },
    /// Set a free variable inside the list.
    SetFreeVariable {
        /// Free variable number
        index: u32,
        /// Value to write
        value: u32,
    },

    // ---- Laser configuration
    /// Select the laser mode.
    SetLaserMode(u32),
    /// Disable automatic laser power control.
    DisableAutoLaserControl,
    /// Laser control bitmask.
    SetLaserControl(u32),
    /// Laser pulses in 1/64 µs.
    SetLaserPulses {
        /// Half period
        half_period: u32,
        /// Pulse length
        pulse_length: u32,
    },
    /// Standby pulses in 1/64 µs.
    SetStandby {
        /// Half period
        half_period: u32,
        /// Pulse length
        pulse_length: u32,
    },
    /// Assign correction tables to scan heads.
    SelectCorrectionTable {
        /// Table for head A
        head_a: u32,
        /// Table for head B, 0 for none
        head_b: u32,
    },
    /// Timelag compensation per head in µs.
    SetTimelagCompensation {
        /// Scan head number
        head: u32,
        /// XY time lag
        timelag_xy: u32,
        /// Z time lag
        timelag_z: u32,
    },
    /// Ethernet communication timeouts.
    SetCommunicationTimeouts {
        /// First retry timeout in ms
        initial: f64,
        /// Longest retry timeout in ms
        max: f64,
        /// Growth factor between retries
        multiplier: f64,
    },

    // ---- Skywriting
    /// Skywriting mode 0-4.
    SetSkyWritingMode(u32),
    /// Skywriting timing parameters.
    SetSkyWritingParameters {
        /// Time lag in µs
        timelag: f64,
        /// Laser on shift in 1/64 µs
        laser_on_shift: i32,
        /// Pulses before a mark
        nprev: u32,
        /// Pulses after a mark
        npost: u32,
    },
    /// Cosine angle limit for modes 3 and 4.
    SetSkyWritingLimit(f64),

    // ---- Mark on the fly
    /// Fly scale on X in bits per encoder step.
    SetFlyX(f64),
    /// Fly scale on Y in bits per encoder step.
    SetFlyY(f64),
    /// Block the list until the encoder passes `value`.
    WaitForEncoder {
        /// Encoder to watch
        axis: EncoderAxis,
        /// Value to write
        value: i32,
        /// Wait for values above `value`
        positive_half_plane: bool,
    },
    /// Leave on-the-fly mode and jump to the given position.
    FlyReturn {
        /// X in bits
        x: i32,
        /// Y in bits
        y: i32,
    },

    // ---- Recording
    /// Sample `signals` every `period` ticks; period 0 stops sampling.
    SetTrigger {
        /// Sample period in 10 µs ticks
        period: u32,
        /// Signal per channel
        signals: [u32; 8],
    },
    /// Measurement feedback control.
    Oie(OieCommand),
}

impl Command {
    /// Whether the command is buffered into the open list.
    pub fn is_list_command(&self) -> bool {
        !matches!(
            self,
            Command::SetStartList { .. }
                | Command::SetEndOfList
                | Command::ExecuteList { .. }
                | Command::ConfigLists { .. }
                | Command::SetLaserMode(_)
                | Command::DisableAutoLaserControl
                | Command::SetLaserControl(_)
                | Command::SetLaserPulses { .. }
                | Command::SetStandby { .. }
                | Command::SelectCorrectionTable { .. }
                | Command::SetTimelagCompensation { .. }
                | Command::SetCommunicationTimeouts { .. }
        )
    }

    /// Whether the command moves the scanner.
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            Command::JumpAbs { .. }
                | Command::MarkAbs { .. }
                | Command::JumpAbs3d { .. }
                | Command::MarkAbs3d { .. }
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::JumpAbs { x, y } => write!(f, "jump_abs({x}, {y})"),
            Command::MarkAbs { x, y } => write!(f, "mark_abs({x}, {y})"),
            Command::JumpAbs3d { x, y, z } => write!(f, "jump_abs_3d({x}, {y}, {z})"),
            Command::MarkAbs3d { x, y, z } => write!(f, "mark_abs_3d({x}, {y}, {z})"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_command_classification() {
        assert!(Command::JumpAbs { x: 0, y: 0 }.is_list_command());
        assert!(Command::LongDelay(10).is_list_command());
        assert!(!Command::SetEndOfList.is_list_command());
        assert!(!Command::SetLaserMode(1).is_list_command());
    }

    #[test]
    fn test_display_motion() {
        assert_eq!(Command::MarkAbs { x: 1, y: -2 }.to_string(), "mark_abs(1, -2)");
        assert!(Command::MarkAbs { x: 1, y: -2 }.is_motion());
    }
}
