//! Custom error types for the scanner control layer.
//!
//! This module defines the primary error type, `ScanError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent way to report every
//! failure that can occur between toolpath translation and telemetry export.
//!
//! ## Error Hierarchy
//!
//! `ScanError` groups its variants by kind:
//!
//! - **Parameter validation**: a value outside its documented range (laser power,
//!   delays, subdivision threshold, skywriting timing, channel names, field bounds).
//!   These are raised before anything is written to the card.
//! - **State violations**: a context used before it was configured, a command list
//!   driven out of order, or a card handle that was released.
//! - **Resource exhaustion**: no free recording channel, caller buffer too small,
//!   list capacity exceeded.
//! - **Hardware errors**: card-local and global error codes reported by the access
//!   library, carried verbatim.
//! - **Lookup failures**: calibration interpolation, presets, channels, sessions.
//! - **Unsupported modes**: OIE modes or skywriting modes the card cannot do.
//! - **Polling**: deadline expiry and cooperative cancellation.
//!
//! Every variant maps to a stable numeric code through [`ScanError::code`], so
//! callers that bridge into foreign runtimes can keep reporting numbers.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::command_list::ListState;
use crate::config::ConfigError;
use crate::recording::ChannelType;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Errors raised by the scanner control layer.
#[derive(Error, Debug)]
pub enum ScanError {
    // ---- Parameter validation
    /// Max laser power is not a positive finite number.
    #[error("Invalid max laser power: {0} W")]
    InvalidMaxLaserPower(f64),

    /// Delay outside the accepted range.
    #[error("Invalid delay: {0} µs")]
    InvalidDelay(f64),

    /// List delays have a 10 µs resolution.
    #[error("Delay must be a multiple of 10 µs, got {0}")]
    DelayNotMultipleOfTen(u32),

    /// Subdivision threshold is not positive.
    #[error("Invalid line subdivision threshold: {0} mm")]
    InvalidSubdivisionThreshold(f64),

    /// Skywriting time lag out of range.
    #[error("Invalid skywriting time lag: {0} µs")]
    InvalidSkywritingTimelag(f64),

    /// Laser on shift out of range.
    #[error("Invalid skywriting laser-on shift: {0}")]
    InvalidSkywritingLaserOnShift(i64),

    /// `nprev` or `npost` out of range.
    #[error("Invalid skywriting pulse count {name}: {value}")]
    InvalidSkywritingPulseCount {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: i64,
    },

    /// Angle limit is not a cosine.
    #[error("Invalid skywriting angle limit: {0}")]
    InvalidSkywritingLimit(f64),

    /// Skywriting mode outside 0 to 4.
    #[error("Invalid skywriting mode: {0}")]
    InvalidSkywritingMode(i64),

    /// Field limits that are not finite or have min >= max.
    #[error("Invalid field coordinates: ({min_x}, {min_y}) - ({max_x}, {max_y})")]
    InvalidFieldCoordinates {
        /// Lower X bound
        min_x: f64,
        /// Lower Y bound
        min_y: f64,
        /// Upper X bound
        max_x: f64,
        /// Upper Y bound
        max_y: f64,
    },

    /// Correction factor is not positive.
    #[error("Invalid correction factor: {0}")]
    InvalidCorrectionFactor(f64),

    /// Calibration point outside 0..=100 % or with a non-finite scaling.
    #[error("Invalid calibration point: setpoint {setpoint}%, scaling {scaling}")]
    InvalidCalibrationPoint {
        /// Setpoint in %
        setpoint: f64,
        /// Scaling factor
        scaling: f64,
    },

    /// Two calibration points share a setpoint.
    #[error("Duplicate calibration setpoint: {0}%")]
    DuplicateCalibrationSetpoint(f64),

    /// Segment has the wrong number of points for its kind.
    #[error("Invalid point count {count} in segment {segment}")]
    InvalidPointCount {
        /// Segment index
        segment: usize,
        /// Points found
        count: usize,
    },

    /// Pulse length longer than the period, or negative.
    #[error("Invalid laser pulse timing: half period {half_period}, pulse length {pulse_length}")]
    InvalidLaserPulse {
        /// Half period in µs
        half_period: f64,
        /// Pulse length in µs
        pulse_length: f64,
    },

    /// Mark-on-the-fly scale that is zero or not finite.
    #[error("Invalid mark-on-the-fly scale: {0} bits per step")]
    InvalidMotfScale(f64),

    /// List index other than 1 or 2.
    #[error("Invalid list index: {0}")]
    InvalidListIndex(u32),

    /// Invalid IP address.
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Invalid netmask.
    #[error("Invalid netmask: {0}")]
    InvalidNetmask(String),

    /// Channel name empty or not made of word characters.
    #[error("Invalid recording channel name: '{0}'")]
    InvalidChannelName(String),

    /// Chunk size of zero.
    #[error("Invalid recording chunk size: {0}")]
    InvalidChunkSize(usize),

    /// AFX pin or timing out of range.
    #[error("Invalid AFX parameter {name}: {value}")]
    InvalidAfxParameter {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: u32,
    },

    /// Any other rejected argument.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // ---- State violations
    /// A component was used before it was set up.
    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),

    /// Already initialized.
    #[error("Already initialized: {0}")]
    AlreadyInitialized(&'static str),

    /// Card handle no longer refers to an acquired card.
    #[error("Card is not initialized or has been released")]
    CardNotInitialized,

    /// Operation not allowed in the current list state.
    #[error("Command list is {actual:?}, expected {expected}")]
    ListStateViolation {
        /// State the operation needs
        expected: &'static str,
        /// State the list is in
        actual: ListState,
    },

    /// AFX selector settings cannot change while automatic selection is enabled.
    #[error("AFX selector settings cannot change while automatic selection is enabled")]
    AfxSettingsLocked,

    /// Mark on the fly is not enabled.
    #[error("Mark on the fly is not enabled")]
    MarkOnTheFlyNotEnabled,

    /// Head status lacks position or power ok bits.
    #[error("Scan head {head} is not connected (status {status:#06x})")]
    ScanheadNotConnected {
        /// Scan head number
        head: u32,
        /// Raw head status
        status: u32,
    },

    // ---- Resource exhaustion
    /// All 8 hardware channels are in use.
    #[error("No recording channel available")]
    NoChannelAvailable,

    /// Caller buffer shorter than the record count.
    #[error("Buffer too small: {required} entries required, {provided} provided")]
    BufferTooSmall {
        /// Entries needed
        required: usize,
        /// Entries passed
        provided: usize,
    },

    /// Recording chunk is full.
    #[error("Recording chunk is full")]
    ChunkFull,

    /// Commands do not fit into the list.
    #[error("Command list capacity of {capacity} exceeded")]
    ListCapacityExceeded {
        /// List capacity in commands
        capacity: u32,
    },

    // ---- Hardware errors
    /// Error bits reported by a card.
    #[error("Card {card} reported error code {code:#x}")]
    CardError {
        /// Card number
        card: u32,
        /// Error code
        code: u32,
    },

    /// Error reported by the access library outside any card.
    #[error("Access library reported global error code {code:#x}")]
    GlobalError {
        /// Error code
        code: u32,
    },

    /// Card is already acquired.
    #[error("Card {0} is already acquired")]
    CardAlreadyAcquired(u32),

    /// Search found no card with this serial number.
    #[error("No card found with serial number {0}")]
    CardNotFound(u32),

    // ---- Lookup failures
    /// No calibration segment covers the requested power.
    #[error("Power calibration lookup failed for {0}%")]
    CalibrationLookupFailed(f64),

    /// Configuration preset not found.
    #[error("Configuration preset not found: {0}")]
    PresetNotFound(String),

    /// Recording channel not found.
    #[error("Recording channel not found: {0}")]
    ChannelNotFound(String),

    /// Duplicate recording channel name.
    #[error("Duplicate recording channel name: {0}")]
    DuplicateChannelName(String),

    /// Each signal can only be recorded by one channel.
    #[error("Channel type {0} is already recorded")]
    ChannelTypeAlreadyRecorded(ChannelType),

    /// Export needs a signal that no channel records.
    #[error("Channel type {0} was not recorded")]
    ChannelTypeNotRecorded(ChannelType),

    /// Channel needs the head to report actual positions.
    #[error("Channel type {0} requires scan head position feedback")]
    RawPositionFeedbackDisabled(ChannelType),

    /// Record index past the last sample.
    #[error("Record index {index} out of range ({count} records)")]
    RecordIndexOutOfRange {
        /// Requested record
        index: u64,
        /// Records stored
        count: u64,
    },

    /// Recording session was created without backtransformation.
    #[error("Recording session was created without backtransformation")]
    BacktransformationNotEnabled,

    /// Recording session not found.
    #[error("Recording session not found: {0}")]
    SessionNotFound(Uuid),

    /// Tag not issued in the most recent layer.
    #[error("Measurement tag {0} is unknown")]
    MeasurementTagNotFound(u32),

    /// Scanner index is not configured.
    #[error("Scanner index {0} is not configured")]
    ScannerNotFound(u32),

    /// No scanner serves this laser index.
    #[error("Laser index {0} has no assigned scanner")]
    LaserIndexNotAssigned(u32),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Duplicate data table column.
    #[error("Duplicate data table column: {0}")]
    DuplicateColumn(String),

    // ---- Unsupported modes
    /// Mode code not known to the card.
    #[error("Unsupported OIE recording mode: {0}")]
    UnsupportedOieMode(u32),

    /// Card does not support OIE measurement feedback.
    #[error("Card does not support OIE measurement feedback")]
    OieNotSupported,

    /// Card family lacks this skywriting mode.
    #[error("Card does not support skywriting mode {0}")]
    SkywritingModeUnsupported(u32),

    /// Operation not available for this card variant or build.
    #[error("Operation not supported for this card variant: {0}")]
    NotSupported(&'static str),

    // ---- Polling
    /// Poll deadline passed.
    #[error("Timed out after {waited:?}")]
    Timeout {
        /// Time spent polling
        waited: Duration,
    },

    /// Poll loop cancelled through its token.
    #[error("Operation cancelled")]
    Cancelled,

    // ---- Ambient
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV error.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Logging initialisation failed.
    #[error("Logging initialisation failed: {0}")]
    LoggingInit(String),
}

impl ScanError {
    /// Stable numeric code for this error.
    ///
    /// Hardware errors return the code reported by the card or library, offset
    /// into their own range so they never collide with crate-level codes.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidMaxLaserPower(_) => 100,
            Self::InvalidDelay(_) => 101,
            Self::DelayNotMultipleOfTen(_) => 102,
            Self::InvalidSubdivisionThreshold(_) => 103,
            Self::InvalidSkywritingTimelag(_) => 104,
            Self::InvalidSkywritingLaserOnShift(_) => 105,
            Self::InvalidSkywritingPulseCount { .. } => 106,
            Self::InvalidSkywritingLimit(_) => 107,
            Self::InvalidSkywritingMode(_) => 108,
            Self::InvalidFieldCoordinates { .. } => 109,
            Self::InvalidCorrectionFactor(_) => 110,
            Self::InvalidCalibrationPoint { .. } => 111,
            Self::DuplicateCalibrationSetpoint(_) => 112,
            Self::InvalidPointCount { .. } => 113,
            Self::InvalidLaserPulse { .. } => 114,
            Self::InvalidMotfScale(_) => 115,
            Self::InvalidListIndex(_) => 116,
            Self::InvalidIpAddress(_) => 117,
            Self::InvalidNetmask(_) => 118,
            Self::InvalidChannelName(_) => 119,
            Self::InvalidChunkSize(_) => 120,
            Self::InvalidAfxParameter { .. } => 121,
            Self::InvalidParameter(_) => 122,

            Self::NotInitialized(_) => 200,
            Self::AlreadyInitialized(_) => 201,
            Self::CardNotInitialized => 202,
            Self::ListStateViolation { .. } => 203,
            Self::AfxSettingsLocked => 204,
            Self::MarkOnTheFlyNotEnabled => 205,
            Self::ScanheadNotConnected { .. } => 206,

            Self::NoChannelAvailable => 300,
            Self::BufferTooSmall { .. } => 301,
            Self::ChunkFull => 302,
            Self::ListCapacityExceeded { .. } => 303,

            Self::CardError { code, .. } => 0x1000_0000 | (code & 0x0fff_ffff),
            Self::GlobalError { code } => 0x2000_0000 | (code & 0x0fff_ffff),
            Self::CardAlreadyAcquired(_) => 400,
            Self::CardNotFound(_) => 401,

            Self::CalibrationLookupFailed(_) => 500,
            Self::PresetNotFound(_) => 501,
            Self::ChannelNotFound(_) => 502,
            Self::DuplicateChannelName(_) => 503,
            Self::ChannelTypeAlreadyRecorded(_) => 504,
            Self::ChannelTypeNotRecorded(_) => 505,
            Self::RawPositionFeedbackDisabled(_) => 506,
            Self::RecordIndexOutOfRange { .. } => 507,
            Self::BacktransformationNotEnabled => 508,
            Self::SessionNotFound(_) => 509,
            Self::MeasurementTagNotFound(_) => 510,
            Self::ScannerNotFound(_) => 511,
            Self::LaserIndexNotAssigned(_) => 512,
            Self::ResourceNotFound(_) => 513,
            Self::DuplicateColumn(_) => 514,

            Self::UnsupportedOieMode(_) => 600,
            Self::OieNotSupported => 601,
            Self::SkywritingModeUnsupported(_) => 602,
            Self::NotSupported(_) => 603,

            Self::Timeout { .. } => 700,
            Self::Cancelled => 701,

            Self::Config(_) => 800,
            Self::Io(_) => 801,
            Self::Serialization(_) => 802,
            #[cfg(feature = "storage_csv")]
            Self::Csv(_) => 803,
            Self::LoggingInit(_) => 804,
        }
    }

    /// True for errors reported by the card or the access library.
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::CardError { .. } | Self::GlobalError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::InvalidMaxLaserPower(5.0);
        assert_eq!(err.to_string(), "Invalid max laser power: 5 W");
    }

    #[test]
    fn test_card_error_keeps_code() {
        let err = ScanError::CardError { card: 1, code: 0x40 };
        assert!(err.is_hardware());
        assert_eq!(err.code(), 0x1000_0040);
        assert!(err.to_string().contains("0x40"));
    }

    #[test]
    fn test_codes_are_distinct_between_kinds() {
        assert_ne!(
            ScanError::NoChannelAvailable.code(),
            ScanError::CardNotInitialized.code()
        );
        assert_eq!(ScanError::Cancelled.code(), 701);
    }
}
