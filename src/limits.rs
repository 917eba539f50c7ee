//! Hard limits of the scanner card and the ranges accepted by the public API.
//!
//! Every `validate_*` function runs before any command reaches the card, so a
//! rejected value never leaves partial state on the hardware.

use crate::error::ScanError;

/// Lowest accepted maximum laser power in watts.
pub const MIN_LASER_POWER_W: f64 = 10.0;
/// Highest accepted maximum laser power in watts.
pub const MAX_LASER_POWER_W: f64 = 10_000.0;

/// Largest delay accepted by the delay configuration calls, in microseconds.
pub const MAX_DELAY_US: f64 = 10_000_000.0;
/// Delays are programmed in 10 µs ticks.
pub const DELAY_TICK_US: u32 = 10;

/// Line subdivision thresholds in millimeters.
pub const MIN_SUBDIVISION_MM: f64 = 0.001;
/// Upper end of the accepted subdivision threshold range.
pub const MAX_SUBDIVISION_MM: f64 = 1_000_000.0;
/// Sentinel stored while line subdivision is disabled.
pub const SUBDIVISION_DISABLED: f64 = f64::MAX;

/// Absolute field bounds in hardware units.
pub const FIELD_MIN_BITS: i32 = -524_288;
/// Upper absolute field bound in hardware units.
pub const FIELD_MAX_BITS: i32 = 524_287;

/// Correction factor used when the loaded table does not report one (bits/mm).
pub const DEFAULT_CORRECTION_FACTOR: f64 = 10_000.0;

/// Mark-on-the-fly scale bounds in bits per encoder step (magnitude).
pub const MIN_MOTF_BITS_PER_STEP: f64 = 1.0 / 256.0;
/// Upper mark-on-the-fly scale bound.
pub const MAX_MOTF_BITS_PER_STEP: f64 = 16_000.0;

/// Largest measurement tag before it wraps back to 1 (22 bit).
pub const MAX_MEASUREMENT_TAG: u32 = 0x3F_FFFF;

/// Number of hardware recording channels.
pub const RECORDING_CHANNEL_COUNT: u32 = 8;
/// Recording chunk size bounds in samples.
pub const MIN_CHUNK_SIZE: usize = 1024;
/// Upper recording chunk size bound.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;
/// Chunk size used when a session does not specify one.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
/// Samples drained from the measurement ring per block.
pub const DRAIN_BLOCK_SIZE: u32 = 100_000;
/// Sample slots in the hardware measurement ring.
pub const MEASUREMENT_RING_SIZE: u32 = 1 << 23;

/// Laser pulse timing is expressed in 1/64 µs.
pub const LASER_BITS_PER_US: f64 = 64.0;
/// Largest laser pulse value in bits (exclusive).
pub const MAX_LASER_PULSE_BITS: u32 = 1 << 31;

/// Power calibration setpoints are compared at this granularity (percent).
pub const CALIBRATION_GRANULARITY: f64 = 0.005;

/// Validate a maximum laser power in watts.
pub fn validate_max_laser_power(watts: f64) -> Result<f64, ScanError> {
    if !watts.is_finite() || !(MIN_LASER_POWER_W..=MAX_LASER_POWER_W).contains(&watts) {
        return Err(ScanError::InvalidMaxLaserPower(watts));
    }
    Ok(watts)
}

/// Validate a delay in microseconds.
pub fn validate_delay(delay_us: f64) -> Result<f64, ScanError> {
    if !delay_us.is_finite() || !(0.0..=MAX_DELAY_US).contains(&delay_us) {
        return Err(ScanError::InvalidDelay(delay_us));
    }
    Ok(delay_us)
}

/// Validate a delay and round it to the 10 µs grid, never below one tick.
pub fn round_delay(delay_us: f64) -> Result<u32, ScanError> {
    let delay = validate_delay(delay_us)?;
    let ticks = (delay / DELAY_TICK_US as f64).round() as u32;
    Ok(ticks.max(1) * DELAY_TICK_US)
}

/// Convert a delay that must already sit on the 10 µs grid into ticks.
pub fn delay_ticks(delay_us: u32) -> Result<u32, ScanError> {
    if delay_us % DELAY_TICK_US != 0 {
        return Err(ScanError::DelayNotMultipleOfTen(delay_us));
    }
    validate_delay(delay_us as f64)?;
    Ok(delay_us / DELAY_TICK_US)
}

/// Validate a line subdivision threshold in millimeters.
pub fn validate_subdivision_threshold(threshold_mm: f64) -> Result<f64, ScanError> {
    if !threshold_mm.is_finite()
        || !(MIN_SUBDIVISION_MM..=MAX_SUBDIVISION_MM).contains(&threshold_mm)
    {
        return Err(ScanError::InvalidSubdivisionThreshold(threshold_mm));
    }
    Ok(threshold_mm)
}

/// Validate a recording chunk size.
pub fn validate_chunk_size(size: usize) -> Result<usize, ScanError> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&size) {
        return Err(ScanError::InvalidChunkSize(size));
    }
    Ok(size)
}

/// Validate a mark-on-the-fly scale in bits per encoder step.
pub fn validate_motf_scale(bits_per_step: f64) -> Result<f64, ScanError> {
    let magnitude = bits_per_step.abs();
    if !bits_per_step.is_finite()
        || !(MIN_MOTF_BITS_PER_STEP..=MAX_MOTF_BITS_PER_STEP).contains(&magnitude)
    {
        return Err(ScanError::InvalidMotfScale(bits_per_step));
    }
    Ok(bits_per_step)
}

/// Convert laser half period and pulse length from µs into bits.
///
/// Both values must lie in `1..2^31` bits and the pulse may not exceed the
/// full period.
pub fn laser_pulse_bits(half_period_us: f64, pulse_length_us: f64) -> Result<(u32, u32), ScanError> {
    let invalid = || ScanError::InvalidLaserPulse {
        half_period: half_period_us,
        pulse_length: pulse_length_us,
    };
    if !half_period_us.is_finite() || !pulse_length_us.is_finite() {
        return Err(invalid());
    }

    let half_period = (half_period_us * LASER_BITS_PER_US).round();
    let pulse_length = (pulse_length_us * LASER_BITS_PER_US).round();
    let range = 1.0..(MAX_LASER_PULSE_BITS as f64);
    if !range.contains(&half_period) || !range.contains(&pulse_length) {
        return Err(invalid());
    }
    if pulse_length > 2.0 * half_period {
        return Err(invalid());
    }
    Ok((half_period as u32, pulse_length as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_laser_power_bounds() {
        assert!(validate_max_laser_power(10.0).is_ok());
        assert!(validate_max_laser_power(10_000.0).is_ok());
        assert!(matches!(
            validate_max_laser_power(9.99),
            Err(ScanError::InvalidMaxLaserPower(_))
        ));
        assert!(validate_max_laser_power(f64::NAN).is_err());
    }

    #[test]
    fn test_round_delay() {
        assert_eq!(round_delay(0.0).unwrap(), 10);
        assert_eq!(round_delay(24.0).unwrap(), 20);
        assert_eq!(round_delay(25.0).unwrap(), 30);
        assert!(round_delay(-1.0).is_err());
        assert!(round_delay(10_000_001.0).is_err());
    }

    #[test]
    fn test_delay_ticks_requires_multiple_of_ten() {
        assert_eq!(delay_ticks(120).unwrap(), 12);
        assert!(matches!(
            delay_ticks(125),
            Err(ScanError::DelayNotMultipleOfTen(125))
        ));
    }

    #[test]
    fn test_subdivision_bounds() {
        assert!(validate_subdivision_threshold(0.001).is_ok());
        assert!(validate_subdivision_threshold(0.0005).is_err());
        assert!(validate_subdivision_threshold(2_000_000.0).is_err());
    }

    #[test]
    fn test_motf_scale_magnitude() {
        assert!(validate_motf_scale(-2.0).is_ok());
        assert!(validate_motf_scale(1.0 / 512.0).is_err());
        assert!(validate_motf_scale(16_001.0).is_err());
    }

    #[test]
    fn test_laser_pulse_bits() {
        assert_eq!(laser_pulse_bits(5.0, 5.0).unwrap(), (320, 320));
        assert!(laser_pulse_bits(1.0, 3.0).is_err());
        assert!(laser_pulse_bits(0.0, 0.0).is_err());
    }
}
