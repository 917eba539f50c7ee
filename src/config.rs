//! Configuration loading using Figment.
//!
//! Configuration is read from a TOML file and then overridden by environment
//! variables with the `GALVO_` prefix. Nested keys are separated by a double
//! underscore:
//!
//! ```text
//! GALVO_LOGGING__LEVEL=debug
//! GALVO_POLL__TIMEOUT_MS=30000
//! GALVO_RECORDING__CHUNK_SIZE=65536
//! ```
//!
//! Besides the ambient settings the file carries named configuration presets.
//! A preset holds everything needed to bring a card into a markable state:
//! how to find it, which firmware and correction resources to load, delays,
//! laser settings and the laser index it serves.
//!
//! # Example
//!
//! ```no_run
//! use galvo_scan::config::ScannerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ScannerConfig::load_from("config/galvo.toml")?;
//!     let preset = config.find_preset("station-a")?;
//!     println!("laser index {}", preset.laser_index);
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::LaserPort;
use crate::card::NetworkAddress;
use crate::context::{LaserControlSettings, LaserMode};
use crate::error::{ScanError, ScanResult};
use crate::limits::{laser_pulse_bits, validate_chunk_size, validate_delay, validate_max_laser_power};
use crate::logging::LoggingConfig;
use crate::poll::PollSettings;
use crate::recording::RecordingOptions;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "GALVO_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment failed to merge or extract.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    /// Could not serialize to TOML.
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
    /// Could not write the file.
    #[error("Configuration write error: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default poll interval and deadline
    #[serde(default)]
    pub poll: PollSettings,
    /// Default recording session options
    #[serde(default)]
    pub recording: RecordingOptions,
    /// Named card setups
    #[serde(default)]
    pub presets: Vec<ConfigurationPreset>,
}

/// Ethernet communication timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationTimeouts {
    /// First retry timeout in ms
    pub initial_ms: f64,
    /// Upper bound of the retry timeout in ms
    pub max_ms: f64,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl Default for CommunicationTimeouts {
    fn default() -> Self {
        Self {
            initial_ms: 0.75,
            max_ms: 20.0,
            multiplier: 1.3,
        }
    }
}

/// Laser and scanner delays in µs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    /// Delay between start of a mark and laser on
    pub laser_on_us: f64,
    /// Delay between end of a mark and laser off
    pub laser_off_us: f64,
    /// Scanner delay after a mark
    pub mark_us: f64,
    /// Scanner delay after a jump
    pub jump_us: f64,
    /// Delay at polygon corners
    pub polygon_us: f64,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            laser_on_us: 100.0,
            laser_off_us: 100.0,
            mark_us: 100.0,
            jump_us: 250.0,
            polygon_us: 50.0,
        }
    }
}

/// Half period and pulse length in µs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseTiming {
    /// Half period
    pub half_period_us: f64,
    /// Pulse length
    pub pulse_length_us: f64,
}

/// Laser source settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSettings {
    /// Laser mode programmed at init
    pub mode: LaserMode,
    /// Output used for power
    pub port: LaserPort,
    /// Power at 100 % output in W
    pub max_power_w: f64,
    /// Control signal polarity and options
    pub control: LaserControlSettings,
    /// Pulses while marking
    pub pulses: PulseTiming,
    /// Pulses while idle
    pub standby: PulseTiming,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            mode: LaserMode::default(),
            port: LaserPort::default(),
            max_power_w: 400.0,
            control: LaserControlSettings::default(),
            pulses: PulseTiming {
                half_period_us: 5.0,
                pulse_length_us: 5.0,
            },
            standby: PulseTiming {
                half_period_us: 1.0,
                pulse_length_us: 1.0,
            },
        }
    }
}

/// Everything needed to bring one card into a markable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationPreset {
    /// Unique preset name
    pub name: String,
    /// IPv4 address of an ethernet card; local cards leave it unset
    #[serde(default)]
    pub ip_address: Option<String>,
    /// IPv4 netmask used for the ethernet search
    #[serde(default)]
    pub netmask: Option<String>,
    /// Ethernet search timeout in ms
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u32,
    /// Serial number of the card to acquire
    pub serial_number: u32,
    /// Ethernet retry timeouts
    #[serde(default)]
    pub timeouts: CommunicationTimeouts,
    /// Resource name of the card firmware
    pub firmware_resource: String,
    /// Resource name of the FPGA image
    pub fpga_resource: String,
    /// Resource name of the auxiliary image
    pub auxiliary_resource: String,
    /// Resource name of the correction file
    pub correction_resource: String,
    /// Table slot the correction file is loaded into
    #[serde(default = "default_table")]
    pub correction_table: u32,
    /// 2 or 3
    #[serde(default = "default_dimension")]
    pub correction_dimension: u32,
    /// Table assigned to head A
    #[serde(default = "default_table")]
    pub head_a_table: u32,
    /// Table assigned to head B, 0 for none
    #[serde(default)]
    pub head_b_table: u32,
    /// Delays applied after init
    #[serde(default)]
    pub delays: DelaySettings,
    /// Laser source settings applied after init
    #[serde(default)]
    pub laser: LaserSettings,
    /// Laser this card serves in a multi-scanner rig
    #[serde(default)]
    pub laser_index: u32,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_search_timeout() -> u32 {
    1000
}

fn default_table() -> u32 {
    1
}

fn default_dimension() -> u32 {
    2
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ScannerConfig {
    /// Load configuration from a TOML file and `GALVO_` environment variables.
    ///
    /// Environment variables take precedence over the file. The result is
    /// validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Load configuration from TOML text and `GALVO_` environment variables.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Recording chunk size is within 1024..=1Mi
    /// - Preset names are unique
    /// - Every preset passes [`ConfigurationPreset::validate`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        validate_chunk_size(self.recording.chunk_size)
            .map_err(|err| ConfigError::ValidationError(format!("recording: {err}")))?;

        let mut names = HashSet::new();
        for preset in &self.presets {
            if !names.insert(preset.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate preset name: '{}'",
                    preset.name
                )));
            }
            preset.validate()?;
        }

        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration as a TOML file that [`ScannerConfig::load_from`] reads back.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Preset by name.
    pub fn find_preset(&self, name: &str) -> ScanResult<&ConfigurationPreset> {
        self.presets
            .iter()
            .find(|preset| preset.name == name)
            .ok_or_else(|| ScanError::PresetNotFound(name.to_string()))
    }
}

impl ConfigurationPreset {
    /// Check every value against the range the card accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |what: String| {
            ConfigError::ValidationError(format!("preset '{}': {what}", self.name))
        };

        if self.name.is_empty() {
            return Err(ConfigError::ValidationError("preset name cannot be empty".into()));
        }
        self.network().map_err(|err| invalid(err.to_string()))?;

        let timeouts = &self.timeouts;
        if timeouts.initial_ms <= 0.0 || timeouts.max_ms <= 0.0 || timeouts.multiplier <= 0.0 {
            return Err(invalid("communication timeouts must be positive".into()));
        }
        if timeouts.initial_ms > timeouts.max_ms {
            return Err(invalid(format!(
                "initial timeout {} ms exceeds max timeout {} ms",
                timeouts.initial_ms, timeouts.max_ms
            )));
        }

        if !(2..=3).contains(&self.correction_dimension) {
            return Err(invalid(format!(
                "correction dimension must be 2 or 3, got {}",
                self.correction_dimension
            )));
        }

        let delays = &self.delays;
        for delay in [
            delays.laser_on_us,
            delays.laser_off_us,
            delays.mark_us,
            delays.jump_us,
            delays.polygon_us,
        ] {
            validate_delay(delay).map_err(|err| invalid(err.to_string()))?;
        }

        let laser = &self.laser;
        validate_max_laser_power(laser.max_power_w).map_err(|err| invalid(err.to_string()))?;
        for timing in [&laser.pulses, &laser.standby] {
            laser_pulse_bits(timing.half_period_us, timing.pulse_length_us)
                .map_err(|err| invalid(err.to_string()))?;
        }

        Ok(())
    }

    /// Parsed IP address and netmask; `None` for a local card.
    pub fn network(&self) -> ScanResult<Option<NetworkAddress>> {
        match (&self.ip_address, &self.netmask) {
            (None, None) => Ok(None),
            (Some(ip), netmask) => {
                let ip: Ipv4Addr = ip
                    .parse()
                    .map_err(|_| ScanError::InvalidIpAddress(ip.clone()))?;
                let netmask = match netmask {
                    Some(mask) => parse_netmask(mask)?,
                    None => Ipv4Addr::new(255, 255, 255, 0),
                };
                Ok(Some(NetworkAddress { ip, netmask }))
            }
            (None, Some(mask)) => Err(ScanError::InvalidNetmask(format!(
                "{mask} given without an IP address"
            ))),
        }
    }
}

/// Parse a netmask and check that its one bits are contiguous.
pub fn parse_netmask(mask: &str) -> ScanResult<Ipv4Addr> {
    let netmask: Ipv4Addr = mask
        .parse()
        .map_err(|_| ScanError::InvalidNetmask(mask.to_string()))?;
    let bits = u32::from(netmask);
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(ScanError::InvalidNetmask(mask.to_string()));
    }
    Ok(netmask)
}
