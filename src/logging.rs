//! Process-wide `tracing` subscriber setup.
//!
//! The library itself only emits events through the `tracing` macros. An
//! application that wants them on stderr calls [`init_logging`] once at
//! startup; `RUST_LOG` takes precedence over the configured level.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{ScanError, ScanResult};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit one JSON object per event
    pub json: bool,
    /// Include the module path of each event
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

/// Install the global subscriber. Later calls return without doing anything.
pub fn init_logging(config: &LoggingConfig) -> ScanResult<()> {
    INSTALLED.get_or_try_init(|| install(config)).map(|_| ())
}

fn install(config: &LoggingConfig) -> ScanResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|err| ScanError::LoggingInit(err.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| ScanError::LoggingInit(err.to_string()))
}
