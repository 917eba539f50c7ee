//! Galvo scanner control and telemetry.
//!
//! This crate turns toolpath layers into command lists for galvo scanner
//! controller cards and records what the scan head actually did:
//! - unit conversion with correction factors, origin offset and field limits
//! - laser power calibration and the five laser output ports
//! - command list lifecycle (start, end, execute) with explicit state checks
//! - layer translation with skywriting, line subdivision, measurement tags,
//!   measurement feedback brackets and beam profile selection
//! - mark on the fly with encoder waits
//! - trigger sampling drained from the card's sample ring into channels
//! - card discovery and configuration presets
//!
//! All card access goes through [`hardware::RtcTransport`]. The in-memory
//! [`hardware::MockTransport`] makes every operation usable without a card.
//!
//! # Features
//!
//! - `storage_csv` (default) - CSV export of data tables
//! - `rtc6_hardware` - bind the vendor access library through `rtc-sys`
//! - `hardware_tests` - tests that need a real card
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use galvo_scan::prelude::*;
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.add_card(4711);
//! let selector = CardSelector::new(transport, CardCapabilities::rtc6());
//! let context = selector.acquire_card_by_serial(4711)?;
//! assert_eq!(context.serial_number()?, 4711);
//! # Ok::<(), galvo_scan::ScanError>(())
//! ```

pub mod calibration;
pub mod capabilities;
pub mod card;
pub mod command_list;
pub mod config;
pub mod context;
pub mod error;
pub mod hardware;
pub mod limits;
pub mod logging;
pub mod poll;
pub mod recording;
pub mod resources;
pub mod rig;
pub mod selector;
pub mod toolpath;
pub mod units;

// Re-exports for convenience
pub use capabilities::{CardCapabilities, CardFamily, CardVariant};
pub use config::{ConfigError, ConfigurationPreset, ScannerConfig};
pub use context::ScanContext;
pub use error::{ScanError, ScanResult};
pub use rig::ScannerRig;
pub use selector::CardSelector;

/// Everything needed to drive a card from a toolpath layer.
pub mod prelude {
    pub use crate::calibration::{CalibrationPoint, LaserPort};
    pub use crate::capabilities::{CardCapabilities, CardFamily, CardVariant};
    pub use crate::config::{ConfigurationPreset, DelaySettings, LaserSettings, ScannerConfig};
    pub use crate::context::{Hatch2D, LaserMode, OieRecordingMode, ScanContext};
    pub use crate::error::{ScanError, ScanResult};
    pub use crate::hardware::{Command, MockTransport, RtcTransport};
    pub use crate::logging::{init_logging, LoggingConfig};
    pub use crate::poll::{CancelToken, PollControl};
    pub use crate::recording::{
        ChannelType, DataTable, MemoryDataTable, RecordingFrequency, RecordingOptions,
    };
    pub use crate::resources::{DirectoryResources, MemoryResources, ResourceProvider};
    pub use crate::rig::ScannerRig;
    pub use crate::selector::CardSelector;
    pub use crate::toolpath::{
        AttributeValue, MemoryLayer, MemorySegment, SegmentIds, SegmentKind, SegmentProfile,
        ToolpathLayer,
    };
    pub use crate::units::Point2D;
}
