//! Telemetry recording.
//!
//! - [`session`]: channel setup, trigger, ring draining and export
//! - [`channel`] and [`chunk`]: chunked per-channel sample storage
//! - [`registry`]: sessions kept by UUID
//! - [`data_table`]: export sinks (JSON, CSV with `storage_csv`)

pub mod channel;
pub mod chunk;
pub mod data_table;
pub mod registry;
pub mod session;

pub use channel::{normalize_channel_name, ChannelType, RecordingChannel, MAX_FREE_VARIABLE};
pub use chunk::RecordingChunk;
pub use data_table::{ColumnValues, CsvExporter, DataColumn, DataTable, MemoryDataTable};
pub use registry::{RecordingRegistry, SharedSession};
pub use session::{RecordingFrequency, RecordingOptions, RecordingSession, DISABLE_DRAIN_DELAY};
