//! Hardware access for scanner controller cards.
//!
//! - [`transport`]: the [`RtcTransport`] trait every card access goes through
//! - [`command`]: the primitives a card understands
//! - [`mock`]: an in-memory card for tests and dry runs
//! - `rtc6`: the vendor library binding (feature `rtc6_hardware`)

pub mod command;
pub mod mock;
#[cfg(feature = "rtc6_hardware")]
pub mod rtc6;
pub mod transport;

pub use command::{Command, EncoderAxis, OieCommand};
pub use mock::MockTransport;
#[cfg(feature = "rtc6_hardware")]
pub use rtc6::Rtc6Transport;
pub use transport::{
    CardStatus, FirmwareImage, HeadStatus, MeasurementStatus, RtcTransport, VersionInfo,
    MEASUREMENT_NOT_STARTED, STATUS_BUSY_MASK,
};
