//! The hardware transport seam.
//!
//! [`RtcTransport`] is the only way this crate talks to a scanner card. The
//! production implementation binds the vendor access library; the in-memory
//! [`MockTransport`](super::mock::MockTransport) stands in for it in tests.
//!
//! The trait mirrors how the access library reports failures: calls do not
//! return errors themselves, instead every state-changing call must be
//! followed by a query of the card-local and global error codes. The provided
//! [`RtcTransport::check`] and [`RtcTransport::submit_checked`] methods do
//! exactly that and turn non-zero codes into typed errors.

use std::net::Ipv4Addr;

use tracing::debug;

use super::command::Command;
use crate::error::{ScanError, ScanResult};
use crate::limits::MEASUREMENT_RING_SIZE;

/// Status bits that indicate a busy list.
pub const STATUS_BUSY_MASK: u32 = (1 << 0) | (1 << 7) | (1 << 15);

/// Measurement position reported before sampling has started.
pub const MEASUREMENT_NOT_STARTED: u32 = u32::MAX;

/// Version block reported by a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionInfo {
    /// Card firmware revision
    pub rtc_version: u32,
    /// Card type code
    pub card_type: u32,
    /// Access library version
    pub dll_version: u32,
    /// Firmware version
    pub hex_version: u32,
    /// BIOS version
    pub bios_version: u32,
}

/// Firmware images uploaded to a card.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareImage<'a> {
    /// Card program file
    pub firmware: &'a [u8],
    /// FPGA image
    pub fpga: &'a [u8],
    /// Auxiliary application image
    pub auxiliary: &'a [u8],
}

/// Raw list status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardStatus {
    /// Status word as reported by the card
    pub raw: u32,
    /// Current list position
    pub position: u32,
}

impl CardStatus {
    /// Whether a list is still executing.
    pub fn is_busy(&self) -> bool {
        self.raw & STATUS_BUSY_MASK != 0
    }
}

/// Scan head status bits reported through the card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadStatus {
    /// Status word as reported by the card
    pub raw: u32,
}

impl HeadStatus {
    const POSITION_X_OK: u32 = 1 << 3;
    const POSITION_Y_OK: u32 = 1 << 4;
    const TEMPERATURE_OK: u32 = 1 << 6;
    const POWER_OK: u32 = 1 << 7;

    /// Status of a connected head with every check passing.
    pub const CONNECTED: HeadStatus = HeadStatus {
        raw: Self::POSITION_X_OK | Self::POSITION_Y_OK | Self::TEMPERATURE_OK | Self::POWER_OK,
    };

    /// Galvo X reports a valid position.
    pub fn position_x_ok(&self) -> bool {
        self.raw & Self::POSITION_X_OK != 0
    }

    /// Galvo Y reports a valid position.
    pub fn position_y_ok(&self) -> bool {
        self.raw & Self::POSITION_Y_OK != 0
    }

    /// Head temperature is in range.
    pub fn temperature_ok(&self) -> bool {
        self.raw & Self::TEMPERATURE_OK != 0
    }

    /// Head power supply is in range.
    pub fn power_ok(&self) -> bool {
        self.raw & Self::POWER_OK != 0
    }

    /// A disconnected head reports neither axis as positioned and no power.
    pub fn is_connected(&self) -> bool {
        self.position_x_ok() && self.position_y_ok() && self.power_ok()
    }
}

/// Measurement (trigger sampling) status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementStatus {
    /// Measurement still sampling
    pub busy: bool,
    /// Next write slot in the sample ring
    pub position: u32,
}

impl MeasurementStatus {
    /// Whether sampling has begun.
    pub fn has_started(&self) -> bool {
        self.busy || self.position != MEASUREMENT_NOT_STARTED
    }
}

/// Access to scanner cards through the vendor library.
///
/// Implementations must be shareable between threads: one loaded library
/// instance serves every context and selector in the process.
pub trait RtcTransport: Send + Sync {
    /// Human-readable name of the implementation.
    fn name(&self) -> &str;

    /// Load and initialise the library. Repeated calls are no-ops.
    fn init(&self) -> ScanResult<()>;

    // ---- Discovery
    /// Number of locally attached cards.
    fn count_cards(&self) -> u32;
    /// Set the ethernet search timeout in milliseconds.
    fn set_search_timeout(&self, timeout_ms: u32);
    /// Search cards in a subnet; returns the number found.
    fn search_cards(&self, ip: Ipv4Addr, netmask: Ipv4Addr) -> u32;
    /// Search cards in an address range; returns the number found.
    fn search_cards_range(&self, start: Ipv4Addr, end: Ipv4Addr) -> u32;
    /// Number of cards found by the last ethernet search.
    fn ethernet_card_count(&self) -> u32;
    /// Serial number of the 1-based search result, 0 on failure.
    fn ethernet_serial(&self, search_no: u32) -> u32;
    /// Assign a search result to a card number; 0 on failure.
    fn assign_ethernet_card(&self, search_no: u32) -> u32;
    /// Acquire a card for exclusive use; 0 when it is already taken.
    fn acquire(&self, card_no: u32) -> u32;
    /// Give a card back.
    fn release(&self, card_no: u32);

    // ---- Identity, firmware and correction
    /// Serial number of the card, 0 while its firmware is not loaded.
    fn serial_number(&self, card_no: u32) -> u32;
    /// Version block of the card.
    fn versions(&self, card_no: u32) -> VersionInfo;
    /// Upload firmware; returns the library's result code.
    fn load_firmware(&self, card_no: u32, image: &FirmwareImage<'_>) -> u32;
    /// Load a correction file into `table`; returns the library's result code.
    fn load_correction_table(&self, card_no: u32, data: &[u8], table: u32, dimension: u32) -> u32;
    /// Read a parameter of a loaded correction table.
    fn table_parameter(&self, card_no: u32, table: u32, index: u32) -> f64;

    // ---- Commands and status
    /// Send one primitive to the card.
    fn submit(&self, card_no: u32, command: &Command);
    /// List status word and position.
    fn status(&self, card_no: u32) -> CardStatus;
    /// Current write position of the list input.
    fn input_pointer(&self, card_no: u32) -> u32;
    /// Status bits of scan head `head` (1 or 2).
    fn head_status(&self, card_no: u32, head: u32) -> HeadStatus;
    /// Trigger sampling status.
    fn measurement_status(&self, card_no: u32) -> MeasurementStatus;
    /// Copy sampled values of `channel` starting at ring slot `offset`.
    fn read_waveform(&self, card_no: u32, channel: u32, offset: u32, buffer: &mut [i32]);
    /// Number of slots in the sample ring.
    fn measurement_ring_size(&self) -> u32 {
        MEASUREMENT_RING_SIZE
    }

    // ---- Head transform
    /// Upload the head transform used for backtransformation.
    fn upload_transform(&self, card_no: u32, head: u32) -> u32;
    /// Map raw head feedback back to corrected hardware units.
    fn transform(&self, card_no: u32, head: u32, raw: [i32; 3]) -> [i32; 3];

    // ---- Errors
    /// Card-local error code of the last call.
    fn last_card_error(&self, card_no: u32) -> u32;
    /// Clear the given card-local error bits.
    fn reset_card_error(&self, card_no: u32, code: u32);
    /// Global error code of the library.
    fn last_global_error(&self) -> u32;

    /// Check both error codes and convert them into a typed error.
    fn check(&self, card_no: u32) -> ScanResult<()> {
        let code = self.last_card_error(card_no);
        if code != 0 {
            self.reset_card_error(card_no, code);
            return Err(ScanError::CardError {
                card: card_no,
                code,
            });
        }
        let code = self.last_global_error();
        if code != 0 {
            return Err(ScanError::GlobalError { code });
        }
        Ok(())
    }

    /// Submit a command and check the error codes afterwards.
    fn submit_checked(&self, card_no: u32, command: &Command) -> ScanResult<()> {
        debug!(card = card_no, %command, "submit");
        self.submit(card_no, command);
        self.check(card_no)
    }
}
