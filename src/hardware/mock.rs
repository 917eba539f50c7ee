//! In-memory scanner card used by tests.
//!
//! [`MockTransport`] implements [`RtcTransport`] without any hardware. It keeps
//! a log of every submitted command per card and simulates the parts of the
//! card that the host observes:
//!
//! - list execution that stays busy for a configurable number of status polls
//! - a trigger sample stream written into a wrap-around ring
//! - correction table parameters, serial numbers and version blocks
//! - cards whose firmware is not loaded yet (serial number 0)
//! - ethernet discovery and assignment
//! - injected card-local and global error codes, including failed waveform reads
//! - scan head status, connected unless told otherwise
//!
//! # Example
//!
//! ```rust
//! use galvo_scan::hardware::{Command, MockTransport, RtcTransport};
//!
//! let mock = MockTransport::new();
//! let card = mock.add_card(123_456);
//! mock.submit(card, &Command::JumpAbs { x: 0, y: 0 });
//! assert_eq!(mock.commands(card).len(), 1);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use parking_lot::Mutex;

use super::command::Command;
use super::transport::{
    CardStatus, FirmwareImage, HeadStatus, MeasurementStatus, RtcTransport, VersionInfo,
    MEASUREMENT_NOT_STARTED,
};
use crate::error::ScanResult;
use crate::limits::MEASUREMENT_RING_SIZE;

// =============================================================================
// Simulated card state
// =============================================================================

/// First card number handed out to ethernet cards.
const ETHERNET_CARD_BASE: u32 = 101;

#[derive(Debug, Clone, Copy)]
struct MeasurementSim {
    total: u64,
    per_poll: u64,
    produced: u64,
}

#[derive(Debug, Default)]
struct MockCard {
    serial: u32,
    firmware_loaded: bool,
    acquired: bool,
    ethernet: bool,
    commands: Vec<Command>,
    table_params: HashMap<(u32, u32), f64>,
    tables: Vec<LoadedTable>,
    firmware_loads: u32,
    pending_error: u32,
    waveform_error: u32,
    head_status: Option<HeadStatus>,
    list_busy_remaining: u32,
    measurement: Option<MeasurementSim>,
    transform_uploaded: bool,
}

/// A correction table load observed by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedTable {
    /// Table slot
    pub table: u32,
    /// 2 or 3
    pub dimension: u32,
    /// Size of the uploaded file
    pub bytes: usize,
}

#[derive(Debug)]
struct MockState {
    initialised: bool,
    cards: BTreeMap<u32, MockCard>,
    next_local: u32,
    next_ethernet: u32,
    found: Vec<u32>,
    search_timeout_ms: u32,
    global_error: u32,
    busy_polls: u32,
    measurement_plan: Option<(u64, u64)>,
    ring_size: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            initialised: false,
            cards: BTreeMap::new(),
            next_local: 1,
            next_ethernet: ETHERNET_CARD_BASE,
            found: Vec::new(),
            search_timeout_ms: 0,
            global_error: 0,
            busy_polls: 2,
            measurement_plan: None,
            ring_size: MEASUREMENT_RING_SIZE,
        }
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// Simulated access library.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Create a mock without any cards.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shrink or grow the sample ring.
    pub fn with_ring_size(self, ring_size: u32) -> Self {
        self.state.lock().ring_size = ring_size.max(1);
        self
    }

    /// Attach a local card with loaded firmware; returns its card number.
    pub fn add_card(&self, serial: u32) -> u32 {
        self.insert_card(serial, true, false)
    }

    /// Attach a local card whose firmware still has to be uploaded.
    pub fn add_uninitialized_card(&self, serial: u32) -> u32 {
        self.insert_card(serial, false, false)
    }

    /// Make a card discoverable over ethernet; returns its card number.
    pub fn add_ethernet_card(&self, serial: u32, firmware_loaded: bool) -> u32 {
        self.insert_card(serial, firmware_loaded, true)
    }

    fn insert_card(&self, serial: u32, firmware_loaded: bool, ethernet: bool) -> u32 {
        let mut state = self.state.lock();
        let card_no = if ethernet {
            state.next_ethernet += 1;
            state.next_ethernet - 1
        } else {
            state.next_local += 1;
            state.next_local - 1
        };
        let mut card = MockCard {
            serial,
            firmware_loaded,
            ethernet,
            ..MockCard::default()
        };
        card.table_params.insert((1, 1), 10_000.0);
        state.cards.insert(card_no, card);
        card_no
    }

    /// Set a correction table parameter reported by `table_parameter`.
    pub fn set_table_parameter(&self, card_no: u32, table: u32, index: u32, value: f64) {
        self.with_card(card_no, |card| {
            card.table_params.insert((table, index), value);
        });
    }

    /// Number of status polls a list stays busy after `ExecuteList`.
    pub fn set_list_busy_polls(&self, polls: u32) {
        self.state.lock().busy_polls = polls;
    }

    /// Produce `total` samples per channel, `per_poll` per measurement query,
    /// for every list executed from now on.
    pub fn set_measurement_plan(&self, total: u64, per_poll: u64) {
        self.state.lock().measurement_plan = Some((total, per_poll.max(1)));
    }

    /// Make the next error check of `card_no` fail with `code`.
    pub fn inject_card_error(&self, card_no: u32, code: u32) {
        self.with_card(card_no, |card| card.pending_error = code);
    }

    /// Make the next waveform read of `card_no` raise card error `code`.
    pub fn inject_waveform_error(&self, card_no: u32, code: u32) {
        self.with_card(card_no, |card| card.waveform_error = code);
    }

    /// Report `raw` as the status word of every head of `card_no`.
    pub fn set_head_status(&self, card_no: u32, raw: u32) {
        self.with_card(card_no, |card| card.head_status = Some(HeadStatus { raw }));
    }

    /// Make the next global error check fail with `code`.
    pub fn inject_global_error(&self, code: u32) {
        self.state.lock().global_error = code;
    }

    /// Every command submitted to `card_no`, in order.
    pub fn commands(&self, card_no: u32) -> Vec<Command> {
        self.state
            .lock()
            .cards
            .get(&card_no)
            .map(|card| card.commands.clone())
            .unwrap_or_default()
    }

    /// Submitted motion commands only.
    pub fn motion_commands(&self, card_no: u32) -> Vec<Command> {
        self.commands(card_no)
            .into_iter()
            .filter(Command::is_motion)
            .collect()
    }

    /// Forget the command log of `card_no`.
    pub fn clear_commands(&self, card_no: u32) {
        self.with_card(card_no, |card| card.commands.clear());
    }

    /// How often firmware was uploaded to `card_no`.
    pub fn firmware_loads(&self, card_no: u32) -> u32 {
        self.read_card(card_no, |card| card.firmware_loads)
    }

    /// Correction tables loaded into `card_no`.
    pub fn loaded_tables(&self, card_no: u32) -> Vec<LoadedTable> {
        self.read_card(card_no, |card| card.tables.clone())
    }

    /// Whether `card_no` is currently acquired.
    pub fn is_acquired(&self, card_no: u32) -> bool {
        self.read_card(card_no, |card| card.acquired)
    }

    /// Whether a head transform was uploaded to `card_no`.
    pub fn transform_uploaded(&self, card_no: u32) -> bool {
        self.read_card(card_no, |card| card.transform_uploaded)
    }

    /// Ethernet search timeout last configured.
    pub fn search_timeout_ms(&self) -> u32 {
        self.state.lock().search_timeout_ms
    }

    /// Value the simulated stream produces for `channel` at sample `index`.
    pub fn sample_value(channel: u32, index: u64) -> i32 {
        (index as i32).wrapping_add((channel as i32) << 24)
    }

    fn with_card(&self, card_no: u32, f: impl FnOnce(&mut MockCard)) {
        if let Some(card) = self.state.lock().cards.get_mut(&card_no) {
            f(card);
        }
    }

    fn read_card<T: Default>(&self, card_no: u32, f: impl FnOnce(&MockCard) -> T) -> T {
        self.state.lock().cards.get(&card_no).map(f).unwrap_or_default()
    }
}

impl RtcTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(&self) -> ScanResult<()> {
        self.state.lock().initialised = true;
        Ok(())
    }

    fn count_cards(&self) -> u32 {
        self.state
            .lock()
            .cards
            .values()
            .filter(|card| !card.ethernet)
            .count() as u32
    }

    fn set_search_timeout(&self, timeout_ms: u32) {
        self.state.lock().search_timeout_ms = timeout_ms;
    }

    fn search_cards(&self, _ip: Ipv4Addr, _netmask: Ipv4Addr) -> u32 {
        let mut state = self.state.lock();
        let found: Vec<u32> = state
            .cards
            .iter()
            .filter(|(_, card)| card.ethernet)
            .map(|(card_no, _)| *card_no)
            .collect();
        state.found = found;
        state.found.len() as u32
    }

    fn search_cards_range(&self, start: Ipv4Addr, end: Ipv4Addr) -> u32 {
        if u32::from(start) > u32::from(end) {
            self.state.lock().found.clear();
            return 0;
        }
        self.search_cards(start, Ipv4Addr::new(255, 255, 255, 0))
    }

    fn ethernet_card_count(&self) -> u32 {
        self.state.lock().found.len() as u32
    }

    fn ethernet_serial(&self, search_no: u32) -> u32 {
        let state = self.state.lock();
        let card_no = match search_no.checked_sub(1).and_then(|i| state.found.get(i as usize)) {
            Some(card_no) => *card_no,
            None => return 0,
        };
        state
            .cards
            .get(&card_no)
            .filter(|card| card.firmware_loaded)
            .map(|card| card.serial)
            .unwrap_or(0)
    }

    fn assign_ethernet_card(&self, search_no: u32) -> u32 {
        let state = self.state.lock();
        search_no
            .checked_sub(1)
            .and_then(|i| state.found.get(i as usize))
            .copied()
            .unwrap_or(0)
    }

    fn acquire(&self, card_no: u32) -> u32 {
        let mut state = self.state.lock();
        match state.cards.get_mut(&card_no) {
            Some(card) if !card.acquired => {
                card.acquired = true;
                card_no
            }
            _ => 0,
        }
    }

    fn release(&self, card_no: u32) {
        self.with_card(card_no, |card| card.acquired = false);
    }

    fn serial_number(&self, card_no: u32) -> u32 {
        self.read_card(card_no, |card| {
            if card.firmware_loaded {
                card.serial
            } else {
                0
            }
        })
    }

    fn versions(&self, card_no: u32) -> VersionInfo {
        self.read_card(card_no, |card| VersionInfo {
            rtc_version: 0x0600,
            card_type: 6,
            dll_version: 600,
            hex_version: if card.firmware_loaded { 1 } else { 0 },
            bios_version: 1,
        })
    }

    fn load_firmware(&self, card_no: u32, image: &FirmwareImage<'_>) -> u32 {
        let mut loaded = false;
        self.with_card(card_no, |card| {
            card.firmware_loads += 1;
            card.firmware_loaded = !image.firmware.is_empty();
            loaded = card.firmware_loaded;
        });
        if loaded {
            0
        } else {
            1
        }
    }

    fn load_correction_table(&self, card_no: u32, data: &[u8], table: u32, dimension: u32) -> u32 {
        self.with_card(card_no, |card| {
            card.tables.push(LoadedTable {
                table,
                dimension,
                bytes: data.len(),
            })
        });
        0
    }

    fn table_parameter(&self, card_no: u32, table: u32, index: u32) -> f64 {
        self.read_card(card_no, |card| {
            card.table_params.get(&(table, index)).copied().unwrap_or(0.0)
        })
    }

    fn submit(&self, card_no: u32, command: &Command) {
        let mut state = self.state.lock();
        let busy_polls = state.busy_polls;
        let plan = state.measurement_plan;
        if let Some(card) = state.cards.get_mut(&card_no) {
            if let Command::ExecuteList { .. } = command {
                card.list_busy_remaining = busy_polls;
                card.measurement = plan.map(|(total, per_poll)| MeasurementSim {
                    total,
                    per_poll,
                    produced: 0,
                });
            }
            card.commands.push(command.clone());
        }
    }

    fn status(&self, card_no: u32) -> CardStatus {
        let mut state = self.state.lock();
        match state.cards.get_mut(&card_no) {
            Some(card) => {
                let busy = card.list_busy_remaining > 0;
                card.list_busy_remaining = card.list_busy_remaining.saturating_sub(1);
                CardStatus {
                    raw: if busy { 1 } else { 0 },
                    position: card.commands.len() as u32,
                }
            }
            None => CardStatus::default(),
        }
    }

    fn input_pointer(&self, card_no: u32) -> u32 {
        self.read_card(card_no, |card| card.commands.len() as u32)
    }

    fn measurement_status(&self, card_no: u32) -> MeasurementStatus {
        let mut state = self.state.lock();
        let ring = state.ring_size as u64;
        let idle = MeasurementStatus {
            busy: false,
            position: MEASUREMENT_NOT_STARTED,
        };
        let Some(card) = state.cards.get_mut(&card_no) else {
            return idle;
        };
        match card.measurement.as_mut() {
            Some(sim) => {
                sim.produced = (sim.produced + sim.per_poll).min(sim.total);
                MeasurementStatus {
                    busy: sim.produced < sim.total,
                    position: (sim.produced % ring) as u32,
                }
            }
            None => idle,
        }
    }

    fn head_status(&self, card_no: u32, _head: u32) -> HeadStatus {
        self.read_card(card_no, |card| card.head_status.unwrap_or(HeadStatus::CONNECTED))
    }

    fn read_waveform(&self, card_no: u32, channel: u32, offset: u32, buffer: &mut [i32]) {
        let mut state = self.state.lock();
        if let Some(card) = state.cards.get_mut(&card_no) {
            let code = std::mem::take(&mut card.waveform_error);
            if code != 0 {
                card.pending_error |= code;
                buffer.fill(0);
                return;
            }
        }
        let ring = state.ring_size as u64;
        let produced = state
            .cards
            .get(&card_no)
            .and_then(|card| card.measurement)
            .map(|sim| sim.produced)
            .unwrap_or(0);
        let head = produced % ring;
        let lap_base = produced - head;
        for (i, value) in buffer.iter_mut().enumerate() {
            let slot = (offset as u64 + i as u64) % ring;
            let index = if slot < head {
                Some(lap_base + slot)
            } else {
                (lap_base + slot).checked_sub(ring)
            };
            *value = index.map_or(0, |index| Self::sample_value(channel, index));
        }
    }

    fn measurement_ring_size(&self) -> u32 {
        self.state.lock().ring_size
    }

    fn upload_transform(&self, card_no: u32, _head: u32) -> u32 {
        self.with_card(card_no, |card| card.transform_uploaded = true);
        0
    }

    fn transform(&self, _card_no: u32, _head: u32, raw: [i32; 3]) -> [i32; 3] {
        raw
    }

    fn last_card_error(&self, card_no: u32) -> u32 {
        self.read_card(card_no, |card| card.pending_error)
    }

    fn reset_card_error(&self, card_no: u32, code: u32) {
        self.with_card(card_no, |card| card.pending_error &= !code);
    }

    fn last_global_error(&self) -> u32 {
        std::mem::take(&mut self.state.lock().global_error)
    }
}
