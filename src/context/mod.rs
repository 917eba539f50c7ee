//! Scan context: runtime owner of one scanner card.
//!
//! A [`ScanContext`] is created by the [`CardSelector`](crate::selector::CardSelector)
//! once a card has been acquired. It holds everything the translation of a
//! toolpath layer needs:
//!
//! - the correction model (units per millimeter, origin, field limits, position)
//! - the power calibration table and laser output port
//! - mark-on-the-fly scales and the measurement tag ledger
//! - measurement feedback mode, attribute filter and beam profile selector
//! - the poll control used by every blocking wait
//!
//! The card itself stays in the shared [`CardRegistry`]; the context only
//! holds a handle. Dropping the context releases the card.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use galvo_scan::prelude::*;
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.add_card(1234);
//! let selector = CardSelector::new(transport.clone(), CardCapabilities::rtc6());
//! let mut context = selector.acquire_card(1)?;
//! context.set_max_laser_power(400.0)?;
//!
//! let layer = MemoryLayer::new(1.0).with_segment(MemorySegment::new(
//!     SegmentKind::Polyline,
//!     vec![Point2D::new(0.0, 0.0), Point2D::new(10.0, 0.0)],
//!     SegmentProfile { speed: 800.0, jump_speed: 3000.0, laser_power: 200.0, focus: 0.0 },
//! ));
//! context.set_poll_control(PollControl::new(std::time::Duration::ZERO));
//! context.draw_layer(&layer)?;
//! # Ok::<(), galvo_scan::ScanError>(())
//! ```

mod afx;
mod laser;
mod list_ops;
mod oie;
mod on_the_fly;
mod skywriting;
mod tags;
mod translate;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

pub use afx::{AfxProfileSelector, AfxSettings, MAX_AFX_MODE};
pub use laser::{LaserControlFlags, LaserControlSettings, LaserMode};
pub use list_ops::Hatch2D;
pub use oie::OieRecordingMode;
pub use on_the_fly::MarkOnTheFly;
pub use skywriting::{SkywritingParameters, MAX_SKYWRITING_MODE};
pub use tags::{MeasurementTag, TagLedger};
pub use translate::{segment_laser_index, AttributeFilter, LayerPlan, MEASUREMENT_TAG_VARIABLE};

use crate::calibration::{CalibrationPoint, LaserPort, PowerCalibration};
use crate::capabilities::CardCapabilities;
use crate::card::{CardHandle, CardRegistry};
use crate::config::{DelaySettings, LaserSettings, PulseTiming};
use crate::error::{ScanError, ScanResult};
use crate::hardware::{Command, FirmwareImage, RtcTransport, VersionInfo};
use crate::limits::{
    self, delay_ticks, laser_pulse_bits, round_delay, validate_max_laser_power,
    validate_subdivision_threshold, DEFAULT_CORRECTION_FACTOR, LASER_BITS_PER_US,
    MAX_LASER_PULSE_BITS, SUBDIVISION_DISABLED,
};
use crate::poll::PollControl;
use crate::recording::{RecordingOptions, RecordingRegistry, SharedSession};
use crate::units::{CorrectionModel, FieldLimits, Point2D};

/// Spatial power modulation: `(start, end, percent) -> percent` per marked piece.
pub type PowerModulation = Box<dyn Fn(Point2D, Point2D, f64) -> f64 + Send + Sync>;

/// Runtime owner of one scanner card.
pub struct ScanContext {
    transport: Arc<dyn RtcTransport>,
    cards: Arc<CardRegistry>,
    handle: CardHandle,
    capabilities: CardCapabilities,
    correction: CorrectionModel,
    calibration: PowerCalibration,
    laser_port: LaserPort,
    max_laser_power: Option<f64>,
    subdivision_threshold: f64,
    motf: Option<MarkOnTheFly>,
    tags: TagLedger,
    tagging: bool,
    oie_mode: OieRecordingMode,
    attribute_filter: Option<AttributeFilter>,
    power_modulation: Option<PowerModulation>,
    afx: AfxProfileSelector,
    poll: PollControl,
    laser_index: u32,
    z_enabled: bool,
    recordings: RecordingRegistry,
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("handle", &self.handle)
            .field("family", &self.capabilities.family)
            .field("correction", &self.correction)
            .field("laser_port", &self.laser_port)
            .field("max_laser_power", &self.max_laser_power)
            .field("laser_index", &self.laser_index)
            .finish_non_exhaustive()
    }
}

impl ScanContext {
    /// Wrap an acquired card.
    pub fn new(
        transport: Arc<dyn RtcTransport>,
        cards: Arc<CardRegistry>,
        handle: CardHandle,
        capabilities: CardCapabilities,
    ) -> ScanResult<Self> {
        let card_no = cards.card_no(handle)?;
        let z_factor = DEFAULT_CORRECTION_FACTOR * capabilities.z_correction_ratio;
        let correction = CorrectionModel::new(DEFAULT_CORRECTION_FACTOR, z_factor)?;
        debug!(card = card_no, family = ?capabilities.family, "scan context created");
        Ok(Self {
            transport,
            cards,
            handle,
            capabilities,
            correction,
            calibration: PowerCalibration::default(),
            laser_port: LaserPort::default(),
            max_laser_power: None,
            subdivision_threshold: SUBDIVISION_DISABLED,
            motf: None,
            tags: TagLedger::default(),
            tagging: false,
            oie_mode: OieRecordingMode::Disabled,
            attribute_filter: None,
            power_modulation: None,
            afx: AfxProfileSelector::default(),
            poll: PollControl::default(),
            laser_index: 0,
            z_enabled: false,
            recordings: RecordingRegistry::default(),
        })
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Card number used by the access library.
    pub fn card_no(&self) -> ScanResult<u32> {
        self.cards.card_no(self.handle)
    }

    /// Arena handle of the owned card.
    pub fn handle(&self) -> CardHandle {
        self.handle
    }

    /// What the owned card can do.
    pub fn capabilities(&self) -> &CardCapabilities {
        &self.capabilities
    }

    /// Transport the card is driven through.
    pub fn transport(&self) -> &Arc<dyn RtcTransport> {
        &self.transport
    }

    /// Serial number reported by the card.
    pub fn serial_number(&self) -> ScanResult<u32> {
        let card_no = self.card_no()?;
        let serial = self.transport.serial_number(card_no);
        self.transport.check(card_no)?;
        Ok(serial)
    }

    /// Firmware and library versions reported by the card.
    pub fn versions(&self) -> ScanResult<VersionInfo> {
        let card_no = self.card_no()?;
        let versions = self.transport.versions(card_no);
        self.transport.check(card_no)?;
        Ok(versions)
    }

    /// Laser index this card serves in a multi-scanner rig.
    pub fn laser_index(&self) -> u32 {
        self.laser_index
    }

    /// Laser this context serves in a multi-scanner rig.
    pub fn set_laser_index(&mut self, laser_index: u32) {
        self.laser_index = laser_index;
    }

    // =========================================================================
    // Firmware and correction
    // =========================================================================

    /// Upload firmware, FPGA and auxiliary images.
    pub fn load_firmware(&mut self, image: &FirmwareImage<'_>) -> ScanResult<()> {
        let card_no = self.card_no()?;
        let code = self.transport.load_firmware(card_no, image);
        if code != 0 {
            return Err(ScanError::CardError {
                card: card_no,
                code,
            });
        }
        self.transport.check(card_no)?;
        let serial = self.transport.serial_number(card_no);
        self.cards.with_card(self.handle, |card| {
            card.serial = serial;
            Ok(())
        })?;
        info!(card = card_no, serial, bytes = image.firmware.len(), "firmware loaded");
        Ok(())
    }

    /// Load a correction file into `table`; `dimension` is 2 or 3.
    pub fn load_correction_file(&mut self, data: &[u8], table: u32, dimension: u32) -> ScanResult<()> {
        if !matches!(dimension, 2 | 3) {
            return Err(ScanError::InvalidParameter(format!(
                "correction dimension must be 2 or 3, got {dimension}"
            )));
        }
        if dimension == 3 && !self.capabilities.supports_3d {
            return Err(ScanError::NotSupported("3D correction"));
        }
        let card_no = self.card_no()?;
        let code = self.transport.load_correction_table(card_no, data, table, dimension);
        if code != 0 {
            return Err(ScanError::CardError {
                card: card_no,
                code,
            });
        }
        self.transport.check(card_no)?;
        self.z_enabled = dimension == 3;
        info!(card = card_no, table, dimension, "correction file loaded");
        Ok(())
    }

    /// Assign correction tables and take the correction factor from head A's table.
    pub fn select_correction_table(&mut self, head_a: u32, head_b: u32) -> ScanResult<()> {
        let card_no = self.card_no()?;
        self.control(&Command::SelectCorrectionTable { head_a, head_b })?;
        let parameter = self.transport.table_parameter(card_no, head_a, 1);
        self.transport.check(card_no)?;

        let xy_factor = if parameter > 0.0 {
            parameter
        } else {
            DEFAULT_CORRECTION_FACTOR
        };
        let z_factor = xy_factor * self.capabilities.z_correction_ratio;
        self.correction.set_factors(xy_factor, z_factor)?;
        info!(card = card_no, xy_factor, z_factor, "correction table selected");
        Ok(())
    }

    /// XY hardware units per millimeter.
    pub fn correction_factor(&self) -> f64 {
        self.correction.xy_factor()
    }

    /// Z hardware units per millimeter.
    pub fn z_correction_factor(&self) -> f64 {
        self.correction.z_factor()
    }

    /// Whether a 3D correction table is loaded.
    pub fn is_3d_enabled(&self) -> bool {
        self.z_enabled
    }

    /// Current correction state: factors, origin, field and position.
    pub fn correction(&self) -> &CorrectionModel {
        &self.correction
    }

    /// Offset in mm added to every point before conversion.
    pub fn set_laser_origin(&mut self, origin: Point2D) {
        self.correction.set_origin(origin);
    }

    /// Offset set by [`Self::set_laser_origin`].
    pub fn laser_origin(&self) -> Point2D {
        self.correction.origin()
    }

    /// Clip all output to a rectangle in millimeters.
    pub fn set_field_limits(&mut self, min: Point2D, max: Point2D) -> ScanResult<()> {
        self.correction.set_field_mm(min, max)
    }

    /// Remove the field limits set by [`Self::set_field_limits`].
    pub fn clear_field_limits(&mut self) {
        self.correction.clear_field();
    }

    /// Active field limits in hardware units, if any.
    pub fn field_limits(&self) -> Option<FieldLimits> {
        self.correction.field()
    }

    // =========================================================================
    // Card configuration
    // =========================================================================

    /// Size both list buffers.
    pub fn configure_lists(&mut self, list1: u32, list2: u32) -> ScanResult<()> {
        let capacity = list1.min(list2);
        if capacity == 0 || capacity > self.capabilities.max_list_size {
            return Err(ScanError::InvalidParameter(format!(
                "list sizes {list1}/{list2} exceed card limit {}",
                self.capabilities.max_list_size
            )));
        }
        self.cards
            .with_card(self.handle, |card| card.list.set_capacity(capacity))?;
        self.control(&Command::ConfigLists { list1, list2 })
    }

    /// Set the laser mode and the port power is written to.
    pub fn set_laser_mode(&mut self, mode: LaserMode, port: LaserPort) -> ScanResult<()> {
        self.control(&Command::SetLaserMode(mode.code()))?;
        self.laser_port = port;
        Ok(())
    }

    /// Output the laser power is written to.
    pub fn laser_port(&self) -> LaserPort {
        self.laser_port
    }

    /// Turn off automatic power control on the card.
    pub fn disable_auto_laser_control(&mut self) -> ScanResult<()> {
        self.control(&Command::DisableAutoLaserControl)
    }

    /// Program control signal options.
    pub fn set_laser_control(&mut self, flags: LaserControlFlags) -> ScanResult<()> {
        self.control(&Command::SetLaserControl(flags.bits()))
    }

    /// Laser pulses in raw 1/64 µs ticks.
    pub fn set_laser_pulses_in_bits(&mut self, half_period: u32, pulse_length: u32) -> ScanResult<()> {
        self.control(&Command::SetLaserPulses {
            half_period,
            pulse_length,
        })
    }

    /// Laser pulse timing in µs.
    pub fn set_laser_pulses(&mut self, half_period_us: f64, pulse_length_us: f64) -> ScanResult<()> {
        let (half_period, pulse_length) = laser_pulse_bits(half_period_us, pulse_length_us)?;
        self.set_laser_pulses_in_bits(half_period, pulse_length)
    }

    /// Standby pulses in raw 1/64 µs ticks.
    pub fn set_standby_in_bits(&mut self, half_period: u32, pulse_length: u32) -> ScanResult<()> {
        self.control(&Command::SetStandby {
            half_period,
            pulse_length,
        })
    }

    /// Standby pulse timing in µs.
    pub fn set_standby(&mut self, half_period_us: f64, pulse_length_us: f64) -> ScanResult<()> {
        let (half_period, pulse_length) = laser_pulse_bits(half_period_us, pulse_length_us)?;
        self.set_standby_in_bits(half_period, pulse_length)
    }

    /// Scanner delays in µs, each a multiple of 10.
    pub fn set_scanner_delays(&mut self, mark_us: u32, jump_us: u32, polygon_us: u32) -> ScanResult<()> {
        let command = Command::SetScannerDelays {
            jump: delay_ticks(jump_us)?,
            mark: delay_ticks(mark_us)?,
            polygon: delay_ticks(polygon_us)?,
        };
        self.emit(&[command])
    }

    /// Laser delays in raw 1/64 µs ticks.
    pub fn set_laser_delays_in_bits(&mut self, laser_on: i32, laser_off: u32) -> ScanResult<()> {
        self.emit(&[Command::SetLaserDelays {
            laser_on,
            laser_off,
        }])
    }

    /// Laser on and off delays in µs.
    pub fn set_laser_delays(&mut self, laser_on_us: f64, laser_off_us: f64) -> ScanResult<()> {
        let laser_on = laser_delay_bits(laser_on_us)?;
        let laser_off = laser_delay_bits(laser_off_us)?;
        self.set_laser_delays_in_bits(laser_on as i32, laser_off)
    }

    /// Ethernet communication timeouts in ms.
    pub fn set_communication_timeouts(&mut self, initial: f64, max: f64, multiplier: f64) -> ScanResult<()> {
        let valid = [initial, max, multiplier]
            .iter()
            .all(|value| value.is_finite() && *value > 0.0);
        if !valid || initial > max {
            return Err(ScanError::InvalidParameter(format!(
                "communication timeouts {initial}/{max}/{multiplier}"
            )));
        }
        self.control(&Command::SetCommunicationTimeouts {
            initial,
            max,
            multiplier,
        })
    }

    /// Timelag compensation of a scan head in µs.
    pub fn set_timelag_compensation(&mut self, head: u32, timelag_xy: u32, timelag_z: u32) -> ScanResult<()> {
        self.control(&Command::SetTimelagCompensation {
            head,
            timelag_xy,
            timelag_z,
        })
    }

    /// Program laser and scanner delays in one validated step.
    ///
    /// Every delay must lie in [0, 10 000 000] µs. Scanner delays are rounded
    /// to the 10 µs grid with a minimum of 10 µs.
    pub fn configure_delays(&mut self, delays: &DelaySettings) -> ScanResult<()> {
        let laser_on = laser_delay_bits(delays.laser_on_us)?;
        let laser_off = laser_delay_bits(delays.laser_off_us)?;
        let mark = round_delay(delays.mark_us)?;
        let jump = round_delay(delays.jump_us)?;
        let polygon = round_delay(delays.polygon_us)?;

        self.set_laser_delays_in_bits(laser_on as i32, laser_off)?;
        self.set_scanner_delays(mark, jump, polygon)?;
        debug!(mark, jump, polygon, "delays configured");
        Ok(())
    }

    /// Full laser setup: lists, mode, port, control signals, pulses and max power.
    pub fn configure_laser_mode(&mut self, laser: &LaserSettings) -> ScanResult<()> {
        let max_power = validate_max_laser_power(laser.max_power_w)?;
        let pulses = pulse_bits(&laser.pulses)?;
        let standby = pulse_bits(&laser.standby)?;

        let list_size = self.capabilities.max_list_size;
        self.configure_lists(list_size, list_size)?;
        self.set_laser_mode(laser.mode, laser.port)?;
        self.disable_auto_laser_control()?;
        self.set_laser_control(laser.control.into())?;
        self.set_laser_pulses_in_bits(pulses.0, pulses.1)?;
        self.set_standby_in_bits(standby.0, standby.1)?;
        self.max_laser_power = Some(max_power);
        info!(mode = ?laser.mode, port = %laser.port, max_power, "laser configured");
        Ok(())
    }

    // =========================================================================
    // Translation parameters
    // =========================================================================

    /// Power that corresponds to 100 % output, in W.
    pub fn set_max_laser_power(&mut self, watts: f64) -> ScanResult<()> {
        self.max_laser_power = Some(validate_max_laser_power(watts)?);
        Ok(())
    }

    /// Power at 100 % in W, once configured.
    pub fn max_laser_power(&self) -> Option<f64> {
        self.max_laser_power
    }

    /// Split marks longer than `threshold_mm` into equal pieces.
    pub fn set_subdivision_threshold(&mut self, threshold_mm: f64) -> ScanResult<()> {
        self.subdivision_threshold = validate_subdivision_threshold(threshold_mm)?;
        Ok(())
    }

    /// Draw vectors in one piece regardless of length.
    pub fn disable_subdivision(&mut self) {
        self.subdivision_threshold = SUBDIVISION_DISABLED;
    }

    /// Active subdivision threshold, if any.
    pub fn subdivision_threshold(&self) -> Option<f64> {
        (self.subdivision_threshold < SUBDIVISION_DISABLED).then_some(self.subdivision_threshold)
    }

    /// Replace the calibration with a single linear point.
    pub fn set_linear_power_calibration(&mut self, offset: f64, scaling: f64) -> ScanResult<()> {
        self.calibration.set_linear(offset, scaling)
    }

    /// Replace the calibration with a piecewise linear table.
    pub fn set_piecewise_power_calibration(&mut self, points: &[CalibrationPoint]) -> ScanResult<()> {
        self.calibration.set_piecewise_linear(points)
    }

    /// Go back to identity calibration.
    pub fn clear_power_calibration(&mut self) {
        self.calibration.clear();
    }

    /// Current calibration points in setpoint order.
    pub fn power_calibration(&self) -> &[CalibrationPoint] {
        self.calibration.points()
    }

    /// Map a requested percentage through the calibration table.
    pub fn calibrated_power(&self, percent: f64) -> ScanResult<f64> {
        self.calibration.resolve(percent)
    }

    /// Recompute power per marked piece from its endpoints.
    pub fn set_power_modulation(&mut self, modulation: PowerModulation) {
        self.power_modulation = Some(modulation);
    }

    /// Stop modulating power along segments.
    pub fn clear_power_modulation(&mut self) {
        self.power_modulation = None;
    }

    // ---- Measurement tags
    /// Tag every marked vector from the next layer on.
    pub fn enable_measurement_tagging(&mut self) {
        self.tagging = true;
    }

    /// Stop tagging vectors. Issued tags stay available.
    pub fn disable_measurement_tagging(&mut self) {
        self.tagging = false;
    }

    /// Whether marked vectors get tags.
    pub fn measurement_tagging_enabled(&self) -> bool {
        self.tagging
    }

    /// Tags issued for the most recently drawn layer.
    pub fn measurement_tags(&self) -> &TagLedger {
        &self.tags
    }

    /// Vector that was marked under `tag`.
    pub fn lookup_measurement_tag(&self, tag: u32) -> ScanResult<MeasurementTag> {
        self.tags.lookup(tag)
    }

    /// Forget every tag and restart numbering at 1.
    pub fn clear_measurement_tags(&mut self) {
        self.tags.clear();
    }

    // ---- Measurement feedback
    /// Select the measurement feedback mode used for the following layers.
    pub fn set_oie_mode(&mut self, mode: OieRecordingMode) -> ScanResult<()> {
        if mode.is_active() && !self.capabilities.supports_oie {
            return Err(ScanError::OieNotSupported);
        }
        self.oie_mode = mode;
        Ok(())
    }

    /// Numeric form of [`ScanContext::set_oie_mode`].
    pub fn set_oie_mode_code(&mut self, code: u32) -> ScanResult<()> {
        self.set_oie_mode(OieRecordingMode::try_from(code)?)
    }

    /// Active measurement feedback mode.
    pub fn oie_mode(&self) -> OieRecordingMode {
        self.oie_mode
    }

    // ---- Segment filter
    /// Only translate segments whose integer attribute matches `value`.
    pub fn set_attribute_filter(&mut self, namespace: &str, name: &str, value: i64) {
        self.attribute_filter = Some(AttributeFilter::new(namespace, name, value));
    }

    /// Draw every segment again.
    pub fn clear_attribute_filter(&mut self) {
        self.attribute_filter = None;
    }

    /// Active segment filter, if any.
    pub fn attribute_filter(&self) -> Option<&AttributeFilter> {
        self.attribute_filter.as_ref()
    }

    // ---- Beam profile selector
    /// Beam profile selector state.
    pub fn afx_selector(&self) -> &AfxProfileSelector {
        &self.afx
    }

    /// Mutable access for pin and timing setup.
    pub fn afx_selector_mut(&mut self) -> &mut AfxProfileSelector {
        &mut self.afx
    }

    /// Append a beam profile selection to the list.
    pub fn add_afx_selection(&mut self, mode: u32) -> ScanResult<()> {
        let commands = self.afx.selection_commands(mode)?;
        self.emit(&commands)
    }

    // ---- Polling
    /// Deadline and cancellation used by every wait on the card.
    pub fn set_poll_control(&mut self, poll: PollControl) {
        self.poll = poll;
    }

    /// Poll control shared by waits on this card.
    pub fn poll_control(&self) -> &PollControl {
        &self.poll
    }

    // =========================================================================
    // Recording sessions
    // =========================================================================

    /// Create a recording session on this card and keep it under a new id.
    pub fn prepare_recording(&mut self, options: RecordingOptions) -> ScanResult<SharedSession> {
        let session = crate::recording::RecordingSession::new(
            self.transport.clone(),
            self.cards.clone(),
            self.handle,
            &self.capabilities,
            self.correction.xy_factor(),
            self.correction.z_factor(),
            options,
        )?
        .with_poll_control(self.poll.clone());
        Ok(self.recordings.insert(session))
    }

    /// Session created by this context with `id`.
    pub fn find_recording(&self, id: Uuid) -> ScanResult<SharedSession> {
        self.recordings.find(id)
    }

    /// Drop a kept session.
    pub fn remove_recording(&mut self, id: Uuid) -> ScanResult<()> {
        self.recordings.remove(id)
    }

    /// Every session kept by this context.
    pub fn recordings(&self) -> &RecordingRegistry {
        &self.recordings
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Send a control command that does not go into the list.
    pub(crate) fn control(&self, command: &Command) -> ScanResult<()> {
        let card_no = self.card_no()?;
        self.transport.submit_checked(card_no, command)
    }
}

impl Drop for ScanContext {
    fn drop(&mut self) {
        if let Ok(card_no) = self.cards.card_no(self.handle) {
            self.transport.release(card_no);
            if self.cards.release(self.handle).is_ok() {
                info!(card = card_no, "card released");
            }
        }
    }
}

fn laser_delay_bits(delay_us: f64) -> ScanResult<u32> {
    let delay = limits::validate_delay(delay_us)?;
    let bits = (delay * LASER_BITS_PER_US).round();
    if bits < 1.0 || bits >= MAX_LASER_PULSE_BITS as f64 {
        return Err(ScanError::InvalidDelay(delay_us));
    }
    Ok(bits as u32)
}

fn pulse_bits(timing: &PulseTiming) -> ScanResult<(u32, u32)> {
    laser_pulse_bits(timing.half_period_us, timing.pulse_length_us)
}
