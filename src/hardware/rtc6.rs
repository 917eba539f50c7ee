//! RTC6 transport backed by the vendor access library.
//!
//! Only compiled with the `rtc6_hardware` feature. Firmware and correction
//! files are handed to the library by path, so buffers are staged into a
//! per-process scratch directory first.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ffi::CString;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::command::{Command, OieCommand};
use super::transport::{
    CardStatus, FirmwareImage, HeadStatus, MeasurementStatus, RtcTransport, VersionInfo,
};
use crate::error::{ScanError, ScanResult};

/// Head transform buffer length in 32-bit words.
const TRANSFORM_WORDS: usize = 132_130;

/// Transport for RTC6 cards (PCIe and ethernet).
pub struct Rtc6Transport {
    initialised: Mutex<bool>,
    staging_dir: PathBuf,
    transforms: Mutex<HashMap<(u32, u32), Vec<u32>>>,
}

impl Rtc6Transport {
    /// Create a transport; the library is loaded on [`RtcTransport::init`].
    pub fn new() -> Self {
        Self {
            initialised: Mutex::new(false),
            staging_dir: std::env::temp_dir().join(format!("galvo_scan_{}", Uuid::new_v4())),
            transforms: Mutex::new(HashMap::new()),
        }
    }

    fn stage(&self, name: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.staging_dir)?;
        let path = self.staging_dir.join(name);
        std::fs::write(&path, data)?;
        Ok(path)
    }

    fn c_path(path: &Path) -> Option<CString> {
        CString::new(path.to_string_lossy().as_bytes()).ok()
    }
}

impl Default for Rtc6Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Rtc6Transport {
    fn drop(&mut self) {
        if *self.initialised.lock() {
            unsafe { rtc_sys::free_rtc6_dll() };
        }
        let _ = std::fs::remove_dir_all(&self.staging_dir);
    }
}

impl RtcTransport for Rtc6Transport {
    fn name(&self) -> &str {
        "rtc6"
    }

    fn init(&self) -> ScanResult<()> {
        let mut initialised = self.initialised.lock();
        if *initialised {
            return Ok(());
        }
        let code = unsafe { rtc_sys::init_rtc6_dll() };
        // Bit 0 only reports "no card found", which is fine for ethernet setups.
        if code & !1 != 0 {
            return Err(ScanError::GlobalError { code });
        }
        info!(cards = unsafe { rtc_sys::rtc6_count_cards() }, "RTC6 library loaded");
        *initialised = true;
        Ok(())
    }

    fn count_cards(&self) -> u32 {
        unsafe { rtc_sys::rtc6_count_cards() }
    }

    fn set_search_timeout(&self, timeout_ms: u32) {
        unsafe { rtc_sys::eth_set_search_cards_timeout(timeout_ms) }
    }

    fn search_cards(&self, ip: Ipv4Addr, netmask: Ipv4Addr) -> u32 {
        unsafe { rtc_sys::eth_search_cards(u32::from(ip).to_be(), u32::from(netmask).to_be()) }
    }

    fn search_cards_range(&self, start: Ipv4Addr, end: Ipv4Addr) -> u32 {
        unsafe { rtc_sys::eth_search_cards_range(u32::from(start).to_be(), u32::from(end).to_be()) }
    }

    fn ethernet_card_count(&self) -> u32 {
        unsafe { rtc_sys::eth_found_cards() }
    }

    fn ethernet_serial(&self, search_no: u32) -> u32 {
        unsafe { rtc_sys::eth_get_serial_search(search_no) }
    }

    fn assign_ethernet_card(&self, search_no: u32) -> u32 {
        unsafe { rtc_sys::eth_assign_card(search_no, 0) }
    }

    fn acquire(&self, card_no: u32) -> u32 {
        unsafe { rtc_sys::acquire_rtc(card_no) }
    }

    fn release(&self, card_no: u32) {
        unsafe {
            rtc_sys::release_rtc(card_no);
        }
    }

    fn serial_number(&self, card_no: u32) -> u32 {
        unsafe { rtc_sys::n_get_serial_number(card_no) }
    }

    fn versions(&self, card_no: u32) -> VersionInfo {
        unsafe {
            VersionInfo {
                rtc_version: rtc_sys::n_get_rtc_version(card_no),
                card_type: rtc_sys::n_get_card_type(card_no),
                dll_version: rtc_sys::get_dll_version(),
                hex_version: rtc_sys::n_get_hex_version(card_no),
                bios_version: rtc_sys::n_get_bios_version(card_no),
            }
        }
    }

    fn load_firmware(&self, card_no: u32, image: &FirmwareImage<'_>) -> u32 {
        let staged = self
            .stage("RTC6OUT.out", image.firmware)
            .and_then(|_| self.stage("RTC6RBF.rbf", image.fpga))
            .and_then(|_| self.stage("RTC6DAT.dat", image.auxiliary));
        if let Err(err) = staged {
            debug!(%err, "firmware staging failed");
            return u32::MAX;
        }
        let Some(dir) = Self::c_path(&self.staging_dir) else {
            return u32::MAX;
        };
        unsafe { rtc_sys::n_load_program_file(card_no, dir.as_ptr()) }
    }

    fn load_correction_table(&self, card_no: u32, data: &[u8], table: u32, dimension: u32) -> u32 {
        let path = match self.stage(&format!("correction_{card_no}_{table}.ct5"), data) {
            Ok(path) => path,
            Err(err) => {
                debug!(%err, "correction staging failed");
                return u32::MAX;
            }
        };
        let Some(path) = Self::c_path(&path) else {
            return u32::MAX;
        };
        unsafe { rtc_sys::n_load_correction_file(card_no, path.as_ptr(), table, dimension) }
    }

    fn table_parameter(&self, card_no: u32, table: u32, index: u32) -> f64 {
        unsafe { rtc_sys::n_get_table_para(card_no, table, index) }
    }

    fn submit(&self, card_no: u32, command: &Command) {
        use rtc_sys as sdk;
        let n = card_no;
        unsafe {
            match *command {
                Command::SetStartList { list, position } => {
                    sdk::n_set_start_list_pos(n, list, position);
                }
                Command::SetEndOfList => sdk::n_set_end_of_list(n),
                Command::ExecuteList { list, position } => sdk::n_execute_list_pos(n, list, position),
                Command::AutoChange { position } => sdk::n_auto_change_pos(n, position),
                Command::ConfigLists { list1, list2 } => sdk::n_config_list(n, list1, list2),
                Command::JumpAbs { x, y } => sdk::n_jump_abs(n, x, y),
                Command::MarkAbs { x, y } => sdk::n_mark_abs(n, x, y),
                Command::JumpAbs3d { x, y, z } => sdk::n_jump_abs_3d(n, x, y, z),
                Command::MarkAbs3d { x, y, z } => sdk::n_mark_abs_3d(n, x, y, z),
                Command::SetMarkSpeed(speed) => sdk::n_set_mark_speed(n, speed),
                Command::SetJumpSpeed(speed) => sdk::n_set_jump_speed(n, speed),
                Command::SetScannerDelays { jump, mark, polygon } => {
                    sdk::n_set_scanner_delays(n, jump, mark, polygon)
                }
                Command::SetLaserDelays { laser_on, laser_off } => {
                    sdk::n_set_laser_delays(n, laser_on, laser_off)
                }
                Command::LongDelay(ticks) => sdk::n_long_delay(n, ticks),
                Command::WriteDa1(value) => sdk::n_write_da_1_list(n, value),
                Command::WriteDa2(value) => sdk::n_write_da_2_list(n, value),
                Command::Write8BitPort(value) => sdk::n_write_8bit_port_list(n, value),
                Command::WriteIoPort(value) => sdk::n_write_io_port_list(n, value),
                Command::WriteIoPortMask { value, mask } => {
                    sdk::n_write_io_port_mask_list(n, value, mask)
                }
                Command::SetFreeVariable { index, value } => {
                    sdk::n_set_free_variable_list(n, index, value)
                }
                Command::SetLaserMode(mode) => sdk::n_set_laser_mode(n, mode),
                Command::DisableAutoLaserControl => sdk::n_set_auto_laser_control(n, 0, 0, 0, 0, 0),
                Command::SetLaserControl(ctrl) => sdk::n_set_laser_control(n, ctrl),
                Command::SetLaserPulses {
                    half_period,
                    pulse_length,
                } => sdk::n_set_laser_pulses_ctrl(n, half_period, pulse_length),
                Command::SetStandby {
                    half_period,
                    pulse_length,
                } => sdk::n_set_standby(n, half_period, pulse_length),
                Command::SelectCorrectionTable { head_a, head_b } => {
                    sdk::n_select_cor_table(n, head_a, head_b)
                }
                Command::SetTimelagCompensation {
                    head,
                    timelag_xy,
                    timelag_z,
                } => sdk::n_set_timelag_compensation(n, head, timelag_xy, timelag_z),
                Command::SetCommunicationTimeouts {
                    initial,
                    max,
                    multiplier,
                } => sdk::n_eth_set_com_timeouts(n, initial, max, multiplier),
                Command::SetSkyWritingMode(mode) => sdk::n_set_sky_writing_mode_list(n, mode),
                Command::SetSkyWritingParameters {
                    timelag,
                    laser_on_shift,
                    nprev,
                    npost,
                } => sdk::n_set_sky_writing_para_list(n, timelag, laser_on_shift, nprev, npost),
                Command::SetSkyWritingLimit(limit) => sdk::n_set_sky_writing_limit_list(n, limit),
                Command::SetFlyX(scale) => sdk::n_set_fly_x(n, scale),
                Command::SetFlyY(scale) => sdk::n_set_fly_y(n, scale),
                Command::WaitForEncoder {
                    axis,
                    value,
                    positive_half_plane,
                } => sdk::n_wait_for_encoder_mode(
                    n,
                    value,
                    axis.encoder_number(),
                    if positive_half_plane { 1 } else { -1 },
                ),
                Command::FlyReturn { x, y } => sdk::n_fly_return(n, x, y),
                Command::SetTrigger { period, signals } => sdk::n_set_trigger8(
                    n, period, signals[0], signals[1], signals[2], signals[3], signals[4],
                    signals[5], signals[6], signals[7],
                ),
                Command::Oie(oie) => match oie {
                    OieCommand::Enable => sdk::n_set_multi_mcbsp_in_list(n, 1, 0, 0),
                    OieCommand::Disable => sdk::n_set_multi_mcbsp_in_list(n, 0, 0, 0),
                    OieCommand::StartMeasurement => sdk::n_set_multi_mcbsp_in_list(n, 1, 1, 1),
                    OieCommand::StopMeasurement => sdk::n_set_multi_mcbsp_in_list(n, 1, 1, 0),
                    OieCommand::SelectPid(index) => sdk::n_set_free_variable_list(n, 1, index),
                },
            }
        }
    }

    fn status(&self, card_no: u32) -> CardStatus {
        let mut raw = 0;
        let mut position = 0;
        unsafe { rtc_sys::n_get_status(card_no, &mut raw, &mut position) };
        CardStatus { raw, position }
    }

    fn input_pointer(&self, card_no: u32) -> u32 {
        unsafe { rtc_sys::n_get_input_pointer(card_no) }
    }

    fn head_status(&self, card_no: u32, head: u32) -> HeadStatus {
        HeadStatus {
            raw: unsafe { rtc_sys::n_get_head_status(card_no, head) },
        }
    }

    fn measurement_status(&self, card_no: u32) -> MeasurementStatus {
        let mut busy = 0;
        let mut position = 0;
        unsafe { rtc_sys::n_measurement_status(card_no, &mut busy, &mut position) };
        MeasurementStatus {
            busy: busy != 0,
            position,
        }
    }

    fn read_waveform(&self, card_no: u32, channel: u32, offset: u32, buffer: &mut [i32]) {
        unsafe {
            rtc_sys::n_get_waveform_offset(
                card_no,
                channel,
                offset,
                buffer.len() as u32,
                buffer.as_mut_ptr(),
            )
        }
    }

    fn upload_transform(&self, card_no: u32, head: u32) -> u32 {
        let mut transforms = self.transforms.lock();
        let buffer = transforms
            .entry((card_no, head))
            .or_insert_with(|| vec![0; TRANSFORM_WORDS]);
        unsafe { rtc_sys::n_upload_transform(card_no, head, buffer.as_ptr()) }
    }

    fn transform(&self, card_no: u32, head: u32, raw: [i32; 3]) -> [i32; 3] {
        let transforms = self.transforms.lock();
        let Some(buffer) = transforms.get(&(card_no, head)) else {
            return raw;
        };
        let mut x = raw[0];
        let mut y = raw[1];
        unsafe { rtc_sys::n_transform(card_no, &mut x, &mut y, buffer.as_ptr(), head) };
        [x, y, raw[2]]
    }

    fn last_card_error(&self, card_no: u32) -> u32 {
        unsafe { rtc_sys::n_get_last_error(card_no) }
    }

    fn reset_card_error(&self, card_no: u32, code: u32) {
        unsafe { rtc_sys::n_reset_error(card_no, code) }
    }

    fn last_global_error(&self) -> u32 {
        let code = unsafe { rtc_sys::get_last_error() };
        if code != 0 {
            unsafe { rtc_sys::reset_error(code) };
        }
        code
    }
}
