//! Raw FFI declarations for the RTC6 scanner controller access library.
//!
//! Only the subset of the vendor API used by `galvo_scan` is declared here.
//! Every function follows the vendor convention: card-addressed functions are
//! prefixed `n_` and take the 1-based card number as first argument, and any
//! failure is reported through `n_get_last_error` (card-local) or
//! `get_last_error` (global) rather than through return values.
//!
//! The declarations are only available with the `rtc6-sdk` feature, which also
//! makes the build script link against the vendor library.

#![allow(non_camel_case_types)]
#![allow(missing_docs)]

use std::os::raw::{c_char, c_double, c_int, c_uint};

/// Sample period of the hardware trigger in 10 µs ticks.
pub type TriggerPeriod = c_uint;

#[cfg(feature = "rtc6-sdk")]
extern "system" {
    // ---- Library and card management
    pub fn init_rtc6_dll() -> c_uint;
    pub fn free_rtc6_dll();
    pub fn rtc6_count_cards() -> c_uint;
    pub fn acquire_rtc(card_no: c_uint) -> c_uint;
    pub fn release_rtc(card_no: c_uint) -> c_uint;
    pub fn get_last_error() -> c_uint;
    pub fn reset_error(code: c_uint);
    pub fn get_dll_version() -> c_uint;

    // ---- Ethernet discovery
    pub fn eth_convert_string_to_ip(ip: *const c_char) -> c_uint;
    pub fn eth_set_search_cards_timeout(timeout: c_uint);
    pub fn eth_search_cards(ip: c_uint, netmask: c_uint) -> c_uint;
    pub fn eth_search_cards_range(start_ip: c_uint, end_ip: c_uint) -> c_uint;
    pub fn eth_found_cards() -> c_uint;
    pub fn eth_get_serial_search(search_no: c_uint) -> c_uint;
    pub fn eth_assign_card(search_no: c_uint, card_no: c_uint) -> c_uint;
    pub fn n_eth_set_com_timeouts(
        card_no: c_uint,
        initial_timeout: c_double,
        max_timeout: c_double,
        multiplier: c_double,
    );

    // ---- Card identity and errors
    pub fn n_get_last_error(card_no: c_uint) -> c_uint;
    pub fn n_reset_error(card_no: c_uint, code: c_uint);
    pub fn n_get_serial_number(card_no: c_uint) -> c_uint;
    pub fn n_get_rtc_version(card_no: c_uint) -> c_uint;
    pub fn n_get_card_type(card_no: c_uint) -> c_uint;
    pub fn n_get_hex_version(card_no: c_uint) -> c_uint;
    pub fn n_get_bios_version(card_no: c_uint) -> c_uint;

    // ---- Firmware and correction
    pub fn n_load_program_file(card_no: c_uint, path: *const c_char) -> c_uint;
    pub fn n_load_correction_file(
        card_no: c_uint,
        file_name: *const c_char,
        table_no: c_uint,
        dimension: c_uint,
    ) -> c_uint;
    pub fn n_select_cor_table(card_no: c_uint, head_a: c_uint, head_b: c_uint);
    pub fn n_get_table_para(card_no: c_uint, table_no: c_uint, para_no: c_uint) -> c_double;
    pub fn n_upload_transform(card_no: c_uint, head_no: c_uint, ptr: *const c_uint) -> c_uint;
    pub fn n_transform(
        card_no: c_uint,
        sig_x: *mut c_int,
        sig_y: *mut c_int,
        transform: *const c_uint,
        head_no: c_uint,
    ) -> c_uint;

    // ---- Control commands
    pub fn n_config_list(card_no: c_uint, mem1: c_uint, mem2: c_uint);
    pub fn n_set_laser_mode(card_no: c_uint, mode: c_uint);
    pub fn n_set_auto_laser_control(
        card_no: c_uint,
        ctrl: c_uint,
        value: c_uint,
        mode: c_uint,
        min_value: c_uint,
        max_value: c_uint,
    );
    pub fn n_set_laser_control(card_no: c_uint, ctrl: c_uint);
    pub fn n_set_laser_pulses_ctrl(card_no: c_uint, half_period: c_uint, pulse_length: c_uint);
    pub fn n_set_standby(card_no: c_uint, half_period: c_uint, pulse_length: c_uint);
    pub fn n_get_status(card_no: c_uint, status: *mut c_uint, pos: *mut c_uint);
    pub fn n_get_input_pointer(card_no: c_uint) -> c_uint;
    pub fn n_get_head_status(card_no: c_uint, head: c_uint) -> c_uint;
    pub fn n_measurement_status(card_no: c_uint, busy: *mut c_uint, pos: *mut c_uint);
    pub fn n_get_waveform_offset(
        card_no: c_uint,
        channel: c_uint,
        offset: c_uint,
        number: c_uint,
        ptr: *mut c_int,
    );
    pub fn n_set_timelag_compensation(
        card_no: c_uint,
        head_no: c_uint,
        timelag_xy: c_uint,
        timelag_z: c_uint,
    );

    // ---- List framing
    pub fn n_set_start_list_pos(card_no: c_uint, list_no: c_uint, pos: c_uint) -> c_uint;
    pub fn n_set_end_of_list(card_no: c_uint);
    pub fn n_execute_list_pos(card_no: c_uint, list_no: c_uint, pos: c_uint);
    pub fn n_auto_change_pos(card_no: c_uint, start: c_uint);

    // ---- List commands
    pub fn n_jump_abs(card_no: c_uint, x: c_int, y: c_int);
    pub fn n_mark_abs(card_no: c_uint, x: c_int, y: c_int);
    pub fn n_jump_abs_3d(card_no: c_uint, x: c_int, y: c_int, z: c_int);
    pub fn n_mark_abs_3d(card_no: c_uint, x: c_int, y: c_int, z: c_int);
    pub fn n_set_mark_speed(card_no: c_uint, speed: c_double);
    pub fn n_set_jump_speed(card_no: c_uint, speed: c_double);
    pub fn n_set_scanner_delays(card_no: c_uint, jump: c_uint, mark: c_uint, polygon: c_uint);
    pub fn n_set_laser_delays(card_no: c_uint, laser_on: c_int, laser_off: c_uint);
    pub fn n_long_delay(card_no: c_uint, delay: c_uint);
    pub fn n_write_da_1_list(card_no: c_uint, value: c_uint);
    pub fn n_write_da_2_list(card_no: c_uint, value: c_uint);
    pub fn n_write_8bit_port_list(card_no: c_uint, value: c_uint);
    pub fn n_write_io_port_list(card_no: c_uint, value: c_uint);
    pub fn n_write_io_port_mask_list(card_no: c_uint, value: c_uint, mask: c_uint);
    pub fn n_set_free_variable_list(card_no: c_uint, var_no: c_uint, value: c_uint);
    pub fn n_set_trigger8(
        card_no: c_uint,
        period: TriggerPeriod,
        signal1: c_uint,
        signal2: c_uint,
        signal3: c_uint,
        signal4: c_uint,
        signal5: c_uint,
        signal6: c_uint,
        signal7: c_uint,
        signal8: c_uint,
    );
    pub fn n_set_sky_writing_mode_list(card_no: c_uint, mode: c_uint);
    pub fn n_set_sky_writing_para_list(
        card_no: c_uint,
        timelag: c_double,
        laser_on_shift: c_int,
        nprev: c_uint,
        npost: c_uint,
    );
    pub fn n_set_sky_writing_limit_list(card_no: c_uint, cos_angle: c_double);
    pub fn n_set_fly_x(card_no: c_uint, scale_x: c_double);
    pub fn n_set_fly_y(card_no: c_uint, scale_y: c_double);
    pub fn n_wait_for_encoder_mode(card_no: c_uint, value: c_int, encoder_no: c_uint, mode: c_int);
    pub fn n_fly_return(card_no: c_uint, x: c_int, y: c_int);
    pub fn n_set_multi_mcbsp_in_list(card_no: c_uint, ctrl: c_uint, p: c_uint, mode: c_uint);
    pub fn n_set_mcbsp_out_ptr_list(card_no: c_uint, number: c_uint, signal_ptr: *const c_uint);
}

/// Card status bits reported by `n_get_status` that indicate a busy list.
pub const STATUS_BUSY_MASK: c_uint = (1 << 0) | (1 << 7) | (1 << 15);
