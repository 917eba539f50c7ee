//! nLight AFX beam profile selection over digital IO.
//!
//! The laser picks one of seven beam profiles from three selection bits.
//! A selection is a list sequence: drive enable and the selection bits,
//! wait the selection delay, raise start, wait the acknowledge timeout.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::hardware::Command;

/// Highest digital IO bit.
pub const MAX_IO_BIT: u32 = 15;
/// Highest beam profile index.
pub const MAX_AFX_MODE: u32 = 6;
/// Bounds of the selection delay and acknowledge timeout in ms.
pub const AFX_MIN_DELAY_MS: u32 = 1;
/// Upper bound for both selector timings, in ms.
pub const AFX_MAX_DELAY_MS: u32 = 1000;

/// List delay ticks per millisecond.
const TICKS_PER_MS: u32 = 100;

/// Pin assignment and timing of the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfxSettings {
    /// Output bit that enables the selector
    pub enable_bit: u32,
    /// Output bit that latches a selection
    pub start_bit: u32,
    /// Output bits carrying the 3-bit profile index
    pub selection_bits: [u32; 3],
    /// Input bit the source raises once the profile is active
    pub acknowledge_bit: u32,
    /// Settle time between selection and start, in ms
    pub selection_delay_ms: u32,
    /// How long to wait for the acknowledge, in ms
    pub acknowledge_timeout_ms: u32,
}

impl Default for AfxSettings {
    fn default() -> Self {
        Self {
            enable_bit: 0,
            start_bit: 1,
            selection_bits: [2, 3, 4],
            acknowledge_bit: 0,
            selection_delay_ms: 30,
            acknowledge_timeout_ms: 500,
        }
    }
}

/// Beam profile selector of one card.
#[derive(Debug, Clone, Default)]
pub struct AfxProfileSelector {
    settings: AfxSettings,
    enabled: bool,
}

impl AfxProfileSelector {
    /// Current pin assignment and timing.
    pub fn settings(&self) -> &AfxSettings {
        &self.settings
    }

    /// Whether segments switch profiles automatically.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn on automatic selection from segment attributes.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop switching profiles. Settings can change again afterwards.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Assign the enable and start output bits.
    pub fn set_control_pins(&mut self, enable_bit: u32, start_bit: u32) -> ScanResult<()> {
        self.ensure_unlocked()?;
        check_bit("enable_bit", enable_bit)?;
        check_bit("start_bit", start_bit)?;
        self.settings.enable_bit = enable_bit;
        self.settings.start_bit = start_bit;
        Ok(())
    }

    /// Assign the three profile selection output bits.
    pub fn set_selection_pins(&mut self, bits: [u32; 3]) -> ScanResult<()> {
        self.ensure_unlocked()?;
        for bit in bits {
            check_bit("selection_bit", bit)?;
        }
        self.settings.selection_bits = bits;
        Ok(())
    }

    /// Assign the acknowledge input bit.
    pub fn set_acknowledge_pin(&mut self, bit: u32) -> ScanResult<()> {
        self.ensure_unlocked()?;
        check_bit("acknowledge_bit", bit)?;
        self.settings.acknowledge_bit = bit;
        Ok(())
    }

    /// Settle time in ms, at most [`AFX_MAX_DELAY_MS`].
    pub fn set_selection_delay(&mut self, delay_ms: u32) -> ScanResult<()> {
        self.ensure_unlocked()?;
        check_delay("selection_delay_ms", delay_ms)?;
        self.settings.selection_delay_ms = delay_ms;
        Ok(())
    }

    /// Acknowledge timeout in ms, at most [`AFX_MAX_DELAY_MS`].
    pub fn set_acknowledge_timeout(&mut self, timeout_ms: u32) -> ScanResult<()> {
        self.ensure_unlocked()?;
        check_delay("acknowledge_timeout_ms", timeout_ms)?;
        self.settings.acknowledge_timeout_ms = timeout_ms;
        Ok(())
    }

    /// List sequence selecting beam profile `mode`.
    pub fn selection_commands(&self, mode: u32) -> ScanResult<Vec<Command>> {
        if mode > MAX_AFX_MODE {
            return Err(ScanError::InvalidAfxParameter {
                name: "mode",
                value: mode,
            });
        }
        let s = &self.settings;
        let mask = (1u32 << s.enable_bit)
            | (1u32 << s.start_bit)
            | s.selection_bits.iter().fold(0u32, |acc, &bit| acc | (1 << bit));
        let selection = s
            .selection_bits
            .iter()
            .enumerate()
            .filter(|&(i, _)| mode & (1u32 << i) != 0)
            .fold(1u32 << s.enable_bit, |acc, (_, &bit)| acc | (1 << bit));
        let start = selection | (1 << s.start_bit);

        Ok(vec![
            Command::WriteIoPortMask {
                value: selection,
                mask,
            },
            Command::LongDelay(s.selection_delay_ms * TICKS_PER_MS),
            Command::WriteIoPortMask { value: start, mask },
            Command::LongDelay(s.acknowledge_timeout_ms * TICKS_PER_MS),
        ])
    }

    fn ensure_unlocked(&self) -> ScanResult<()> {
        if self.enabled {
            return Err(ScanError::AfxSettingsLocked);
        }
        Ok(())
    }
}

fn check_bit(name: &'static str, bit: u32) -> ScanResult<()> {
    if bit > MAX_IO_BIT {
        return Err(ScanError::InvalidAfxParameter { name, value: bit });
    }
    Ok(())
}

fn check_delay(name: &'static str, value: u32) -> ScanResult<()> {
    if !(AFX_MIN_DELAY_MS..=AFX_MAX_DELAY_MS).contains(&value) {
        return Err(ScanError::InvalidAfxParameter { name, value });
    }
    Ok(())
}
