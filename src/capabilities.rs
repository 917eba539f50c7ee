//! Card families, variants and what they can do.
//!
//! Translation is one algorithm for every card. The differences between card
//! generations are expressed as data in a [`CardCapabilities`] descriptor and
//! checked where they matter (skywriting mode, measurement feedback, list
//! size, Z scaling).

use serde::{Deserialize, Serialize};

/// Hardware generation of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardFamily {
    /// RTC5 class cards.
    Rtc5,
    /// RTC6 class cards.
    Rtc6,
}

/// How many scan heads one driver instance controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardVariant {
    /// One card, one scan head.
    SingleScanner,
    /// Several cards, addressed by scanner index and routed by laser index.
    MultiScanner {
        /// Number of cards in the rig
        scanner_count: u32,
    },
}

impl CardVariant {
    /// Number of scanners this variant drives.
    pub fn scanner_count(&self) -> u32 {
        match self {
            CardVariant::SingleScanner => 1,
            CardVariant::MultiScanner { scanner_count } => *scanner_count,
        }
    }
}

/// Feature set of a card family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardCapabilities {
    /// Hardware generation
    pub family: CardFamily,
    /// Size of one command list in commands
    pub max_list_size: u32,
    /// Highest skywriting mode the firmware accepts
    pub max_skywriting_mode: u32,
    /// Measurement feedback (OIE) support
    pub supports_oie: bool,
    /// 3D correction tables and Z motion
    pub supports_3d: bool,
    /// Head transform upload for backtransformation
    pub supports_backtransformation: bool,
    /// Z correction factor relative to XY
    pub z_correction_ratio: f64,
}

impl CardCapabilities {
    /// RTC5 cards: 16-bit Z output and no mode 4 skywriting.
    pub fn rtc5() -> Self {
        Self {
            family: CardFamily::Rtc5,
            max_list_size: 1 << 18,
            max_skywriting_mode: 3,
            supports_oie: false,
            supports_3d: true,
            supports_backtransformation: false,
            z_correction_ratio: 1.0 / 16.0,
        }
    }

    /// RTC6 cards.
    pub fn rtc6() -> Self {
        Self {
            family: CardFamily::Rtc6,
            max_list_size: 1 << 22,
            max_skywriting_mode: 4,
            supports_oie: true,
            supports_3d: true,
            supports_backtransformation: true,
            z_correction_ratio: 1.0,
        }
    }

    /// Descriptor for a family.
    pub fn for_family(family: CardFamily) -> Self {
        match family {
            CardFamily::Rtc5 => Self::rtc5(),
            CardFamily::Rtc6 => Self::rtc6(),
        }
    }

    /// Whether skywriting `mode` can be programmed.
    pub fn supports_skywriting_mode(&self, mode: u32) -> bool {
        mode <= self.max_skywriting_mode
    }
}

impl Default for CardCapabilities {
    fn default() -> Self {
        Self::rtc6()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_presets() {
        assert!(CardCapabilities::rtc6().supports_skywriting_mode(4));
        assert!(!CardCapabilities::rtc5().supports_skywriting_mode(4));
        assert!(!CardCapabilities::rtc5().supports_oie);
        assert_eq!(
            CardCapabilities::for_family(CardFamily::Rtc5).z_correction_ratio,
            1.0 / 16.0
        );
    }

    #[test]
    fn test_variant_scanner_count() {
        assert_eq!(CardVariant::SingleScanner.scanner_count(), 1);
        assert_eq!(CardVariant::MultiScanner { scanner_count: 4 }.scanner_count(), 4);
    }
}
