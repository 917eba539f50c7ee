//! Multi-scanner rigs.
//!
//! A [`ScannerRig`] drives several cards that mark the same layer together.
//! Every scanner owns its own [`ScanContext`]; a segment reaches a scanner
//! through its laser index attribute, compared against the laser index of each
//! context. Segments without the attribute belong to laser 0.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::capabilities::CardVariant;
use crate::config::ConfigurationPreset;
use crate::context::{segment_laser_index, ScanContext};
use crate::error::{ScanError, ScanResult};
use crate::resources::ResourceProvider;
use crate::selector::CardSelector;
use crate::toolpath::ToolpathLayer;

/// Scan contexts addressed by scanner index.
#[derive(Debug)]
pub struct ScannerRig {
    variant: CardVariant,
    scanners: BTreeMap<u32, ScanContext>,
    fail_if_unassigned: bool,
}

impl ScannerRig {
    /// Empty rig of the given variant.
    pub fn new(variant: CardVariant) -> Self {
        Self {
            variant,
            scanners: BTreeMap::new(),
            fail_if_unassigned: false,
        }
    }

    /// Variant the rig was built for.
    pub fn variant(&self) -> CardVariant {
        self.variant
    }

    /// Reject layers with segments no scanner is assigned to, instead of
    /// skipping those segments.
    pub fn set_fail_if_unassigned(&mut self, fail: bool) {
        self.fail_if_unassigned = fail;
    }

    /// Put `context` in slot `scanner_index`, replacing and releasing any
    /// previous context there.
    pub fn add_scanner(&mut self, scanner_index: u32, context: ScanContext) -> ScanResult<()> {
        if scanner_index >= self.variant.scanner_count() {
            return Err(ScanError::ScannerNotFound(scanner_index));
        }
        info!(
            scanner = scanner_index,
            laser = context.laser_index(),
            card = context.card_no()?,
            "scanner added to rig"
        );
        self.scanners.insert(scanner_index, context);
        Ok(())
    }

    /// Acquire and configure one scanner per preset, in order from index 0.
    pub fn initialise_from_presets(
        &mut self,
        selector: &CardSelector,
        presets: &[&ConfigurationPreset],
        resources: &dyn ResourceProvider,
    ) -> ScanResult<()> {
        if presets.len() > self.variant.scanner_count() as usize {
            return Err(ScanError::InvalidParameter(format!(
                "{} presets for {} scanners",
                presets.len(),
                self.variant.scanner_count()
            )));
        }
        for (scanner_index, preset) in (0u32..).zip(presets) {
            let context = selector.acquire_from_preset(preset, resources)?;
            self.add_scanner(scanner_index, context)?;
        }
        Ok(())
    }

    /// Give the scanner in `scanner_index` back, releasing its card.
    pub fn remove_scanner(&mut self, scanner_index: u32) -> ScanResult<ScanContext> {
        self.scanners
            .remove(&scanner_index)
            .ok_or(ScanError::ScannerNotFound(scanner_index))
    }

    /// Context registered under `scanner_index`.
    pub fn scanner(&self, scanner_index: u32) -> ScanResult<&ScanContext> {
        self.scanners
            .get(&scanner_index)
            .ok_or(ScanError::ScannerNotFound(scanner_index))
    }

    /// Mutable form of [`Self::scanner`].
    pub fn scanner_mut(&mut self, scanner_index: u32) -> ScanResult<&mut ScanContext> {
        self.scanners
            .get_mut(&scanner_index)
            .ok_or(ScanError::ScannerNotFound(scanner_index))
    }

    /// Configured scanner indices, ascending.
    pub fn scanner_indices(&self) -> Vec<u32> {
        self.scanners.keys().copied().collect()
    }

    /// Number of registered scanners.
    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    /// Whether no scanner is registered.
    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    /// Scanner indices whose context serves `laser_index`.
    pub fn scanners_for_laser(&self, laser_index: u32) -> Vec<u32> {
        self.scanners
            .iter()
            .filter(|(_, context)| context.laser_index() == laser_index)
            .map(|(index, _)| *index)
            .collect()
    }

    /// Draw `layer` on every scanner whose laser index occurs in it.
    ///
    /// Assignment is checked for the whole layer before any scanner is
    /// started. Returns the number of scanners that drew.
    pub fn draw_layer(&mut self, layer: &dyn ToolpathLayer) -> ScanResult<usize> {
        let mut lasers = BTreeSet::new();
        for segment in 0..layer.segment_count() {
            lasers.insert(segment_laser_index(layer, segment)?);
        }

        let mut active = BTreeSet::new();
        for laser in &lasers {
            let scanners = self.scanners_for_laser(*laser);
            if scanners.is_empty() {
                if self.fail_if_unassigned {
                    return Err(ScanError::LaserIndexNotAssigned(*laser));
                }
                warn!(laser, "no scanner for laser index, segments skipped");
            }
            active.extend(scanners);
        }

        for scanner_index in &active {
            let context = self.scanner_mut(*scanner_index)?;
            let laser = context.laser_index();
            context.draw_layer_for_laser(layer, laser)?;
        }
        info!(scanners = active.len(), lasers = lasers.len(), "rig layer drawn");
        Ok(active.len())
    }
}
