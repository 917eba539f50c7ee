//! Measurement tag ledger.
//!
//! When tagging is enabled every marked vector gets a tag number written to
//! a free variable inside the list. The card reports that number back
//! alongside sampled data, and the ledger maps it to the vector's ids.
//! Tag numbers are 1-based and wrap at 22 bits, so after a wrap the most
//! recent entry for a tag wins. Entries only cover the most recently drawn
//! layer; numbering carries on across layers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::limits::MAX_MEASUREMENT_TAG;
use crate::toolpath::SegmentIds;

/// Identity of one marked vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementTag {
    /// Number written to the list and reported back by the card
    pub tag: u32,
    /// Part id of the segment
    pub part: u32,
    /// Profile id of the segment
    pub profile: u32,
    /// Segment id
    pub segment: u32,
    /// Index of the vector within its segment
    pub vector: u32,
}

/// Ordered ledger of issued tags, indexed by tag number.
#[derive(Debug, Clone)]
pub struct TagLedger {
    entries: Vec<MeasurementTag>,
    index: HashMap<u32, usize>,
    next: u32,
}

impl Default for TagLedger {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            next: 1,
        }
    }
}

impl TagLedger {
    /// Tag number the next vector will receive.
    pub fn peek_next(&self) -> u32 {
        self.next
    }

    /// Issue a tag for `vector` of the segment identified by `ids`.
    pub fn issue(&mut self, ids: SegmentIds, vector: u32) -> u32 {
        let tag = self.next;
        self.index.insert(tag, self.entries.len());
        self.entries.push(MeasurementTag {
            tag,
            part: ids.part,
            profile: ids.profile,
            segment: ids.segment,
            vector,
        });
        self.next = following_tag(tag);
        tag
    }

    /// Entry most recently issued under `tag`.
    pub fn lookup(&self, tag: u32) -> ScanResult<MeasurementTag> {
        self.index
            .get(&tag)
            .and_then(|&position| self.entries.get(position))
            .copied()
            .ok_or(ScanError::MeasurementTagNotFound(tag))
    }

    /// All entries in issue order.
    pub fn entries(&self) -> &[MeasurementTag] {
        &self.entries
    }

    /// Number of entries issued since the last layer started.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the previous layer's entries. Numbering continues from where it stopped.
    pub(crate) fn begin_layer(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Forget every entry and restart at tag 1.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Tag issued after `tag`, wrapping back to 1.
pub(crate) fn following_tag(tag: u32) -> u32 {
    if tag >= MAX_MEASUREMENT_TAG {
        1
    } else {
        tag + 1
    }
}
