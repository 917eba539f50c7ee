//! Arena of acquired cards.
//!
//! Selectors, contexts and recording sessions never share a card record
//! directly. They hold a [`CardHandle`] (slot index plus generation) and
//! resolve it through the [`CardRegistry`] on every access. Releasing a card
//! bumps the slot generation, so a handle that outlived its card resolves to
//! `CardNotInitialized` instead of addressing whatever card took the slot.

use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::command_list::CommandList;
use crate::error::{ScanError, ScanResult};

/// Generation-checked reference to a card record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardHandle {
    index: usize,
    generation: u64,
}

/// Network identity of an ethernet card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    /// Card address
    pub ip: Ipv4Addr,
    /// Subnet mask
    pub netmask: Ipv4Addr,
}

/// Per-card state shared by everything that works on one card.
#[derive(Debug, Clone)]
pub struct CardRecord {
    /// Card number used by the access library
    pub card_no: u32,
    /// Serial number read at acquisition
    pub serial: u32,
    /// Set for cards reached over ethernet
    pub network: Option<NetworkAddress>,
    /// List lifecycle of the card
    pub list: CommandList,
}

impl CardRecord {
    /// Record for a freshly acquired card.
    pub fn new(card_no: u32, serial: u32, list_capacity: u32) -> Self {
        Self {
            card_no,
            serial,
            network: None,
            list: CommandList::new(list_capacity),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    record: Option<CardRecord>,
}

/// Owner of all card records in the process.
#[derive(Debug, Default)]
pub struct CardRegistry {
    slots: Mutex<Vec<Slot>>,
}

impl CardRegistry {
    /// Create an empty registry behind an `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a record and hand out its handle.
    pub fn insert(&self, record: CardRecord) -> CardHandle {
        let mut slots = self.slots.lock();
        let index = match slots.iter().position(|slot| slot.record.is_none()) {
            Some(index) => index,
            None => {
                slots.push(Slot::default());
                slots.len() - 1
            }
        };
        let slot = &mut slots[index];
        debug!(card = record.card_no, index, generation = slot.generation, "card registered");
        slot.record = Some(record);
        CardHandle {
            index,
            generation: slot.generation,
        }
    }

    /// Run `f` against the record behind `handle`.
    pub fn with_card<R>(
        &self,
        handle: CardHandle,
        f: impl FnOnce(&mut CardRecord) -> ScanResult<R>,
    ) -> ScanResult<R> {
        let mut slots = self.slots.lock();
        match slots.get_mut(handle.index) {
            Some(slot) if slot.generation == handle.generation => match slot.record.as_mut() {
                Some(record) => f(record),
                None => Err(ScanError::CardNotInitialized),
            },
            _ => Err(ScanError::CardNotInitialized),
        }
    }

    /// Snapshot of the record behind `handle`.
    pub fn get(&self, handle: CardHandle) -> ScanResult<CardRecord> {
        self.with_card(handle, |record| Ok(record.clone()))
    }

    /// Card number behind `handle`.
    pub fn card_no(&self, handle: CardHandle) -> ScanResult<u32> {
        self.with_card(handle, |record| Ok(record.card_no))
    }

    /// Whether `handle` still refers to a live card.
    pub fn is_live(&self, handle: CardHandle) -> bool {
        self.card_no(handle).is_ok()
    }

    /// Remove the record; every outstanding handle becomes stale.
    pub fn release(&self, handle: CardHandle) -> ScanResult<CardRecord> {
        let mut slots = self.slots.lock();
        match slots.get_mut(handle.index) {
            Some(slot) if slot.generation == handle.generation && slot.record.is_some() => {
                slot.generation += 1;
                slot.record.take().ok_or(ScanError::CardNotInitialized)
            }
            _ => Err(ScanError::CardNotInitialized),
        }
    }

    /// Find the live handle for a card number.
    pub fn find_by_card_no(&self, card_no: u32) -> Option<CardHandle> {
        let slots = self.slots.lock();
        slots.iter().enumerate().find_map(|(index, slot)| {
            slot.record
                .as_ref()
                .filter(|record| record.card_no == card_no)
                .map(|_| CardHandle {
                    index,
                    generation: slot.generation,
                })
        })
    }

    /// Number of live cards.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.record.is_some())
            .count()
    }

    /// Whether no card is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_resolves_until_release() {
        let registry = CardRegistry::new();
        let handle = registry.insert(CardRecord::new(1, 100, 1024));
        assert_eq!(registry.card_no(handle).unwrap(), 1);
        let record = registry.release(handle).unwrap();
        assert_eq!(record.serial, 100);
        assert!(matches!(
            registry.card_no(handle),
            Err(ScanError::CardNotInitialized)
        ));
        assert!(registry.release(handle).is_err());
    }

    #[test]
    fn test_stale_handle_does_not_alias_reused_slot() {
        let registry = CardRegistry::new();
        let old = registry.insert(CardRecord::new(1, 100, 1024));
        registry.release(old).unwrap();
        let new = registry.insert(CardRecord::new(2, 200, 1024));
        assert_ne!(old, new);
        assert!(!registry.is_live(old));
        assert_eq!(registry.card_no(new).unwrap(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_state_is_shared() {
        let registry = CardRegistry::new();
        let handle = registry.insert(CardRecord::new(1, 100, 1024));
        registry.with_card(handle, |card| card.list.start(1, 0)).unwrap();
        let again = registry.with_card(handle, |card| card.list.start(1, 0));
        assert!(matches!(again, Err(ScanError::ListStateViolation { .. })));
        assert_eq!(registry.find_by_card_no(1), Some(handle));
    }
}
