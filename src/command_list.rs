//! Command list lifecycle.
//!
//! A card buffers list commands between `SetStartList` and `SetEndOfList` and
//! runs them atomically after `ExecuteList`. [`CommandList`] tracks where one
//! card is in that cycle:
//!
//! ```text
//! Idle -> Started -> Building -> Ended -> Executing -> Idle
//! ```
//!
//! Every transition is checked, so a second `SetStartList` while a list is
//! being built is rejected instead of silently interleaving two sequences.
//! The state lives in the card's arena record, which makes the check shared
//! between a context and any recording session on the same card.

use std::fmt;

use crate::error::{ScanError, ScanResult};

/// Lists are addressed 1 or 2.
pub const LIST_INDICES: [u32; 2] = [1, 2];

/// Position of a card's command list in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    /// No list open.
    Idle,
    /// Start of list issued, nothing written yet.
    Started,
    /// At least one command written.
    Building,
    /// End of list written; ready to execute.
    Ended,
    /// Running on the card.
    Executing,
}

impl fmt::Display for ListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListState::Idle => "idle",
            ListState::Started => "started",
            ListState::Building => "building",
            ListState::Ended => "ended",
            ListState::Executing => "executing",
        };
        f.write_str(name)
    }
}

/// List state machine of one card.
#[derive(Debug, Clone)]
pub struct CommandList {
    state: ListState,
    list_index: u32,
    start_position: u32,
    appended: u32,
    capacity: u32,
}

impl CommandList {
    /// Track a list whose buffer holds `capacity` commands.
    pub fn new(capacity: u32) -> Self {
        Self {
            state: ListState::Idle,
            list_index: 1,
            start_position: 0,
            appended: 0,
            capacity,
        }
    }

    /// Current state.
    pub fn state(&self) -> ListState {
        self.state
    }

    /// List index of the current or last list.
    pub fn list_index(&self) -> u32 {
        self.list_index
    }

    /// Commands appended since the last start.
    pub fn appended(&self) -> u32 {
        self.appended
    }

    /// List buffer size.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Resize the list buffer; only allowed while idle.
    pub fn set_capacity(&mut self, capacity: u32) -> ScanResult<()> {
        self.expect(&[ListState::Idle], "idle")?;
        self.capacity = capacity;
        Ok(())
    }

    /// Idle -> Started.
    pub fn start(&mut self, list_index: u32, position: u32) -> ScanResult<()> {
        if !LIST_INDICES.contains(&list_index) {
            return Err(ScanError::InvalidListIndex(list_index));
        }
        self.expect(&[ListState::Idle], "idle")?;
        if position >= self.capacity {
            return Err(ScanError::ListCapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.state = ListState::Started;
        self.list_index = list_index;
        self.start_position = position;
        self.appended = 0;
        Ok(())
    }

    /// Reserve room for `count` list commands; Started/Building -> Building.
    pub fn append(&mut self, count: u32) -> ScanResult<()> {
        self.expect(&[ListState::Started, ListState::Building], "started or building")?;
        self.check_room(u64::from(count))?;
        self.appended += count;
        self.state = ListState::Building;
        Ok(())
    }

    /// Reserve room for commands written outside or inside a list.
    ///
    /// While idle, commands go straight to the card's input position and need
    /// no reservation. Ended or executing lists accept nothing.
    pub fn reserve(&mut self, count: u32) -> ScanResult<()> {
        match self.state {
            ListState::Idle => Ok(()),
            ListState::Started | ListState::Building => self.append(count),
            actual => Err(ScanError::ListStateViolation {
                expected: "idle, started or building",
                actual,
            }),
        }
    }

    /// Check that `count` more commands would fit without reserving them.
    ///
    /// One slot stays reserved for the end-of-list marker.
    pub fn check_room(&self, count: u64) -> ScanResult<()> {
        let used = self.start_position as u64 + self.appended as u64 + count;
        if used >= self.capacity as u64 {
            return Err(ScanError::ListCapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Started/Building -> Ended.
    pub fn end(&mut self) -> ScanResult<()> {
        self.expect(&[ListState::Started, ListState::Building], "started or building")?;
        self.state = ListState::Ended;
        Ok(())
    }

    /// Ended -> Executing.
    pub fn execute(&mut self, list_index: u32) -> ScanResult<()> {
        if list_index != self.list_index {
            return Err(ScanError::InvalidListIndex(list_index));
        }
        self.expect(&[ListState::Ended], "ended")?;
        self.state = ListState::Executing;
        Ok(())
    }

    /// Executing -> Idle, once the card reports the list done.
    pub fn complete(&mut self) -> ScanResult<()> {
        self.expect(&[ListState::Executing], "executing")?;
        self.state = ListState::Idle;
        Ok(())
    }

    /// Drop whatever was in progress and return to Idle.
    pub fn reset(&mut self) {
        self.state = ListState::Idle;
        self.appended = 0;
    }

    fn expect(&self, allowed: &[ListState], expected: &'static str) -> ScanResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScanError::ListStateViolation {
                expected,
                actual: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut list = CommandList::new(100);
        list.start(1, 0).unwrap();
        assert_eq!(list.state(), ListState::Started);
        list.append(3).unwrap();
        assert_eq!(list.state(), ListState::Building);
        list.end().unwrap();
        list.execute(1).unwrap();
        assert_eq!(list.state(), ListState::Executing);
        list.complete().unwrap();
        assert_eq!(list.state(), ListState::Idle);
    }

    #[test]
    fn test_start_reentry_rejected() {
        let mut list = CommandList::new(100);
        list.start(1, 0).unwrap();
        let err = list.start(1, 0).unwrap_err();
        assert!(matches!(
            err,
            ScanError::ListStateViolation {
                actual: ListState::Started,
                ..
            }
        ));
    }

    #[test]
    fn test_append_requires_open_list() {
        let mut list = CommandList::new(100);
        assert!(list.append(1).is_err());
        list.start(2, 0).unwrap();
        list.end().unwrap();
        assert!(list.append(1).is_err());
        assert!(matches!(list.execute(1), Err(ScanError::InvalidListIndex(1))));
    }

    #[test]
    fn test_capacity_keeps_room_for_end_marker() {
        let mut list = CommandList::new(10);
        list.start(1, 5).unwrap();
        list.append(4).unwrap();
        assert!(matches!(
            list.append(1),
            Err(ScanError::ListCapacityExceeded { capacity: 10 })
        ));
    }

    #[test]
    fn test_invalid_list_index() {
        let mut list = CommandList::new(10);
        assert!(matches!(list.start(3, 0), Err(ScanError::InvalidListIndex(3))));
        assert_eq!(list.state(), ListState::Idle);
    }
}
