//! Controller fault monitor
//!
//! Tracks the error state reported through `STAT` and counts entries into
//! the error-warning, error-passive and bus-off states.
use crate::reg::Status;
use core::fmt::{self, Debug};

/// Number of status values kept in [`StatusHistory`]
pub const STATUS_HISTORY_LEN: usize = 16;

/// Number of times the controller entered each fault condition since
/// [`crate::bus::CanConfigurable::finalize`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultCounters {
    /// Bus-off entries
    pub bus_off: u32,
    /// Error-warning entries
    pub error_warning: u32,
    /// Error-passive entries
    pub error_passive: u32,
}

/// Error state of the controller as last observed
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultState {
    /// Both error counters below the warning limit
    #[default]
    Normal,
    /// An error counter reached the warning limit. Advisory only.
    Warning,
    /// The controller left the bus. It rejoins by itself once the halt flag
    /// is cleared and 128 sequences of 11 recessive bits were seen.
    BusOff,
}

impl FaultState {
    fn of(status: Status) -> Self {
        if status.boff() {
            Self::BusOff
        } else if status.ewarn() {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

/// The most recent status register values, oldest first.
///
/// Only the low byte of `STAT` is kept; that holds every implemented bit.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct StatusHistory {
    entries: [u8; STATUS_HISTORY_LEN],
    next: usize,
    len: usize,
}

impl StatusHistory {
    const fn new() -> Self {
        Self {
            entries: [0; STATUS_HISTORY_LEN],
            next: 0,
            len: 0,
        }
    }

    fn push(&mut self, status: Status) {
        self.entries[self.next] = u32::from(status) as u8;
        self.next = (self.next + 1) % STATUS_HISTORY_LEN;
        self.len = (self.len + 1).min(STATUS_HISTORY_LEN);
    }

    /// Number of recorded values
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if no status was observed yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Most recent value
    pub fn latest(&self) -> Option<Status> {
        self.iter().last()
    }

    /// Recorded values, oldest first
    pub fn iter(&self) -> impl Iterator<Item = Status> + '_ {
        let start = (self.next + STATUS_HISTORY_LEN - self.len) % STATUS_HISTORY_LEN;
        (0..self.len).map(move |i| {
            Status::from(u32::from(self.entries[(start + i) % STATUS_HISTORY_LEN]))
        })
    }
}

impl Debug for StatusHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|status| u32::from(status) as u8))
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for StatusHistory {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "StatusHistory [");
        for status in self.iter() {
            defmt::write!(f, " {=u8:#04x}", u32::from(status) as u8);
        }
        defmt::write!(f, " ]");
    }
}

/// Fault monitor state kept in [`crate::messageram::SharedMemory`]
pub(crate) struct FaultRecord {
    counters: FaultCounters,
    last: u32,
    history: StatusHistory,
}

impl FaultRecord {
    pub(crate) const fn new() -> Self {
        Self {
            counters: FaultCounters {
                bus_off: 0,
                error_warning: 0,
                error_passive: 0,
            },
            last: 0,
            history: StatusHistory::new(),
        }
    }

    /// Feeds one `STAT` read into the monitor. Returns `true` if the
    /// controller is bus-off and its halt flag has to be cleared.
    ///
    /// Counters advance on the transition into a condition, so reading the
    /// same state repeatedly counts once.
    pub(crate) fn observe(&mut self, status: Status) -> bool {
        let last = Status::from(self.last);
        self.history.push(status);
        self.last = status.into();

        if status.boff() && !last.boff() {
            self.counters.bus_off = self.counters.bus_off.saturating_add(1);
            #[cfg(feature = "defmt")]
            defmt::warn!("C_CAN entered bus-off, STAT = {=u32:#x}", u32::from(status));
        }
        if status.ewarn() && !last.ewarn() {
            self.counters.error_warning = self.counters.error_warning.saturating_add(1);
            #[cfg(feature = "defmt")]
            defmt::warn!("C_CAN reached error-warning, STAT = {=u32:#x}", u32::from(status));
        }
        if status.epass() && !last.epass() {
            self.counters.error_passive = self.counters.error_passive.saturating_add(1);
            #[cfg(feature = "defmt")]
            defmt::warn!("C_CAN became error-passive, STAT = {=u32:#x}", u32::from(status));
        }
        status.boff()
    }

    pub(crate) fn counters(&self) -> FaultCounters {
        self.counters
    }

    pub(crate) fn state(&self) -> FaultState {
        FaultState::of(Status::from(self.last))
    }

    pub(crate) fn history(&self) -> StatusHistory {
        self.history
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EWARN: u32 = 0x40;
    const EPASS: u32 = 0x20;
    const BOFF: u32 = 0x80;

    fn status(bits: u32) -> Status {
        Status::from(bits)
    }

    #[test]
    fn state_machine() {
        let mut record = FaultRecord::new();
        assert_eq!(record.state(), FaultState::Normal);
        assert!(!record.observe(status(EWARN)));
        assert_eq!(record.state(), FaultState::Warning);
        assert!(record.observe(status(EWARN | EPASS | BOFF)));
        assert_eq!(record.state(), FaultState::BusOff);
        assert!(!record.observe(status(0)));
        assert_eq!(record.state(), FaultState::Normal);
        assert_eq!(
            record.counters(),
            FaultCounters {
                bus_off: 1,
                error_warning: 1,
                error_passive: 1
            }
        );
    }

    #[test]
    fn repeated_observation_counts_once() {
        let mut record = FaultRecord::new();
        for _ in 0..5 {
            assert!(record.observe(status(BOFF | EWARN)));
        }
        assert_eq!(record.counters().bus_off, 1);
        assert_eq!(record.counters().error_warning, 1);
        record.observe(status(0));
        record.observe(status(BOFF));
        assert_eq!(record.counters().bus_off, 2);
    }

    #[test]
    fn bus_off_with_warning_requests_recovery() {
        let mut record = FaultRecord::new();
        assert!(record.observe(status(BOFF | EWARN)));
    }

    #[test]
    fn history_keeps_latest_sixteen_oldest_first() {
        let mut record = FaultRecord::new();
        assert!(record.history().is_empty());
        for value in 0..20u32 {
            record.observe(status(value & 0x1F));
        }
        let history = record.history();
        assert_eq!(history.len(), STATUS_HISTORY_LEN);
        let values: [u32; STATUS_HISTORY_LEN] = {
            let mut values = [0; STATUS_HISTORY_LEN];
            for (value, status) in values.iter_mut().zip(history.iter()) {
                *value = status.into();
            }
            values
        };
        assert_eq!(values, core::array::from_fn(|i| (i as u32 + 4) & 0x1F));
        assert_eq!(history.latest().map(u32::from), Some(19));
    }
}
