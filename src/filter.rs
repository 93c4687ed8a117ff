//! Message filters and receive object allocation
//!
//! Each acceptance filter occupies one message object in the receive
//! region. Objects are claimed in ascending order and are never released;
//! applications are expected to register all of their filters once, at
//! startup.
use crate::messageram::{Capacities, SlotId};
use embedded_can::{ExtendedId, StandardId};
use generic_array::{typenum::Unsigned, GenericArray};

/// Traditional filter/mask acceptance filter.
///
/// A frame is accepted when every identifier bit set in `mask` equals the
/// corresponding bit of `filter`, and its identifier type matches the
/// variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Filter for frames with an 11-bit identifier
    Standard {
        /// ID filter
        filter: StandardId,
        /// ID mask
        mask: StandardId,
    },
    /// Filter for frames with a 29-bit identifier
    Extended {
        /// ID filter
        filter: ExtendedId,
        /// ID mask
        mask: ExtendedId,
    },
}

impl Filter {
    /// Builds a filter from raw numbers, truncating `mask` and `filter` to
    /// the identifier width.
    pub fn from_raw(mask: u32, filter: u32, extended: bool) -> Self {
        if extended {
            let max = ExtendedId::MAX.as_raw();
            // The masks ensure the IDs are in range for a 29-bit integer
            unsafe {
                Self::Extended {
                    filter: ExtendedId::new_unchecked(filter & max),
                    mask: ExtendedId::new_unchecked(mask & max),
                }
            }
        } else {
            let max = u32::from(StandardId::MAX.as_raw());
            // The masks ensure the IDs are in range for a 11-bit integer
            unsafe {
                Self::Standard {
                    filter: StandardId::new_unchecked((filter & max) as u16),
                    mask: StandardId::new_unchecked((mask & max) as u16),
                }
            }
        }
    }

    /// `true` if a frame with the given identifier passes this filter
    pub fn accepts(&self, id: u32, extended: bool) -> bool {
        match *self {
            Filter::Standard { filter, mask } => {
                !extended && (id ^ u32::from(filter.as_raw())) & u32::from(mask.as_raw()) == 0
            }
            Filter::Extended { filter, mask } => {
                extended && (id ^ filter.as_raw()) & mask.as_raw() == 0
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Filter {
    fn format(&self, f: defmt::Formatter) {
        match *self {
            Filter::Standard { filter, mask } => defmt::write!(
                f,
                "Standard {{ filter: {=u16:#x}, mask: {=u16:#x} }}",
                filter.as_raw(),
                mask.as_raw()
            ),
            Filter::Extended { filter, mask } => defmt::write!(
                f,
                "Extended {{ filter: {=u32:#x}, mask: {=u32:#x} }}",
                filter.as_raw(),
                mask.as_raw()
            ),
        }
    }
}

/// Bookkeeping of the receive region: which objects already carry a
/// filter.
pub(crate) struct ReceiveObjects<C: Capacities> {
    in_use: GenericArray<bool, C::RxObjects>,
}

impl<C: Capacities> ReceiveObjects<C> {
    pub(crate) fn new() -> Self {
        Self {
            in_use: GenericArray::default(),
        }
    }

    /// Lowest receive object without a filter
    pub(crate) fn first_free(&self) -> Option<SlotId> {
        self.in_use
            .iter()
            .position(|used| !used)
            .map(|index| SlotId::new(index as u8))
    }

    /// Records that `slot` now carries a filter
    pub(crate) fn claim(&mut self, slot: SlotId) {
        if let Some(used) = self.in_use.get_mut(slot.index()) {
            *used = true;
        }
    }

    pub(crate) fn claimed(&self) -> usize {
        self.in_use.iter().filter(|used| **used).count()
    }

    pub(crate) fn capacity(&self) -> usize {
        C::RxObjects::USIZE
    }
}
