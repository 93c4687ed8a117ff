//! Transmit region: allocation of message objects for outgoing frames
use crate::bus::AllocError;
use crate::interface::MessageInterface;
use crate::message::{Frame, ObjectImage};
use crate::messageram::{Capacities, SlotId, MESSAGE_OBJECTS};
use crate::reg::{Reg, RegisterFile};
use core::marker::PhantomData;
use generic_array::typenum::Unsigned;

/// Message objects `RxObjects..32`, each holding at most one frame until the
/// controller has sent it.
///
/// An object is pending while its transmission request bit is set; the
/// controller clears the bit when the frame has been sent, so there is no
/// completion event to handle. The controller sends the lowest numbered
/// pending object first, so new frames only go into objects above every
/// pending one.
pub(crate) struct TxObjects<R, C> {
    regs: R,
    _capacities: PhantomData<C>,
}

impl<R: RegisterFile, C: Capacities> TxObjects<R, C> {
    pub(crate) fn new(regs: R) -> Self {
        Self {
            regs,
            _capacities: PhantomData,
        }
    }

    /// Objects with a transmission request outstanding
    pub(crate) fn pending(&self) -> SlotSet {
        let low = self.regs.read(Reg::TxReq1) & 0xFFFF;
        let high = self.regs.read(Reg::TxReq2) & 0xFFFF;
        SlotSet(low | (high << 16))
    }

    /// The transmit region as a set
    pub(crate) fn region() -> SlotSet {
        (C::RxObjects::USIZE..MESSAGE_OBJECTS)
            .map(|index| SlotId::new(index as u8))
            .collect()
    }

    /// Lowest numbered object of the transmit region above every pending
    /// one
    pub(crate) fn first_free(&self) -> Option<SlotId> {
        let region = Self::region().0;
        let busy = region & self.pending().0;
        let above = match busy.checked_ilog2() {
            Some(highest) => u32::MAX.checked_shl(highest + 1).unwrap_or(0),
            None => u32::MAX,
        };
        SlotSet(region & above).iter().next()
    }

    /// Places `frame` in the first free transmit object and requests its
    /// transmission.
    pub(crate) fn try_send(
        &self,
        interface: &MessageInterface<R>,
        frame: &Frame,
    ) -> Result<SlotId, AllocError> {
        let slot = self.first_free().ok_or(AllocError::NoFreeSlot)?;
        interface.write(slot, &ObjectImage::transmit(frame))?;
        Ok(slot)
    }
}

/// A set of message objects, bit `n` standing for slot index `n`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SlotSet(pub(crate) u32);

impl FromIterator<SlotId> for SlotSet {
    fn from_iter<T: IntoIterator<Item = SlotId>>(iter: T) -> Self {
        let mut set = 0_u32;
        for slot in iter.into_iter() {
            set |= 1u32 << slot.index();
        }
        SlotSet(set)
    }
}

impl SlotSet {
    /// Number of members
    pub(crate) fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// An iterator visiting all elements in ascending order.
    pub(crate) fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

/// An iterator over the slots in a [`SlotSet`].
///
/// This `struct` is created by [`SlotSet::iter`].
pub(crate) struct Iter {
    flags: SlotSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = SlotId;

    fn next(&mut self) -> Option<Self::Item> {
        while usize::from(self.index) < MESSAGE_OBJECTS {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) != 0 {
                return Some(SlotId::new(i));
            }
        }
        None
    }
}
