//! Message object table and memory shared between the interrupt handler and
//! the foreground driver.
use crate::interrupt::FaultRecord;
use crate::message::{Frame, ShadowObject};
use core::cell::RefCell;
use critical_section::{CriticalSection, Mutex};
use generic_array::{
    typenum::{consts::*, IsLessOrEqual, LeEq, PowerOfTwo, Same},
    ArrayLength,
};

/// Number of message objects implemented by the controller
pub const MESSAGE_OBJECTS: usize = 32;

/// Index of a message object, `0..MESSAGE_OBJECTS`.
///
/// The controller itself numbers its objects from 1; see
/// [`SlotId::message_number`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotId(u8);

impl SlotId {
    pub(crate) const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Slot index starting at 0
    pub fn index(self) -> usize {
        self.0.into()
    }

    /// Hardware message number starting at 1
    pub fn message_number(self) -> u8 {
        self.0 + 1
    }

    /// Slot for the hardware message number `number`, if it names an
    /// implemented object.
    pub fn from_message_number(number: u8) -> Option<Self> {
        match number {
            1..=32 => Some(Self(number - 1)),
            _ => None,
        }
    }
}

/// Compile time sizing of the driver.
///
/// Message objects `0..RxObjects` form the receive region and carry one
/// acceptance filter each; the remaining objects form the transmit region.
///
/// ```
/// use ccan::generic_array::typenum::consts::*;
/// use ccan::messageram::Capacities;
///
/// pub struct Caps;
/// impl Capacities for Caps {
///     type RxObjects = U20;
///     type TxQueue = U16;
/// }
/// ```
pub trait Capacities {
    /// Size of the receive region. At most 31 so that at least one object
    /// remains for transmission.
    type RxObjects: LimitedArrayLength<bool, U31>;
    /// Depth of the software transmit queue
    type TxQueue: ArrayLength<Frame> + PowerOfTwo;
}

/// [`generic_array::ArrayLength`] with an upper bound.
pub trait LimitedArrayLength<T, MaxLength>: ArrayLength<T> {}
impl<T, N, MaxLength> LimitedArrayLength<T, MaxLength> for N
where
    N: ArrayLength<T> + IsLessOrEqual<MaxLength>,
    LeEq<N, MaxLength>: Same<True>,
{
}

/// Received objects waiting for the foreground consumer, one per message
/// object.
///
/// A second frame arriving in an object before the first is consumed
/// replaces it.
pub(crate) struct ShadowTable {
    objects: [ShadowObject; MESSAGE_OBJECTS],
    ready: u32,
}

impl ShadowTable {
    const fn new() -> Self {
        Self {
            objects: [ShadowObject::EMPTY; MESSAGE_OBJECTS],
            ready: 0,
        }
    }

    pub(crate) fn store(&mut self, slot: SlotId, object: ShadowObject) {
        self.objects[slot.index()] = object;
        self.ready |= 1 << slot.index();
    }

    /// Removes the lowest numbered ready object
    pub(crate) fn take_first(&mut self) -> Option<(SlotId, ShadowObject)> {
        if self.ready == 0 {
            return None;
        }
        let index = self.ready.trailing_zeros() as u8;
        self.ready &= !(1 << index);
        let slot = SlotId::new(index);
        Some((slot, self.objects[slot.index()]))
    }

    /// Bitmap of ready objects, bit `n` for slot index `n`
    pub(crate) fn ready(&self) -> u32 {
        self.ready
    }
}

/// State shared between [`crate::bus::Can`] and
/// [`crate::interrupt::InterruptHandler`].
///
/// Construct it in a `static` and hand a reference to
/// [`crate::bus::CanConfigurable::new`]. All access goes through critical
/// sections.
pub struct SharedMemory {
    receive: Mutex<RefCell<ShadowTable>>,
    faults: Mutex<RefCell<FaultRecord>>,
}

impl SharedMemory {
    /// Empty shared state
    pub const fn new() -> Self {
        Self {
            receive: Mutex::new(RefCell::new(ShadowTable::new())),
            faults: Mutex::new(RefCell::new(FaultRecord::new())),
        }
    }

    pub(crate) fn reset(&self) {
        critical_section::with(|cs| {
            *self.receive.borrow_ref_mut(cs) = ShadowTable::new();
            *self.faults.borrow_ref_mut(cs) = FaultRecord::new();
        });
    }

    pub(crate) fn receive<'cs>(
        &'cs self,
        cs: CriticalSection<'cs>,
    ) -> core::cell::RefMut<'cs, ShadowTable> {
        self.receive.borrow_ref_mut(cs)
    }

    pub(crate) fn faults<'cs>(
        &'cs self,
        cs: CriticalSection<'cs>,
    ) -> core::cell::RefMut<'cs, FaultRecord> {
        self.faults.borrow_ref_mut(cs)
    }
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new()
    }
}
