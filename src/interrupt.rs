//! Interrupt configuration and the interrupt-context half of the driver
//!
//! The controller has a single interrupt line. `CNTL` gates which events
//! raise it ([`InterruptSet`]); `INT` names the highest priority pending
//! source ([`InterruptSource`]). [`InterruptHandler::on_interrupt`] is meant
//! to be called from the CAN interrupt service routine and serves sources
//! until none is left.
pub mod fault;

pub use fault::{FaultCounters, FaultState, StatusHistory, STATUS_HISTORY_LEN};
pub(crate) use fault::FaultRecord;

use crate::interface::{HandshakeTimeout, MessageInterface};
use crate::messageram::{Capacities, SharedMemory, SlotId, MESSAGE_OBJECTS};
use crate::reg::{Control, Interface, Reg, RegisterFile, Status, INT_STATUS};
use bitfield::bitfield;
use core::marker::PhantomData;
use generic_array::typenum::Unsigned;

bitfield! {
    /// A set of controller interrupt enables, laid out as in `CNTL`.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// Module interrupt enable. Message object interrupts, and the line
    /// itself, depend on it.
    pub ie, set_ie: 1;
    /// Status change interrupt: a frame was sent or received, or a bus
    /// error was detected
    pub sie, set_sie: 2;
    /// Error interrupt: `BOFF` or `EWARN` changed
    pub eie, set_eie: 3;
}

impl InterruptSet {
    const MASK: u32 = 0b1110;

    /// Every interrupt source of the controller
    pub fn all() -> Self {
        Self(Self::MASK)
    }

    /// No interrupt source
    pub fn none() -> Self {
        Self(0)
    }

    /// An iterator visiting all elements in ascending bit order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }

    /// Enable bits of `control` as a set
    pub(crate) fn from_control(control: Control) -> Self {
        Self(u32::from(control) & Self::MASK)
    }

    /// `control` with its enable bits replaced by this set
    pub(crate) fn apply(&self, control: u32) -> u32 {
        (control & !Self::MASK) | (self.0 & Self::MASK)
    }
}

impl Default for InterruptSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u32;
        for int in iter.into_iter() {
            set |= u32::from(int);
        }
        InterruptSet(set)
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        if self.ie() {
            write!(f, "IE ")?;
        }
        if self.sie() {
            write!(f, "SIE ")?;
        }
        if self.eie() {
            write!(f, "EIE ")?;
        }
        write!(f, "}}")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for InterruptSet {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "InterruptSet {{ ie: {=bool}, sie: {=bool}, eie: {=bool} }}",
            self.ie(),
            self.sie(),
            self.eie()
        )
    }
}

/// A single interrupt enable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// IE
    Module = 1,
    /// SIE
    StatusChange = 2,
    /// EIE
    Error = 3,
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        1 << x as u32
    }
}

/// Bit position that does not hold an interrupt enable
#[derive(Debug)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, InvalidInterruptNumber> {
        use Interrupt::*;
        let ret = match value {
            1 => Module,
            2 => StatusChange,
            3 => Error,
            _ => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < 4 {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) != 0 {
                if let Ok(int) = Interrupt::try_from(i) {
                    return Some(int);
                }
            }
        }
        None
    }
}

/// Decoded content of the `INT` register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptSource {
    /// Nothing pending
    None,
    /// The status register changed; reading it acknowledges the interrupt
    Status,
    /// A message object has its interrupt pending flag set
    MessageObject(SlotId),
}

impl From<u32> for InterruptSource {
    fn from(int: u32) -> Self {
        match int & 0xFFFF {
            0 => Self::None,
            INT_STATUS => Self::Status,
            number => u8::try_from(number)
                .ok()
                .and_then(SlotId::from_message_number)
                .map_or(Self::None, Self::MessageObject),
        }
    }
}

/// Clears `CNTL.INIT`, letting a controller halted by bus-off rejoin the bus
/// after its recovery sequence.
pub(crate) fn release_halt<R: RegisterFile>(regs: &R) {
    critical_section::with(|_| {
        regs.modify(Reg::Cntl, |bits| {
            let mut control = Control::from(bits);
            control.set_init(false);
            control.into()
        })
    });
}

/// Reads `STAT` and hands it to the fault monitor. Reading `STAT` also
/// acknowledges a pending status interrupt, so every read goes through
/// here.
pub(crate) fn observe_status<R: RegisterFile>(regs: &R, memory: &SharedMemory) -> Status {
    let (status, halted) = critical_section::with(|cs| {
        let status = Status::from(regs.read(Reg::Stat));
        (status, memory.faults(cs).observe(status))
    });
    if halted {
        release_halt(regs);
    }
    status
}

/// The interrupt-context capability of a finalized controller.
///
/// Owns message interface IF2 and fills the shadow receive table in
/// [`SharedMemory`]. Created by [`crate::bus::CanConfigurable::finalize`].
pub struct InterruptHandler<'a, R, C> {
    regs: R,
    interface: MessageInterface<R>,
    memory: &'a SharedMemory,
    _capacities: PhantomData<C>,
}

impl<'a, R: RegisterFile + Clone, C: Capacities> InterruptHandler<'a, R, C> {
    pub(crate) fn new(regs: R, memory: &'a SharedMemory, spin_limit: u32) -> Self {
        Self {
            interface: MessageInterface::new(regs.clone(), Interface::If2, spin_limit),
            regs,
            memory,
            _capacities: PhantomData,
        }
    }

    /// Highest priority pending interrupt source
    pub fn source(&self) -> InterruptSource {
        InterruptSource::from(self.regs.read(Reg::Int))
    }

    /// Serves pending interrupt sources until `INT` reads zero.
    ///
    /// A message object is retried if a bus error was flagged when it was
    /// served; the loop gives up after as many rounds as there are sources
    /// so that a persistently failing controller cannot keep the CPU in
    /// the interrupt.
    pub fn on_interrupt(&mut self) -> Result<(), HandshakeTimeout> {
        for _ in 0..=MESSAGE_OBJECTS {
            match self.source() {
                InterruptSource::None => return Ok(()),
                InterruptSource::Status => {
                    observe_status(&self.regs, self.memory);
                }
                InterruptSource::MessageObject(slot) => self.on_message_object(slot)?,
            }
        }
        Ok(())
    }

    fn on_message_object(&mut self, slot: SlotId) -> Result<(), HandshakeTimeout> {
        let mut status = observe_status(&self.regs, self.memory);
        if status.last_error_code().is_error() {
            #[cfg(feature = "defmt")]
            defmt::trace!(
                "skipping message object {=u8}: {}",
                slot.message_number(),
                status.last_error_code()
            );
            self.regs.write(Reg::Stat, 0);
            return Ok(());
        }
        status.set_rxok(false);
        self.regs.write(Reg::Stat, status.into());

        let image = self.interface.read(slot)?;
        if slot.index() < C::RxObjects::USIZE {
            critical_section::with(|cs| self.memory.receive(cs).store(slot, image.shadow()));
        }
        Ok(())
    }
}
