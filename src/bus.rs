//! Controller setup and the foreground half of the driver

use crate::config::{bit_timing_registers, BitTimingError, CanConfig, BIT_TIMING_RANGES};
use crate::filter::{Filter, ReceiveObjects};
use crate::interface::{await_ready, HandshakeTimeout, MessageInterface};
use crate::interrupt::{
    observe_status, FaultCounters, FaultState, InterruptHandler, InterruptSet, StatusHistory,
};
use crate::message::{Frame, ObjectImage};
use crate::messageram::{Capacities, SharedMemory, SlotId, MESSAGE_OBJECTS};
use crate::reg::{Control, ErrorCounter, Interface, Mmio, Reg, RegisterFile, Status, TestReg};
use crate::rx::Rx;
use crate::tx_buffers::TxObjects;
use crate::tx_queue::{Drain, QueueFull, TxQueue};
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use fugit::HertzU32;

/// Printable STAT register
pub struct ProtocolStatus(pub Status);

impl From<Status> for ProtocolStatus {
    fn from(value: Status) -> Self {
        Self(value)
    }
}

impl Debug for ProtocolStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        let stat = &self.0;

        f.debug_struct("ProtocolStatus")
            .field("boff", &stat.boff())
            .field("ewarn", &stat.ewarn())
            .field("epass", &stat.epass())
            .field("rxok", &stat.rxok())
            .field("txok", &stat.txok())
            .field("lec", &stat.last_error_code())
            .finish()
    }
}

/// Printable EC register
pub struct ErrorCounters(pub ErrorCounter);

impl From<ErrorCounter> for ErrorCounters {
    fn from(value: ErrorCounter) -> Self {
        Self(value)
    }
}

impl Debug for ErrorCounters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        let ec = &self.0;

        f.debug_struct("ErrorCounters")
            .field("rec", &ec.rec())
            .field("rp", &ec.rp())
            .field("tec", &ec.tec())
            .finish()
    }
}

/// Errors that may occur during configuration
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigurationError {
    /// Problems with the bit timing configuration
    BitTiming(BitTimingError),
    /// The CAN clock is not the host clock divided by a whole number in
    /// the range [1, 16]
    ClockDivider {
        /// Clock feeding the peripheral
        host_clock: HertzU32,
        /// Requested CAN protocol clock
        can_clock: HertzU32,
    },
    /// The controller did not complete a handshake
    Stalled(HandshakeTimeout),
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::BitTiming(value)
    }
}

impl From<HandshakeTimeout> for ConfigurationError {
    fn from(value: HandshakeTimeout) -> Self {
        Self::Stalled(value)
    }
}

/// Every message object of the relevant region is in use
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoFreeSlot;

/// Failure to claim a message object
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AllocError {
    /// Every object of the region is in use. Expected under load; retry
    /// later.
    NoFreeSlot,
    /// The message interface handshake timed out
    Stalled,
}

impl From<NoFreeSlot> for AllocError {
    fn from(_: NoFreeSlot) -> Self {
        Self::NoFreeSlot
    }
}

impl From<HandshakeTimeout> for AllocError {
    fn from(_: HandshakeTimeout) -> Self {
        Self::Stalled
    }
}

/// Why [`Can::drain_one`] did not move a frame to hardware
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DrainError {
    /// The software queue is empty
    Empty,
    /// Every transmit object is pending; the frame stays queued
    NoFreeSlot,
    /// The message interface handshake timed out; the frame stays queued
    Stalled,
}

impl From<Drain<AllocError>> for DrainError {
    fn from(value: Drain<AllocError>) -> Self {
        match value {
            Drain::Empty => Self::Empty,
            Drain::Failed(AllocError::NoFreeSlot) => Self::NoFreeSlot,
            Drain::Failed(AllocError::Stalled) => Self::Stalled,
        }
    }
}

/// Failure of [`Can::send`]
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// Neither a transmit object nor room in the software queue was
    /// available. Holds the frame that was not sent.
    QueueFull(Frame),
    /// The message interface handshake timed out
    Stalled,
}

impl From<QueueFull> for SendError {
    fn from(QueueFull(frame): QueueFull) -> Self {
        Self::QueueFull(frame)
    }
}

/// Aggregate error type of the [`embedded_can::nb::Can`] implementation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// See [`NoFreeSlot`]
    NoFreeSlot,
    /// The software transmit queue is full
    QueueFull,
    /// See [`HandshakeTimeout`]
    Stalled,
}

impl embedded_can::Error for Error {
    fn kind(&self) -> embedded_can::ErrorKind {
        embedded_can::ErrorKind::Other
    }
}

impl From<AllocError> for Error {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::NoFreeSlot => Self::NoFreeSlot,
            AllocError::Stalled => Self::Stalled,
        }
    }
}

impl From<SendError> for Error {
    fn from(value: SendError) -> Self {
        match value {
            SendError::QueueFull(_) => Self::QueueFull,
            SendError::Stalled => Self::Stalled,
        }
    }
}

impl From<HandshakeTimeout> for Error {
    fn from(_: HandshakeTimeout) -> Self {
        Self::Stalled
    }
}

/// Common CANbus functionality
pub trait CanBus {
    /// Read error counters
    fn error_counters(&self) -> ErrorCounters;
    /// Read additional status information
    fn protocol_status(&self) -> ProtocolStatus;
}

/// The foreground capability of a running controller.
///
/// Owns message interface IF1, the receive region bookkeeping, the transmit
/// region and the software transmit queue. The interrupt context works
/// through the matching [`InterruptHandler`]; the two only meet in
/// [`SharedMemory`] and in `CNTL`, which is updated in critical sections.
pub struct Can<'a, Id, D, C: Capacities, R = Mmio<Id>> {
    /// Frames received by the interrupt handler
    pub rx: Rx<'a>,
    /// Implementation details. The field is public to allow destructuring.
    pub internals: Internals<'a, Id, D, C, R>,
}

/// Implementation details.
pub struct Internals<'a, Id, D, C: Capacities, R> {
    regs: R,
    interface: MessageInterface<R>,
    dependencies: D,
    config: CanConfig,
    memory: &'a SharedMemory,
    receive_objects: ReceiveObjects<C>,
    tx: TxObjects<R, C>,
    queue: TxQueue<C>,
    _id: PhantomData<Id>,
}

impl<Id: ccan_core::CanId, D: ccan_core::Dependencies<Id>, C: Capacities, R: RegisterFile>
    Internals<'_, Id, D, C, R>
{
    /// Switches between "Initialization" and "Normal Operation".
    /// In Initialization, messages are not received or transmitted and
    /// bit timing may be changed. In Normal Operation, messages can
    /// be transmitted and received.
    pub fn set_init(&mut self, init: bool) -> Result<(), HandshakeTimeout> {
        critical_section::with(|_| {
            self.regs.modify(Reg::Cntl, |bits| {
                let mut control = Control::from(bits);
                control.set_init(init);
                if !init {
                    control.set_cce(false);
                }
                control.into()
            })
        });
        await_ready(self.config.spin_limit, || {
            Control::from(self.regs.read(Reg::Cntl)).init() != init
        })
    }

    fn enable_cce(&mut self) {
        let mut control = Control::from(0);
        control.set_init(true);
        control.set_cce(true);
        self.regs.write(Reg::Cntl, control.into());
    }
}

/// A CAN bus in initialization mode. Before messages can be sent and
/// received, it needs to be [`Self::finalize`]d.
pub struct CanConfigurable<'a, Id, D, C: Capacities, R = Mmio<Id>>(
    /// The controller is halted (INIT=1, CCE=1) while this is wrapped.
    Can<'a, Id, D, C, R>,
);

impl<'a, Id: ccan_core::CanId, D: ccan_core::Dependencies<Id>, C: Capacities>
    CanConfigurable<'a, Id, D, C, Mmio<Id>>
{
    /// Create new can peripheral.
    ///
    /// The returned peripheral is not operational; use [`Self::finalize`] to
    /// finish configuration and start transmitting and receiving.
    pub fn new(bitrate: HertzU32, dependencies: D, memory: &'a SharedMemory) -> Self {
        // Safety: Since `dependencies` implies ownership of the register block pointed to by
        // `Id: CanId`, `registers` has unique access to it.
        let registers = unsafe { Mmio::<Id>::new() };
        Self::with_registers(bitrate, dependencies, registers, memory)
    }
}

impl<
        'a,
        Id: ccan_core::CanId,
        D: ccan_core::Dependencies<Id>,
        C: Capacities,
        R: RegisterFile + Clone,
    > CanConfigurable<'a, Id, D, C, R>
{
    /// Create a new can peripheral that accesses the controller through
    /// `registers`. The controller is halted immediately.
    pub fn with_registers(
        bitrate: HertzU32,
        dependencies: D,
        registers: R,
        memory: &'a SharedMemory,
    ) -> Self {
        let config = CanConfig::new(bitrate);
        let mut internals = Internals {
            interface: MessageInterface::new(registers.clone(), Interface::If1, config.spin_limit),
            tx: TxObjects::new(registers.clone()),
            regs: registers,
            dependencies,
            config,
            memory,
            receive_objects: ReceiveObjects::new(),
            queue: TxQueue::new(),
            _id: PhantomData,
        };
        internals.enable_cce();
        CanConfigurable(Can {
            rx: Rx::new(memory),
            internals,
        })
    }

    /// Allows changing the configuration before [`Self::finalize`]
    pub fn config(&mut self) -> &mut CanConfig {
        &mut self.0.internals.config
    }

    /// `CLKDIV` value for the clocks reported by the dependencies
    fn clock_divider(&self) -> Result<u32, ConfigurationError> {
        let dependencies = &self.0.internals.dependencies;
        let host_clock = dependencies.host_clock();
        let can_clock = dependencies.can_clock();
        let error = ConfigurationError::ClockDivider {
            host_clock,
            can_clock,
        };
        match host_clock.to_Hz().checked_rem(can_clock.to_Hz()) {
            Some(0) => {
                let divider = host_clock / can_clock;
                if (1..=16).contains(&divider) {
                    Ok(divider - 1)
                } else {
                    Err(error)
                }
            }
            _ => Err(error),
        }
    }

    /// Apply parameters from a bus config struct
    fn apply_bus_config(&mut self) -> Result<(), ConfigurationError> {
        let clock_divider = self.clock_divider()?;
        let internals = &self.0.internals;
        let config = &internals.config;
        let prescaler = config
            .timing
            .prescaler(internals.dependencies.can_clock(), &BIT_TIMING_RANGES)?;
        let (bt, brpe) = bit_timing_registers(&config.timing, prescaler);

        let regs = &internals.regs;
        regs.write(Reg::ClkDiv, clock_divider);
        regs.write(Reg::Bt, bt);
        regs.write(Reg::Brpe, brpe);

        // Configure test/loopback mode and retransmission
        regs.modify(Reg::Cntl, |bits| {
            let mut control = Control::from(bits);
            control.set_test(config.loopback);
            control.set_dar(!config.automatic_retransmission);
            control.into()
        });
        let mut test = TestReg::from(0);
        test.set_lback(config.loopback);
        regs.write(Reg::Test, test.into());
        Ok(())
    }

    /// Takes every message object out of bus traffic
    fn invalidate_objects(&mut self) -> Result<(), HandshakeTimeout> {
        let interface = &self.0.internals.interface;
        let invalid = ObjectImage::invalid();
        for index in 0..MESSAGE_OBJECTS {
            interface.write(SlotId::new(index as u8), &invalid)?;
        }
        Ok(())
    }

    /// Locks the configuration and enters normal operation.
    ///
    /// Returns the foreground handle and the interrupt handler. The latter
    /// is meant to be moved into the CAN interrupt service routine.
    #[allow(clippy::type_complexity)]
    pub fn finalize(
        mut self,
    ) -> Result<(Can<'a, Id, D, C, R>, InterruptHandler<'a, R, C>), ConfigurationError> {
        let spin_limit = self.0.internals.config.spin_limit;
        self.0.internals.interface =
            MessageInterface::new(self.0.internals.regs.clone(), Interface::If1, spin_limit);

        self.apply_bus_config()?;
        self.invalidate_objects()?;
        self.0.internals.memory.reset();

        let mut can = self.0;
        // Enter normal operation (CCE is cleared together with INIT)
        can.internals.set_init(false)?;
        let interrupts = can.internals.config.interrupts;
        critical_section::with(|_| {
            can.internals
                .regs
                .modify(Reg::Cntl, |bits| interrupts.apply(bits))
        });

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "C_CAN running at {=u32} bit/s, {} interrupts",
            can.internals.config.timing.bitrate.to_Hz(),
            interrupts
        );

        let handler =
            InterruptHandler::new(can.internals.regs.clone(), can.internals.memory, spin_limit);
        Ok((can, handler))
    }
}

impl<'a, Id: ccan_core::CanId, D: ccan_core::Dependencies<Id>, C: Capacities, R: RegisterFile>
    Can<'a, Id, D, C, R>
{
    /// Claims the lowest free receive object and programs it with a filter
    /// built from raw numbers, see [`Filter::from_raw`].
    ///
    /// Controller interrupts are masked in `CNTL` for the duration of the
    /// handshake and restored afterwards, also on failure.
    pub fn register_filter(
        &mut self,
        mask: u32,
        value: u32,
        extended: bool,
    ) -> Result<SlotId, AllocError> {
        let filter = Filter::from_raw(mask, value, extended);
        let regs = &self.internals.regs;
        let enabled = critical_section::with(|_| {
            let bits = regs.read(Reg::Cntl);
            regs.write(Reg::Cntl, InterruptSet::none().apply(bits));
            InterruptSet::from_control(Control::from(bits))
        });
        let result = self.reserve_receive_slot(filter);
        let regs = &self.internals.regs;
        critical_section::with(|_| regs.modify(Reg::Cntl, |bits| enabled.apply(bits)));
        result
    }

    /// Claims the lowest free receive object for `filter`.
    ///
    /// Receive objects are never released. Fails with
    /// [`AllocError::NoFreeSlot`] once all `C::RxObjects` are claimed; the
    /// filters registered before stay in place.
    pub fn reserve_receive_slot(&mut self, filter: Filter) -> Result<SlotId, AllocError> {
        let internals = &mut self.internals;
        let slot = internals
            .receive_objects
            .first_free()
            .ok_or(AllocError::NoFreeSlot)?;
        internals
            .interface
            .write(slot, &ObjectImage::receive(&filter))?;
        internals.receive_objects.claim(slot);
        #[cfg(feature = "defmt")]
        defmt::trace!("filter {} in message object {=u8}", filter, slot.message_number());
        Ok(slot)
    }

    /// Number of receive objects claimed by filters
    pub fn filters(&self) -> usize {
        self.internals.receive_objects.claimed()
    }

    /// Number of receive objects, `C::RxObjects`
    pub fn filter_capacity(&self) -> usize {
        self.internals.receive_objects.capacity()
    }

    /// Places `frame` in the first free transmit object, bypassing the
    /// software queue.
    ///
    /// [`AllocError::NoFreeSlot`] is the normal outcome under burst load.
    pub fn try_send(&mut self, frame: &Frame) -> Result<SlotId, AllocError> {
        let internals = &self.internals;
        internals.tx.try_send(&internals.interface, frame)
    }

    /// Sends `frame` right away if a transmit object is free, otherwise
    /// queues it for [`Self::poll`].
    ///
    /// While frames are queued, new frames go behind them so that the
    /// queue keeps its order. Before anything else the bus-off flag is
    /// checked and, if set, the controller halt is released; a controller
    /// that is unplugged and replugged quickly can end up halted without a
    /// bus-off interrupt.
    pub fn send(&mut self, frame: Frame) -> Result<(), SendError> {
        self.recover_if_halted();
        if self.internals.queue.is_empty() {
            match self.try_send(&frame) {
                Ok(_) => return Ok(()),
                Err(AllocError::NoFreeSlot) => {}
                Err(AllocError::Stalled) => return Err(SendError::Stalled),
            }
        }
        self.internals.queue.enqueue(frame)?;
        Ok(())
    }

    /// Moves the oldest queued frame to a transmit object. The frame
    /// leaves the queue only if that succeeds.
    pub fn drain_one(&mut self) -> Result<SlotId, DrainError> {
        let Internals {
            queue,
            tx,
            interface,
            ..
        } = &mut self.internals;
        Ok(queue.drain_one(|frame| tx.try_send(interface, frame))?)
    }

    /// Moves at most one queued frame to hardware. Meant to be called once
    /// per main loop iteration.
    ///
    /// An empty queue or a full transmit region is not an error, and
    /// leaves the driver untouched.
    pub fn poll(&mut self) -> Result<(), HandshakeTimeout> {
        match self.drain_one() {
            Ok(_) | Err(DrainError::Empty) | Err(DrainError::NoFreeSlot) => Ok(()),
            Err(DrainError::Stalled) => Err(HandshakeTimeout),
        }
    }

    /// Returns at most one received frame, see [`Rx`]
    pub fn try_receive(&mut self) -> Option<Frame> {
        self.rx.poll_receive().map(|(_, frame)| frame)
    }

    /// Number of frames in the software transmit queue
    pub fn queued(&self) -> usize {
        self.internals.queue.len()
    }

    /// Capacity of the software transmit queue
    pub fn queue_capacity(&self) -> usize {
        self.internals.queue.capacity()
    }

    /// Fault condition entries counted so far
    pub fn fault_counters(&self) -> FaultCounters {
        critical_section::with(|cs| self.internals.memory.faults(cs).counters())
    }

    /// Error state as last observed
    pub fn fault_state(&self) -> FaultState {
        critical_section::with(|cs| self.internals.memory.faults(cs).state())
    }

    /// The last status register values seen by the driver
    pub fn status_history(&self) -> StatusHistory {
        critical_section::with(|cs| self.internals.memory.faults(cs).history())
    }

    /// Clears `INIT` if `STAT` reports bus-off
    fn recover_if_halted(&self) {
        observe_status(&self.internals.regs, self.internals.memory);
    }

    /// Halts the controller, masks its interrupts and returns the
    /// dependencies.
    ///
    /// Queued frames are discarded; frames already in transmit objects
    /// stay there until the controller is reconfigured.
    pub fn release(mut self) -> D {
        let regs = &self.internals.regs;
        critical_section::with(|_| {
            regs.modify(Reg::Cntl, |bits| {
                let mut control = Control::from(InterruptSet::none().apply(bits));
                control.set_init(true);
                control.into()
            })
        });
        self.internals.queue.clear();
        self.internals.dependencies
    }
}

impl<Id: ccan_core::CanId, D: ccan_core::Dependencies<Id>, C: Capacities, R: RegisterFile> CanBus
    for Can<'_, Id, D, C, R>
{
    fn error_counters(&self) -> ErrorCounters {
        ErrorCounter::from(self.internals.regs.read(Reg::Ec)).into()
    }

    /// Reading `STAT` acknowledges a pending status interrupt, so the value
    /// is also handed to the fault monitor.
    fn protocol_status(&self) -> ProtocolStatus {
        observe_status(&self.internals.regs, self.internals.memory).into()
    }
}

impl<Id: ccan_core::CanId, D: ccan_core::Dependencies<Id>, C: Capacities, R: RegisterFile>
    embedded_can::nb::Can for Can<'_, Id, D, C, R>
{
    type Frame = Frame;
    type Error = Error;

    /// Places the frame in a free transmit object, bypassing the software
    /// queue. Blocks while the transmit region is full.
    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        self.recover_if_halted();
        match self.try_send(frame) {
            Ok(_) => Ok(None),
            Err(AllocError::NoFreeSlot) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e.into())),
        }
    }

    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        self.try_receive().ok_or(nb::Error::WouldBlock)
    }
}
