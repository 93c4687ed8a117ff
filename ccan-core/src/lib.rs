#![no_std]
#![warn(missing_docs)]

//! `ccan-core` is the seam between the platform independent [`ccan`] driver
//! and the HAL of a chip that embeds a Bosch C_CAN controller (for example
//! the NXP LPC11Cxx family).
//!
//! The traits here describe *where* the controller lives and *which clocks*
//! feed it. Pin muxing, the peripheral reset line and the system clock tree
//! stay in the target HAL; `ccan` only relies on the guarantees spelled out
//! in the safety sections below.
//!
//! [`ccan`]: <https://docs.rs/crate/ccan/>

pub use fugit;

/// Identity of one C_CAN controller instance.
///
/// Usually a zero-sized marker type. It only records the location of the
/// register block; permission to touch it is expressed by holding a
/// [`Dependencies`] value for the same identity.
///
/// # Safety
/// `CanId::ADDRESS` is the base address of a C_CAN register block (the
/// `CNTL` register). All register offsets used by `ccan` are relative to it.
///
/// # Examples
/// ```no_run
/// use ccan_core::CanId;
///
/// pub enum Can0 {}
///
/// unsafe impl CanId for Can0 {
///     const ADDRESS: *const () = 0x4005_0000 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the controller register block
    const ADDRESS: *const ();
}

/// Everything that has to be in place before the controller may run.
///
/// A value of this type stands for an enabled and deasserted-from-reset
/// peripheral with its pins routed to the CAN transceiver. `ccan` keeps it
/// for as long as the driver exists and hands it back on release.
///
/// Only one value per [`CanId`] may exist at any time, so that the driver
/// is the sole owner of the register block.
///
/// # Safety
/// While a value implementing [`Dependencies`] exists
/// - the host clock and the clock reported by [`Dependencies::can_clock`]
///   must not change
/// - the CAN pins must stay routed to the controller
/// - nothing else may access the register block behind `Id`
pub unsafe trait Dependencies<Id: CanId> {
    /// Frequency of the clock feeding the peripheral bus interface.
    ///
    /// The controller divides this clock by its own `CLKDIV` setting to get
    /// the CAN protocol clock.
    fn host_clock(&self) -> fugit::HertzU32;

    /// Frequency the CAN protocol clock should run at.
    ///
    /// Must be the host clock divided by a whole number between 1 and 16.
    /// Bit timing is derived from this value.
    fn can_clock(&self) -> fugit::HertzU32;
}
