#![no_std]
#![warn(missing_docs)]
//! # C_CAN
//!
//! ## Overview
//! This crate provides a platform-agnostic driver for the Bosch C_CAN
//! controller, as found in the NXP LPC11Cxx family among others.
//!
//! It provides the following features:
//!
//! - classical CAN with standard and extended identifiers
//! - a fixed split of the 32 message objects into a receive region and a
//!   transmit region, sized at compile time via [`Capacities`]
//! - mask filters, each claiming one receive object
//! - interrupt driven reception into a shadow table in [`SharedMemory`],
//!   drained by the foreground without further hardware access
//! - transmission through the first free transmit object, backed by a
//!   bounded software queue
//! - bus-off recovery and fault accounting
//!
//! C_CAN is embedded in the MCU like all other peripherals. The interface
//! between them is a clock, a single interrupt line and a memory-mapped
//! register block. Message objects live in controller-internal RAM and are
//! only reachable through the two message interfaces `IF1` and `IF2`.
//!
//! For the C_CAN abstractions to be considered operational, this interface
//! has to be properly configured. The latter is assured through the safety
//! requirements of [`ccan_core`] traits which platform-specific HALs are
//! expected to implement.
//!
//! In order to use C_CAN, one has to instantiate [`CanConfigurable`] and
//! [`finalize`] it. Its constructor requires an instance of an
//! [`Dependencies`] implementing struct and holds onto it until it's
//! [`released`].
//!
//! ## Interrupt and foreground halves
//!
//! [`finalize`] returns two values. The [`Can`] handle stays with the
//! application and owns `IF1`: it programs filters, starts transmissions
//! and reads received frames. The [`InterruptHandler`] is moved into the CAN
//! interrupt service routine and owns `IF2`: it copies received frames out
//! of the message objects and watches the bus state. The halves share a
//! [`SharedMemory`], whose contents are only touched inside critical
//! sections.
//!
//! ## Usage example
//!
//! ```no_run
//! use ccan::bus::CanConfigurable;
//! use ccan::core::fugit::{HertzU32, RateExtU32 as _};
//! use ccan::generic_array::typenum::consts::*;
//! use ccan::message::Frame;
//! use ccan::messageram::SharedMemory;
//! use ccan::prelude::*;
//!
//! struct Capacities;
//! impl ccan::messageram::Capacities for Capacities {
//!     type RxObjects = U24;
//!     type TxQueue = U16;
//! }
//!
//! static MEMORY: SharedMemory = SharedMemory::new();
//!
//! enum Can0 {}
//! unsafe impl ccan::core::CanId for Can0 {
//!     const ADDRESS: *const () = 0x4005_0000 as *const _;
//! }
//!
//! struct Dependencies;
//! unsafe impl ccan::core::Dependencies<Can0> for Dependencies {
//!     fn host_clock(&self) -> HertzU32 {
//!         48.MHz()
//!     }
//!     fn can_clock(&self) -> HertzU32 {
//!         16.MHz()
//!     }
//! }
//!
//! let mut can =
//!     CanConfigurable::<Can0, _, Capacities>::new(125.kHz(), Dependencies, &MEMORY);
//! can.config().automatic_retransmission = true;
//! let (mut can, mut interrupt_handler) = can.finalize().unwrap();
//!
//! // Accept standard identifiers 0x100..=0x10F
//! can.register_filter(0x7F0, 0x100, false).unwrap();
//!
//! // Normally done in the CAN interrupt
//! interrupt_handler.on_interrupt().unwrap();
//!
//! while let Some(frame) = can.try_receive() {
//!     let reply = Frame::from_raw(frame.raw_id() + 0x80, false, *frame.payload(), 8);
//!     can.send(reply).unwrap();
//! }
//! can.poll().unwrap();
//! let _status = can.protocol_status();
//! ```
//!
//! [`CanConfigurable`]: crate::bus::CanConfigurable
//! [`finalize`]: crate::bus::CanConfigurable::finalize
//! [`released`]: crate::bus::Can::release
//! [`Can`]: crate::bus::Can
//! [`InterruptHandler`]: crate::interrupt::InterruptHandler
//! [`Dependencies`]: ccan_core::Dependencies
//! [`Capacities`]: crate::messageram::Capacities
//! [`SharedMemory`]: crate::messageram::SharedMemory

pub mod bus;
pub mod config;
pub mod filter;
pub mod interface;
pub mod interrupt;
pub mod message;
pub mod messageram;
pub mod prelude;
pub mod reg;
pub mod rx;
pub mod tx_buffers;
pub mod tx_queue;

#[cfg(test)]
mod sim;

pub use embedded_can;
pub use generic_array;
pub use ccan_core as core;
