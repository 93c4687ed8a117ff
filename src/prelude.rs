//! Traits needed to call methods of the driver types
pub use crate::bus::CanBus as _;
pub use embedded_can::nb::Can as _;
pub use embedded_can::Frame as _;
