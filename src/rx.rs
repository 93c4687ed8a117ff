//! Foreground side of the receive path
use crate::message::Frame;
use crate::messageram::{SharedMemory, SlotId};
use core::convert::Infallible;

/// Consumer of the shadow receive table filled by
/// [`crate::interrupt::InterruptHandler`].
///
/// Frames come out in message object order, not arrival order: a frame that
/// just arrived in a low numbered object is returned before an older one
/// waiting in a higher numbered object.
pub struct Rx<'a> {
    memory: &'a SharedMemory,
}

impl<'a> Rx<'a> {
    pub(crate) fn new(memory: &'a SharedMemory) -> Self {
        Self { memory }
    }

    /// Takes the frame waiting in the lowest numbered receive object, if
    /// any, together with that object's slot.
    pub fn poll_receive(&mut self) -> Option<(SlotId, Frame)> {
        critical_section::with(|cs| self.memory.receive(cs).take_first())
            .map(|(slot, object)| (slot, object.frame()))
    }

    /// Returns a received frame if available. Note that `Rx` also
    /// implements [`Iterator`] to receive frames until none is waiting.
    pub fn receive(&mut self) -> nb::Result<Frame, Infallible> {
        self.poll_receive()
            .map(|(_, frame)| frame)
            .ok_or(nb::Error::WouldBlock)
    }

    /// Number of receive objects holding an unread frame
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.memory.receive(cs).ready().count_ones() as usize)
    }

    /// Returns `true` if no frame is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for Rx<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        self.receive().ok()
    }
}
