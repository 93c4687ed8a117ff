//! Software transmit queue
//!
//! Frames that find every transmit object busy wait here until
//! [`crate::bus::Can::poll`] moves them to hardware, oldest first.
use crate::message::Frame;
use crate::messageram::Capacities;
use generic_array::{typenum::Unsigned, GenericArray};

/// The queue is full. Holds the frame that was rejected.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull(pub Frame);

/// Why [`TxQueue::drain_one`] did not move a frame
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Drain<E> {
    /// Nothing queued
    Empty,
    /// The send attempt failed; the frame stays queued
    Failed(E),
}

/// Ring of frames with a power of two capacity.
///
/// Entries `head..head + count` (modulo capacity) are valid. A full queue
/// rejects new frames instead of overwriting old ones.
pub(crate) struct TxQueue<C: Capacities> {
    frames: GenericArray<Frame, C::TxQueue>,
    head: usize,
    count: usize,
}

impl<C: Capacities> TxQueue<C> {
    const MASK: usize = C::TxQueue::USIZE - 1;

    pub(crate) fn new() -> Self {
        Self {
            frames: GenericArray::default(),
            head: 0,
            count: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        C::TxQueue::USIZE
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Appends `frame` behind every frame already queued
    pub(crate) fn enqueue(&mut self, frame: Frame) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull(frame));
        }
        let tail = (self.head + self.count) & Self::MASK;
        self.frames[tail] = frame;
        self.count += 1;
        Ok(())
    }

    /// Oldest queued frame
    pub(crate) fn peek(&self) -> Option<&Frame> {
        if self.is_empty() {
            None
        } else {
            Some(&self.frames[self.head])
        }
    }

    /// Hands the oldest frame to `send` and removes it only if `send`
    /// succeeds.
    pub(crate) fn drain_one<T, E>(
        &mut self,
        send: impl FnOnce(&Frame) -> Result<T, E>,
    ) -> Result<T, Drain<E>> {
        let frame = self.peek().ok_or(Drain::Empty)?;
        let sent = send(frame).map_err(Drain::Failed)?;
        self.head = (self.head + 1) & Self::MASK;
        self.count -= 1;
        Ok(sent)
    }

    pub(crate) fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    #[cfg(test)]
    fn snapshot(&self) -> ([Frame; 8], usize, usize) {
        let mut frames = [Frame::default(); 8];
        for (copy, frame) in frames.iter_mut().zip(self.frames.iter()) {
            *copy = *frame;
        }
        (frames, self.head, self.count)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use generic_array::typenum::consts::*;

    struct Caps;
    impl Capacities for Caps {
        type RxObjects = U1;
        type TxQueue = U4;
    }

    fn frame(n: u8) -> Frame {
        Frame::from_raw(n.into(), false, [n; 8], 8)
    }

    #[test]
    fn fifo_order_across_wraparound() {
        let mut queue = TxQueue::<Caps>::new();
        let mut sent = [0u8; 18];
        let mut out = 0;
        for round in 0..6u8 {
            for n in 0..3 {
                queue.enqueue(frame(round * 3 + n)).unwrap();
            }
            while queue
                .drain_one(|f| {
                    sent[out] = f.raw_id() as u8;
                    Ok::<_, ()>(())
                })
                .is_ok()
            {
                out += 1;
            }
        }
        assert_eq!(out, 18);
        assert_eq!(sent, core::array::from_fn(|i| i as u8));
    }

    #[test]
    fn full_queue_rejects_and_stays_unchanged() {
        let mut queue = TxQueue::<Caps>::new();
        queue.enqueue(frame(9)).unwrap();
        queue.drain_one(|_| Ok::<_, ()>(())).unwrap();
        for n in 0..4 {
            queue.enqueue(frame(n)).unwrap();
        }
        assert!(queue.is_full());
        let before = queue.snapshot();
        for n in 10..20 {
            assert_eq!(queue.enqueue(frame(n)), Err(QueueFull(frame(n))));
            assert_eq!(queue.snapshot(), before);
        }
    }

    #[test]
    fn failed_drain_keeps_head() {
        let mut queue = TxQueue::<Caps>::new();
        queue.enqueue(frame(1)).unwrap();
        queue.enqueue(frame(2)).unwrap();
        let before = queue.snapshot();
        for _ in 0..5 {
            assert_eq!(queue.drain_one(|_| Err::<(), _>("busy")), Err(Drain::Failed("busy")));
            assert_eq!(queue.snapshot(), before);
        }
        assert_eq!(queue.peek(), Some(&frame(1)));
        assert_eq!(queue.drain_one(|f| Ok::<_, ()>(f.raw_id())), Ok(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn empty_queue_reports_empty() {
        let mut queue = TxQueue::<Caps>::new();
        let mut called = false;
        assert_eq!(
            queue.drain_one(|_| {
                called = true;
                Ok::<_, ()>(())
            }),
            Err(Drain::Empty)
        );
        assert!(!called);
    }
}
