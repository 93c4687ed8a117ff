//! Handling of messages/frames

mod object;

pub use object::{ObjectImage, ShadowObject};

use embedded_can::{ExtendedId, Id, StandardId};

/// Payload capacity of a classic CAN frame
pub const MAX_PAYLOAD: usize = 8;

/// Data does not fit in a classic CAN frame
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TooMuchData;

/// A classic CAN data frame.
///
/// Frames are plain values: the driver copies them in and out of message
/// objects and never hands out references into its own storage.
///
/// The payload always has eight bytes of backing storage, all of which are
/// written to the message object; only the first [`Frame::len`] go on the
/// wire. Protocols built on this driver commonly send full eight byte
/// frames and reuse bytes 4..=7 as a timestamp, see [`Frame::timestamp`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    id: Id,
    data: [u8; MAX_PAYLOAD],
    len: u8,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            id: Id::Standard(StandardId::ZERO),
            data: [0; MAX_PAYLOAD],
            len: 0,
        }
    }
}

impl Frame {
    /// Creates a data frame. Fails if `data` is longer than eight bytes.
    pub fn new(id: impl Into<Id>, data: &[u8]) -> Result<Self, TooMuchData> {
        if data.len() > MAX_PAYLOAD {
            return Err(TooMuchData);
        }
        let mut payload = [0; MAX_PAYLOAD];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self {
            id: id.into(),
            data: payload,
            len: data.len() as u8,
        })
    }

    /// Creates a frame from a raw identifier.
    ///
    /// `id` is truncated to 29 bits for extended frames and to 11 bits for
    /// standard frames. `len` is clamped to eight.
    pub fn from_raw(id: u32, extended: bool, data: [u8; MAX_PAYLOAD], len: u8) -> Self {
        Self {
            id: raw_to_id(id, extended),
            data,
            len: len.min(MAX_PAYLOAD as u8),
        }
    }

    /// CAN identifier
    pub fn id(&self) -> Id {
        self.id
    }

    /// Identifier as a plain number; 11 significant bits for standard
    /// frames, 29 for extended frames.
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => id.as_raw().into(),
            Id::Extended(id) => id.as_raw(),
        }
    }

    /// `true` if the frame uses a 29-bit identifier
    pub fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len.into()
    }

    /// `true` for a zero length payload
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Valid payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Complete eight byte backing storage, including bytes past
    /// [`Self::len`]
    pub fn payload(&self) -> &[u8; MAX_PAYLOAD] {
        &self.data
    }

    /// Auxiliary timestamp carried in payload bytes 4..=7 (little-endian)
    pub fn timestamp(&self) -> u32 {
        u32::from_le_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    /// Stores `timestamp` in payload bytes 4..=7 and extends the frame to
    /// eight bytes.
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.data[4..].copy_from_slice(&timestamp.to_le_bytes());
        self.len = MAX_PAYLOAD as u8;
        self
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Frame::new(id, data).ok()
    }

    /// Remote frames are not supported by this driver
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        Frame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len()
    }

    fn data(&self) -> &[u8] {
        Frame::data(self)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Frame {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Frame {{ id: {=u32:#x}, extended: {=bool}, data: {=[u8]} }}",
            self.raw_id(),
            self.is_extended(),
            self.data()
        )
    }
}

pub(crate) fn raw_to_id(id: u32, extended: bool) -> Id {
    if extended {
        // The mask ensures the ID is in range for a 29-bit integer
        Id::Extended(unsafe { ExtendedId::new_unchecked(id & ExtendedId::MAX.as_raw()) })
    } else {
        // The mask ensures the ID is in range for a 11-bit integer
        Id::Standard(unsafe { StandardId::new_unchecked(id as u16 & StandardId::MAX.as_raw()) })
    }
}

/// Packs a payload into the four 16-bit data registers of a message
/// interface. Byte `2n` is the low half of word `n`, byte `2n + 1` the high
/// half.
pub fn pack_payload(data: &[u8; MAX_PAYLOAD]) -> [u16; 4] {
    let mut words = [0; 4];
    for (word, bytes) in words.iter_mut().zip(data.chunks_exact(2)) {
        *word = u16::from_le_bytes([bytes[0], bytes[1]]);
    }
    words
}

/// Inverse of [`pack_payload`]
pub fn unpack_payload(words: &[u16; 4]) -> [u8; MAX_PAYLOAD] {
    let mut data = [0; MAX_PAYLOAD];
    for (bytes, word) in data.chunks_exact_mut(2).zip(words) {
        bytes.copy_from_slice(&word.to_le_bytes());
    }
    data
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    #[test]
    fn packing_is_little_endian_per_word() {
        let words = pack_payload(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(words, [0x0201, 0x0403, 0x0605, 0x0807]);
    }

    #[test]
    fn packing_round_trips_random_payloads() {
        let mut rng = StdRng::seed_from_u64(0x00C0_FFEE);
        for _ in 0..10_000 {
            let mut data = [0; MAX_PAYLOAD];
            rng.fill_bytes(&mut data);
            assert_eq!(unpack_payload(&pack_payload(&data)), data);
        }
    }

    #[test]
    fn raw_ids_are_truncated_to_width() {
        let standard = Frame::from_raw(0xFFFF, false, [0; 8], 8);
        assert_eq!(standard.raw_id(), 0x7FF);
        assert!(!standard.is_extended());
        let extended = Frame::from_raw(0xFFFF_FFFF, true, [0; 8], 8);
        assert_eq!(extended.raw_id(), 0x1FFF_FFFF);
        assert!(extended.is_extended());
    }

    #[test]
    fn length_is_clamped() {
        assert_eq!(Frame::from_raw(1, false, [0; 8], 15).len(), 8);
        assert!(Frame::new(StandardId::ZERO, &[0; 9]).is_err());
    }

    #[test]
    fn timestamp_lives_in_upper_half() {
        let frame = Frame::new(StandardId::MAX, &[0xAA, 0xBB]).unwrap();
        let frame = frame.with_timestamp(0x1234_5678);
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.data(), &[0xAA, 0xBB, 0, 0, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(frame.timestamp(), 0x1234_5678);
    }
}
