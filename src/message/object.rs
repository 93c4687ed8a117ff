//! Message object contents in the form they cross a message interface

use super::{pack_payload, unpack_payload, Frame};
use crate::filter::Filter;
use crate::reg::{Arbitration2, CommandMask, Mask2, MessageControl};
use embedded_can::{Id, StandardId};

/// Register image of one message object, as held by the `IFx_MSK1` through
/// `IFx_DB2` registers of a message interface.
///
/// This is the only place that knows how filters and outgoing frames map
/// onto mask, arbitration and control bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ObjectImage {
    /// Identifier mask bits 15:0
    pub msk1: u16,
    /// Identifier mask bits 28:16 and flag masks
    pub msk2: Mask2,
    /// Identifier bits 15:0
    pub arb1: u16,
    /// Identifier bits 28:16 and object flags
    pub arb2: Arbitration2,
    /// Message control
    pub mctrl: MessageControl,
    /// Payload as four little-endian 16-bit words
    pub data: [u16; 4],
}

impl ObjectImage {
    /// An object that does not take part in bus traffic
    pub fn invalid() -> Self {
        Self {
            msk1: 0,
            msk2: Mask2::from(0),
            arb1: 0,
            arb2: Arbitration2::from(0),
            mctrl: MessageControl::from(0),
            data: [0; 4],
        }
    }

    /// A receive object that accepts frames matching `filter`.
    ///
    /// The identifier type always takes part in filtering: a standard filter
    /// never accepts an extended frame and vice versa.
    pub fn receive(filter: &Filter) -> Self {
        let mut image = Self::invalid();
        image.msk2.set_mxtd(true);
        image.arb2.set_msg_val(true);
        match *filter {
            Filter::Standard { filter, mask } => {
                image.msk2.set_msk(mask.as_raw() << 2);
                image.arb2.set_id(filter.as_raw() << 2);
            }
            Filter::Extended { filter, mask } => {
                let (filter, mask) = (filter.as_raw(), mask.as_raw());
                image.msk1 = mask as u16;
                image.msk2.set_msk((mask >> 16) as u16);
                image.arb1 = filter as u16;
                image.arb2.set_id((filter >> 16) as u16);
                image.arb2.set_xtd(true);
            }
        }
        image.mctrl.set_umask(true);
        image.mctrl.set_rx_ie(true);
        image.mctrl.set_eob(true);
        image.mctrl.set_dlc(8);
        image
    }

    /// A transmit object holding `frame` with its transmission requested
    pub fn transmit(frame: &Frame) -> Self {
        let mut image = Self::invalid();
        image.msk2.set_mdir(true);
        image.arb2.set_msg_val(true);
        image.arb2.set_dir(true);
        match frame.id() {
            Id::Standard(id) => {
                image.msk2.set_msk(StandardId::MAX.as_raw() << 2);
                image.arb2.set_id(id.as_raw() << 2);
            }
            Id::Extended(id) => {
                let id = id.as_raw();
                image.msk1 = 0xFFFF;
                image.msk2.set_msk(0x1FFF);
                image.msk2.set_mxtd(true);
                image.arb1 = id as u16;
                image.arb2.set_id((id >> 16) as u16);
                image.arb2.set_xtd(true);
            }
        }
        image.mctrl.set_umask(true);
        image.mctrl.set_tx_rqst(true);
        image.mctrl.set_eob(true);
        image.mctrl.set_dlc(frame.len() as u8);
        image.data = pack_payload(frame.payload());
        image
    }

    /// Command mask that writes every part of the image to message RAM
    pub fn write_command() -> CommandMask {
        let mut cmd = Self::read_command();
        cmd.set_wr(true);
        cmd.set_clr_int_pnd(false);
        cmd.set_txrqst(false);
        cmd
    }

    /// Command mask that reads every part of an object and acknowledges it
    /// (clears its interrupt pending and new data flags).
    pub fn read_command() -> CommandMask {
        let mut cmd = CommandMask::from(0);
        cmd.set_mask(true);
        cmd.set_arb(true);
        cmd.set_ctrl(true);
        cmd.set_clr_int_pnd(true);
        cmd.set_txrqst(true);
        cmd.set_data_a(true);
        cmd.set_data_b(true);
        cmd
    }

    /// Extracts the received frame fields
    pub fn shadow(&self) -> ShadowObject {
        let extended = self.arb2.xtd();
        let high = u32::from(self.arb2.id());
        let id = if extended {
            (high << 16) | u32::from(self.arb1)
        } else {
            high >> 2
        };
        ShadowObject {
            id,
            extended,
            dlc: self.mctrl.dlc(),
            words: self.data,
        }
    }
}

/// Copy of a received message object kept for the foreground consumer.
///
/// The payload stays in register word form until it is consumed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShadowObject {
    /// Identifier, right aligned
    pub id: u32,
    /// 29-bit identifier
    pub extended: bool,
    /// Data length code as received
    pub dlc: u8,
    /// Payload as four little-endian 16-bit words
    pub words: [u16; 4],
}

impl ShadowObject {
    pub(crate) const EMPTY: Self = Self {
        id: 0,
        extended: false,
        dlc: 0,
        words: [0; 4],
    };

    /// Decodes into a frame
    pub fn frame(&self) -> Frame {
        Frame::from_raw(self.id, self.extended, unpack_payload(&self.words), self.dlc)
    }
}
