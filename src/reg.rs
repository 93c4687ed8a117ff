//! Register-level access to the C_CAN controller
//!
//! All knowledge about register offsets and bit positions lives in this
//! module. The rest of the crate reads and writes whole registers through a
//! [`RegisterFile`] and interprets them through the typed views defined
//! here.
//!
//! Every C_CAN register is 32 bits wide on the bus, of which at most the
//! lower 16 are implemented.

use bitfield::bitfield;
use ccan_core::CanId;
use core::marker::PhantomData;
use vcell::VolatileCell;

/// Message interface register set.
///
/// The controller exposes two identical interfaces through which message
/// objects are moved between the CPU and message RAM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interface {
    /// Used by the foreground path (filter and transmit programming)
    If1,
    /// Used by the interrupt path (receive copy-out)
    If2,
}

impl Interface {
    const fn base(self) -> usize {
        match self {
            Self::If1 => 0x020,
            Self::If2 => 0x080,
        }
    }
}

/// Registers within one message interface block
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IfReg {
    /// Command request
    CmdReq,
    /// Command mask
    CmdMsk,
    /// Mask bits 15:0
    Msk1,
    /// Mask bits 28:16 plus direction and extended mask
    Msk2,
    /// Identifier bits 15:0
    Arb1,
    /// Identifier bits 28:16 plus direction, extended and valid flags
    Arb2,
    /// Message control
    MCtrl,
    /// Data bytes 0 and 1
    Da1,
    /// Data bytes 2 and 3
    Da2,
    /// Data bytes 4 and 5
    Db1,
    /// Data bytes 6 and 7
    Db2,
}

impl IfReg {
    const fn offset(self) -> usize {
        match self {
            Self::CmdReq => 0x00,
            Self::CmdMsk => 0x04,
            Self::Msk1 => 0x08,
            Self::Msk2 => 0x0C,
            Self::Arb1 => 0x10,
            Self::Arb2 => 0x14,
            Self::MCtrl => 0x18,
            Self::Da1 => 0x1C,
            Self::Da2 => 0x20,
            Self::Db1 => 0x24,
            Self::Db2 => 0x28,
        }
    }

    /// Data registers in payload order
    pub const DATA: [IfReg; 4] = [Self::Da1, Self::Da2, Self::Db1, Self::Db2];
}

/// A single controller register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// Control
    Cntl,
    /// Status
    Stat,
    /// Error counter
    Ec,
    /// Bit timing
    Bt,
    /// Interrupt identifier
    Int,
    /// Test
    Test,
    /// Baud rate prescaler extension
    Brpe,
    /// Register within a message interface
    If(Interface, IfReg),
    /// Transmission request bits for objects 1..=16
    TxReq1,
    /// Transmission request bits for objects 17..=32
    TxReq2,
    /// New data bits for objects 1..=16
    Nd1,
    /// New data bits for objects 17..=32
    Nd2,
    /// Interrupt pending bits for objects 1..=16
    Ir1,
    /// Interrupt pending bits for objects 17..=32
    Ir2,
    /// Message valid bits for objects 1..=16
    MsgV1,
    /// Message valid bits for objects 17..=32
    MsgV2,
    /// Protocol clock divider
    ClkDiv,
}

impl Reg {
    /// Byte offset from the controller base address
    pub const fn offset(self) -> usize {
        match self {
            Self::Cntl => 0x000,
            Self::Stat => 0x004,
            Self::Ec => 0x008,
            Self::Bt => 0x00C,
            Self::Int => 0x010,
            Self::Test => 0x014,
            Self::Brpe => 0x018,
            Self::If(interface, reg) => interface.base() + reg.offset(),
            Self::TxReq1 => 0x100,
            Self::TxReq2 => 0x104,
            Self::Nd1 => 0x120,
            Self::Nd2 => 0x124,
            Self::Ir1 => 0x140,
            Self::Ir2 => 0x144,
            Self::MsgV1 => 0x160,
            Self::MsgV2 => 0x164,
            Self::ClkDiv => 0x180,
        }
    }
}

/// Word-wise access to a C_CAN register block.
///
/// Methods take `&self`: registers are interior-mutable by nature, and the
/// driver splits ownership of individual registers between the foreground
/// handle and the interrupt handler rather than through `&mut`.
pub trait RegisterFile {
    /// Reads the whole register
    fn read(&self, reg: Reg) -> u32;

    /// Overwrites the whole register
    fn write(&self, reg: Reg, value: u32);

    /// Read-modify-write. Not atomic with respect to interrupts.
    fn modify<F: FnOnce(u32) -> u32>(&self, reg: Reg, f: F) {
        self.write(reg, f(self.read(reg)));
    }
}

impl<T: RegisterFile + ?Sized> RegisterFile for &T {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }
}

/// Memory-mapped register block of the controller identified by `Id`
pub struct Mmio<Id>(PhantomData<Id>);

impl<Id: CanId> Mmio<Id> {
    /// # Safety
    /// The caller must own the register block referenced by `Id`, which is
    /// what holding a [`ccan_core::Dependencies`] value for `Id` guarantees.
    /// The returned value may be cloned into the driver's foreground handle
    /// and interrupt handler, but nothing else may touch the registers.
    pub unsafe fn new() -> Self {
        Self(PhantomData)
    }

    fn cell(&self, reg: Reg) -> &VolatileCell<u32> {
        // Safety: `Id::ADDRESS` points to a C_CAN register block and every offset
        // produced by `Reg::offset` lies within it.
        unsafe { &*((Id::ADDRESS as usize + reg.offset()) as *const VolatileCell<u32>) }
    }
}

impl<Id> Clone for Mmio<Id> {
    fn clone(&self) -> Self {
        Self(PhantomData)
    }
}

impl<Id> Copy for Mmio<Id> {}

impl<Id: CanId> RegisterFile for Mmio<Id> {
    fn read(&self, reg: Reg) -> u32 {
        self.cell(reg).get()
    }

    fn write(&self, reg: Reg, value: u32) {
        self.cell(reg).set(value)
    }
}

macro_rules! register_view {
    ($($view:ident),* $(,)?) => {
        $(
            impl From<u32> for $view {
                fn from(bits: u32) -> Self {
                    Self(bits)
                }
            }

            impl From<$view> for u32 {
                fn from(view: $view) -> u32 {
                    view.0
                }
            }
        )*
    };
}

register_view!(
    Control,
    Status,
    ErrorCounter,
    BitTimingReg,
    Brpe,
    TestReg,
    CommandRequest,
    CommandMask,
    Mask2,
    Arbitration2,
    MessageControl,
);

bitfield! {
    /// Control register (`CNTL`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Control(u32);
    impl Debug;
    /// Initialization. Bus activity stops while set; the controller sets it
    /// by itself on entering bus-off.
    pub init, set_init: 0;
    /// Module interrupt enable
    pub ie, set_ie: 1;
    /// Status change interrupt enable
    pub sie, set_sie: 2;
    /// Error interrupt enable
    pub eie, set_eie: 3;
    /// Disable automatic retransmission
    pub dar, set_dar: 5;
    /// Configuration change enable (bit timing writable while `init` is set)
    pub cce, set_cce: 6;
    /// Test mode enable
    pub test, set_test: 7;
}

bitfield! {
    /// Status register (`STAT`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Status(u32);
    impl Debug;
    /// Last error code
    pub u8, lec, set_lec: 2, 0;
    /// A message was transmitted successfully
    pub txok, set_txok: 3;
    /// A message was received successfully
    pub rxok, set_rxok: 4;
    /// An error counter reached the error-passive limit
    pub epass, _: 5;
    /// An error counter reached the warning limit of 96
    pub ewarn, _: 6;
    /// The controller is bus-off
    pub boff, _: 7;
}

impl Status {
    /// Decoded [`Self::lec`]
    pub fn last_error_code(&self) -> LastErrorCode {
        LastErrorCode::from(self.lec())
    }
}

/// Kind of the last protocol error seen on the bus
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LastErrorCode {
    /// No error
    NoError = 0,
    /// More than five equal bits in a sequence
    Stuff = 1,
    /// Fixed format part of a frame had the wrong format
    Form = 2,
    /// Transmitted message was not acknowledged
    Ack = 3,
    /// Recessive bit sent, dominant bit monitored
    Bit1 = 4,
    /// Dominant bit sent, recessive bit monitored
    Bit0 = 5,
    /// CRC mismatch on a received message
    Crc = 6,
    /// No bus event since the CPU last wrote this code
    Unused = 7,
}

impl LastErrorCode {
    /// `true` for codes that describe an actual protocol error
    pub fn is_error(self) -> bool {
        !matches!(self, Self::NoError | Self::Unused)
    }
}

impl From<u8> for LastErrorCode {
    fn from(value: u8) -> Self {
        match value & 0x7 {
            0 => Self::NoError,
            1 => Self::Stuff,
            2 => Self::Form,
            3 => Self::Ack,
            4 => Self::Bit1,
            5 => Self::Bit0,
            6 => Self::Crc,
            _ => Self::Unused,
        }
    }
}

bitfield! {
    /// Error counter register (`EC`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ErrorCounter(u32);
    impl Debug;
    /// Transmit error counter
    pub u8, tec, _: 7, 0;
    /// Receive error counter
    pub u8, rec, _: 14, 8;
    /// Receive error counter reached the error-passive level
    pub rp, _: 15;
}

bitfield! {
    /// Bit timing register (`BT`). All fields hold the value minus one.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct BitTimingReg(u32);
    impl Debug;
    /// Baud rate prescaler, low 6 bits
    pub u8, brp, set_brp: 5, 0;
    /// Synchronization jump width
    pub u8, sjw, set_sjw: 7, 6;
    /// Time segment before the sample point
    pub u8, tseg1, set_tseg1: 11, 8;
    /// Time segment after the sample point
    pub u8, tseg2, set_tseg2: 14, 12;
}

bitfield! {
    /// Baud rate prescaler extension register (`BRPE`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Brpe(u32);
    impl Debug;
    /// Baud rate prescaler, high 4 bits
    pub u8, brpe, set_brpe: 3, 0;
}

bitfield! {
    /// Test register (`TEST`), writable while [`Control::test`] is set
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct TestReg(u32);
    impl Debug;
    /// Basic mode
    pub basic, set_basic: 2;
    /// Silent mode
    pub silent, set_silent: 3;
    /// Loop back mode
    pub lback, set_lback: 4;
}

bitfield! {
    /// Message interface command request register (`IFx_CMDREQ`).
    ///
    /// Writing a message number starts a transfer between the interface
    /// registers and that message object.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct CommandRequest(u32);
    impl Debug;
    /// Message object number, 1..=32
    pub u8, message_number, set_message_number: 5, 0;
    /// A transfer is in progress
    pub busy, _: 15;
}

bitfield! {
    /// Message interface command mask register (`IFx_CMDMSK`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct CommandMask(u32);
    impl Debug;
    /// Transfer data bytes 4..=7
    pub data_b, set_data_b: 0;
    /// Transfer data bytes 0..=3
    pub data_a, set_data_a: 1;
    /// Write: request transmission. Read: clear the new data flag.
    pub txrqst, set_txrqst: 2;
    /// Read only: clear the interrupt pending flag
    pub clr_int_pnd, set_clr_int_pnd: 3;
    /// Transfer the message control bits
    pub ctrl, set_ctrl: 4;
    /// Transfer the arbitration bits
    pub arb, set_arb: 5;
    /// Transfer the mask bits
    pub mask, set_mask: 6;
    /// Direction: set writes interface to object, clear reads object into
    /// interface
    pub wr, set_wr: 7;
}

bitfield! {
    /// Message interface mask register 2 (`IFx_MSK2`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Mask2(u32);
    impl Debug;
    /// Identifier mask bits 28:16
    pub u16, msk, set_msk: 12, 0;
    /// The direction bit takes part in acceptance filtering
    pub mdir, set_mdir: 14;
    /// The extended identifier bit takes part in acceptance filtering
    pub mxtd, set_mxtd: 15;
}

bitfield! {
    /// Message interface arbitration register 2 (`IFx_ARB2`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Arbitration2(u32);
    impl Debug;
    /// Identifier bits 28:16. Standard identifiers occupy bits 12:2.
    pub u16, id, set_id: 12, 0;
    /// Transmit direction
    pub dir, set_dir: 13;
    /// 29-bit identifier
    pub xtd, set_xtd: 14;
    /// The message object takes part in bus traffic
    pub msg_val, set_msg_val: 15;
}

bitfield! {
    /// Message interface message control register (`IFx_MCTRL`)
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct MessageControl(u32);
    impl Debug;
    /// Data length code
    pub u8, dlc, set_dlc: 3, 0;
    /// End of buffer (single object, not part of a FIFO chain)
    pub eob, set_eob: 7;
    /// Transmission requested and not yet done
    pub tx_rqst, set_tx_rqst: 8;
    /// Remote frame answers enabled
    pub rmt_en, set_rmt_en: 9;
    /// Interrupt on successful reception
    pub rx_ie, set_rx_ie: 10;
    /// Interrupt on successful transmission
    pub tx_ie, set_tx_ie: 11;
    /// Use the mask registers for acceptance filtering
    pub umask, set_umask: 12;
    /// Interrupt pending
    pub int_pnd, set_int_pnd: 13;
    /// A message was overwritten before the CPU read it
    pub msg_lst, set_msg_lst: 14;
    /// New data not yet read by the CPU
    pub new_dat, set_new_dat: 15;
}

/// `INT` value identifying a pending status interrupt
pub const INT_STATUS: u32 = 0x8000;
