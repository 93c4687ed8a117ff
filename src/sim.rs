//! Simulated C_CAN controller for host tests
//!
//! Implements enough of the controller for the driver to run against it:
//! message RAM with IF1/IF2 command transfers, acceptance filtering,
//! transmission in message number order, `INT`/`INTPND` and the status
//! interrupt.
extern crate std;

use crate::message::{pack_payload, unpack_payload, Frame};
use crate::messageram::{SlotId, MESSAGE_OBJECTS};
use crate::reg::{Control, IfReg, Interface, Reg, RegisterFile, INT_STATUS};
use core::cell::RefCell;
use std::vec::Vec;

const REG_WORDS: usize = Reg::ClkDiv.offset() / 4 + 1;

const BUSY: u32 = 1 << 15;
const STAT_TXOK: u32 = 1 << 3;
const STAT_RXOK: u32 = 1 << 4;
const STAT_READ_ONLY: u32 = 0xE0;
/// Status bit: bus-off
pub(crate) const BOFF: u32 = 1 << 7;
/// Status bit: error warning
pub(crate) const EWARN: u32 = 1 << 6;

const CMD_DATA_B: u32 = 1 << 0;
const CMD_DATA_A: u32 = 1 << 1;
const CMD_TXRQST: u32 = 1 << 2;
const CMD_CLRINTPND: u32 = 1 << 3;
const CMD_CTRL: u32 = 1 << 4;
const CMD_ARB: u32 = 1 << 5;
const CMD_MASK: u32 = 1 << 6;
const CMD_WR: u32 = 1 << 7;

const MCTRL_TXRQST: u32 = 1 << 8;
const MCTRL_RXIE: u32 = 1 << 10;
const MCTRL_UMASK: u32 = 1 << 12;
const MCTRL_INTPND: u32 = 1 << 13;
const MCTRL_MSGLST: u32 = 1 << 14;
const MCTRL_NEWDAT: u32 = 1 << 15;

// Combined MSK2:MSK1 and ARB2:ARB1 layouts
const MXTD: u32 = 1 << 31;
const MSGVAL: u32 = 1 << 31;
const XTD: u32 = 1 << 30;
const DIR: u32 = 1 << 29;
const ID_MASK: u32 = 0x1FFF_FFFF;

#[derive(Copy, Clone, Default)]
struct SimObject {
    msk: u32,
    arb: u32,
    mctrl: u32,
    data: [u16; 4],
}

impl SimObject {
    fn valid(&self) -> bool {
        self.arb & MSGVAL != 0
    }

    fn frame(&self) -> Frame {
        let extended = self.arb & XTD != 0;
        let id = if extended {
            self.arb & ID_MASK
        } else {
            (self.arb & ID_MASK) >> 18
        };
        Frame::from_raw(id, extended, unpack_payload(&self.data), (self.mctrl & 0xF) as u8)
    }

    fn accepts(&self, id: u32, extended: bool) -> bool {
        if !self.valid() || self.arb & DIR != 0 {
            return false;
        }
        let (mask, check_type) = if self.mctrl & MCTRL_UMASK != 0 {
            (self.msk & ID_MASK, self.msk & MXTD != 0)
        } else {
            (ID_MASK, true)
        };
        let wire_id = if extended { id } else { id << 18 };
        let type_ok = !check_type || extended == (self.arb & XTD != 0);
        type_ok && (wire_id ^ self.arb) & mask == 0
    }
}

struct State {
    regs: [u32; REG_WORDS],
    objects: [SimObject; MESSAGE_OBJECTS],
    status_pending: bool,
    stalled: bool,
    sent: Vec<Frame>,
}

/// Simulated controller, shared by reference between the driver halves
pub(crate) struct SimController {
    state: RefCell<State>,
}

fn index(reg: Reg) -> usize {
    reg.offset() / 4
}

impl SimController {
    pub(crate) fn new() -> Self {
        let mut regs = [0; REG_WORDS];
        // Reset values: INIT set, LEC "unused"
        regs[index(Reg::Cntl)] = 0x1;
        regs[index(Reg::Stat)] = 0x7;
        Self {
            state: RefCell::new(State {
                regs,
                objects: [SimObject::default(); MESSAGE_OBJECTS],
                status_pending: false,
                stalled: false,
                sent: Vec::new(),
            }),
        }
    }

    /// Keeps the busy bit of both message interfaces set
    pub(crate) fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    /// Raw register value, without read side effects
    pub(crate) fn peek(&self, reg: Reg) -> u32 {
        self.state.borrow().regs[index(reg)]
    }

    pub(crate) fn control(&self) -> Control {
        Control::from(self.peek(Reg::Cntl))
    }

    /// Sets status bits and raises the status interrupt. Entering bus-off
    /// halts the controller.
    pub(crate) fn raise_status(&self, bits: u32) {
        let mut state = self.state.borrow_mut();
        state.regs[index(Reg::Stat)] |= bits;
        if bits & BOFF != 0 {
            state.regs[index(Reg::Cntl)] |= 0x1;
        }
        state.status_pending = true;
    }

    /// Clears status bits without raising an interrupt
    pub(crate) fn clear_status(&self, bits: u32) {
        self.state.borrow_mut().regs[index(Reg::Stat)] &= !bits;
    }

    /// Sets the last error code field of `STAT`
    pub(crate) fn set_last_error_code(&self, lec: u32) {
        let mut state = self.state.borrow_mut();
        let stat = &mut state.regs[index(Reg::Stat)];
        *stat = (*stat & !0x7) | (lec & 0x7);
    }

    fn halted(state: &State) -> bool {
        state.regs[index(Reg::Cntl)] & 0x1 != 0
    }

    /// A frame appears on the bus. Returns the receive object that took it.
    pub(crate) fn deliver(&self, frame: &Frame) -> Option<SlotId> {
        let mut state = self.state.borrow_mut();
        Self::deliver_locked(&mut state, frame)
    }

    fn deliver_locked(state: &mut State, frame: &Frame) -> Option<SlotId> {
        if Self::halted(state) {
            return None;
        }
        let (id, extended) = (frame.raw_id(), frame.is_extended());
        let number = state.objects.iter().position(|o| o.accepts(id, extended))?;
        let object = &mut state.objects[number];
        let wire_id = if extended { id } else { id << 18 };
        let xtd = if extended { XTD } else { 0 };
        object.arb = (object.arb & !(ID_MASK | XTD)) | wire_id | xtd;
        if object.mctrl & MCTRL_NEWDAT != 0 {
            object.mctrl |= MCTRL_MSGLST;
        }
        object.mctrl = (object.mctrl & !0xF) | frame.len() as u32 | MCTRL_NEWDAT;
        if object.mctrl & MCTRL_RXIE != 0 {
            object.mctrl |= MCTRL_INTPND;
        }
        object.data = pack_payload(frame.payload());
        state.regs[index(Reg::Stat)] = (state.regs[index(Reg::Stat)] & !0x7) | STAT_RXOK;
        SlotId::from_message_number(number as u8 + 1)
    }

    /// The controller sends its highest priority (lowest numbered) pending
    /// object.
    pub(crate) fn complete_one(&self) -> Option<Frame> {
        let mut state = self.state.borrow_mut();
        if Self::halted(&state) {
            return None;
        }
        let object = state
            .objects
            .iter_mut()
            .find(|o| o.valid() && o.mctrl & MCTRL_TXRQST != 0)?;
        object.mctrl &= !MCTRL_TXRQST;
        let frame = object.frame();
        state.regs[index(Reg::Stat)] = (state.regs[index(Reg::Stat)] & !0x7) | STAT_TXOK;
        state.sent.push(frame);
        let control = Control::from(state.regs[index(Reg::Cntl)]);
        if control.test() && state.regs[index(Reg::Test)] & (1 << 4) != 0 {
            Self::deliver_locked(&mut state, &frame);
        }
        Some(frame)
    }

    pub(crate) fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_one().is_some() {
            count += 1;
        }
        count
    }

    /// Every frame sent so far, in bus order
    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.state.borrow().sent.clone()
    }

    fn transfer(state: &mut State, interface: Interface, number: u32) {
        let Some(slot) = u8::try_from(number).ok().and_then(SlotId::from_message_number) else {
            return;
        };
        let reg = |r: IfReg| index(Reg::If(interface, r));
        let cmd = state.regs[reg(IfReg::CmdMsk)];
        let object = &mut state.objects[slot.index()];
        if cmd & CMD_WR != 0 {
            if cmd & CMD_MASK != 0 {
                object.msk =
                    (state.regs[reg(IfReg::Msk2)] << 16) | (state.regs[reg(IfReg::Msk1)] & 0xFFFF);
            }
            if cmd & CMD_ARB != 0 {
                object.arb =
                    (state.regs[reg(IfReg::Arb2)] << 16) | (state.regs[reg(IfReg::Arb1)] & 0xFFFF);
            }
            if cmd & CMD_CTRL != 0 {
                object.mctrl = state.regs[reg(IfReg::MCtrl)] & 0xFFFF;
            } else if cmd & CMD_TXRQST != 0 {
                object.mctrl |= MCTRL_TXRQST;
            }
            if cmd & CMD_DATA_A != 0 {
                object.data[0] = state.regs[reg(IfReg::Da1)] as u16;
                object.data[1] = state.regs[reg(IfReg::Da2)] as u16;
            }
            if cmd & CMD_DATA_B != 0 {
                object.data[2] = state.regs[reg(IfReg::Db1)] as u16;
                object.data[3] = state.regs[reg(IfReg::Db2)] as u16;
            }
        } else {
            let object = *object;
            if cmd & CMD_MASK != 0 {
                state.regs[reg(IfReg::Msk1)] = object.msk & 0xFFFF;
                state.regs[reg(IfReg::Msk2)] = object.msk >> 16;
            }
            if cmd & CMD_ARB != 0 {
                state.regs[reg(IfReg::Arb1)] = object.arb & 0xFFFF;
                state.regs[reg(IfReg::Arb2)] = object.arb >> 16;
            }
            if cmd & CMD_CTRL != 0 {
                state.regs[reg(IfReg::MCtrl)] = object.mctrl;
            }
            if cmd & CMD_DATA_A != 0 {
                state.regs[reg(IfReg::Da1)] = object.data[0].into();
                state.regs[reg(IfReg::Da2)] = object.data[1].into();
            }
            if cmd & CMD_DATA_B != 0 {
                state.regs[reg(IfReg::Db1)] = object.data[2].into();
                state.regs[reg(IfReg::Db2)] = object.data[3].into();
            }
            let object = &mut state.objects[slot.index()];
            if cmd & CMD_CLRINTPND != 0 {
                object.mctrl &= !MCTRL_INTPND;
            }
            if cmd & CMD_TXRQST != 0 {
                object.mctrl &= !MCTRL_NEWDAT;
            }
        }
    }

    fn bitmap(state: &State, high: bool, bit: impl Fn(&SimObject) -> bool) -> u32 {
        let objects = if high {
            &state.objects[16..]
        } else {
            &state.objects[..16]
        };
        objects
            .iter()
            .enumerate()
            .filter(|(_, o)| bit(o))
            .fold(0, |bits, (i, _)| bits | 1 << i)
    }
}

impl RegisterFile for SimController {
    fn read(&self, reg: Reg) -> u32 {
        let mut state = self.state.borrow_mut();
        match reg {
            Reg::Stat => {
                state.status_pending = false;
                state.regs[index(reg)]
            }
            Reg::Int => {
                if state.status_pending {
                    INT_STATUS
                } else {
                    state
                        .objects
                        .iter()
                        .position(|o| o.mctrl & MCTRL_INTPND != 0)
                        .map_or(0, |i| i as u32 + 1)
                }
            }
            Reg::TxReq1 | Reg::TxReq2 => Self::bitmap(&state, reg == Reg::TxReq2, |o| {
                o.mctrl & MCTRL_TXRQST != 0
            }),
            Reg::Nd1 | Reg::Nd2 => {
                Self::bitmap(&state, reg == Reg::Nd2, |o| o.mctrl & MCTRL_NEWDAT != 0)
            }
            Reg::Ir1 | Reg::Ir2 => {
                Self::bitmap(&state, reg == Reg::Ir2, |o| o.mctrl & MCTRL_INTPND != 0)
            }
            Reg::MsgV1 | Reg::MsgV2 => Self::bitmap(&state, reg == Reg::MsgV2, SimObject::valid),
            Reg::If(_, IfReg::CmdReq) if state.stalled => state.regs[index(reg)] | BUSY,
            _ => state.regs[index(reg)],
        }
    }

    fn write(&self, reg: Reg, value: u32) {
        let mut state = self.state.borrow_mut();
        match reg {
            Reg::Stat => {
                let stat = &mut state.regs[index(reg)];
                *stat = (*stat & STAT_READ_ONLY) | (value & !STAT_READ_ONLY & 0xFF);
            }
            Reg::If(interface, IfReg::CmdReq) => {
                state.regs[index(reg)] = value & 0x3F;
                if !state.stalled {
                    Self::transfer(&mut state, interface, value & 0x3F);
                }
            }
            Reg::Int | Reg::TxReq1 | Reg::TxReq2 | Reg::Nd1 | Reg::Nd2 | Reg::Ir1 | Reg::Ir2
            | Reg::MsgV1 | Reg::MsgV2 => {}
            _ => state.regs[index(reg)] = value,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::Filter;
    use crate::interface::MessageInterface;
    use crate::message::ObjectImage;

    #[test]
    fn filtered_reception() {
        let sim = SimController::new();
        sim.write(Reg::Cntl, 0);
        let if1 = MessageInterface::new(&sim, Interface::If1, 10);
        let slot = SlotId::from_message_number(3).unwrap();
        if1.write(slot, &ObjectImage::receive(&Filter::from_raw(0x7F0, 0x120, false)))
            .unwrap();

        let hit = Frame::from_raw(0x12A, false, [0; 8], 1);
        assert_eq!(sim.deliver(&hit), Some(slot));
        assert_eq!(sim.read(Reg::Int), 3);
        assert_eq!(sim.deliver(&Frame::from_raw(0x220, false, [0; 8], 1)), None);
        assert_eq!(sim.deliver(&Frame::from_raw(0x120, true, [0; 8], 1)), None);
    }

    #[test]
    fn reading_status_acknowledges_status_interrupt() {
        let sim = SimController::new();
        sim.raise_status(EWARN);
        assert_eq!(sim.read(Reg::Int), INT_STATUS);
        assert_eq!(sim.read(Reg::Stat) & EWARN, EWARN);
        assert_eq!(sim.read(Reg::Int), 0);
    }
}
