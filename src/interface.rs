//! Message interface transfers between the CPU and message RAM
use crate::message::ObjectImage;
use crate::messageram::SlotId;
use crate::reg::{
    Arbitration2, CommandMask, CommandRequest, IfReg, Interface, Mask2, MessageControl, Reg,
    RegisterFile,
};

/// The controller did not finish a handshake within the configured number
/// of polls.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandshakeTimeout;

/// Polls `busy` until it returns `false`, at most `limit + 1` times.
pub(crate) fn await_ready(
    limit: u32,
    mut busy: impl FnMut() -> bool,
) -> Result<(), HandshakeTimeout> {
    for _ in 0..=limit {
        if !busy() {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    #[cfg(feature = "defmt")]
    defmt::warn!("C_CAN handshake did not complete after {=u32} polls", limit);
    Err(HandshakeTimeout)
}

/// One of the two message interfaces, owned by exactly one execution
/// context.
pub(crate) struct MessageInterface<R> {
    regs: R,
    interface: Interface,
    spin_limit: u32,
}

impl<R: RegisterFile> MessageInterface<R> {
    pub(crate) fn new(regs: R, interface: Interface, spin_limit: u32) -> Self {
        Self {
            regs,
            interface,
            spin_limit,
        }
    }

    fn reg(&self, reg: IfReg) -> Reg {
        Reg::If(self.interface, reg)
    }

    fn transfer(&self, slot: SlotId, command: CommandMask) -> Result<(), HandshakeTimeout> {
        // A previous transfer that timed out may still be in flight
        self.wait()?;
        self.regs.write(self.reg(IfReg::CmdMsk), command.into());
        let mut request = CommandRequest::from(0);
        request.set_message_number(slot.message_number());
        self.regs.write(self.reg(IfReg::CmdReq), request.into());
        self.wait()
    }

    fn wait(&self) -> Result<(), HandshakeTimeout> {
        await_ready(self.spin_limit, || {
            CommandRequest::from(self.regs.read(self.reg(IfReg::CmdReq))).busy()
        })
    }

    /// Writes `image` into message object `slot`
    pub(crate) fn write(&self, slot: SlotId, image: &ObjectImage) -> Result<(), HandshakeTimeout> {
        self.regs.write(self.reg(IfReg::Msk1), image.msk1.into());
        self.regs.write(self.reg(IfReg::Msk2), image.msk2.into());
        self.regs.write(self.reg(IfReg::Arb1), image.arb1.into());
        self.regs.write(self.reg(IfReg::Arb2), image.arb2.into());
        self.regs.write(self.reg(IfReg::MCtrl), image.mctrl.into());
        for (reg, word) in IfReg::DATA.into_iter().zip(image.data) {
            self.regs.write(self.reg(reg), word.into());
        }
        self.transfer(slot, ObjectImage::write_command())
    }

    /// Reads message object `slot`, acknowledging its pending interrupt and
    /// new data flags.
    pub(crate) fn read(&self, slot: SlotId) -> Result<ObjectImage, HandshakeTimeout> {
        self.transfer(slot, ObjectImage::read_command())?;
        let mut data = [0; 4];
        for (word, reg) in data.iter_mut().zip(IfReg::DATA) {
            *word = self.regs.read(self.reg(reg)) as u16;
        }
        Ok(ObjectImage {
            msk1: self.regs.read(self.reg(IfReg::Msk1)) as u16,
            msk2: Mask2::from(self.regs.read(self.reg(IfReg::Msk2))),
            arb1: self.regs.read(self.reg(IfReg::Arb1)) as u16,
            arb2: Arbitration2::from(self.regs.read(self.reg(IfReg::Arb2))),
            mctrl: MessageControl::from(self.regs.read(self.reg(IfReg::MCtrl))),
            data,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::Frame;
    use crate::sim::SimController;

    #[test]
    fn await_ready_counts_polls() {
        let mut polls = 0;
        assert_eq!(
            await_ready(3, || {
                polls += 1;
                true
            }),
            Err(HandshakeTimeout)
        );
        assert_eq!(polls, 4);

        let mut polls = 0;
        assert_eq!(
            await_ready(3, || {
                polls += 1;
                polls < 2
            }),
            Ok(())
        );
        assert_eq!(polls, 2);
    }

    #[test]
    fn write_then_read_through_different_interfaces() {
        let sim = SimController::new();
        let if1 = MessageInterface::new(&sim, Interface::If1, 10);
        let if2 = MessageInterface::new(&sim, Interface::If2, 10);
        let slot = SlotId::new(5);
        let frame = Frame::from_raw(0x0ABC_1234, true, [1, 2, 3, 4, 5, 6, 7, 8], 6);
        let image = ObjectImage::transmit(&frame);
        if1.write(slot, &image).unwrap();
        let read = if2.read(slot).unwrap();
        assert_eq!(read.arb1, image.arb1);
        assert_eq!(read.arb2, image.arb2);
        assert_eq!(read.data, image.data);
        assert_eq!(read.shadow().frame(), frame);
    }

    #[test]
    fn stalled_controller_times_out() {
        let sim = SimController::new();
        sim.set_stalled(true);
        let if1 = MessageInterface::new(&sim, Interface::If1, 50);
        let image = ObjectImage::invalid();
        assert_eq!(if1.write(SlotId::new(0), &image), Err(HandshakeTimeout));
    }
}
