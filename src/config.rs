//! CAN bus configuration

use crate::interrupt::InterruptSet;
use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Handshake polls allowed before a message interface transfer, or the
/// release of `INIT`, is considered stalled
pub const DEFAULT_SPIN_LIMIT: u32 = 100_000;

/// Configuration for the CAN bus
#[derive(Copy, Clone, Debug)]
pub struct CanConfig {
    /// Internal loop back: transmitted frames are received by this node and
    /// not driven onto the bus
    pub loopback: bool,
    /// Retransmit frames that lost arbitration or were disturbed by errors
    pub automatic_retransmission: bool,
    /// Bit timing parameters
    pub timing: BitTiming,
    /// Interrupt sources enabled in `CNTL` once the bus is running
    pub interrupts: InterruptSet,
    /// Ceiling on the number of polls of a hardware handshake bit
    pub spin_limit: u32,
}

impl CanConfig {
    /// Create an instance
    ///
    /// Nominal bitrate value must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            loopback: false,
            automatic_retransmission: true,
            timing: BitTiming::new(bitrate),
            interrupts: InterruptSet::all(),
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }
}

/// Bit-timing parameters
///
/// The bit time is determined by
/// - the time quantum `t_q`, which is a fraction of the CAN peripheral clock
/// - the number of time quanta in a bit time, determined by `phase_seg_1` and
///   `phase_seg_2`
///
/// This struct expects *real* values, extra subtractions and additions expected
/// by the HW register are handled within the HAL.
///
/// Default values are:
/// - sjw: 1
/// - phase_seg_1: 13
/// - phase_seg_2: 2
///
/// Default time quanta in a bit time is 16 (phase_seg_1 + phase_seg_2 +
/// synchronization segment (1)), placing the sample point at 87.5%.
#[derive(Copy, Clone, Debug)]
pub struct BitTiming {
    /// Synchronization jump width
    pub sjw: u8,
    /// Propagation time and phase time before sample point
    pub phase_seg_1: u8,
    /// Time after sample point
    pub phase_seg_2: u8,
    /// The bitrate of the bus. This needs to be chosen so that the CAN clock
    /// is divisible into time quanta such that the bit time determined by
    /// `phase_seg_1` and `phase_seg_2` is a whole number of time quanta.
    pub bitrate: HertzU32,
}

impl BitTiming {
    /// Create an instance
    ///
    /// Nominal bitrate value must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            sjw: 1,
            phase_seg_1: 13,
            phase_seg_2: 2,
            bitrate,
        }
    }
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, PartialEq)]
pub enum BitTimingError {
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// Total bit time quanta is outside the wrapped `RangeInclusive`
    BitTimeOutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// No valid prescaler could be found
    ///
    /// The following requirement must be met:
    /// - `can_clock` must be divisible by `bitrate * bit_time_quanta`
    NoValidPrescaler {
        /// Provided peripheral clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
        /// Time quanta per bit selected by [`BitTiming`]
        bit_time_quanta: u32,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for BitTimingError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::SynchronizationJumpWidthOutOfRange(r) => {
                defmt::write!(f, "SJW out of range {=u32}..={=u32}", *r.start(), *r.end())
            }
            Self::PhaseSeg1OutOfRange(r) => {
                defmt::write!(f, "TSEG1 out of range {=u32}..={=u32}", *r.start(), *r.end())
            }
            Self::PhaseSeg2OutOfRange(r) => {
                defmt::write!(f, "TSEG2 out of range {=u32}..={=u32}", *r.start(), *r.end())
            }
            Self::BitTimeOutOfRange(r) => {
                defmt::write!(f, "bit time out of range {=u32}..={=u32}", *r.start(), *r.end())
            }
            Self::PrescalerOutOfRange(r) => {
                defmt::write!(f, "prescaler out of range {=u32}..={=u32}", *r.start(), *r.end())
            }
            Self::NoValidPrescaler {
                can_clock,
                bitrate,
                bit_time_quanta,
            } => defmt::write!(
                f,
                "no prescaler for {=u32} Hz at {=u32} bit/s with {=u32} tq",
                can_clock.to_Hz(),
                bitrate.to_Hz(),
                bit_time_quanta
            ),
        }
    }
}

/// Valid values of a BitTiming struct
#[derive(Clone)]
pub(crate) struct BitTimingRanges {
    sjw: RangeInclusive<u32>,
    phase_seg_1: RangeInclusive<u32>,
    phase_seg_2: RangeInclusive<u32>,
    /// The bit time, in time quanta
    time_quanta_per_bit: RangeInclusive<u32>,
    prescaler: RangeInclusive<u32>,
}

/// Field ranges of `BT` and `BRPE`; the prescaler spans `BRP` (6 bits) and
/// `BRPE` (4 bits)
pub(crate) const BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    sjw: 1..=4,
    phase_seg_1: 2..=16,
    phase_seg_2: 1..=8,
    time_quanta_per_bit: 4..=25,
    prescaler: 1..=1024,
};

impl BitTiming {
    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.phase_seg_1) + u32::from(self.phase_seg_2)
    }

    fn check(&self, valid: &BitTimingRanges) -> Result<(), BitTimingError> {
        if !valid.sjw.contains(&self.sjw.into()) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                valid.sjw.clone(),
            ))
        } else if !valid.phase_seg_1.contains(&self.phase_seg_1.into()) {
            Err(BitTimingError::PhaseSeg1OutOfRange(
                valid.phase_seg_1.clone(),
            ))
        } else if !valid.phase_seg_2.contains(&self.phase_seg_2.into()) {
            Err(BitTimingError::PhaseSeg2OutOfRange(
                valid.phase_seg_2.clone(),
            ))
        } else if !valid
            .time_quanta_per_bit
            .contains(&self.time_quanta_per_bit())
        {
            Err(BitTimingError::BitTimeOutOfRange(
                valid.time_quanta_per_bit.clone(),
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn prescaler(
        &self,
        f_can: HertzU32,
        valid: &BitTimingRanges,
    ) -> Result<u16, BitTimingError> {
        self.check(valid)?;
        let f_out = self.bitrate;
        let bit_time_quanta = self.time_quanta_per_bit();
        let f_q = f_out * bit_time_quanta;
        if let Some(0) = f_can.to_Hz().checked_rem(f_q.to_Hz()) {
            let prescaler = f_can / f_q;
            if !valid.prescaler.contains(&prescaler) {
                Err(BitTimingError::PrescalerOutOfRange(valid.prescaler.clone()))
            } else {
                Ok(prescaler as u16)
            }
        } else {
            Err(BitTimingError::NoValidPrescaler {
                can_clock: f_can,
                bitrate: f_out,
                bit_time_quanta,
            })
        }
    }
}

/// `BT` and `BRPE` register values for a checked timing and prescaler
pub(crate) fn bit_timing_registers(timing: &BitTiming, prescaler: u16) -> (u32, u32) {
    let brp = prescaler - 1;
    let mut bt = crate::reg::BitTimingReg::from(0);
    bt.set_brp((brp & 0x3F) as u8);
    bt.set_sjw(timing.sjw - 1);
    bt.set_tseg1(timing.phase_seg_1 - 1);
    bt.set_tseg2(timing.phase_seg_2 - 1);
    let mut brpe = crate::reg::Brpe::from(0);
    brpe.set_brpe((brp >> 6) as u8);
    (bt.into(), brpe.into())
}
