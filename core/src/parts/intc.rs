//! Interrupt controller.
//!
//! The INTC latches fifteen interrupt sources into `INTC_STAT`, gates them
//! through `INTC_MASK`, and drives the COP0 `cause.ip0` pin whenever any
//! masked source is pending. The EE observes the pin at the end of each
//! instruction batch.

use emotion_arch::{Shared, Word};
use log::{debug, trace};
use thiserror::Error;

use super::cpu::ee::cop0::Cause;

/// Interrupt source.
///
/// | Source | Bit | Raised by                          |
/// |--------|-----|------------------------------------|
/// | GS     |  0  | Graphics Synthesizer (CSR events)  |
/// | SBUS   |  1  | Sub-system bus                     |
/// | VB_ON  |  2  | Vertical blank start               |
/// | VB_OFF |  3  | Vertical blank end                 |
/// | VIF0/1 | 4/5 | Vector Interface units             |
/// | VU0/1  | 6/7 | Vector Units                       |
/// | IPU    |  8  | Image Processing Unit              |
/// | TIMER0..3 | 9..12 | EE timers                     |
/// | SFIFO  | 13  | SBUS FIFO                          |
/// | VU0WD  | 14  | VU0 watchdog                       |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interrupt {
    /// Graphics Synthesizer.
    Gs = 0,
    /// Sub-system bus.
    Sbus = 1,
    /// Vertical blank start.
    VblankOn = 2,
    /// Vertical blank end.
    VblankOff = 3,
    /// Vector Interface 0.
    Vif0 = 4,
    /// Vector Interface 1.
    Vif1 = 5,
    /// Vector Unit 0.
    Vu0 = 6,
    /// Vector Unit 1.
    Vu1 = 7,
    /// Image Processing Unit.
    Ipu = 8,
    /// Timer channel 0.
    Timer0 = 9,
    /// Timer channel 1.
    Timer1 = 10,
    /// Timer channel 2.
    Timer2 = 11,
    /// Timer channel 3.
    Timer3 = 12,
    /// SBUS FIFO.
    Sfifo = 13,
    /// VU0 watchdog.
    Vu0Watchdog = 14,
}

impl TryFrom<Word> for Interrupt {
    type Error = Error;

    fn try_from(value: Word) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Gs,
            1 => Self::Sbus,
            2 => Self::VblankOn,
            3 => Self::VblankOff,
            4 => Self::Vif0,
            5 => Self::Vif1,
            6 => Self::Vu0,
            7 => Self::Vu1,
            8 => Self::Ipu,
            9 => Self::Timer0,
            10 => Self::Timer1,
            11 => Self::Timer2,
            12 => Self::Timer3,
            13 => Self::Sfifo,
            14 => Self::Vu0Watchdog,
            _ => return Err(Error::Unknown),
        })
    }
}

/// An error caused by an [interrupt](Interrupt).
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown interrupt source.
    #[error("unknown interrupt source")]
    Unknown,
}

/// Register select offsets within the INTC block.
const STAT: Word = 0;
const MASK: Word = 1;

/// Interrupt controller.
#[derive(Debug)]
pub struct Intc {
    /// Pending sources.
    stat: Word,
    /// Enabled sources.
    mask: Word,
    /// COP0 cause pin.
    cause: Shared<Cause>,
}

impl Intc {
    /// Constructs a new `Intc` driving the given COP0 cause pin.
    #[must_use]
    pub fn new(cause: Shared<Cause>) -> Self {
        Self {
            stat: 0,
            mask: 0,
            cause,
        }
    }

    /// Reads `INTC_STAT` or `INTC_MASK`.
    #[must_use]
    pub fn read(&self, addr: Word) -> Word {
        match (addr >> 4) & 0xf {
            STAT => self.stat,
            _ => self.mask,
        }
    }

    /// Writes `INTC_STAT` or `INTC_MASK`.
    ///
    /// Stat bits are write-one-to-clear; mask bits are write-one-to-toggle.
    pub fn write(&mut self, addr: Word, data: Word) {
        let offset = (addr >> 4) & 0xf;
        match offset {
            STAT => self.stat &= !data,
            _ => self.mask ^= data,
        }
        self.update();
        debug!(
            "write {data:#010x} to {}",
            if offset == STAT { "INTC_STAT" } else { "INTC_MASK" }
        );
    }

    /// Latches an interrupt source.
    pub fn trigger(&mut self, int: Interrupt) {
        trace!("triggering interrupt {int:?}");
        self.stat |= 1 << (int as Word);
        self.update();
    }

    /// Checks if any masked source is pending.
    #[must_use]
    pub fn pending(&self) -> bool {
        (self.stat & self.mask) != 0
    }

    /// Recomputes the COP0 `cause.ip0` pin.
    fn update(&mut self) {
        let pending = self.pending();
        self.cause.borrow_mut().set_ip0_pending(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intc() -> (Intc, Shared<Cause>) {
        let cause = Shared::new(Cause::new());
        (Intc::new(cause.clone()), cause)
    }

    #[test]
    fn stat_write_clears_set_bits() {
        let (mut intc, _) = intc();
        intc.trigger(Interrupt::VblankOn);
        intc.trigger(Interrupt::Gs);
        assert_eq!(intc.read(0x1000_f000), 0b101);

        // Writing zero must not clear anything.
        intc.write(0x1000_f000, 0);
        assert_eq!(intc.read(0x1000_f000), 0b101);

        intc.write(0x1000_f000, 1 << Interrupt::VblankOn as Word);
        assert_eq!(intc.read(0x1000_f000), 0b001);
    }

    #[test]
    fn mask_write_toggles_bits() {
        let (mut intc, _) = intc();
        intc.write(0x1000_f010, 0b100);
        assert_eq!(intc.read(0x1000_f010), 0b100);
        intc.write(0x1000_f010, 0b101);
        assert_eq!(intc.read(0x1000_f010), 0b001);
    }

    #[test]
    fn cause_pin_follows_stat_and_mask() {
        let (mut intc, cause) = intc();
        intc.trigger(Interrupt::VblankOn);
        assert!(!cause.borrow().ip0_pending());

        intc.write(0x1000_f010, 1 << Interrupt::VblankOn as Word);
        assert!(cause.borrow().ip0_pending());

        intc.write(0x1000_f000, 1 << Interrupt::VblankOn as Word);
        assert!(!cause.borrow().ip0_pending());
    }
}
