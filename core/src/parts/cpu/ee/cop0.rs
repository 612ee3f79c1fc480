//! System control coprocessor.

use bitfield_struct::bitfield;
use emotion_arch::{Shared, Word};
use log::trace;

/// Processor revision identifier of the Emotion Engine.
pub const PRID: Word = 0x2e20;

/// Power-on value of the status register (BEV and ERL set).
const STATUS_RESET: Word = 0x0040_0004;

/// Status register.
#[bitfield(u32)]
pub struct Status {
    /// Interrupt enable.
    pub ie: bool,
    /// Exception level.
    pub exl: bool,
    /// Error level.
    pub erl: bool,
    /// Kernel/supervisor/user mode.
    #[bits(2)]
    pub ksu: u8,
    #[bits(5)]
    __0: u8,
    /// INT0 (INTC) interrupt mask.
    pub im0: bool,
    /// INT1 (DMAC) interrupt mask.
    pub im1: bool,
    /// Bus error mask.
    pub bem: bool,
    #[bits(2)]
    __1: u8,
    /// Internal timer interrupt mask.
    pub im7: bool,
    /// Master enable for IE.
    pub eie: bool,
    /// EI/DI instruction enable.
    pub edi: bool,
    /// Cache hit status.
    pub ch: bool,
    #[bits(3)]
    __2: u8,
    /// Bootstrap exception vectors.
    pub bev: bool,
    /// Performance counter vector location.
    pub dev: bool,
    #[bits(2)]
    __3: u8,
    /// Additional floating-point registers.
    pub fr: bool,
    #[bits(1)]
    __4: u8,
    /// Coprocessor usability.
    #[bits(4)]
    pub cu: u8,
}

/// Cause register.
///
/// The interrupt-pending bits are pins driven by the INTC (`ip0`), the DMAC
/// (`ip1`), and the COP0 timer; the register is therefore shared with those
/// blocks.
#[bitfield(u32)]
pub struct Cause {
    #[bits(2)]
    __0: u8,
    /// Exception code.
    #[bits(5)]
    pub exccode: u8,
    #[bits(3)]
    __1: u8,
    /// INT0 pending (INTC).
    pub ip0_pending: bool,
    /// INT1 pending (DMAC).
    pub ip1_pending: bool,
    /// SIO pending.
    pub siop: bool,
    #[bits(2)]
    __2: u8,
    /// Timer interrupt pending.
    pub timer_ip_pending: bool,
    /// Level 2 exception code.
    #[bits(3)]
    pub exc2: u8,
    #[bits(9)]
    __3: u16,
    /// Coprocessor number of a usability fault.
    #[bits(2)]
    pub ce: u8,
    /// Level 2 branch delay.
    pub bd2: bool,
    /// Exception taken in a branch delay slot.
    pub bd: bool,
}

/// Guest exception kinds, by `exccode`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Exception {
    Interrupt = 0,
    TlbModified = 1,
    TlbLoad = 2,
    TlbStore = 3,
    AddrErrorLoad = 4,
    AddrErrorStore = 5,
    Syscall = 8,
    Break = 9,
    Reserved = 10,
    CopUnusable = 11,
    Overflow = 12,
    Trap = 13,
}

impl Exception {
    /// Selects the vector offset for this exception.
    #[must_use]
    pub fn vector(self) -> Word {
        match self {
            Self::TlbLoad | Self::TlbStore => 0x000,
            Self::Interrupt => 0x200,
            _ => 0x180,
        }
    }
}

/// System control coprocessor.
#[derive(Debug)]
pub struct Cop0 {
    /// Status register (r12).
    pub status: Status,
    /// Cause register (r13), shared with the interrupt sources.
    pub cause: Shared<Cause>,
    /// Exception program counter (r14).
    pub epc: Word,
    /// Cycle counter (r9).
    pub count: Word,
    /// Remaining registers, stored flat.
    regs: [Word; 32],
}

impl Cop0 {
    /// Constructs a new `Cop0` around the shared cause pins.
    #[must_use]
    pub fn new(cause: Shared<Cause>) -> Self {
        Self {
            status: Status::from_bits(STATUS_RESET),
            cause,
            epc: 0,
            count: 0,
            regs: [0; 32],
        }
    }

    /// Reads a register by index (`MFC0`).
    #[must_use]
    pub fn load(&self, index: usize) -> Word {
        match index {
            9 => self.count,
            12 => self.status.into_bits(),
            13 => self.cause.borrow().into_bits(),
            14 => self.epc,
            15 => PRID,
            _ => self.regs[index],
        }
    }

    /// Writes a register by index (`MTC0`).
    pub fn store(&mut self, index: usize, data: Word) {
        trace!("cop0: write {data:#010x} to r{index}");
        match index {
            9 => self.count = data,
            12 => self.status = Status::from_bits(data),
            13 => *self.cause.borrow_mut() = Cause::from_bits(data),
            14 => self.epc = data,
            // PRID is read-only.
            15 => {}
            _ => self.regs[index] = data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_status_has_bev_and_erl() {
        let cop0 = Cop0::new(Shared::new(Cause::new()));
        assert!(cop0.status.bev());
        assert!(cop0.status.erl());
        assert!(!cop0.status.exl());
        assert_eq!(cop0.load(12), STATUS_RESET);
    }

    #[test]
    fn prid_is_constant() {
        let mut cop0 = Cop0::new(Shared::new(Cause::new()));
        assert_eq!(cop0.load(15), PRID);
        cop0.store(15, 0);
        assert_eq!(cop0.load(15), PRID);
    }

    #[test]
    fn cause_reads_reflect_shared_pins() {
        let cause = Shared::new(Cause::new());
        let cop0 = Cop0::new(cause.clone());
        cause.borrow_mut().set_ip0_pending(true);
        assert_eq!(cop0.load(13) & (1 << 10), 1 << 10);
    }

    #[test]
    fn exception_vectors() {
        assert_eq!(Exception::TlbLoad.vector(), 0x000);
        assert_eq!(Exception::Interrupt.vector(), 0x200);
        assert_eq!(Exception::AddrErrorStore.vector(), 0x180);
        assert_eq!(Exception::Syscall.vector(), 0x180);
    }
}
