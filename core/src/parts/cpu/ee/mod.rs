//! Emotion Engine interpreter.
//!
//! A cycle-driven MIPS-III/IV derivative with 128-bit general registers,
//! two multiply/divide pipes, and inline access to VU0 through COP2. One
//! instruction retires per cycle. Branches redirect the program counter but
//! never the already-prefetched delay slot, which retires first with its
//! `delay_slot` flag raised; the likely-branch forms additionally nullify
//! the slot when not taken.

use emotion_arch::reg::Quadword;
use emotion_arch::{Block, Dword, Qword, Shared, Word};
use log::debug;

use self::cop0::{Cause, Cop0, Exception};
use self::cop1::Cop1;
use crate::parts::bus::Bus;
use crate::parts::timer::Timers;
use crate::parts::vu::Vu;

pub mod cop0;
pub mod cop1;

mod insn;

/// BIOS reset vector.
pub const RESET_VECTOR: Word = 0xbfc0_0000;

/// Exception vector bases, indexed by `status.bev`.
const VECTOR_BASE: [Word; 2] = [0x8000_0000, 0xbfc0_0200];

/// General-purpose register file.
///
/// Thirty-two 128-bit registers. Register 0 is architecturally zero: every
/// write to it is discarded here, which keeps the invariant without a
/// fix-up pass after each instruction.
#[derive(Debug, Default)]
pub struct File {
    regs: [Quadword; 32],
}

impl File {
    /// Reads a full quadword register.
    #[must_use]
    pub fn quad(&self, index: usize) -> Quadword {
        self.regs[index]
    }

    /// Writes a full quadword register.
    pub fn set_quad(&mut self, index: usize, value: Quadword) {
        if index != 0 {
            self.regs[index] = value;
        }
    }

    /// Reads the low doubleword of a register.
    #[must_use]
    pub fn lo(&self, index: usize) -> Dword {
        self.regs[index].lo()
    }

    /// Writes the low doubleword of a register, preserving the upper half.
    pub fn set_lo(&mut self, index: usize, value: Dword) {
        if index != 0 {
            self.regs[index].set_lo(value);
        }
    }

    /// Reads the low word of a register.
    #[must_use]
    pub fn word(&self, index: usize) -> Word {
        self.regs[index].word(0)
    }

    /// Writes the low word of a register (the narrowing assignment).
    pub fn set_word(&mut self, index: usize, value: Word) {
        if index != 0 {
            self.regs[index].set_word(0, value);
        }
    }
}

/// A fetched instruction word.
#[derive(Clone, Copy, Debug, Default)]
struct Fetch {
    /// Raw instruction word.
    word: Word,
    /// Address the word was fetched from.
    pc: Word,
    /// Whether this word sits in a branch delay slot.
    delay_slot: bool,
}

/// Emotion Engine.
#[derive(Debug)]
pub struct Cpu {
    /// General registers.
    pub reg: File,
    /// Program counter (next fetch address).
    pc: Word,
    /// First multiply/divide pipe.
    hi0: Dword,
    lo0: Dword,
    /// Second multiply/divide pipe (`MULT1`/`DIV1`).
    hi1: Dword,
    lo1: Dword,
    /// Retiring instruction.
    instr: Fetch,
    /// Prefetched instruction.
    next: Fetch,
    /// The last retired instruction redirected the program counter.
    branch_taken: bool,
    /// A likely branch nullified its delay slot.
    skip_branch_delay: bool,
    /// System control coprocessor.
    pub cop0: Cop0,
    /// Floating-point coprocessor.
    pub cop1: Cop1,
    // Shared peers.
    bus: Shared<Bus>,
    timers: Shared<Timers>,
    vu0: Shared<Vu>,
}

impl Cpu {
    /// Constructs a new `Cpu` and prefetches the reset vector.
    #[must_use]
    pub fn new(
        bus: Shared<Bus>,
        timers: Shared<Timers>,
        vu0: Shared<Vu>,
        cause: Shared<Cause>,
    ) -> Self {
        let mut cpu = Self {
            reg: File::default(),
            pc: RESET_VECTOR,
            hi0: 0,
            lo0: 0,
            hi1: 0,
            lo1: 0,
            instr: Fetch::default(),
            next: Fetch::default(),
            branch_taken: false,
            skip_branch_delay: false,
            cop0: Cop0::new(cause),
            cop1: Cop1::new(),
            bus,
            timers,
            vu0,
        };
        cpu.fetch_next();
        cpu
    }

    /// Gets the current program counter (next fetch address).
    #[must_use]
    pub fn pc(&self) -> Word {
        self.pc
    }

    /// Gets the address of the instruction about to retire.
    #[must_use]
    pub fn retire_pc(&self) -> Word {
        self.next.pc
    }

    /// Redirects execution to the given address.
    ///
    /// The prefetched instruction is discarded and refetched from the new
    /// location, as a hardware jump would.
    pub fn goto(&mut self, addr: Word) {
        self.pc = addr;
        self.fetch_next();
    }

    /// Checks whether the last retired instruction redirected the PC.
    #[must_use]
    pub fn branch_taken(&self) -> bool {
        self.branch_taken
    }

    /// Checks whether the last retired instruction nullified its delay
    /// slot.
    #[must_use]
    pub fn skipped_delay_slot(&self) -> bool {
        self.skip_branch_delay
    }

    /// Runs a batch of cycles, then samples the interrupt pins.
    ///
    /// The internal timers run off the bus clock at half the EE rate.
    pub fn clock(&mut self, cycles: Word) {
        for _ in 0..cycles {
            self.step();
        }
        self.timers.borrow_mut().tick(cycles / 2);
        if self.int_pending() {
            self.exception(Exception::Interrupt);
        }
    }

    /// Retires one instruction.
    pub fn step(&mut self) {
        self.instr = self.next;
        self.fetch_next();
        self.branch_taken = false;
        self.skip_branch_delay = false;

        if self.instr.word != 0 {
            self.execute();
        }

        self.cop0.count = self.cop0.count.wrapping_add(1);
    }

    /// Prefetches the word at PC and advances it.
    fn fetch_next(&mut self) {
        let pc = self.pc;
        self.next = Fetch {
            word: self.bus.borrow_mut().read32(pc),
            pc,
            delay_slot: false,
        };
        self.pc = pc.wrapping_add(4);
    }

    /// Vectors a guest exception through COP0.
    pub fn exception(&mut self, kind: Exception) {
        debug!("exception {kind:?} at {:#010x}", self.instr.pc);

        {
            let mut cause = self.cop0.cause.borrow_mut();
            cause.set_exccode(kind as u8);
            if !self.cop0.status.exl() {
                self.cop0.epc = self
                    .instr
                    .pc
                    .wrapping_sub(4 * Word::from(self.instr.delay_slot));
                cause.set_bd(self.instr.delay_slot);
                self.cop0.status.set_exl(true);
            }
        }

        let base = VECTOR_BASE[usize::from(self.cop0.status.bev())];
        self.pc = base.wrapping_add(kind.vector());
        self.fetch_next();
    }

    /// Evaluates the interrupt predicate.
    ///
    /// Interrupts are accepted only with `ie` and `eie` set outside of
    /// exception and error levels, and only for unmasked pins.
    #[must_use]
    pub fn int_pending(&self) -> bool {
        let status = self.cop0.status;
        let enabled = status.eie() && status.ie() && !status.erl() && !status.exl();
        if !enabled {
            return false;
        }
        let cause = self.cop0.cause.borrow();
        (cause.ip0_pending() && status.im0())
            || (cause.ip1_pending() && status.im1())
            || (cause.timer_ip_pending() && status.im7())
    }

    // Bus access helpers.

    fn read8(&mut self, addr: Word) -> u8 {
        self.bus.borrow_mut().read8(addr)
    }

    fn read16(&mut self, addr: Word) -> u16 {
        self.bus.borrow_mut().read16(addr)
    }

    fn read32(&mut self, addr: Word) -> Word {
        self.bus.borrow_mut().read32(addr)
    }

    fn read64(&mut self, addr: Word) -> Dword {
        self.bus.borrow_mut().read64(addr)
    }

    fn read128(&mut self, addr: Word) -> Qword {
        self.bus.borrow_mut().read128(addr)
    }

    fn write8(&mut self, addr: Word, data: u8) {
        self.bus.borrow_mut().write8(addr, data);
    }

    fn write16(&mut self, addr: Word, data: u16) {
        self.bus.borrow_mut().write16(addr, data);
    }

    fn write32(&mut self, addr: Word, data: Word) {
        self.bus.borrow_mut().write32(addr, data);
    }

    fn write64(&mut self, addr: Word, data: Dword) {
        self.bus.borrow_mut().write64(addr, data);
    }

    fn write128(&mut self, addr: Word, data: Qword) {
        self.bus.borrow_mut().write128(addr, data);
    }
}

impl Block for Cpu {
    fn cycle(&mut self) {
        self.step();
    }

    fn reset(&mut self) {
        self.reg = File::default();
        self.pc = RESET_VECTOR;
        self.hi0 = 0;
        self.lo0 = 0;
        self.hi1 = 0;
        self.lo1 = 0;
        self.branch_taken = false;
        self.skip_branch_delay = false;
        self.fetch_next();
        self.instr = Fetch::default();
    }
}
