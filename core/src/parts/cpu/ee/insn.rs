//! Instruction decode and execution.
//!
//! The primary opcode (top six bits) selects a handler; opcode 0 dispatches
//! the SPECIAL table on `funct`, opcode 1 the REGIMM table on `rt`, opcode
//! `0x1c` the 128-bit MMI extensions, and opcodes `0x10`/`0x12` the COP0
//! and COP2 coprocessors. Unknown encodings are logged and retired as
//! no-ops.

use emotion_arch::reg::Quadword;
use emotion_arch::{Dword, Word};
use log::{trace, warn};

use super::cop0::Exception;
use super::Cpu;

/// Register mnemonics for the trace log.
#[rustfmt::skip]
const REG: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3",
    "$t0", "$t1", "$t2", "$t3", "$t4", "$t5", "$t6", "$t7",
    "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7",
    "$t8", "$t9", "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

/// Instruction word field views.
#[derive(Clone, Copy, Debug)]
pub(super) struct Instruction(pub Word);

impl Instruction {
    /// Primary opcode.
    pub fn opcode(self) -> Word {
        self.0 >> 26
    }

    /// Source register.
    pub fn rs(self) -> usize {
        ((self.0 >> 21) & 0x1f) as usize
    }

    /// Target register.
    pub fn rt(self) -> usize {
        ((self.0 >> 16) & 0x1f) as usize
    }

    /// Destination register.
    pub fn rd(self) -> usize {
        ((self.0 >> 11) & 0x1f) as usize
    }

    /// Shift amount.
    pub fn sa(self) -> Word {
        (self.0 >> 6) & 0x1f
    }

    /// Secondary opcode.
    pub fn funct(self) -> Word {
        self.0 & 0x3f
    }

    /// Immediate, zero-extended.
    pub fn imm(self) -> u16 {
        self.0 as u16
    }

    /// Immediate, sign-extended.
    pub fn simm(self) -> i16 {
        self.0 as i16
    }

    /// Jump target index.
    pub fn target(self) -> Word {
        self.0 & 0x03ff_ffff
    }
}

/// Sign-extends a 32-bit result into a 64-bit register value.
fn sext(value: Word) -> Dword {
    value as i32 as i64 as Dword
}

/// Signed division with the MIPS edge cases folded in.
///
/// A zero divisor leaves the dividend in HI and all-ones (or one, for a
/// negative dividend) in LO; the `MIN / -1` overflow wraps.
fn divide(dividend: i32, divisor: i32) -> (Dword, Dword) {
    if divisor == 0 {
        let lo = if dividend >= 0 { -1 } else { 1 };
        (sext(dividend as Word), sext(lo as u32 as Word))
    } else if dividend == i32::MIN && divisor == -1 {
        (0, sext(i32::MIN as Word))
    } else {
        (
            sext((dividend % divisor) as Word),
            sext((dividend / divisor) as Word),
        )
    }
}

/// Unsigned division; a zero divisor yields `{hi = dividend, lo = !0}`.
fn divide_unsigned(dividend: Word, divisor: Word) -> (Dword, Dword) {
    if divisor == 0 {
        (sext(dividend), sext(0xffff_ffff))
    } else {
        (sext(dividend % divisor), sext(dividend / divisor))
    }
}

impl Cpu {
    /// Decodes and executes the retiring instruction.
    pub(super) fn execute(&mut self) {
        let instr = Instruction(self.instr.word);
        match instr.opcode() {
            0x00 => self.special(instr),
            0x01 => self.regimm(instr),
            0x02 => self.j(instr),
            0x03 => self.jal(instr),
            0x04 => self.beq(instr),
            0x05 => self.bne(instr),
            0x06 => self.blez(instr),
            0x07 => self.bgtz(instr),
            0x09 => self.addiu(instr),
            0x0a => self.slti(instr),
            0x0b => self.sltiu(instr),
            0x0c => self.andi(instr),
            0x0d => self.ori(instr),
            0x0e => self.xori(instr),
            0x0f => self.lui(instr),
            0x10 => self.cop0(instr),
            0x12 => self.cop2(instr),
            0x14 => self.beql(instr),
            0x15 => self.bnel(instr),
            0x16 => self.blezl(instr),
            0x17 => self.bgtzl(instr),
            0x19 => self.daddiu(instr),
            0x1c => self.mmi(instr),
            0x1e => self.lq(instr),
            0x1f => self.sq(instr),
            0x20 => self.lb(instr),
            0x21 => self.lh(instr),
            0x23 => self.lw(instr),
            0x24 => self.lbu(instr),
            0x25 => self.lhu(instr),
            0x27 => self.lwu(instr),
            0x28 => self.sb(instr),
            0x29 => self.sh(instr),
            0x2b => self.sw(instr),
            0x2f => trace!("cache"),
            0x37 => self.ld(instr),
            0x39 => self.swc1(instr),
            0x3f => self.sd(instr),
            opcode => warn!(
                "unimplemented opcode {opcode:#04x} at {:#010x}",
                self.instr.pc
            ),
        }
    }

    fn special(&mut self, instr: Instruction) {
        match instr.funct() {
            0x00 => self.sll(instr),
            0x02 => self.srl(instr),
            0x03 => self.sra(instr),
            0x04 => self.sllv(instr),
            0x07 => self.srav(instr),
            0x08 => self.jr(instr),
            0x09 => self.jalr(instr),
            0x0a => self.movz(instr),
            0x0b => self.movn(instr),
            0x0c => {
                trace!("syscall");
                self.exception(Exception::Syscall);
            }
            0x0d => {
                trace!("break");
                self.exception(Exception::Break);
            }
            0x0f => trace!("sync"),
            0x10 => self.mfhi(instr),
            0x12 => self.mflo(instr),
            0x14 => self.dsllv(instr),
            0x17 => self.dsrav(instr),
            0x18 => self.mult(instr),
            0x1a => self.div(instr),
            0x1b => self.divu(instr),
            0x21 => self.addu(instr),
            0x23 => self.subu(instr),
            0x24 => self.and(instr),
            0x25 => self.or(instr),
            0x27 => self.nor(instr),
            0x2a => self.slt(instr),
            0x2b => self.sltu(instr),
            0x2d => self.daddu(instr),
            0x38 => self.dsll(instr),
            0x3c => self.dsll32(instr),
            0x3e => self.dsrl32(instr),
            0x3f => self.dsra32(instr),
            funct => warn!(
                "unimplemented special opcode {funct:#04x} at {:#010x}",
                self.instr.pc
            ),
        }
    }

    fn regimm(&mut self, instr: Instruction) {
        match instr.rt() {
            0x00 => self.bltz(instr),
            0x01 => self.bgez(instr),
            0x02 => self.bltzl(instr),
            0x03 => self.bgezl(instr),
            rt => warn!("unimplemented regimm opcode {rt:#04x}"),
        }
    }

    // Branches.

    /// Computes a branch target relative to the delay slot.
    fn target(&self, instr: Instruction) -> Word {
        let offset = (i32::from(instr.simm()) << 2) as Word;
        self.instr.pc.wrapping_add(4).wrapping_add(offset)
    }

    /// Applies an ordinary branch: the delay slot always retires.
    fn branch(&mut self, taken: bool, target: Word) {
        self.next.delay_slot = true;
        if taken {
            self.pc = target;
            self.branch_taken = true;
        }
    }

    /// Applies a likely branch: the delay slot is nullified when not taken.
    fn branch_likely(&mut self, taken: bool, target: Word) {
        if taken {
            self.next.delay_slot = true;
            self.pc = target;
            self.branch_taken = true;
        } else {
            self.fetch_next();
            self.skip_branch_delay = true;
        }
    }

    fn j(&mut self, instr: Instruction) {
        let target = (self.instr.pc.wrapping_add(4) & 0xf000_0000) | (instr.target() << 2);
        trace!("j {target:#010x}");
        self.branch(true, target);
    }

    fn jal(&mut self, instr: Instruction) {
        let target = (self.instr.pc.wrapping_add(4) & 0xf000_0000) | (instr.target() << 2);
        trace!("jal {target:#010x}");
        self.reg.set_lo(31, Dword::from(self.instr.pc.wrapping_add(8)));
        self.branch(true, target);
    }

    fn jr(&mut self, instr: Instruction) {
        let target = self.reg.word(instr.rs());
        trace!("jr {}", REG[instr.rs()]);
        self.branch(true, target);
    }

    fn jalr(&mut self, instr: Instruction) {
        let target = self.reg.word(instr.rs());
        trace!("jalr {}, {}", REG[instr.rd()], REG[instr.rs()]);
        self.reg
            .set_lo(instr.rd(), Dword::from(self.instr.pc.wrapping_add(8)));
        self.branch(true, target);
    }

    fn beq(&mut self, instr: Instruction) {
        let taken = self.reg.lo(instr.rs()) == self.reg.lo(instr.rt());
        let target = self.target(instr);
        trace!(
            "beq {}, {}, {target:#010x} ({})",
            REG[instr.rs()],
            REG[instr.rt()],
            if taken { "taken" } else { "ignored" }
        );
        self.branch(taken, target);
    }

    fn bne(&mut self, instr: Instruction) {
        let taken = self.reg.lo(instr.rs()) != self.reg.lo(instr.rt());
        let target = self.target(instr);
        trace!(
            "bne {}, {}, {target:#010x} ({})",
            REG[instr.rs()],
            REG[instr.rt()],
            if taken { "taken" } else { "ignored" }
        );
        self.branch(taken, target);
    }

    fn blez(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) <= 0;
        let target = self.target(instr);
        trace!("blez {}, {target:#010x}", REG[instr.rs()]);
        self.branch(taken, target);
    }

    fn bgtz(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) > 0;
        let target = self.target(instr);
        trace!("bgtz {}, {target:#010x}", REG[instr.rs()]);
        self.branch(taken, target);
    }

    fn bltz(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) < 0;
        let target = self.target(instr);
        trace!("bltz {}, {target:#010x}", REG[instr.rs()]);
        self.branch(taken, target);
    }

    fn bgez(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) >= 0;
        let target = self.target(instr);
        trace!("bgez {}, {target:#010x}", REG[instr.rs()]);
        self.branch(taken, target);
    }

    fn beql(&mut self, instr: Instruction) {
        let taken = self.reg.lo(instr.rs()) == self.reg.lo(instr.rt());
        let target = self.target(instr);
        trace!("beql {}, {}, {target:#010x}", REG[instr.rs()], REG[instr.rt()]);
        self.branch_likely(taken, target);
    }

    fn bnel(&mut self, instr: Instruction) {
        let taken = self.reg.lo(instr.rs()) != self.reg.lo(instr.rt());
        let target = self.target(instr);
        trace!("bnel {}, {}, {target:#010x}", REG[instr.rs()], REG[instr.rt()]);
        self.branch_likely(taken, target);
    }

    fn blezl(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) <= 0;
        let target = self.target(instr);
        trace!("blezl {}, {target:#010x}", REG[instr.rs()]);
        self.branch_likely(taken, target);
    }

    fn bgtzl(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) > 0;
        let target = self.target(instr);
        trace!("bgtzl {}, {target:#010x}", REG[instr.rs()]);
        self.branch_likely(taken, target);
    }

    fn bltzl(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) < 0;
        let target = self.target(instr);
        trace!("bltzl {}, {target:#010x}", REG[instr.rs()]);
        self.branch_likely(taken, target);
    }

    fn bgezl(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) >= 0;
        let target = self.target(instr);
        trace!("bgezl {}, {target:#010x}", REG[instr.rs()]);
        self.branch_likely(taken, target);
    }

    // Immediate arithmetic.

    fn addiu(&mut self, instr: Instruction) {
        let result = (self.reg.word(instr.rs()) as i32).wrapping_add(i32::from(instr.simm()));
        trace!("addiu {}, {}, {:#x}", REG[instr.rt()], REG[instr.rs()], instr.simm());
        self.reg.set_lo(instr.rt(), sext(result as Word));
    }

    fn daddiu(&mut self, instr: Instruction) {
        let result = self
            .reg
            .lo(instr.rs())
            .wrapping_add(instr.simm() as i64 as Dword);
        trace!("daddiu {}, {}, {:#x}", REG[instr.rt()], REG[instr.rs()], instr.simm());
        self.reg.set_lo(instr.rt(), result);
    }

    fn slti(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) < i64::from(instr.simm());
        trace!("slti {}, {}, {:#x}", REG[instr.rt()], REG[instr.rs()], instr.simm());
        self.reg.set_lo(instr.rt(), Dword::from(taken));
    }

    fn sltiu(&mut self, instr: Instruction) {
        let taken = self.reg.lo(instr.rs()) < (instr.simm() as i64 as Dword);
        trace!("sltiu {}, {}, {:#x}", REG[instr.rt()], REG[instr.rs()], instr.simm());
        self.reg.set_lo(instr.rt(), Dword::from(taken));
    }

    fn andi(&mut self, instr: Instruction) {
        trace!("andi {}, {}, {:#x}", REG[instr.rt()], REG[instr.rs()], instr.imm());
        let result = self.reg.lo(instr.rs()) & Dword::from(instr.imm());
        self.reg.set_lo(instr.rt(), result);
    }

    fn ori(&mut self, instr: Instruction) {
        trace!("ori {}, {}, {:#x}", REG[instr.rt()], REG[instr.rs()], instr.imm());
        let result = self.reg.lo(instr.rs()) | Dword::from(instr.imm());
        self.reg.set_lo(instr.rt(), result);
    }

    fn xori(&mut self, instr: Instruction) {
        trace!("xori {}, {}, {:#x}", REG[instr.rt()], REG[instr.rs()], instr.imm());
        let result = self.reg.lo(instr.rs()) ^ Dword::from(instr.imm());
        self.reg.set_lo(instr.rt(), result);
    }

    fn lui(&mut self, instr: Instruction) {
        let value = Word::from(instr.imm()) << 16;
        trace!("lui {}, {value:#010x}", REG[instr.rt()]);
        self.reg.set_lo(instr.rt(), sext(value));
    }

    // Register arithmetic.

    fn addu(&mut self, instr: Instruction) {
        let result = self
            .reg
            .word(instr.rs())
            .wrapping_add(self.reg.word(instr.rt()));
        trace!("addu {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), sext(result));
    }

    fn subu(&mut self, instr: Instruction) {
        let result = self
            .reg
            .word(instr.rs())
            .wrapping_sub(self.reg.word(instr.rt()));
        trace!("subu {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), sext(result));
    }

    fn daddu(&mut self, instr: Instruction) {
        let result = self
            .reg
            .lo(instr.rs())
            .wrapping_add(self.reg.lo(instr.rt()));
        trace!("daddu {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), result);
    }

    fn and(&mut self, instr: Instruction) {
        let result = self.reg.lo(instr.rs()) & self.reg.lo(instr.rt());
        trace!("and {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), result);
    }

    fn or(&mut self, instr: Instruction) {
        let result = self.reg.lo(instr.rs()) | self.reg.lo(instr.rt());
        trace!("or {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), result);
    }

    fn nor(&mut self, instr: Instruction) {
        let result = !(self.reg.lo(instr.rs()) | self.reg.lo(instr.rt()));
        trace!("nor {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), result);
    }

    fn slt(&mut self, instr: Instruction) {
        let taken = (self.reg.lo(instr.rs()) as i64) < (self.reg.lo(instr.rt()) as i64);
        trace!("slt {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), Dword::from(taken));
    }

    fn sltu(&mut self, instr: Instruction) {
        let taken = self.reg.lo(instr.rs()) < self.reg.lo(instr.rt());
        trace!("sltu {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.reg.set_lo(instr.rd(), Dword::from(taken));
    }

    fn movz(&mut self, instr: Instruction) {
        trace!("movz {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        if self.reg.lo(instr.rt()) == 0 {
            let value = self.reg.lo(instr.rs());
            self.reg.set_lo(instr.rd(), value);
        }
    }

    fn movn(&mut self, instr: Instruction) {
        trace!("movn {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        if self.reg.lo(instr.rt()) != 0 {
            let value = self.reg.lo(instr.rs());
            self.reg.set_lo(instr.rd(), value);
        }
    }

    // Shifts.

    fn sll(&mut self, instr: Instruction) {
        let result = self.reg.word(instr.rt()) << instr.sa();
        trace!("sll {}, {}, {:#x}", REG[instr.rd()], REG[instr.rt()], instr.sa());
        self.reg.set_lo(instr.rd(), sext(result));
    }

    fn srl(&mut self, instr: Instruction) {
        let result = self.reg.word(instr.rt()) >> instr.sa();
        trace!("srl {}, {}, {:#x}", REG[instr.rd()], REG[instr.rt()], instr.sa());
        self.reg.set_lo(instr.rd(), sext(result));
    }

    fn sra(&mut self, instr: Instruction) {
        let result = (self.reg.word(instr.rt()) as i32) >> instr.sa();
        trace!("sra {}, {}, {:#x}", REG[instr.rd()], REG[instr.rt()], instr.sa());
        self.reg.set_lo(instr.rd(), sext(result as Word));
    }

    fn sllv(&mut self, instr: Instruction) {
        let shift = self.reg.word(instr.rs()) & 0x1f;
        let result = self.reg.word(instr.rt()) << shift;
        trace!("sllv {}, {}, {}", REG[instr.rd()], REG[instr.rt()], REG[instr.rs()]);
        self.reg.set_lo(instr.rd(), sext(result));
    }

    fn srav(&mut self, instr: Instruction) {
        let shift = self.reg.word(instr.rs()) & 0x1f;
        let result = (self.reg.word(instr.rt()) as i32) >> shift;
        trace!("srav {}, {}, {}", REG[instr.rd()], REG[instr.rt()], REG[instr.rs()]);
        self.reg.set_lo(instr.rd(), sext(result as Word));
    }

    fn dsllv(&mut self, instr: Instruction) {
        let shift = self.reg.word(instr.rs()) & 0x3f;
        let result = self.reg.lo(instr.rt()) << shift;
        trace!("dsllv {}, {}, {}", REG[instr.rd()], REG[instr.rt()], REG[instr.rs()]);
        self.reg.set_lo(instr.rd(), result);
    }

    fn dsrav(&mut self, instr: Instruction) {
        let shift = self.reg.word(instr.rs()) & 0x3f;
        let result = (self.reg.lo(instr.rt()) as i64) >> shift;
        trace!("dsrav {}, {}, {}", REG[instr.rd()], REG[instr.rt()], REG[instr.rs()]);
        self.reg.set_lo(instr.rd(), result as Dword);
    }

    fn dsll(&mut self, instr: Instruction) {
        let result = self.reg.lo(instr.rt()) << instr.sa();
        trace!("dsll {}, {}, {:#x}", REG[instr.rd()], REG[instr.rt()], instr.sa());
        self.reg.set_lo(instr.rd(), result);
    }

    fn dsll32(&mut self, instr: Instruction) {
        let result = self.reg.lo(instr.rt()) << (instr.sa() + 32);
        trace!("dsll32 {}, {}, {:#x}", REG[instr.rd()], REG[instr.rt()], instr.sa());
        self.reg.set_lo(instr.rd(), result);
    }

    fn dsrl32(&mut self, instr: Instruction) {
        let result = self.reg.lo(instr.rt()) >> (instr.sa() + 32);
        trace!("dsrl32 {}, {}, {:#x}", REG[instr.rd()], REG[instr.rt()], instr.sa());
        self.reg.set_lo(instr.rd(), result);
    }

    fn dsra32(&mut self, instr: Instruction) {
        let result = (self.reg.lo(instr.rt()) as i64) >> (instr.sa() + 32);
        trace!("dsra32 {}, {}, {:#x}", REG[instr.rd()], REG[instr.rt()], instr.sa());
        self.reg.set_lo(instr.rd(), result as Dword);
    }

    // Multiply and divide.

    fn mult(&mut self, instr: Instruction) {
        let product = i64::from(self.reg.word(instr.rs()) as i32)
            * i64::from(self.reg.word(instr.rt()) as i32);
        trace!("mult {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.lo0 = sext(product as Word);
        self.hi0 = sext((product >> 32) as Word);
        self.reg.set_lo(instr.rd(), self.lo0);
    }

    fn mult1(&mut self, instr: Instruction) {
        let product = i64::from(self.reg.word(instr.rs()) as i32)
            * i64::from(self.reg.word(instr.rt()) as i32);
        trace!("mult1 {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        self.lo1 = sext(product as Word);
        self.hi1 = sext((product >> 32) as Word);
        self.reg.set_lo(instr.rd(), self.lo1);
    }

    fn div(&mut self, instr: Instruction) {
        trace!("div {}, {}", REG[instr.rs()], REG[instr.rt()]);
        let (hi, lo) = divide(
            self.reg.word(instr.rs()) as i32,
            self.reg.word(instr.rt()) as i32,
        );
        self.hi0 = hi;
        self.lo0 = lo;
    }

    fn div1(&mut self, instr: Instruction) {
        trace!("div1 {}, {}", REG[instr.rs()], REG[instr.rt()]);
        let (hi, lo) = divide(
            self.reg.word(instr.rs()) as i32,
            self.reg.word(instr.rt()) as i32,
        );
        self.hi1 = hi;
        self.lo1 = lo;
    }

    fn divu(&mut self, instr: Instruction) {
        trace!("divu {}, {}", REG[instr.rs()], REG[instr.rt()]);
        let (hi, lo) = divide_unsigned(self.reg.word(instr.rs()), self.reg.word(instr.rt()));
        self.hi0 = hi;
        self.lo0 = lo;
    }

    fn divu1(&mut self, instr: Instruction) {
        trace!("divu1 {}, {}", REG[instr.rs()], REG[instr.rt()]);
        let (hi, lo) = divide_unsigned(self.reg.word(instr.rs()), self.reg.word(instr.rt()));
        self.hi1 = hi;
        self.lo1 = lo;
    }

    fn mfhi(&mut self, instr: Instruction) {
        trace!("mfhi {}", REG[instr.rd()]);
        self.reg.set_lo(instr.rd(), self.hi0);
    }

    fn mflo(&mut self, instr: Instruction) {
        trace!("mflo {}", REG[instr.rd()]);
        self.reg.set_lo(instr.rd(), self.lo0);
    }

    fn mfhi1(&mut self, instr: Instruction) {
        trace!("mfhi1 {}", REG[instr.rd()]);
        self.reg.set_lo(instr.rd(), self.hi1);
    }

    fn mflo1(&mut self, instr: Instruction) {
        trace!("mflo1 {}", REG[instr.rd()]);
        self.reg.set_lo(instr.rd(), self.lo1);
    }

    // 128-bit multimedia extensions.

    fn mmi(&mut self, instr: Instruction) {
        match instr.funct() {
            0x08 => warn!("unimplemented mmi0 opcode {:#04x}", instr.sa()),
            0x09 => match instr.sa() {
                0x12 => self.pand(instr),
                sa => warn!("unimplemented mmi2 opcode {sa:#04x}"),
            },
            0x10 => self.mfhi1(instr),
            0x12 => self.mflo1(instr),
            0x18 => self.mult1(instr),
            0x1a => self.div1(instr),
            0x1b => self.divu1(instr),
            0x28 => warn!("unimplemented mmi1 opcode {:#04x}", instr.sa()),
            0x29 => warn!("unimplemented mmi3 opcode {:#04x}", instr.sa()),
            funct => warn!("unimplemented mmi opcode {funct:#04x}"),
        }
    }

    fn pand(&mut self, instr: Instruction) {
        trace!("pand {}, {}, {}", REG[instr.rd()], REG[instr.rs()], REG[instr.rt()]);
        let result = self.reg.quad(instr.rs()).bits() & self.reg.quad(instr.rt()).bits();
        self.reg.set_quad(instr.rd(), Quadword::from_bits(result));
    }

    // Coprocessors.

    fn cop0(&mut self, instr: Instruction) {
        match (self.instr.word >> 21) & 0x1f {
            // MFC0: the narrowing write leaves the upper register bits.
            0x00 => {
                trace!("mfc0 {}, $r{}", REG[instr.rt()], instr.rd());
                let value = self.cop0.load(instr.rd());
                self.reg.set_word(instr.rt(), value);
            }
            0x04 => {
                trace!("mtc0 $r{}, {}", instr.rd(), REG[instr.rt()]);
                let value = self.reg.word(instr.rt());
                self.cop0.store(instr.rd(), value);
            }
            0x10 => match instr.funct() {
                0x02 => trace!("tlbwi"),
                funct => warn!("unimplemented cop0 tlb opcode {funct:#04x}"),
            },
            fmt => warn!("unimplemented cop0 opcode {fmt:#04x}"),
        }
    }

    fn cop2(&mut self, instr: Instruction) {
        match (self.instr.word >> 21) & 0x1f {
            0x01 => {
                trace!("qmfc2 {}, vf{:02}", REG[instr.rt()], instr.rd());
                let value = self.vu0.borrow().qmfc2(instr.rd());
                self.reg.set_quad(instr.rt(), Quadword::from_bits(value));
            }
            0x02 => {
                trace!("cfc2 {}, vi{:02}", REG[instr.rt()], instr.rd());
                let value = self.vu0.borrow().cfc2(instr.rd());
                self.reg.set_lo(instr.rt(), sext(value));
            }
            0x05 => {
                trace!("qmtc2 vf{:02}, {}", instr.rd(), REG[instr.rt()]);
                let value = self.reg.quad(instr.rt()).bits();
                self.vu0.borrow_mut().qmtc2(instr.rd(), value);
            }
            0x06 => {
                trace!("ctc2 vi{:02}, {}", instr.rd(), REG[instr.rt()]);
                let value = self.reg.word(instr.rt());
                self.vu0.borrow_mut().ctc2(instr.rd(), value);
            }
            0x10..=0x1f => self.vu0.borrow_mut().special1(self.instr.word),
            fmt => warn!("unimplemented cop2 opcode {fmt:#04x}"),
        }
    }

    // Loads and stores.

    /// Computes the effective address of a memory operand.
    fn vaddr(&self, instr: Instruction) -> Word {
        self.reg
            .word(instr.rs())
            .wrapping_add(i32::from(instr.simm()) as Word)
    }

    fn lb(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("lb {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        let value = self.read8(addr);
        self.reg.set_lo(instr.rt(), value as i8 as i64 as Dword);
    }

    fn lbu(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("lbu {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        let value = self.read8(addr);
        self.reg.set_lo(instr.rt(), Dword::from(value));
    }

    fn lh(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("lh {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x1 != 0 {
            self.exception(Exception::AddrErrorLoad);
            return;
        }
        let value = self.read16(addr);
        self.reg.set_lo(instr.rt(), value as i16 as i64 as Dword);
    }

    fn lhu(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("lhu {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x1 != 0 {
            self.exception(Exception::AddrErrorLoad);
            return;
        }
        let value = self.read16(addr);
        self.reg.set_lo(instr.rt(), Dword::from(value));
    }

    fn lw(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("lw {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x3 != 0 {
            self.exception(Exception::AddrErrorLoad);
            return;
        }
        let value = self.read32(addr);
        self.reg.set_lo(instr.rt(), sext(value));
    }

    fn lwu(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("lwu {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x3 != 0 {
            self.exception(Exception::AddrErrorLoad);
            return;
        }
        let value = self.read32(addr);
        self.reg.set_lo(instr.rt(), Dword::from(value));
    }

    fn ld(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("ld {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x7 != 0 {
            self.exception(Exception::AddrErrorLoad);
            return;
        }
        let value = self.read64(addr);
        self.reg.set_lo(instr.rt(), value);
    }

    fn lq(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("lq {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0xf != 0 {
            self.exception(Exception::AddrErrorLoad);
            return;
        }
        let value = self.read128(addr);
        self.reg.set_quad(instr.rt(), Quadword::from_bits(value));
    }

    fn sb(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("sb {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        let data = self.reg.word(instr.rt()) as u8;
        self.write8(addr, data);
    }

    fn sh(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("sh {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x1 != 0 {
            self.exception(Exception::AddrErrorStore);
            return;
        }
        let data = self.reg.word(instr.rt()) as u16;
        self.write16(addr, data);
    }

    fn sw(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("sw {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x3 != 0 {
            self.exception(Exception::AddrErrorStore);
            return;
        }
        let data = self.reg.word(instr.rt());
        self.write32(addr, data);
    }

    fn sd(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("sd {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0x7 != 0 {
            self.exception(Exception::AddrErrorStore);
            return;
        }
        let data = self.reg.lo(instr.rt());
        self.write64(addr, data);
    }

    fn sq(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("sq {}, {:#x}({})", REG[instr.rt()], instr.simm(), REG[instr.rs()]);
        if addr & 0xf != 0 {
            self.exception(Exception::AddrErrorStore);
            return;
        }
        let data = self.reg.quad(instr.rt()).bits();
        self.write128(addr, data);
    }

    fn swc1(&mut self, instr: Instruction) {
        let addr = self.vaddr(instr);
        trace!("swc1 $f{}, {:#x}({})", instr.rt(), instr.simm(), REG[instr.rs()]);
        if addr & 0x3 != 0 {
            self.exception(Exception::AddrErrorStore);
            return;
        }
        let data = self.cop1.load(instr.rt());
        self.write32(addr, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_decode_by_position() {
        // addiu $t0, $s1, -4
        let instr = Instruction(0x2628_fffc);
        assert_eq!(instr.opcode(), 0x09);
        assert_eq!(instr.rs(), 17);
        assert_eq!(instr.rt(), 8);
        assert_eq!(instr.simm(), -4);
        assert_eq!(instr.imm(), 0xfffc);

        // sll $v0, $a0, 3
        let instr = Instruction(0x0004_10c0);
        assert_eq!(instr.opcode(), 0);
        assert_eq!(instr.funct(), 0);
        assert_eq!(instr.rd(), 2);
        assert_eq!(instr.rt(), 4);
        assert_eq!(instr.sa(), 3);
    }

    #[test]
    fn division_edge_cases() {
        // Divide by zero leaves the dividend in HI.
        assert_eq!(divide(7, 0), (7, Dword::MAX));
        assert_eq!(divide(-7, 0), (sext(-7_i32 as Word), 1));
        // MIN / -1 wraps.
        assert_eq!(divide(i32::MIN, -1), (0, sext(0x8000_0000)));
        // Ordinary case.
        assert_eq!(divide(7, 2), (1, 3));

        assert_eq!(divide_unsigned(9, 0), (9, Dword::MAX));
        assert_eq!(divide_unsigned(9, 4), (1, 2));
    }

    #[test]
    fn sign_extension_widens_negative_words() {
        assert_eq!(sext(0x8000_0000), 0xffff_ffff_8000_0000);
        assert_eq!(sext(0x7fff_ffff), 0x7fff_ffff);
    }
}
