//! Floating-point coprocessor.
//!
//! Register state only: the EE's FPU keeps thirty-two single-precision
//! registers, an accumulator, and two control registers. The arithmetic
//! pipeline is exercised through `SWC1` stores of raw register bits.

use bitfield_struct::bitfield;
use emotion_arch::Word;

/// Implementation/revision register.
#[bitfield(u32)]
pub struct Fcr0 {
    /// Processor revision.
    #[bits(8)]
    pub revision: u8,
    /// Implementation id.
    #[bits(8)]
    pub implementation: u8,
    #[bits(16)]
    __: u16,
}

/// Control/status register.
#[bitfield(u32)]
pub struct Fcr31 {
    /// Rounding mode.
    #[bits(2)]
    pub round_mode: u8,
    /// Sticky flags.
    #[bits(5)]
    pub flags: u8,
    /// Exception enables.
    #[bits(5)]
    pub enables: u8,
    /// Cause bits.
    #[bits(6)]
    pub cause: u8,
    #[bits(5)]
    __0: u8,
    /// Comparison condition.
    pub condition: bool,
    /// Flush denormals to zero.
    pub flush_denormals: bool,
    #[bits(7)]
    __1: u8,
}

/// Floating-point coprocessor.
#[derive(Debug, Default)]
pub struct Cop1 {
    /// Register file, kept as raw bits.
    fpr: [Word; 32],
    /// Accumulator.
    pub acc: Word,
    /// Revision register.
    pub fcr0: Fcr0,
    /// Control register.
    pub fcr31: Fcr31,
}

impl Cop1 {
    /// Constructs a new `Cop1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a register's raw bits.
    #[must_use]
    pub fn load(&self, index: usize) -> Word {
        self.fpr[index]
    }

    /// Writes a register's raw bits.
    pub fn store(&mut self, index: usize, bits: Word) {
        self.fpr[index] = bits;
    }

    /// Reads a register as a float.
    #[must_use]
    pub fn float(&self, index: usize) -> f32 {
        f32::from_bits(self.fpr[index])
    }
}
