//! Image Processing Unit stub.
//!
//! Only the register and FIFO surfaces exist; MPEG macroblock decoding is
//! out of scope. Commands are accepted and answered with a zero result so
//! that BIOS probing terminates.

use emotion_arch::{Dword, Qword, Word};
use log::{trace, warn};

/// Image Processing Unit.
#[derive(Debug, Default)]
pub struct Ipu {
    /// `IPU_CTRL` register.
    control: Dword,
    /// Last accepted command word.
    command: Word,
}

impl Ipu {
    /// Constructs a new `Ipu`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads an IPU register.
    #[must_use]
    pub fn read(&self, addr: Word) -> Dword {
        match (addr >> 4) & 0xf {
            // IPU_CMD: result of the last command, always idle here.
            0 => {
                trace!("result read for command {:#010x}", self.command);
                0
            }
            1 => self.control,
            _ => 0,
        }
    }

    /// Writes an IPU register.
    pub fn write(&mut self, addr: Word, data: Dword) {
        match (addr >> 4) & 0xf {
            0 => {
                self.command = data as Word;
                warn!("unhandled command {:#x}", (self.command >> 28) & 0xf);
            }
            1 => self.control = data,
            _ => trace!("dropped write {data:#x}"),
        }
    }

    /// Accepts a qword on the input FIFO.
    pub fn write_fifo(&mut self, data: Qword) {
        trace!("dropped fifo qword {data:#034x}");
    }
}
