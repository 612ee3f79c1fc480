//! Vector Interface units.
//!
//! Each VIF fronts its Vector Unit with a bounded word FIFO fed by the EE
//! (128-bit MMIO stores) and by its DMA channel. Command interpretation —
//! unpacking, microprogram upload, and kicks — is out of scope; the tick
//! drains and drops queued words so producers never wedge on a full FIFO.

use bitfield_struct::bitfield;
use emotion_arch::fifo::Queue;
use emotion_arch::{Qword, Word};
use log::{debug, trace};

/// VIF status register.
#[bitfield(u32)]
pub struct Status {
    /// Pipeline status.
    #[bits(2)]
    pub vif_status: u8,
    /// Waiting for the end of a VU program.
    pub e_wait: bool,
    /// Waiting for the GIF.
    pub gif_wait: bool,
    #[bits(2)]
    __0: u8,
    /// MARK register written.
    pub mark: bool,
    /// Double buffer flag.
    pub double_buffer: bool,
    /// Stalled after STOP.
    pub stall_stop: bool,
    /// Stalled on interrupt.
    pub stall_intr: bool,
    /// Interrupt bit detected.
    pub intr: bool,
    /// DMAtag mismatch.
    pub tag_mismatch: bool,
    /// Invalid command.
    pub bad_command: bool,
    #[bits(10)]
    __1: u16,
    /// FIFO detection control.
    pub fifo_detect: bool,
    /// Quadwords in the FIFO.
    #[bits(5)]
    pub fifo_count: u8,
    #[bits(3)]
    __2: u8,
}

/// Vector Interface unit.
#[derive(Debug)]
pub struct Vif {
    /// Unit index (0 or 1).
    id: usize,
    /// Input FIFO.
    fifo: Queue<Word, 64>,
    /// Status register.
    status: Status,
}

impl Vif {
    /// Constructs the VIF with the given unit index.
    #[must_use]
    pub fn new(id: usize) -> Self {
        Self {
            id,
            fifo: Queue::new(),
            status: Status::new(),
        }
    }

    /// Pushes a qword into the FIFO, refusing when full.
    pub fn write_fifo(&mut self, data: Qword) -> bool {
        self.fifo.push_qword(data)
    }

    /// Reads a VIF register.
    #[must_use]
    pub fn read(&self, addr: Word) -> Word {
        match (addr >> 4) & 0xf {
            0 => self
                .status
                .with_fifo_count(self.fifo.qwords() as u8)
                .into_bits(),
            _ => 0,
        }
    }

    /// Writes a VIF register.
    pub fn write(&mut self, addr: Word, data: Word) {
        match (addr >> 4) & 0xf {
            0 => self.status.set_fifo_detect(data & 0x80_0000 != 0),
            1 => {
                // VIF_FBRST: bit 0 resets the unit.
                if data & 0x1 != 0 {
                    self.reset();
                }
            }
            offset => trace!("vif{}: dropped write to register {offset}", self.id),
        }
    }

    /// Drains up to `cycles` words from the FIFO.
    pub fn tick(&mut self, cycles: Word) {
        let mut budget = cycles * 4;
        while budget > 0 {
            let Some(word) = self.fifo.pop() else { break };
            trace!("vif{}: dropped code word {word:#010x}", self.id);
            budget -= 1;
        }
    }

    /// Resets the unit.
    pub fn reset(&mut self) {
        debug!("vif{}: reset", self.id);
        self.status = Status::new();
        self.fifo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_count_appears_in_status() {
        let mut vif = Vif::new(0);
        assert!(vif.write_fifo(0x1));
        assert!(vif.write_fifo(0x2));
        let status = Status::from_bits(vif.read(0x1000_3800));
        assert_eq!(status.fifo_count(), 2);
    }

    #[test]
    fn full_fifo_refuses_qword() {
        let mut vif = Vif::new(1);
        for i in 0..16 {
            assert!(vif.write_fifo(i));
        }
        assert!(!vif.write_fifo(16));
        vif.tick(1);
        assert!(vif.write_fifo(16));
    }

    #[test]
    fn fbrst_reset_clears_fifo() {
        let mut vif = Vif::new(0);
        assert!(vif.write_fifo(0xabcd));
        vif.write(0x1000_3810, 0x1);
        assert_eq!(Status::from_bits(vif.read(0x1000_3800)).fifo_count(), 0);
    }
}
