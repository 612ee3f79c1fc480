//! System bus.
//!
//! The EE emits 32-bit virtual addresses; the bus applies the KSEG segment
//! masks and dispatches by physical range to a memory region or an MMIO
//! block at any of the five access widths. Unmapped traffic is logged and
//! reads back as zero, matching how the BIOS probes absent hardware.

use emotion_arch::mem::Ram;
use emotion_arch::{Byte, Dword, Half, Qword, Shared, Word};
use log::{info, trace, warn};

use super::dmac::Dmac;
use super::gif::Gif;
use super::gs::Gs;
use super::intc::Intc;
use super::ipu::Ipu;
use super::sif::Sif;
use super::sio2::Sio2;
use super::timer::Timers;
use super::vif::Vif;
use super::vu::Vu;

/// Main memory length (32 MiB).
pub const RAM_LEN: usize = 0x0200_0000;
/// BIOS length (4 MiB).
pub const BIOS_LEN: usize = 0x0040_0000;
/// Scratchpad length (16 KiB).
pub const SPR_LEN: usize = 0x4000;
/// IOP memory length (2 MiB).
pub const IOP_RAM_LEN: usize = 0x0020_0000;

/// Virtual segment masks, indexed by the top three address bits.
///
/// | Segment | Mask |
/// |---------|------|
/// | KUSEG   | none |
/// | KSEG0   | strip the MSB |
/// | KSEG1   | strip the three MSBs |
/// | KSEG2   | none / strip the three MSBs |
#[rustfmt::skip]
const SEGMENT_MASKS: [Word; 8] = [
    0xffff_ffff, 0xffff_ffff, 0xffff_ffff, 0xffff_ffff,
    0x7fff_ffff,
    0x1fff_ffff,
    0xffff_ffff, 0x1fff_ffff,
];

/// System bus.
#[derive(Debug)]
pub struct Bus {
    /// BIOS ROM.
    bios: Ram,
    /// Main memory, shared with the DMAC.
    pub ram: Shared<Ram>,
    /// On-chip scratchpad.
    spr: Ram,
    /// IOP memory, mirrored into the EE's address space.
    iop_ram: Ram,

    // MMIO blocks.
    intc: Shared<Intc>,
    timers: Shared<Timers>,
    dmac: Shared<Dmac>,
    gif: Shared<Gif>,
    gs: Shared<Gs>,
    vu: [Shared<Vu>; 2],
    vif: [Shared<Vif>; 2],
    sif: Shared<Sif>,
    ipu: Shared<Ipu>,
    sio2: Shared<Sio2>,

    // RDRAM initialisation state machine.
    mch_ricm: Word,
    mch_drd: Word,
    rdram_sdevid: Byte,

    /// Guest console line buffer.
    console: Vec<u8>,
}

/// Handles to the blocks the bus routes to.
pub struct Blocks {
    pub intc: Shared<Intc>,
    pub timers: Shared<Timers>,
    pub dmac: Shared<Dmac>,
    pub gif: Shared<Gif>,
    pub gs: Shared<Gs>,
    pub vu: [Shared<Vu>; 2],
    pub vif: [Shared<Vif>; 2],
    pub sif: Shared<Sif>,
    pub ipu: Shared<Ipu>,
    pub sio2: Shared<Sio2>,
}

impl Bus {
    /// Constructs a new `Bus` over the given blocks.
    #[must_use]
    pub fn new(ram: Shared<Ram>, blocks: Blocks) -> Self {
        Self {
            bios: Ram::new(BIOS_LEN),
            ram,
            spr: Ram::new(SPR_LEN),
            iop_ram: Ram::new(IOP_RAM_LEN),
            intc: blocks.intc,
            timers: blocks.timers,
            dmac: blocks.dmac,
            gif: blocks.gif,
            gs: blocks.gs,
            vu: blocks.vu,
            vif: blocks.vif,
            sif: blocks.sif,
            ipu: blocks.ipu,
            sio2: blocks.sio2,
            mch_ricm: 0,
            mch_drd: 0,
            rdram_sdevid: 0,
            console: Vec::new(),
        }
    }

    /// Loads a BIOS image at offset zero of the ROM array.
    pub fn load_bios(&mut self, image: &[u8]) {
        self.bios.copy_from(0, image);
        info!("loaded {} bytes of BIOS", image.len().min(BIOS_LEN));
    }

    /// Applies the segment masks and the fixed translation exceptions.
    fn translate(addr: Word) -> Word {
        if (0x7000_0000..0x7000_4000).contains(&addr) {
            addr
        } else if (0x3010_0000..0x3200_0000).contains(&addr) {
            addr & 0x01ff_ffff
        } else {
            addr & SEGMENT_MASKS[(addr >> 29) as usize]
        }
    }

    fn unmapped_read(addr: Word, width: &str) -> Word {
        warn!("{width} read from unmapped address {addr:#010x}");
        0
    }

    fn unmapped_write(addr: Word, width: &str) {
        warn!("{width} write to unmapped address {addr:#010x}");
    }

    /// Reads a byte.
    pub fn read8(&mut self, addr: Word) -> Byte {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => self.ram.borrow().load(addr).unwrap_or_default(),
            0x1fc0_0000..0x2000_0000 => self.bios.load(addr - 0x1fc0_0000).unwrap_or_default(),
            0x7000_0000..0x7000_4000 => self.spr.load(addr - 0x7000_0000).unwrap_or_default(),
            // BIOS hardware probe.
            0x1f80_3204 => 0,
            _ => Self::unmapped_read(addr, "byte") as Byte,
        }
    }

    /// Reads a halfword.
    pub fn read16(&mut self, addr: Word) -> Half {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => self.ram.borrow().load(addr).unwrap_or_default(),
            0x1fc0_0000..0x2000_0000 => self.bios.load(addr - 0x1fc0_0000).unwrap_or_default(),
            0x7000_0000..0x7000_4000 => self.spr.load(addr - 0x7000_0000).unwrap_or_default(),
            0x1f80_3800 => 0xffff,
            _ => Self::unmapped_read(addr, "halfword") as Half,
        }
    }

    /// Reads a word.
    pub fn read32(&mut self, addr: Word) -> Word {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => self.ram.borrow().load(addr).unwrap_or_default(),
            0x1fc0_0000..0x2000_0000 => self.bios.load(addr - 0x1fc0_0000).unwrap_or_default(),
            0x7000_0000..0x7000_4000 => self.spr.load(addr - 0x7000_0000).unwrap_or_default(),
            0x1c00_0000..0x1c20_0000 => {
                self.iop_ram.load(addr - 0x1c00_0000).unwrap_or_default()
            }
            // Timers.
            0x1000_0000..0x1000_2000 => self.timers.borrow().read(addr),
            // IPU.
            0x1000_2000..0x1000_2040 => self.ipu.borrow().read(addr) as Word,
            // GIF registers.
            0x1000_3000..0x1000_30b0 => self.gif.borrow().read(addr),
            // VIF registers.
            0x1000_3800..0x1000_3c00 => self.vif[0].borrow().read(addr),
            0x1000_3c00..0x1000_4000 => self.vif[1].borrow().read(addr),
            // DMAC channels and globals.
            0x1000_8000..0x1000_e000 => self.dmac.borrow().read_channel(addr),
            0x1000_e000..0x1000_e060 => self.dmac.borrow().read_global(addr),
            0x1000_f520 => self.dmac.borrow().read_enabler(),
            // INTC.
            0x1000_f000 | 0x1000_f010 => self.intc.borrow().read(addr),
            // SIF.
            0x1000_f200..0x1000_f260 => self.sif.borrow().read(addr),
            // RDRAM controller probe.
            0x1000_f440 => self.read_mch(),
            0x1000_f130 | 0x1000_f400 | 0x1000_f410 | 0x1000_f430 => 0,
            // SIO2.
            0x1f80_8200..0x1f80_8280 => self.sio2.borrow().read(addr),
            0x1f80_141c => 0,
            // VU memories.
            0x1100_0000..0x1101_0000 => {
                let unit = usize::from(addr & 0x8000 != 0);
                self.vu[unit].borrow().read_mem(addr)
            }
            _ => Self::unmapped_read(addr, "word"),
        }
    }

    /// Reads a doubleword.
    pub fn read64(&mut self, addr: Word) -> Dword {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => self.ram.borrow().load(addr).unwrap_or_default(),
            0x1fc0_0000..0x2000_0000 => self.bios.load(addr - 0x1fc0_0000).unwrap_or_default(),
            0x7000_0000..0x7000_4000 => self.spr.load(addr - 0x7000_0000).unwrap_or_default(),
            0x1000_2000..0x1000_2040 => self.ipu.borrow().read(addr),
            0x1000_f000 | 0x1000_f010 => Dword::from(self.intc.borrow().read(addr)),
            // GS privileged registers.
            0x1200_0000..0x1200_1090 => self.gs.borrow().read_priv(addr),
            0x1100_0000..0x1101_0000 => {
                let unit = usize::from(addr & 0x8000 != 0);
                self.vu[unit].borrow().read_mem(addr)
            }
            _ => Self::unmapped_read(addr, "doubleword") as Dword,
        }
    }

    /// Reads a quadword.
    pub fn read128(&mut self, addr: Word) -> Qword {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => self.ram.borrow().load(addr).unwrap_or_default(),
            0x7000_0000..0x7000_4000 => self.spr.load(addr - 0x7000_0000).unwrap_or_default(),
            0x1100_0000..0x1101_0000 => {
                let unit = usize::from(addr & 0x8000 != 0);
                self.vu[unit].borrow().read_mem(addr)
            }
            _ => Self::unmapped_read(addr, "quadword") as Qword,
        }
    }

    /// Writes a byte.
    pub fn write8(&mut self, addr: Word, data: Byte) {
        let addr = Self::translate(addr);
        match addr {
            // Debug console.
            0x1000_f180 => self.console_out(data),
            0x0000_0000..0x0200_0000 => {
                let _ = self.ram.borrow_mut().store(addr, data);
            }
            0x7000_0000..0x7000_4000 => {
                let _ = self.spr.store(addr - 0x7000_0000, data);
            }
            // The BIOS keeps writable state in its top pages.
            0x1fff_8000..0x2000_0000 => {
                let _ = self.bios.store(addr - 0x1fc0_0000, data);
            }
            _ => Self::unmapped_write(addr, "byte"),
        }
    }

    /// Writes a halfword.
    pub fn write16(&mut self, addr: Word, data: Half) {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => {
                let _ = self.ram.borrow_mut().store(addr, data);
            }
            0x7000_0000..0x7000_4000 => {
                let _ = self.spr.store(addr - 0x7000_0000, data);
            }
            0x1f80_1470 | 0x1f80_1472 | 0x1a00_0008 => {}
            _ => Self::unmapped_write(addr, "halfword"),
        }
    }

    /// Writes a word.
    pub fn write32(&mut self, addr: Word, data: Word) {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => {
                let _ = self.ram.borrow_mut().store(addr, data);
            }
            0x7000_0000..0x7000_4000 => {
                let _ = self.spr.store(addr - 0x7000_0000, data);
            }
            0x1c00_0000..0x1c20_0000 => {
                let _ = self.iop_ram.store(addr - 0x1c00_0000, data);
            }
            0x1000_0000..0x1000_2000 => self.timers.borrow_mut().write(addr, data),
            0x1000_2000..0x1000_2040 => self.ipu.borrow_mut().write(addr, Dword::from(data)),
            0x1000_3000..0x1000_30b0 => self.gif.borrow_mut().write(addr, data),
            0x1000_3800..0x1000_3c00 => self.vif[0].borrow_mut().write(addr, data),
            0x1000_3c00..0x1000_4000 => self.vif[1].borrow_mut().write(addr, data),
            0x1000_8000..0x1000_e000 => self.dmac.borrow_mut().write_channel(addr, data),
            0x1000_e000..0x1000_e060 => self.dmac.borrow_mut().write_global(addr, data),
            0x1000_f590 => self.dmac.borrow_mut().write_enabler(data),
            0x1000_f000 | 0x1000_f010 => self.intc.borrow_mut().write(addr, data),
            0x1000_f200..0x1000_f260 => self.sif.borrow_mut().write(addr, data),
            0x1000_f430 => self.write_mch_ricm(data),
            0x1000_f440 => self.mch_drd = data,
            // Memory controller and bus arbiter setup: accepted, ignored.
            0x1000_f100 | 0x1000_f120 | 0x1000_f140 | 0x1000_f150 => {}
            0x1000_f400 | 0x1000_f410 | 0x1000_f420 | 0x1000_f450 | 0x1000_f460 => {}
            0x1000_f480 | 0x1000_f490 | 0x1000_f130 | 0x1000_f500 | 0x1000_f510 => {}
            0x1f80_141c => {}
            0x1f80_8200..0x1f80_8280 => self.sio2.borrow_mut().write(addr, data),
            0x1100_0000..0x1101_0000 => {
                let unit = usize::from(addr & 0x8000 != 0);
                self.vu[unit].borrow_mut().write_mem(addr, data);
            }
            _ => Self::unmapped_write(addr, "word"),
        }
    }

    /// Writes a doubleword.
    pub fn write64(&mut self, addr: Word, data: Dword) {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => {
                let _ = self.ram.borrow_mut().store(addr, data);
            }
            0x7000_0000..0x7000_4000 => {
                let _ = self.spr.store(addr - 0x7000_0000, data);
            }
            0x1200_0000..0x1200_1090 => self.gs.borrow_mut().write_priv(addr, data),
            0x1000_f000 | 0x1000_f010 => self.intc.borrow_mut().write(addr, data as Word),
            0x1000_2000..0x1000_2040 => self.ipu.borrow_mut().write(addr, data),
            0x1100_0000..0x1101_0000 => {
                let unit = usize::from(addr & 0x8000 != 0);
                self.vu[unit].borrow_mut().write_mem(addr, data);
            }
            _ => Self::unmapped_write(addr, "doubleword"),
        }
    }

    /// Writes a quadword.
    pub fn write128(&mut self, addr: Word, data: Qword) {
        let addr = Self::translate(addr);
        match addr {
            0x0000_0000..0x0200_0000 => {
                let _ = self.ram.borrow_mut().store(addr, data);
            }
            0x7000_0000..0x7000_4000 => {
                let _ = self.spr.store(addr - 0x7000_0000, data);
            }
            // GIF PATH3 FIFO; overflow is dropped here, the DMAC retries.
            0x1000_6000 => {
                if !self.gif.borrow_mut().write_path3(data) {
                    trace!("PATH3 fifo full, qword dropped");
                }
            }
            0x1000_4000 => {
                if !self.vif[0].borrow_mut().write_fifo(data) {
                    trace!("VIF0 fifo full, qword dropped");
                }
            }
            0x1000_5000 => {
                if !self.vif[1].borrow_mut().write_fifo(data) {
                    trace!("VIF1 fifo full, qword dropped");
                }
            }
            0x1000_7010 => self.ipu.borrow_mut().write_fifo(data),
            0x1100_0000..0x1101_0000 => {
                let unit = usize::from(addr & 0x8000 != 0);
                self.vu[unit].borrow_mut().write_mem(addr, data);
            }
            _ => Self::unmapped_write(addr, "quadword"),
        }
    }

    // IOP-side accessors, restricted to BIOS and IOP memory.

    pub fn iop_read8(&self, addr: Word) -> Byte {
        match addr {
            0x1fc0_0000..0x2000_0000 => self.bios.load(addr - 0x1fc0_0000).unwrap_or_default(),
            0x0000_0000..0x0020_0000 => self.iop_ram.load(addr).unwrap_or_default(),
            _ => Self::unmapped_read(addr, "iop byte") as Byte,
        }
    }

    pub fn iop_read32(&self, addr: Word) -> Word {
        match addr {
            0x1fc0_0000..0x2000_0000 => self.bios.load(addr - 0x1fc0_0000).unwrap_or_default(),
            0x0000_0000..0x0020_0000 => self.iop_ram.load(addr).unwrap_or_default(),
            _ => Self::unmapped_read(addr, "iop word"),
        }
    }

    pub fn iop_write32(&mut self, addr: Word, data: Word) {
        match addr {
            0x0000_0000..0x0020_0000 => {
                let _ = self.iop_ram.store(addr, data);
            }
            _ => Self::unmapped_write(addr, "iop word"),
        }
    }

    /// Answers the BIOS's RDRAM probe from `MCH_RICM`/`MCH_DRD`.
    fn read_mch(&mut self) -> Word {
        let sop = (self.mch_ricm >> 6) & 0xf;
        let sa = (self.mch_ricm >> 16) & 0xfff;
        if sop != 0 {
            return 0;
        }
        match sa {
            0x21 => {
                // Device id enumeration: two devices answer, then silence.
                if self.rdram_sdevid < 2 {
                    self.rdram_sdevid += 1;
                    0x1f
                } else {
                    0
                }
            }
            0x23 => 0x0d0d,
            0x24 => 0x0090,
            0x40 => self.mch_ricm & 0x1f,
            _ => 0,
        }
    }

    fn write_mch_ricm(&mut self, data: Word) {
        let sa = (data >> 16) & 0xfff;
        let sbc = (data >> 6) & 0xf;
        if sa == 0x21 && sbc == 0x1 && (self.mch_drd >> 7) & 0x1 == 0 {
            self.rdram_sdevid = 0;
        }
        self.mch_ricm = data & !0x8000_0000;
    }

    /// Buffers a guest console byte, flushing whole lines to the log.
    fn console_out(&mut self, data: Byte) {
        if data == b'\n' {
            let line = String::from_utf8_lossy(&self.console).into_owned();
            info!(target: "guest", "{line}");
            self.console.clear();
        } else {
            self.console.push(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::cpu::ee::cop0::Cause;

    fn bus() -> Bus {
        let ram = Shared::new(Ram::new(RAM_LEN));
        let cause = Shared::new(Cause::new());
        let gs = Shared::new(Gs::new());
        let gif = Shared::new(Gif::new(gs.clone()));
        let sif = Shared::new(Sif::new());
        let vif = [Shared::new(Vif::new(0)), Shared::new(Vif::new(1))];
        let intc = Shared::new(Intc::new(cause.clone()));
        let timers = Shared::new(Timers::new(intc.clone()));
        let dmac = Shared::new(Dmac::new(
            ram.clone(),
            gif.clone(),
            sif.clone(),
            vif.clone(),
            cause,
        ));
        Bus::new(
            ram,
            Blocks {
                intc,
                timers,
                dmac,
                gif,
                gs,
                vu: [Shared::new(Vu::new(0)), Shared::new(Vu::new(1))],
                vif,
                sif,
                ipu: Shared::new(Ipu::new()),
                sio2: Shared::new(Sio2::new()),
            },
        )
    }

    #[test]
    fn kseg_mirrors_reach_the_same_memory() {
        let mut bus = bus();
        bus.write32(0x0010_0000, 0xdead_beef);
        assert_eq!(bus.read32(0x0010_0000), 0xdead_beef);
        assert_eq!(bus.read32(0x8010_0000), 0xdead_beef);
        assert_eq!(bus.read32(0xa010_0000), 0xdead_beef);
    }

    #[test]
    fn bios_reads_through_kseg1() {
        let mut bus = bus();
        bus.load_bios(&[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(bus.read32(0xbfc0_0000), 0xdead_beef);
        assert_eq!(bus.read32(0x1fc0_0000), 0xdead_beef);
        assert_eq!(bus.read8(0xbfc0_0003), 0xde);
    }

    #[test]
    fn scratchpad_is_not_masked() {
        let mut bus = bus();
        bus.write128(0x7000_0000, 0x1122_3344_5566_7788_99aa_bbcc_ddee_ff00);
        assert_eq!(
            bus.read128(0x7000_0000),
            0x1122_3344_5566_7788_99aa_bbcc_ddee_ff00
        );
        assert_eq!(bus.read32(0x7000_0004), 0x99aa_bbcc);
    }

    #[test]
    fn unmapped_reads_return_zero() {
        let mut bus = bus();
        assert_eq!(bus.read32(0x1000_f800), 0);
        bus.write32(0x1000_f800, 0x1234);
        assert_eq!(bus.read32(0x1000_f800), 0);
    }

    #[test]
    fn mch_probe_answers_device_enumeration() {
        let mut bus = bus();
        // SA = 0x21: two devices answer 0x1f, then zero.
        bus.write32(0x1000_f430, 0x21 << 16);
        assert_eq!(bus.read32(0x1000_f440), 0x1f);
        assert_eq!(bus.read32(0x1000_f440), 0x1f);
        assert_eq!(bus.read32(0x1000_f440), 0);

        // SBC = 1 with MCH_DRD bit 7 clear resets the counter.
        bus.write32(0x1000_f430, (0x21 << 16) | (0x1 << 6));
        assert_eq!(bus.read32(0x1000_f440), 0x1f);

        bus.write32(0x1000_f430, 0x23 << 16);
        assert_eq!(bus.read32(0x1000_f440), 0x0d0d);
        bus.write32(0x1000_f430, 0x24 << 16);
        assert_eq!(bus.read32(0x1000_f440), 0x0090);
    }

    #[test]
    fn vu_memory_is_addressed_by_selector_bits() {
        let mut bus = bus();
        bus.write64(0x1100_0000, 0x1111);
        bus.write64(0x1100_4000, 0x2222);
        bus.write64(0x1100_8000, 0x3333);
        bus.write64(0x1100_c000, 0x4444);
        assert_eq!(bus.read128(0x1100_0000) as Dword, 0x1111);
        assert_eq!(bus.read128(0x1100_4000) as Dword, 0x2222);
        assert_eq!(bus.read128(0x1100_8000) as Dword, 0x3333);
        assert_eq!(bus.read128(0x1100_c000) as Dword, 0x4444);
    }

    #[test]
    fn path3_write_lands_in_gif_fifo() {
        let mut bus = bus();
        bus.write128(0x1000_6000, 0x42);
        assert_eq!((bus.read32(0x1000_3020) >> 24) & 0x1f, 1);
    }
}
