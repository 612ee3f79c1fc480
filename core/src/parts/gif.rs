//! Graphics Interface.
//!
//! The GIF sits between the DMAC's PATH3 channel and the GS. Qwords arrive
//! in a bounded FIFO; the consumer alternates between reading a GIFtag and
//! streaming that tag's payload, unpacking PACKED register descriptors or
//! forwarding IMAGE data to HWREG.

use bitfield_struct::bitfield;
use emotion_arch::fifo::Queue;
use emotion_arch::{Byte, Dword, Qword, Shared, Word};
use log::{debug, trace, warn};

use super::gs::Gs;

/// GIF transfer header.
#[bitfield(u128)]
pub struct Tag {
    /// Loop count.
    #[bits(15)]
    pub nloop: u16,
    /// End of packet.
    pub eop: bool,
    #[bits(30)]
    __0: u32,
    /// PRIM field is valid.
    pub pre: bool,
    /// PRIM register value.
    #[bits(11)]
    pub prim: u16,
    /// Data format.
    #[bits(2)]
    pub flg: u8,
    /// Register descriptors per loop.
    #[bits(4)]
    pub nreg: u8,
    /// Register descriptor list.
    #[bits(64)]
    pub regs: u64,
}

/// Data formats declared by a GIFtag.
const FLG_PACKED: u8 = 0;
const FLG_REGLIST: u8 = 1;
const FLG_IMAGE: u8 = 2;

/// PACKED register descriptors.
const DESC_PRIM: u64 = 0x0;
const DESC_RGBAQ: u64 = 0x1;
const DESC_ST: u64 = 0x2;
const DESC_XYZF2: u64 = 0x4;
const DESC_XYZ2: u64 = 0x5;
const DESC_XYZF3: u64 = 0xc;
const DESC_XYZ3: u64 = 0xd;
const DESC_AD: u64 = 0xe;
const DESC_NOP: u64 = 0xf;

/// Graphics Interface.
#[derive(Debug)]
pub struct Gif {
    /// Control register.
    pub control: Word,
    /// Mode register.
    pub mode: Word,
    /// PATH3 input FIFO (sixteen qwords).
    fifo: Queue<Word, 64>,
    /// Active transfer header.
    tag: Tag,
    /// Loops left in the active transfer.
    data_count: Word,
    /// Registers left in the current loop.
    reg_count: Word,
    /// Q value latched by the last ST descriptor.
    q: Word,
    /// Output target.
    gs: Shared<Gs>,
}

impl Gif {
    /// Constructs a new `Gif` feeding the given GS.
    #[must_use]
    pub fn new(gs: Shared<Gs>) -> Self {
        Self {
            control: 0,
            mode: 0,
            fifo: Queue::new(),
            tag: Tag::new(),
            data_count: 0,
            reg_count: 0,
            q: 0,
            gs,
        }
    }

    /// Reads a GIF register.
    #[must_use]
    pub fn read(&self, addr: Word) -> Word {
        match (addr >> 4) & 0xf {
            // GIF_STAT: report the FIFO level in qwords.
            2 => (self.fifo.qwords() as Word) << 24,
            offset => {
                warn!("read from unhandled register {offset}");
                0
            }
        }
    }

    /// Writes a GIF register.
    pub fn write(&mut self, addr: Word, data: Word) {
        match (addr >> 4) & 0xf {
            0 => {
                self.control = data;
                if data & 0x1 != 0 {
                    self.reset();
                }
            }
            1 => self.mode = data,
            offset => warn!("write {data:#010x} to unhandled register {offset}"),
        }
    }

    /// Accepts a qword on PATH3, refusing when the FIFO is full.
    pub fn write_path3(&mut self, data: Qword) -> bool {
        self.fifo.push_qword(data)
    }

    /// Consumes up to `cycles` qwords from the FIFO.
    pub fn tick(&mut self, cycles: Word) {
        for _ in 0..cycles {
            if self.fifo.is_empty() {
                break;
            }
            if self.data_count == 0 {
                self.process_tag();
            } else {
                self.execute();
            }
        }
    }

    /// Resets the interface.
    pub fn reset(&mut self) {
        debug!("reset");
        self.control = 0;
        self.mode = 0;
        self.fifo.clear();
        self.tag = Tag::new();
        self.data_count = 0;
        self.reg_count = 0;
        self.q = 0;
    }

    /// Loads the next GIFtag from the FIFO.
    fn process_tag(&mut self) {
        let Some(qword) = self.fifo.pop_qword() else {
            return;
        };
        self.tag = Tag::from_bits(qword);
        self.data_count = Word::from(self.tag.nloop());
        self.reg_count = Self::nreg(&self.tag);
        trace!(
            "tag: nloop={} eop={} flg={} nreg={}",
            self.tag.nloop(),
            self.tag.eop(),
            self.tag.flg(),
            self.tag.nreg(),
        );

        let mut gs = self.gs.borrow_mut();
        if self.tag.pre() {
            gs.set_prim(Dword::from(self.tag.prim()));
        }
        gs.reset_q();
    }

    /// Streams one qword of the active transfer.
    fn execute(&mut self) {
        match self.tag.flg() {
            FLG_PACKED => {
                let Some(qword) = self.fifo.pop_qword() else {
                    return;
                };
                self.process_packed(qword);
                self.reg_count -= 1;
                if self.reg_count == 0 {
                    self.data_count -= 1;
                    self.reg_count = Self::nreg(&self.tag);
                }
            }
            FLG_IMAGE => {
                let Some(qword) = self.fifo.pop_qword() else {
                    return;
                };
                let mut gs = self.gs.borrow_mut();
                gs.write_hwreg(qword as Dword);
                gs.write_hwreg((qword >> 64) as Dword);
                self.data_count -= 1;
            }
            // REGLIST and DISABLE payloads are accepted and dropped.
            flg => {
                let Some(qword) = self.fifo.pop_qword() else {
                    return;
                };
                trace!("dropped qword {qword:#034x} (flg={flg})");
                if flg == FLG_REGLIST {
                    self.data_count -= 1;
                } else {
                    self.data_count = 0;
                }
            }
        }
    }

    /// Unpacks one PACKED qword into a GS register write.
    fn process_packed(&mut self, qword: Qword) {
        let curr = Self::nreg(&self.tag) - self.reg_count;
        let desc = (self.tag.regs() >> (4 * curr)) & 0xf;

        let mut gs = self.gs.borrow_mut();
        match desc {
            DESC_PRIM => gs.write(0x00, (qword & 0x7ff) as Dword),
            DESC_RGBAQ => {
                let r = qword & 0xff;
                let g = (qword >> 32) & 0xff;
                let b = (qword >> 64) & 0xff;
                let a = (qword >> 96) & 0xff;
                let value = (r | (g << 8) | (b << 16) | (a << 24)) as Dword
                    | (Dword::from(self.q) << 32);
                gs.write(0x01, value);
            }
            DESC_ST => {
                gs.write(0x02, qword as Dword);
                self.q = (qword >> 64) as Word;
            }
            DESC_XYZF2 | DESC_XYZF3 => {
                let disable = desc == DESC_XYZF3 || (qword >> 111) & 0x1 != 0;
                let x = qword & 0xffff;
                let y = (qword >> 32) & 0xffff;
                let z = (qword >> 68) & 0xff_ffff;
                let f = (qword >> 100) & 0xff;
                let value = (x | (y << 16) | (z << 32) | (f << 56)) as Dword;
                gs.write(if disable { 0x0c } else { 0x04 }, value);
            }
            DESC_XYZ2 | DESC_XYZ3 => {
                let disable = desc == DESC_XYZ3 || (qword >> 111) & 0x1 != 0;
                let x = qword & 0xffff;
                let y = (qword >> 32) & 0xffff;
                let z = (qword >> 64) & 0xffff_ffff;
                let value = (x | (y << 16) | (z << 32)) as Dword;
                gs.write(if disable { 0x0d } else { 0x05 }, value);
            }
            DESC_AD => {
                let data = qword as Dword;
                let addr = ((qword >> 64) & 0xff) as Byte;
                gs.write(addr, data);
            }
            DESC_NOP => {}
            _ => warn!("unknown register descriptor {desc:#x}"),
        }
    }

    /// Registers per loop; an `nreg` of zero encodes sixteen.
    fn nreg(tag: &Tag) -> Word {
        match tag.nreg() {
            0 => 16,
            nreg => Word::from(nreg),
        }
    }
}
