//! Graphics Synthesizer.
//!
//! The GS here is a register machine, not a rasterizer: it accepts the
//! privileged register block mapped to the EE, the internal register file
//! written through the GIF, and the HWREG upload path that lands IMAGE
//! transfers in local memory. Completed primitives are collected off the
//! vertex queue and counted; handing them to a rasterizer back-end is out
//! of scope.

use bitfield_struct::bitfield;
use emotion_arch::fifo::Queue;
use emotion_arch::{Byte, Dword, Word};
use log::{debug, trace, warn};

use self::vram::{Page, PixelFormat, PAGE_COUNT};

pub mod vram;

/// Drawing primitive kind, from the low bits of PRIM.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Primitive {
    Point = 0,
    Line = 1,
    LineStrip = 2,
    Triangle = 3,
    TriangleStrip = 4,
    TriangleFan = 5,
    Sprite = 6,
    Reserved = 7,
}

impl Primitive {
    fn from_prim(prim: Dword) -> Self {
        match prim & 0x7 {
            0 => Self::Point,
            1 => Self::Line,
            2 => Self::LineStrip,
            3 => Self::Triangle,
            4 => Self::TriangleStrip,
            5 => Self::TriangleFan,
            6 => Self::Sprite,
            _ => Self::Reserved,
        }
    }
}

/// Control/status register.
#[bitfield(u64)]
pub struct Csr {
    /// SIGNAL event.
    pub signal: bool,
    /// FINISH event.
    pub finish: bool,
    /// Horizontal sync interrupt.
    pub hsint: bool,
    /// Vertical sync interrupt.
    pub vsint: bool,
    /// Rectangle-end interrupt.
    pub edwint: bool,
    #[bits(2)]
    __0: u8,
    #[bits(1)]
    __1: u8,
    /// Drawing flush.
    pub flush: bool,
    /// GS reset.
    pub reset: bool,
    #[bits(2)]
    __2: u8,
    /// Output field parity.
    pub nfield: bool,
    /// Current displayed field.
    pub field: bool,
    /// Host FIFO status.
    #[bits(2)]
    pub fifo: u8,
    /// Revision number.
    #[bits(8)]
    pub rev: u8,
    /// Chip id.
    #[bits(8)]
    pub id: u8,
    #[bits(32)]
    __3: u32,
}

/// Buffer setup for local transfers.
#[bitfield(u64)]
pub struct Bitbltbuf {
    /// Source base pointer, in 64-byte units.
    #[bits(14)]
    pub src_base: u16,
    #[bits(2)]
    __0: u8,
    /// Source width, in 64-pixel pages.
    #[bits(6)]
    pub src_width: u8,
    #[bits(2)]
    __1: u8,
    /// Source pixel format.
    #[bits(6)]
    pub src_format: u8,
    #[bits(2)]
    __2: u8,
    /// Destination base pointer, in 64-byte units.
    #[bits(14)]
    pub dst_base: u16,
    #[bits(2)]
    __3: u8,
    /// Destination width, in 64-pixel pages.
    #[bits(6)]
    pub dst_width: u8,
    #[bits(2)]
    __4: u8,
    /// Destination pixel format.
    #[bits(6)]
    pub dst_format: u8,
    #[bits(2)]
    __5: u8,
}

/// Transfer position register.
#[bitfield(u64)]
pub struct Trxpos {
    #[bits(11)]
    pub src_x: u16,
    #[bits(5)]
    __0: u8,
    #[bits(11)]
    pub src_y: u16,
    #[bits(5)]
    __1: u8,
    #[bits(11)]
    pub dst_x: u16,
    #[bits(5)]
    __2: u8,
    #[bits(11)]
    pub dst_y: u16,
    /// Pixel transmission order.
    #[bits(2)]
    pub dir: u8,
    #[bits(3)]
    __3: u8,
}

/// Transfer size register.
#[bitfield(u64)]
pub struct Trxreg {
    #[bits(12)]
    pub width: u16,
    #[bits(20)]
    __0: u32,
    #[bits(12)]
    pub height: u16,
    #[bits(20)]
    __1: u32,
}

/// Transfer directions selected by TRXDIR.
const TRX_HOST_LOCAL: Dword = 0;
const TRX_NONE: Dword = 3;

/// A vertex assembled from the register file.
#[derive(Clone, Copy, Debug, Default)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// Graphics Synthesizer.
#[derive(Debug)]
pub struct Gs {
    // Privileged registers.
    pub pmode: Dword,
    pub smode1: Dword,
    pub smode2: Dword,
    pub srfsh: Dword,
    pub synch1: Dword,
    pub synch2: Dword,
    pub syncv: Dword,
    pub dispfb1: Dword,
    pub display1: Dword,
    pub dispfb2: Dword,
    pub display2: Dword,
    pub extbuf: Dword,
    pub extdata: Dword,
    pub extwrite: Dword,
    pub bgcolor: Dword,
    pub csr: Csr,
    pub imr: Dword,
    pub busdir: Dword,
    pub siglblid: Dword,

    // Internal registers.
    prim: Dword,
    rgbaq: Dword,
    pub st: Dword,
    pub uv: Dword,
    pub xyz2: Dword,
    pub xyz3: Dword,
    pub xyzf2: Dword,
    pub xyzf3: Dword,
    pub tex0: [Dword; 2],
    pub tex1: [Dword; 2],
    pub tex2: [Dword; 2],
    pub clamp: [Dword; 2],
    pub fog: Dword,
    pub fogcol: Dword,
    pub xyoffset: [Dword; 2],
    pub prmodecont: Dword,
    pub prmode: Dword,
    pub texclut: Dword,
    pub scanmsk: Dword,
    pub miptbp1: [Dword; 2],
    pub miptbp2: [Dword; 2],
    pub texa: Dword,
    pub texflush: Dword,
    pub scissor: [Dword; 2],
    pub alpha: [Dword; 2],
    pub dimx: Dword,
    pub dthe: Dword,
    pub colclamp: Dword,
    pub test: [Dword; 2],
    pub pabe: Dword,
    pub fba: [Dword; 2],
    pub frame: [Dword; 2],
    pub zbuf: [Dword; 2],
    pub bitbltbuf: Bitbltbuf,
    pub trxpos: Trxpos,
    pub trxreg: Trxreg,
    pub trxdir: Dword,

    /// Vertex assembly queue.
    vqueue: Queue<Vertex, 3>,
    /// Local memory.
    vram: Vec<Page>,
    /// Pixels landed by the current IMAGE transfer.
    data_written: usize,
    /// Primitives completed since the last render.
    primitives: u64,
}

impl Default for Gs {
    fn default() -> Self {
        Self::new()
    }
}

impl Gs {
    /// Constructs a new `Gs`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pmode: 0,
            smode1: 0,
            smode2: 0,
            srfsh: 0,
            synch1: 0,
            synch2: 0,
            syncv: 0,
            dispfb1: 0,
            display1: 0,
            dispfb2: 0,
            display2: 0,
            extbuf: 0,
            extdata: 0,
            extwrite: 0,
            bgcolor: 0,
            csr: Csr::new(),
            imr: 0,
            busdir: 0,
            siglblid: 0,
            prim: 0,
            rgbaq: 0,
            st: 0,
            uv: 0,
            xyz2: 0,
            xyz3: 0,
            xyzf2: 0,
            xyzf3: 0,
            tex0: [0; 2],
            tex1: [0; 2],
            tex2: [0; 2],
            clamp: [0; 2],
            fog: 0,
            fogcol: 0,
            xyoffset: [0; 2],
            prmodecont: 0,
            prmode: 0,
            texclut: 0,
            scanmsk: 0,
            miptbp1: [0; 2],
            miptbp2: [0; 2],
            texa: 0,
            texflush: 0,
            scissor: [0; 2],
            alpha: [0; 2],
            dimx: 0,
            dthe: 0,
            colclamp: 0,
            test: [0; 2],
            pabe: 0,
            fba: [0; 2],
            frame: [0; 2],
            zbuf: [0; 2],
            bitbltbuf: Bitbltbuf::new(),
            trxpos: Trxpos::new(),
            trxreg: Trxreg::new(),
            trxdir: TRX_NONE,
            vqueue: Queue::new(),
            vram: vec![Page::default(); PAGE_COUNT],
            data_written: 0,
            primitives: 0,
        }
    }

    /// Gets the PRIM register.
    #[must_use]
    pub fn prim(&self) -> Dword {
        self.prim
    }

    /// Sets the PRIM register directly (GIFtag `pre` path).
    pub fn set_prim(&mut self, value: Dword) {
        self.prim = value;
    }

    /// Gets the RGBAQ register.
    #[must_use]
    pub fn rgbaq(&self) -> Dword {
        self.rgbaq
    }

    /// Resets the Q component of RGBAQ, as a new GIFtag does.
    pub fn reset_q(&mut self) {
        self.rgbaq = (self.rgbaq & 0xffff_ffff) | (Dword::from(1.0_f32.to_bits()) << 32);
    }

    /// Gets a page of local memory.
    #[must_use]
    pub fn page(&self, index: usize) -> &Page {
        &self.vram[index % PAGE_COUNT]
    }

    /// Reads a privileged register; only CSR and SIGLBLID are readable.
    #[must_use]
    pub fn read_priv(&self, addr: Word) -> Dword {
        match Self::priv_offset(addr) {
            15 => self.csr.into_bits(),
            18 => self.siglblid,
            offset => {
                warn!("read from unreadable privileged register {offset}");
                0
            }
        }
    }

    /// Writes a privileged register.
    pub fn write_priv(&mut self, addr: Word, data: Dword) {
        let offset = Self::priv_offset(addr);
        trace!("privileged write {data:#018x} to register {offset}");
        match offset {
            0 => self.pmode = data,
            1 => self.smode1 = data,
            2 => self.smode2 = data,
            3 => self.srfsh = data,
            4 => self.synch1 = data,
            5 => self.synch2 = data,
            6 => self.syncv = data,
            7 => self.dispfb1 = data,
            8 => self.display1 = data,
            9 => self.dispfb2 = data,
            10 => self.display2 = data,
            11 => self.extbuf = data,
            12 => self.extdata = data,
            13 => self.extwrite = data,
            14 => self.bgcolor = data,
            15 => {
                self.csr = Csr::from_bits(data);
                // Writing 1 to VSINT acknowledges the interrupt.
                if data & 0x8 != 0 {
                    self.csr.set_vsint(false);
                }
            }
            16 => self.imr = data,
            17 => self.busdir = data,
            _ => self.siglblid = data,
        }
    }

    /// Maps a privileged address onto a linear register index.
    ///
    /// The display block sits at `0x1200_0000` (15 registers, 16 bytes
    /// apart); CSR, IMR, BUSDIR, and SIGLBLID form a sparse second block at
    /// `0x1200_1000`.
    fn priv_offset(addr: Word) -> Word {
        let slot = (addr >> 4) & 0xff;
        if addr & 0xf000 == 0 {
            slot
        } else {
            match slot {
                0 => 15,
                1 => 16,
                4 => 17,
                _ => 18,
            }
        }
    }

    /// Writes an internal register through the GIF.
    pub fn write(&mut self, addr: Byte, data: Dword) {
        let context = (addr & 1) as usize;
        match addr {
            0x00 => self.prim = data,
            0x01 => self.rgbaq = data,
            0x02 => self.st = data,
            0x03 => self.uv = data,
            0x04 => {
                self.xyzf2 = data;
                self.submit_xyzf(data, true);
            }
            0x05 => {
                self.xyz2 = data;
                self.submit_xyz(data, true);
            }
            0x06 | 0x07 => self.tex0[context] = data,
            0x08 | 0x09 => self.clamp[context] = data,
            0x0a => self.fog = data,
            0x0c => {
                self.xyzf3 = data;
                self.submit_xyzf(data, false);
            }
            0x0d => {
                self.xyz3 = data;
                self.submit_xyz(data, false);
            }
            0x14 | 0x15 => self.tex1[context] = data,
            0x16 | 0x17 => self.tex2[context] = data,
            0x18 | 0x19 => self.xyoffset[context] = data,
            0x1a => self.prmodecont = data,
            0x1b => self.prmode = data,
            0x1c => self.texclut = data,
            0x22 => self.scanmsk = data,
            0x34 | 0x35 => self.miptbp1[context] = data,
            0x36 | 0x37 => self.miptbp2[context] = data,
            0x3b => self.texa = data,
            0x3d => self.fogcol = data,
            0x3f => self.texflush = data,
            0x40 | 0x41 => self.scissor[context] = data,
            0x42 | 0x43 => self.alpha[context] = data,
            0x44 => self.dimx = data,
            0x45 => self.dthe = data,
            0x46 => self.colclamp = data,
            0x47 | 0x48 => self.test[context] = data,
            0x49 => self.pabe = data,
            0x4a | 0x4b => self.fba[context] = data,
            0x4c | 0x4d => self.frame[context] = data,
            0x4e | 0x4f => self.zbuf[context] = data,
            0x50 => self.bitbltbuf = Bitbltbuf::from_bits(data),
            0x51 => self.trxpos = Trxpos::from_bits(data),
            0x52 => self.trxreg = Trxreg::from_bits(data),
            0x53 => {
                self.trxdir = data & 0x3;
                self.data_written = 0;
            }
            _ => warn!("write {data:#018x} to unknown register {addr:#04x}"),
        }
    }

    /// Accepts a HWREG doubleword during an IMAGE transfer.
    pub fn write_hwreg(&mut self, data: Dword) {
        if self.trxdir != TRX_HOST_LOCAL {
            warn!("HWREG write without a host-to-local transfer");
            return;
        }

        let width_in_pages = usize::from(self.bitbltbuf.dst_width()).max(1);
        let width_in_pixels = usize::from(self.trxreg.width());
        if width_in_pixels == 0 {
            warn!("HWREG write with a zero-width transfer window");
            return;
        }
        let base_page = usize::from(self.bitbltbuf.dst_base()) / vram::BLOCKS_PER_PAGE;

        match PixelFormat::from_bits(self.bitbltbuf.dst_format()) {
            PixelFormat::Psmct32 => {
                // Two packed 32-bit pixels per doubleword.
                for i in 0..2 {
                    let pixel = (data >> (32 * i)) as Word;
                    let x = self.data_written % width_in_pixels
                        + usize::from(self.trxpos.dst_x());
                    let y = self.data_written / width_in_pixels
                        + usize::from(self.trxpos.dst_y());
                    let page = base_page
                        + (x / Page::PIXEL_WIDTH) % width_in_pages
                        + (y / Page::PIXEL_HEIGHT) * width_in_pages;
                    self.vram[page % PAGE_COUNT].write_psmct32(x, y, pixel);
                    self.data_written += 1;
                }
            }
            PixelFormat::Psmct16 => {
                // Four packed 16-bit pixels per doubleword.
                for i in 0..4 {
                    let pixel = (data >> (16 * i)) as u16;
                    let x = self.data_written % width_in_pixels
                        + usize::from(self.trxpos.dst_x());
                    let y = self.data_written / width_in_pixels
                        + usize::from(self.trxpos.dst_y());
                    let page = base_page + (x / 64) % width_in_pages + (y / 64) * width_in_pages;
                    self.vram[page % PAGE_COUNT].write_psmct16(x, y, pixel);
                    self.data_written += 1;
                }
            }
            format => {
                warn!("unhandled transfer format {format:?}");
                return;
            }
        }

        // Deactivate TRXDIR once the window is filled.
        let total = usize::from(self.trxreg.width()) * usize::from(self.trxreg.height());
        if self.data_written >= total {
            debug!("IMAGE transfer of {total} pixels complete");
            self.data_written = 0;
            self.trxdir = TRX_NONE;
        }
    }

    /// Renders the accumulated frame.
    ///
    /// There is no rasterizer back-end; the vblank hand-off drains the
    /// primitive counter into the log.
    pub fn render(&mut self) {
        debug!("rendered frame with {} primitives", self.primitives);
        self.primitives = 0;
    }

    fn submit_xyzf(&mut self, data: Dword, draw_kick: bool) {
        let vertex = self.assemble(
            (data & 0xffff) as f32,
            ((data >> 16) & 0xffff) as f32,
            ((data >> 32) & 0xff_ffff) as f32,
        );
        self.process_vertex(vertex, draw_kick);
    }

    fn submit_xyz(&mut self, data: Dword, draw_kick: bool) {
        let vertex = self.assemble(
            (data & 0xffff) as f32,
            ((data >> 16) & 0xffff) as f32,
            ((data >> 32) & 0xffff_ffff) as f32,
        );
        self.process_vertex(vertex, draw_kick);
    }

    /// Converts a register-file vertex to window coordinates and colours.
    fn assemble(&self, x: f32, y: f32, z: f32) -> Vertex {
        let xyoffset = self.xyoffset[0];
        Vertex {
            x: (x - (xyoffset & 0xffff) as f32) / 16.0,
            y: (y - ((xyoffset >> 32) & 0xffff) as f32) / 16.0,
            z,
            r: (self.rgbaq & 0xff) as f32 / 255.0,
            g: ((self.rgbaq >> 8) & 0xff) as f32 / 255.0,
            b: ((self.rgbaq >> 16) & 0xff) as f32 / 255.0,
        }
    }

    /// Queues a vertex; enough vertices complete a primitive.
    fn process_vertex(&mut self, vertex: Vertex, draw_kick: bool) {
        if !self.vqueue.push(vertex) {
            // A full queue only happens on non-kicking writes; recycle the
            // oldest slot.
            let _ = self.vqueue.pop();
            self.vqueue.push(vertex);
        }

        if !draw_kick {
            return;
        }
        match (self.vqueue.len(), Primitive::from_prim(self.prim)) {
            (2, Primitive::Sprite) => {
                let v1 = self.vqueue.pop();
                let v2 = self.vqueue.pop();
                trace!("sprite kick: {v1:?} {v2:?}");
                self.primitives += 1;
            }
            (3, Primitive::Triangle) => {
                while self.vqueue.pop().is_some() {}
                self.primitives += 1;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_csr_and_siglblid_are_readable() {
        let mut gs = Gs::new();
        gs.write_priv(0x1200_0000, 0xffff);
        assert_eq!(gs.read_priv(0x1200_0000), 0);

        gs.write_priv(0x1200_1080, 0x1234);
        assert_eq!(gs.read_priv(0x1200_1080), 0x1234);
    }

    #[test]
    fn csr_write_acknowledges_vsync() {
        let mut gs = Gs::new();
        gs.csr.set_vsint(true);
        gs.write_priv(0x1200_1000, 0x8);
        assert!(!gs.csr.vsint());
    }

    #[test]
    fn image_transfer_lands_pixels_and_completes() {
        let mut gs = Gs::new();
        // 2x2 PSMCT32 window at the origin of page 0.
        gs.write(0x50, Bitbltbuf::new().with_dst_width(1).into_bits());
        gs.write(0x51, 0);
        gs.write(
            0x52,
            Trxreg::new().with_width(2).with_height(2).into_bits(),
        );
        gs.write(0x53, 0);

        gs.write_hwreg(0x1111_1111_0000_0000);
        gs.write_hwreg(0x3333_3333_2222_2222);

        assert_eq!(gs.page(0).read_psmct32(0, 0), 0x0000_0000);
        assert_eq!(gs.page(0).read_psmct32(1, 0), 0x1111_1111);
        assert_eq!(gs.page(0).read_psmct32(0, 1), 0x2222_2222);
        assert_eq!(gs.page(0).read_psmct32(1, 1), 0x3333_3333);
        // Transfer complete: TRXDIR deactivates, further writes warn.
        assert_eq!(gs.trxdir, TRX_NONE);
    }

    #[test]
    fn triangle_kick_counts_a_primitive() {
        let mut gs = Gs::new();
        gs.set_prim(Primitive::Triangle as Dword);
        for i in 0..3_u64 {
            gs.write(0x05, (i << 4) | (i << 20));
        }
        assert_eq!(gs.primitives, 1);
    }

    #[test]
    fn sprite_kick_needs_two_vertices() {
        let mut gs = Gs::new();
        gs.set_prim(Primitive::Sprite as Dword);
        gs.write(0x05, 0x10);
        assert_eq!(gs.primitives, 0);
        gs.write(0x05, 0x0020_0000_0000_0020);
        assert_eq!(gs.primitives, 1);
    }

    #[test]
    fn xyz3_never_kicks() {
        let mut gs = Gs::new();
        gs.set_prim(Primitive::Sprite as Dword);
        gs.write(0x0d, 0x10);
        gs.write(0x0d, 0x20);
        gs.write(0x0d, 0x30);
        assert_eq!(gs.primitives, 0);
    }
}
