//! SCPH-10000: PlayStation 2.
//!
//! The `Ps2` aggregate owns every block of the EE-side processor complex
//! and drives them in the fixed frame cadence: the EE runs a batch of
//! cycles, then the DMAC, VIFs, and GIF advance in proportion; at the
//! vblank boundary the GS latches its sync state and the INTC raises the
//! vertical blank interrupts.

use emotion_arch::mem::Ram;
use emotion_arch::{Shared, Word};
use log::debug;

use crate::parts::bus::{Blocks, Bus, RAM_LEN};
use crate::parts::cpu::ee::cop0::Cause;
use crate::parts::cpu::Cpu;
use crate::parts::dmac::Dmac;
use crate::parts::gif::Gif;
use crate::parts::gs::Gs;
use crate::parts::intc::{Interrupt, Intc};
use crate::parts::ipu::Ipu;
use crate::parts::sif::Sif;
use crate::parts::sio2::Sio2;
use crate::parts::timer::Timers;
use crate::parts::vif::Vif;
use crate::parts::vu::Vu;

#[cfg(test)]
mod tests;

/// EE cycles per NTSC frame.
pub const CYCLES_PER_FRAME: Word = 4_919_808;
/// EE cycle at which the vertical blank begins.
const VBLANK_START: Word = 4_498_432;
/// EE cycles per scheduler batch.
const BATCH: Word = 32;

/// PlayStation 2 console.
#[derive(Debug)]
pub struct Ps2 {
    /// Emotion Engine.
    pub cpu: Cpu,
    // Shared blocks.
    pub bus: Shared<Bus>,
    pub intc: Shared<Intc>,
    pub timers: Shared<Timers>,
    pub dmac: Shared<Dmac>,
    pub gif: Shared<Gif>,
    pub gs: Shared<Gs>,
    pub vu0: Shared<Vu>,
    pub vu1: Shared<Vu>,
    pub vif0: Shared<Vif>,
    pub vif1: Shared<Vif>,
    pub sif: Shared<Sif>,
    pub ipu: Shared<Ipu>,
    pub sio2: Shared<Sio2>,
    /// Frames completed since power-on.
    frame: u64,
}

impl Default for Ps2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Ps2 {
    /// Constructs a powered-on `Ps2` with an empty BIOS.
    #[must_use]
    pub fn new() -> Self {
        // The COP0 cause pins are shared by the interrupt sources.
        let cause = Shared::new(Cause::new());
        let ram = Shared::new(Ram::new(RAM_LEN));

        let gs = Shared::new(Gs::new());
        let gif = Shared::new(Gif::new(gs.clone()));
        let sif = Shared::new(Sif::new());
        let ipu = Shared::new(Ipu::new());
        let sio2 = Shared::new(Sio2::new());
        let vu0 = Shared::new(Vu::new(0));
        let vu1 = Shared::new(Vu::new(1));
        let vif0 = Shared::new(Vif::new(0));
        let vif1 = Shared::new(Vif::new(1));
        let intc = Shared::new(Intc::new(cause.clone()));
        let timers = Shared::new(Timers::new(intc.clone()));
        let dmac = Shared::new(Dmac::new(
            ram.clone(),
            gif.clone(),
            sif.clone(),
            [vif0.clone(), vif1.clone()],
            cause.clone(),
        ));
        let bus = Shared::new(Bus::new(
            ram,
            Blocks {
                intc: intc.clone(),
                timers: timers.clone(),
                dmac: dmac.clone(),
                gif: gif.clone(),
                gs: gs.clone(),
                vu: [vu0.clone(), vu1.clone()],
                vif: [vif0.clone(), vif1.clone()],
                sif: sif.clone(),
                ipu: ipu.clone(),
                sio2: sio2.clone(),
            },
        ));
        let cpu = Cpu::new(bus.clone(), timers.clone(), vu0.clone(), cause);

        Self {
            cpu,
            bus,
            intc,
            timers,
            dmac,
            gif,
            gs,
            vu0,
            vu1,
            vif0,
            vif1,
            sif,
            ipu,
            sio2,
            frame: 0,
        }
    }

    /// Constructs a `Ps2` with the given BIOS image loaded.
    #[must_use]
    pub fn with_bios(image: &[u8]) -> Self {
        let mut ps2 = Self::new();
        ps2.bus.borrow_mut().load_bios(image);
        // Refetch the reset vector now that the ROM has contents.
        ps2.cpu.goto(crate::parts::cpu::ee::RESET_VECTOR);
        ps2
    }

    /// Runs one frame of emulation.
    pub fn frame(&mut self) {
        let mut total = 0;
        let mut vblank = false;

        while total < CYCLES_PER_FRAME {
            self.cpu.clock(BATCH);

            self.dmac.borrow_mut().tick(BATCH / 2);
            self.vif0.borrow_mut().tick(BATCH / 2);
            self.vif1.borrow_mut().tick(BATCH / 2);
            self.gif.borrow_mut().tick(BATCH / 2);

            total += BATCH;

            if !vblank && total >= VBLANK_START {
                vblank = true;
                self.vblank_on();
            }
        }

        self.vblank_off();
        self.frame += 1;
    }

    /// Number of frames completed since power-on.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Enters the vertical blank: render, flip fields, raise interrupts.
    fn vblank_on(&mut self) {
        debug!("vblank start (frame {})", self.frame);
        let imr = {
            let mut gs = self.gs.borrow_mut();
            gs.csr.set_vsint(true);
            gs.render();
            let field = gs.csr.field();
            gs.csr.set_field(!field);
            gs.imr
        };

        let mut intc = self.intc.borrow_mut();
        if imr & 0x800 == 0 {
            intc.trigger(Interrupt::Gs);
        }
        intc.trigger(Interrupt::VblankOn);
    }

    /// Leaves the vertical blank.
    fn vblank_off(&mut self) {
        self.intc.borrow_mut().trigger(Interrupt::VblankOff);
        self.gs.borrow_mut().csr.set_vsint(false);
    }
}
