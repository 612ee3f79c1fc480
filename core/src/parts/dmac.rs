//! DMA controller.
//!
//! Ten channels move qwords between main memory and the peripheral FIFOs,
//! one qword per channel per tick cycle. Chain-mode channels interpret
//! 128-bit DMAtags fetched from memory (or, for SIF0, from the inbound SIF
//! FIFO). Back-pressure from a full FIFO leaves the channel untouched for
//! the cycle; completion latches the channel's interrupt flag in `D_STAT`
//! and may raise the EE's INT1 pin.

use bitfield_struct::bitfield;
use emotion_arch::mem::Ram;
use emotion_arch::{Qword, Shared, Word};
use log::{debug, trace, warn};

use super::cpu::ee::cop0::Cause;
use super::gif::Gif;
use super::sif::Sif;
use super::vif::Vif;

/// Channel indices.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
    Vif0 = 0,
    Vif1 = 1,
    Gif = 2,
    IpuFrom = 3,
    IpuTo = 4,
    Sif0 = 5,
    Sif1 = 6,
    Sif2 = 7,
    SprFrom = 8,
    SprTo = 9,
}

/// Source-chain tag identifiers.
const TAG_REFE: u8 = 0;
const TAG_CNT: u8 = 1;
const TAG_NEXT: u8 = 2;
const TAG_REF: u8 = 3;
const TAG_END: u8 = 7;

/// Channel control register.
#[bitfield(u32)]
pub struct Chcr {
    /// Transfer direction.
    pub direction: bool,
    #[bits(1)]
    __0: u8,
    /// Transfer mode: normal, chain, or interleave.
    #[bits(2)]
    pub mode: u8,
    /// Address stack pointer.
    #[bits(2)]
    pub asp: u8,
    /// Transfer DMAtags themselves.
    pub tte: bool,
    /// Enable tag interrupt bits.
    pub tie: bool,
    /// Channel busy/start.
    pub running: bool,
    #[bits(7)]
    __1: u8,
    /// Upper halfword of the most recent tag.
    #[bits(16)]
    pub tag: u16,
}

/// Interrupt status register.
#[bitfield(u32)]
pub struct Stat {
    /// Per-channel completion flags.
    #[bits(10)]
    pub channel_irq: u16,
    #[bits(3)]
    __0: u8,
    /// Stall interrupt flag.
    pub stall: bool,
    /// MFIFO empty flag.
    pub mfifo_empty: bool,
    /// Bus error flag.
    pub bus_error: bool,
    /// Per-channel interrupt masks.
    #[bits(10)]
    pub channel_irq_mask: u16,
    #[bits(3)]
    __1: u8,
    /// Stall interrupt mask.
    pub stall_mask: bool,
    /// MFIFO interrupt mask.
    pub mfifo_mask: bool,
    #[bits(1)]
    __2: u8,
}

/// Tag address register: a 30-bit qword-aligned address plus the memory
/// selector (main RAM or scratchpad).
#[bitfield(u32)]
pub struct TagAddr {
    #[bits(30)]
    pub address: u32,
    pub mem_select: bool,
    #[bits(1)]
    __: u8,
}

/// Source-chain DMAtag.
#[bitfield(u128)]
pub struct DmaTag {
    /// Qwords to transfer.
    #[bits(16)]
    pub qwords: u16,
    #[bits(10)]
    __0: u16,
    /// Transfer priority.
    #[bits(2)]
    pub priority: u8,
    /// Tag identifier.
    #[bits(3)]
    pub id: u8,
    /// Interrupt request.
    pub irq: bool,
    /// Operand address.
    #[bits(31)]
    pub address: u32,
    /// Operand memory selector.
    pub mem_select: bool,
    /// Opaque payload, transferred when TTE is set.
    #[bits(64)]
    pub data: u64,
}

/// Per-channel state.
#[derive(Clone, Copy, Debug, Default)]
struct ChannelState {
    control: Chcr,
    address: Word,
    qword_count: Word,
    tag_address: TagAddr,
    saved_tag_address: [TagAddr; 2],
    scratchpad_address: Word,
    end_transfer: bool,
}

/// DMA controller.
#[derive(Debug)]
pub struct Dmac {
    chan: [ChannelState; 10],
    // Global registers.
    ctrl: Word,
    stat: Stat,
    pcr: Word,
    sqwc: Word,
    rbsr: Word,
    rbor: Word,
    stadr: Word,
    enable: Word,
    // Shared peers.
    ram: Shared<Ram>,
    gif: Shared<Gif>,
    sif: Shared<Sif>,
    vif: [Shared<Vif>; 2],
    cause: Shared<Cause>,
}

impl Dmac {
    /// Constructs a new `Dmac` over the given peers.
    #[must_use]
    pub fn new(
        ram: Shared<Ram>,
        gif: Shared<Gif>,
        sif: Shared<Sif>,
        vif: [Shared<Vif>; 2],
        cause: Shared<Cause>,
    ) -> Self {
        Self {
            chan: [ChannelState::default(); 10],
            ctrl: 0,
            stat: Stat::new(),
            pcr: 0,
            sqwc: 0,
            rbsr: 0,
            rbor: 0,
            stadr: 0,
            enable: 0x1201,
            ram,
            gif,
            sif,
            vif,
            cause,
        }
    }

    /// Maps an MMIO address onto a channel index.
    fn channel(addr: Word) -> usize {
        match (addr >> 8) & 0xff {
            0x80 => 0,
            0x90 => 1,
            0xa0 => 2,
            0xb0 => 3,
            0xb4 => 4,
            0xc0 => 5,
            0xc4 => 6,
            0xc8 => 7,
            0xd0 => 8,
            _ => 9,
        }
    }

    /// Reads a channel register.
    #[must_use]
    pub fn read_channel(&self, addr: Word) -> Word {
        let ch = &self.chan[Self::channel(addr)];
        match (addr >> 4) & 0xf {
            0 => ch.control.into_bits(),
            1 => ch.address,
            2 => ch.qword_count,
            3 => ch.tag_address.into_bits(),
            4 => ch.saved_tag_address[0].into_bits(),
            5 => ch.saved_tag_address[1].into_bits(),
            8 => ch.scratchpad_address,
            _ => 0,
        }
    }

    /// Writes a channel register.
    pub fn write_channel(&mut self, addr: Word, mut data: Word) {
        let num = Self::channel(addr);
        let ch = &mut self.chan[num];
        let offset = (addr >> 4) & 0xf;
        if offset == 1 {
            // MADR is qword-aligned within the 32 MiB of main memory.
            data &= 0x01ff_fff0;
        }
        match offset {
            0 => ch.control = Chcr::from_bits(data),
            1 => ch.address = data,
            2 => ch.qword_count = data & 0xffff,
            3 => ch.tag_address = TagAddr::from_bits(data),
            4 => ch.saved_tag_address[0] = TagAddr::from_bits(data),
            5 => ch.saved_tag_address[1] = TagAddr::from_bits(data),
            8 => ch.scratchpad_address = data,
            _ => trace!("channel {num}: dropped write to register {offset}"),
        }

        if self.chan[num].control.running() {
            debug!("channel {num}: transfer started");
        }
    }

    /// Reads a global register.
    #[must_use]
    pub fn read_global(&self, addr: Word) -> Word {
        match (addr >> 4) & 0xf {
            0 => self.ctrl,
            1 => self.stat.into_bits(),
            2 => self.pcr,
            3 => self.sqwc,
            4 => self.rbsr,
            5 => self.rbor,
            _ => self.stadr,
        }
    }

    /// Writes a global register.
    ///
    /// `D_STAT` is special: the lower half is write-one-to-clear, the upper
    /// (mask) half write-one-to-toggle. The INT1 pin follows.
    pub fn write_global(&mut self, addr: Word, data: Word) {
        match (addr >> 4) & 0xf {
            0 => self.ctrl = data,
            1 => {
                let bits = self.stat.into_bits();
                let cleared = bits & 0xffff & !(data & 0xffff);
                let toggled = (bits >> 16) ^ (data >> 16);
                self.stat = Stat::from_bits(cleared | (toggled << 16));
                self.update_int1();
            }
            2 => self.pcr = data,
            3 => self.sqwc = data,
            4 => self.rbsr = data,
            5 => self.rbor = data,
            _ => self.stadr = data,
        }
    }

    /// Reads `D_ENABLER`.
    #[must_use]
    pub fn read_enabler(&self) -> Word {
        self.enable
    }

    /// Writes `D_ENABLEW`.
    pub fn write_enabler(&mut self, data: Word) {
        self.enable = data;
    }

    /// Advances every running channel by `cycles`.
    pub fn tick(&mut self, cycles: Word) {
        // Bit 16 of D_ENABLE suspends the whole controller.
        if self.enable & 0x10000 != 0 {
            return;
        }

        for _ in 0..cycles {
            for id in 0..self.chan.len() {
                if !self.chan[id].control.running() {
                    continue;
                }
                if self.chan[id].qword_count > 0 {
                    self.transfer(id);
                } else if self.chan[id].end_transfer {
                    self.finish(id);
                } else {
                    self.fetch_tag(id);
                }
            }
        }
    }

    /// Moves one qword on a channel, honouring FIFO back-pressure.
    fn transfer(&mut self, id: usize) {
        let address = self.chan[id].address;
        match id {
            id if id == Channel::Vif0 as usize || id == Channel::Vif1 as usize => {
                let qword = self.read_qword(address);
                if self.vif[id].borrow_mut().write_fifo(qword) {
                    self.advance(id);
                }
            }
            id if id == Channel::Gif as usize => {
                let qword = self.read_qword(address);
                if self.gif.borrow_mut().write_path3(qword) {
                    self.advance(id);
                }
            }
            id if id == Channel::Sif0 as usize => {
                let mut sif = self.sif.borrow_mut();
                if sif.sif0.len() >= 4 {
                    let mut qword: Qword = 0;
                    for lane in 0..4 {
                        let word = sif.sif0.pop_front().unwrap_or_default();
                        qword |= Qword::from(word) << (32 * lane);
                    }
                    drop(sif);
                    self.write_qword(address, qword);
                    self.advance(id);
                }
            }
            id if id == Channel::Sif1 as usize => {
                let qword = self.read_qword(address);
                let mut sif = self.sif.borrow_mut();
                for lane in 0..4 {
                    sif.sif1.push_back((qword >> (32 * lane)) as Word);
                }
                drop(sif);
                self.advance(id);
            }
            // IPU and scratchpad channels move no data.
            _ => {
                trace!("channel {id}: dropped qword at {address:#010x}");
                self.advance(id);
            }
        }
    }

    /// Books one transferred qword on a channel.
    fn advance(&mut self, id: usize) {
        let ch = &mut self.chan[id];
        ch.qword_count -= 1;
        ch.address = ch.address.wrapping_add(16);
        if ch.qword_count == 0 && ch.control.mode() == 0 {
            ch.end_transfer = true;
        }
    }

    /// Completes a channel and raises its interrupt.
    fn finish(&mut self, id: usize) {
        let ch = &mut self.chan[id];
        ch.end_transfer = false;
        ch.control.set_running(false);
        debug!("channel {id}: transfer complete");

        self.stat
            .set_channel_irq(self.stat.channel_irq() | (1 << id));
        self.update_int1();
    }

    /// Fetches and interprets the next source-chain tag.
    fn fetch_tag(&mut self, id: usize) {
        if id == Channel::Sif0 as usize {
            // SIF0 tags arrive as two words from the inbound FIFO.
            let mut sif = self.sif.borrow_mut();
            if sif.sif0.len() < 2 {
                return;
            }
            let lo = sif.sif0.pop_front().unwrap_or_default();
            let hi = sif.sif0.pop_front().unwrap_or_default();
            drop(sif);
            let tag = DmaTag::from_bits(Qword::from(lo) | (Qword::from(hi) << 32));

            let ch = &mut self.chan[id];
            ch.qword_count = Word::from(tag.qwords());
            ch.control.set_tag((tag.into_bits() >> 16) as u16);
            ch.address = tag.address();
            ch.tag_address
                .set_address(ch.tag_address.address().wrapping_add(16));
            if ch.control.tie() && tag.irq() {
                ch.end_transfer = true;
            }
            trace!("channel {id}: sif tag, qwc={}", tag.qwords());
            return;
        }

        let tag_address = self.chan[id].tag_address;
        let tag = DmaTag::from_bits(self.read_qword(tag_address.address()));

        let ch = &mut self.chan[id];
        ch.qword_count = Word::from(tag.qwords());
        ch.control.set_tag((tag.into_bits() >> 16) as u16);
        trace!(
            "channel {id}: tag id={} qwc={} addr={:#010x}",
            tag.id(),
            tag.qwords(),
            tag.address(),
        );

        match tag.id() {
            TAG_REFE => {
                ch.address = tag.address();
                ch.tag_address = TagAddr::from_bits(ch.tag_address.into_bits().wrapping_add(16));
                ch.end_transfer = true;
            }
            TAG_CNT => {
                ch.address = ch.tag_address.address().wrapping_add(16);
                ch.tag_address =
                    TagAddr::from_bits(ch.address.wrapping_add(ch.qword_count * 16));
            }
            TAG_NEXT => {
                ch.address = ch.tag_address.address().wrapping_add(16);
                ch.tag_address.set_address(tag.address());
            }
            TAG_REF => {
                ch.address = tag.address();
                ch.tag_address = TagAddr::from_bits(ch.tag_address.into_bits().wrapping_add(16));
            }
            TAG_END => {
                ch.address = ch.tag_address.address().wrapping_add(16);
                ch.end_transfer = true;
            }
            id => {
                warn!("unrecognized tag id {id}");
                ch.end_transfer = true;
            }
        }

        if ch.control.tie() && tag.irq() {
            ch.end_transfer = true;
        }
    }

    /// Recomputes the EE INT1 pin from the interrupt flags and masks.
    fn update_int1(&mut self) {
        let pending = self.stat.channel_irq() & self.stat.channel_irq_mask() != 0;
        self.cause.borrow_mut().set_ip1_pending(pending);
    }

    /// Reads a qword of main memory.
    fn read_qword(&self, addr: Word) -> Qword {
        self.ram
            .borrow()
            .load::<Qword>(addr & 0x01ff_fff0)
            .unwrap_or_default()
    }

    /// Writes a qword of main memory.
    fn write_qword(&mut self, addr: Word, data: Qword) {
        let _ = self.ram.borrow_mut().store::<Qword>(addr & 0x01ff_fff0, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::gs::Gs;

    fn dmac() -> (Dmac, Shared<Ram>, Shared<Sif>, Shared<Gif>, Shared<Cause>) {
        let ram = Shared::new(Ram::new(0x0200_0000));
        let gs = Shared::new(Gs::new());
        let gif = Shared::new(Gif::new(gs));
        let sif = Shared::new(Sif::new());
        let vif = [Shared::new(Vif::new(0)), Shared::new(Vif::new(1))];
        let cause = Shared::new(Cause::new());
        let dmac = Dmac::new(ram.clone(), gif.clone(), sif.clone(), vif, cause.clone());
        (dmac, ram, sif, gif, cause)
    }

    fn arm(dmac: &mut Dmac, base: Word, madr: Word, qwc: Word, chcr: Chcr) {
        dmac.write_channel(base | 0x10, madr);
        dmac.write_channel(base | 0x20, qwc);
        dmac.write_channel(base, chcr.into_bits());
    }

    #[test]
    fn enable_bit_suspends_all_channels() {
        let (mut dmac, _, sif, _, _) = dmac();
        for word in [0xaa, 0xbb, 0xcc, 0xdd] {
            sif.borrow_mut().sif0.push_back(word);
        }
        dmac.write_enabler(0x10000);
        arm(
            &mut dmac,
            0x1000_c000,
            0x0010_0000,
            1,
            Chcr::new().with_running(true),
        );
        dmac.tick(4);
        assert_eq!(dmac.read_channel(0x1000_c020), 1, "no progress expected");

        dmac.write_enabler(0);
        dmac.tick(4);
        assert_eq!(dmac.read_channel(0x1000_c020), 0);
    }

    #[test]
    fn sif0_qword_lands_in_ram() {
        let (mut dmac, ram, sif, _, _) = dmac();
        for word in [0xaa, 0xbb, 0xcc, 0xdd] {
            sif.borrow_mut().sif0.push_back(word);
        }
        dmac.write_enabler(0);
        arm(
            &mut dmac,
            0x1000_c000,
            0x0010_0000,
            1,
            Chcr::new().with_running(true),
        );
        dmac.tick(4);

        let ram = ram.borrow();
        assert_eq!(ram.load::<Word>(0x0010_0000).unwrap(), 0xaa);
        assert_eq!(ram.load::<Word>(0x0010_0004).unwrap(), 0xbb);
        assert_eq!(ram.load::<Word>(0x0010_0008).unwrap(), 0xcc);
        assert_eq!(ram.load::<Word>(0x0010_000c).unwrap(), 0xdd);
        assert_eq!(dmac.read_channel(0x1000_c020), 0);
        assert_eq!(dmac.read_channel(0x1000_c010), 0x0010_0010);
        assert!(!Chcr::from_bits(dmac.read_channel(0x1000_c000)).running());
        assert_eq!(dmac.stat.channel_irq() & (1 << 5), 1 << 5);
    }

    #[test]
    fn gif_channel_respects_fifo_backpressure() {
        let (mut dmac, ram, _, gif, _) = dmac();
        dmac.write_enabler(0);
        for i in 0..20_u32 {
            ram.borrow_mut()
                .store::<Qword>(0x0020_0000 + 16 * i, Qword::from(i))
                .unwrap();
        }
        arm(
            &mut dmac,
            0x1000_a000,
            0x0020_0000,
            20,
            Chcr::new().with_running(true),
        );
        // The GIF FIFO holds sixteen qwords; the rest must wait.
        dmac.tick(32);
        assert_eq!(dmac.read_channel(0x1000_a020), 4);

        // Draining the FIFO lets the channel finish.
        gif.borrow_mut().tick(16);
        dmac.tick(32);
        assert_eq!(dmac.read_channel(0x1000_a020), 0);
    }

    #[test]
    fn d_stat_write_clears_and_toggles() {
        let (mut dmac, _, _, _, cause) = dmac();
        dmac.stat.set_channel_irq(0b101);
        // Toggle the mask for channel 0 on, clearing nothing.
        dmac.write_global(0x1000_e010, 0b1 << 16);
        assert!(dmac.stat.channel_irq_mask() & 0b1 != 0);
        assert!(cause.borrow().ip1_pending());

        // Clear the channel 0 flag; the pin falls.
        dmac.write_global(0x1000_e010, 0b1);
        assert_eq!(dmac.stat.channel_irq(), 0b100);
        assert!(!cause.borrow().ip1_pending());
    }

    #[test]
    fn cnt_chain_walks_consecutive_blocks() {
        let (mut dmac, ram, _, _, _) = dmac();
        dmac.write_enabler(0);
        // CNT tag at 0x1000: two qwords follow the tag in place, then the
        // next tag; an END tag closes the chain with one more qword.
        {
            let mut ram = ram.borrow_mut();
            ram.store::<Qword>(
                0x1000,
                DmaTag::new().with_qwords(2).with_id(TAG_CNT).into_bits(),
            )
            .unwrap();
            ram.store::<Qword>(
                0x1030,
                DmaTag::new().with_qwords(1).with_id(TAG_END).into_bits(),
            )
            .unwrap();
        }

        dmac.write_channel(0x1000_a030, 0x1000);
        arm(
            &mut dmac,
            0x1000_a000,
            0,
            0,
            Chcr::new().with_running(true).with_mode(1),
        );

        // First tag: data at 0x1010, next tag at 0x1010 + 2 * 16 = 0x1030.
        dmac.tick(1);
        assert_eq!(dmac.read_channel(0x1000_a010), 0x1010);
        assert_eq!(dmac.read_channel(0x1000_a020), 2);
        assert_eq!(dmac.read_channel(0x1000_a030) & 0x3fff_ffff, 0x1030);

        // Drain the inline data and the closing END block.
        dmac.tick(16);
        assert!(!Chcr::from_bits(dmac.read_channel(0x1000_a000)).running());
    }

    #[test]
    fn next_tag_redirects_the_chain() {
        let (mut dmac, ram, _, _, _) = dmac();
        dmac.write_enabler(0);
        {
            let mut ram = ram.borrow_mut();
            // NEXT tag at 0x1000 with one inline qword, continuing at 0x3000.
            ram.store::<Qword>(
                0x1000,
                DmaTag::new()
                    .with_qwords(1)
                    .with_id(TAG_NEXT)
                    .with_address(0x3000)
                    .into_bits(),
            )
            .unwrap();
            ram.store::<Qword>(
                0x3000,
                DmaTag::new().with_qwords(0).with_id(TAG_END).into_bits(),
            )
            .unwrap();
        }

        dmac.write_channel(0x1000_a030, 0x1000);
        arm(
            &mut dmac,
            0x1000_a000,
            0,
            0,
            Chcr::new().with_running(true).with_mode(1),
        );

        dmac.tick(1);
        assert_eq!(dmac.read_channel(0x1000_a010), 0x1010);
        assert_eq!(dmac.read_channel(0x1000_a030) & 0x3fff_ffff, 0x3000);

        dmac.tick(8);
        assert!(!Chcr::from_bits(dmac.read_channel(0x1000_a000)).running());
        assert_eq!(dmac.stat.channel_irq() & (1 << 2), 1 << 2);
    }

    #[test]
    fn tag_irq_with_tie_ends_the_transfer() {
        let (mut dmac, ram, _, _, _) = dmac();
        dmac.write_enabler(0);
        ram.borrow_mut()
            .store::<Qword>(
                0x1000,
                DmaTag::new()
                    .with_qwords(1)
                    .with_id(TAG_CNT)
                    .with_irq(true)
                    .into_bits(),
            )
            .unwrap();

        dmac.write_channel(0x1000_a030, 0x1000);
        arm(
            &mut dmac,
            0x1000_a000,
            0,
            0,
            Chcr::new().with_running(true).with_mode(1).with_tie(true),
        );
        dmac.tick(4);
        assert!(!Chcr::from_bits(dmac.read_channel(0x1000_a000)).running());
    }

    #[test]
    fn refe_tag_runs_one_block_then_ends() {
        let (mut dmac, ram, _, _, _) = dmac();
        dmac.write_enabler(0);
        // REFE tag at 0x1000 pointing at one qword of payload at 0x2000.
        let tag = DmaTag::new()
            .with_qwords(1)
            .with_id(TAG_REFE)
            .with_address(0x2000);
        ram.borrow_mut()
            .store::<Qword>(0x1000, tag.into_bits())
            .unwrap();
        ram.borrow_mut()
            .store::<Qword>(0x2000, 0x1234_5678_9abc_def0)
            .unwrap();

        dmac.write_channel(0x1000_a030, 0x1000);
        arm(
            &mut dmac,
            0x1000_a000,
            0,
            0,
            Chcr::new().with_running(true).with_mode(1),
        );
        dmac.tick(4);
        assert!(!Chcr::from_bits(dmac.read_channel(0x1000_a000)).running());
        assert_eq!(dmac.stat.channel_irq() & (1 << 2), 1 << 2);
    }
}
