//! System-level scenarios.
//!
//! Small guest programs are assembled by hand, placed in main memory (or
//! the BIOS array), and stepped through the full console: CPU, bus, INTC,
//! DMAC, GIF, and GS all participate.

use emotion_arch::reg::Quadword;
use emotion_arch::{Dword, Qword, Word};

use super::Ps2;
use crate::parts::dmac::Chcr;
use crate::parts::gif::Tag;
use crate::parts::intc::Interrupt;

/// Base address used for test programs in main memory.
const PROG: Word = 0x0010_0000;

// Register numbers.
const ZERO: u32 = 0;
const AT: u32 = 1;
const V0: u32 = 2;
const V1: u32 = 3;
const T0: u32 = 8;
const T1: u32 = 9;
const T2: u32 = 10;
const S0: u32 = 16;
const S1: u32 = 17;

// Hand assembler.

fn itype(op: u32, rs: u32, rt: u32, imm: u16) -> Word {
    (op << 26) | (rs << 21) | (rt << 16) | Word::from(imm)
}

fn rtype(funct: u32, rs: u32, rt: u32, rd: u32, sa: u32) -> Word {
    (rs << 21) | (rt << 16) | (rd << 11) | (sa << 6) | funct
}

fn ori(rt: u32, rs: u32, imm: u16) -> Word {
    itype(0x0d, rs, rt, imm)
}

fn addiu(rt: u32, rs: u32, imm: i16) -> Word {
    itype(0x09, rs, rt, imm as u16)
}

fn lui(rt: u32, imm: u16) -> Word {
    itype(0x0f, 0, rt, imm)
}

fn beq(rs: u32, rt: u32, offset: i16) -> Word {
    itype(0x04, rs, rt, offset as u16)
}

fn lw(rt: u32, base: u32, offset: i16) -> Word {
    itype(0x23, base, rt, offset as u16)
}

fn sh(rt: u32, base: u32, offset: i16) -> Word {
    itype(0x29, base, rt, offset as u16)
}

fn lq(rt: u32, base: u32, offset: i16) -> Word {
    itype(0x1e, base, rt, offset as u16)
}

fn sq(rt: u32, base: u32, offset: i16) -> Word {
    itype(0x1f, base, rt, offset as u16)
}

/// Builds a console with `program` placed at [`PROG`] and the CPU pointed
/// at it.
fn boot(program: &[Word]) -> Ps2 {
    let mut ps2 = Ps2::new();
    {
        let mut bus = ps2.bus.borrow_mut();
        for (i, &word) in program.iter().enumerate() {
            bus.write32(PROG + 4 * i as Word, word);
        }
    }
    ps2.cpu.goto(PROG);
    ps2
}

fn step(ps2: &mut Ps2, count: usize) {
    for _ in 0..count {
        ps2.cpu.step();
    }
}

#[test]
fn zero_register_is_immutable() {
    // S1: ori $zero, $zero, 0xffff must be discarded.
    let mut ps2 = boot(&[ori(ZERO, ZERO, 0xffff)]);
    step(&mut ps2, 1);
    assert_eq!(ps2.cpu.reg.quad(0).bits(), 0);
}

#[test]
fn bios_reads_via_kseg1() {
    // S2: a word planted at BIOS offset 0 reads back through 0xbfc00000.
    let mut ps2 = Ps2::with_bios(&0xdead_beef_u32.to_le_bytes());
    {
        let mut bus = ps2.bus.borrow_mut();
        for (i, &word) in [lui(AT, 0xbfc0), lw(V0, AT, 0)].iter().enumerate() {
            bus.write32(PROG + 4 * i as Word, word);
        }
    }
    ps2.cpu.goto(PROG);
    step(&mut ps2, 2);
    assert_eq!(ps2.cpu.reg.lo(V0 as usize), 0xffff_ffff_dead_beef);
}

#[test]
fn taken_branch_runs_delay_slot_only() {
    // S3: the delay slot retires, the following instruction is skipped.
    let mut ps2 = boot(&[
        beq(ZERO, ZERO, 2),
        ori(T0, ZERO, 1),
        ori(T1, ZERO, 2),
        ori(T2, ZERO, 3),
    ]);
    step(&mut ps2, 3);
    assert_eq!(ps2.cpu.reg.lo(T0 as usize), 1, "delay slot must run");
    assert_eq!(ps2.cpu.reg.lo(T1 as usize), 0, "branch shadow must skip");
    assert_eq!(ps2.cpu.reg.lo(T2 as usize), 3, "branch target must run");
    assert_eq!(ps2.cpu.retire_pc(), PROG + 16);
}

#[test]
fn likely_branch_nullifies_untaken_delay_slot() {
    let mut ps2 = boot(&[
        ori(T2, ZERO, 1),
        itype(0x15, T2, ZERO, 2), // bnel $t2, $zero, +2 (taken)
        ori(T0, ZERO, 1),         // delay slot: runs
        ori(T1, ZERO, 2),         // skipped by the branch
        itype(0x14, T2, ZERO, 2), // beql $t2, $zero, +2 (not taken)
        ori(V0, ZERO, 5),         // nullified delay slot
        ori(V1, ZERO, 6),         // execution resumes here
    ]);
    step(&mut ps2, 6);
    assert_eq!(ps2.cpu.reg.lo(T0 as usize), 1);
    assert_eq!(ps2.cpu.reg.lo(T1 as usize), 0);
    assert_eq!(ps2.cpu.reg.lo(V0 as usize), 0, "nullified slot must not run");
    assert_eq!(ps2.cpu.reg.lo(V1 as usize), 6);
}

#[test]
fn sif0_dma_lands_a_qword() {
    // S4: four FIFO words arrive in RAM as one qword.
    let mut ps2 = Ps2::new();
    for word in [0xaa, 0xbb, 0xcc, 0xdd] {
        ps2.sif.borrow_mut().sif0.push_back(word);
    }
    {
        let mut bus = ps2.bus.borrow_mut();
        bus.write32(0x1000_f590, 0); // D_ENABLEW: run
        bus.write32(0x1000_c010, 0x0010_0000); // MADR
        bus.write32(0x1000_c020, 1); // QWC
        bus.write32(0x1000_c000, Chcr::new().with_running(true).into_bits());
    }
    ps2.dmac.borrow_mut().tick(4);

    let mut bus = ps2.bus.borrow_mut();
    assert_eq!(bus.read32(0x0010_0000), 0xaa);
    assert_eq!(bus.read32(0x0010_0004), 0xbb);
    assert_eq!(bus.read32(0x0010_0008), 0xcc);
    assert_eq!(bus.read32(0x0010_000c), 0xdd);
    assert_eq!(bus.read32(0x1000_c020), 0, "QWC must drain");
    assert_eq!(bus.read32(0x1000_c010), 0x0010_0010, "MADR must advance");
    assert!(!Chcr::from_bits(bus.read32(0x1000_c000)).running());
    assert_eq!(bus.read32(0x1000_e010) & (1 << 5), 1 << 5, "IRQ flag");
}

#[test]
fn gif_packed_prim_reaches_gs() {
    // S5: a PACKED tag with one PRIM descriptor sets the GS PRIM register.
    let mut ps2 = Ps2::new();
    let tag = Tag::new()
        .with_nloop(1)
        .with_eop(true)
        .with_nreg(1)
        .into_bits();
    {
        let mut bus = ps2.bus.borrow_mut();
        bus.write128(0x1000_6000, tag);
        bus.write128(0x1000_6000, 0x7);
    }
    ps2.gif.borrow_mut().tick(8);
    assert_eq!(ps2.gs.borrow().prim(), 7);
    // The FIFO drained, so the GIF is back to waiting for a tag.
    assert_eq!((ps2.bus.borrow_mut().read32(0x1000_3020) >> 24) & 0x1f, 0);
}

#[test]
fn intc_interrupt_vectors_the_ee() {
    // S6: a masked VB_ON interrupt vectors through 0x80000200.
    let mut ps2 = boot(&[0; 64]);
    {
        let status = &mut ps2.cpu.cop0.status;
        status.set_ie(true);
        status.set_eie(true);
        status.set_im0(true);
        status.set_exl(false);
        status.set_erl(false);
        status.set_bev(false);
    }
    ps2.bus
        .borrow_mut()
        .write32(0x1000_f010, 1 << Interrupt::VblankOn as Word);
    ps2.intc.borrow_mut().trigger(Interrupt::VblankOn);
    // Writing zero to INTC_STAT clears nothing.
    ps2.bus.borrow_mut().write32(0x1000_f000, 0);
    assert!(ps2.intc.borrow().pending());

    ps2.cpu.clock(32);

    let cpu = &ps2.cpu;
    assert_eq!(cpu.retire_pc(), 0x8000_0200, "vectored to the interrupt handler");
    assert_eq!(cpu.cop0.epc, PROG + 31 * 4, "EPC holds the interrupted pc");
    let cause = cpu.cop0.cause.borrow();
    assert_eq!(cause.exccode(), 0);
    assert!(cause.ip0_pending());
    assert!(cpu.cop0.status.exl());
}

#[test]
fn sq_lq_roundtrip_preserves_all_bits() {
    let pattern: Qword = 0x0123_4567_89ab_cdef_0f1e_2d3c_4b5a_6978;
    let mut ps2 = boot(&[sq(T1, T0, 0), lq(T2, T0, 0)]);
    ps2.cpu.reg.set_lo(T0 as usize, Dword::from(PROG + 0x100));
    ps2.cpu.reg.set_quad(T1 as usize, Quadword::from_bits(pattern));
    step(&mut ps2, 2);
    assert_eq!(ps2.cpu.reg.quad(T2 as usize).bits(), pattern);
}

#[test]
fn immediate_results_sign_extend() {
    let mut ps2 = boot(&[
        addiu(T0, ZERO, -0x8000),
        lui(T1, 0x8000),
        addiu(T2, ZERO, 0x7fff),
    ]);
    step(&mut ps2, 3);
    assert_eq!(ps2.cpu.reg.lo(T0 as usize), 0xffff_ffff_ffff_8000);
    assert_eq!(ps2.cpu.reg.lo(T1 as usize), 0xffff_ffff_8000_0000);
    assert_eq!(ps2.cpu.reg.lo(T2 as usize), 0x7fff);
}

#[test]
fn div_min_by_minus_one_wraps() {
    let mut ps2 = boot(&[
        lui(S0, 0x8000),          // $s0 = 0x80000000
        addiu(S1, ZERO, -1),      // $s1 = -1
        rtype(0x1a, S0, S1, 0, 0), // div $s0, $s1
        rtype(0x12, 0, 0, V0, 0), // mflo $v0
        rtype(0x10, 0, 0, V1, 0), // mfhi $v1
    ]);
    step(&mut ps2, 5);
    assert_eq!(ps2.cpu.reg.lo(V0 as usize), 0xffff_ffff_8000_0000);
    assert_eq!(ps2.cpu.reg.lo(V1 as usize), 0);
}

#[test]
fn divu_by_zero_saturates_lo() {
    let mut ps2 = boot(&[
        ori(S0, ZERO, 0x1234),
        rtype(0x1b, S0, ZERO, 0, 0), // divu $s0, $zero
        rtype(0x12, 0, 0, V0, 0),    // mflo $v0
        rtype(0x10, 0, 0, V1, 0),    // mfhi $v1
    ]);
    step(&mut ps2, 4);
    assert_eq!(ps2.cpu.reg.lo(V0 as usize), 0xffff_ffff_ffff_ffff);
    assert_eq!(ps2.cpu.reg.lo(V1 as usize), 0x1234);
}

#[test]
fn misaligned_store_raises_address_error() {
    let target = PROG + 0x200;
    let mut ps2 = boot(&[sh(T1, T0, 1)]);
    ps2.cpu.reg.set_lo(T0 as usize, Dword::from(target));
    ps2.cpu.reg.set_lo(T1 as usize, 0xbeef);
    ps2.cpu.cop0.status.set_bev(false);
    step(&mut ps2, 1);

    // The store was suppressed and the exception vectored.
    assert_eq!(ps2.bus.borrow_mut().read32(target), 0);
    assert_eq!(ps2.cpu.cop0.cause.borrow().exccode(), 5);
    assert_eq!(ps2.cpu.cop0.epc, PROG);
    assert_eq!(ps2.cpu.retire_pc(), 0x8000_0180);
}

#[test]
fn gif_dma_chain_uploads_an_image() {
    use crate::parts::dmac::DmaTag;

    let mut ps2 = Ps2::new();
    let packet = 0x2000;

    // A PACKED tag of four A+D writes sets up a 4x1 PSMCT32 host-to-local
    // transfer, then an IMAGE tag carries one qword of pixels.
    let ad = |addr: Qword, data: Qword| (addr << 64) | data;
    let qwords: [Qword; 7] = [
        Tag::new()
            .with_nloop(4)
            .with_nreg(1)
            .with_regs(0xe)
            .into_bits(),
        ad(0x50, 0x0001_0000_0000_0000), // BITBLTBUF: dest width 1 page
        ad(0x51, 0),                     // TRXPOS: origin
        ad(0x52, 0x0000_0001_0000_0004), // TRXREG: 4x1 pixels
        ad(0x53, 0),                     // TRXDIR: host -> local
        Tag::new()
            .with_nloop(1)
            .with_eop(true)
            .with_flg(2)
            .into_bits(),
        0x4444_4444_3333_3333_2222_2222_1111_1111,
    ];
    {
        let mut bus = ps2.bus.borrow_mut();
        for (i, &qword) in qwords.iter().enumerate() {
            bus.write128(packet + 16 * i as Word, qword);
        }
        // Source-chain program: one REFE block covering the whole packet.
        let tag = DmaTag::new()
            .with_qwords(7)
            .with_address(packet)
            .into_bits();
        bus.write128(0x1000, tag);

        bus.write32(0x1000_f590, 0); // D_ENABLEW: run
        bus.write32(0x1000_a030, 0x1000); // GIF TADR
        bus.write32(
            0x1000_a000,
            Chcr::new().with_running(true).with_mode(1).into_bits(),
        );
    }

    for _ in 0..4 {
        ps2.dmac.borrow_mut().tick(8);
        ps2.gif.borrow_mut().tick(8);
    }

    let gs = ps2.gs.borrow();
    assert_eq!(gs.page(0).read_psmct32(0, 0), 0x1111_1111);
    assert_eq!(gs.page(0).read_psmct32(1, 0), 0x2222_2222);
    assert_eq!(gs.page(0).read_psmct32(2, 0), 0x3333_3333);
    assert_eq!(gs.page(0).read_psmct32(3, 0), 0x4444_4444);
    assert_eq!(gs.trxdir, 3, "transfer must deactivate when complete");
}

#[test]
fn cop2_macro_pipeline_subtracts_vectors() {
    fn vec(x: f32, y: f32, z: f32, w: f32) -> Quadword {
        let mut q = Quadword::ZERO;
        q.set_float(0, x);
        q.set_float(1, y);
        q.set_float(2, z);
        q.set_float(3, w);
        q
    }

    let cop2 = 0x12 << 26;
    let mut ps2 = boot(&[
        cop2 | (0x05 << 21) | (T0 << 16) | (1 << 11), // qmtc2 vf1, $t0
        cop2 | (0x05 << 21) | (T1 << 16) | (2 << 11), // qmtc2 vf2, $t1
        // vsub.xyzw vf3, vf1, vf2
        cop2 | (0x1f << 21) | (2 << 16) | (1 << 11) | (3 << 6) | 0x2c,
        cop2 | (0x01 << 21) | (V0 << 16) | (3 << 11), // qmfc2 $v0, vf3
    ]);
    ps2.cpu.reg.set_quad(T0 as usize, vec(5.0, 4.0, 3.0, 2.0));
    ps2.cpu.reg.set_quad(T1 as usize, vec(1.0, 1.0, 1.0, 1.0));
    step(&mut ps2, 4);

    let result = ps2.cpu.reg.quad(V0 as usize);
    assert_eq!(result.float(0), 4.0);
    assert_eq!(result.float(1), 3.0);
    assert_eq!(result.float(2), 2.0);
    assert_eq!(result.float(3), 1.0);
    // The VU's own vf0 stayed pinned.
    assert_eq!(ps2.vu0.borrow().vf(0).float(3), 1.0);
}

#[test]
fn scratchpad_roundtrips_quadwords() {
    let pattern: Qword = 0xfeed_face_cafe_f00d_0123_4567_89ab_cdef;
    let mut ps2 = boot(&[
        lui(T0, 0x7000),
        sq(T1, T0, 0x10),
        lq(T2, T0, 0x10),
    ]);
    ps2.cpu.reg.set_quad(T1 as usize, Quadword::from_bits(pattern));
    step(&mut ps2, 3);
    assert_eq!(ps2.cpu.reg.quad(T2 as usize).bits(), pattern);
}

#[test]
fn frame_raises_vblank_interrupts() {
    let mut ps2 = boot(&[0; 16]);
    // Jam the CPU into a harmless spin inside RAM.
    ps2.frame();
    let stat = ps2.intc.borrow().read(0x1000_f000);
    assert_eq!(stat & (1 << Interrupt::VblankOn as Word), 1 << 2);
    assert_eq!(stat & (1 << Interrupt::VblankOff as Word), 1 << 3);
    assert_eq!(stat & (1 << Interrupt::Gs as Word), 1);
    assert!(!ps2.gs.borrow().csr.vsint());
    assert_eq!(ps2.frames(), 1);
}
