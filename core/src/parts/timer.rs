//! Hardware timers.
//!
//! Four counter channels clocked from the bus clock through a prescaler.
//! Each channel raises its INTC interrupt on compare match and/or counter
//! overflow, gated by the sticky flags in the mode register.

use bitfield_struct::bitfield;
use emotion_arch::{Shared, Word};
use log::{debug, trace};

use super::intc::{Interrupt, Intc};

/// Bus clock rate, in Hz.
const BUS_CLOCK: Word = 147_456_000;
/// NTSC horizontal blank rate, in Hz.
const HBLANK_NTSC: Word = 15_734;

/// Register offsets within a channel block.
///
/// | Offset | Name     | Description      |
/// |:------:|----------|------------------|
/// | `0x00` | Tn_COUNT | Counter value    |
/// | `0x10` | Tn_MODE  | Mode/status      |
/// | `0x20` | Tn_COMP  | Compare value    |
/// | `0x30` | Tn_HOLD  | Hold value       |
const COUNT: Word = 0;
const MODE: Word = 1;
const COMP: Word = 2;

/// Timer mode register.
#[bitfield(u32)]
pub struct Mode {
    /// Clock selection.
    #[bits(2)]
    pub clock: u8,
    /// Gate function enable.
    pub gate: bool,
    /// Gate selection.
    pub gate_select: bool,
    /// Gate mode.
    #[bits(2)]
    pub gate_mode: u8,
    /// Clear counter on compare match.
    pub clear_on_compare: bool,
    /// Count enable.
    pub enable: bool,
    /// Interrupt on compare match.
    pub compare_intr: bool,
    /// Interrupt on overflow.
    pub overflow_intr: bool,
    /// Compare match occurred.
    pub compare_flag: bool,
    /// Overflow occurred.
    pub overflow_flag: bool,
    #[bits(20)]
    __: u32,
}

/// A single timer channel.
#[derive(Clone, Copy, Debug, Default)]
struct Channel {
    counter: Word,
    mode: Mode,
    compare: Word,
    hold: Word,
    /// Prescale multiplier derived from the clock selection.
    ratio: Word,
}

/// Hardware timers.
#[derive(Debug)]
pub struct Timers {
    ch: [Channel; 4],
    intc: Shared<Intc>,
}

impl Timers {
    /// Constructs new `Timers` raising interrupts on the given controller.
    #[must_use]
    pub fn new(intc: Shared<Intc>) -> Self {
        Self {
            ch: [Channel {
                ratio: 1,
                ..Channel::default()
            }; 4],
            intc,
        }
    }

    /// Reads a timer register.
    #[must_use]
    pub fn read(&self, addr: Word) -> Word {
        let ch = &self.ch[((addr >> 11) & 0x3) as usize];
        match (addr >> 4) & 0xf {
            COUNT => ch.counter,
            MODE => ch.mode.into_bits(),
            COMP => ch.compare,
            _ => ch.hold,
        }
    }

    /// Writes a timer register.
    pub fn write(&mut self, addr: Word, mut data: Word) {
        let num = ((addr >> 11) & 0x3) as usize;
        let ch = &mut self.ch[num];
        let offset = (addr >> 4) & 0xf;
        if offset == MODE {
            ch.ratio = match data & 0x3 {
                0 => 1,
                1 => 16,
                2 => 256,
                _ => BUS_CLOCK / HBLANK_NTSC,
            };
            data &= 0x3ff;
        }
        trace!("timer {num}: write {data:#x} to register {offset}");
        match offset {
            COUNT => ch.counter = data,
            MODE => ch.mode = Mode::from_bits(data),
            COMP => ch.compare = data & 0xffff,
            _ => ch.hold = data,
        }
    }

    /// Advances every enabled channel by `cycles` bus cycles.
    pub fn tick(&mut self, cycles: Word) {
        for num in 0..self.ch.len() {
            let ch = &mut self.ch[num];
            if !ch.mode.enable() {
                continue;
            }

            let old = ch.counter;
            ch.counter = ch.counter.wrapping_add(cycles.wrapping_mul(ch.ratio));

            let int = Interrupt::try_from(Interrupt::Timer0 as Word + num as Word).ok();
            if ch.counter >= ch.compare && old < ch.compare {
                if ch.mode.compare_intr() && !ch.mode.compare_flag() {
                    ch.mode.set_compare_flag(true);
                    debug!("timer {num}: compare match");
                    if let Some(int) = int {
                        self.intc.borrow_mut().trigger(int);
                    }
                }
                let ch = &mut self.ch[num];
                if ch.mode.clear_on_compare() {
                    ch.counter = 0;
                }
            }

            let ch = &mut self.ch[num];
            if ch.counter > 0xffff {
                if ch.mode.overflow_intr() && !ch.mode.overflow_flag() {
                    ch.mode.set_overflow_flag(true);
                    debug!("timer {num}: overflow");
                    if let Some(int) = int {
                        self.intc.borrow_mut().trigger(int);
                    }
                }
                self.ch[num].counter -= 0xffff;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::cpu::ee::cop0::Cause;

    fn timers() -> (Timers, Shared<Intc>) {
        let intc = Shared::new(Intc::new(Shared::new(Cause::new())));
        (Timers::new(intc.clone()), intc)
    }

    #[test]
    fn disabled_channel_does_not_count() {
        let (mut timers, _) = timers();
        timers.tick(100);
        assert_eq!(timers.read(0x1000_0000), 0);
    }

    #[test]
    fn compare_match_latches_interrupt_once() {
        let (mut timers, intc) = timers();
        // Enable channel 1, compare interrupt, clear on compare.
        timers.write(0x1000_0820, 10);
        timers.write(0x1000_0810, Mode::new()
            .with_enable(true)
            .with_compare_intr(true)
            .with_clear_on_compare(true)
            .into_bits());
        // Enable the INTC mask for TIMER1 so the pin moves.
        intc.borrow_mut()
            .write(0x1000_f010, 1 << Interrupt::Timer1 as Word);

        timers.tick(10);
        assert!(intc.borrow().pending());
        assert_eq!(timers.read(0x1000_0800), 0);
        // Sticky flag prevents a second trigger.
        let mode = Mode::from_bits(timers.read(0x1000_0810));
        assert!(mode.compare_flag());
    }

    #[test]
    fn counter_wraps_past_overflow() {
        let (mut timers, intc) = timers();
        timers.write(0x1000_0010, Mode::new()
            .with_enable(true)
            .with_overflow_intr(true)
            .into_bits());
        timers.write(0x1000_0000, 0xfffe);
        intc.borrow_mut()
            .write(0x1000_f010, 1 << Interrupt::Timer0 as Word);

        timers.tick(3);
        let counter = timers.read(0x1000_0000);
        assert!(counter <= 3, "counter wrapped to {counter}");
        assert!(intc.borrow().pending());
        assert!(Mode::from_bits(timers.read(0x1000_0010)).overflow_flag());
    }

    #[test]
    fn prescale_ratio_multiplies_increment() {
        let (mut timers, _) = timers();
        timers.write(0x1000_0010, Mode::new().with_enable(true).with_clock(1).into_bits());
        timers.tick(2);
        assert_eq!(timers.read(0x1000_0000), 32);
    }
}
