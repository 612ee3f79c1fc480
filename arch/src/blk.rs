use crate::Shared;

/// Logical emulation block.
pub trait Block {
    /// Check if the block has work to perform.
    fn ready(&self) -> bool {
        true
    }

    /// Emulates a single cycle of the block.
    fn cycle(&mut self) {}

    /// Performs a reset on the block.
    ///
    /// Afterwards, the block should behave as if it has just been powered
    /// on.
    fn reset(&mut self) {}
}

impl<B: Block> Block for Shared<B> {
    fn ready(&self) -> bool {
        self.borrow().ready()
    }

    fn cycle(&mut self) {
        self.borrow_mut().cycle();
    }

    fn reset(&mut self) {
        self.borrow_mut().reset();
    }
}
