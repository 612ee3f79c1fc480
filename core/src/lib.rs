//! # Emotion Engine Core
//!
//! This library implements the core behaviour of the PlayStation 2's main
//! processor complex: the Emotion Engine interpreter and its coprocessors,
//! the system bus, the interrupt controller and timers, the DMA controller,
//! the GIF, and the register/memory models of the Graphics Synthesizer and
//! the Vector Units.

mod model;

pub mod parts;

pub use self::model::ps2;
pub use self::model::ps2::Ps2;
