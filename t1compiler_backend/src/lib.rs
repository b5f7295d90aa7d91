//! Pulse-pattern compiler backend for a tick-based pulse sequencer.
//!
//! This crate translates symbolic, channel-oriented pulse descriptions
//! ([`Sequence`]s of [`Block`]s holding [`ChannelEvents`]) into the packed
//! 32-bit timing words ([`Instruction`]s) a pulse sequencer consumes. It is
//! purely computational: no hardware transport lives here.
//!
//! The typical pipeline is:
//!
//! 1. Build a [`Sequence`] out of [`Block`]s and per-channel pulses.
//! 2. Pre-distort it with a [`DelayApplier`] to compensate channel
//!    rise/fall lags.
//! 3. [`compile_sequence`] it into an [`InstructionStream`] and hand that to
//!    the execution crate.
//!
//! ```
//! use t1compiler_backend::*;
//!
//! let mut block = Block::new("pi_pulse");
//! block.add_pulse(3, 10.0, 20.0);
//! let mut seq = Sequence::new("demo");
//! seq.add_block(block);
//!
//! let stream = compile_sequence(&seq).unwrap();
//! assert_eq!(stream.len(), 2);
//! assert_eq!(total_ticks(&stream), 20);
//! ```

use thiserror::Error;

pub mod block;
pub mod channel;
pub mod compile;
pub mod delay;
pub mod instruction;

pub use block::*;
pub use channel::*;
pub use compile::*;
pub use delay::*;
pub use instruction::*;

/// Failures the compiler can report. All of them are fatal for the sequence
/// being compiled; none leave partial output behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("channel {channel}: odd number of edge timestamps ({count}); every rise needs a fall")]
    OddEdgeCount { channel: usize, count: usize },

    #[error("channel {channel}: edge timestamp {tick} is before the block origin")]
    NegativeTimestamp { channel: usize, tick: i64 },

    #[error("channel {channel}: overlapping pulses collide at tick {tick}")]
    ChannelConflict { channel: usize, tick: i64 },

    #[error("sequence '{sequence}': repetition count must be at least 1")]
    ZeroRepetition { sequence: String },
}
