//! Per-channel rise/fall delay compensation.
//!
//! Hardware channels do not switch instantaneously: an AOM opens some
//! hundreds of nanoseconds after its drive edge, and closes after a
//! different lag. The [`DelayApplier`] pre-distorts a [`Sequence`] so the
//! optical/microwave edges land where the symbolic program says they do:
//! every even-indexed (rising) timestamp on channel `c` is shifted by
//! `rise[c]`, every odd-indexed (falling) timestamp by `fall[c]`, in sorted
//! edge order.
//!
//! The transform is a pure function of its input and is exactly invertible:
//! applying `(rise, fall)` followed by `(-rise, -fall)` reproduces the
//! original sequence. Rise-only and fall-only applications commute because
//! they touch disjoint index sets.
//!
//! Delays may be negative; if a shifted edge lands before the block origin,
//! compilation of the shifted sequence fails with a negative-timestamp
//! error rather than silently clipping.

use crate::block::{Block, Sequence};
use crate::channel::ChannelEvents;
use crate::instruction::N_CH;

/// Per-channel rising/falling edge shifts, in ticks (fractional allowed;
/// rounding to whole ticks happens at compile time).
#[derive(Clone, Debug, PartialEq)]
pub struct DelayApplier {
    rise: [f64; N_CH],
    fall: [f64; N_CH],
}

impl DelayApplier {
    pub fn new(rise: [f64; N_CH], fall: [f64; N_CH]) -> Self {
        Self { rise, fall }
    }

    /// The identity applier.
    pub fn zero() -> Self {
        Self {
            rise: [0.0; N_CH],
            fall: [0.0; N_CH],
        }
    }

    /// The applier undoing this one.
    pub fn inverse(&self) -> Self {
        let mut inv = self.clone();
        for ch in 0..N_CH {
            inv.rise[ch] = -self.rise[ch];
            inv.fall[ch] = -self.fall[ch];
        }
        inv
    }

    /// This applier with fall delays zeroed out.
    pub fn rise_only(&self) -> Self {
        Self {
            rise: self.rise,
            fall: [0.0; N_CH],
        }
    }

    /// This applier with rise delays zeroed out.
    pub fn fall_only(&self) -> Self {
        Self {
            rise: [0.0; N_CH],
            fall: self.fall,
        }
    }

    /// Shifts one event list. Edges are paired in sorted order; the input is
    /// not mutated.
    pub fn apply_events(&self, events: &ChannelEvents) -> ChannelEvents {
        let ch = events.channel();
        let mut times = events.times().to_vec();
        // Rising/falling identity is positional over the sorted edge list.
        times.sort_by(|a, b| a.partial_cmp(b).expect("non-finite edge timestamp"));
        for (k, t) in times.iter_mut().enumerate() {
            *t += if k % 2 == 0 { self.rise[ch] } else { self.fall[ch] };
        }
        ChannelEvents::from_times(ch, times)
    }

    /// Shifts every event list in a block.
    pub fn apply_block(&self, block: &Block) -> Block {
        let mut out = Block::new(block.name());
        for ev in block.events() {
            out.add_events(self.apply_events(ev));
        }
        out
    }

    /// Shifts every block in a sequence, preserving order and repetition.
    pub fn apply(&self, seq: &Sequence) -> Sequence {
        let mut out = Sequence::new(seq.name());
        out.set_reps(seq.reps());
        for block in seq.blocks() {
            out.add_block(self.apply_block(block));
        }
        out
    }
}
