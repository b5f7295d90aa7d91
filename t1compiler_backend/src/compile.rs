//! The pulse-pattern compiler: blocks of channel edges in, packed instruction
//! streams out.
//!
//! ## Algorithm (per block)
//!
//! 1. Freeze every event list: round timestamps to ticks, sort, validate.
//! 2. Accumulate all edges into a time-ordered map `tick -> per-channel
//!    effect vector` (+1 rising, -1 falling); coincident edges on the same
//!    tick merge by element-wise summation. A synthetic all-off entry at
//!    tick 0 anchors the walk so the stream always begins from a defined
//!    idle state.
//! 3. Walk the merged map keeping a prefix channel-state mask. For each
//!    transition emit one interval `(duration, state)`; then apply the
//!    effect vector. Any channel leaving {0, 1} means two pulses overlapped
//!    on it and compilation fails.
//! 4. Zero-duration intervals are dropped; intervals longer than
//!    [`T_MAX`] ticks are split into back-to-back maximal chunks plus a
//!    remainder, all bearing the same state mask.
//! 5. Each surviving interval packs into one 32-bit [`Instruction`].
//!
//! Per-block streams are concatenated in block order and the concatenation
//! is repeated `reps` times to compile a [`Sequence`].
//!
//! The compiler never materialises a per-tick array; realistic sequences run
//! to minutes of wall time at 120 MHz tick rates and would not fit in memory
//! unrolled.

use std::collections::BTreeMap;

use log::debug;

use crate::block::{Block, Sequence};
use crate::instruction::{Instruction, InstructionStream, N_CH, T_MAX};
use crate::CompileError;

/// Compiles one block into its instruction stream.
///
/// The compiled stream's channel trajectory matches the block's edge set
/// exactly on every tick; summed durations equal the block duration.
pub fn compile_block(block: &Block) -> Result<Vec<Instruction>, CompileError> {
    // tick -> summed per-channel effect; BTreeMap does the sort-and-merge
    let mut effects: BTreeMap<i64, [i8; N_CH]> = BTreeMap::new();
    // Synthetic all-off origin: guarantees the walk starts at tick 0 even if
    // the first real edge is later.
    effects.insert(0, [0; N_CH]);
    for ev in block.events() {
        let ch = ev.channel();
        for (k, &t) in ev.frozen_ticks()?.iter().enumerate() {
            let delta: i8 = if k % 2 == 0 { 1 } else { -1 };
            effects.entry(t).or_insert([0; N_CH])[ch] += delta;
        }
    }

    let mut out: Vec<Instruction> = Vec::new();
    let mut state: u16 = 0;
    let mut t_prev: i64 = 0;
    for (&t, effect) in &effects {
        emit_interval(&mut out, (t - t_prev) as u64, state);
        for (ch, &d) in effect.iter().enumerate() {
            if d == 0 {
                continue;
            }
            let bit = ((state >> ch) & 1) as i8;
            match bit + d {
                0 => state &= !(1 << ch),
                1 => state |= 1 << ch,
                // More than one pulse active (or closing) on one channel at
                // once: the block is malformed.
                _ => {
                    return Err(CompileError::ChannelConflict {
                        channel: ch,
                        tick: t,
                    })
                }
            }
        }
        t_prev = t;
    }
    // Every frozen edge list has even length, so every rise was matched by a
    // fall and the final state is all-off.
    debug_assert_eq!(state, 0, "Block '{}' left channels high", block.name());
    Ok(out)
}

/// Compiles a whole sequence: per-block streams concatenated in order, the
/// concatenation repeated `reps` times.
pub fn compile_sequence(seq: &Sequence) -> Result<InstructionStream, CompileError> {
    if seq.reps() == 0 {
        return Err(CompileError::ZeroRepetition {
            sequence: seq.name().to_string(),
        });
    }
    let mut pass: Vec<Instruction> = Vec::new();
    for block in seq.blocks() {
        pass.extend(compile_block(block)?);
    }
    let mut stream = Vec::with_capacity(pass.len() * seq.reps());
    for _ in 0..seq.reps() {
        stream.extend_from_slice(&pass);
    }
    debug!(
        "compiled sequence '{}': {} block(s), {} instruction(s) per pass, {} rep(s)",
        seq.name(),
        seq.blocks().len(),
        pass.len(),
        seq.reps()
    );
    Ok(stream)
}

// Emits (duration, state), dropping zero durations and splitting anything
// longer than T_MAX into maximal chunks plus a remainder.
fn emit_interval(out: &mut Vec<Instruction>, mut duration: u64, state: u16) {
    while duration > T_MAX {
        out.push(Instruction::new(T_MAX, state));
        duration -= T_MAX;
    }
    if duration > 0 {
        out.push(Instruction::new(duration, state));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::ChannelEvents;
    use crate::instruction::{edge_set, total_ticks};

    #[test]
    fn single_pulse() {
        let mut block = Block::new("pi");
        block.add_pulse(3, 10.0, 20.0);
        let stream = compile_block(&block).unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!((stream[0].duration(), stream[0].mask()), (10, 0));
        assert_eq!((stream[1].duration(), stream[1].mask()), (10, 1 << 3));
    }

    #[test]
    fn first_instruction_all_off_for_late_first_edge() {
        let mut block = Block::new("b");
        block.add_pulse(0, 7.0, 9.0);
        block.add_pulse(5, 3.0, 12.0);
        let stream = compile_block(&block).unwrap();
        assert_eq!(stream[0].mask(), 0);
        assert_eq!(stream[0].duration(), 3);
    }

    #[test]
    fn rise_at_zero_skips_idle_interval() {
        let mut block = Block::new("b");
        block.add_pulse(2, 0.0, 5.0);
        let stream = compile_block(&block).unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!((stream[0].duration(), stream[0].mask()), (5, 1 << 2));
    }

    #[test]
    fn coincident_edges_merge() {
        // ch0 falls exactly when ch1 rises: one boundary, no zero-length gap
        let mut block = Block::new("b");
        block.add_pulse(0, 2.0, 6.0);
        block.add_pulse(1, 6.0, 9.0);
        let stream = compile_block(&block).unwrap();
        assert_eq!(stream.len(), 3);
        assert_eq!((stream[1].duration(), stream[1].mask()), (4, 0b01));
        assert_eq!((stream[2].duration(), stream[2].mask()), (3, 0b10));
    }

    #[test]
    fn touching_pulses_on_one_channel_stay_high() {
        let mut ev = ChannelEvents::new(4);
        ev.pulse(2.0, 5.0);
        ev.pulse(5.0, 8.0);
        let mut block = Block::new("b");
        block.add_events(ev);
        let stream = compile_block(&block).unwrap();
        // fall and rise cancel at tick 5: a single 6-tick high interval
        assert_eq!(stream.len(), 2);
        assert_eq!((stream[1].duration(), stream[1].mask()), (6, 1 << 4));
    }

    #[test]
    fn overlap_is_a_conflict() {
        let mut block = Block::new("b");
        block.add_pulse(2, 10.0, 30.0);
        block.add_pulse(2, 20.0, 40.0);
        assert!(matches!(
            compile_block(&block),
            Err(CompileError::ChannelConflict { channel: 2, tick: 20 })
        ));
    }

    #[test]
    fn segmentation_splits_long_intervals() {
        let mut block = Block::new("b");
        block.add_pulse(2, 0.0, (T_MAX + 500) as f64);
        let stream = compile_block(&block).unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!((stream[0].duration(), stream[0].mask()), (T_MAX, 1 << 2));
        assert_eq!((stream[1].duration(), stream[1].mask()), (500, 1 << 2));
        assert_eq!(total_ticks(&stream), T_MAX + 500);
    }

    #[test]
    fn multiple_event_lists_same_channel_merge() {
        let mut block = Block::new("b");
        block.add_pulse(1, 0.0, 3.0);
        block.add_pulse(1, 10.0, 12.0);
        let stream = compile_block(&block).unwrap();
        assert_eq!(edge_set(&stream)[1], vec![0, 3, 10, 12]);
    }

    #[test]
    fn sequence_repetition() {
        let mut block = Block::new("b");
        block.add_pulse(0, 1.0, 2.0);
        let mut seq = Sequence::new("s");
        seq.add_block(block).set_reps(3);
        let stream = compile_sequence(&seq).unwrap();
        assert_eq!(stream.len(), 6);
        assert_eq!(total_ticks(&stream), 6);
    }

    #[test]
    fn zero_reps_rejected() {
        let mut seq = Sequence::new("s");
        seq.set_reps(0);
        assert!(matches!(
            compile_sequence(&seq),
            Err(CompileError::ZeroRepetition { .. })
        ));
    }
}
