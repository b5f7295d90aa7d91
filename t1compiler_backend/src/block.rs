//! Blocks and sequences: the symbolic layer above the instruction stream.
//!
//! A [`Block`] is an unordered collection of [`ChannelEvents`] over a common
//! timeline starting at local tick 0. Several event lists may target the same
//! channel; the compiler merges their edges. A block's duration is the
//! largest timestamp across all its event lists.
//!
//! A [`Sequence`] is an ordered list of blocks with a repetition count: the
//! compiled per-block streams are concatenated in order and the concatenation
//! is repeated `reps` times.
//!
//! Both types are plain edit-time containers; all validation beyond basic
//! index checks happens in [`compile`](crate::compile).

use crate::channel::ChannelEvents;
use crate::CompileError;

/// A named set of per-channel event lists compiled as one unit.
#[derive(Clone, Debug)]
pub struct Block {
    name: String,
    events: Vec<ChannelEvents>,
}

impl Block {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &[ChannelEvents] {
        &self.events
    }

    /// Adds a whole event list. Multiple lists on the same channel are
    /// allowed and get merged during compilation.
    pub fn add_events(&mut self, events: ChannelEvents) -> &mut Self {
        self.events.push(events);
        self
    }

    /// Convenience: adds a single pulse `[t_on, t_off)` on `channel`.
    pub fn add_pulse(&mut self, channel: usize, t_on: f64, t_off: f64) -> &mut Self {
        let mut ev = ChannelEvents::new(channel);
        ev.pulse(t_on, t_off);
        self.add_events(ev)
    }

    /// Block duration in ticks: the largest frozen timestamp over all event
    /// lists, or 0 for an empty block.
    pub fn duration_ticks(&self) -> Result<u64, CompileError> {
        let mut max_tick: i64 = 0;
        for ev in &self.events {
            if let Some(&last) = ev.frozen_ticks()?.last() {
                max_tick = max_tick.max(last);
            }
        }
        Ok(max_tick as u64)
    }
}

/// An ordered list of blocks with a concatenation multiplicity.
#[derive(Clone, Debug)]
pub struct Sequence {
    name: String,
    blocks: Vec<Block>,
    reps: usize,
}

impl Sequence {
    /// Creates an empty sequence with repetition count 1.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blocks: Vec::new(),
            reps: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn reps(&self) -> usize {
        self.reps
    }

    pub fn add_block(&mut self, block: Block) -> &mut Self {
        self.blocks.push(block);
        self
    }

    /// Sets the repetition count. Validated (`reps >= 1`) at compile time.
    pub fn set_reps(&mut self, reps: usize) -> &mut Self {
        self.reps = reps;
        self
    }

    /// Total duration of one pass (all blocks, single repetition) in ticks.
    pub fn pass_ticks(&self) -> Result<u64, CompileError> {
        self.blocks.iter().map(|b| b.duration_ticks()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_duration_is_max_timestamp() {
        let mut block = Block::new("b");
        block.add_pulse(0, 10.0, 20.0);
        block.add_pulse(5, 2.0, 35.0);
        assert_eq!(block.duration_ticks().unwrap(), 35);
    }

    #[test]
    fn empty_block_has_zero_duration() {
        assert_eq!(Block::new("b").duration_ticks().unwrap(), 0);
    }

    #[test]
    fn sequence_pass_ticks_sums_blocks() {
        let mut seq = Sequence::new("s");
        let mut b1 = Block::new("b1");
        b1.add_pulse(0, 0.0, 10.0);
        let mut b2 = Block::new("b2");
        b2.add_pulse(1, 5.0, 25.0);
        seq.add_block(b1).add_block(b2);
        assert_eq!(seq.pass_ticks().unwrap(), 35);
    }
}
