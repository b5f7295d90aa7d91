//! Hardware-facing traits: the pulse sequencer and the RF source.
//!
//! The rest of the crate talks to hardware exclusively through these traits,
//! so a measurement loop runs unchanged against a lab device driver or the
//! in-process simulator in [`crate::sim`]. Implementations own their
//! transport; the traits expose only what the measurement loop needs:
//! install a compiled stream, execute one pass over it, and fetch the
//! photon-count buffer that pass produced.
//!
//! ## Count buffer formats
//!
//! Sequencers report counts in one of two [`CountMode`]s. In
//! [`CountMode::WindowGated`] each readout window yields one 32-bit word
//! holding its summed photocount. In [`CountMode::EveryTick`] the device
//! records one *bit* per tick of gated time, packed 32 ticks per word,
//! LSB-first; [`decode_counts`] unpacks either format into a flat per-bin
//! count vector. Every-tick buffers only make sense when gated spans are
//! multiples of 32 ticks, which configuration validation enforces.

use thiserror::Error;

use t1compiler_backend::InstructionStream;

/// How a sequencer packs photocounts into its result buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountMode {
    /// One word per readout window, holding the window's total counts.
    WindowGated,
    /// One bit per gated tick, packed 32 per word, LSB-first.
    EveryTick,
}

/// Raw count words returned by one sequencer pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CountsBuffer {
    pub words: Vec<u32>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequencerError {
    #[error("no instruction stream installed")]
    NothingInstalled,

    #[error("sequencer transport failure: {0}")]
    Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RfError {
    #[error("rf source transport failure: {0}")]
    Transport(String),

    #[error("rf frequency {0} Hz outside the source's range")]
    FrequencyOutOfRange(f64),
}

/// A tick-clocked digital pattern generator with gated photon counting.
pub trait Sequencer {
    /// Installs a compiled stream, replacing any previous one.
    fn install(&mut self, stream: &InstructionStream) -> Result<(), SequencerError>;

    /// Executes one pass over the installed stream, blocking until the pass
    /// (and its count transfer) completes.
    fn run_pass(&mut self) -> Result<CountsBuffer, SequencerError>;

    /// The count format this device produces.
    fn count_mode(&self) -> CountMode;
}

/// Carrier mode of the RF source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfMode {
    /// Single fixed carrier frequency.
    Fixed,
    /// Stepped frequency list (unused by the relaxation loop, present for
    /// spectroscopy front-ends sharing the source).
    List,
}

/// A gated microwave/RF signal generator driving the spin transitions.
pub trait RfSource {
    fn set_mode(&mut self, mode: RfMode) -> Result<(), RfError>;
    fn set_frequency(&mut self, hz: f64) -> Result<(), RfError>;
    fn set_power(&mut self, dbm: f64) -> Result<(), RfError>;
    fn enable_output(&mut self, on: bool) -> Result<(), RfError>;
    /// Routes the external gate line to the output stage, so the sequencer's
    /// pi-pulse channel carves pulses out of the carrier.
    fn pulse_modulation(&mut self, on: bool) -> Result<(), RfError>;
}

/// Unpacks a raw buffer into per-bin counts.
///
/// Window-gated buffers pass through unchanged. Every-tick buffers expand to
/// one 0/1 count per gated tick, LSB-first within each word.
pub fn decode_counts(mode: CountMode, buffer: &CountsBuffer) -> Vec<u32> {
    match mode {
        CountMode::WindowGated => buffer.words.clone(),
        CountMode::EveryTick => buffer
            .words
            .iter()
            .flat_map(|&w| (0..32).map(move |b| (w >> b) & 1))
            .collect(),
    }
}
