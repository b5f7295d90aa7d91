//! One relaxation measurement: program the hardware, run it, reduce counts.
//!
//! A single measurement of the observable `diff+`/`diff-` at dark time `t`
//! executes this per-repetition pulse program (times left to right):
//!
//! ```text
//! laser(init) .. t .. [w0|laser(read+reinit)|w1] .. settle .. pi
//!                 .. t .. [w2|laser(read)|w3]
//! ```
//!
//! Four photon-count windows per repetition, all `dt_read` long:
//!
//! * `w0` - |ms=0> signal, opening `delay_read` before the second laser
//!   pulse (the spin has evolved in the dark for `t` since initialisation);
//! * `w1` - reference at the end of that same laser pulse, after
//!   repolarisation;
//! * `w2` - |ms=+-1> signal, opening `delay_read` before the third laser
//!   pulse (`t` after the pi pulse);
//! * `w3` - final reference at the end of the third laser pulse.
//!
//! The sync channel marks `w0` of every repetition for scope alignment.
//!
//! The block is repeated enough times to keep one uninterruptible sequencer
//! pass under the configured wall-time budget, and passes are re-run until
//! the per-arm readout target is met. The reduced observable is
//! `z = mean(w0) - mean(w2)`; the reference means travel alongside for
//! drift diagnostics but do not enter `z`.

use log::debug;
use thiserror::Error;

use t1compiler_backend::{compile_sequence, Block, CompileError, Sequence};

use crate::config::T1Config;
use crate::hardware::{decode_counts, CountMode, RfError, RfMode, RfSource, Sequencer, SequencerError};
use crate::model::MeasurementKind;

/// Windows per repetition of the measurement block.
const WINDOWS_PER_REP: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    /// The pulse program failed to compile. Not recoverable by retrying.
    #[error("pulse program rejected: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error(transparent)]
    Rf(#[from] RfError),

    #[error("count buffer holds {got} bins, expected {expected}")]
    BufferMismatch { expected: usize, got: usize },

    #[error("dark time must be non-negative, got {0}")]
    NegativeProbeTime(f64),
}

/// Reduced result of one measurement.
#[derive(Clone, Copy, Debug)]
pub struct MeasurementOutcome {
    pub kind: MeasurementKind,
    /// Dark evolution time actually programmed, in seconds.
    pub t: f64,
    /// `mean(w0) - mean(w2)`, counts per readout.
    pub z: f64,
    pub mean_ms0: f64,
    pub mean_other: f64,
    pub mean_ref_init: f64,
    pub mean_ref_final: f64,
    /// Readouts averaged per arm.
    pub n_readouts: u64,
}

/// Builds, runs and reduces relaxation measurements against a sequencer and
/// an RF source. Pure state: holds only the run configuration.
pub struct Measurer {
    config: T1Config,
}

impl Measurer {
    pub fn new(config: &T1Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// The per-repetition pulse block for observable `kind` at dark time
    /// `t` seconds. Timestamps are in (undelayed) sequencer ticks.
    pub fn build_block(&self, kind: MeasurementKind, t: f64) -> Block {
        let cfg = &self.config;
        let ch = &cfg.channels;
        let laser_ticks = cfg.ticks(cfg.dt_laser);
        let read_ticks = cfg.ticks(cfg.dt_read);
        let lead_ticks = cfg.ticks(cfg.delay_read);
        let settle_ticks = cfg.ticks(cfg.dt_wait_after_init);
        let dark_ticks = cfg.ticks(t);
        let pi_ticks = cfg.ticks(cfg.pi_pulse(kind).width);

        let mut block = Block::new(&format!("t1_{}", kind));

        // init
        block.add_pulse(ch.laser, 0.0, laser_ticks);
        // signal readout of the aged |ms=0> population
        let t_laser2 = laser_ticks + dark_ticks;
        block.add_pulse(ch.readout, t_laser2 - lead_ticks, t_laser2 - lead_ticks + read_ticks);
        block.add_pulse(ch.sync, t_laser2 - lead_ticks, t_laser2 - lead_ticks + read_ticks);
        // readout + re-initialisation pulse, reference window at its tail
        block.add_pulse(ch.laser, t_laser2, t_laser2 + laser_ticks);
        block.add_pulse(ch.readout, t_laser2 + laser_ticks - read_ticks, t_laser2 + laser_ticks);
        // pi pulse after the settle gap
        let t_pi = t_laser2 + laser_ticks + settle_ticks;
        block.add_pulse(cfg.pi_channel(kind), t_pi, t_pi + pi_ticks);
        // signal readout of the aged |ms=+-1> population
        let t_laser3 = t_pi + pi_ticks + dark_ticks;
        block.add_pulse(ch.readout, t_laser3 - lead_ticks, t_laser3 - lead_ticks + read_ticks);
        // final readout pulse and reference window
        block.add_pulse(ch.laser, t_laser3, t_laser3 + laser_ticks);
        block.add_pulse(ch.readout, t_laser3 + laser_ticks - read_ticks, t_laser3 + laser_ticks);

        block
    }

    /// Repetitions packed into one sequencer pass for dark time `t`: as many
    /// as fit the pass-time budget, at least one, never more than the
    /// readout target.
    pub fn reps_per_pass(&self, kind: MeasurementKind, t: f64) -> usize {
        let cfg = &self.config;
        let block_secs =
            2.0 * (cfg.dt_laser + t) + cfg.dt_wait_after_init + cfg.pi_pulse(kind).width + cfg.dt_laser;
        let fit = (cfg.max_pass_time / block_secs).floor() as u64;
        fit.clamp(1, cfg.readout_target) as usize
    }

    /// Runs one full measurement: RF setup, compile, install, repeated
    /// passes until the readout target is met, reduction to `z`.
    pub fn measure<S: Sequencer, R: RfSource>(
        &self,
        kind: MeasurementKind,
        t: f64,
        sequencer: &mut S,
        rf: &mut R,
    ) -> Result<MeasurementOutcome, MeasurementError> {
        if t < 0.0 {
            return Err(MeasurementError::NegativeProbeTime(t));
        }
        let cfg = &self.config;

        let pi = cfg.pi_pulse(kind);
        rf.set_mode(RfMode::Fixed)?;
        rf.set_frequency(pi.frequency)?;
        rf.set_power(pi.power)?;
        rf.pulse_modulation(true)?;
        rf.enable_output(true)?;

        let reps = self.reps_per_pass(kind, t);
        let passes = (cfg.readout_target as usize).div_ceil(reps);
        let n_readouts = (reps * passes) as u64;

        let mut seq = Sequence::new(&format!("t1_{}_pass", kind));
        seq.add_block(self.build_block(kind, t)).set_reps(reps);
        let stream = compile_sequence(&cfg.delay_applier().apply(&seq))?;
        sequencer.install(&stream)?;
        debug!(
            "{}: t = {:.3e} s, {} rep(s)/pass x {} pass(es), {} instruction(s)",
            kind,
            t,
            reps,
            passes,
            stream.len()
        );

        let bins_per_window = match cfg.count_mode {
            CountMode::WindowGated => 1,
            CountMode::EveryTick => cfg.ticks(cfg.dt_read).round() as usize,
        };
        let bins_per_pass = reps * WINDOWS_PER_REP * bins_per_window;

        let mut window_sums = [0u64; WINDOWS_PER_REP];
        for _ in 0..passes {
            let buffer = sequencer.run_pass()?;
            let bins = decode_counts(cfg.count_mode, &buffer);
            if bins.len() != bins_per_pass {
                return Err(MeasurementError::BufferMismatch {
                    expected: bins_per_pass,
                    got: bins.len(),
                });
            }
            for (k, chunk) in bins.chunks(bins_per_window).enumerate() {
                window_sums[k % WINDOWS_PER_REP] += chunk.iter().map(|&c| c as u64).sum::<u64>();
            }
        }

        rf.enable_output(false)?;

        let mean = |w: usize| window_sums[w] as f64 / n_readouts as f64;
        let outcome = MeasurementOutcome {
            kind,
            t,
            z: mean(0) - mean(2),
            mean_ms0: mean(0),
            mean_other: mean(2),
            mean_ref_init: mean(1),
            mean_ref_final: mean(3),
            n_readouts,
        };
        debug!(
            "{}: z = {:.4e} over {} readout(s)/arm",
            kind, outcome.z, n_readouts
        );
        Ok(outcome)
    }
}
