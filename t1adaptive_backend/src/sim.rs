//! In-process physics simulator behind the [`Sequencer`] trait.
//!
//! [`SimulatedSequencer`] executes a compiled stream against the same
//! three-level relaxation model the estimator fits, with ground-truth rates
//! injected at construction. It walks the instruction stream tracking the
//! prepared spin state and draws Poisson photocounts for every readout
//! window, so closed-loop runs exercise the full compile-install-run-reduce
//! path with statistically honest data.
//!
//! State rules during the walk:
//!
//! * a falling laser edge leaves the spin repolarised in |ms=0> and marks
//!   the start of dark evolution;
//! * a falling pi-pulse edge swaps |ms=0> with the addressed |ms=+-1> level
//!   and restarts dark evolution;
//! * a readout window opening while the laser has already been on longer
//!   than the repolarisation time reads a fresh |ms=0> (reference); one
//!   opening at or just after the laser rise reads the state aged since the
//!   last preparation (signal).
//!
//! Only [`CountMode::WindowGated`] buffers are produced. The RNG is seeded
//! explicitly, so runs are reproducible.
//!
//! [`NullRfSource`] is the matching RF stand-in: it records the last
//! programmed settings and never fails.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};

use t1compiler_backend::InstructionStream;

use crate::config::{ChannelIds, T1Config};
use crate::hardware::{
    CountMode, CountsBuffer, RfError, RfMode, RfSource, Sequencer, SequencerError,
};
use crate::model::RelaxationModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SpinState {
    Ms0,
    MsPlus,
    MsMinus,
}

/// Model-backed sequencer stand-in with injected ground-truth rates.
pub struct SimulatedSequencer {
    channels: ChannelIds,
    model: RelaxationModel,
    gamma_plus: f64,
    gamma_minus: f64,
    ticks_per_sec: f64,
    /// Laser-on time after which the spin counts as repolarised, in seconds.
    repolarise_after: f64,
    rng: StdRng,
    stream: Option<InstructionStream>,
}

impl SimulatedSequencer {
    pub fn new(config: &T1Config, gamma_plus: f64, gamma_minus: f64, seed: u64) -> Self {
        Self {
            channels: config.channels,
            model: config.model(),
            gamma_plus,
            gamma_minus,
            ticks_per_sec: config.ticks_per_sec,
            repolarise_after: 1e-6,
            rng: StdRng::seed_from_u64(seed),
            stream: None,
        }
    }

    fn expected_counts(&self, state: SpinState, dark_secs: f64) -> f64 {
        let (gp, gm) = (self.gamma_plus, self.gamma_minus);
        match state {
            SpinState::Ms0 => self.model.counts_ms0(dark_secs, gp, gm),
            SpinState::MsPlus => self.model.counts_msp(dark_secs, gp, gm),
            SpinState::MsMinus => self.model.counts_msm(dark_secs, gp, gm),
        }
    }

    fn draw(&mut self, mean: f64) -> u32 {
        match Poisson::new(mean) {
            Ok(dist) => dist.sample(&mut self.rng) as u32,
            Err(_) => 0,
        }
    }
}

impl Sequencer for SimulatedSequencer {
    fn install(&mut self, stream: &InstructionStream) -> Result<(), SequencerError> {
        self.stream = Some(stream.clone());
        Ok(())
    }

    fn run_pass(&mut self) -> Result<CountsBuffer, SequencerError> {
        let stream = self
            .stream
            .take()
            .ok_or(SequencerError::NothingInstalled)?;

        let laser = 1u16 << self.channels.laser;
        let pi_plus = 1u16 << self.channels.pi_plus;
        let pi_minus = 1u16 << self.channels.pi_minus;
        let readout = 1u16 << self.channels.readout;
        let repolarise_ticks = (self.repolarise_after * self.ticks_per_sec).round() as u64;

        let mut words = Vec::new();
        let mut t: u64 = 0;
        let mut prev_mask: u16 = 0;
        let mut state = SpinState::Ms0;
        let mut prep_end: u64 = 0;
        let mut laser_rise: u64 = 0;

        for instr in &stream {
            let mask = instr.mask();
            let rising = mask & !prev_mask;
            let falling = !mask & prev_mask;

            if rising & laser != 0 {
                laser_rise = t;
            }
            if falling & laser != 0 {
                state = SpinState::Ms0;
                prep_end = t;
            }
            if falling & pi_plus != 0 {
                state = match state {
                    SpinState::Ms0 => SpinState::MsPlus,
                    SpinState::MsPlus => SpinState::Ms0,
                    other => other,
                };
                prep_end = t;
            }
            if falling & pi_minus != 0 {
                state = match state {
                    SpinState::Ms0 => SpinState::MsMinus,
                    SpinState::MsMinus => SpinState::Ms0,
                    other => other,
                };
                prep_end = t;
            }
            if rising & readout != 0 {
                let mean = if mask & laser != 0 && t - laser_rise >= repolarise_ticks {
                    // reference window: the laser has long since repumped
                    self.expected_counts(SpinState::Ms0, 0.0)
                } else {
                    let dark = (t - prep_end) as f64 / self.ticks_per_sec;
                    self.expected_counts(state, dark)
                };
                let count = self.draw(mean);
                words.push(count);
            }

            prev_mask = mask;
            t += instr.duration();
        }

        self.stream = Some(stream);
        Ok(CountsBuffer { words })
    }

    fn count_mode(&self) -> CountMode {
        CountMode::WindowGated
    }
}

/// RF stand-in that records the last programmed settings.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRfSource {
    pub mode: Option<RfMode>,
    pub frequency: f64,
    pub power: f64,
    pub output_on: bool,
    pub pulse_modulation_on: bool,
}

impl RfSource for NullRfSource {
    fn set_mode(&mut self, mode: RfMode) -> Result<(), RfError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), RfError> {
        self.frequency = hz;
        Ok(())
    }

    fn set_power(&mut self, dbm: f64) -> Result<(), RfError> {
        self.power = dbm;
        Ok(())
    }

    fn enable_output(&mut self, on: bool) -> Result<(), RfError> {
        self.output_on = on;
        Ok(())
    }

    fn pulse_modulation(&mut self, on: bool) -> Result<(), RfError> {
        self.pulse_modulation_on = on;
        Ok(())
    }
}
