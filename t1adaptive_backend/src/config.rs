//! Typed, validated run configuration for the adaptive relaxation loop.
//!
//! A [`T1Config`] is assembled once, validated with [`T1Config::validate`],
//! and then treated as immutable for the run: the controller, measurer and
//! simulator all borrow it read-only. Times are seconds, rates 1/s,
//! frequencies Hz, powers dBm; conversion to sequencer ticks happens at the
//! single choke point [`T1Config::ticks`].

use thiserror::Error;

use t1compiler_backend::{DelayApplier, N_CH};

use crate::grid::{GridError, Prior, RateGrid};
use crate::hardware::CountMode;
use crate::model::{MeasurementKind, RelaxationModel};

/// Sequencer channel assignments.
#[derive(Clone, Copy, Debug)]
pub struct ChannelIds {
    /// Laser AOM gate (initialisation and readout).
    pub laser: usize,
    /// RF gate for the |ms=0> <-> |ms=+1> pi pulse.
    pub pi_plus: usize,
    /// RF gate for the |ms=0> <-> |ms=-1> pi pulse.
    pub pi_minus: usize,
    /// Photon-counter gate.
    pub readout: usize,
    /// Scope/camera sync marker, high for the first readout window.
    pub sync: usize,
}

/// Carrier settings and calibrated length of one pi pulse.
#[derive(Clone, Copy, Debug)]
pub struct PiPulse {
    pub frequency: f64,
    pub power: f64,
    /// Pulse width, in seconds.
    pub width: f64,
}

/// How the controller picks the observable for each iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindPolicy {
    /// Alternate diff+ / diff- so both rates stay constrained.
    Alternate,
    /// Probe a single observable every iteration.
    Fixed(MeasurementKind),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("contrast must lie in (0, 1), got {0}")]
    ContrastOutOfRange(f64),

    #[error("{name} must be at least 1")]
    ZeroCount { name: &'static str },

    #[error("channel id {id} for {name} exceeds the {N_CH}-channel bank")]
    ChannelOutOfRange { name: &'static str, id: usize },

    #[error("channels {a} and {b} share sequencer line {id}")]
    ChannelCollision {
        a: &'static str,
        b: &'static str,
        id: usize,
    },

    #[error(
        "every-tick counting needs the readout window to span a multiple of \
         32 ticks, got {ticks}"
    )]
    UnalignedReadWindow { ticks: u64 },

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Complete description of one adaptive measurement run.
#[derive(Clone, Debug)]
pub struct T1Config {
    // rate grid
    pub gamma_plus_bounds: (f64, f64),
    pub n_gamma_plus: usize,
    pub gamma_minus_bounds: (f64, f64),
    pub n_gamma_minus: usize,
    pub prior: Prior,

    // photophysics
    pub pl0: f64,
    pub contrast: f64,

    // adaptive loop
    pub n_iterations: usize,
    /// Readouts to average per arm per iteration.
    pub readout_target: u64,
    /// Ceiling on the dark evolution time, in seconds.
    pub t_probe_max: f64,
    /// Wall-time budget of one uninterruptible sequencer pass, in seconds.
    pub max_pass_time: f64,
    pub kind_policy: KindPolicy,

    // hardware layout
    pub channels: ChannelIds,
    pub pi_plus: PiPulse,
    pub pi_minus: PiPulse,
    pub count_mode: CountMode,
    /// Per-channel rising-edge lags, in seconds.
    pub rise_delays: [f64; N_CH],
    /// Per-channel falling-edge lags, in seconds.
    pub fall_delays: [f64; N_CH],

    // timing
    pub ticks_per_sec: f64,
    /// Laser pulse length for spin initialisation and readout.
    pub dt_laser: f64,
    /// Photon-counting window length.
    pub dt_read: f64,
    /// Lead of the signal readout window before its laser pulse.
    pub delay_read: f64,
    /// Settling gap between the readout laser pulse and the pi pulse.
    pub dt_wait_after_init: f64,
}

impl Default for T1Config {
    /// Typical values for a single NV-class defect on a 120 MHz sequencer.
    fn default() -> Self {
        Self {
            gamma_plus_bounds: (100.0, 50e3),
            n_gamma_plus: 100,
            gamma_minus_bounds: (100.0, 50e3),
            n_gamma_minus: 100,
            prior: Prior::Flat,
            pl0: 0.04,
            contrast: 0.2,
            n_iterations: 50,
            readout_target: 30_000,
            t_probe_max: 5e-3,
            max_pass_time: 1.0,
            kind_policy: KindPolicy::Alternate,
            channels: ChannelIds {
                laser: 2,
                pi_plus: 3,
                pi_minus: 4,
                readout: 1,
                sync: 0,
            },
            pi_plus: PiPulse {
                frequency: 2.0e9,
                power: -10.0,
                width: 100e-9,
            },
            pi_minus: PiPulse {
                frequency: 3.74e9,
                power: -10.0,
                width: 100e-9,
            },
            count_mode: CountMode::WindowGated,
            rise_delays: [0.0; N_CH],
            fall_delays: [0.0; N_CH],
            ticks_per_sec: 120e6,
            dt_laser: 3e-6,
            dt_read: 400e-9,
            delay_read: 0.0,
            dt_wait_after_init: 1e-6,
        }
    }
}

impl T1Config {
    /// Checks every field for internal consistency. Run once before handing
    /// the config to the controller.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("pl0", self.pl0),
            ("t_probe_max", self.t_probe_max),
            ("max_pass_time", self.max_pass_time),
            ("ticks_per_sec", self.ticks_per_sec),
            ("dt_laser", self.dt_laser),
            ("dt_read", self.dt_read),
            ("dt_wait_after_init", self.dt_wait_after_init),
            ("pi_plus.width", self.pi_plus.width),
            ("pi_minus.width", self.pi_minus.width),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if !(self.contrast > 0.0 && self.contrast < 1.0) {
            return Err(ConfigError::ContrastOutOfRange(self.contrast));
        }
        if self.n_iterations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "n_iterations",
            });
        }
        if self.readout_target == 0 {
            return Err(ConfigError::ZeroCount {
                name: "readout_target",
            });
        }
        self.validate_channels()?;
        if self.count_mode == CountMode::EveryTick {
            let ticks = self.ticks(self.dt_read).round() as u64;
            if ticks % 32 != 0 {
                return Err(ConfigError::UnalignedReadWindow { ticks });
            }
        }
        // grid bounds checked the same way grid construction will
        self.grid()?;
        Ok(())
    }

    fn validate_channels(&self) -> Result<(), ConfigError> {
        let named = [
            ("laser", self.channels.laser),
            ("pi_plus", self.channels.pi_plus),
            ("pi_minus", self.channels.pi_minus),
            ("readout", self.channels.readout),
            ("sync", self.channels.sync),
        ];
        for &(name, id) in &named {
            if id >= N_CH {
                return Err(ConfigError::ChannelOutOfRange { name, id });
            }
        }
        for (k, &(a, id_a)) in named.iter().enumerate() {
            for &(b, id_b) in &named[k + 1..] {
                if id_a == id_b {
                    return Err(ConfigError::ChannelCollision { a, b, id: id_a });
                }
            }
        }
        Ok(())
    }

    /// Seconds to (fractional) sequencer ticks.
    pub fn ticks(&self, seconds: f64) -> f64 {
        seconds * self.ticks_per_sec
    }

    pub fn grid(&self) -> Result<RateGrid, GridError> {
        RateGrid::linear(
            self.gamma_plus_bounds,
            self.n_gamma_plus,
            self.gamma_minus_bounds,
            self.n_gamma_minus,
        )
    }

    pub fn model(&self) -> RelaxationModel {
        RelaxationModel::new(self.pl0, self.contrast)
    }

    /// The delay pre-distortion for this hardware, in ticks.
    pub fn delay_applier(&self) -> DelayApplier {
        let mut rise = [0.0; N_CH];
        let mut fall = [0.0; N_CH];
        for ch in 0..N_CH {
            rise[ch] = self.ticks(self.rise_delays[ch]);
            fall[ch] = self.ticks(self.fall_delays[ch]);
        }
        DelayApplier::new(rise, fall)
    }

    /// Pi-pulse settings for the requested observable.
    pub fn pi_pulse(&self, kind: MeasurementKind) -> PiPulse {
        match kind {
            MeasurementKind::DiffPlus => self.pi_plus,
            MeasurementKind::DiffMinus => self.pi_minus,
        }
    }

    /// Sequencer channel of the pi pulse for the requested observable.
    pub fn pi_channel(&self, kind: MeasurementKind) -> usize {
        match kind {
            MeasurementKind::DiffPlus => self.channels.pi_plus,
            MeasurementKind::DiffMinus => self.channels.pi_minus,
        }
    }
}
