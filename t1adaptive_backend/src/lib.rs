//! Adaptive Bayesian measurement of spin-relaxation (T1) rates.
//!
//! This crate sits on top of [`t1compiler_backend`], which turns symbolic
//! pulse programs into sequencer instruction streams, and adds everything a
//! closed-loop relaxometry run needs:
//!
//! * [`model`] - the closed-form three-level relaxation model relating the
//!   rate pair `(gamma_plus, gamma_minus)` to measurable photocount
//!   differences;
//! * [`grid`] / [`estimator`] - a grid posterior over the rate pair with
//!   log-space Bayesian updates;
//! * [`config`] - the typed, validated run description;
//! * [`hardware`] - the [`Sequencer`] and [`RfSource`] traits every
//!   backend implements;
//! * [`measurer`] - builds the four-window pulse program for one
//!   measurement, runs it and reduces counts to the observable `z`;
//! * [`controller`] - the adaptive loop choosing each iteration's
//!   observable and dark time from the current posterior;
//! * [`sim`] - a model-backed simulator for hardware-free runs and tests.
//!
//! A complete simulated run:
//!
//! ```
//! use t1adaptive_backend::*;
//!
//! let mut config = T1Config::default();
//! config.n_iterations = 2;
//! config.readout_target = 1_000;
//!
//! let mut sequencer = SimulatedSequencer::new(&config, 15e3, 5e3, 42);
//! let mut rf = NullRfSource::default();
//! let mut controller = AdaptiveController::new(config).unwrap();
//! let summary = controller.run(&mut sequencer, &mut rf).unwrap();
//!
//! assert_eq!(summary.completed, 2);
//! assert!(summary.estimate.gamma_plus > 0.0);
//! ```

pub mod config;
pub mod controller;
pub mod estimator;
pub mod grid;
pub mod hardware;
pub mod measurer;
pub mod model;
pub mod sim;

pub use config::{ChannelIds, ConfigError, KindPolicy, PiPulse, T1Config};
pub use controller::{AdaptiveController, MeasurementRecord, RunError, RunSummary};
pub use estimator::{
    EstimatorError, Measurement, RateEstimate, RateEstimator, UpdateStatus,
};
pub use grid::{GridError, Prior, RateGrid};
pub use hardware::{
    decode_counts, CountMode, CountsBuffer, RfError, RfMode, RfSource, Sequencer,
    SequencerError,
};
pub use measurer::{MeasurementError, MeasurementOutcome, Measurer};
pub use model::{MeasurementKind, RelaxationModel};
pub use sim::{NullRfSource, SimulatedSequencer};
