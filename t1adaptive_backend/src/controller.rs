//! The adaptive measurement loop.
//!
//! [`AdaptiveController`] wires the estimator to the measurer: each
//! iteration it picks the observable by the configured [`KindPolicy`],
//! probes at the information-optimal dark time `t = 1 / (2 gamma_hat)`
//! (capped at `t_probe_max`), runs one measurement and folds the result
//! into the posterior. `gamma_hat` is the current posterior mean of
//! whichever rate the iteration probes, so the dark time tracks the belief
//! as it sharpens.
//!
//! Failure policy: a compile rejection means the pulse program itself is
//! wrong and aborts the run; hardware errors are logged and the iteration
//! is skipped without touching the posterior. A run can be cancelled from
//! another thread through the shared flag handed out by
//! [`AdaptiveController::cancel_flag`]; cancellation is checked between
//! iterations, never mid-measurement.
//!
//! Observer callbacks registered with [`AdaptiveController::add_observer`]
//! fire after every successful iteration in registration order, for live
//! plotting or logging front-ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{info, warn};
use thiserror::Error;

use crate::config::{ConfigError, KindPolicy, T1Config};
use crate::estimator::{Measurement, RateEstimate, RateEstimator, UpdateStatus};
use crate::hardware::{RfSource, Sequencer};
use crate::measurer::{MeasurementError, Measurer};
use crate::model::MeasurementKind;

/// History entry for one completed iteration.
#[derive(Clone, Copy, Debug)]
pub struct MeasurementRecord {
    pub iteration: usize,
    pub kind: MeasurementKind,
    /// Programmed dark time, in seconds.
    pub t_probe: f64,
    pub z: f64,
    pub n_readouts: u64,
    pub mean_ms0: f64,
    pub mean_other: f64,
    /// Posterior summary after this iteration's update.
    pub estimate: RateEstimate,
    /// The update collapsed the posterior onto a single grid cell.
    pub delta_like: bool,
}

/// Why a run ended before completing all iterations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Fatal: the pulse program is structurally wrong.
    #[error("aborting run: {0}")]
    Measurement(#[from] MeasurementError),
}

/// Final accounting of a run.
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub estimate: RateEstimate,
}

type Observer = Box<dyn FnMut(&MeasurementRecord)>;

/// Closed-loop relaxometry driver.
pub struct AdaptiveController {
    config: T1Config,
    estimator: RateEstimator,
    measurer: Measurer,
    history: Vec<MeasurementRecord>,
    observers: IndexMap<String, Observer>,
    cancel: Arc<AtomicBool>,
}

impl AdaptiveController {
    /// Validates the configuration and seeds the posterior from the prior.
    pub fn new(config: T1Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let estimator = RateEstimator::new(config.grid()?, config.model(), config.prior);
        let measurer = Measurer::new(&config);
        Ok(Self {
            config,
            estimator,
            measurer,
            history: Vec::new(),
            observers: IndexMap::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn estimator(&self) -> &RateEstimator {
        &self.estimator
    }

    pub fn estimate(&self) -> RateEstimate {
        self.estimator.estimate()
    }

    pub fn history(&self) -> &[MeasurementRecord] {
        &self.history
    }

    /// Shared flag that aborts the run at the next iteration boundary when
    /// set. Hand clones to watchdogs or UI threads.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Registers (or replaces) a named per-iteration callback.
    pub fn add_observer<F>(&mut self, name: &str, observer: F)
    where
        F: FnMut(&MeasurementRecord) + 'static,
    {
        self.observers.insert(name.to_string(), Box::new(observer));
    }

    pub fn remove_observer(&mut self, name: &str) -> bool {
        self.observers.shift_remove(name).is_some()
    }

    /// Observable for iteration `k` under the configured policy.
    fn kind_for(&self, k: usize) -> MeasurementKind {
        match self.config.kind_policy {
            KindPolicy::Fixed(kind) => kind,
            KindPolicy::Alternate => {
                if k % 2 == 0 {
                    MeasurementKind::DiffPlus
                } else {
                    MeasurementKind::DiffMinus
                }
            }
        }
    }

    /// Dark time for the next probe of `kind`, from the current posterior.
    fn probe_time(&self, kind: MeasurementKind) -> f64 {
        let e = self.estimator.estimate();
        let rate = match kind {
            MeasurementKind::DiffPlus => e.gamma_plus,
            MeasurementKind::DiffMinus => e.gamma_minus,
        };
        (1.0 / (2.0 * rate)).min(self.config.t_probe_max)
    }

    /// Runs the configured number of iterations against the given hardware.
    pub fn run<S: Sequencer, R: RfSource>(
        &mut self,
        sequencer: &mut S,
        rf: &mut R,
    ) -> Result<RunSummary, RunError> {
        let mut skipped = 0usize;
        let mut cancelled = false;

        for k in 0..self.config.n_iterations {
            if self.cancel.load(Ordering::Relaxed) {
                info!("run cancelled after {} iteration(s)", self.history.len());
                cancelled = true;
                break;
            }
            let kind = self.kind_for(k);
            let t = self.probe_time(kind);

            let outcome = match self.measurer.measure(kind, t, sequencer, rf) {
                Ok(outcome) => outcome,
                Err(err @ MeasurementError::Compile(_)) => return Err(err.into()),
                Err(err) => {
                    warn!("iteration {}: measurement failed, skipping: {}", k, err);
                    skipped += 1;
                    continue;
                }
            };

            let measurement = Measurement {
                kind,
                t: outcome.t,
                z: outcome.z,
                n_ms0: outcome.n_readouts,
                n_other: outcome.n_readouts,
            };
            let status = match self.estimator.update(&measurement) {
                Ok(status) => status,
                Err(err) => {
                    warn!("iteration {}: update rejected, skipping: {}", k, err);
                    skipped += 1;
                    continue;
                }
            };

            let estimate = self.estimator.estimate();
            let record = MeasurementRecord {
                iteration: k,
                kind,
                t_probe: t,
                z: outcome.z,
                n_readouts: outcome.n_readouts,
                mean_ms0: outcome.mean_ms0,
                mean_other: outcome.mean_other,
                estimate,
                delta_like: status == UpdateStatus::DeltaLike,
            };
            info!(
                "iteration {}: {} at t = {:.3e} s -> gamma+ = {:.4e} +- {:.1e}, \
                 gamma- = {:.4e} +- {:.1e}",
                k,
                kind,
                t,
                estimate.gamma_plus,
                estimate.sigma_plus,
                estimate.gamma_minus,
                estimate.sigma_minus
            );
            self.history.push(record);
            for observer in self.observers.values_mut() {
                observer(&record);
            }
        }

        Ok(RunSummary {
            completed: self.history.len(),
            skipped,
            cancelled,
            estimate: self.estimator.estimate(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::{CountMode, CountsBuffer, RfError, RfMode, SequencerError};
    use crate::sim::{NullRfSource, SimulatedSequencer};
    use t1compiler_backend::InstructionStream;

    fn test_config(n_iterations: usize) -> T1Config {
        let mut cfg = T1Config::default();
        cfg.n_iterations = n_iterations;
        cfg.readout_target = 5_000;
        cfg
    }

    #[test]
    fn alternates_kinds_and_clamps_probe_time() {
        let mut cfg = test_config(4);
        cfg.t_probe_max = 1e-6;
        let ctrl = AdaptiveController::new(cfg).unwrap();
        assert_eq!(ctrl.kind_for(0), MeasurementKind::DiffPlus);
        assert_eq!(ctrl.kind_for(1), MeasurementKind::DiffMinus);
        assert_eq!(ctrl.kind_for(2), MeasurementKind::DiffPlus);
        // flat prior mean is ~25 kHz, so the unclamped probe time would be
        // ~20 us; the ceiling wins
        assert_eq!(ctrl.probe_time(MeasurementKind::DiffPlus), 1e-6);
    }

    #[test]
    fn fixed_policy_repeats_one_kind() {
        let mut cfg = test_config(3);
        cfg.kind_policy = KindPolicy::Fixed(MeasurementKind::DiffMinus);
        let ctrl = AdaptiveController::new(cfg).unwrap();
        for k in 0..3 {
            assert_eq!(ctrl.kind_for(k), MeasurementKind::DiffMinus);
        }
    }

    #[test]
    fn cancellation_stops_before_first_iteration() {
        let cfg = test_config(10);
        let mut ctrl = AdaptiveController::new(cfg.clone()).unwrap();
        ctrl.cancel_flag().store(true, Ordering::Relaxed);
        let mut sim = SimulatedSequencer::new(&cfg, 15e3, 5e3, 7);
        let mut rf = NullRfSource::default();
        let summary = ctrl.run(&mut sim, &mut rf).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.completed, 0);
        assert!(ctrl.history().is_empty());
    }

    #[test]
    fn hardware_errors_skip_the_iteration() {
        struct Flaky {
            inner: SimulatedSequencer,
            fail_installs_left: usize,
        }
        impl Sequencer for Flaky {
            fn install(&mut self, stream: &InstructionStream) -> Result<(), SequencerError> {
                if self.fail_installs_left > 0 {
                    self.fail_installs_left -= 1;
                    return Err(SequencerError::Transport("link dropped".into()));
                }
                self.inner.install(stream)
            }
            fn run_pass(&mut self) -> Result<CountsBuffer, SequencerError> {
                self.inner.run_pass()
            }
            fn count_mode(&self) -> CountMode {
                self.inner.count_mode()
            }
        }

        let cfg = test_config(4);
        let mut seq = Flaky {
            inner: SimulatedSequencer::new(&cfg, 15e3, 5e3, 8),
            fail_installs_left: 2,
        };
        let mut rf = NullRfSource::default();
        let mut ctrl = AdaptiveController::new(cfg).unwrap();
        let summary = ctrl.run(&mut seq, &mut rf).unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.completed, 2);
    }

    #[test]
    fn rf_errors_also_skip() {
        struct DeadRf;
        impl RfSource for DeadRf {
            fn set_mode(&mut self, _: RfMode) -> Result<(), RfError> {
                Err(RfError::Transport("no response".into()))
            }
            fn set_frequency(&mut self, _: f64) -> Result<(), RfError> {
                Err(RfError::Transport("no response".into()))
            }
            fn set_power(&mut self, _: f64) -> Result<(), RfError> {
                Err(RfError::Transport("no response".into()))
            }
            fn enable_output(&mut self, _: bool) -> Result<(), RfError> {
                Err(RfError::Transport("no response".into()))
            }
            fn pulse_modulation(&mut self, _: bool) -> Result<(), RfError> {
                Err(RfError::Transport("no response".into()))
            }
        }
        let cfg = test_config(3);
        let mut sim = SimulatedSequencer::new(&cfg, 15e3, 5e3, 9);
        let mut ctrl = AdaptiveController::new(cfg).unwrap();
        let summary = ctrl.run(&mut sim, &mut DeadRf).unwrap();
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.skipped, 3);
    }

    #[test]
    fn observers_fire_in_registration_order() {
        use std::sync::Mutex;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let cfg = test_config(2);
        let mut ctrl = AdaptiveController::new(cfg.clone()).unwrap();
        for name in ["first", "second"] {
            let calls = Arc::clone(&calls);
            ctrl.add_observer(name, move |record: &MeasurementRecord| {
                calls.lock().unwrap().push((name, record.iteration));
            });
        }
        let mut sim = SimulatedSequencer::new(&cfg, 15e3, 5e3, 10);
        let mut rf = NullRfSource::default();
        ctrl.run(&mut sim, &mut rf).unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![("first", 0), ("second", 0), ("first", 1), ("second", 1)]
        );
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let mut cfg = test_config(1);
        cfg.contrast = 0.0;
        assert!(AdaptiveController::new(cfg).is_err());
    }
}
