//! Grid-based Bayesian estimation of the relaxation-rate pair.
//!
//! The estimator holds a normalised posterior density over a [`RateGrid`]
//! and refines it one measurement at a time. Updates run in log space: each
//! measurement adds its Gaussian log-likelihood
//! `-(z - mu)^2 / (2 sigma^2) - ln sigma` to an accumulated surface, the
//! surface is re-anchored at its maximum before exponentiation, and the
//! result is multiplied into the prior and renormalised by trapezoidal
//! integration. Because the accumulation is additive, the posterior is
//! independent of measurement order.
//!
//! A posterior collapsing onto a single grid cell usually means the grid no
//! longer brackets the true rates; the update reports it as
//! [`UpdateStatus::DeltaLike`] and logs a warning rather than failing.

use log::{debug, warn};
use ndarray::Array2;
use thiserror::Error;

use crate::grid::{Prior, RateGrid};
use crate::model::{MeasurementKind, RelaxationModel};

/// One completed difference measurement, ready for a posterior update.
#[derive(Clone, Copy, Debug)]
pub struct Measurement {
    pub kind: MeasurementKind,
    /// Dark evolution time, in seconds.
    pub t: f64,
    /// Measured difference of mean counts per readout.
    pub z: f64,
    /// Readouts averaged into the |ms=0> arm.
    pub n_ms0: u64,
    /// Readouts averaged into the compared arm.
    pub n_other: u64,
}

/// Point summary of the posterior.
#[derive(Clone, Copy, Debug)]
pub struct RateEstimate {
    pub gamma_plus: f64,
    pub gamma_minus: f64,
    pub sigma_plus: f64,
    pub sigma_minus: f64,
}

/// Outcome flag of a successful update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStatus {
    Ok,
    /// Nearly all posterior mass sits in one grid cell.
    DeltaLike,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("dark time must be non-negative, got {0}")]
    NegativeProbeTime(f64),

    #[error("measurement averaged zero readouts")]
    ZeroReadouts,

    #[error("measured difference is not finite: {0}")]
    NonFiniteValue(f64),
}

/// Posterior over `(gamma_plus, gamma_minus)` with incremental updates.
pub struct RateEstimator {
    grid: RateGrid,
    model: RelaxationModel,
    prior: Array2<f64>,
    log_like: Array2<f64>,
    posterior: Array2<f64>,
    n_updates: usize,
}

impl RateEstimator {
    /// Starts from the given prior; the initial posterior equals the
    /// normalised prior.
    pub fn new(grid: RateGrid, model: RelaxationModel, prior: Prior) -> Self {
        let mut prior_density = prior.density(&grid);
        let norm = grid.integrate(&prior_density);
        prior_density.mapv_inplace(|v| v / norm);
        let log_like = Array2::zeros(grid.shape());
        let posterior = prior_density.clone();
        Self {
            grid,
            model,
            prior: prior_density,
            log_like,
            posterior,
            n_updates: 0,
        }
    }

    pub fn grid(&self) -> &RateGrid {
        &self.grid
    }

    pub fn model(&self) -> &RelaxationModel {
        &self.model
    }

    /// The current normalised posterior density, indexed
    /// `[gamma_minus, gamma_plus]`.
    pub fn posterior(&self) -> &Array2<f64> {
        &self.posterior
    }

    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// Marginal means and standard deviations of the current posterior.
    pub fn estimate(&self) -> RateEstimate {
        RateEstimate {
            gamma_plus: self.grid.mean_gamma_plus(&self.posterior),
            gamma_minus: self.grid.mean_gamma_minus(&self.posterior),
            sigma_plus: self.grid.std_gamma_plus(&self.posterior),
            sigma_minus: self.grid.std_gamma_minus(&self.posterior),
        }
    }

    /// Folds one measurement into the posterior.
    ///
    /// `t = 0` is accepted: the model predicts the same mean and variance on
    /// every grid node there, so the update is a no-op on the posterior
    /// shape. Negative dark times and zero readout counts are rejected.
    pub fn update(&mut self, m: &Measurement) -> Result<UpdateStatus, EstimatorError> {
        if m.t < 0.0 {
            return Err(EstimatorError::NegativeProbeTime(m.t));
        }
        if m.n_ms0 == 0 || m.n_other == 0 {
            return Err(EstimatorError::ZeroReadouts);
        }
        if !m.z.is_finite() {
            return Err(EstimatorError::NonFiniteValue(m.z));
        }

        let (nm, np) = self.grid.shape();
        for j in 0..nm {
            let gm = self.grid.gamma_minus()[j];
            for i in 0..np {
                let gp = self.grid.gamma_plus()[i];
                let mu = self.model.diff(m.kind, m.t, gp, gm);
                let var = self
                    .model
                    .diff_variance(m.kind, m.t, gp, gm, m.n_ms0, m.n_other);
                let resid = m.z - mu;
                self.log_like[(j, i)] -= resid * resid / (2.0 * var) + 0.5 * var.ln();
            }
        }

        // Re-anchor at the maximum so exponentials stay in (0, 1].
        let peak = self
            .log_like
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let mut unnorm = Array2::from_shape_fn((nm, np), |(j, i)| {
            self.prior[(j, i)] * (self.log_like[(j, i)] - peak).exp()
        });
        let norm = self.grid.integrate(&unnorm);
        unnorm.mapv_inplace(|v| v / norm);
        self.posterior = unnorm;
        self.n_updates += 1;

        let status = if self.peak_cell_mass() > 0.999 {
            warn!(
                "posterior is delta-like after {} update(s); the rate grid \
                 probably no longer brackets the true rates",
                self.n_updates
            );
            UpdateStatus::DeltaLike
        } else {
            UpdateStatus::Ok
        };
        debug!(
            "update {}: kind {}, t = {:.3e} s, z = {:.4e}",
            self.n_updates, m.kind, m.t, m.z
        );
        Ok(status)
    }

    // Fraction of total probability mass carried by the single heaviest cell.
    fn peak_cell_mass(&self) -> f64 {
        let (nm, np) = self.grid.shape();
        let mut peak = 0.0f64;
        for j in 0..nm {
            for i in 0..np {
                peak = peak.max(self.posterior[(j, i)] * self.grid.cell_weight(j, i));
            }
        }
        peak
    }
}
