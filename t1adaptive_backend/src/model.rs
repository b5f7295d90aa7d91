//! Closed-form forward model for the three-level spin-relaxation system.
//!
//! The ground-state spin triplet relaxes between |ms=0> and |ms=+1> at rate
//! gamma_plus and between |ms=0> and |ms=-1> at rate gamma_minus. With
//! `G0 = sqrt(gp^2 - gp*gm + gm^2)` and decay exponents
//! `beta_pm = gp + gm +- G0`, the expected photocount per optical readout of
//! a state prepared a dark time `t` earlier has the bi-exponential forms
//! implemented below. `PL0` is the mean photocount per readout of |ms=0>,
//! `C` the optical contrast.
//!
//! The measured observable is a *difference of means*:
//! `D+(t) = E_ms0(t) - E_msp(t)` and `D-(t) = E_ms0(t) - E_msm(t)`, both of
//! which reduce to a clean two-exponential expression with leading factor
//! `C*PL0 / (2 G0)`.
//!
//! All functions are scalar; the estimator maps them point-wise over the
//! rate grid. `G0 = 0` requires `gp = gm = 0`, which grid construction rules
//! out (rates are strictly positive), so the divisions here are safe.

/// The two measurable relaxation observables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasurementKind {
    /// Compare |ms=0> against |ms=+1> after a dark time t.
    DiffPlus,
    /// Compare |ms=0> against |ms=-1> after a dark time t.
    DiffMinus,
}

impl std::fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MeasurementKind::DiffPlus => write!(f, "diff+"),
            MeasurementKind::DiffMinus => write!(f, "diff-"),
        }
    }
}

/// Photophysics constants of the emitter under readout.
#[derive(Clone, Copy, Debug)]
pub struct RelaxationModel {
    /// Mean photocounts per readout from |ms=0>.
    pub pl0: f64,
    /// Optical spin contrast, in (0, 1).
    pub contrast: f64,
}

impl RelaxationModel {
    pub fn new(pl0: f64, contrast: f64) -> Self {
        Self { pl0, contrast }
    }

    /// Expected counts per readout of |ms=0> prepared a dark time `t` ago.
    pub fn counts_ms0(&self, t: f64, gp: f64, gm: f64) -> f64 {
        let (g0, beta_p, beta_m) = rate_constants(gp, gm);
        let a = self.pl0 * (1.0 - 2.0 * self.contrast / 3.0);
        let k = self.contrast * self.pl0 / (6.0 * g0);
        a + k
            * ((2.0 * g0 + gp + gm) * (-beta_p * t).exp()
                + (2.0 * g0 - gp - gm) * (-beta_m * t).exp())
    }

    /// Expected counts per readout of |ms=+1> prepared a dark time `t` ago.
    pub fn counts_msp(&self, t: f64, gp: f64, gm: f64) -> f64 {
        let (g0, beta_p, beta_m) = rate_constants(gp, gm);
        let a = self.pl0 * (1.0 - 2.0 * self.contrast / 3.0);
        let k = self.contrast * self.pl0 / (6.0 * g0);
        a - k
            * ((g0 + 2.0 * gp - gm) * (-beta_p * t).exp()
                + (g0 - 2.0 * gp + gm) * (-beta_m * t).exp())
    }

    /// Expected counts per readout of |ms=-1> prepared a dark time `t` ago.
    pub fn counts_msm(&self, t: f64, gp: f64, gm: f64) -> f64 {
        let (g0, beta_p, beta_m) = rate_constants(gp, gm);
        let a = self.pl0 * (1.0 - 2.0 * self.contrast / 3.0);
        let k = self.contrast * self.pl0 / (6.0 * g0);
        a - k
            * ((g0 + 2.0 * gm - gp) * (-beta_p * t).exp()
                + (g0 - 2.0 * gm + gp) * (-beta_m * t).exp())
    }

    /// Expected difference of mean counts for the requested observable.
    pub fn diff(&self, kind: MeasurementKind, t: f64, gp: f64, gm: f64) -> f64 {
        let (g0, beta_p, beta_m) = rate_constants(gp, gm);
        let lead = self.contrast * self.pl0 / (2.0 * g0);
        let g = match kind {
            MeasurementKind::DiffPlus => gp,
            MeasurementKind::DiffMinus => gm,
        };
        lead * ((g0 + g) * (-beta_p * t).exp() + (g0 - g) * (-beta_m * t).exp())
    }

    /// Expected counts for the "other" state of the requested observable.
    pub fn counts_other(&self, kind: MeasurementKind, t: f64, gp: f64, gm: f64) -> f64 {
        match kind {
            MeasurementKind::DiffPlus => self.counts_msp(t, gp, gm),
            MeasurementKind::DiffMinus => self.counts_msm(t, gp, gm),
        }
    }

    /// Variance of a measured difference formed from `n_ms0` readouts of
    /// |ms=0> and `n_other` readouts of the compared state, assuming Poisson
    /// photon statistics.
    pub fn diff_variance(
        &self,
        kind: MeasurementKind,
        t: f64,
        gp: f64,
        gm: f64,
        n_ms0: u64,
        n_other: u64,
    ) -> f64 {
        self.counts_ms0(t, gp, gm) / n_ms0 as f64
            + self.counts_other(kind, t, gp, gm) / n_other as f64
    }
}

fn rate_constants(gp: f64, gm: f64) -> (f64, f64, f64) {
    let g0 = (gp * gp - gp * gm + gm * gm).sqrt();
    (g0, gp + gm + g0, gp + gm - g0)
}
