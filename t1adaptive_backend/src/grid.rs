//! The discretised rate domain and priors over it.
//!
//! The estimator represents its belief about the relaxation-rate pair
//! `(gamma_plus, gamma_minus)` as a probability *density* sampled on a
//! rectangular grid: axis vectors of strictly positive, strictly increasing
//! rates, and 2-D arrays indexed `[gamma_minus, gamma_plus]`. Integrals are
//! trapezoidal in both dimensions, so densities need not live on uniform
//! axes.
//!
//! [`Prior`] names the supported initial densities; [`Prior::density`]
//! evaluates them (unnormalised) on a [`RateGrid`].

use ndarray::{Array1, Array2};
use thiserror::Error;

/// Rectangular `(gamma_plus, gamma_minus)` rate domain. Rates are in 1/s.
#[derive(Clone, Debug)]
pub struct RateGrid {
    gamma_plus: Array1<f64>,
    gamma_minus: Array1<f64>,
    // per-axis trapezoid weights, cached at construction
    w_plus: Array1<f64>,
    w_minus: Array1<f64>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("{axis} axis needs at least 2 points, got {len}")]
    TooFewPoints { axis: &'static str, len: usize },

    #[error("{axis} axis must be strictly positive (rate {value} at index {index})")]
    NonPositiveRate {
        axis: &'static str,
        index: usize,
        value: f64,
    },

    #[error("{axis} axis must be strictly increasing at index {index}")]
    NonIncreasingAxis { axis: &'static str, index: usize },
}

impl RateGrid {
    /// Builds a grid from explicit axis vectors. Both must be strictly
    /// positive and strictly increasing, with at least two points each.
    pub fn new(gamma_plus: Vec<f64>, gamma_minus: Vec<f64>) -> Result<Self, GridError> {
        validate_axis("gamma_plus", &gamma_plus)?;
        validate_axis("gamma_minus", &gamma_minus)?;
        let w_plus = trapezoid_weights(&gamma_plus);
        let w_minus = trapezoid_weights(&gamma_minus);
        Ok(Self {
            gamma_plus: Array1::from(gamma_plus),
            gamma_minus: Array1::from(gamma_minus),
            w_plus,
            w_minus,
        })
    }

    /// Uniformly spaced grid over `[min, max]` on both axes.
    pub fn linear(
        plus_bounds: (f64, f64),
        n_plus: usize,
        minus_bounds: (f64, f64),
        n_minus: usize,
    ) -> Result<Self, GridError> {
        Self::new(
            linspace(plus_bounds.0, plus_bounds.1, n_plus),
            linspace(minus_bounds.0, minus_bounds.1, n_minus),
        )
    }

    pub fn gamma_plus(&self) -> &Array1<f64> {
        &self.gamma_plus
    }

    pub fn gamma_minus(&self) -> &Array1<f64> {
        &self.gamma_minus
    }

    /// Array shape of fields over this grid: `(n_gamma_minus, n_gamma_plus)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.gamma_minus.len(), self.gamma_plus.len())
    }

    /// Evaluates a scalar function of `(gamma_plus, gamma_minus)` on every
    /// grid node.
    pub fn map<F>(&self, mut f: F) -> Array2<f64>
    where
        F: FnMut(f64, f64) -> f64,
    {
        Array2::from_shape_fn(self.shape(), |(j, i)| {
            f(self.gamma_plus[i], self.gamma_minus[j])
        })
    }

    /// 2-D trapezoidal integral of a field sampled on this grid.
    pub fn integrate(&self, field: &Array2<f64>) -> f64 {
        debug_assert_eq!(field.dim(), self.shape());
        let mut total = 0.0;
        for (j, row) in field.outer_iter().enumerate() {
            let mut row_sum = 0.0;
            for (i, &v) in row.iter().enumerate() {
                row_sum += v * self.w_plus[i];
            }
            total += row_sum * self.w_minus[j];
        }
        total
    }

    /// Posterior mean of `gamma_plus` under a normalised density.
    pub fn mean_gamma_plus(&self, density: &Array2<f64>) -> f64 {
        let weighted = Array2::from_shape_fn(self.shape(), |(j, i)| {
            density[(j, i)] * self.gamma_plus[i]
        });
        self.integrate(&weighted)
    }

    /// Posterior mean of `gamma_minus` under a normalised density.
    pub fn mean_gamma_minus(&self, density: &Array2<f64>) -> f64 {
        let weighted = Array2::from_shape_fn(self.shape(), |(j, i)| {
            density[(j, i)] * self.gamma_minus[j]
        });
        self.integrate(&weighted)
    }

    /// Posterior standard deviation of `gamma_plus`.
    pub fn std_gamma_plus(&self, density: &Array2<f64>) -> f64 {
        let mean = self.mean_gamma_plus(density);
        let weighted = Array2::from_shape_fn(self.shape(), |(j, i)| {
            let d = self.gamma_plus[i] - mean;
            density[(j, i)] * d * d
        });
        self.integrate(&weighted).max(0.0).sqrt()
    }

    /// Posterior standard deviation of `gamma_minus`.
    pub fn std_gamma_minus(&self, density: &Array2<f64>) -> f64 {
        let mean = self.mean_gamma_minus(density);
        let weighted = Array2::from_shape_fn(self.shape(), |(j, i)| {
            let d = self.gamma_minus[j] - mean;
            density[(j, i)] * d * d
        });
        self.integrate(&weighted).max(0.0).sqrt()
    }

    /// The integration weight (cell area) attached to one grid node.
    pub fn cell_weight(&self, j: usize, i: usize) -> f64 {
        self.w_minus[j] * self.w_plus[i]
    }
}

/// Initial density over the rate grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prior {
    /// Constant density over the whole grid.
    Flat,
    /// Gaussian centred mid-grid with per-axis sigma equal to half the axis
    /// span. Broad enough to stay informative-free near the centre while
    /// softly discounting the grid corners.
    Gaussian,
}

impl Prior {
    /// Evaluates the prior (unnormalised) on `grid`.
    pub fn density(&self, grid: &RateGrid) -> Array2<f64> {
        match self {
            Prior::Flat => Array2::ones(grid.shape()),
            Prior::Gaussian => {
                let gp = grid.gamma_plus();
                let gm = grid.gamma_minus();
                let (cp, sp) = centre_and_sigma(gp);
                let (cm, sm) = centre_and_sigma(gm);
                grid.map(|p, m| {
                    let zp = (p - cp) / sp;
                    let zm = (m - cm) / sm;
                    (-0.5 * (zp * zp + zm * zm)).exp()
                })
            }
        }
    }
}

fn centre_and_sigma(axis: &Array1<f64>) -> (f64, f64) {
    let lo = axis[0];
    let hi = axis[axis.len() - 1];
    ((lo + hi) / 2.0, (hi - lo) / 2.0)
}

fn validate_axis(name: &'static str, axis: &[f64]) -> Result<(), GridError> {
    if axis.len() < 2 {
        return Err(GridError::TooFewPoints {
            axis: name,
            len: axis.len(),
        });
    }
    for (k, &v) in axis.iter().enumerate() {
        if !(v > 0.0) {
            return Err(GridError::NonPositiveRate {
                axis: name,
                index: k,
                value: v,
            });
        }
        if k > 0 && v <= axis[k - 1] {
            return Err(GridError::NonIncreasingAxis {
                axis: name,
                index: k,
            });
        }
    }
    Ok(())
}

fn trapezoid_weights(axis: &[f64]) -> Array1<f64> {
    let n = axis.len();
    let mut w = Array1::zeros(n);
    w[0] = (axis[1] - axis[0]) / 2.0;
    w[n - 1] = (axis[n - 1] - axis[n - 2]) / 2.0;
    for k in 1..n - 1 {
        w[k] = (axis[k + 1] - axis[k - 1]) / 2.0;
    }
    w
}

fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![lo];
    }
    let step = (hi - lo) / (n - 1) as f64;
    (0..n).map(|k| lo + step * k as f64).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit_grid() -> RateGrid {
        RateGrid::linear((1e3, 11e3), 51, (2e3, 12e3), 41).unwrap()
    }

    #[test]
    fn constant_field_integrates_to_area() {
        let grid = unit_grid();
        let ones = Array2::ones(grid.shape());
        let area = 10e3 * 10e3;
        assert!((grid.integrate(&ones) - area).abs() / area < 1e-12);
    }

    #[test]
    fn linear_field_integrates_exactly() {
        // trapezoid rule is exact for fields linear in each coordinate
        let grid = unit_grid();
        let field = grid.map(|p, m| 2.0 * p + 3.0 * m);
        let expect = 10e3 * 10e3 * (2.0 * 6e3 + 3.0 * 7e3);
        assert!((grid.integrate(&field) - expect).abs() / expect < 1e-12);
    }

    #[test]
    fn flat_prior_means_sit_mid_grid() {
        let grid = unit_grid();
        let mut density = Prior::Flat.density(&grid);
        let norm = grid.integrate(&density);
        density.mapv_inplace(|v| v / norm);
        assert!((grid.mean_gamma_plus(&density) - 6e3).abs() < 1.0);
        assert!((grid.mean_gamma_minus(&density) - 7e3).abs() < 1.0);
        assert!(grid.std_gamma_plus(&density) > 0.0);
    }

    #[test]
    fn gaussian_prior_peaks_mid_grid() {
        let grid = unit_grid();
        let density = Prior::Gaussian.density(&grid);
        let (nm, np) = grid.shape();
        let centre = density[(nm / 2, np / 2)];
        let corner = density[(0, 0)];
        assert!(centre > corner);
        assert!((centre - 1.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_bad_axes() {
        assert!(matches!(
            RateGrid::new(vec![1.0], vec![1.0, 2.0]),
            Err(GridError::TooFewPoints { .. })
        ));
        assert!(matches!(
            RateGrid::new(vec![0.0, 1.0], vec![1.0, 2.0]),
            Err(GridError::NonPositiveRate { .. })
        ));
        assert!(matches!(
            RateGrid::new(vec![1.0, 2.0], vec![2.0, 1.0]),
            Err(GridError::NonIncreasingAxis { index: 1, .. })
        ));
    }
}
