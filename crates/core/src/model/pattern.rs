//! Eigenvector-based random patterns
//!
//! A stationary covariance on the periodic grid is factored once with a
//! symmetric eigen-decomposition; the leading eigenvectors are kept until they
//! explain the requested fraction of the variance. Patterns are linear
//! combinations of the scaled eigenvectors with AR(1) coefficients, giving a
//! lag-1 autocorrelation of `exp(-dt/tcorr)` per model step.

use super::forcing::RandomPattern;
use crate::analysis::cartdist;
use crate::error::SqgError;
use crate::rng;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Spatial covariance function of the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceModel {
    /// Matérn covariance with smoothness 5/2
    #[default]
    Matern52,
    /// Squared-exponential covariance
    Gaussian,
}

impl CovarianceModel {
    /// Correlation at distance `dist` for a length scale `corr_length`
    pub fn correlation(self, dist: f64, corr_length: f64) -> f64 {
        match self {
            Self::Matern52 => {
                let r = std::f64::consts::SQRT_2 * dist / corr_length;
                (1.0 + r + r * r / 3.0) * (-r).exp()
            }
            Self::Gaussian => (-(dist / corr_length).powi(2)).exp(),
        }
    }
}

/// Truncated, variance-rescaled eigenbasis of a grid covariance
#[derive(Debug, Clone)]
pub struct PatternBasis {
    n: usize,
    /// Eigenvectors times sqrt(eigenvalue), one column per retained mode
    scaled: DMatrix<f64>,
    explained: f64,
}

impl PatternBasis {
    /// Factor the covariance on an `n × n` grid of side `domain_size`
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an empty grid, non-positive length scale or a
    /// variance threshold outside `(0, 1]`
    pub fn new(
        n: usize,
        domain_size: f64,
        corr_length: f64,
        model: CovarianceModel,
        thresh: f64,
    ) -> Result<Self, SqgError> {
        if n == 0 || corr_length <= 0.0 || !(thresh > 0.0 && thresh <= 1.0) {
            return Err(SqgError::InvalidConfig(format!(
                "pattern basis needs n > 0, corr_length > 0, 0 < thresh <= 1 \
                 (got n={n}, corr_length={corr_length}, thresh={thresh})"
            )));
        }

        let npts = n * n;
        let dx = domain_size / n as f64;
        let coords: Vec<(f64, f64)> = (0..npts)
            .map(|p| ((p % n) as f64 * dx, (p / n) as f64 * dx))
            .collect();
        let cov = DMatrix::from_fn(npts, npts, |i, j| {
            let (xi, yi) = coords[i];
            let (xj, yj) = coords[j];
            model.correlation(cartdist(xi, yi, xj, yj, domain_size), corr_length)
        });

        let eigen = SymmetricEigen::new(cov);
        let mut order: Vec<usize> = (0..npts).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
        let total: f64 = eigen.eigenvalues.iter().map(|&e| e.max(0.0)).sum();

        let mut kept = Vec::new();
        let mut explained = 0.0;
        for &idx in &order {
            if thresh < 1.0 && explained >= thresh {
                break;
            }
            let value = if thresh < 1.0 {
                eigen.eigenvalues[idx].max(0.0)
            } else {
                eigen.eigenvalues[idx].max(1.0e-10)
            };
            explained += value / total;
            kept.push((idx, value));
        }
        let rescale = if thresh < 1.0 { 1.0 / explained } else { 1.0 };

        let mut scaled = DMatrix::zeros(npts, kept.len());
        for (col, &(idx, value)) in kept.iter().enumerate() {
            let weight = (value * rescale).sqrt();
            scaled.set_column(col, &(eigen.eigenvectors.column(idx) * weight));
        }
        debug!(
            n,
            modes = kept.len(),
            explained,
            "Random pattern eigenbasis ready"
        );

        Ok(Self {
            n,
            scaled,
            explained,
        })
    }

    /// Grid points in each direction
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of retained eigenmodes
    pub fn modes(&self) -> usize {
        self.scaled.ncols()
    }

    /// Fraction of total variance carried by the retained modes
    pub fn explained_variance(&self) -> f64 {
        self.explained
    }

    /// Pattern variance at grid point `p` for unit coefficients
    pub fn point_variance(&self, p: usize) -> f64 {
        self.scaled.row(p).iter().map(|v| v * v).sum()
    }
}

/// AR(1) random pattern on a shared eigenbasis
pub struct EigenRandomPattern {
    basis: Arc<PatternBasis>,
    stdev: f64,
    lag1: f64,
    coefs: DVector<f64>,
    field: DVector<f64>,
    rng: StdRng,
}

impl std::fmt::Debug for EigenRandomPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EigenRandomPattern")
            .field("modes", &self.basis.modes())
            .field("stdev", &self.stdev)
            .field("lag1", &self.lag1)
            .finish_non_exhaustive()
    }
}

impl EigenRandomPattern {
    /// Start a pattern with amplitude `stdev` and decorrelation time `tcorr`
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `dt` or `tcorr` is not positive
    pub fn new(
        basis: Arc<PatternBasis>,
        stdev: f64,
        dt: f64,
        tcorr: f64,
        mut rng: StdRng,
    ) -> Result<Self, SqgError> {
        if dt <= 0.0 || tcorr <= 0.0 {
            return Err(SqgError::InvalidConfig(format!(
                "pattern needs dt > 0 and tcorr > 0 (got dt={dt}, tcorr={tcorr})"
            )));
        }
        let lag1 = (-1.0_f64).exp().powf(dt / tcorr);
        let coefs = DVector::from_fn(basis.modes(), |_, _| rng::normal(&mut rng));
        let field = &basis.scaled * &coefs * stdev;
        Ok(Self {
            basis,
            stdev,
            lag1,
            coefs,
            field,
            rng,
        })
    }

    /// Independent pattern on the same basis with fresh coefficients
    pub fn with_rng(&self, mut rng: StdRng) -> Self {
        let coefs = DVector::from_fn(self.basis.modes(), |_, _| rng::normal(&mut rng));
        let field = &self.basis.scaled * &coefs * self.stdev;
        Self {
            basis: Arc::clone(&self.basis),
            stdev: self.stdev,
            lag1: self.lag1,
            coefs,
            field,
            rng,
        }
    }

    /// Lag-1 autocorrelation per model step
    pub fn lag1_correlation(&self) -> f64 {
        self.lag1
    }

    /// Current AR(1) coefficients
    pub fn coefficients(&self) -> &[f64] {
        self.coefs.as_slice()
    }
}

impl RandomPattern for EigenRandomPattern {
    fn pattern(&self) -> &[f64] {
        self.field.as_slice()
    }

    fn evolve(&mut self) {
        let innovation = (1.0 - self.lag1 * self.lag1).sqrt();
        for c in self.coefs.iter_mut() {
            *c = innovation * rng::normal(&mut self.rng) + self.lag1 * *c;
        }
        self.field = &self.basis.scaled * &self.coefs * self.stdev;
    }
}
