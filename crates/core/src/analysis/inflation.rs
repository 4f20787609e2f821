//! Posterior multiplicative inflation
//!
//! The factor is computed per state element and applied to all members
//! alike, so the posterior mean is unchanged.

use super::EnsembleState;
use serde::{Deserialize, Serialize};

/// Inflation coefficients
///
/// A negative `covinflate2` selects relaxation to prior spread with
/// coefficient `covinflate1`; otherwise Hodyss–Campbell inflation is used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InflationConfig {
    /// RTPS relaxation coefficient, or the posterior-variance weight
    pub covinflate1: f64,
    /// Increment weight of Hodyss–Campbell inflation; negative selects RTPS
    pub covinflate2: f64,
}

impl Default for InflationConfig {
    fn default() -> Self {
        Self {
            covinflate1: 1.0,
            covinflate2: 1.0,
        }
    }
}

/// Inflation scheme
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inflation {
    /// Relaxation to prior spread
    Rtps {
        /// Fraction of the lost spread restored
        coefficient: f64,
    },
    /// Hodyss–Campbell posterior variance target
    HodyssCampbell {
        /// Weight of the posterior variance
        c1: f64,
        /// Weight of the squared mean increment
        c2: f64,
    },
}

impl From<InflationConfig> for Inflation {
    fn from(config: InflationConfig) -> Self {
        if config.covinflate2 < 0.0 {
            Self::Rtps {
                coefficient: config.covinflate1,
            }
        } else {
            Self::HodyssCampbell {
                c1: config.covinflate1,
                c2: config.covinflate2,
            }
        }
    }
}

impl Inflation {
    /// Factor for one element given prior and posterior variance and the
    /// mean analysis increment
    pub fn factor(&self, fsprd: f64, asprd: f64, increment: f64, nanals: usize) -> f64 {
        if asprd <= 0.0 {
            return 1.0;
        }
        match *self {
            Self::Rtps { coefficient } => {
                let (fstd, astd) = (fsprd.sqrt(), asprd.sqrt());
                1.0 + coefficient * (fstd - astd) / astd
            }
            Self::HodyssCampbell { c1, c2 } => {
                if fsprd <= 0.0 {
                    return 1.0;
                }
                let n = nanals as f64;
                let ratio = asprd / fsprd;
                let target = c1 * asprd
                    + ratio * ratio * (fsprd / n + c2 * 2.0 * increment * increment / (n - 1.0));
                (target / asprd).sqrt()
            }
        }
    }

    /// Inflate posterior perturbations in place; returns the factor field
    ///
    /// `fsprd` is the prior variance and `background_mean` the prior mean,
    /// both per state element.
    pub fn apply(
        &self,
        posterior: &mut EnsembleState,
        fsprd: &[f64],
        background_mean: &[f64],
    ) -> Vec<f64> {
        let nanals = posterior.nanals();
        let mean = posterior.mean();
        let asprd = posterior.variance();
        let factors: Vec<f64> = (0..mean.len())
            .map(|i| self.factor(fsprd[i], asprd[i], mean[i] - background_mean[i], nanals))
            .collect();

        for m in 0..nanals {
            for ((x, &mu), &f) in posterior.member_mut(m).iter_mut().zip(&mean).zip(&factors) {
                if f != 1.0 {
                    *x = mu + f * (*x - mu);
                }
            }
        }
        factors
    }
}
