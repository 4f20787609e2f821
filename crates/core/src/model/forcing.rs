//! Stochastic wind perturbations for the SQG model
//!
//! A forcing strategy turns the current spectral PV into a perturbation
//! streamfunction. The model converts it to winds once per full RK4 step,
//! on the first substage, and adds the same winds in all four substages.

use super::operators::{SpectralOperators, WindField};
use crate::error::SqgError;
use crate::rng;
use crate::spectral::Complex64;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Source of a spatially correlated random field that evolves in time
///
/// One pattern covers one boundary (`n × n` values, row-major).
pub trait RandomPattern: Send {
    /// Current field
    fn pattern(&self) -> &[f64];

    /// Advance the field one model time step
    fn evolve(&mut self);
}

/// How a random pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternNorm {
    /// The pattern is PV and is inverted to streamfunction
    Pv,
    /// The pattern is streamfunction
    Psi,
}

/// Random-shift self-perturbation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftPerturbationConfig {
    /// Standard deviation of the random shift (grid points); 0 skips the shift
    pub shift: f64,
    /// Amplitude applied to the perturbation streamfunction
    pub amplitude: f64,
    /// Shift decorrelation time (time steps); 0 draws independent shifts
    pub correlation: f64,
    /// Order of the high-pass filter
    pub diff_order: f64,
    /// E-folding time of the high-pass filter (s)
    pub diff_efold: f64,
}

impl Default for ShiftPerturbationConfig {
    fn default() -> Self {
        Self {
            shift: 1.0,
            amplitude: 1.0,
            correlation: 0.0,
            diff_order: 8.0,
            diff_efold: 86400.0 / 3.0,
        }
    }
}

/// Perturbation from the difference between the PV and a randomly shifted
/// copy of itself, high-pass filtered
pub struct ShiftPerturbation {
    config: ShiftPerturbationConfig,
    lag1: f64,
    previous: (f64, f64),
    filter: Option<Vec<f64>>,
    domain_size: f64,
    rng: StdRng,
}

impl std::fmt::Debug for ShiftPerturbation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShiftPerturbation")
            .field("config", &self.config)
            .field("lag1", &self.lag1)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

impl ShiftPerturbation {
    /// Create the perturbation for a domain of `domain_size` meters
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for negative shift or correlation, or a non-positive
    /// filter e-folding time
    pub fn new(
        config: ShiftPerturbationConfig,
        domain_size: f64,
        mut rng: StdRng,
    ) -> Result<Self, SqgError> {
        if config.shift < 0.0 || config.correlation < 0.0 || config.diff_efold <= 0.0 {
            return Err(SqgError::InvalidConfig(format!(
                "invalid shift perturbation settings: {config:?}"
            )));
        }
        let lag1 = if config.correlation == 0.0 {
            0.0
        } else {
            (-1.0 / config.correlation).exp()
        };
        let previous = (
            rng::normal(&mut rng) * config.shift,
            rng::normal(&mut rng) * config.shift,
        );
        Ok(Self {
            config,
            lag1,
            previous,
            filter: None,
            domain_size,
            rng,
        })
    }

    /// Lag-1 autocorrelation of the shift
    pub fn lag1_correlation(&self) -> f64 {
        self.lag1
    }

    /// Most recent shift `(x, y)` in grid points
    pub fn current_shift(&self) -> (f64, f64) {
        self.previous
    }

    fn streamfunction(
        &mut self,
        pvspec: &[Complex64],
        ops: &SpectralOperators,
    ) -> Option<Vec<Complex64>> {
        if self.config.amplitude <= 0.0 {
            return None;
        }

        let innovation = (1.0 - self.lag1 * self.lag1).sqrt();
        let shift_x =
            innovation * rng::normal(&mut self.rng) * self.config.shift + self.lag1 * self.previous.0;
        let shift_y =
            innovation * rng::normal(&mut self.rng) * self.config.shift + self.lag1 * self.previous.1;
        self.previous = (shift_x, shift_y);

        let shifted = if self.config.shift > 0.0 {
            let pv = ops.transform().inverse_levels(pvspec);
            let moved = shift_periodic(&pv, ops.n(), shift_x, shift_y);
            ops.transform().forward_levels(&moved)
        } else {
            pvspec.to_vec()
        };

        let (efold, order, domain) = (
            self.config.diff_efold,
            self.config.diff_order,
            self.domain_size,
        );
        let filter = self
            .filter
            .get_or_insert_with(|| ops.hyperdiffusion_filter(efold, order, domain));
        let nspec = ops.spectral_len();
        let high_pass: Vec<Complex64> = shifted
            .iter()
            .enumerate()
            .map(|(i, &c)| c * (1.0 - filter[i % nspec]))
            .collect();

        let amplitude = self.config.amplitude;
        Some(
            ops.invert(&high_pass)
                .into_iter()
                .map(|c| c * amplitude)
                .collect(),
        )
    }
}

/// Perturbation streamfunction from one random pattern per boundary
pub struct PatternForcing {
    patterns: Vec<Box<dyn RandomPattern>>,
    norm: PatternNorm,
}

impl std::fmt::Debug for PatternForcing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternForcing")
            .field("levels", &self.patterns.len())
            .field("norm", &self.norm)
            .finish()
    }
}

impl PatternForcing {
    /// Combine the lower and upper boundary patterns
    pub fn new(
        lower: Box<dyn RandomPattern>,
        upper: Box<dyn RandomPattern>,
        norm: PatternNorm,
    ) -> Self {
        Self {
            patterns: vec![lower, upper],
            norm,
        }
    }

    /// Current pattern of one boundary
    pub fn pattern(&self, level: usize) -> &[f64] {
        self.patterns[level].pattern()
    }

    fn streamfunction(&mut self, ops: &SpectralOperators) -> Vec<Complex64> {
        let field: Vec<f64> = self
            .patterns
            .iter()
            .flat_map(|p| p.pattern().iter().copied())
            .collect();
        let spec = ops.transform().forward_levels(&field);
        let psispec = match self.norm {
            PatternNorm::Pv => ops.invert(&spec),
            PatternNorm::Psi => spec,
        };
        for pattern in &mut self.patterns {
            pattern.evolve();
        }
        psispec
    }
}

/// Wind perturbation strategy of one model instance
#[derive(Debug, Default)]
pub enum Forcing {
    /// Deterministic model
    #[default]
    None,
    /// Random-shift high-pass self-perturbation
    SelfPerturbation(ShiftPerturbation),
    /// Externally generated random streamfunction pattern
    Pattern(PatternForcing),
}

impl Forcing {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SelfPerturbation(_) => "shift",
            Self::Pattern(_) => "pattern",
        }
    }

    /// Perturbation winds for the coming RK4 step, if any
    pub(crate) fn wind_perturbation(
        &mut self,
        pvspec: &[Complex64],
        ops: &SpectralOperators,
    ) -> Option<WindField> {
        let psispec = match self {
            Self::None => return None,
            Self::SelfPerturbation(shift) => shift.streamfunction(pvspec, ops)?,
            Self::Pattern(pattern) => pattern.streamfunction(ops),
        };
        Some(ops.winds(&psispec))
    }
}

/// Shift stacked `n × n` levels by `(dx, dy)` grid points with bilinear
/// interpolation and periodic wrap (`out(x) = in(x - dx)`)
pub fn shift_periodic(field: &[f64], n: usize, dx: f64, dy: f64) -> Vec<f64> {
    let npts = n * n;
    let wrap = |i: f64| (i as i64).rem_euclid(n as i64) as usize;
    let mut out = vec![0.0; field.len()];

    for (src, dst) in field.chunks(npts).zip(out.chunks_mut(npts)) {
        for y in 0..n {
            let sy = y as f64 - dy;
            let y0 = sy.floor();
            let fy = sy - y0;
            let (ya, yb) = (wrap(y0), wrap(y0 + 1.0));
            for x in 0..n {
                let sx = x as f64 - dx;
                let x0 = sx.floor();
                let fx = sx - x0;
                let (xa, xb) = (wrap(x0), wrap(x0 + 1.0));
                dst[y * n + x] = (1.0 - fx) * (1.0 - fy) * src[ya * n + xa]
                    + fx * (1.0 - fy) * src[ya * n + xb]
                    + (1.0 - fx) * fy * src[yb * n + xa]
                    + fx * fy * src[yb * n + xb];
            }
        }
    }
    out
}
