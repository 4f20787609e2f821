//! Cycling experiment configuration

use crate::analysis::{InflationConfig, UpdateStrategy, VerticalLocalization};
use crate::error::SqgError;
use crate::model::{
    CovarianceModel, EigenRandomPattern, Forcing, PatternBasis, PatternForcing, PatternNorm,
    ShiftPerturbation, ShiftPerturbationConfig,
};
use crate::observation::{NetworkKind, ObservedLevels};
use crate::rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Settings of one assimilation experiment
///
/// Defaults reproduce the reference experiment: 40 members, 4096 randomly
/// placed observations of both boundaries with 1 K error, 440 cycles of
/// which the first 80 are spin-up, Hodyss–Campbell inflation and the serial
/// square-root filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Horizontal localization length scale (m); infinity disables tapering
    pub hcovlocal: f64,
    /// Cross-boundary localization factor; negative derives it from the Rossby radius
    pub vcovlocal: f64,
    /// Stochastic forcing of the ensemble members
    pub forcing: ForcingConfig,
    /// Posterior inflation coefficients
    pub inflation: InflationConfig,
    /// Ensemble members
    pub nanals: usize,
    /// Observation error standard deviation (K)
    pub oberrstdev: f64,
    /// Assimilation cycles
    pub nassim: usize,
    /// Cycles excluded from the error spectra
    pub nassim_spinup: usize,
    /// Observed boundaries
    pub levob: ObservedLevels,
    /// Random observation count, or `-nskip` for a fixed network
    pub nobs: i64,
    /// Replace the analysis by noisy truth when every point of both boundaries is observed
    pub direct_insertion: bool,
    /// Ensemble update algorithm
    pub update: UpdateStrategy,
    /// Run seed
    pub seed: u64,
    /// FFT worker threads per member model; 0 uses the ambient Rayon pool
    pub threads: usize,
    /// Members contributing to the spread spectrum
    pub kespec_members: usize,
    /// Hyperdiffusion e-folding time (s) overriding the climatology's
    pub diff_efold: Option<f64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            hcovlocal: 2000.0e3,
            vcovlocal: -1.0,
            forcing: ForcingConfig::None,
            inflation: InflationConfig::default(),
            nanals: 40,
            oberrstdev: 1.0,
            nassim: 440,
            nassim_spinup: 80,
            levob: ObservedLevels::Both,
            nobs: 4096,
            direct_insertion: false,
            update: UpdateStrategy::Serial,
            seed: 42,
            threads: 0,
            kespec_members: 4,
            diff_efold: None,
        }
    }
}

impl ExperimentConfig {
    /// Cross-boundary localization setting
    pub fn vertical_localization(&self) -> VerticalLocalization {
        VerticalLocalization::from_signed(self.vcovlocal)
    }

    /// Observation network shape
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when `nobs` is zero
    pub fn network(&self) -> Result<NetworkKind, SqgError> {
        NetworkKind::from_signed(self.nobs)
    }

    /// Check the experiment settings
    ///
    /// # Errors
    ///
    /// `EnsembleTooSmall` for fewer than two members, `InvalidConfig` for
    /// any other out-of-range value
    pub fn validate(&self) -> Result<(), SqgError> {
        if self.nanals < 2 {
            return Err(SqgError::EnsembleTooSmall(self.nanals));
        }
        if self.hcovlocal.is_nan() || self.hcovlocal <= 0.0 {
            return Err(SqgError::InvalidConfig(format!(
                "hcovlocal must be positive, got {}",
                self.hcovlocal
            )));
        }
        if !(self.oberrstdev > 0.0 && self.oberrstdev.is_finite()) {
            return Err(SqgError::InvalidConfig(format!(
                "oberrstdev must be positive, got {}",
                self.oberrstdev
            )));
        }
        if self.nassim == 0 {
            return Err(SqgError::InvalidConfig("nassim must be at least 1".into()));
        }
        if self.nassim_spinup > self.nassim {
            return Err(SqgError::InvalidConfig(format!(
                "spin-up ({}) exceeds the number of cycles ({})",
                self.nassim_spinup, self.nassim
            )));
        }
        if self.kespec_members == 0 || self.kespec_members > self.nanals {
            return Err(SqgError::InvalidConfig(format!(
                "kespec_members must be in 1..={}, got {}",
                self.nanals, self.kespec_members
            )));
        }
        if let Some(efold) = self.diff_efold {
            if efold <= 0.0 {
                return Err(SqgError::InvalidConfig(format!(
                    "diff_efold must be positive, got {efold}"
                )));
            }
        }
        self.network()?;
        self.forcing.validate()
    }
}

/// Stochastic forcing applied to every ensemble member
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ForcingConfig {
    /// Deterministic members
    #[default]
    None,
    /// Random-shift high-pass self-perturbation
    Shift(ShiftPerturbationConfig),
    /// Eigenvector random pattern, one per boundary
    Pattern(PatternConfig),
}

/// Random pattern settings, one entry per boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Amplitude: K in the PV norm, m²/s in the streamfunction norm
    pub amplitude: [f64; 2],
    /// Spatial correlation length in grid intervals
    pub hcorr: [f64; 2],
    /// Temporal correlation in model time steps
    pub tcorr: [f64; 2],
    /// Whether the pattern is PV or streamfunction
    pub norm: PatternNorm,
    /// Spatial covariance shape
    pub covariance: CovarianceModel,
    /// Fraction of variance kept in the truncated basis
    pub thresh: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            amplitude: [0.0, 0.0],
            hcorr: [2.0, 2.0],
            tcorr: [6.0, 6.0],
            norm: PatternNorm::Pv,
            covariance: CovarianceModel::Matern52,
            thresh: 0.99,
        }
    }
}

impl ForcingConfig {
    /// Whether any member receives perturbation winds
    pub fn is_active(&self) -> bool {
        match self {
            Self::None => false,
            Self::Shift(shift) => shift.amplitude > 0.0,
            Self::Pattern(pattern) => pattern.amplitude.iter().any(|&a| a != 0.0),
        }
    }

    fn validate(&self) -> Result<(), SqgError> {
        match self {
            Self::Pattern(pattern) if self.is_active() => {
                let positive = |v: &[f64; 2]| v.iter().all(|&x| x > 0.0);
                if !positive(&pattern.hcorr) || !positive(&pattern.tcorr) {
                    return Err(SqgError::InvalidConfig(format!(
                        "pattern correlations must be positive (hcorr={:?}, tcorr={:?})",
                        pattern.hcorr, pattern.tcorr
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Builds the forcing of each ensemble member
///
/// Pattern bases are factored once and shared; every member draws from its
/// own sub-stream of the run seed.
pub(crate) struct ForcingFactory {
    seed: u64,
    domain_size: f64,
    kind: FactoryKind,
}

enum FactoryKind {
    None,
    Shift(ShiftPerturbationConfig),
    Pattern {
        prototypes: [EigenRandomPattern; 2],
        norm: PatternNorm,
    },
}

impl ForcingFactory {
    /// Prepare member forcing on an `n × n` grid
    ///
    /// `scalefact` converts the PV-norm amplitude from K to PV units.
    pub(crate) fn new(
        config: &ForcingConfig,
        seed: u64,
        n: usize,
        domain_size: f64,
        dt: f64,
        scalefact: f64,
    ) -> Result<Self, SqgError> {
        let kind = match config {
            _ if !config.is_active() => FactoryKind::None,
            ForcingConfig::None => FactoryKind::None,
            ForcingConfig::Shift(shift) => FactoryKind::Shift(shift.clone()),
            ForcingConfig::Pattern(pattern) => {
                let dx = domain_size / n as f64;
                let stdev = |level: usize| match pattern.norm {
                    PatternNorm::Pv => pattern.amplitude[level] / scalefact,
                    PatternNorm::Psi => pattern.amplitude[level],
                };
                let lower = Arc::new(PatternBasis::new(
                    n,
                    domain_size,
                    pattern.hcorr[0] * dx,
                    pattern.covariance,
                    pattern.thresh,
                )?);
                let upper = if pattern.hcorr[1] == pattern.hcorr[0] {
                    Arc::clone(&lower)
                } else {
                    Arc::new(PatternBasis::new(
                        n,
                        domain_size,
                        pattern.hcorr[1] * dx,
                        pattern.covariance,
                        pattern.thresh,
                    )?)
                };
                let prototypes = [
                    EigenRandomPattern::new(
                        lower,
                        stdev(0),
                        dt,
                        pattern.tcorr[0] * dt,
                        rng::substream(seed, 0),
                    )?,
                    EigenRandomPattern::new(
                        upper,
                        stdev(1),
                        dt,
                        pattern.tcorr[1] * dt,
                        rng::substream(seed, 1),
                    )?,
                ];
                FactoryKind::Pattern {
                    prototypes,
                    norm: pattern.norm,
                }
            }
        };
        Ok(Self {
            seed,
            domain_size,
            kind,
        })
    }

    /// Forcing of member `member`
    pub(crate) fn build(&self, member: usize) -> Result<Forcing, SqgError> {
        // Sub-streams 0 and 1 seed the prototypes
        let base = 2 + 2 * member as u64;
        Ok(match &self.kind {
            FactoryKind::None => Forcing::None,
            FactoryKind::Shift(shift) => Forcing::SelfPerturbation(ShiftPerturbation::new(
                shift.clone(),
                self.domain_size,
                rng::substream(self.seed, base),
            )?),
            FactoryKind::Pattern { prototypes, norm } => {
                let [lower, upper] = prototypes;
                Forcing::Pattern(PatternForcing::new(
                    Box::new(lower.with_rng(rng::substream(self.seed, base))),
                    Box::new(upper.with_rng(rng::substream(self.seed, base + 1))),
                    *norm,
                ))
            }
        })
    }
}
