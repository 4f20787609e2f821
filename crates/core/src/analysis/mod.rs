//! Ensemble Kalman filter analysis
//!
//! The analysis consumes the background ensemble, its image in observation
//! space, the observations with their error variances and the localization
//! weights, and returns the posterior ensemble. Two update strategies are
//! available:
//!
//! - [`UpdateStrategy::Serial`]: serial square-root filter (EnSRF), one
//!   observation at a time, level-major then in network order
//! - [`UpdateStrategy::Letkf`]: local ensemble transform Kalman filter, one
//!   ensemble-space solve per grid point and boundary
//!
//! Posterior multiplicative inflation lives in [`inflation`].

mod ensrf;
pub mod inflation;
mod letkf;
pub mod localization;

pub use inflation::{Inflation, InflationConfig};
pub use localization::{
    cartdist, gaspcohn, LocalizationMatrices, Localizer, VerticalLocalization,
};

use crate::error::SqgError;
use crate::model::PvField;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ensemble update algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    /// Serial ensemble square-root filter
    #[default]
    Serial,
    /// Local ensemble transform Kalman filter
    Letkf,
}

impl UpdateStrategy {
    /// Whether the strategy needs observation-observation localization
    pub fn needs_observation_localization(self) -> bool {
        matches!(self, Self::Serial)
    }
}

/// Ensemble of two-level states, `[member][level][point]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleState {
    pub(crate) nanals: usize,
    pub(crate) npts: usize,
    pub(crate) data: Vec<f64>,
}

impl EnsembleState {
    /// Wrap flat member-major data
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `data` is not `nanals × 2 × npts` long
    pub fn new(nanals: usize, npts: usize, data: Vec<f64>) -> Result<Self, SqgError> {
        if data.len() != nanals * 2 * npts {
            return Err(SqgError::ShapeMismatch {
                what: "ensemble state",
                expected: nanals * 2 * npts,
                found: data.len(),
            });
        }
        Ok(Self { nanals, npts, data })
    }

    /// Stack member PV fields
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the members are on different grids
    pub fn from_members(members: &[PvField]) -> Result<Self, SqgError> {
        let npts = members.first().map_or(0, PvField::points);
        let mut data = Vec::with_capacity(members.len() * 2 * npts);
        for member in members {
            if member.points() != npts {
                return Err(SqgError::ShapeMismatch {
                    what: "ensemble member",
                    expected: 2 * npts,
                    found: member.data.len(),
                });
            }
            data.extend_from_slice(member.as_slice());
        }
        Ok(Self {
            nanals: members.len(),
            npts,
            data,
        })
    }

    /// Split back into member PV fields on an `n × n` grid
    pub fn to_members(&self, n: usize) -> Vec<PvField> {
        self.data
            .chunks(2 * self.npts)
            .map(|chunk| PvField {
                data: chunk.to_vec(),
                n,
            })
            .collect()
    }

    /// Number of members
    pub fn nanals(&self) -> usize {
        self.nanals
    }

    /// Grid points per level
    pub fn npts(&self) -> usize {
        self.npts
    }

    /// State length of one member (`2 × npts`)
    pub fn state_len(&self) -> usize {
        2 * self.npts
    }

    /// One member's state vector
    pub fn member(&self, m: usize) -> &[f64] {
        let len = self.state_len();
        &self.data[m * len..(m + 1) * len]
    }

    /// One member's state vector, mutable
    pub fn member_mut(&mut self, m: usize) -> &mut [f64] {
        let len = self.state_len();
        &mut self.data[m * len..(m + 1) * len]
    }

    /// Value of member `m` at `level`, `point`
    pub fn get(&self, m: usize, level: usize, point: usize) -> f64 {
        self.data[(m * 2 + level) * self.npts + point]
    }

    /// Flat member-major data
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Ensemble mean state
    pub fn mean(&self) -> Vec<f64> {
        column_mean(&self.data, self.nanals, self.state_len())
    }

    /// Unbiased ensemble variance per state element (divisor `nanals − 1`)
    pub fn variance(&self) -> Vec<f64> {
        column_variance(&self.data, self.nanals, self.state_len())
    }

    /// Point-major mean and perturbations, perturbations laid out
    /// `[(level·npts + point)·nanals + member]`
    pub(crate) fn split_point_major(&self) -> (Vec<f64>, Vec<f64>) {
        let len = self.state_len();
        let mean = self.mean();
        let mut prime = vec![0.0; len * self.nanals];
        for m in 0..self.nanals {
            for (i, &x) in self.member(m).iter().enumerate() {
                prime[i * self.nanals + m] = x - mean[i];
            }
        }
        (mean, prime)
    }

    /// Rebuild from point-major mean and perturbations
    pub(crate) fn from_point_major(nanals: usize, npts: usize, mean: &[f64], prime: &[f64]) -> Self {
        let len = 2 * npts;
        let mut data = vec![0.0; nanals * len];
        for (m, member) in data.chunks_mut(len).enumerate() {
            for (i, x) in member.iter_mut().enumerate() {
                *x = mean[i] + prime[i * nanals + m];
            }
        }
        Self { nanals, npts, data }
    }
}

/// Ensemble image in observation space, `[member][observed level][ob]`
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationEnsemble {
    pub(crate) nanals: usize,
    pub(crate) nlevob: usize,
    pub(crate) nobs: usize,
    pub(crate) data: Vec<f64>,
}

impl ObservationEnsemble {
    /// Wrap flat member-major data
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `data` is not `nanals × nlevob × nobs` long
    pub fn new(nanals: usize, nlevob: usize, nobs: usize, data: Vec<f64>) -> Result<Self, SqgError> {
        if data.len() != nanals * nlevob * nobs {
            return Err(SqgError::ShapeMismatch {
                what: "observation ensemble",
                expected: nanals * nlevob * nobs,
                found: data.len(),
            });
        }
        Ok(Self {
            nanals,
            nlevob,
            nobs,
            data,
        })
    }

    /// Number of members
    pub fn nanals(&self) -> usize {
        self.nanals
    }

    /// Number of observed levels
    pub fn nlevob(&self) -> usize {
        self.nlevob
    }

    /// Observations per level
    pub fn nobs(&self) -> usize {
        self.nobs
    }

    /// One member's observation vector
    pub fn member(&self, m: usize) -> &[f64] {
        let len = self.nlevob * self.nobs;
        &self.data[m * len..(m + 1) * len]
    }

    /// Ensemble mean in observation space
    pub fn mean(&self) -> Vec<f64> {
        column_mean(&self.data, self.nanals, self.nlevob * self.nobs)
    }

    /// Unbiased ensemble variance in observation space
    pub fn variance(&self) -> Vec<f64> {
        column_variance(&self.data, self.nanals, self.nlevob * self.nobs)
    }

    pub(crate) fn split_point_major(&self) -> (Vec<f64>, Vec<f64>) {
        let len = self.nlevob * self.nobs;
        let mean = self.mean();
        let mut prime = vec![0.0; len * self.nanals];
        for m in 0..self.nanals {
            for (i, &x) in self.member(m).iter().enumerate() {
                prime[i * self.nanals + m] = x - mean[i];
            }
        }
        (mean, prime)
    }
}

fn column_mean(data: &[f64], rows: usize, len: usize) -> Vec<f64> {
    let mut mean = vec![0.0; len];
    for row in data.chunks(len) {
        for (acc, &x) in mean.iter_mut().zip(row) {
            *acc += x;
        }
    }
    let scale = 1.0 / rows as f64;
    mean.iter_mut().for_each(|v| *v *= scale);
    mean
}

fn column_variance(data: &[f64], rows: usize, len: usize) -> Vec<f64> {
    let mean = column_mean(data, rows, len);
    let mut var = vec![0.0; len];
    for row in data.chunks(len) {
        for ((acc, &x), &mu) in var.iter_mut().zip(row).zip(&mean) {
            *acc += (x - mu) * (x - mu);
        }
    }
    let scale = 1.0 / (rows as f64 - 1.0);
    var.iter_mut().for_each(|v| *v *= scale);
    var
}

/// Observation inputs to one analysis
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    /// Observed values, `[observed level][ob]`
    pub observations: &'a [f64],
    /// Error variance per observation location
    pub oberrvar: &'a [f64],
    /// Boundary index of each observed level
    pub levob: &'a [usize],
    /// Localization weights for the network
    pub localization: &'a LocalizationMatrices,
}

/// Update the background ensemble with one batch of observations
///
/// # Errors
///
/// - `EnsembleTooSmall` for fewer than 2 members
/// - `ObservationErrorMismatch` if `oberrvar` does not have one entry per ob
/// - `ShapeMismatch` for inconsistent ensemble, observation or
///   localization dimensions
/// - `MissingObservationLocalization` for a serial update without
///   observation-observation weights
pub fn enkf_update(
    xens: &EnsembleState,
    hxens: &ObservationEnsemble,
    input: &AnalysisInput<'_>,
    strategy: UpdateStrategy,
) -> Result<EnsembleState, SqgError> {
    validate(xens, hxens, input, strategy)?;
    debug!(
        nanals = xens.nanals,
        nobs = hxens.nobs,
        levels = hxens.nlevob,
        ?strategy,
        "EnKF update"
    );
    match strategy {
        UpdateStrategy::Serial => ensrf::serial_update(xens, hxens, input),
        UpdateStrategy::Letkf => letkf::local_update(xens, hxens, input),
    }
}

fn validate(
    xens: &EnsembleState,
    hxens: &ObservationEnsemble,
    input: &AnalysisInput<'_>,
    strategy: UpdateStrategy,
) -> Result<(), SqgError> {
    if xens.nanals < 2 {
        return Err(SqgError::EnsembleTooSmall(xens.nanals));
    }
    let loc = input.localization;
    if input.oberrvar.len() != hxens.nobs {
        return Err(SqgError::ObservationErrorMismatch {
            nobs: hxens.nobs,
            nvar: input.oberrvar.len(),
        });
    }
    let checks = [
        ("observation ensemble members", xens.nanals, hxens.nanals),
        ("observed levels", input.levob.len(), hxens.nlevob),
        ("observations", hxens.nlevob * hxens.nobs, input.observations.len()),
        ("localization observations", hxens.nobs, loc.nobs),
        ("localization grid points", xens.npts, loc.npts),
    ];
    for (what, expected, found) in checks {
        if expected != found {
            return Err(SqgError::ShapeMismatch {
                what,
                expected,
                found,
            });
        }
    }
    if let Some(&level) = input.levob.iter().find(|&&l| l >= PvField::LEVELS) {
        return Err(SqgError::InvalidConfig(format!(
            "observed level {level} does not exist"
        )));
    }
    if strategy.needs_observation_localization() && loc.observation.is_none() {
        return Err(SqgError::MissingObservationLocalization);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_ensemble() -> EnsembleState {
        // 3 members, 2 points per level
        EnsembleState::new(
            3,
            2,
            vec![
                1.0, 2.0, 3.0, 4.0, //
                2.0, 2.0, 5.0, 4.0, //
                3.0, 2.0, 7.0, 4.0,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_mean_and_variance() {
        let ens = small_ensemble();
        assert_eq!(ens.mean(), vec![2.0, 2.0, 5.0, 4.0]);
        let var = ens.variance();
        assert_relative_eq!(var[0], 1.0);
        assert_eq!(var[1], 0.0);
        assert_relative_eq!(var[2], 4.0);
    }

    #[test]
    fn test_point_major_round_trip() {
        let ens = small_ensemble();
        let (mean, prime) = ens.split_point_major();
        assert_eq!(&prime[0..3], &[-1.0, 0.0, 1.0]);
        let back = EnsembleState::from_point_major(3, 2, &mean, &prime);
        assert_eq!(back, ens);
    }

    #[test]
    fn test_validation_errors() {
        let ens = small_ensemble();
        let hx = ObservationEnsemble::new(3, 1, 1, vec![1.0, 2.0, 3.0]).unwrap();
        let loc = LocalizationMatrices::unit(1, 2, false);
        let input = AnalysisInput {
            observations: &[2.5],
            oberrvar: &[1.0, 1.0],
            levob: &[0],
            localization: &loc,
        };
        assert_eq!(
            enkf_update(&ens, &hx, &input, UpdateStrategy::Letkf).unwrap_err(),
            SqgError::ObservationErrorMismatch { nobs: 1, nvar: 2 }
        );

        let input = AnalysisInput {
            oberrvar: &[1.0],
            ..input
        };
        assert_eq!(
            enkf_update(&ens, &hx, &input, UpdateStrategy::Serial).unwrap_err(),
            SqgError::MissingObservationLocalization
        );

        let single = EnsembleState::new(1, 2, vec![0.0; 4]).unwrap();
        let hx1 = ObservationEnsemble::new(1, 1, 1, vec![0.0]).unwrap();
        assert_eq!(
            enkf_update(&single, &hx1, &input, UpdateStrategy::Letkf).unwrap_err(),
            SqgError::EnsembleTooSmall(1)
        );

        let bad_level = AnalysisInput {
            levob: &[2],
            ..input
        };
        assert!(matches!(
            enkf_update(&ens, &hx, &bad_level, UpdateStrategy::Letkf),
            Err(SqgError::InvalidConfig(_))
        ));
    }
}
