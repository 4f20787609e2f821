//! Per-cycle verification statistics and forecast kinetic-energy spectra
//!
//! State-space errors and spreads are root-mean-square values in
//! temperature units. Observation-space quantities follow Desroziers et al.
//! (2005): `obinc_b` estimates HPbHᵀ, `obinc_a` estimates HPaHᵀ and `omaomb`
//! estimates R, so each should match its ensemble counterpart when the
//! filter is well tuned.

use crate::analysis::EnsembleState;
use crate::model::{PvField, SpectralOperators};
use crate::spectral::Complex64;
use serde::Serialize;
use std::f64::consts::SQRT_2;
use std::fmt;

/// Statistics of one analysis cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleDiagnostics {
    /// Cycle index
    pub ntime: usize,
    /// RMS posterior mean error (K)
    pub pverr_a: f64,
    /// RMS posterior spread (K)
    pub pvsprd_a: f64,
    /// RMS background mean error (K)
    pub pverr_b: f64,
    /// RMS background spread (K)
    pub pvsprd_b: f64,
    /// Mean `(Hxa − Hxb)(y − Hxb)`
    pub obinc_b: f64,
    /// Mean background variance at observation locations
    pub obsprd_b: f64,
    /// Mean `(Hxa − Hxb)(y − Hxa)`
    pub obinc_a: f64,
    /// Mean posterior variance at observation locations, before inflation
    pub obsprd_a: f64,
    /// Mean `(y − Hxa)(y − Hxb)` over the mean error variance
    pub omaomb: f64,
    /// Mean background innovation
    pub obbias_b: f64,
    /// Mean inflation factor
    pub inflation: f64,
}

impl fmt::Display for CycleDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ntime)?;
        for value in [
            self.pverr_a,
            self.pvsprd_a,
            self.pverr_b,
            self.pvsprd_b,
            self.obinc_b,
            self.obsprd_b,
            self.obinc_a,
            self.obsprd_a,
            self.omaomb,
            self.obbias_b,
            self.inflation,
        ] {
            write!(f, " {value:.6}")?;
        }
        Ok(())
    }
}

/// RMS error of the ensemble mean and RMS spread, scaled by `scalefact`
pub fn rms_error_spread(
    ensemble: &EnsembleState,
    truth: &PvField,
    scalefact: f64,
) -> (f64, f64) {
    let mean = ensemble.mean();
    let variance = ensemble.variance();
    let len = mean.len() as f64;
    let mse = mean
        .iter()
        .zip(&truth.data)
        .map(|(m, t)| (scalefact * (m - t)).powi(2))
        .sum::<f64>()
        / len;
    let msprd = variance.iter().sum::<f64>() * scalefact * scalefact / len;
    (mse.sqrt(), msprd.sqrt())
}

/// Observation-space innovation statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InnovationStats {
    pub obinc_b: f64,
    pub obinc_a: f64,
    /// Mean `(y − Hxa)(y − Hxb)`, not yet normalized
    pub omaomb: f64,
    pub obbias_b: f64,
}

/// Innovation statistics from the observations and the prior and posterior
/// means in observation space
pub fn innovation_stats(observations: &[f64], hxmean_b: &[f64], hxmean_a: &[f64]) -> InnovationStats {
    let len = observations.len() as f64;
    let mut stats = InnovationStats {
        obinc_b: 0.0,
        obinc_a: 0.0,
        omaomb: 0.0,
        obbias_b: 0.0,
    };
    for ((&ob, &hxb), &hxa) in observations.iter().zip(hxmean_b).zip(hxmean_a) {
        let inc = hxa - hxb;
        stats.obinc_b += inc * (ob - hxb);
        stats.obinc_a += inc * (ob - hxa);
        stats.omaomb += (ob - hxa) * (ob - hxb);
        stats.obbias_b += ob - hxb;
    }
    stats.obinc_b /= len;
    stats.obinc_a /= len;
    stats.omaomb /= len;
    stats.obbias_b /= len;
    stats
}

/// Arithmetic mean; zero for an empty slice
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Running sums of forecast error and spread kinetic-energy spectra
#[derive(Debug, Clone)]
pub struct SpectraAccumulator {
    n: usize,
    members: usize,
    error: Vec<f64>,
    spread: Vec<f64>,
    cycles: usize,
}

/// Cycle-averaged spectra binned by total wavenumber
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KineticEnergySpectra {
    /// Cycles averaged
    pub cycles: usize,
    /// Error spectrum per total wavenumber `0..=n/2`, mean over both boundaries
    pub error: Vec<f64>,
    /// Spread spectrum per total wavenumber
    pub spread: Vec<f64>,
    /// Error energy summed over all coefficients and both boundaries
    pub total_error: f64,
    /// Spread energy summed over all coefficients and both boundaries
    pub total_spread: f64,
}

impl SpectraAccumulator {
    /// Accumulator for an `n × n` grid using the first `members` members
    /// for the spread
    pub fn new(n: usize, members: usize) -> Self {
        let len = 2 * n * (n / 2 + 1);
        Self {
            n,
            members,
            error: vec![0.0; len],
            spread: vec![0.0; len],
            cycles: 0,
        }
    }

    /// Cycles accumulated so far
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Add one forecast verified against `truth`
    pub fn accumulate(
        &mut self,
        ops: &SpectralOperators,
        forecast: &EnsembleState,
        truth: &PvField,
        scalefact: f64,
    ) {
        let mean = forecast.mean();
        let error: Vec<f64> = mean.iter().zip(&truth.data).map(|(m, t)| m - t).collect();
        let error_spectrum = self.kinetic_energy(ops, &error, scalefact);
        add_spectrum(&mut self.error, &error_spectrum, 1.0);

        let weight = 1.0 / self.members as f64;
        for m in 0..self.members.min(forecast.nanals()) {
            let perturbation: Vec<f64> = forecast
                .member(m)
                .iter()
                .zip(&mean)
                .map(|(x, mu)| x - mu)
                .collect();
            let spectrum = self.kinetic_energy(ops, &perturbation, scalefact);
            add_spectrum(&mut self.spread, &spectrum, weight);
        }
        self.cycles += 1;
    }

    /// `|K|²·|ψ|²` per spectral coefficient of a PV difference field
    fn kinetic_energy(&self, ops: &SpectralOperators, field: &[f64], scalefact: f64) -> Vec<f64> {
        let pvspec: Vec<Complex64> = ops
            .transform()
            .forward_levels(field)
            .into_iter()
            .map(|c| c * scalefact)
            .collect();
        let norm = 1.0 / (self.n as f64 * SQRT_2);
        let ksqlsq = &ops.wavenumbers().ksqlsq;
        ops.invert(&pvspec)
            .iter()
            .enumerate()
            .map(|(i, psi)| ksqlsq[i % ksqlsq.len()] * (*psi * norm).norm_sqr())
            .collect()
    }

    /// Averaged spectra, or `None` before the first accumulation
    pub fn summary(&self, ops: &SpectralOperators) -> Option<KineticEnergySpectra> {
        if self.cycles == 0 {
            return None;
        }
        let count = self.cycles as f64;
        let bins = self.n / 2 + 1;
        let total_index = &ops.wavenumbers().total_index;
        let nspec = total_index.len();

        let binned = |sums: &[f64]| {
            let mut out = vec![0.0; bins];
            for (i, &ktot) in total_index.iter().enumerate() {
                let bin = ktot as usize;
                if bin < bins {
                    out[bin] += 0.5 * (sums[i] + sums[nspec + i]) / count;
                }
            }
            out
        };
        Some(KineticEnergySpectra {
            cycles: self.cycles,
            error: binned(&self.error),
            spread: binned(&self.spread),
            total_error: self.error.iter().sum::<f64>() / count,
            total_spread: self.spread.iter().sum::<f64>() / count,
        })
    }
}

fn add_spectrum(acc: &mut [f64], spectrum: &[f64], weight: f64) {
    for (a, s) in acc.iter_mut().zip(spectrum) {
        *a += weight * s;
    }
}
