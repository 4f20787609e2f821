//! Local ensemble transform Kalman filter
//!
//! Every grid point on every boundary is analysed independently. The local
//! observation set holds all observations with a positive localization
//! weight; the weight scales the inverse error variance. The ensemble-space
//! problem is solved with a symmetric eigen-decomposition of
//! `(nanals − 1)·I + Ybᵀ R⁻¹ Yb`.

use super::ensrf::dot;
use super::{AnalysisInput, EnsembleState, ObservationEnsemble};
use crate::error::SqgError;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rayon::prelude::*;

pub(super) fn local_update(
    xens: &EnsembleState,
    hxens: &ObservationEnsemble,
    input: &AnalysisInput<'_>,
) -> Result<EnsembleState, SqgError> {
    let nanals = xens.nanals();
    let npts = xens.npts();
    let nobs = hxens.nobs();
    let loc = input.localization;

    let (mut xmean, mut xprime) = xens.split_point_major();
    let (hxmean, hxprime) = hxens.split_point_major();
    let innovations: Vec<f64> = input
        .observations
        .iter()
        .zip(&hxmean)
        .map(|(ob, hx)| ob - hx)
        .collect();

    xmean
        .par_iter_mut()
        .zip(xprime.par_chunks_mut(nanals))
        .enumerate()
        .for_each(|(i, (mean, prime))| {
            let (level, point) = (i / npts, i % npts);

            // Local observations and their localized inverse error variances
            let mut local = Vec::new();
            for (k, &oblevel) in input.levob.iter().enumerate() {
                let fact = if oblevel == level { 1.0 } else { loc.vertical };
                for ob in 0..nobs {
                    let weight = fact * loc.horizontal[ob * npts + point];
                    if weight > 0.0 {
                        local.push((k * nobs + ob, weight / input.oberrvar[ob]));
                    }
                }
            }
            if local.is_empty() {
                return;
            }

            let (wmean, transform) = ensemble_weights(nanals, &local, &hxprime, &innovations);
            *mean += dot(prime, wmean.as_slice());
            let updated: Vec<f64> = (0..nanals)
                .map(|m| {
                    prime
                        .iter()
                        .zip(transform.column(m).iter())
                        .map(|(x, w)| x * w)
                        .sum()
                })
                .collect();
            prime.copy_from_slice(&updated);
        });

    Ok(EnsembleState::from_point_major(nanals, npts, &xmean, &xprime))
}

/// Mean weights and perturbation transform for one local analysis
fn ensemble_weights(
    nanals: usize,
    local: &[(usize, f64)],
    hxprime: &[f64],
    innovations: &[f64],
) -> (DVector<f64>, DMatrix<f64>) {
    let nm1 = nanals as f64 - 1.0;
    let yb = DMatrix::from_fn(local.len(), nanals, |row, m| {
        hxprime[local[row].0 * nanals + m]
    });
    // C = Ybᵀ R⁻¹
    let mut c = yb.transpose();
    for (row, &(_, rinv)) in local.iter().enumerate() {
        c.column_mut(row).scale_mut(rinv);
    }
    let d = DVector::from_iterator(local.len(), local.iter().map(|&(idx, _)| innovations[idx]));

    let mut a = &c * &yb;
    for m in 0..nanals {
        a[(m, m)] += nm1;
    }
    let eigen = SymmetricEigen::new(a);
    let v = &eigen.eigenvectors;

    let inv = DMatrix::from_diagonal(&eigen.eigenvalues.map(|e| 1.0 / e));
    let sqrt_inv = DMatrix::from_diagonal(&eigen.eigenvalues.map(|e| (nm1 / e).sqrt()));
    let pa = v * inv * v.transpose();
    let transform = v * sqrt_inv * v.transpose();
    let wmean = pa * (c * d);
    (wmean, transform)
}

#[cfg(test)]
mod tests {
    use super::super::{enkf_update, LocalizationMatrices, UpdateStrategy};
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scalar_letkf_matches_kalman() {
        let xens = EnsembleState::new(2, 1, vec![1.0, 10.0, 3.0, 14.0]).unwrap();
        let hx = ObservationEnsemble::new(2, 1, 1, vec![1.0, 3.0]).unwrap();
        let mut loc = LocalizationMatrices::unit(1, 1, false);
        loc.vertical = 0.5;
        let input = AnalysisInput {
            observations: &[4.0],
            oberrvar: &[2.0],
            levob: &[0],
            localization: &loc,
        };
        let post = enkf_update(&xens, &hx, &input, UpdateStrategy::Letkf).unwrap();
        let mean = post.mean();
        assert_relative_eq!(mean[0], 3.0, max_relative = 1e-12);
        assert_relative_eq!(post.variance()[0], 1.0, max_relative = 1e-12);
        // The taper halves the weight of the ob for the upper level: R → 2R
        assert_relative_eq!(mean[1], 12.0 + 4.0 / (2.0 + 4.0) * 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_point_without_local_obs_is_unchanged() {
        let xens = EnsembleState::new(2, 2, vec![1.0, 5.0, 2.0, 6.0, 3.0, 7.0, 4.0, 8.0]).unwrap();
        let hx = ObservationEnsemble::new(2, 1, 1, vec![1.0, 3.0]).unwrap();
        let mut loc = LocalizationMatrices::unit(1, 2, false);
        loc.horizontal[1] = 0.0;
        loc.vertical = 0.0;
        let input = AnalysisInput {
            observations: &[2.5],
            oberrvar: &[1.0],
            levob: &[0],
            localization: &loc,
        };
        let post = enkf_update(&xens, &hx, &input, UpdateStrategy::Letkf).unwrap();
        for m in 0..2 {
            assert_eq!(post.get(m, 0, 1), xens.get(m, 0, 1));
            assert_eq!(post.get(m, 1, 0), xens.get(m, 1, 0));
        }
        assert!(post.get(0, 0, 0) != xens.get(0, 0, 0));
    }
}
