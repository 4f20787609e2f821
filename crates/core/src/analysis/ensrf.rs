//! Serial ensemble square-root filter
//!
//! Observations are assimilated one at a time, level-major and then in
//! network order. Each observation updates the state mean with the localized
//! Kalman gain and the perturbations with the reduced gain of the square-root
//! filter. The observation priors of the remaining observations are updated
//! the same way with the observation-observation localization, so later
//! observations see the effect of earlier ones.

use super::{AnalysisInput, EnsembleState, ObservationEnsemble};
use crate::error::SqgError;
use rayon::prelude::*;
use tracing::warn;

pub(super) fn serial_update(
    xens: &EnsembleState,
    hxens: &ObservationEnsemble,
    input: &AnalysisInput<'_>,
) -> Result<EnsembleState, SqgError> {
    let loc = input.localization;
    let obcov = loc
        .observation
        .as_deref()
        .ok_or(SqgError::MissingObservationLocalization)?;

    let nanals = xens.nanals();
    let npts = xens.npts();
    let nobs = hxens.nobs();
    let nm1 = nanals as f64 - 1.0;
    let vloc = loc.vertical;

    let (mut xmean, mut xprime) = xens.split_point_major();
    let (mut hxmean, mut hxprime) = hxens.split_point_major();

    let mut skipped = 0usize;
    for (k, &level) in input.levob.iter().enumerate() {
        for ob in 0..nobs {
            let idx = k * nobs + ob;
            let hxp = hxprime[idx * nanals..(idx + 1) * nanals].to_vec();
            let hpbht = dot(&hxp, &hxp) / nm1;
            if hpbht.is_nan() || hpbht <= 0.0 {
                skipped += 1;
                continue;
            }
            let oberr = input.oberrvar[ob];
            let denom = hpbht + oberr;
            let gainfact = (denom / hpbht) * (1.0 - (oberr / denom).sqrt());
            let innov = input.observations[idx] - hxmean[idx];

            let row = loc.horizontal_row(ob);
            xmean
                .par_iter_mut()
                .zip(xprime.par_chunks_mut(nanals))
                .enumerate()
                .for_each(|(i, (mean, prime))| {
                    let fact = if i / npts == level { 1.0 } else { vloc };
                    let weight = fact * row[i % npts];
                    if weight == 0.0 {
                        return;
                    }
                    let kg = weight * dot(prime, &hxp) / nm1 / denom;
                    *mean += kg * innov;
                    for (p, h) in prime.iter_mut().zip(&hxp) {
                        *p -= gainfact * kg * h;
                    }
                });

            let obrow = &obcov[ob * nobs..(ob + 1) * nobs];
            for (j, (mean, prime)) in hxmean
                .iter_mut()
                .zip(hxprime.chunks_mut(nanals))
                .enumerate()
            {
                let fact = if input.levob[j / nobs] == level { 1.0 } else { vloc };
                let weight = fact * obrow[j % nobs];
                if weight == 0.0 {
                    continue;
                }
                let kg = weight * dot(prime, &hxp) / nm1 / denom;
                *mean += kg * innov;
                for (p, h) in prime.iter_mut().zip(&hxp) {
                    *p -= gainfact * kg * h;
                }
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, "Observations with zero prior variance were not assimilated");
    }

    Ok(EnsembleState::from_point_major(nanals, npts, &xmean, &xprime))
}

#[inline]
pub(super) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::super::{enkf_update, LocalizationMatrices, UpdateStrategy};
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_observation_scalar_update() {
        // One point per level, observing level 0 directly
        let xens = EnsembleState::new(2, 1, vec![1.0, 10.0, 3.0, 14.0]).unwrap();
        let hx = ObservationEnsemble::new(2, 1, 1, vec![1.0, 3.0]).unwrap();
        let mut loc = LocalizationMatrices::unit(1, 1, true);
        loc.vertical = 0.5;
        let input = AnalysisInput {
            observations: &[4.0],
            oberrvar: &[2.0],
            levob: &[0],
            localization: &loc,
        };
        let post = enkf_update(&xens, &hx, &input, UpdateStrategy::Serial).unwrap();

        // Prior variance 2, so the gain is 2/(2+2) = 0.5
        let mean = post.mean();
        assert_relative_eq!(mean[0], 2.0 + 0.5 * 2.0);
        // Cross-level covariance 4, halved by the vertical taper
        assert_relative_eq!(mean[1], 12.0 + 0.5 * 4.0 / 4.0 * 2.0);
        // Square-root update: posterior variance (1 - K) * prior
        assert_relative_eq!(post.variance()[0], 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_zero_spread_observation_is_skipped() {
        let xens = EnsembleState::new(2, 1, vec![1.0, 10.0, 3.0, 14.0]).unwrap();
        let hx = ObservationEnsemble::new(2, 1, 1, vec![5.0, 5.0]).unwrap();
        let loc = LocalizationMatrices::unit(1, 1, true);
        let input = AnalysisInput {
            observations: &[4.0],
            oberrvar: &[1.0],
            levob: &[0],
            localization: &loc,
        };
        let post = enkf_update(&xens, &hx, &input, UpdateStrategy::Serial).unwrap();
        assert_eq!(post, xens);
    }
}
