//! Distance-based covariance localization on the doubly periodic domain

use crate::error::SqgError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Gaspari–Cohn fifth-order piecewise rational taper
///
/// `r` is distance divided by the localization length scale. The taper is
/// 1 at `r = 0`, decreases monotonically and vanishes for `|r| >= 2`.
pub fn gaspcohn(r: f64) -> f64 {
    let z = r.abs();
    if z.is_nan() {
        return 0.0;
    }
    if z <= 1.0 {
        let z2 = z * z;
        let z3 = z2 * z;
        -0.25 * z3 * z2 + 0.5 * z2 * z2 + 0.625 * z3 - (5.0 / 3.0) * z2 + 1.0
    } else if z < 2.0 {
        let z2 = z * z;
        let z3 = z2 * z;
        (1.0 / 12.0) * z3 * z2 - 0.5 * z2 * z2 + 0.625 * z3 + (5.0 / 3.0) * z2 - 5.0 * z + 4.0
            - (2.0 / 3.0) / z
    } else {
        0.0
    }
}

/// Shortest distance between two points on a periodic square of side
/// `domain_size`
pub fn cartdist(x1: f64, y1: f64, x2: f64, y2: f64, domain_size: f64) -> f64 {
    let wrap = |d: f64| {
        let d = d.abs() % domain_size;
        if d > 0.5 * domain_size {
            domain_size - d
        } else {
            d
        }
    };
    let dx = wrap(x1 - x2);
    let dy = wrap(y1 - y2);
    (dx * dx + dy * dy).sqrt()
}

/// Taper applied to covariances between the two boundaries
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalLocalization {
    /// `gaspcohn(rossby_radius / hcovlocal)`
    #[default]
    Auto,
    /// Fixed factor
    Fixed(f64),
}

impl VerticalLocalization {
    /// Negative values select the automatic factor
    pub fn from_signed(value: f64) -> Self {
        if value < 0.0 {
            Self::Auto
        } else {
            Self::Fixed(value)
        }
    }

    /// Resolve to a scalar factor
    pub fn factor(self, rossby_radius: f64, hcovlocal: f64) -> f64 {
        match self {
            Self::Auto => gaspcohn(rossby_radius / hcovlocal),
            Self::Fixed(value) => value,
        }
    }
}

/// Localization weights for one observation network
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizationMatrices {
    /// Observations per level
    pub nobs: usize,
    /// Grid points per level
    pub npts: usize,
    /// Observation to grid-point taper, `[ob][point]`
    pub horizontal: Vec<f64>,
    /// Observation to observation taper, `[ob][ob]`; serial update only
    pub observation: Option<Vec<f64>>,
    /// Cross-boundary taper
    pub vertical: f64,
}

impl LocalizationMatrices {
    /// Taper row of one observation over the grid
    pub fn horizontal_row(&self, ob: usize) -> &[f64] {
        &self.horizontal[ob * self.npts..(ob + 1) * self.npts]
    }

    /// Taper row of one observation over all observations
    pub fn observation_row(&self, ob: usize) -> Option<&[f64]> {
        self.observation
            .as_ref()
            .map(|m| &m[ob * self.nobs..(ob + 1) * self.nobs])
    }

    /// No tapering at all, for `nobs` observations on `npts` points
    pub fn unit(nobs: usize, npts: usize, with_observation: bool) -> Self {
        Self {
            nobs,
            npts,
            horizontal: vec![1.0; nobs * npts],
            observation: with_observation.then(|| vec![1.0; nobs * nobs]),
            vertical: 1.0,
        }
    }
}

/// Builds localization matrices for observation networks on one grid
#[derive(Debug, Clone)]
pub struct Localizer {
    domain_size: f64,
    hcovlocal: f64,
    vertical: f64,
    grid_x: Vec<f64>,
    grid_y: Vec<f64>,
}

impl Localizer {
    /// Localizer for an `n × n` grid with length scale `hcovlocal` (m)
    ///
    /// An infinite length scale disables horizontal tapering.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `hcovlocal` is not positive
    pub fn new(
        n: usize,
        domain_size: f64,
        hcovlocal: f64,
        vertical: VerticalLocalization,
        rossby_radius: f64,
    ) -> Result<Self, SqgError> {
        if hcovlocal.is_nan() || hcovlocal <= 0.0 {
            return Err(SqgError::InvalidConfig(format!(
                "hcovlocal must be positive, got {hcovlocal}"
            )));
        }
        let dx = domain_size / n as f64;
        let (grid_x, grid_y) = (0..n * n)
            .map(|p| ((p % n) as f64 * dx, (p / n) as f64 * dx))
            .unzip();
        Ok(Self {
            domain_size,
            hcovlocal,
            vertical: vertical.factor(rossby_radius, hcovlocal),
            grid_x,
            grid_y,
        })
    }

    /// Resolved cross-boundary factor
    pub fn vertical(&self) -> f64 {
        self.vertical
    }

    /// Horizontal length scale (m)
    pub fn length_scale(&self) -> f64 {
        self.hcovlocal
    }

    /// Side length of the periodic domain (m)
    pub fn domain_size(&self) -> f64 {
        self.domain_size
    }

    /// Physical coordinates of a grid point index
    pub fn coordinates(&self, point: usize) -> (f64, f64) {
        (self.grid_x[point], self.grid_y[point])
    }

    fn taper(&self, dist: f64) -> f64 {
        if self.hcovlocal.is_infinite() {
            1.0
        } else {
            gaspcohn(dist / self.hcovlocal)
        }
    }

    /// Localization for observations at grid points `indices`
    pub fn build(&self, indices: &[usize], with_observation: bool) -> LocalizationMatrices {
        let npts = self.grid_x.len();
        let nobs = indices.len();
        let obs: Vec<(f64, f64)> = indices.iter().map(|&p| self.coordinates(p)).collect();

        let mut horizontal = vec![0.0; nobs * npts];
        horizontal
            .par_chunks_mut(npts.max(1))
            .zip(obs.par_iter())
            .for_each(|(row, &(xo, yo))| {
                for (p, w) in row.iter_mut().enumerate() {
                    let dist = cartdist(xo, yo, self.grid_x[p], self.grid_y[p], self.domain_size);
                    *w = self.taper(dist);
                }
            });

        let observation = with_observation.then(|| {
            let mut obcov = vec![0.0; nobs * nobs];
            obcov
                .par_chunks_mut(nobs.max(1))
                .zip(obs.par_iter())
                .for_each(|(row, &(xo, yo))| {
                    for (w, &(x2, y2)) in row.iter_mut().zip(&obs) {
                        *w = self.taper(cartdist(xo, yo, x2, y2, self.domain_size));
                    }
                });
            obcov
        });

        LocalizationMatrices {
            nobs,
            npts,
            horizontal,
            observation,
            vertical: self.vertical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_gaspcohn_end_points_and_symmetry() {
        assert_eq!(gaspcohn(0.0), 1.0);
        assert_eq!(gaspcohn(2.0), 0.0);
        assert_eq!(gaspcohn(3.5), 0.0);
        assert_eq!(gaspcohn(-0.7), gaspcohn(0.7));
        // Both branches meet at z = 1
        assert_abs_diff_eq!(gaspcohn(1.0), 5.0 / 24.0, epsilon = 1e-14);
        assert_abs_diff_eq!(gaspcohn(1.0 + 1e-9), 5.0 / 24.0, epsilon = 1e-8);
    }

    #[test]
    fn test_gaspcohn_monotone_on_support() {
        let mut prev = gaspcohn(0.0);
        for i in 1..=400 {
            let value = gaspcohn(i as f64 * 0.005);
            assert!(value <= prev + 1e-15, "increase at {}", i as f64 * 0.005);
            assert!(value >= 0.0);
            prev = value;
        }
        assert_abs_diff_eq!(gaspcohn(1.999_999), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cartdist_wraps() {
        let l = 100.0;
        assert_eq!(cartdist(3.0, 4.0, 3.0, 4.0, l), 0.0);
        assert_relative_eq!(cartdist(1.0, 0.0, 99.0, 0.0, l), 2.0);
        assert_relative_eq!(cartdist(0.0, 10.0, 0.0, 80.0, l), 30.0);
        assert_relative_eq!(cartdist(0.0, 0.0, 50.0, 50.0, l), 50.0 * 2.0_f64.sqrt());
        for (x2, y2) in [(70.0, 10.0), (5.0, 95.0), (51.0, 49.0)] {
            assert!(cartdist(0.0, 0.0, x2, y2, l) <= l * 2.0_f64.sqrt() / 2.0);
        }
    }

    #[test]
    fn test_vertical_factor() {
        assert_eq!(VerticalLocalization::from_signed(-1.0), VerticalLocalization::Auto);
        assert_eq!(VerticalLocalization::Fixed(0.3).factor(1.0e6, 2.0e6), 0.3);
        assert_relative_eq!(
            VerticalLocalization::Auto.factor(1.0e6, 2.0e6),
            gaspcohn(0.5)
        );
    }

    #[test]
    fn test_build_matrices() {
        let n = 8;
        let localizer =
            Localizer::new(n, 8.0, 2.0, VerticalLocalization::Fixed(0.5), 1.0).unwrap();
        let loc = localizer.build(&[0, 9], true);
        assert_eq!(loc.horizontal.len(), 2 * 64);
        assert_eq!(loc.horizontal_row(0)[0], 1.0);
        assert_eq!(loc.horizontal_row(1)[9], 1.0);
        // Point (4, 4) is 4√2 from (0, 0): outside the support
        assert_eq!(loc.horizontal_row(0)[4 * 8 + 4], 0.0);
        // Wrapped neighbour (7, 0) is 1 away from (0, 0)
        assert_relative_eq!(loc.horizontal_row(0)[7], gaspcohn(0.5));

        let obcov = loc.observation_row(0).unwrap();
        assert_eq!(obcov[0], 1.0);
        assert_relative_eq!(obcov[1], gaspcohn(2.0_f64.sqrt() / 2.0));
        assert_eq!(loc.vertical, 0.5);
        assert!(localizer.build(&[3], false).observation.is_none());
    }

    #[test]
    fn test_infinite_length_scale_is_untapered() {
        let localizer = Localizer::new(
            4,
            4.0,
            f64::INFINITY,
            VerticalLocalization::Fixed(1.0),
            1.0,
        )
        .unwrap();
        let loc = localizer.build(&[0, 5, 15], true);
        assert_eq!(loc, LocalizationMatrices::unit(3, 16, true));
        assert!(Localizer::new(4, 4.0, 0.0, VerticalLocalization::Auto, 1.0).is_err());
    }
}
