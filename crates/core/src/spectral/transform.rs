//! Real 2-D Fourier transforms on the doubly periodic grid
//!
//! Forward transforms follow the unnormalized `rfft2` convention: a grid of
//! `n × n` real values maps to `n × (n/2 + 1)` complex coefficients laid out
//! `[ky][kx]`, with `kx` the non-negative half of the x wavenumbers. The
//! inverse divides by `n²`, so a forward/inverse pair is the identity.
//!
//! Both passes are built from complex FFTs (`rustfft`): rows first, then the
//! retained columns. Rows and columns are processed in parallel with Rayon,
//! either on the ambient pool or on a dedicated pool sized by the thread hint.

use crate::error::SqgError;
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Forward/inverse real-to-half-complex transform pair for one grid size
#[derive(Clone)]
pub struct SpectralTransform {
    n: usize,
    nk: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("n", &self.n)
            .field("nk", &self.nk)
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

impl SpectralTransform {
    /// Plan transforms for an `n × n` grid
    ///
    /// # Arguments
    ///
    /// * `n` - Grid points in each direction
    /// * `threads` - Worker threads for the FFT passes; 0 uses the ambient Rayon pool
    pub fn new(n: usize, threads: usize) -> Result<Self, SqgError> {
        let pool = if threads == 0 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| SqgError::ThreadPool(e.to_string()))?;
            Some(Arc::new(pool))
        };
        Ok(Self::with_pool(n, pool))
    }

    /// Plan transforms for an `n × n` grid running on an existing pool
    ///
    /// Lets the base and padded transforms of one model share workers.
    pub fn with_pool(n: usize, pool: Option<Arc<rayon::ThreadPool>>) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);

        Self {
            n,
            nk: n / 2 + 1,
            forward,
            inverse,
            pool,
        }
    }

    /// Dedicated worker pool, if any
    pub fn pool(&self) -> Option<&Arc<rayon::ThreadPool>> {
        self.pool.as_ref()
    }

    /// Grid points in each direction
    pub fn size(&self) -> usize {
        self.n
    }

    /// Number of retained x wavenumbers (`n/2 + 1`)
    pub fn half_size(&self) -> usize {
        self.nk
    }

    /// Number of real values in one level
    pub fn grid_len(&self) -> usize {
        self.n * self.n
    }

    /// Number of complex coefficients in one level
    pub fn spectral_len(&self) -> usize {
        self.n * self.nk
    }

    fn run<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Forward transform of one level
    ///
    /// # Panics
    ///
    /// Panics if `field` does not hold `n × n` values
    pub fn forward(&self, field: &[f64]) -> Vec<Complex64> {
        assert_eq!(
            field.len(),
            self.grid_len(),
            "forward transform expects an {}x{} field",
            self.n,
            self.n
        );
        self.run(|| self.forward_level(field))
    }

    /// Inverse transform of one level
    ///
    /// # Panics
    ///
    /// Panics if `spec` does not hold `n × (n/2 + 1)` coefficients
    pub fn inverse(&self, spec: &[Complex64]) -> Vec<f64> {
        assert_eq!(
            spec.len(),
            self.spectral_len(),
            "inverse transform expects {}x{} coefficients",
            self.n,
            self.nk
        );
        self.run(|| self.inverse_level(spec))
    }

    /// Forward transform of stacked levels (`[level][y][x]`)
    pub fn forward_levels(&self, field: &[f64]) -> Vec<Complex64> {
        assert_eq!(field.len() % self.grid_len(), 0, "partial level in field");
        field
            .chunks(self.grid_len())
            .flat_map(|level| self.forward(level))
            .collect()
    }

    /// Inverse transform of stacked levels (`[level][ky][kx]`)
    pub fn inverse_levels(&self, spec: &[Complex64]) -> Vec<f64> {
        assert_eq!(spec.len() % self.spectral_len(), 0, "partial level in spectrum");
        spec.chunks(self.spectral_len())
            .flat_map(|level| self.inverse(level))
            .collect()
    }

    fn forward_level(&self, field: &[f64]) -> Vec<Complex64> {
        let (n, nk) = (self.n, self.nk);
        let mut half = vec![Complex64::new(0.0, 0.0); n * nk];

        half.par_chunks_mut(nk)
            .zip(field.par_chunks(n))
            .for_each(|(out, row)| {
                let mut buf: Vec<Complex64> =
                    row.iter().map(|&v| Complex64::new(v, 0.0)).collect();
                self.forward.process(&mut buf);
                out.copy_from_slice(&buf[..nk]);
            });

        self.transform_columns(&mut half, self.forward.as_ref());
        half
    }

    fn inverse_level(&self, spec: &[Complex64]) -> Vec<f64> {
        let (n, nk) = (self.n, self.nk);
        let mut half = spec.to_vec();
        self.transform_columns(&mut half, self.inverse.as_ref());

        let scale = 1.0 / (n * n) as f64;
        let mut field = vec![0.0; n * n];
        field
            .par_chunks_mut(n)
            .zip(half.par_chunks(nk))
            .for_each(|(out, row)| {
                // Rebuild the Hermitian-symmetric full row
                let mut buf: Vec<Complex64> = (0..n)
                    .map(|kx| if kx < nk { row[kx] } else { row[n - kx].conj() })
                    .collect();
                self.inverse.process(&mut buf);
                for (value, coeff) in out.iter_mut().zip(&buf) {
                    *value = coeff.re * scale;
                }
            });
        field
    }

    /// Transform every retained column in place (`[ky][kx]` layout)
    fn transform_columns(&self, data: &mut [Complex64], fft: &dyn Fft<f64>) {
        let (n, nk) = (self.n, self.nk);
        let mut columns = vec![Complex64::new(0.0, 0.0); n * nk];
        {
            let src: &[Complex64] = data;
            columns
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(kx, column)| {
                    for (ky, value) in column.iter_mut().enumerate() {
                        *value = src[ky * nk + kx];
                    }
                    fft.process(column);
                });
        }
        data.par_chunks_mut(nk).enumerate().for_each(|(ky, row)| {
            for (kx, value) in row.iter_mut().enumerate() {
                *value = columns[kx * n + ky];
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    #[test]
    fn test_round_trip_random_field() {
        let n = 16;
        let transform = SpectralTransform::new(n, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let field: Vec<f64> = (0..n * n).map(|_| rng.random::<f64>() - 0.5).collect();

        let spec = transform.forward(&field);
        assert_eq!(spec.len(), n * (n / 2 + 1));
        let back = transform.inverse(&spec);

        for (a, b) in field.iter().zip(&back) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_round_trip_odd_size_and_dedicated_pool() {
        let n = 9;
        let transform = SpectralTransform::new(n, 2).unwrap();
        let field: Vec<f64> = (0..n * n).map(|i| ((i * 37) % 11) as f64).collect();
        let back = transform.inverse(&transform.forward(&field));
        for (a, b) in field.iter().zip(&back) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_constant_field_lands_in_mean_coefficient() {
        let n = 8;
        let transform = SpectralTransform::new(n, 0).unwrap();
        let spec = transform.forward(&vec![2.0; n * n]);

        assert_abs_diff_eq!(spec[0].re, 2.0 * (n * n) as f64, epsilon = 1e-10);
        assert!(spec.iter().skip(1).all(|c| c.norm() < 1e-10));
    }

    #[test]
    fn test_single_mode_coefficient() {
        // cos(2π·2x/N) puts N²/2 at (ky=0, kx=2)
        let n = 16;
        let transform = SpectralTransform::new(n, 0).unwrap();
        let mut field = vec![0.0; n * n];
        for y in 0..n {
            for x in 0..n {
                field[y * n + x] = (2.0 * PI * 2.0 * x as f64 / n as f64).cos();
            }
        }
        let spec = transform.forward(&field);
        assert_abs_diff_eq!(spec[2].re, (n * n) as f64 / 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(spec[2].im, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stacked_levels_are_independent() {
        let n = 8;
        let transform = SpectralTransform::new(n, 0).unwrap();
        let mut field = vec![0.0; 2 * n * n];
        field[..n * n].fill(1.0);
        let spec = transform.forward_levels(&field);

        assert_eq!(spec.len(), 2 * transform.spectral_len());
        assert!(spec[transform.spectral_len()..].iter().all(|c| c.norm() < 1e-12));
        let back = transform.inverse_levels(&spec);
        for (a, b) in field.iter().zip(&back) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    #[should_panic(expected = "forward transform expects")]
    fn test_shape_mismatch_is_fatal() {
        let transform = SpectralTransform::new(8, 0).unwrap();
        let _ = transform.forward(&[0.0; 10]);
    }
}
