//! Spectral utilities for the doubly periodic SQG grid
//!
//! Provides the real 2-D Fourier transform pair, wavenumber grids, and the
//! 3/2-padding / 2/3-truncation pair used to dealias the quadratic advection
//! term.
//!
//! # Dealiasing
//!
//! Spectral coefficients are zero-padded to a `3N/2` grid before the inverse
//! transform, the product is formed there, and the forward transform of the
//! product is truncated back to the `N` grid keeping only `|k|, |l| < N/2`.
//! Padding multiplies by `(3/2)² = 2.25` so the padded inverse transform
//! returns physical values; truncation divides by the same factor so the
//! returned coefficients are on the `N`-grid normalization.

mod transform;
mod wavenumbers;

pub use transform::SpectralTransform;
pub use wavenumbers::{signed_index, Wavenumbers};

pub use rustfft::num_complex::Complex64;

/// Size of the padded grid used for dealiasing
#[inline]
pub fn padded_size(n: usize) -> usize {
    3 * n / 2
}

fn padding_scale(n: usize) -> f64 {
    let m = padded_size(n) as f64;
    (m / n as f64).powi(2)
}

/// Zero-pad one level of `n × (n/2+1)` coefficients to the `3n/2` grid
///
/// The x-Nyquist column of the input is carried to the padded grid as its
/// complex conjugate.
pub fn pad_spectrum(spec: &[Complex64], n: usize) -> Vec<Complex64> {
    let nk = n / 2 + 1;
    assert_eq!(spec.len(), n * nk, "pad_spectrum expects one {n}x{nk} level");

    let m = padded_size(n);
    let mk = m / 2 + 1;
    let half = n / 2;
    let scale = padding_scale(n);
    let mut padded = vec![Complex64::new(0.0, 0.0); m * mk];

    for ky in 0..half {
        let (src_pos, dst_pos) = (ky * nk, ky * mk);
        let (src_neg, dst_neg) = ((n - half + ky) * nk, (m - half + ky) * mk);
        for kx in 0..half {
            padded[dst_pos + kx] = spec[src_pos + kx] * scale;
            padded[dst_neg + kx] = spec[src_neg + kx] * scale;
        }
        padded[dst_pos + half] = (spec[src_pos + nk - 1] * scale).conj();
        padded[dst_neg + half] = (spec[src_neg + nk - 1] * scale).conj();
    }
    padded
}

/// Truncate one level of `3n/2`-grid coefficients back to `n × (n/2+1)`
/// with the 2/3 rule
pub fn truncate_spectrum(spec: &[Complex64], n: usize) -> Vec<Complex64> {
    let nk = n / 2 + 1;
    let m = padded_size(n);
    let mk = m / 2 + 1;
    assert_eq!(spec.len(), m * mk, "truncate_spectrum expects one {m}x{mk} level");

    let half = n / 2;
    let inv_scale = 1.0 / padding_scale(n);
    let mut truncated = vec![Complex64::new(0.0, 0.0); n * nk];

    for ky in 0..half {
        let (src_pos, dst_pos) = (ky * mk, ky * nk);
        let (src_neg, dst_neg) = ((m - half + ky) * mk, (n - half + ky) * nk);
        for kx in 0..half {
            truncated[dst_pos + kx] = spec[src_pos + kx] * inv_scale;
            truncated[dst_neg + kx] = spec[src_neg + kx] * inv_scale;
        }
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn band_limited_field(n: usize) -> Vec<f64> {
        let mut field = vec![0.0; n * n];
        for y in 0..n {
            for x in 0..n {
                let (xf, yf) = (
                    2.0 * PI * x as f64 / n as f64,
                    2.0 * PI * y as f64 / n as f64,
                );
                field[y * n + x] =
                    1.5 + (xf).cos() + 0.5 * (2.0 * yf).sin() + 0.25 * (xf - 3.0 * yf).cos();
            }
        }
        field
    }

    #[test]
    fn test_padded_inverse_interpolates_band_limited_field() {
        let n = 16;
        let m = padded_size(n);
        let base = SpectralTransform::new(n, 0).unwrap();
        let padded = SpectralTransform::new(m, 0).unwrap();
        let field = band_limited_field(n);

        let fine = padded.inverse(&pad_spectrum(&base.forward(&field), n));

        // Every other coarse point coincides with a fine point
        for y in (0..n).step_by(2) {
            for x in (0..n).step_by(2) {
                let coarse = field[y * n + x];
                let on_fine = fine[(3 * y / 2) * m + 3 * x / 2];
                assert_abs_diff_eq!(coarse, on_fine, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_pad_then_truncate_is_identity_for_resolved_modes() {
        let n = 16;
        let m = padded_size(n);
        let base = SpectralTransform::new(n, 0).unwrap();
        let padded = SpectralTransform::new(m, 0).unwrap();
        let spec = base.forward(&band_limited_field(n));

        let fine = padded.inverse(&pad_spectrum(&spec, n));
        let back = truncate_spectrum(&padded.forward(&fine), n);

        for (a, b) in spec.iter().zip(&back) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-8);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_truncation_zeroes_unresolved_modes() {
        let n = 8;
        let m = padded_size(n);
        let mk = m / 2 + 1;
        let spec = vec![Complex64::new(1.0, 0.0); m * mk];
        let truncated = truncate_spectrum(&spec, n);
        let nk = n / 2 + 1;

        // x-Nyquist column is removed
        for ky in 0..n {
            assert_eq!(truncated[ky * nk + n / 2], Complex64::new(0.0, 0.0));
        }
        assert_abs_diff_eq!(truncated[0].re, 1.0 / 2.25, epsilon = 1e-15);
        assert_abs_diff_eq!(truncated[(n - 1) * nk + 1].re, 1.0 / 2.25, epsilon = 1e-15);
    }
}
