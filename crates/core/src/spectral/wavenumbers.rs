//! Wavenumber grids matching the half-complex spectral layout

use std::f64::consts::PI;

/// Signed integer wavenumber for index `j` of an `n`-point transform
/// (`fftfreq` ordering: non-negative first, then negative)
#[inline]
pub fn signed_index(j: usize, n: usize) -> f64 {
    if j < n.div_ceil(2) {
        j as f64
    } else {
        j as f64 - n as f64
    }
}

/// Dimensional wavenumbers for an `n × n` grid on a square domain
///
/// All arrays are laid out `[ky][kx]` with `kx` in `0..=n/2`.
#[derive(Debug, Clone)]
pub struct Wavenumbers {
    /// Grid points in each direction
    pub n: usize,
    /// Retained x wavenumbers (`n/2 + 1`)
    pub nk: usize,
    /// x wavenumber (rad/m)
    pub k: Vec<f64>,
    /// y wavenumber (rad/m)
    pub l: Vec<f64>,
    /// Squared total wavenumber `k² + l²`
    pub ksqlsq: Vec<f64>,
    /// Non-dimensional total wavenumber `sqrt(kx² + ky²)` in grid units
    pub total_index: Vec<f64>,
}

impl Wavenumbers {
    /// Build wavenumber arrays for an `n × n` grid spanning `domain_size` meters
    pub fn new(n: usize, domain_size: f64) -> Self {
        let nk = n / 2 + 1;
        let len = n * nk;
        let mut k = Vec::with_capacity(len);
        let mut l = Vec::with_capacity(len);
        let mut ksqlsq = Vec::with_capacity(len);
        let mut total_index = Vec::with_capacity(len);

        let to_dimensional = 2.0 * PI / domain_size;
        for ky in 0..n {
            let ly = signed_index(ky, n);
            for kx in 0..nk {
                let kxf = kx as f64;
                let kd = to_dimensional * kxf;
                let ld = to_dimensional * ly;
                k.push(kd);
                l.push(ld);
                ksqlsq.push(kd * kd + ld * ld);
                total_index.push((kxf * kxf + ly * ly).sqrt());
            }
        }

        Self {
            n,
            nk,
            k,
            l,
            ksqlsq,
            total_index,
        }
    }

    /// Number of spectral coefficients per level
    pub fn len(&self) -> usize {
        self.k.len()
    }

    /// Always false for a constructed grid
    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_signed_index_matches_fftfreq() {
        let even: Vec<f64> = (0..6).map(|j| signed_index(j, 6)).collect();
        assert_eq!(even, vec![0.0, 1.0, 2.0, -3.0, -2.0, -1.0]);
        let odd: Vec<f64> = (0..5).map(|j| signed_index(j, 5)).collect();
        assert_eq!(odd, vec![0.0, 1.0, 2.0, -2.0, -1.0]);
    }

    #[test]
    fn test_dimensional_wavenumbers() {
        let wn = Wavenumbers::new(8, 1000.0);
        assert_eq!(wn.len(), 8 * 5);
        // (ky = 7 -> l = -1, kx = 2)
        let idx = 7 * 5 + 2;
        let unit = 2.0 * PI / 1000.0;
        assert_relative_eq!(wn.k[idx], 2.0 * unit);
        assert_relative_eq!(wn.l[idx], -unit);
        assert_relative_eq!(wn.ksqlsq[idx], 5.0 * unit * unit, max_relative = 1e-12);
        assert_relative_eq!(wn.total_index[idx], 5.0_f64.sqrt());
        assert_eq!(wn.ksqlsq[0], 0.0);
    }
}
