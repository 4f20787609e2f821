//! Precomputed spectral operators of one SQG grid
//!
//! Bundles the transforms, wavenumber grids and inversion coefficients that
//! the tendency, the forcing strategies and the diagnostics all need. When
//! dealiasing is enabled the advection term is formed on the `3N/2` grid.

use super::params::ModelParameters;
use crate::error::SqgError;
use crate::spectral::{
    pad_spectrum, padded_size, truncate_spectrum, Complex64, SpectralTransform, Wavenumbers,
};
use std::f64::consts::PI;
use std::sync::Arc;

/// Closed-form PV → streamfunction inversion coefficients per wavenumber
#[derive(Debug, Clone)]
struct Inversion {
    hovermu: Vec<f64>,
    tanhmu: Vec<f64>,
    sinhmu: Vec<f64>,
}

impl Inversion {
    fn new(wavenumbers: &Wavenumbers, params: &ModelParameters) -> Self {
        let scale = params.nsq.sqrt() * params.height / params.f;
        let len = wavenumbers.len();
        let mut hovermu = Vec::with_capacity(len);
        let mut tanhmu = Vec::with_capacity(len);
        let mut sinhmu = Vec::with_capacity(len);
        for &ksqlsq in &wavenumbers.ksqlsq {
            let mu = (ksqlsq.sqrt() * scale).max(f64::EPSILON);
            hovermu.push(params.height / mu);
            tanhmu.push(mu.tanh());
            sinhmu.push(mu.sinh());
        }
        Self {
            hovermu,
            tanhmu,
            sinhmu,
        }
    }
}

/// Physical wind components of both levels on the advection grid
#[derive(Debug, Clone, PartialEq)]
pub struct WindField {
    /// Zonal wind, `[level][y][x]`
    pub u: Vec<f64>,
    /// Meridional wind, `[level][y][x]`
    pub v: Vec<f64>,
}

#[derive(Debug, Clone)]
struct PaddedGrid {
    transform: SpectralTransform,
    wavenumbers: Wavenumbers,
}

/// Transforms and wavenumber operators shared by one model instance
#[derive(Debug, Clone)]
pub struct SpectralOperators {
    n: usize,
    dt: f64,
    transform: SpectralTransform,
    wavenumbers: Wavenumbers,
    padded: Option<PaddedGrid>,
    inversion: Inversion,
}

impl SpectralOperators {
    /// Build operators for an `n × n` grid
    ///
    /// # Errors
    ///
    /// Parameter validation errors, or `ThreadPool` if a dedicated FFT pool
    /// cannot be started
    pub fn new(n: usize, params: &ModelParameters) -> Result<Self, SqgError> {
        params.validate(n)?;
        let dt = params.time_step()?;

        let transform = SpectralTransform::new(n, params.threads)?;
        let wavenumbers = Wavenumbers::new(n, params.domain_size);
        let padded = params.dealias.then(|| {
            let m = padded_size(n);
            PaddedGrid {
                transform: SpectralTransform::with_pool(m, transform.pool().map(Arc::clone)),
                wavenumbers: Wavenumbers::new(m, params.domain_size),
            }
        });
        let inversion = Inversion::new(&wavenumbers, params);

        Ok(Self {
            n,
            dt,
            transform,
            wavenumbers,
            padded,
            inversion,
        })
    }

    /// Grid points in each direction
    pub fn n(&self) -> usize {
        self.n
    }

    /// Model time step (s)
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Whether the advection term is dealiased
    pub fn dealias(&self) -> bool {
        self.padded.is_some()
    }

    /// Base-grid transform
    pub fn transform(&self) -> &SpectralTransform {
        &self.transform
    }

    /// Base-grid wavenumbers
    pub fn wavenumbers(&self) -> &Wavenumbers {
        &self.wavenumbers
    }

    /// Complex coefficients per level on the base grid
    pub fn spectral_len(&self) -> usize {
        self.transform.spectral_len()
    }

    /// Real values per level on the grid the advection term is formed on
    pub fn advection_grid_len(&self) -> usize {
        self.padded
            .as_ref()
            .map_or(self.transform.grid_len(), |p| p.transform.grid_len())
    }

    /// Invert two-level spectral PV to streamfunction
    ///
    /// # Panics
    ///
    /// Panics if `pvspec` does not hold two levels
    pub fn invert(&self, pvspec: &[Complex64]) -> Vec<Complex64> {
        let nspec = self.spectral_len();
        assert_eq!(pvspec.len(), 2 * nspec, "invert expects two spectral levels");
        let (lower, upper) = pvspec.split_at(nspec);
        let inv = &self.inversion;

        let mut psispec = vec![Complex64::new(0.0, 0.0); 2 * nspec];
        let (psi0, psi1) = psispec.split_at_mut(nspec);
        for i in 0..nspec {
            let (pv0, pv1) = (lower[i], upper[i]);
            psi0[i] = (pv1 / inv.sinhmu[i] - pv0 / inv.tanhmu[i]) * inv.hovermu[i];
            psi1[i] = (pv1 / inv.tanhmu[i] - pv0 / inv.sinhmu[i]) * inv.hovermu[i];
        }
        psispec
    }

    /// Hyperdiffusion-shaped spectral filter `exp(-dt/efold·(K/K_cut)^order)`
    /// with `K_cut = πN/L`
    pub fn hyperdiffusion_filter(&self, efold: f64, order: f64, domain_size: f64) -> Vec<f64> {
        let cutoff = PI * self.n as f64 / domain_size;
        self.wavenumbers
            .ksqlsq
            .iter()
            .map(|&ksqlsq| (-self.dt / efold * (ksqlsq.sqrt() / cutoff).powf(order)).exp())
            .collect()
    }

    /// Horizontal winds `u = -∂ψ/∂y`, `v = ∂ψ/∂x` on the advection grid
    pub fn winds(&self, psispec: &[Complex64]) -> WindField {
        let (u, v) = self.derivatives(psispec, |k, l| (-l, k));
        WindField { u, v }
    }

    /// PV gradients `(∂q/∂x, ∂q/∂y)` on the advection grid
    pub fn gradients(&self, pvspec: &[Complex64]) -> (Vec<f64>, Vec<f64>) {
        self.derivatives(pvspec, |k, l| (k, l))
    }

    /// Forward-transform a product formed on the advection grid back to the
    /// base spectral grid, truncating when dealiased
    pub fn to_base_spectrum(&self, product: &[f64]) -> Vec<Complex64> {
        match &self.padded {
            Some(padded) => padded
                .transform
                .forward_levels(product)
                .chunks(padded.wavenumbers.len())
                .flat_map(|level| truncate_spectrum(level, self.n))
                .collect(),
            None => self.transform.forward_levels(product),
        }
    }

    /// Two physical derivative fields from `i·a(k,l)` and `i·b(k,l)` times
    /// each level of `spec`
    fn derivatives(
        &self,
        spec: &[Complex64],
        factors: impl Fn(f64, f64) -> (f64, f64),
    ) -> (Vec<f64>, Vec<f64>) {
        let nspec = self.spectral_len();
        let (transform, wavenumbers) = match &self.padded {
            Some(padded) => (&padded.transform, &padded.wavenumbers),
            None => (&self.transform, &self.wavenumbers),
        };

        let mut first = Vec::with_capacity(2 * transform.grid_len());
        let mut second = Vec::with_capacity(2 * transform.grid_len());
        for level in spec.chunks(nspec) {
            let level = if self.padded.is_some() {
                pad_spectrum(level, self.n)
            } else {
                level.to_vec()
            };
            let (a, b): (Vec<Complex64>, Vec<Complex64>) = level
                .iter()
                .zip(wavenumbers.k.iter().zip(&wavenumbers.l))
                .map(|(&c, (&k, &l))| {
                    let (fa, fb) = factors(k, l);
                    (c * Complex64::new(0.0, fa), c * Complex64::new(0.0, fb))
                })
                .unzip();
            first.extend(transform.inverse(&a));
            second.extend(transform.inverse(&b));
        }
        (first, second)
    }
}
