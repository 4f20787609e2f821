//! Two-surface SQG dynamical core
//!
//! The state is boundary PV on the lower and upper surfaces of a doubly
//! periodic channel. Each time step inverts PV to streamfunction, advects PV
//! with the resulting winds, relaxes towards an equilibrium jet and applies
//! optional Ekman damping. Time stepping is classical RK4 followed by an
//! implicit hyperdiffusion filter applied once per step.

use super::forcing::Forcing;
use super::operators::{SpectralOperators, WindField};
use super::params::ModelParameters;
use super::state::{PvField, PvState};
use crate::error::SqgError;
use crate::spectral::{Complex64, Wavenumbers};
use std::f64::consts::PI;
use tracing::info;

/// One SQG model instance: parameters, operators, state and forcing
#[derive(Debug)]
pub struct SqgModel {
    params: ModelParameters,
    ops: SpectralOperators,
    state: PvState,
    forcing: Forcing,
    /// Winds added to every RK4 substage of the current step
    wind_perturbation: Option<WindField>,
    hyperdiffusion: Vec<f64>,
    pvspec_eq: Vec<Complex64>,
    inv_tdiab: f64,
    time: f64,
    timesteps: usize,
}

impl SqgModel {
    /// Build a model starting from `pv`
    ///
    /// # Errors
    ///
    /// Level count other than two or a partial level, odd grid size,
    /// missing time step or hyperdiffusion e-folding time, other invalid
    /// parameters, or a failed FFT thread pool
    pub fn new(pv: PvField, params: ModelParameters, forcing: Forcing) -> Result<Self, SqgError> {
        pv.validate()?;
        let n = pv.n;
        let ops = SpectralOperators::new(n, &params)?;
        let efold = params.diffusion_efold()?;

        let hyperdiffusion = ops.hyperdiffusion_filter(efold, params.diff_order, params.domain_size);
        let pvspec_eq = ops
            .transform()
            .forward_levels(equilibrium_pv(n, &params).as_slice());
        let state = PvState::from_physical(pv, ops.transform());

        info!(
            n,
            dealias = params.dealias,
            symmetric = params.symmetric,
            forcing = forcing.kind(),
            dt = ops.dt(),
            "SQG model created"
        );

        Ok(Self {
            inv_tdiab: 1.0 / params.tdiab,
            params,
            ops,
            state,
            forcing,
            wind_perturbation: None,
            hyperdiffusion,
            pvspec_eq,
            time: 0.0,
            timesteps: 1,
        })
    }

    /// Model parameters
    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    /// Grid points in each direction
    pub fn n(&self) -> usize {
        self.ops.n()
    }

    /// Spectral operators of this grid
    pub fn operators(&self) -> &SpectralOperators {
        &self.ops
    }

    /// Base-grid wavenumbers
    pub fn wavenumbers(&self) -> &Wavenumbers {
        self.ops.wavenumbers()
    }

    /// Hyperdiffusion factor per spectral coefficient of one level
    pub fn hyperdiffusion(&self) -> &[f64] {
        &self.hyperdiffusion
    }

    /// Spectrum of the equilibrium PV the state relaxes towards
    pub fn equilibrium(&self) -> &[Complex64] {
        &self.pvspec_eq
    }

    /// Active forcing strategy
    pub fn forcing(&self) -> &Forcing {
        &self.forcing
    }

    /// Model clock (s)
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Set the model clock (s)
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Steps taken by each call to `advance`
    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    /// Set the steps taken by each call to `advance`
    pub fn set_timesteps(&mut self, timesteps: usize) {
        self.timesteps = timesteps;
    }

    /// Current physical PV
    pub fn pv(&mut self) -> &PvField {
        self.state.physical(self.ops.transform())
    }

    /// Current spectral PV, `[level][ky][kx]`
    pub fn pv_spectral(&mut self) -> &[Complex64] {
        self.state.spectral(self.ops.transform())
    }

    /// Replace the physical PV
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the field is on a different grid
    pub fn set_pv(&mut self, pv: PvField) -> Result<(), SqgError> {
        self.state.set_physical(pv)
    }

    /// Invert spectral PV to streamfunction
    pub fn invert(&self, pvspec: &[Complex64]) -> Vec<Complex64> {
        self.ops.invert(pvspec)
    }

    /// Spectral PV tendency
    ///
    /// On the first RK4 substage the forcing draws new perturbation winds;
    /// later substages reuse them.
    pub fn tendency(&mut self, pvspec: &[Complex64], first_substage: bool) -> Vec<Complex64> {
        let psispec = self.ops.invert(pvspec);
        let mut wind = self.ops.winds(&psispec);
        let (pvx, pvy) = self.ops.gradients(pvspec);

        if first_substage {
            self.wind_perturbation = self.forcing.wind_perturbation(pvspec, &self.ops);
        }
        if let Some(pert) = &self.wind_perturbation {
            for (u, du) in wind.u.iter_mut().zip(&pert.u) {
                *u += du;
            }
            for (v, dv) in wind.v.iter_mut().zip(&pert.v) {
                *v += dv;
            }
        }

        let advection: Vec<f64> = wind
            .u
            .iter()
            .zip(&wind.v)
            .zip(pvx.iter().zip(&pvy))
            .map(|((u, v), (qx, qy))| u * qx + v * qy)
            .collect();
        let jacobian = self.ops.to_base_spectrum(&advection);

        let mut dpvspec: Vec<Complex64> = pvspec
            .iter()
            .zip(&self.pvspec_eq)
            .zip(&jacobian)
            .map(|((&pv, &eq), &jac)| (eq - pv) * self.inv_tdiab - jac)
            .collect();

        if self.params.has_ekman() {
            let nspec = self.ops.spectral_len();
            let r = self.params.ekman;
            let ksqlsq = &self.ops.wavenumbers().ksqlsq;
            for i in 0..nspec {
                dpvspec[i] += psispec[i] * (r * ksqlsq[i]);
                if self.params.symmetric {
                    dpvspec[nspec + i] -= psispec[nspec + i] * (r * ksqlsq[i]);
                }
            }
        }
        dpvspec
    }

    /// One RK4 step with hyperdiffusion; advances the clock by `dt`
    pub fn timestep(&mut self) {
        let dt = self.ops.dt();
        let pvspec = self.state.spectral(self.ops.transform()).to_vec();

        let k1 = scaled(self.tendency(&pvspec, true), dt);
        let k2 = scaled(self.tendency(&axpy(&pvspec, 0.5, &k1), false), dt);
        let k3 = scaled(self.tendency(&axpy(&pvspec, 0.5, &k2), false), dt);
        let k4 = scaled(self.tendency(&axpy(&pvspec, 1.0, &k3), false), dt);

        let nspec = self.ops.spectral_len();
        let updated: Vec<Complex64> = (0..pvspec.len())
            .map(|i| {
                let increment = (k1[i] + k2[i] * 2.0 + k3[i] * 2.0 + k4[i]) / 6.0;
                (pvspec[i] + increment) * self.hyperdiffusion[i % nspec]
            })
            .collect();

        self.state.set_spectral(updated);
        self.time += dt;
    }

    /// Optionally replace the PV, run `timesteps` steps, return the new PV
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if a supplied field is on a different grid
    pub fn advance(&mut self, pv: Option<&PvField>) -> Result<PvField, SqgError> {
        if let Some(field) = pv {
            self.state.set_physical(field.clone())?;
        }
        for _ in 0..self.timesteps {
            self.timestep();
        }
        Ok(self.state.physical(self.ops.transform()).clone())
    }
}

/// Equilibrium boundary PV of the basic-state jet on an `n × n` grid
///
/// Symmetric jets carry the same PV on both boundaries; the asymmetric jet
/// has no flow at the surface.
pub fn equilibrium_pv(n: usize, params: &ModelParameters) -> PvField {
    let l = 2.0 * PI / params.domain_size;
    let mu = l * params.rossby_radius();
    let u = params.shear_velocity;
    let h = params.height;
    let dy = params.domain_size / n as f64;

    PvField::from_fn(n, |level, _x, y| {
        let wave = (l * y as f64 * dy).cos();
        if params.symmetric {
            -(mu * 0.5 * u / (l * h)) * (0.5 * mu).cosh() * wave / (0.5 * mu).sinh()
        } else {
            let lower = -(mu * u / (l * h)) * wave / mu.sinh();
            if level == 0 {
                lower
            } else {
                lower * mu.cosh()
            }
        }
    })
}

fn scaled(mut values: Vec<Complex64>, factor: f64) -> Vec<Complex64> {
    for v in &mut values {
        *v *= factor;
    }
    values
}

fn axpy(base: &[Complex64], factor: f64, step: &[Complex64]) -> Vec<Complex64> {
    base.iter().zip(step).map(|(&b, &s)| b + s * factor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::forcing::{PatternForcing, PatternNorm, RandomPattern};
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn params() -> ModelParameters {
        ModelParameters {
            dt: Some(900.0),
            diff_efold: Some(86400.0 / 3.0),
            threads: 0,
            ..ModelParameters::default()
        }
    }

    fn perturbed_jet(n: usize, p: &ModelParameters) -> PvField {
        let mut pv = equilibrium_pv(n, p);
        for level in 0..2 {
            for y in 0..n {
                for x in 0..n {
                    let phase = 2.0 * PI * (x + 2 * y) as f64 / n as f64;
                    let value = pv.get(level, x, y) + 50.0 * (phase + level as f64).sin();
                    pv.set(level, x, y, value);
                }
            }
        }
        pv
    }

    /// Pattern that logs every read and counts every evolution
    struct CountingPattern {
        field: Vec<f64>,
        step: f64,
        reads: Arc<Mutex<Vec<f64>>>,
        evolves: Arc<AtomicUsize>,
    }

    impl RandomPattern for CountingPattern {
        fn pattern(&self) -> &[f64] {
            self.reads.lock().unwrap().push(self.step);
            &self.field
        }

        fn evolve(&mut self) {
            self.step += 1.0;
            for value in &mut self.field {
                *value += 1.0;
            }
            self.evolves.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_pattern_evolves_once_per_step() {
        let n = 16;
        let p = params();
        let wave: Vec<f64> = (0..n * n)
            .map(|i| 1.0e3 * (2.0 * PI * (i % n) as f64 / n as f64).sin())
            .collect();
        let reads = Arc::new(Mutex::new(Vec::new()));
        let evolves = Arc::new(AtomicUsize::new(0));
        let counting = || {
            Box::new(CountingPattern {
                field: wave.clone(),
                step: 0.0,
                reads: Arc::clone(&reads),
                evolves: Arc::clone(&evolves),
            })
        };
        let forcing = Forcing::Pattern(PatternForcing::new(counting(), counting(), PatternNorm::Psi));
        let mut model = SqgModel::new(perturbed_jet(n, &p), p, forcing).unwrap();

        let steps = 3;
        for _ in 0..steps {
            model.timestep();
        }
        assert_eq!(evolves.load(Ordering::SeqCst), 2 * steps);
        // One read per boundary per step, taken before that step's evolution
        let seen = reads.lock().unwrap().clone();
        let expected: Vec<f64> = (0..steps).flat_map(|k| [k as f64, k as f64]).collect();
        assert_eq!(seen, expected);
        assert!(model.pv_spectral().iter().all(|c| c.re.is_finite() && c.im.is_finite()));
    }

    #[test]
    fn test_construction_errors() {
        let p = params();
        let odd = PvField::zeros(15);
        assert_eq!(
            SqgModel::new(odd, p.clone(), Forcing::None).unwrap_err(),
            SqgError::OddGridSize(15)
        );
        let no_dt = ModelParameters { dt: None, ..p.clone() };
        assert_eq!(
            SqgModel::new(PvField::zeros(16), no_dt, Forcing::None).unwrap_err(),
            SqgError::MissingTimeStep
        );
        let no_efold = ModelParameters {
            diff_efold: None,
            ..p
        };
        assert_eq!(
            SqgModel::new(PvField::zeros(16), no_efold, Forcing::None).unwrap_err(),
            SqgError::MissingDiffusionEfold
        );
    }

    #[test]
    fn test_equilibrium_is_steady_without_advection() {
        // A zonally uniform jet has no self-advection and sits at equilibrium
        let n = 16;
        let p = params();
        let mut model = SqgModel::new(equilibrium_pv(n, &p), p.clone(), Forcing::None).unwrap();
        let pvspec = model.pv_spectral().to_vec();
        let tend = model.tendency(&pvspec, true);
        let scale = pvspec.iter().map(|c| c.norm()).fold(0.0, f64::max);
        assert!(tend.iter().all(|c| c.norm() * p.tdiab < 1e-9 * scale));
    }

    #[test]
    fn test_symmetric_equilibrium_levels_match() {
        let p = params();
        let pv = equilibrium_pv(8, &p);
        assert_eq!(pv.level(0), pv.level(1));
        let asym = ModelParameters {
            symmetric: false,
            ..p
        };
        let pv = equilibrium_pv(8, &asym);
        let mu = 2.0 * PI / asym.domain_size * asym.rossby_radius();
        assert_abs_diff_eq!(pv.get(1, 0, 0), pv.get(0, 0, 0) * mu.cosh(), epsilon = 1e-9);
    }

    #[test]
    fn test_hyperdiffusion_alone_damps_all_but_mean() {
        let n = 16;
        let p = ModelParameters {
            tdiab: f64::INFINITY,
            ..params()
        };
        // Constant plus one mode on each level; no shear so no advection
        let pv = PvField::from_fn(n, |level, x, _y| {
            3.0 + level as f64 + (2.0 * PI * 5.0 * x as f64 / n as f64).cos()
        });
        let mut model = SqgModel::new(pv, p, Forcing::None).unwrap();
        model.pvspec_eq.fill(Complex64::new(0.0, 0.0));
        let before = model.pv_spectral().to_vec();
        model.timestep();
        let after = model.pv_spectral().to_vec();

        let nspec = model.operators().spectral_len();
        for level in 0..2 {
            let mean = level * nspec;
            assert_abs_diff_eq!(after[mean].re, before[mean].re, epsilon = 1e-9);
            let mode = mean + 5;
            assert!(after[mode].norm() < before[mode].norm());
            assert_abs_diff_eq!(
                after[mode].norm(),
                before[mode].norm() * model.hyperdiffusion()[5],
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_advance_is_deterministic_and_steps_clock() {
        let n = 16;
        let p = params();
        let pv = perturbed_jet(n, &p);

        let run = || {
            let mut model = SqgModel::new(pv.clone(), p.clone(), Forcing::None).unwrap();
            model.set_timesteps(3);
            model.set_time(100.0);
            let out = model.advance(None).unwrap();
            (out, model.time())
        };
        let (a, ta) = run();
        let (b, tb) = run();
        assert_eq!(a, b);
        assert_eq!(ta, 100.0 + 3.0 * 900.0);
        assert_eq!(ta, tb);
        assert_ne!(a, pv);
    }

    #[test]
    fn test_advance_with_new_field_replaces_state() {
        let n = 16;
        let p = params();
        let mut model = SqgModel::new(PvField::zeros(n), p.clone(), Forcing::None).unwrap();
        model.set_timesteps(0);
        let pv = perturbed_jet(n, &p);
        let out = model.advance(Some(&pv)).unwrap();
        for (a, b) in out.data.iter().zip(&pv.data) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        assert!(model.advance(Some(&PvField::zeros(8))).is_err());
    }

    #[test]
    fn test_dealiased_tendency_matches_plain_for_smooth_field() {
        let n = 32;
        let plain = ModelParameters {
            dealias: false,
            ..params()
        };
        let padded = params();
        // Low-wavenumber content only
        let pv = PvField::from_fn(n, |level, x, y| {
            let px = 2.0 * PI * x as f64 / n as f64;
            let py = 2.0 * PI * y as f64 / n as f64;
            100.0 * (px + py + level as f64).sin() + 40.0 * (2.0 * px).cos() * py.sin()
        });

        let mut a = SqgModel::new(pv.clone(), plain, Forcing::None).unwrap();
        let mut b = SqgModel::new(pv, padded, Forcing::None).unwrap();
        let spec = a.pv_spectral().to_vec();
        let ta = a.tendency(&spec, true);
        let tb = b.tendency(&spec, true);
        let scale = ta.iter().map(|c| c.norm()).fold(0.0, f64::max);
        for (x, y) in ta.iter().zip(&tb) {
            assert!((x - y).norm() <= 1e-8 * scale);
        }
    }

    #[test]
    fn test_ekman_damps_lower_boundary_only_when_asymmetric() {
        let n = 16;
        let base = ModelParameters {
            symmetric: false,
            tdiab: f64::INFINITY,
            ..params()
        };
        let pv = PvField::from_fn(n, |_, x, _| (2.0 * PI * x as f64 / n as f64).cos());
        let mut calm = SqgModel::new(pv.clone(), base.clone(), Forcing::None).unwrap();
        let damped_params = ModelParameters {
            ekman: 1.0e-5,
            ..base
        };
        let mut damped = SqgModel::new(pv, damped_params, Forcing::None).unwrap();

        let spec = calm.pv_spectral().to_vec();
        let t_calm = calm.tendency(&spec, true);
        let t_damped = damped.tendency(&spec, true);
        let nspec = calm.operators().spectral_len();
        let psi = calm.invert(&spec);
        let ksq = calm.wavenumbers().ksqlsq[1];

        let expected = psi[1] * (1.0e-5 * ksq);
        assert_abs_diff_eq!((t_damped[1] - t_calm[1]).re, expected.re, epsilon = 1e-18);
        assert_eq!(t_damped[nspec + 1], t_calm[nspec + 1]);
    }
}
