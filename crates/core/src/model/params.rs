//! Physical and numerical parameters of the two-surface SQG model

use crate::error::SqgError;
use serde::{Deserialize, Serialize};

/// Ekman coefficients below this are treated as no boundary-layer damping
pub const EKMAN_THRESHOLD: f64 = 1.0e-10;

/// Model parameters, fixed for the lifetime of a model instance
///
/// Defaults match the reference SQG turbulence setup: a 20 000 km square
/// domain, 10 km deep, with a 30 m/s symmetric jet relaxed over 10 days.
/// The time step and the hyperdiffusion e-folding time have no default
/// and must be supplied before a model can be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// Coriolis parameter (1/s)
    pub f: f64,
    /// Buoyancy frequency squared (1/s²)
    pub nsq: f64,
    /// Side length of the square periodic domain (m)
    pub domain_size: f64,
    /// Height of the upper boundary (m)
    pub height: f64,
    /// Basic-state jet velocity scale (m/s)
    pub shear_velocity: f64,
    /// Ekman damping coefficient at the lower boundary (1/s); below 1e-10 disables it
    pub ekman: f64,
    /// Thermal relaxation time scale (s)
    pub tdiab: f64,
    /// Hyperdiffusion order
    pub diff_order: f64,
    /// E-folding time of the shortest resolved wave under hyperdiffusion (s)
    pub diff_efold: Option<f64>,
    /// Symmetric jet (true) or jet with no surface flow (false)
    pub symmetric: bool,
    /// Time step (s)
    pub dt: Option<f64>,
    /// Dealias the advection term with the 3/2 rule
    pub dealias: bool,
    /// FFT worker threads; 0 uses the ambient Rayon pool
    pub threads: usize,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            f: 1.0e-4,
            nsq: 1.0e-4,
            domain_size: 20.0e6,
            height: 10.0e3,
            shear_velocity: 30.0,
            ekman: 0.0,
            tdiab: 10.0 * 86400.0,
            diff_order: 8.0,
            diff_efold: None,
            symmetric: true,
            dt: None,
            dealias: true,
            threads: 1,
        }
    }
}

impl ModelParameters {
    /// Rossby radius of deformation `N·H/f` (m)
    pub fn rossby_radius(&self) -> f64 {
        self.nsq.sqrt() * self.height / self.f
    }

    /// Whether lower-boundary Ekman damping is active
    pub fn has_ekman(&self) -> bool {
        self.ekman >= EKMAN_THRESHOLD
    }

    /// Time step, or `MissingTimeStep`
    pub fn time_step(&self) -> Result<f64, SqgError> {
        self.dt.ok_or(SqgError::MissingTimeStep)
    }

    /// Hyperdiffusion e-folding time, or `MissingDiffusionEfold`
    pub fn diffusion_efold(&self) -> Result<f64, SqgError> {
        self.diff_efold.ok_or(SqgError::MissingDiffusionEfold)
    }

    /// Check the parameters against a grid of `n × n` points
    ///
    /// # Errors
    ///
    /// Odd grid size, missing time step or e-folding time, and non-positive
    /// physical scales
    pub fn validate(&self, n: usize) -> Result<(), SqgError> {
        if n % 2 != 0 {
            return Err(SqgError::OddGridSize(n));
        }
        let dt = self.time_step()?;
        let efold = self.diffusion_efold()?;
        if n == 0 {
            return Err(SqgError::InvalidConfig("grid size must be positive".into()));
        }
        if dt <= 0.0 || efold <= 0.0 {
            return Err(SqgError::InvalidConfig(format!(
                "dt ({dt}) and diff_efold ({efold}) must be positive"
            )));
        }
        for (name, value) in [
            ("f", self.f),
            ("nsq", self.nsq),
            ("domain_size", self.domain_size),
            ("height", self.height),
            ("tdiab", self.tdiab),
        ] {
            if value <= 0.0 || value.is_nan() {
                return Err(SqgError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn complete() -> ModelParameters {
        ModelParameters {
            dt: Some(900.0),
            diff_efold: Some(86400.0 / 3.0),
            ..ModelParameters::default()
        }
    }

    #[test]
    fn test_defaults_need_time_constants() {
        let params = ModelParameters::default();
        assert_eq!(params.validate(64), Err(SqgError::MissingTimeStep));

        let params = ModelParameters {
            dt: Some(900.0),
            ..ModelParameters::default()
        };
        assert_eq!(params.validate(64), Err(SqgError::MissingDiffusionEfold));
    }

    #[test]
    fn test_odd_grid_rejected_first() {
        assert_eq!(complete().validate(63), Err(SqgError::OddGridSize(63)));
        assert!(complete().validate(64).is_ok());
    }

    #[test]
    fn test_rossby_radius() {
        // sqrt(1e-4) * 1e4 / 1e-4 = 1e6 m
        assert_relative_eq!(complete().rossby_radius(), 1.0e6, max_relative = 1e-12);
    }

    #[test]
    fn test_ekman_threshold() {
        let mut params = complete();
        assert!(!params.has_ekman());
        params.ekman = 1.0e-6;
        assert!(params.has_ekman());
    }

    #[test]
    fn test_negative_tdiab_rejected() {
        let params = ModelParameters {
            tdiab: -1.0,
            ..complete()
        };
        assert!(matches!(params.validate(32), Err(SqgError::InvalidConfig(_))));
    }
}
