//! Synthetic climatology and truth produced with the model itself

use super::archive::{ArchiveMetadata, MemoryArchive};
use crate::error::SqgError;
use crate::model::{equilibrium_pv, Forcing, ModelParameters, PvField, SqgModel};
use crate::rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Settings of a nature run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatureRunConfig {
    /// Grid points in each direction
    pub n: usize,
    /// Model parameters; `dt` and `diff_efold` must be set
    pub params: ModelParameters,
    /// Reference potential temperature (K)
    pub theta0: f64,
    /// Gravitational acceleration (m/s²)
    pub g: f64,
    /// Standard deviation of the initial perturbation (K)
    pub noise: f64,
    /// Integration discarded before the first stored state (s)
    pub spinup: f64,
    /// Spacing of stored truth states (s)
    pub interval: f64,
    /// Truth states stored
    pub truth_len: usize,
    /// Climatology states stored
    pub climatology_len: usize,
    /// Truth intervals between climatology states
    pub climatology_stride: usize,
    /// Seed of the initial perturbations
    pub seed: u64,
}

impl Default for NatureRunConfig {
    fn default() -> Self {
        Self {
            n: 32,
            params: ModelParameters {
                dt: Some(1800.0),
                diff_efold: Some(86400.0 / 3.0),
                ..ModelParameters::default()
            },
            theta0: 300.0,
            g: 9.8,
            noise: 1.0,
            spinup: 30.0 * 86400.0,
            interval: 3.0 * 3600.0,
            truth_len: 101,
            climatology_len: 100,
            climatology_stride: 8,
            seed: 7,
        }
    }
}

/// Climatology and truth archives of one nature run
#[derive(Debug, Clone)]
pub struct NatureArchives {
    pub climatology: MemoryArchive,
    pub truth: MemoryArchive,
}

/// Free-running model integrations standing in for a perfect-model truth
#[derive(Debug, Clone)]
pub struct NatureRun {
    config: NatureRunConfig,
    steps_per_interval: usize,
}

impl NatureRun {
    /// Check the configuration
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for empty archives or an interval shorter than one
    /// time step; model parameter errors as in [`SqgModel::new`]
    pub fn new(config: NatureRunConfig) -> Result<Self, SqgError> {
        config.params.validate(config.n)?;
        let dt = config.params.time_step()?;
        config.params.diffusion_efold()?;
        let steps_per_interval = (config.interval / dt).round() as usize;
        if steps_per_interval == 0 || config.spinup < 0.0 {
            return Err(SqgError::InvalidConfig(format!(
                "interval {} must span at least one time step of {dt} and spin-up {} must not be negative",
                config.interval, config.spinup
            )));
        }
        if config.truth_len < 2 || config.climatology_len == 0 || config.climatology_stride == 0 {
            return Err(SqgError::InvalidConfig(
                "nature run needs at least two truth states and one climatology state".into(),
            ));
        }
        Ok(Self {
            config,
            steps_per_interval,
        })
    }

    /// Constants shared by both archives
    pub fn metadata(&self) -> ArchiveMetadata {
        ArchiveMetadata {
            params: self.config.params.clone(),
            theta0: self.config.theta0,
            g: self.config.g,
        }
    }

    /// Spacing of truth states rounded to whole time steps (s)
    pub fn interval(&self) -> Result<f64, SqgError> {
        Ok(self.steps_per_interval as f64 * self.config.params.time_step()?)
    }

    /// Integrate the climatology and truth runs from independent initial
    /// perturbations
    ///
    /// # Errors
    ///
    /// Propagates model construction errors
    pub fn generate(&self) -> Result<NatureArchives, SqgError> {
        let interval = self.interval()?;
        let climatology = self.integrate(0, self.config.climatology_len, self.config.climatology_stride)?;
        let times = (0..climatology.len())
            .map(|i| (i * self.config.climatology_stride) as f64 * interval)
            .collect();
        let climatology = MemoryArchive::new(self.metadata(), times, climatology)?;

        let truth = self.integrate(1, self.config.truth_len, 1)?;
        let times = (0..truth.len()).map(|i| i as f64 * interval).collect();
        let truth = MemoryArchive::new(self.metadata(), times, truth)?;

        info!(
            n = self.config.n,
            climatology = self.config.climatology_len,
            truth = self.config.truth_len,
            interval,
            "Nature run complete"
        );
        Ok(NatureArchives { climatology, truth })
    }

    fn initial_state(&self, stream: u64) -> PvField {
        let scale = self.config.noise / self.metadata().scalefact();
        let mut rng = rng::substream(self.config.seed, stream);
        let mut pv = equilibrium_pv(self.config.n, &self.config.params);
        for value in pv.as_mut_slice() {
            *value += scale * rng::normal(&mut rng);
        }
        pv
    }

    fn integrate(&self, stream: u64, count: usize, stride: usize) -> Result<Vec<PvField>, SqgError> {
        let dt = self.config.params.time_step()?;
        let mut model = SqgModel::new(
            self.initial_state(stream),
            self.config.params.clone(),
            Forcing::None,
        )?;
        let spinup_steps = (self.config.spinup / dt).round() as usize;
        if spinup_steps > 0 {
            model.set_timesteps(spinup_steps);
            model.advance(None)?;
        }
        model.set_time(0.0);
        model.set_timesteps(stride * self.steps_per_interval);

        let mut states = Vec::with_capacity(count);
        states.push(model.pv().clone());
        while states.len() < count {
            states.push(model.advance(None)?);
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::archive::{ClimatologySource, TruthSource};

    fn small() -> NatureRunConfig {
        NatureRunConfig {
            n: 8,
            spinup: 4.0 * 3600.0,
            interval: 3600.0,
            truth_len: 3,
            climatology_len: 2,
            climatology_stride: 2,
            ..NatureRunConfig::default()
        }
    }

    #[test]
    fn test_archives_have_requested_lengths() {
        let run = NatureRun::new(small()).unwrap();
        let archives = run.generate().unwrap();
        assert_eq!(archives.truth.times(), &[0.0, 3600.0, 7200.0]);
        assert_eq!(ClimatologySource::len(&archives.climatology), 2);
        assert_eq!(archives.climatology.times(), &[0.0, 7200.0]);
        let first = archives.truth.state(0).unwrap();
        assert_eq!(first.n, 8);
        assert!(first.data.iter().all(|v| v.is_finite()));
        assert_ne!(archives.truth.state(0).unwrap(), archives.climatology.sample(0).unwrap());
    }

    #[test]
    fn test_generation_is_reproducible() {
        let run = NatureRun::new(small()).unwrap();
        let a = run.generate().unwrap();
        let b = run.generate().unwrap();
        assert_eq!(a.truth, b.truth);
        assert_eq!(a.climatology, b.climatology);
    }

    #[test]
    fn test_interval_shorter_than_step_is_rejected() {
        let config = NatureRunConfig {
            interval: 100.0,
            ..small()
        };
        assert!(matches!(NatureRun::new(config), Err(SqgError::InvalidConfig(_))));
    }
}
