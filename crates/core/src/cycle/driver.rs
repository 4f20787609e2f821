//! Ensemble data assimilation cycle
//!
//! Each cycle draws observations from the truth, updates the background
//! ensemble, inflates the posterior, records the cycle and advances every
//! member to the next observation time. The analysis completes before any
//! member is advanced; the forecasts themselves run in parallel.

use super::archive::{ClimatologySource, CycleRecord, CycleRecorder, TruthSource};
use super::config::{ExperimentConfig, ForcingFactory};
use super::diagnostics::{
    innovation_stats, mean, rms_error_spread, CycleDiagnostics, KineticEnergySpectra,
    SpectraAccumulator,
};
use crate::analysis::{
    enkf_update, AnalysisInput, EnsembleState, Inflation, LocalizationMatrices, Localizer,
};
use crate::error::SqgError;
use crate::model::{PvField, SqgModel};
use crate::observation::{
    direct_insertion, forward_operator, ObservationNetwork, ObservationSet, ObservedLevels,
};
use crate::rng;
use rand::rngs::StdRng;
use rand::seq::index;
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Cached localization for the last observation network
struct CachedLocalization {
    indices: Vec<usize>,
    matrices: LocalizationMatrices,
}

/// Result of a complete experiment
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Diagnostics of every cycle
    pub cycles: Vec<CycleDiagnostics>,
    /// Forecast spectra averaged after spin-up
    pub spectra: Option<KineticEnergySpectra>,
}

/// Drives an ensemble of SQG models through assimilation cycles
pub struct CycleDriver<'a> {
    config: ExperimentConfig,
    truth: &'a dyn TruthSource,
    times: Vec<f64>,
    scalefact: f64,
    models: Vec<SqgModel>,
    ensemble: EnsembleState,
    network: ObservationNetwork,
    localizer: Localizer,
    localization: Option<CachedLocalization>,
    inflation: Inflation,
    spectra: SpectraAccumulator,
    rng: StdRng,
    ntime: usize,
}

impl<'a> CycleDriver<'a> {
    /// Draw the initial ensemble from `climatology` and prepare cycling
    /// against `truth`
    ///
    /// Members are distinct climatology states chosen with the run seed.
    /// Every member clock starts at the first truth time and advances by
    /// the truth interval rounded to whole time steps.
    ///
    /// # Errors
    ///
    /// - invalid experiment settings (see [`ExperimentConfig::validate`])
    /// - `InvalidConfig` when the climatology has fewer states than members,
    ///   or the truth has fewer times than cycles or an interval shorter
    ///   than one time step
    /// - model construction errors
    pub fn new(
        config: ExperimentConfig,
        climatology: &dyn ClimatologySource,
        truth: &'a dyn TruthSource,
    ) -> Result<Self, SqgError> {
        config.validate()?;
        let metadata = climatology.metadata();
        let scalefact = metadata.scalefact();
        let mut params = metadata.params.clone();
        if let Some(efold) = config.diff_efold {
            params.diff_efold = Some(efold);
        }
        params.threads = config.threads;
        let dt = params.time_step()?;

        if climatology.len() < config.nanals {
            return Err(SqgError::InvalidConfig(format!(
                "climatology holds {} states, {} members requested",
                climatology.len(),
                config.nanals
            )));
        }
        let times = truth.times().to_vec();
        if times.len() < config.nassim.max(2) {
            return Err(SqgError::InvalidConfig(format!(
                "truth holds {} times, {} cycles requested",
                times.len(),
                config.nassim
            )));
        }
        let timesteps = ((times[1] - times[0]) / dt).round() as usize;
        if timesteps == 0 {
            return Err(SqgError::InvalidConfig(format!(
                "assimilation interval {} is shorter than the time step {dt}",
                times[1] - times[0]
            )));
        }

        let mut rng = rng::run_stream(config.seed);
        let selection = index::sample(&mut rng, climatology.len(), config.nanals).into_vec();
        let first = climatology.sample(selection[0])?;
        let n = first.n;
        let factory = ForcingFactory::new(
            &config.forcing,
            config.seed,
            n,
            params.domain_size,
            dt,
            scalefact,
        )?;

        let mut members = Vec::with_capacity(config.nanals);
        let mut models = Vec::with_capacity(config.nanals);
        for (member, &sample) in selection.iter().enumerate() {
            let pv = if member == 0 {
                first.clone()
            } else {
                climatology.sample(sample)?
            };
            let mut model = SqgModel::new(pv.clone(), params.clone(), factory.build(member)?)?;
            model.set_time(times[0]);
            model.set_timesteps(timesteps);
            members.push(pv);
            models.push(model);
        }
        let ensemble = EnsembleState::from_members(&members)?;

        let network = ObservationNetwork::new(n, config.network()?)?;
        let localizer = Localizer::new(
            n,
            params.domain_size,
            config.hcovlocal,
            config.vertical_localization(),
            params.rossby_radius(),
        )?;

        info!(
            nanals = config.nanals,
            hcovlocal_km = config.hcovlocal / 1000.0,
            vcovlocal = localizer.vertical(),
            nobs = network.nobs(),
            levob = ?config.levob,
            update = ?config.update,
            forcing = config.forcing.is_active(),
            timesteps,
            "Cycle driver created"
        );

        Ok(Self {
            inflation: config.inflation.into(),
            spectra: SpectraAccumulator::new(n, config.kespec_members),
            config,
            truth,
            times,
            scalefact,
            models,
            ensemble,
            network,
            localizer,
            localization: None,
            rng,
            ntime: 0,
        })
    }

    /// Experiment settings
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Next cycle to run
    pub fn ntime(&self) -> usize {
        self.ntime
    }

    /// Whether every configured cycle has run
    pub fn is_finished(&self) -> bool {
        self.ntime >= self.config.nassim
    }

    /// PV to temperature factor
    pub fn scalefact(&self) -> f64 {
        self.scalefact
    }

    /// Resolved cross-boundary localization factor
    pub fn vertical_localization(&self) -> f64 {
        self.localizer.vertical()
    }

    /// Observations per level and cycle
    pub fn nobs(&self) -> usize {
        self.network.nobs()
    }

    /// Member models
    pub fn models(&self) -> &[SqgModel] {
        &self.models
    }

    /// Current ensemble: the background of the next cycle
    pub fn ensemble(&self) -> &EnsembleState {
        &self.ensemble
    }

    /// Whether analyses are replaced by noisy truth
    pub fn uses_direct_insertion(&self) -> bool {
        self.config.direct_insertion
            && self.network.covers_grid()
            && self.config.levob == ObservedLevels::Both
    }

    /// Forecast spectra averaged so far, `None` before the first
    /// post-spin-up forecast
    pub fn spectra(&self) -> Option<KineticEnergySpectra> {
        self.models
            .first()
            .and_then(|model| self.spectra.summary(model.operators()))
    }

    /// Run one analysis cycle and the forecast to the next observation time
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if every cycle has already run
    /// - `ClockMismatch` if a member clock disagrees with the observation time
    /// - `ShapeMismatch` if the truth is on a different grid
    /// - archive and analysis errors
    pub fn run_cycle(&mut self, recorder: &mut dyn CycleRecorder) -> Result<CycleDiagnostics, SqgError> {
        let ntime = self.ntime;
        if self.is_finished() {
            return Err(SqgError::InvalidConfig(format!(
                "all {} cycles have run",
                self.config.nassim
            )));
        }
        let obs_time = self.times[ntime];
        self.check_clocks(obs_time)?;

        let truth = self.truth.state(ntime)?;
        if truth.data.len() != self.ensemble.state_len() {
            return Err(SqgError::ShapeMismatch {
                what: "truth state",
                expected: self.ensemble.state_len(),
                found: truth.data.len(),
            });
        }

        let indices = self.network.indices(ntime, &mut self.rng);
        let observations = ObservationSet::sample(
            &truth,
            indices,
            self.config.levob,
            self.scalefact,
            self.config.oberrstdev,
            self.localizer.domain_size(),
            &mut self.rng,
        );
        self.refresh_localization(&observations.indices);

        let background = &self.ensemble;
        let fsprd = background.variance();
        let background_mean = background.mean();
        let hx_b = forward_operator(
            background,
            &observations.indices,
            &observations.levob,
            self.scalefact,
        );
        let hxmean_b = hx_b.mean();
        let obsprd_b = mean(&hx_b.variance());
        let (pverr_b, pvsprd_b) = rms_error_spread(background, &truth, self.scalefact);

        let direct = self.uses_direct_insertion();
        if self.config.direct_insertion && !direct && ntime == 0 {
            warn!("Direct insertion needs every point of both boundaries observed; using the EnKF");
        }
        let mut posterior = if direct {
            direct_insertion(
                &truth,
                self.config.nanals,
                self.config.oberrstdev,
                self.scalefact,
                &mut self.rng,
            )
        } else {
            let localization = self
                .localization
                .as_ref()
                .map(|cached| &cached.matrices)
                .ok_or(SqgError::MissingObservationLocalization)?;
            let input = AnalysisInput {
                observations: &observations.values,
                oberrvar: &observations.oberrvar,
                levob: &observations.levob,
                localization,
            };
            enkf_update(background, &hx_b, &input, self.config.update)?
        };

        let hx_a = forward_operator(
            &posterior,
            &observations.indices,
            &observations.levob,
            self.scalefact,
        );
        let obsprd_a = mean(&hx_a.variance());
        let stats = innovation_stats(&observations.values, &hxmean_b, &hx_a.mean());

        // Direct insertion already carries the observation-error spread
        let factors = if direct {
            vec![1.0; posterior.state_len()]
        } else {
            self.inflation.apply(&mut posterior, &fsprd, &background_mean)
        };
        let (pverr_a, pvsprd_a) = rms_error_spread(&posterior, &truth, self.scalefact);

        let diagnostics = CycleDiagnostics {
            ntime,
            pverr_a,
            pvsprd_a,
            pverr_b,
            pvsprd_b,
            obinc_b: stats.obinc_b,
            obsprd_b,
            obinc_a: stats.obinc_a,
            obsprd_a,
            omaomb: stats.omaomb / mean(&observations.oberrvar),
            obbias_b: stats.obbias_b,
            inflation: mean(&factors),
        };
        debug!(
            ntime,
            nobs = observations.nobs(),
            direct,
            inflation = diagnostics.inflation,
            "Analysis complete"
        );

        recorder.record(&CycleRecord {
            ntime,
            time: obs_time,
            scalefact: self.scalefact,
            truth: &truth,
            background: &self.ensemble,
            posterior: &posterior,
            observations: &observations,
            inflation: &factors,
        })?;

        self.forecast(&posterior)?;
        if ntime >= self.config.nassim_spinup && ntime + 1 < self.times.len() {
            let verifying = self.truth.state(ntime + 1)?;
            if let Some(model) = self.models.first() {
                self.spectra
                    .accumulate(model.operators(), &self.ensemble, &verifying, self.scalefact);
            }
        }
        self.ntime += 1;
        Ok(diagnostics)
    }

    /// Run every remaining cycle
    ///
    /// # Errors
    ///
    /// The first error of any cycle
    pub fn run(&mut self, recorder: &mut dyn CycleRecorder) -> Result<RunSummary, SqgError> {
        let mut cycles = Vec::with_capacity(self.config.nassim - self.ntime);
        while !self.is_finished() {
            cycles.push(self.run_cycle(recorder)?);
        }
        Ok(RunSummary {
            cycles,
            spectra: self.spectra(),
        })
    }

    fn check_clocks(&self, obs_time: f64) -> Result<(), SqgError> {
        for model in &self.models {
            let tolerance = 1.0e-3 * model.operators().dt();
            if (model.time() - obs_time).abs() > tolerance {
                return Err(SqgError::ClockMismatch {
                    model_time: model.time(),
                    obs_time,
                });
            }
        }
        Ok(())
    }

    fn refresh_localization(&mut self, indices: &[usize]) {
        let stale = self
            .localization
            .as_ref()
            .is_none_or(|cached| cached.indices != indices);
        if stale {
            let matrices = self
                .localizer
                .build(indices, self.config.update.needs_observation_localization());
            self.localization = Some(CachedLocalization {
                indices: indices.to_vec(),
                matrices,
            });
        }
    }

    fn forecast(&mut self, posterior: &EnsembleState) -> Result<(), SqgError> {
        let n = self.models.first().map_or(0, SqgModel::n);
        let members = posterior.to_members(n);
        let forecasts = self
            .models
            .par_iter_mut()
            .zip(members.par_iter())
            .map(|(model, pv)| model.advance(Some(pv)))
            .collect::<Result<Vec<PvField>, SqgError>>()?;
        self.ensemble = EnsembleState::from_members(&forecasts)?;
        Ok(())
    }
}
