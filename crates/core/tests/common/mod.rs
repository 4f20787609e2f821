//! Shared fixtures for the integration tests

#![allow(dead_code)]

use sqg_enkf_core::cycle::{NatureArchives, NatureRun, NatureRunConfig};
use sqg_enkf_core::{ExperimentConfig, ModelParameters, PvField};
use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Coarse model parameters that integrate quickly and stably
pub fn coarse_params() -> ModelParameters {
    ModelParameters {
        dt: Some(1800.0),
        diff_efold: Some(86400.0 / 3.0),
        ..ModelParameters::default()
    }
}

/// A small nature run: 8 × 8 grid, hourly truth
pub fn small_nature(truth_len: usize) -> NatureArchives {
    let config = NatureRunConfig {
        n: 8,
        params: coarse_params(),
        spinup: 2.0 * 86400.0,
        interval: 3600.0,
        truth_len,
        climatology_len: 12,
        climatology_stride: 3,
        ..NatureRunConfig::default()
    };
    NatureRun::new(config)
        .and_then(|run| run.generate())
        .expect("nature run")
}

/// Experiment settings sized for [`small_nature`]
pub fn small_experiment(nassim: usize) -> ExperimentConfig {
    ExperimentConfig {
        nanals: 6,
        nobs: 16,
        nassim,
        nassim_spinup: 0,
        hcovlocal: 4000.0e3,
        ..ExperimentConfig::default()
    }
}

/// Smooth two-level field with several resolved waves
pub fn wavy_field(n: usize) -> PvField {
    let tau = 2.0 * std::f64::consts::PI / n as f64;
    PvField::from_fn(n, |level, x, y| {
        let (x, y) = (x as f64 * tau, y as f64 * tau);
        1.0e-5 * ((x + 2.0 * y).sin() + 0.5 * (3.0 * x - y).cos() + level as f64 * (2.0 * x).sin())
    })
}
