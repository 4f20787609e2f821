//! Error type shared by the dynamical core, the analysis engine and the
//! cycling driver.
//!
//! Construction-time validation failures (bad grid, missing time constants,
//! mismatched array lengths) and the runtime clock check all surface here.
//! Numerical blow-up is not detected.

/// Errors raised while building or running an SQG/EnKF experiment
#[derive(Debug, Clone, PartialEq)]
pub enum SqgError {
    /// Grid size must be even
    OddGridSize(usize),
    /// Model time step was not supplied
    MissingTimeStep,
    /// Hyperdiffusion e-folding time was not supplied
    MissingDiffusionEfold,
    /// Leading PV dimension must be 2 (bottom and top boundary)
    InvalidLevelCount(usize),
    /// Array length does not match the grid it is applied to
    ShapeMismatch {
        /// What was being checked
        what: &'static str,
        /// Expected number of elements
        expected: usize,
        /// Number of elements found
        found: usize,
    },
    /// Ensemble needs at least two members for an unbiased spread
    EnsembleTooSmall(usize),
    /// Observation error variances do not match the observation count
    ObservationErrorMismatch {
        /// Number of observations per level
        nobs: usize,
        /// Number of error variances supplied
        nvar: usize,
    },
    /// Serial update requested without observation-observation localization
    MissingObservationLocalization,
    /// Fixed network spacing does not divide the grid
    FixedNetworkSpacing {
        /// Grid size
        n: usize,
        /// Observation spacing in grid points
        nskip: usize,
    },
    /// Model clock and observation time disagree at the start of a cycle
    ClockMismatch {
        /// Model time in seconds
        model_time: f64,
        /// Observation time in seconds
        obs_time: f64,
    },
    /// A configuration value is out of range
    InvalidConfig(String),
    /// Climatology or truth archive could not supply the requested data
    Archive(String),
    /// Dedicated FFT worker pool could not be created
    ThreadPool(String),
}

impl std::fmt::Display for SqgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqgError::OddGridSize(n) => {
                write!(f, "Grid size must be even (powers of 2 are fastest), got {n}")
            }
            SqgError::MissingTimeStep => write!(f, "Model time step must be specified"),
            SqgError::MissingDiffusionEfold => {
                write!(f, "E-folding time scale for diffusion must be specified")
            }
            SqgError::InvalidLevelCount(levels) => {
                write!(f, "First dimension of pv should be 2, got {levels}")
            }
            SqgError::ShapeMismatch {
                what,
                expected,
                found,
            } => write!(f, "Shape mismatch for {what}: expected {expected} values, found {found}"),
            SqgError::EnsembleTooSmall(nanals) => {
                write!(f, "Ensemble needs at least 2 members, got {nanals}")
            }
            SqgError::ObservationErrorMismatch { nobs, nvar } => write!(
                f,
                "Observation error variance length {nvar} does not match observation count {nobs}"
            ),
            SqgError::MissingObservationLocalization => write!(
                f,
                "Serial update requires an observation-observation localization matrix"
            ),
            SqgError::FixedNetworkSpacing { n, nskip } => write!(
                f,
                "Grid size {n} must be divisible by fixed observation spacing {nskip}"
            ),
            SqgError::ClockMismatch {
                model_time,
                obs_time,
            } => write!(f, "Model/ob time mismatch {model_time} vs {obs_time}"),
            SqgError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            SqgError::Archive(msg) => write!(f, "Archive error: {msg}"),
            SqgError::ThreadPool(msg) => write!(f, "Failed to build FFT thread pool: {msg}"),
        }
    }
}

impl std::error::Error for SqgError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_values() {
        let err = SqgError::ClockMismatch {
            model_time: 10.0,
            obs_time: 20.0,
        };
        assert_eq!(err.to_string(), "Model/ob time mismatch 10 vs 20");

        let err = SqgError::FixedNetworkSpacing { n: 64, nskip: 3 };
        assert!(err.to_string().contains("64"));
        assert!(err.to_string().contains('3'));
    }
}
