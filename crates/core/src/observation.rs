//! Synthetic boundary observations
//!
//! Observations are point samples of the truth PV, scaled to temperature
//! units, at grid points chosen either at random each cycle or on a fixed
//! regular network. The same point operator maps ensemble states into
//! observation space.

use crate::analysis::{EnsembleState, ObservationEnsemble};
use crate::error::SqgError;
use crate::model::PvField;
use crate::rng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

/// Boundaries that carry observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedLevels {
    /// Lower boundary only
    Lower,
    /// Upper boundary only
    Upper,
    /// Both boundaries
    #[default]
    Both,
}

impl ObservedLevels {
    /// Boundary indices in ascending order
    pub fn levels(self) -> &'static [usize] {
        match self {
            Self::Lower => &[0],
            Self::Upper => &[1],
            Self::Both => &[0, 1],
        }
    }

    /// Parse a level list such as `[1, 0]`
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for empty lists or unknown levels
    pub fn from_levels(levels: &[usize]) -> Result<Self, SqgError> {
        let mut sorted = levels.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        match sorted.as_slice() {
            [0] => Ok(Self::Lower),
            [1] => Ok(Self::Upper),
            [0, 1] => Ok(Self::Both),
            _ => Err(SqgError::InvalidConfig(format!(
                "observed levels must be a subset of [0, 1], got {levels:?}"
            ))),
        }
    }
}

/// How observation locations are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    /// `nobs` points drawn without replacement every cycle
    Random {
        /// Observations per level
        nobs: usize,
    },
    /// Every `nskip`-th point in both directions
    Fixed {
        /// Spacing in grid points
        nskip: usize,
    },
}

impl NetworkKind {
    /// Positive counts give a random network, negative counts a fixed
    /// network observing every `-nobs` points
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for zero
    pub fn from_signed(nobs: i64) -> Result<Self, SqgError> {
        match nobs {
            0 => Err(SqgError::InvalidConfig("nobs must be non-zero".into())),
            n if n > 0 => Ok(Self::Random { nobs: n as usize }),
            n => Ok(Self::Fixed {
                nskip: n.unsigned_abs() as usize,
            }),
        }
    }
}

/// Observation locations on an `n × n` grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationNetwork {
    n: usize,
    kind: NetworkKind,
    nobs: usize,
}

impl ObservationNetwork {
    /// Validate the network against the grid
    ///
    /// # Errors
    ///
    /// `FixedNetworkSpacing` if the spacing does not divide the grid,
    /// `InvalidConfig` if a random network asks for more points than exist
    pub fn new(n: usize, kind: NetworkKind) -> Result<Self, SqgError> {
        let nobs = match kind {
            NetworkKind::Random { nobs } => {
                if nobs > n * n {
                    return Err(SqgError::InvalidConfig(format!(
                        "cannot draw {nobs} observations from {} grid points",
                        n * n
                    )));
                }
                nobs
            }
            NetworkKind::Fixed { nskip } => {
                if nskip == 0 || n % nskip != 0 {
                    return Err(SqgError::FixedNetworkSpacing { n, nskip });
                }
                (n / nskip).pow(2)
            }
        };
        Ok(Self { n, kind, nobs })
    }

    /// Network kind
    pub fn kind(&self) -> NetworkKind {
        self.kind
    }

    /// Observations per level
    pub fn nobs(&self) -> usize {
        self.nobs
    }

    /// Whether every grid point is observed every cycle
    pub fn covers_grid(&self) -> bool {
        self.nobs == self.n * self.n
    }

    /// Grid-point indices observed at cycle `ntime`
    ///
    /// A fixed network with spacing 2 is offset by one point on odd cycles
    /// so every point is observed over two cycles.
    pub fn indices(&self, ntime: usize, rng: &mut StdRng) -> Vec<usize> {
        let n = self.n;
        match self.kind {
            NetworkKind::Random { nobs } => index::sample(rng, n * n, nobs).into_vec(),
            NetworkKind::Fixed { nskip } => {
                let offset = usize::from(nskip == 2 && ntime % 2 == 1);
                let mut indices = Vec::with_capacity(self.nobs);
                for y in (offset..n).step_by(nskip) {
                    for x in (offset..n).step_by(nskip) {
                        indices.push(y * n + x);
                    }
                }
                indices
            }
        }
    }
}

/// Physical coordinates of grid point `index`
pub fn grid_coordinates(index: usize, n: usize, domain_size: f64) -> (f64, f64) {
    let dx = domain_size / n as f64;
    ((index % n) as f64 * dx, (index / n) as f64 * dx)
}

/// One cycle's observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    /// Observed grid-point indices
    pub indices: Vec<usize>,
    /// Boundary index of each observed level
    pub levob: Vec<usize>,
    /// Observed values, `[observed level][ob]`
    pub values: Vec<f64>,
    /// Error variance per location
    pub oberrvar: Vec<f64>,
    /// x coordinate per location (m)
    pub x: Vec<f64>,
    /// y coordinate per location (m)
    pub y: Vec<f64>,
}

impl ObservationSet {
    /// Sample the truth at `indices` and add Gaussian noise
    ///
    /// Noise is drawn level by level in network order.
    pub fn sample(
        truth: &PvField,
        indices: Vec<usize>,
        levels: ObservedLevels,
        scalefact: f64,
        oberrstdev: f64,
        domain_size: f64,
        rng: &mut StdRng,
    ) -> Self {
        let levob = levels.levels().to_vec();
        let mut values = Vec::with_capacity(levob.len() * indices.len());
        for &level in &levob {
            let field = truth.level(level);
            for &p in &indices {
                values.push(scalefact * field[p] + oberrstdev * rng::normal(rng));
            }
        }
        let (x, y) = indices
            .iter()
            .map(|&p| grid_coordinates(p, truth.n, domain_size))
            .unzip();
        Self {
            oberrvar: vec![oberrstdev * oberrstdev; indices.len()],
            indices,
            levob,
            values,
            x,
            y,
        }
    }

    /// Observations per level
    pub fn nobs(&self) -> usize {
        self.indices.len()
    }
}

/// Point-sampling observation operator in temperature units
pub fn forward_operator(
    ensemble: &EnsembleState,
    indices: &[usize],
    levob: &[usize],
    scalefact: f64,
) -> ObservationEnsemble {
    let nanals = ensemble.nanals();
    let mut data = Vec::with_capacity(nanals * levob.len() * indices.len());
    for m in 0..nanals {
        for &level in levob {
            for &p in indices {
                data.push(scalefact * ensemble.get(m, level, p));
            }
        }
    }
    ObservationEnsemble {
        nanals,
        nlevob: levob.len(),
        nobs: indices.len(),
        data,
    }
}

/// Replace the ensemble by noisy copies of the truth
///
/// Each member is the truth plus independent observation noise; the
/// ensemble is then recentred on the truth plus one further noise draw, so
/// the posterior mean carries the noise of a single realization.
pub fn direct_insertion(
    truth: &PvField,
    nanals: usize,
    oberrstdev: f64,
    scalefact: f64,
    rng: &mut StdRng,
) -> EnsembleState {
    let len = truth.data.len();
    let noise_scale = oberrstdev / scalefact;
    let mut data = Vec::with_capacity(nanals * len);
    for _ in 0..nanals {
        data.extend(
            truth
                .data
                .iter()
                .map(|&t| t + noise_scale * rng::normal(rng)),
        );
    }

    let mut mean = vec![0.0; len];
    for member in data.chunks(len) {
        for (acc, &x) in mean.iter_mut().zip(member) {
            *acc += x / nanals as f64;
        }
    }
    let center: Vec<f64> = truth
        .data
        .iter()
        .map(|&t| t + noise_scale * rng::normal(rng))
        .collect();
    for member in data.chunks_mut(len) {
        for ((x, &mu), &c) in member.iter_mut().zip(&mean).zip(&center) {
            *x = *x - mu + c;
        }
    }

    EnsembleState {
        nanals,
        npts: truth.points(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_signed_network_kind() {
        assert_eq!(
            NetworkKind::from_signed(100).unwrap(),
            NetworkKind::Random { nobs: 100 }
        );
        assert_eq!(
            NetworkKind::from_signed(-4).unwrap(),
            NetworkKind::Fixed { nskip: 4 }
        );
        assert!(NetworkKind::from_signed(0).is_err());
    }

    #[test]
    fn test_fixed_network_must_divide_grid() {
        assert_eq!(
            ObservationNetwork::new(16, NetworkKind::Fixed { nskip: 3 }).unwrap_err(),
            SqgError::FixedNetworkSpacing { n: 16, nskip: 3 }
        );
        let net = ObservationNetwork::new(16, NetworkKind::Fixed { nskip: 4 }).unwrap();
        assert_eq!(net.nobs(), 16);
        assert!(!net.covers_grid());
        assert!(ObservationNetwork::new(16, NetworkKind::Fixed { nskip: 1 })
            .unwrap()
            .covers_grid());
    }

    #[test]
    fn test_every_other_point_alternates() {
        let net = ObservationNetwork::new(4, NetworkKind::Fixed { nskip: 2 }).unwrap();
        let mut rng = rng::run_stream(0);
        assert_eq!(net.indices(0, &mut rng), vec![0, 2, 8, 10]);
        assert_eq!(net.indices(1, &mut rng), vec![5, 7, 13, 15]);
        assert_eq!(net.indices(2, &mut rng), vec![0, 2, 8, 10]);
    }

    #[test]
    fn test_random_network_draws_distinct_points() {
        let net = ObservationNetwork::new(8, NetworkKind::Random { nobs: 20 }).unwrap();
        let mut rng = rng::run_stream(5);
        let mut indices = net.indices(0, &mut rng);
        assert_eq!(indices.len(), 20);
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 20);
        assert!(indices.iter().all(|&p| p < 64));
        assert!(ObservationNetwork::new(8, NetworkKind::Random { nobs: 65 }).is_err());
    }

    #[test]
    fn test_noise_free_sample_and_forward_operator_agree() {
        let n = 4;
        let truth = PvField::from_fn(n, |level, x, y| (100 * level + 10 * y + x) as f64);
        let indices = vec![1, 6, 15];
        let mut rng = rng::run_stream(1);
        let obs =
            ObservationSet::sample(&truth, indices.clone(), ObservedLevels::Upper, 2.0, 0.0, 8.0, &mut rng);
        assert_eq!(obs.levob, vec![1]);
        assert_eq!(obs.values, vec![2.0 * 101.0, 2.0 * 112.0, 2.0 * 133.0]);
        assert_eq!((obs.x[1], obs.y[1]), (4.0, 2.0));

        let ens = EnsembleState::from_members(&[truth.clone(), truth]).unwrap();
        let hx = forward_operator(&ens, &indices, &obs.levob, 2.0);
        assert_eq!(hx.member(1), obs.values.as_slice());
    }

    #[test]
    fn test_observed_levels_parse() {
        assert_eq!(ObservedLevels::from_levels(&[1, 0]).unwrap(), ObservedLevels::Both);
        assert_eq!(ObservedLevels::from_levels(&[1]).unwrap(), ObservedLevels::Upper);
        assert!(ObservedLevels::from_levels(&[]).is_err());
        assert!(ObservedLevels::from_levels(&[2]).is_err());
    }

    #[test]
    fn test_direct_insertion_statistics() {
        let n = 16;
        let truth = PvField::from_fn(n, |level, x, y| (level + x + y) as f64);
        let mut rng = rng::run_stream(3);
        let ens = direct_insertion(&truth, 40, 1.0, 0.5, &mut rng);
        let mean = ens.mean();
        let var = ens.variance();
        let avg_var = var.iter().sum::<f64>() / var.len() as f64;
        // Noise std in PV units is 1/0.5 = 2
        assert_relative_eq!(avg_var, 4.0, max_relative = 0.05);
        let bias = mean.iter().zip(&truth.data).map(|(m, t)| m - t).sum::<f64>() / mean.len() as f64;
        assert!(bias.abs() < 0.4);
    }
}
