//! Surface quasi-geostrophic turbulence model
//!
//! `SqgModel` integrates boundary PV on a doubly periodic grid. Stochastic
//! wind perturbations plug in through [`Forcing`]; the eigenvector random
//! pattern is one [`RandomPattern`] implementation.

mod forcing;
mod operators;
mod params;
mod pattern;
mod sqg;
mod state;

pub use forcing::{
    shift_periodic, Forcing, PatternForcing, PatternNorm, RandomPattern, ShiftPerturbation,
    ShiftPerturbationConfig,
};
pub use operators::{SpectralOperators, WindField};
pub use params::{ModelParameters, EKMAN_THRESHOLD};
pub use pattern::{CovarianceModel, EigenRandomPattern, PatternBasis};
pub use sqg::{equilibrium_pv, SqgModel};
pub use state::{PvField, PvState};
