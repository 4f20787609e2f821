//! Cycling assimilation experiments
//!
//! [`CycleDriver`] ties the model ensemble, the observation network, the
//! analysis and inflation together. Inputs come from [`archive`] sources,
//! which a [`nature::NatureRun`] can fill with model-generated states.

pub mod archive;
mod config;
mod diagnostics;
mod driver;
pub mod nature;

pub use archive::{
    ArchiveMetadata, ClimatologySource, CycleRecord, CycleRecorder, JsonLinesRecorder,
    MemoryArchive, MemoryRecorder, NullRecorder, ReportWriter, StoredCycle, TruthSource,
    REPORT_HEADER,
};
pub use config::{ExperimentConfig, ForcingConfig, PatternConfig};
pub use diagnostics::{
    innovation_stats, rms_error_spread, CycleDiagnostics, InnovationStats, KineticEnergySpectra,
    SpectraAccumulator,
};
pub use driver::{CycleDriver, RunSummary};
pub use nature::{NatureArchives, NatureRun, NatureRunConfig};
