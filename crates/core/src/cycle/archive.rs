//! Inputs and outputs of a cycling experiment
//!
//! The driver reads initial members from a [`ClimatologySource`], draws
//! observations from a [`TruthSource`] and hands every analysed cycle to a
//! [`CycleRecorder`]. In-memory implementations are provided; a JSON-lines
//! recorder and a plain-text report writer cover the command-line driver.

use super::diagnostics::CycleDiagnostics;
use crate::analysis::EnsembleState;
use crate::error::SqgError;
use crate::model::{ModelParameters, PvField};
use crate::observation::ObservationSet;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Physical constants shared by a climatology or nature run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Model parameters the states were produced with
    pub params: ModelParameters,
    /// Reference potential temperature (K)
    pub theta0: f64,
    /// Gravitational acceleration (m/s²)
    pub g: f64,
}

impl ArchiveMetadata {
    /// Factor converting PV to temperature units, `f·θ0/g`
    pub fn scalefact(&self) -> f64 {
        self.params.f * self.theta0 / self.g
    }
}

/// Pool of model states the initial ensemble is drawn from
pub trait ClimatologySource {
    /// Constants and model parameters of the climatology
    fn metadata(&self) -> &ArchiveMetadata;

    /// Number of stored states
    fn len(&self) -> usize;

    /// Whether the climatology holds no states
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// State `index`
    ///
    /// # Errors
    ///
    /// `Archive` if the state cannot be read
    fn sample(&self, index: usize) -> Result<PvField, SqgError>;
}

/// Nature run observations are drawn from
pub trait TruthSource {
    /// Valid time of every stored state (s)
    fn times(&self) -> &[f64];

    /// State valid at `times()[index]`
    ///
    /// # Errors
    ///
    /// `Archive` if the state cannot be read
    fn state(&self, index: usize) -> Result<PvField, SqgError>;
}

/// Everything known about one analysed cycle
///
/// Fields are in PV units; multiply by `scalefact` for temperature.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord<'a> {
    /// Cycle index
    pub ntime: usize,
    /// Analysis time (s)
    pub time: f64,
    /// PV to temperature factor
    pub scalefact: f64,
    /// Verifying truth
    pub truth: &'a PvField,
    /// Background ensemble
    pub background: &'a EnsembleState,
    /// Posterior ensemble after inflation
    pub posterior: &'a EnsembleState,
    /// Assimilated observations and their locations
    pub observations: &'a ObservationSet,
    /// Inflation factor per state element
    pub inflation: &'a [f64],
}

/// Receiver of analysed cycles
pub trait CycleRecorder {
    /// Store one cycle
    ///
    /// # Errors
    ///
    /// `Archive` if the record cannot be written
    fn record(&mut self, record: &CycleRecord<'_>) -> Result<(), SqgError>;
}

/// Recorder that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl CycleRecorder for NullRecorder {
    fn record(&mut self, _record: &CycleRecord<'_>) -> Result<(), SqgError> {
        Ok(())
    }
}

/// Owned copy of a [`CycleRecord`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCycle {
    /// Cycle index
    pub ntime: usize,
    /// Analysis time (s)
    pub time: f64,
    /// Truth at the analysis time
    pub truth: PvField,
    /// Prior ensemble
    pub background: EnsembleState,
    /// Inflated posterior ensemble
    pub posterior: EnsembleState,
    /// Assimilated observations
    pub observations: ObservationSet,
    /// Inflation factor per state element
    pub inflation: Vec<f64>,
}

/// Recorder that keeps every cycle in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    /// Recorded cycles in order
    pub cycles: Vec<StoredCycle>,
}

impl CycleRecorder for MemoryRecorder {
    fn record(&mut self, record: &CycleRecord<'_>) -> Result<(), SqgError> {
        self.cycles.push(StoredCycle {
            ntime: record.ntime,
            time: record.time,
            truth: record.truth.clone(),
            background: record.background.clone(),
            posterior: record.posterior.clone(),
            observations: record.observations.clone(),
            inflation: record.inflation.to_vec(),
        });
        Ok(())
    }
}

/// Recorder writing one JSON document per cycle and line
pub struct JsonLinesRecorder<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesRecorder<W> {
    /// Record into `writer`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> CycleRecorder for JsonLinesRecorder<W> {
    fn record(&mut self, record: &CycleRecord<'_>) -> Result<(), SqgError> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| SqgError::Archive(e.to_string()))?;
        writeln!(self.writer).map_err(|e| SqgError::Archive(e.to_string()))
    }
}

/// States held in memory, usable as climatology and as truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryArchive {
    metadata: ArchiveMetadata,
    times: Vec<f64>,
    states: Vec<PvField>,
}

impl MemoryArchive {
    /// Wrap states valid at `times`
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if there is not one time per state or the states are
    /// not all on the same grid
    pub fn new(
        metadata: ArchiveMetadata,
        times: Vec<f64>,
        states: Vec<PvField>,
    ) -> Result<Self, SqgError> {
        if times.len() != states.len() {
            return Err(SqgError::ShapeMismatch {
                what: "archive times",
                expected: states.len(),
                found: times.len(),
            });
        }
        if let Some(first) = states.first() {
            if let Some(bad) = states.iter().find(|s| s.data.len() != first.data.len()) {
                return Err(SqgError::ShapeMismatch {
                    what: "archive state",
                    expected: first.data.len(),
                    found: bad.data.len(),
                });
            }
        }
        Ok(Self {
            metadata,
            times,
            states,
        })
    }

    /// Stored states in time order
    pub fn states(&self) -> &[PvField] {
        &self.states
    }

    /// Load an archive saved with [`MemoryArchive::save`]
    ///
    /// # Errors
    ///
    /// `Archive` if the file cannot be read or parsed
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, SqgError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| SqgError::Archive(e.to_string()))?;
        let archive: Self =
            serde_json::from_str(&contents).map_err(|e| SqgError::Archive(e.to_string()))?;
        Self::new(archive.metadata, archive.times, archive.states)
    }

    /// Save as JSON
    ///
    /// # Errors
    ///
    /// `Archive` if the archive cannot be serialized or written
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), SqgError> {
        let contents =
            serde_json::to_string(self).map_err(|e| SqgError::Archive(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| SqgError::Archive(e.to_string()))
    }

    fn get(&self, index: usize) -> Result<PvField, SqgError> {
        self.states.get(index).cloned().ok_or_else(|| {
            SqgError::Archive(format!(
                "state {index} requested from an archive of {}",
                self.states.len()
            ))
        })
    }
}

impl ClimatologySource for MemoryArchive {
    fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    fn len(&self) -> usize {
        self.states.len()
    }

    fn sample(&self, index: usize) -> Result<PvField, SqgError> {
        self.get(index)
    }
}

impl TruthSource for MemoryArchive {
    fn times(&self) -> &[f64] {
        &self.times
    }

    fn state(&self, index: usize) -> Result<PvField, SqgError> {
        self.get(index)
    }
}

/// Header of the per-cycle report
pub const REPORT_HEADER: &str = "# ntime,pverr_a,pvsprd_a,pverr_b,pvsprd_b,obinc_b,osprd_b,\
obinc_a,obsprd_a,omaomb/oberr,obbias_b,inflation";

/// Plain-text report, one line per cycle
pub struct ReportWriter<W: Write> {
    writer: W,
}

impl<W: Write> ReportWriter<W> {
    /// Report into `writer`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write the column header
    ///
    /// # Errors
    ///
    /// `Archive` on a write failure
    pub fn header(&mut self) -> Result<(), SqgError> {
        writeln!(self.writer, "{REPORT_HEADER}").map_err(|e| SqgError::Archive(e.to_string()))
    }

    /// Write a `#`-prefixed comment line
    ///
    /// # Errors
    ///
    /// `Archive` on a write failure
    pub fn comment(&mut self, text: &str) -> Result<(), SqgError> {
        writeln!(self.writer, "# {text}").map_err(|e| SqgError::Archive(e.to_string()))
    }

    /// Write one cycle
    ///
    /// # Errors
    ///
    /// `Archive` on a write failure
    pub fn line(&mut self, diagnostics: &CycleDiagnostics) -> Result<(), SqgError> {
        writeln!(self.writer, "{diagnostics}").map_err(|e| SqgError::Archive(e.to_string()))
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}
