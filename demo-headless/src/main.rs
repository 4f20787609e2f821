use clap::{Parser, ValueEnum};
use sqg_enkf_core::cycle::{
    ArchiveMetadata, CycleRecorder, JsonLinesRecorder, MemoryArchive, NatureRun, NatureRunConfig,
    NullRecorder, ReportWriter,
};
use sqg_enkf_core::{
    ClimatologySource, CycleDriver, ExperimentConfig, ObservedLevels, SqgError, UpdateStrategy,
};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SQG turbulence ensemble data assimilation experiment
#[derive(Parser, Debug)]
#[command(name = "sqg-enkf")]
#[command(about = "Cycle an ensemble Kalman filter with a two-surface SQG model", long_about = None)]
struct Args {
    /// Experiment settings (JSON); flags below override individual fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Nature run settings (JSON), used when no archives are given
    #[arg(long)]
    nature_config: Option<PathBuf>,

    /// Climatology archive (JSON) to draw the initial ensemble from
    #[arg(long, requires = "truth")]
    climatology: Option<PathBuf>,

    /// Truth archive (JSON) to draw observations from
    #[arg(long, requires = "climatology")]
    truth: Option<PathBuf>,

    /// Save generated climatology and truth as `<prefix>_climo.json` and `<prefix>_truth.json`
    #[arg(long)]
    save_nature: Option<String>,

    /// Write every analysed cycle as JSON lines
    #[arg(long)]
    records: Option<PathBuf>,

    /// Grid points of a generated nature run
    #[arg(short, long)]
    n: Option<usize>,

    /// Horizontal localization length scale in km
    #[arg(long)]
    hcovlocal: Option<f64>,

    /// Cross-boundary localization factor (negative derives it from the Rossby radius)
    #[arg(long, allow_hyphen_values = true)]
    vcovlocal: Option<f64>,

    /// RTPS coefficient, or Hodyss–Campbell posterior-variance weight
    #[arg(long)]
    covinflate1: Option<f64>,

    /// Hodyss–Campbell increment weight; negative selects RTPS
    #[arg(long, allow_hyphen_values = true)]
    covinflate2: Option<f64>,

    /// Ensemble members
    #[arg(long)]
    nanals: Option<usize>,

    /// Assimilation cycles
    #[arg(long)]
    nassim: Option<usize>,

    /// Cycles excluded from the forecast spectra
    #[arg(long)]
    nassim_spinup: Option<usize>,

    /// Random observations per level, or -nskip for a fixed network
    #[arg(long, allow_hyphen_values = true)]
    nobs: Option<i64>,

    /// Observation error standard deviation in K
    #[arg(long)]
    oberrstdev: Option<f64>,

    /// Observed boundaries
    #[arg(long, value_enum)]
    levob: Option<Levels>,

    /// Use the LETKF instead of the serial square-root filter
    #[arg(long)]
    letkf: bool,

    /// Replace analyses by noisy truth when the whole grid is observed
    #[arg(long)]
    direct_insertion: bool,

    /// Run seed
    #[arg(long)]
    seed: Option<u64>,

    /// FFT worker threads per member (0 shares the global pool)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Levels {
    Lower,
    Upper,
    Both,
}

impl From<Levels> for ObservedLevels {
    fn from(levels: Levels) -> Self {
        match levels {
            Levels::Lower => Self::Lower,
            Levels::Upper => Self::Upper,
            Levels::Both => Self::Both,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SqgError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SqgError::InvalidConfig(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| SqgError::InvalidConfig(format!("{}: {e}", path.display())))
}

fn experiment_config(args: &Args) -> Result<ExperimentConfig, SqgError> {
    let mut config: ExperimentConfig = match &args.config {
        Some(path) => read_json(path)?,
        None => ExperimentConfig {
            nanals: 20,
            nobs: 256,
            nassim: 100,
            nassim_spinup: 20,
            ..ExperimentConfig::default()
        },
    };
    if let Some(km) = args.hcovlocal {
        config.hcovlocal = km * 1000.0;
    }
    if let Some(v) = args.vcovlocal {
        config.vcovlocal = v;
    }
    if let Some(c1) = args.covinflate1 {
        config.inflation.covinflate1 = c1;
    }
    if let Some(c2) = args.covinflate2 {
        config.inflation.covinflate2 = c2;
    }
    if let Some(nanals) = args.nanals {
        config.nanals = nanals;
    }
    if let Some(nassim) = args.nassim {
        config.nassim = nassim;
    }
    if let Some(spinup) = args.nassim_spinup {
        config.nassim_spinup = spinup;
    }
    if let Some(nobs) = args.nobs {
        config.nobs = nobs;
    }
    if let Some(oberrstdev) = args.oberrstdev {
        config.oberrstdev = oberrstdev;
    }
    if let Some(levob) = args.levob {
        config.levob = levob.into();
    }
    if args.letkf {
        config.update = UpdateStrategy::Letkf;
    }
    if args.direct_insertion {
        config.direct_insertion = true;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    config.validate()?;
    Ok(config)
}

/// Load the archives, or generate them with a nature run long enough for
/// the experiment
fn archives(args: &Args, config: &ExperimentConfig) -> Result<(MemoryArchive, MemoryArchive), SqgError> {
    if let (Some(climo), Some(truth)) = (&args.climatology, &args.truth) {
        return Ok((MemoryArchive::load(climo)?, MemoryArchive::load(truth)?));
    }
    let mut nature: NatureRunConfig = match &args.nature_config {
        Some(path) => read_json(path)?,
        None => NatureRunConfig::default(),
    };
    if let Some(n) = args.n {
        nature.n = n;
    }
    nature.truth_len = nature.truth_len.max(config.nassim + 1);
    nature.climatology_len = nature.climatology_len.max(config.nanals);

    info!(n = nature.n, truth = nature.truth_len, "Generating nature run");
    let generated = NatureRun::new(nature)?.generate()?;
    if let Some(prefix) = &args.save_nature {
        generated.climatology.save(format!("{prefix}_climo.json"))?;
        generated.truth.save(format!("{prefix}_truth.json"))?;
    }
    Ok((generated.climatology, generated.truth))
}

fn describe(metadata: &ArchiveMetadata, config: &ExperimentConfig, driver: &CycleDriver<'_>) -> String {
    format!(
        "hcovlocal={} vcovlocal={:.4} diff_efold={:?} levob={:?} covinf1={} covinf2={} nanals={} nobs={} update={:?}",
        config.hcovlocal / 1000.0,
        driver.vertical_localization(),
        config.diff_efold.or(metadata.params.diff_efold),
        config.levob,
        config.inflation.covinflate1,
        config.inflation.covinflate2,
        config.nanals,
        driver.nobs(),
        config.update,
    )
}

fn run(args: &Args) -> Result<(), SqgError> {
    let config = experiment_config(args)?;
    let (climatology, truth) = archives(args, &config)?;

    let mut driver = CycleDriver::new(config.clone(), &climatology, &truth)?;
    let mut report = ReportWriter::new(io::stdout().lock());
    report.comment(&describe(climatology.metadata(), &config, &driver))?;
    if driver.uses_direct_insertion() {
        report.comment("direct insertion!")?;
    }
    report.header()?;

    let mut recorder: Box<dyn CycleRecorder> = match &args.records {
        Some(path) => {
            let file = File::create(path).map_err(|e| SqgError::Archive(e.to_string()))?;
            Box::new(JsonLinesRecorder::new(BufWriter::new(file)))
        }
        None => Box::new(NullRecorder),
    };
    while !driver.is_finished() {
        let diagnostics = driver.run_cycle(recorder.as_mut())?;
        report.line(&diagnostics)?;
    }

    if let Some(spectra) = driver.spectra() {
        report.comment(&format!(
            "mean error/spread {} {}",
            spectra.total_error, spectra.total_spread
        ))?;
        report.comment("k kespec_err kespec_sprd")?;
        for (k, (err, sprd)) in spectra.error.iter().zip(&spectra.spread).enumerate().skip(1) {
            report.comment(&format!("{k} {err:.6e} {sprd:.6e}"))?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sqg-enkf: {e}");
            ExitCode::FAILURE
        }
    }
}
