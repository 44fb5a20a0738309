use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hrvx_lib::analysis::window::WindowConfig;
use hrvx_lib::batch::{discover_cases, BatchOptions, BatchRunner, DiscoveredCase};
use hrvx_lib::cache::CaseCache;
use hrvx_lib::case::{AnalysisMode, AnalysisWindows, ProcessOptions};
use hrvx_lib::detectors::peaks::PeakConfig;
use hrvx_lib::io::wfdb::WfdbSource;
use hrvx_lib::table::{build_table, write_table};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "hrvx",
    version,
    about = "Batch HRV feature extraction over pathology cases"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Linear,
    Nonlinear,
    Full,
}

impl From<ModeArg> for AnalysisMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Linear => AnalysisMode::Linear,
            ModeArg::Nonlinear => AnalysisMode::Nonlinear,
            ModeArg::Full => AnalysisMode::Full,
        }
    }
}

#[derive(Args)]
struct BatchArgs {
    /// Data root holding <pathology>_<case> directories
    #[arg(long, default_value = "Data")]
    data_dir: PathBuf,
    /// Which feature batteries run
    #[arg(long, default_value = "full")]
    mode: ModeArg,
    /// Minimum segment length, in samples
    #[arg(long, default_value_t = 1000)]
    sig_thresh: u64,
    /// Worker pool size; defaults to the available parallelism
    #[arg(long)]
    workers: Option<usize>,
    /// Per-case processing deadline, in seconds
    #[arg(long, default_value_t = 1800)]
    timeout_secs: u64,
    #[arg(long, default_value_t = 1024)]
    linear_window: usize,
    #[arg(long, default_value_t = 0.95)]
    linear_overlap: f64,
    #[arg(long, default_value_t = 2048)]
    nonlinear_window: usize,
    #[arg(long, default_value_t = 0.95)]
    nonlinear_overlap: f64,
}

impl BatchArgs {
    fn options(&self) -> Result<BatchOptions> {
        let process = ProcessOptions {
            mode: self.mode.into(),
            windows: AnalysisWindows {
                linear: WindowConfig::new(self.linear_window, self.linear_overlap)
                    .context("invalid linear window geometry")?,
                nonlinear: WindowConfig::new(self.nonlinear_window, self.nonlinear_overlap)
                    .context("invalid nonlinear window geometry")?,
            },
            peaks: PeakConfig::default(),
        };
        let mut opts = BatchOptions::new(process);
        opts.sig_thresh = self.sig_thresh;
        if let Some(workers) = self.workers {
            opts.workers = workers;
        }
        opts.case_timeout = Duration::from_secs(self.timeout_secs);
        Ok(opts)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Process cases under the data root into the per-case cache
    Cache {
        #[command(flatten)]
        batch: BatchArgs,
        /// Cache directory for processed cases
        #[arg(long, default_value = "Pickled")]
        cache_dir: PathBuf,
        /// Process at most this many cases
        #[arg(long)]
        limit: Option<usize>,
        /// Only cases whose pathology label starts with this prefix
        #[arg(long)]
        pathology: Option<String>,
    },
    /// Aggregate every cached case into the CSV feature table
    Table {
        #[arg(long, default_value = "Pickled")]
        cache_dir: PathBuf,
        /// Output CSV path
        #[arg(long, default_value = "complete_data.csv")]
        out: PathBuf,
    },
    /// Trial batch: a few cases per pathology into a scratch cache
    TestRun {
        #[command(flatten)]
        batch: BatchArgs,
        /// Cases per pathology label
        #[arg(long, default_value_t = 1)]
        per_pathology: usize,
        /// Scratch cache directory; defaults to test_<nonlinear-window>ws
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Cache { batch, cache_dir, limit, pathology } => {
            cmd_cache(&batch, &cache_dir, limit, pathology.as_deref())?
        }
        Commands::Table { cache_dir, out } => cmd_table(&cache_dir, &out)?,
        Commands::TestRun { batch, per_pathology, cache_dir } => {
            cmd_test_run(&batch, per_pathology, cache_dir)?
        }
    }
    Ok(())
}

fn cmd_cache(
    batch: &BatchArgs,
    cache_dir: &Path,
    limit: Option<usize>,
    pathology: Option<&str>,
) -> Result<()> {
    let opts = batch.options()?;
    let cases = discover_cases(&batch.data_dir, pathology, limit)
        .with_context(|| format!("discovering cases under {}", batch.data_dir.display()))?;
    let cache = CaseCache::open(cache_dir)
        .with_context(|| format!("opening cache at {}", cache_dir.display()))?;
    let dirs: Vec<PathBuf> = cases.iter().map(|c| c.dir.clone()).collect();
    let runner = BatchRunner::new(WfdbSource, cache, opts);
    let summary = runner.run(&dirs);
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_table(cache_dir: &Path, out: &Path) -> Result<()> {
    let cache = CaseCache::open(cache_dir)
        .with_context(|| format!("opening cache at {}", cache_dir.display()))?;
    let cases = cache.load_all()?;
    let rows = build_table(&cases);
    write_table(out, &rows).with_context(|| format!("writing table to {}", out.display()))?;
    println!("wrote {} rows to {}", rows.len(), out.display());
    Ok(())
}

fn cmd_test_run(batch: &BatchArgs, per_pathology: usize, cache_dir: Option<PathBuf>) -> Result<()> {
    let opts = batch.options()?;
    let all = discover_cases(&batch.data_dir, None, None)
        .with_context(|| format!("discovering cases under {}", batch.data_dir.display()))?;
    let sample = sample_per_pathology(&all, per_pathology);
    let cache_dir = cache_dir
        .unwrap_or_else(|| PathBuf::from(format!("test_{}ws", batch.nonlinear_window)));
    let cache = CaseCache::open(&cache_dir)
        .with_context(|| format!("opening cache at {}", cache_dir.display()))?;
    let runner = BatchRunner::new(WfdbSource, cache.clone(), opts);
    let summary = runner.run(&sample);
    println!("{}", serde_json::to_string(&summary)?);

    let cases = cache.load_all()?;
    let rows = build_table(&cases);
    let out = cache_dir.join("complete_data.csv");
    write_table(&out, &rows).with_context(|| format!("writing table to {}", out.display()))?;
    println!("wrote {} rows to {}", rows.len(), out.display());
    Ok(())
}

/// First `n` cases of each pathology label, in discovery order.
fn sample_per_pathology(cases: &[DiscoveredCase], n: usize) -> Vec<PathBuf> {
    let mut current: Option<&str> = None;
    let mut taken = 0;
    let mut dirs = Vec::new();
    for case in cases {
        if current != Some(case.pathology.as_str()) {
            current = Some(case.pathology.as_str());
            taken = 0;
        }
        if taken < n {
            dirs.push(case.dir.clone());
            taken += 1;
        }
    }
    dirs
}
