//! snapfactor CLI
//!
//! # Usage
//!
//! ```bash
//! # Build sample tables and factor statistics
//! snapfactor study --config config/research.toml
//!
//! # List runs and the ones still waiting for an exit capture
//! snapfactor runs
//!
//! # Verify every capture of a run against its sidecars and manifest
//! snapfactor verify --run NVDA_20250110_143000
//!
//! # Recompute one run's covered call, allowing a nearest-strike exit
//! snapfactor recompute --run NVDA_20250110_143000 --relax-strike
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use snapfactor::data::{list_pending_exits, ManifestOrigin, SnapshotStore};
use snapfactor::recompute::recompute_paired;
use snapfactor::{
    ReportWriter, ResearchConfig, SampleTableBuilder, StatisticalInferenceEngine,
    SubstitutionPolicy,
};

const SEPARATOR: &str = "============================================================";
const PAIRED_CHECK_FILE: &str = "paired_check.csv";

#[derive(Parser)]
#[command(name = "snapfactor")]
#[command(about = "Option snapshot store and IV factor study")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot store root (overrides the config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the sample tables and statistics tables
    Study {
        /// Output directory (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List run manifests and pending exits
    Runs,

    /// Verify every capture recorded in a manifest
    Verify {
        /// Run id; the legacy manifest when omitted
        #[arg(long)]
        run: Option<String>,
    },

    /// Recompute a paired covered call from stored captures
    Recompute {
        /// Run id; the legacy manifest when omitted
        #[arg(long)]
        run: Option<String>,

        /// Allow a nearest-strike substitute at exit
        #[arg(long)]
        relax_strike: bool,

        /// Output directory (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Result<ResearchConfig> {
    let mut config = match &cli.config {
        Some(path) => ResearchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ResearchConfig::default(),
    };
    if let Some(root) = &cli.store {
        config.store.root = root.clone();
    }
    Ok(config)
}

fn cmd_study(config: &ResearchConfig, output: Option<PathBuf>) -> Result<()> {
    let store = SnapshotStore::new(&config.store.root);
    let table = SampleTableBuilder::new(&store, config.sample.clone())
        .build()
        .context("Failed to build sample table")?;

    let engine = StatisticalInferenceEngine::new(config.stats.clone(), config.signal.clone());
    let writer = ReportWriter::new(output.unwrap_or_else(|| config.output_dir.clone()));
    let outputs = writer
        .write_study(&table, &engine)
        .context("Failed to write study outputs")?;

    let coverage = &table.coverage;
    println!("{}", SEPARATOR);
    println!("Sample table:           {}", outputs.sample_table.display());
    println!("Tradable sample table:  {}", outputs.sample_table_tradable.display());
    println!("Stats (tradable, main): {}", outputs.stats_table_tradable.display());
    println!("Stats (full, appendix): {}", outputs.stats_table_full.display());
    println!("Coverage:               {}", outputs.coverage.display());
    println!(
        "Rows: {} (tradable: {})  Runs: {}/{} used  Partitions skipped: {}",
        outputs.rows,
        outputs.rows_tradable,
        coverage.runs_used,
        coverage.runs_seen,
        coverage.partitions_skipped()
    );
    println!("{}", SEPARATOR);
    Ok(())
}

fn cmd_runs(config: &ResearchConfig) -> Result<()> {
    let store = SnapshotStore::new(&config.store.root);
    let manifests = store.list_run_manifests().context("Failed to list runs")?;
    let pending = list_pending_exits(&store).context("Failed to list pending exits")?;

    println!("Runs in {}:", store.runs_dir().display());
    for run_id in manifests.keys() {
        let marker = if pending.contains(run_id) { "  (exit pending)" } else { "" };
        println!("  {}{}", run_id, marker);
    }
    if store.manifest_path(None).exists() {
        println!("  legacy manifest at {}", store.manifest_path(None).display());
    }
    println!("{} runs, {} pending exit", manifests.len(), pending.len());
    Ok(())
}

fn cmd_verify(config: &ResearchConfig, run: Option<String>) -> Result<()> {
    let store = SnapshotStore::new(&config.store.root);
    let (path, origin) = match &run {
        Some(id) => (store.manifest_path(Some(id)), ManifestOrigin::RunDirectory),
        None => (store.manifest_path(None), ManifestOrigin::Legacy),
    };
    let manifest = store
        .load_verified_manifest(&path, origin, run.as_deref())
        .with_context(|| format!("Manifest {} failed verification", path.display()))?;

    let mut failures = 0;
    let refs = manifest
        .snapshots
        .entry
        .iter()
        .map(|r| ("entry", r))
        .chain(manifest.snapshots.exit.iter().map(|r| ("exit", r)));
    for (side, capture_ref) in refs {
        let capture_path = store.capture_path_for(&manifest, &capture_ref.filename);
        match store.load_verified_capture(&capture_path, Some(&capture_ref.checksum)) {
            Ok(capture) => println!(
                "  OK    {:<5} {} ({} rows)",
                side,
                capture_ref.filename,
                capture.len()
            ),
            Err(e) => {
                failures += 1;
                warn!("{} capture {} failed: {}", side, capture_ref.filename, e);
                println!("  FAIL  {:<5} {}: {}", side, capture_ref.filename, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} capture(s) of run {} failed verification", failures, manifest.run_id);
    }
    info!("Run {} verified", manifest.run_id);
    Ok(())
}

fn cmd_recompute(
    config: &ResearchConfig,
    run: Option<String>,
    relax_strike: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let store = SnapshotStore::new(&config.store.root);
    let policy = if relax_strike {
        SubstitutionPolicy::NearestStrike
    } else {
        SubstitutionPolicy::Strict
    };
    let row = recompute_paired(&store, run.as_deref(), policy);

    let writer = ReportWriter::new(output.unwrap_or_else(|| config.output_dir.clone()));
    let path = writer
        .write_csv(PAIRED_CHECK_FILE, std::slice::from_ref(&row))
        .context("Failed to write paired check")?;

    println!("{}", SEPARATOR);
    println!("Status: {:?}", row.match_status);
    if row.is_ok() {
        println!(
            "Stock P&L: {}  Option P&L: {}  Total: {}",
            row.stock_pnl.unwrap_or_default(),
            row.option_pnl.unwrap_or_default(),
            row.total_pnl.unwrap_or_default()
        );
    } else {
        println!("Reason: {}", row.failure_reason);
    }
    println!("Output: {}", path.display());
    println!("{}", SEPARATOR);

    if !row.is_ok() {
        bail!("Recompute failed: {}", row.failure_reason);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("snapfactor=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Study { output } => cmd_study(&config, output)?,
        Commands::Runs => cmd_runs(&config)?,
        Commands::Verify { run } => cmd_verify(&config, run)?,
        Commands::Recompute {
            run,
            relax_strike,
            output,
        } => cmd_recompute(&config, run, relax_strike, output)?,
    }

    Ok(())
}
