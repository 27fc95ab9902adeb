//! futbars CLI — download, merge, and checkpoint management commands.
//!
//! Commands:
//! - `fetch` — enumerate contracts, walk each one back through history, merge
//! - `merge` — merge the contract files already in the work directory
//! - `status` — report checkpoints and contract files
//! - `reset` — drop a contract's checkpoint so it is fetched from scratch

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futbars_core::data::{CheckpointStore, ContractFileWriter, GatewayClient, MarketDataApi};
use futbars_core::domain::{format_cursor, Contract};
use futbars_core::pacing::ThreadSleeper;
use futbars_core::FetchConfig;
use futbars_runner::{
    lookback_boundary, merge_work_dir, run_pipeline, ContractReport, DatasetSummary,
    Enumeration, FetchProgress, FetchState, FetchSummary, MergeOutcome, MergedDataset,
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "futbars",
    about = "futbars — resumable one-minute futures bar downloader"
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Underlying symbol (e.g. MES).
    #[arg(long)]
    symbol: Option<String>,

    /// Directory holding the checkpoint file and contract files.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Directory for the combined output.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every contract in the lookback window, then merge.
    Fetch {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Merge the contract files in the work directory without fetching.
    Merge {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Show checkpoints and contract files.
    Status {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Drop a contract's checkpoint so the next fetch starts over.
    Reset {
        /// Contract id (local symbol, e.g. MESZ4).
        contract: String,

        /// Also delete the contract's file.
        #[arg(long, default_value_t = false)]
        delete_file: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Fetch { config } => run_fetch(&load_config(&config)?),
        Commands::Merge { config } => run_merge(&load_config(&config)?),
        Commands::Status { config } => run_status(&load_config(&config)?),
        Commands::Reset {
            contract,
            delete_file,
            config,
        } => run_reset(&load_config(&config)?, &contract, delete_file),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(args: &ConfigArgs) -> Result<FetchConfig> {
    let mut config = match &args.config {
        Some(path) => FetchConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FetchConfig::default(),
    };

    if let Some(symbol) = &args.symbol {
        config.symbol = symbol.to_uppercase();
    }
    if let Some(dir) = &args.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run_fetch(config: &FetchConfig) -> Result<()> {
    info!(
        gateway = %config.base_url(),
        client_id = config.client_id,
        symbol = %config.symbol,
        "connecting"
    );
    let gateway = GatewayClient::connect(config)
        .with_context(|| format!("cannot connect to the gateway at {}", config.base_url()))?;

    let now = config.broker_now();
    let result = run_pipeline(&gateway, config, now, &ThreadSleeper, &StdoutProgress);
    gateway.disconnect();
    let outcome = result.context("download failed")?;

    print_fetch_summary(&outcome.fetch);
    print_merge_report(&outcome.merged, outcome.output.as_ref());

    if !outcome.fetch.all_succeeded() {
        bail!(
            "{} contract(s) failed; rerun to resume: {}",
            outcome.fetch.failed,
            outcome.fetch.failed_contracts().join(", ")
        );
    }
    Ok(())
}

fn run_merge(config: &FetchConfig) -> Result<()> {
    let (merged, output) =
        merge_work_dir(config, config.broker_now()).context("merge failed")?;
    print_merge_report(&merged, output.as_ref());
    Ok(())
}

fn run_status(config: &FetchConfig) -> Result<()> {
    let store = CheckpointStore::load(config.checkpoint_path())
        .context("failed to read checkpoint file")?;
    let writer = ContractFileWriter::new(&config.work_dir);
    let files = writer.discover().context("failed to list contract files")?;
    let boundary = lookback_boundary(config.broker_now(), config.lookback_days);

    let mut ids: Vec<String> = store.entries().map(|(id, _)| id.to_string()).collect();
    ids.extend(files.iter().cloned());
    ids.sort();
    ids.dedup();

    println!("Checkpoints: {}", store.path().display());
    println!("Work dir:    {}", writer.dir().display());
    println!("Boundary:    {}", format_cursor(boundary));
    println!();

    if ids.is_empty() {
        println!("No checkpoints or contract files yet.");
        return Ok(());
    }

    println!(
        "{:<10} {:<19} {:<10} {:>10}",
        "Contract", "Cursor", "State", "File"
    );
    println!("{}", "-".repeat(52));
    for id in &ids {
        let cursor = store.get(id);
        let state = match cursor {
            Some(c) if c <= boundary => "exhausted",
            Some(_) => "partial",
            None => "not started",
        };
        let size = std::fs::metadata(writer.path_for(id))
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "-".into());
        println!(
            "{:<10} {:<19} {:<10} {:>10}",
            id,
            cursor.map(format_cursor).unwrap_or_else(|| "-".into()),
            state,
            size
        );
    }
    Ok(())
}

fn run_reset(config: &FetchConfig, contract: &str, delete_file: bool) -> Result<()> {
    let mut store = CheckpointStore::load(config.checkpoint_path())
        .context("failed to read checkpoint file")?;
    if store.remove(contract)? {
        println!("Removed checkpoint for {contract}.");
    } else {
        println!("No checkpoint for {contract}.");
    }

    if delete_file {
        let path = ContractFileWriter::new(&config.work_dir).path_for(contract);
        match std::fs::remove_file(&path) {
            Ok(()) => println!("Deleted {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("No file at {}", path.display())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to delete {}", path.display()))
            }
        }
    }
    Ok(())
}

/// Prints discovery and per-contract progress to stdout.
struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_discovered(&self, enumeration: &Enumeration) {
        println!();
        println!("=== Contracts ({}) ===", enumeration.contracts.len());
        for c in &enumeration.contracts {
            print_contract(c);
        }
        if !enumeration.excluded.is_empty() {
            debug!(count = enumeration.excluded.len(), "contracts before lookback window");
        }
        for (con_id, err) in &enumeration.unparseable {
            println!("  skipped conid {con_id}: {err}");
        }
        println!();
    }

    fn on_start(&self, contract: &Contract, index: usize, total: usize) {
        println!("[{}/{}] Fetching {}...", index + 1, total, contract.id());
    }

    fn on_complete(&self, report: &ContractReport, _index: usize, _total: usize) {
        match &report.state {
            FetchState::Failed { error } => {
                println!("  {} failed after {} request(s): {error}", report.contract, report.requests)
            }
            FetchState::Done(reason) => println!(
                "  {} done ({reason:?}): {} bars in {} page(s)",
                report.contract, report.bars_written, report.pages
            ),
            _ => {}
        }
    }

    fn on_batch_complete(&self, summary: &FetchSummary) {
        println!(
            "\nFetched {}/{} contract(s), {} failed.",
            summary.done, summary.total, summary.failed
        );
    }
}

fn print_contract(c: &Contract) {
    println!(
        "  {:<8} conid {:<12} expiry {}  {}/{}",
        c.local_symbol, c.con_id, c.expiry, c.exchange, c.currency
    );
}

fn print_fetch_summary(summary: &FetchSummary) {
    println!();
    println!("=== Fetch ===");
    println!(
        "{:<10} {:<16} {:>6} {:>9} {:<19} {:<19}",
        "Contract", "Result", "Pages", "Bars", "From", "To"
    );
    println!("{}", "-".repeat(84));
    for r in &summary.reports {
        let result = match &r.state {
            FetchState::Done(reason) => format!("{reason:?}"),
            FetchState::Failed { .. } => "FAILED".to_string(),
            other => format!("{other:?}"),
        };
        println!(
            "{:<10} {:<16} {:>6} {:>9} {:<19} {:<19}",
            r.contract,
            result,
            r.pages,
            r.bars_written,
            r.earliest.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            r.latest.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
}

fn print_merge_report(merged: &MergedDataset, output: Option<&MergeOutcome>) {
    println!();
    println!("=== Merge ===");
    for (id, rows) in &merged.included {
        println!("  loaded {id}: {rows} rows");
    }
    for (id, reason) in &merged.excluded {
        println!("  excluded {id}: {reason:?}");
    }
    if merged.malformed_dropped > 0 {
        println!("  skipped {} malformed row(s)", merged.malformed_dropped);
    }
    if merged.duplicates_dropped > 0 {
        println!("  dropped {} duplicate row(s)", merged.duplicates_dropped);
    }

    let Some(output) = output else {
        println!();
        println!("No data was fetched; nothing written.");
        return;
    };

    print_dataset_summary(&output.manifest.summary);
    println!();
    println!("Saved:    {}", output.csv_path.display());
    println!("Manifest: {}", output.manifest_path.display());
    if let Some(path) = &output.parquet_path {
        println!("Parquet:  {}", path.display());
    }
    println!("BLAKE3:   {}", output.manifest.blake3);
}

fn print_dataset_summary(summary: &DatasetSummary) {
    println!();
    println!("--- Data quality ---");
    println!("Rows:           {}", summary.rows);
    match (summary.first, summary.last) {
        (Some(first), Some(last)) => println!("Range:          {first} to {last}"),
        _ => println!("Range:          -"),
    }
    match (summary.coverage, summary.missing_percent()) {
        (Some(coverage), Some(missing)) => {
            println!("Coverage:       {coverage:.4} rows/minute");
            println!("Missing rate:   {missing:.2}%");
        }
        _ => println!("Coverage:       n/a (zero-length range)"),
    }
    println!("Contracts:      {}", summary.contracts.join(", "));
    println!();
    println!(
        "{:<9} {:>9} {:>14} {:>14} {:>14} {:>14}",
        "Column", "Count", "Mean", "Std", "Min", "Max"
    );
    println!("{}", "-".repeat(79));
    for col in &summary.columns {
        println!(
            "{:<9} {:>9} {:>14} {:>14} {:>14} {:>14}",
            col.name,
            col.count,
            fmt_stat(col.mean),
            fmt_stat(col.std),
            fmt_stat(col.min),
            fmt_stat(col.max),
        );
    }
}

fn fmt_stat(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "-".into())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
