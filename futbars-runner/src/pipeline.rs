//! End-to-end run: enumerate → fetch every contract → merge → summarize.

use crate::download::{fetch_contracts, FetchProgress, FetchSummary};
use crate::enumerate::{enumerate_contracts, Enumeration};
use crate::fetcher::{FetchError, FetchSettings};
use crate::merge::{merge_contract_files, write_merged, MergeError, MergeOutcome, MergedDataset};
use chrono::NaiveDateTime;
use futbars_core::config::FetchConfig;
use futbars_core::data::{
    ApiError, CheckpointError, CheckpointStore, ContractFileWriter, MarketDataApi, WriterError,
};
use futbars_core::domain::is_contract_of;
use futbars_core::pacing::Sleeper;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("contract discovery failed: {0}")]
    Discovery(#[source] ApiError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// Everything a full run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub enumeration: Enumeration,
    pub fetch: FetchSummary,
    pub merged: MergedDataset,
    /// `None` when no contract file held data.
    pub output: Option<MergeOutcome>,
}

/// Run the whole download for `config.symbol`.
///
/// `now` is broker-local time; it fixes the lookback boundary and stamps the
/// output file name. Contracts that fail are reported in the fetch summary and
/// their partial files still take part in the merge.
pub fn run_pipeline(
    api: &dyn MarketDataApi,
    config: &FetchConfig,
    now: NaiveDateTime,
    sleeper: &dyn Sleeper,
    progress: &dyn FetchProgress,
) -> Result<PipelineOutcome, PipelineError> {
    let enumeration = enumerate_contracts(api, &config.template(), now, config.lookback_days)
        .map_err(PipelineError::Discovery)?;
    progress.on_discovered(&enumeration);

    let mut checkpoints = CheckpointStore::load(config.checkpoint_path())?;
    let writer = ContractFileWriter::new(&config.work_dir);

    let fetch = fetch_contracts(
        api,
        &mut checkpoints,
        &writer,
        sleeper,
        FetchSettings::from(config),
        now,
        &enumeration.contracts,
        progress,
    )?;

    let (merged, output) = merge_and_write(&writer, &enumeration.contract_ids(), config, now)?;
    Ok(PipelineOutcome {
        enumeration,
        fetch,
        merged,
        output,
    })
}

/// Merge the `config.symbol` contract files already in `config.work_dir`.
///
/// Files of other underlyings sharing the directory are left out.
pub fn merge_work_dir(
    config: &FetchConfig,
    now: NaiveDateTime,
) -> Result<(MergedDataset, Option<MergeOutcome>), PipelineError> {
    let writer = ContractFileWriter::new(&config.work_dir);
    let (ids, others): (Vec<String>, Vec<String>) = writer
        .discover()?
        .into_iter()
        .partition(|id| is_contract_of(id, &config.symbol));
    if !others.is_empty() {
        debug!(symbol = %config.symbol, skipped = ?others, "ignoring other contract files");
    }
    info!(dir = %writer.dir().display(), files = ids.len(), "merging contract files");
    merge_and_write(&writer, &ids, config, now)
}

fn merge_and_write(
    writer: &ContractFileWriter,
    ids: &[String],
    config: &FetchConfig,
    now: NaiveDateTime,
) -> Result<(MergedDataset, Option<MergeOutcome>), PipelineError> {
    let merged = merge_contract_files(writer, ids);
    match write_merged(
        &merged,
        &config.output_dir,
        &config.symbol,
        config.bar_size,
        now,
        config.write_parquet,
    ) {
        Ok(outcome) => Ok((merged, Some(outcome))),
        Err(MergeError::NoData) => {
            warn!("no contract data to merge, nothing written");
            Ok((merged, None))
        }
        Err(e) => Err(e.into()),
    }
}
