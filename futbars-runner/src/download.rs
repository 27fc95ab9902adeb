//! Batch fetch over every enumerated contract, with progress reporting.

use crate::enumerate::Enumeration;
use crate::fetcher::{ContractReport, FetchError, FetchSettings, FetchState, PaginatedFetcher};
use chrono::NaiveDateTime;
use futbars_core::data::{CheckpointStore, ContractFileWriter, MarketDataApi};
use futbars_core::domain::Contract;
use futbars_core::pacing::Sleeper;
use tracing::{info, warn};

/// Progress callback for batch fetches.
pub trait FetchProgress: Send {
    /// Called once contract discovery has finished.
    fn on_discovered(&self, _enumeration: &Enumeration) {}

    /// Called before a contract's first request.
    fn on_start(&self, contract: &Contract, index: usize, total: usize);

    /// Called when a contract reaches a terminal state.
    fn on_complete(&self, report: &ContractReport, index: usize, total: usize);

    /// Called when every contract has been processed.
    fn on_batch_complete(&self, summary: &FetchSummary);
}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_discovered(&self, enumeration: &Enumeration) {
        for c in &enumeration.contracts {
            info!(
                contract = c.id(),
                con_id = c.con_id,
                expiry = %c.expiry,
                "contract in window"
            );
        }
    }

    fn on_start(&self, contract: &Contract, index: usize, total: usize) {
        info!(
            contract = contract.id(),
            expiry = %contract.expiry,
            "[{}/{}] fetching",
            index + 1,
            total
        );
    }

    fn on_complete(&self, report: &ContractReport, index: usize, total: usize) {
        match &report.state {
            FetchState::Failed { error } => warn!(
                contract = %report.contract,
                error = %error,
                "[{}/{}] failed",
                index + 1,
                total
            ),
            _ => info!(
                contract = %report.contract,
                bars = report.bars_written,
                pages = report.pages,
                "[{}/{}] complete",
                index + 1,
                total
            ),
        }
    }

    fn on_batch_complete(&self, summary: &FetchSummary) {
        info!(
            total = summary.total,
            done = summary.done,
            failed = summary.failed,
            bars = summary.bars_written(),
            "fetch finished"
        );
    }
}

/// Discards all progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _contract: &Contract, _index: usize, _total: usize) {}
    fn on_complete(&self, _report: &ContractReport, _index: usize, _total: usize) {}
    fn on_batch_complete(&self, _summary: &FetchSummary) {}
}

/// Outcome of a batch fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub reports: Vec<ContractReport>,
}

impl FetchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn bars_written(&self) -> usize {
        self.reports.iter().map(|r| r.bars_written).sum()
    }

    pub fn failed_contracts(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.contract.as_str())
            .collect()
    }
}

/// Fetch every contract in order.
///
/// A contract that exhausts its request attempts is recorded as failed and the
/// batch moves on. Checkpoint or contract-file I/O failures abort the batch.
#[allow(clippy::too_many_arguments)]
pub fn fetch_contracts(
    api: &dyn MarketDataApi,
    checkpoints: &mut CheckpointStore,
    writer: &ContractFileWriter,
    sleeper: &dyn Sleeper,
    settings: FetchSettings,
    now: NaiveDateTime,
    contracts: &[Contract],
    progress: &dyn FetchProgress,
) -> Result<FetchSummary, FetchError> {
    let total = contracts.len();
    let mut fetcher = PaginatedFetcher::new(api, checkpoints, writer, sleeper, settings, now);
    let mut reports = Vec::with_capacity(total);

    for (i, contract) in contracts.iter().enumerate() {
        progress.on_start(contract, i, total);
        let report = fetcher.run(contract)?;
        progress.on_complete(&report, i, total);
        reports.push(report);
    }

    let done = reports.iter().filter(|r| r.succeeded()).count();
    let summary = FetchSummary {
        total,
        done,
        failed: total - done,
        reports,
    };
    progress.on_batch_complete(&summary);
    Ok(summary)
}
