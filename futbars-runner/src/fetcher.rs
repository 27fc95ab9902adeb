//! Per-contract paginated fetch loop.
//!
//! Each contract runs through an explicit state machine:
//!
//! ```text
//! Init ──► Fetching { cursor } ──► Fetching { older cursor } ──► … ──► Done
//!                  │
//!                  └──► Failed   (request attempts exhausted)
//! ```
//!
//! Every stored page moves the checkpoint to one minute before the page's
//! oldest bar, so the cursor only ever walks backward and never runs ahead of
//! the data already written.

use crate::enumerate::lookback_boundary;
use chrono::NaiveDateTime;
use futbars_core::config::FetchConfig;
use futbars_core::data::{
    ApiError, CheckpointError, CheckpointStore, ContractFileWriter, HistoricalRequest,
    MarketDataApi, WriterError,
};
use futbars_core::domain::{
    earliest, format_cursor, latest, next_cursor, Bar, BarSize, Contract, WhatToShow,
};
use futbars_core::pacing::{backoff_delay, Sleeper};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Local storage failures. These abort the run: without a working checkpoint
/// or contract file there is nothing safe to resume from.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// Where a contract stands in the fetch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Init,
    /// Next request ends at `cursor`; `None` means "now".
    Fetching { cursor: Option<NaiveDateTime> },
    Done(DoneReason),
    /// Attempts exhausted; the contract is skipped for this run.
    Failed { error: String },
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Done(_) | FetchState::Failed { .. })
    }
}

/// Why a contract finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The gateway returned no bars for the window.
    EmptyResponse,
    /// Every returned bar was older than the lookback boundary.
    PastBoundary,
    /// The page's oldest bar reached the lookback boundary.
    ReachedBoundary,
    /// The stored cursor was already at or before the boundary.
    AlreadyExhausted,
    /// A page would not have moved the cursor backward.
    CursorStalled,
}

/// Fetch-loop knobs, lifted out of `FetchConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub lookback_days: i64,
    pub window_days: u32,
    pub bar_size: BarSize,
    pub what_to_show: WhatToShow,
    pub use_rth: bool,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub rate_limit_delay: Duration,
}

impl From<&FetchConfig> for FetchSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            window_days: config.window_days,
            bar_size: config.bar_size,
            what_to_show: config.what_to_show,
            use_rth: config.use_rth,
            request_timeout: config.request_timeout(),
            max_attempts: config.max_attempts,
            rate_limit_delay: config.rate_limit_delay(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

/// Outcome of one contract's run through the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractReport {
    pub contract: String,
    pub state: FetchState,
    /// Cursor the first request ended at (`None` = now).
    pub start_cursor: Option<NaiveDateTime>,
    pub pages: usize,
    pub bars_written: usize,
    /// History requests sent, including failed attempts.
    pub requests: usize,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
}

impl ContractReport {
    fn new(contract: &Contract) -> Self {
        Self {
            contract: contract.id().to_string(),
            state: FetchState::Init,
            start_cursor: None,
            pages: 0,
            bars_written: 0,
            requests: 0,
            earliest: None,
            latest: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.state, FetchState::Done(_))
    }
}

/// Walks contracts backward through history one window at a time.
///
/// Holds the session, the checkpoint store and the contract files explicitly;
/// there is no ambient state.
pub struct PaginatedFetcher<'a> {
    api: &'a dyn MarketDataApi,
    checkpoints: &'a mut CheckpointStore,
    writer: &'a ContractFileWriter,
    sleeper: &'a dyn Sleeper,
    settings: FetchSettings,
    now: NaiveDateTime,
    boundary: NaiveDateTime,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(
        api: &'a dyn MarketDataApi,
        checkpoints: &'a mut CheckpointStore,
        writer: &'a ContractFileWriter,
        sleeper: &'a dyn Sleeper,
        settings: FetchSettings,
        now: NaiveDateTime,
    ) -> Self {
        let boundary = lookback_boundary(now, settings.lookback_days);
        Self {
            api,
            checkpoints,
            writer,
            sleeper,
            settings,
            now,
            boundary,
        }
    }

    /// Oldest timestamp kept; bars before it are discarded.
    pub fn boundary(&self) -> NaiveDateTime {
        self.boundary
    }

    /// Run one contract from `Init` to a terminal state.
    pub fn run(&mut self, contract: &Contract) -> Result<ContractReport, FetchError> {
        let mut report = ContractReport::new(contract);
        let mut state = FetchState::Init;
        while !state.is_terminal() {
            state = self.step(contract, state, &mut report)?;
        }

        match &state {
            FetchState::Done(reason) => info!(
                contract = contract.id(),
                reason = ?reason,
                pages = report.pages,
                bars = report.bars_written,
                "contract done"
            ),
            FetchState::Failed { error } => warn!(
                contract = contract.id(),
                pages = report.pages,
                error = %error,
                "contract failed, skipping for this run"
            ),
            _ => {}
        }
        report.state = state;
        Ok(report)
    }

    /// Advance one transition.
    pub fn step(
        &mut self,
        contract: &Contract,
        state: FetchState,
        report: &mut ContractReport,
    ) -> Result<FetchState, FetchError> {
        match state {
            FetchState::Init => Ok(self.init(contract, report)),
            FetchState::Fetching { cursor } => self.fetch_page(contract, cursor, report),
            terminal => Ok(terminal),
        }
    }

    fn init(&self, contract: &Contract, report: &mut ContractReport) -> FetchState {
        let cursor = match self.checkpoints.get(contract.id()) {
            Some(stored) => {
                info!(contract = contract.id(), cursor = %format_cursor(stored), "resuming");
                Some(stored)
            }
            None if contract.is_expired(self.now) => {
                let eod = contract.expiry_end_of_day();
                info!(
                    contract = contract.id(),
                    cursor = %format_cursor(eod),
                    "expired contract, starting from end of expiry day"
                );
                Some(eod)
            }
            None => {
                info!(contract = contract.id(), "starting from now");
                None
            }
        };
        report.start_cursor = cursor;

        match cursor {
            Some(c) if c <= self.boundary => FetchState::Done(DoneReason::AlreadyExhausted),
            _ => FetchState::Fetching { cursor },
        }
    }

    fn fetch_page(
        &mut self,
        contract: &Contract,
        cursor: Option<NaiveDateTime>,
        report: &mut ContractReport,
    ) -> Result<FetchState, FetchError> {
        let bars = match self.request_with_retry(contract, cursor, report) {
            Ok(bars) => bars,
            Err(e) => {
                return Ok(FetchState::Failed {
                    error: e.to_string(),
                })
            }
        };
        if bars.is_empty() {
            return Ok(FetchState::Done(DoneReason::EmptyResponse));
        }

        let returned = bars.len();
        let kept: Vec<Bar> = bars
            .into_iter()
            .filter(|b| b.date >= self.boundary)
            .collect();
        if kept.len() < returned {
            debug!(
                contract = contract.id(),
                dropped = returned - kept.len(),
                "discarded bars older than boundary"
            );
        }

        let (oldest, newest) = match (earliest(&kept), latest(&kept)) {
            (Some(oldest), Some(newest)) => (oldest, newest),
            _ => return Ok(FetchState::Done(DoneReason::PastBoundary)),
        };

        let next = next_cursor(oldest);
        if let Some(current) = cursor {
            if next >= current {
                warn!(
                    contract = contract.id(),
                    cursor = %format_cursor(current),
                    oldest = %oldest,
                    "page did not move the cursor backward, stopping"
                );
                return Ok(FetchState::Done(DoneReason::CursorStalled));
            }
        }

        let written = self.writer.append(contract.id(), &kept)?;
        self.checkpoints.set(contract.id(), next)?;

        report.pages += 1;
        report.bars_written += written;
        report.earliest = Some(report.earliest.map_or(oldest, |e| e.min(oldest)));
        report.latest = Some(report.latest.map_or(newest, |l| l.max(newest)));

        info!(
            contract = contract.id(),
            rows = written,
            from = %oldest.date(),
            to = %newest.date(),
            cursor = %format_cursor(next),
            file = %self.writer.path_for(contract.id()).display(),
            "page stored"
        );

        self.sleeper.sleep(self.settings.rate_limit_delay);

        if oldest <= self.boundary {
            return Ok(FetchState::Done(DoneReason::ReachedBoundary));
        }
        Ok(FetchState::Fetching { cursor: Some(next) })
    }

    /// One page request with up to `max_attempts` tries, sleeping 2^attempt
    /// seconds between them.
    fn request_with_retry(
        &self,
        contract: &Contract,
        cursor: Option<NaiveDateTime>,
        report: &mut ContractReport,
    ) -> Result<Vec<Bar>, ApiError> {
        let request = HistoricalRequest {
            contract,
            end: cursor,
            duration_days: self.settings.window_days,
            bar_size: self.settings.bar_size,
            what_to_show: self.settings.what_to_show,
            use_rth: self.settings.use_rth,
            timeout: self.settings.request_timeout,
        };

        let max = self.settings.max_attempts;
        let mut last_error = None;
        for attempt in 0..max {
            report.requests += 1;
            match self.api.historical_bars(&request) {
                Ok(bars) => return Ok(bars),
                Err(e) => {
                    warn!(
                        contract = contract.id(),
                        attempt = attempt + 1,
                        max_attempts = max,
                        error = %e,
                        "history request failed"
                    );
                    if attempt + 1 < max {
                        let delay = backoff_delay(attempt);
                        debug!(contract = contract.id(), delay_secs = delay.as_secs(), "backing off");
                        self.sleeper.sleep(delay);
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ApiError::Other("no request attempts configured".into())))
    }
}
