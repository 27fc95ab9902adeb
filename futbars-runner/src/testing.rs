//! Test doubles for driving the fetch loop without a gateway or real sleeps.
//!
//! - `ScriptedApi` replays queued pages and errors per contract
//! - `SeriesApi` serves windows out of a fixed in-memory bar series
//! - `RecordingSleeper` records every pause instead of blocking

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use futbars_core::data::{ApiError, HistoricalRequest, MarketDataApi};
use futbars_core::domain::{Bar, Contract, ContractDetails, ContractTemplate};
use futbars_core::pacing::Sleeper;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// What a double saw for one history request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub contract: String,
    pub end: Option<NaiveDateTime>,
    pub duration_days: u32,
}

/// Replays queued responses. A contract with nothing queued gets empty pages.
#[derive(Debug, Default)]
pub struct ScriptedApi {
    details: Mutex<Vec<ContractDetails>>,
    details_error: Mutex<Option<ApiError>>,
    pages: Mutex<HashMap<String, VecDeque<Result<Vec<Bar>, ApiError>>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contracts(details: Vec<ContractDetails>) -> Self {
        let api = Self::new();
        *api.details.lock().unwrap() = details;
        api
    }

    /// Make the next `contract_details` call fail.
    pub fn fail_contract_details(&self, error: ApiError) {
        *self.details_error.lock().unwrap() = Some(error);
    }

    pub fn push_page(&self, contract_id: &str, bars: Vec<Bar>) {
        self.queue(contract_id, Ok(bars));
    }

    pub fn push_error(&self, contract_id: &str, error: ApiError) {
        self.queue(contract_id, Err(error));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn queue(&self, contract_id: &str, response: Result<Vec<Bar>, ApiError>) {
        self.pages
            .lock()
            .unwrap()
            .entry(contract_id.to_string())
            .or_default()
            .push_back(response);
    }
}

impl MarketDataApi for ScriptedApi {
    fn name(&self) -> &str {
        "scripted"
    }

    fn contract_details(
        &self,
        _template: &ContractTemplate,
    ) -> Result<Vec<ContractDetails>, ApiError> {
        if let Some(err) = self.details_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.details.lock().unwrap().clone())
    }

    fn historical_bars(&self, request: &HistoricalRequest<'_>) -> Result<Vec<Bar>, ApiError> {
        self.requests.lock().unwrap().push(record(request));
        self.pages
            .lock()
            .unwrap()
            .get_mut(request.contract.id())
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Serves `(end - duration, end]` windows out of a fixed series per contract.
///
/// `end = None` is treated as `now`. Optional failures are injected before a
/// given request number (0-based, counted across all contracts).
#[derive(Debug)]
pub struct SeriesApi {
    now: NaiveDateTime,
    series: HashMap<String, Vec<Bar>>,
    fail_on: Mutex<Vec<usize>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl SeriesApi {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            series: HashMap::new(),
            fail_on: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_series(mut self, contract_id: &str, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.date);
        self.series.insert(contract_id.to_string(), bars);
        self
    }

    /// Fail request number `n` with a timeout.
    pub fn fail_request(&self, n: usize) {
        self.fail_on.lock().unwrap().push(n);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl MarketDataApi for SeriesApi {
    fn name(&self) -> &str {
        "series"
    }

    fn contract_details(
        &self,
        _template: &ContractTemplate,
    ) -> Result<Vec<ContractDetails>, ApiError> {
        Ok(Vec::new())
    }

    fn historical_bars(&self, request: &HistoricalRequest<'_>) -> Result<Vec<Bar>, ApiError> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(record(request));
            requests.len() - 1
        };
        if self.fail_on.lock().unwrap().contains(&n) {
            return Err(ApiError::Timeout(format!("injected failure on request {n}")));
        }

        let end = request.end.unwrap_or(self.now);
        let start = end - ChronoDuration::days(i64::from(request.duration_days));
        Ok(self
            .series
            .get(request.contract.id())
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date > start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Records every requested pause.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

fn record(request: &HistoricalRequest<'_>) -> RecordedRequest {
    RecordedRequest {
        contract: request.contract.id().to_string(),
        end: request.end,
        duration_days: request.duration_days,
    }
}

/// A contract with the given local symbol and expiry.
pub fn contract(local_symbol: &str, expiry: NaiveDate) -> Contract {
    Contract {
        con_id: 1,
        symbol: "MES".into(),
        local_symbol: local_symbol.into(),
        expiry,
        exchange: "CME".into(),
        currency: "USD".into(),
    }
}

/// `count` consecutive one-minute bars starting at `start`.
pub fn minute_bars(start: NaiveDateTime, count: usize) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let price = 5000.0 + i as f64 * 0.25;
            Bar {
                date: start + ChronoDuration::minutes(i as i64),
                open: price,
                high: price + 0.5,
                low: price - 0.5,
                close: price + 0.25,
                volume: 10.0 + i as f64,
                average: Some(price),
                bar_count: Some(3),
            }
        })
        .collect()
}
