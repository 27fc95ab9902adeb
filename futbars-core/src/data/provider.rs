//! Market-data session trait and structured error types.
//!
//! The `MarketDataApi` trait abstracts over the brokerage gateway so the fetch
//! loop can be driven by a scripted session in tests.

use crate::domain::{Bar, BarSize, Contract, ContractDetails, ContractTemplate, WhatToShow};
use chrono::NaiveDateTime;
use std::time::Duration;
use thiserror::Error;

/// Errors from the market-data session.
///
/// These are designed to be displayable in log lines and CLI diagnostics.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("gateway unreachable: {0}")]
    Connection(String),

    #[error("gateway session is not authenticated (log in through the gateway first)")]
    NotAuthenticated,

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by gateway")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("api error: {0}")]
    Other(String),
}

impl ApiError {
    /// Errors that mean no session exists at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, ApiError::Connection(_) | ApiError::NotAuthenticated)
    }
}

/// One history request: a window of bars ending at `end`.
#[derive(Debug, Clone)]
pub struct HistoricalRequest<'a> {
    pub contract: &'a Contract,
    /// End of the window; `None` means "now".
    pub end: Option<NaiveDateTime>,
    pub duration_days: u32,
    pub bar_size: BarSize,
    pub what_to_show: WhatToShow,
    pub use_rth: bool,
    pub timeout: Duration,
}

/// A connected brokerage market-data session.
pub trait MarketDataApi: Send + Sync {
    /// Human-readable name of this session.
    fn name(&self) -> &str;

    /// List every contract variant matching the template.
    fn contract_details(&self, template: &ContractTemplate)
        -> Result<Vec<ContractDetails>, ApiError>;

    /// Fetch one window of bars. An empty vector means no data in the window.
    fn historical_bars(&self, request: &HistoricalRequest<'_>) -> Result<Vec<Bar>, ApiError>;

    /// Close the session. Failures are not reported.
    fn disconnect(&self) {}
}
