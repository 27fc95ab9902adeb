//! Brokerage gateway session over its local REST API.
//!
//! Talks to a locally running gateway (`https://{host}:{port}/v1/api`) with a
//! blocking HTTP client. Retries are not done here: the fetch loop owns the
//! retry and pacing policy, so every call is exactly one request.
//!
//! Bar timestamps arrive as UTC epoch milliseconds and are converted to
//! broker-local time in the configured time zone, daylight saving included.

use super::provider::{ApiError, HistoricalRequest, MarketDataApi};
use crate::config::FetchConfig;
use crate::domain::{Bar, ContractDetails, ContractTemplate};
use chrono::{DateTime, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Format of `startTime` in history queries (UTC).
const GATEWAY_TIME_FORMAT: &str = "%Y%m%d-%H:%M:%S";

#[derive(Debug, Deserialize)]
struct AuthStatus {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    connected: bool,
}

/// `/trsrv/futures` response: symbol → contract list.
type FuturesResponse = HashMap<String, Vec<FutureEntry>>;

#[derive(Debug, Deserialize)]
struct FutureEntry {
    conid: i64,
    symbol: String,
    #[serde(rename = "expirationDate")]
    expiration_date: ExpiryField,
    #[serde(rename = "localSymbol", default)]
    local_symbol: Option<String>,
}

/// Expiries come back as a bare number or a string depending on endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiryField {
    Number(i64),
    Text(String),
}

impl ExpiryField {
    fn into_string(self) -> String {
        match self {
            ExpiryField::Number(n) => n.to_string(),
            ExpiryField::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    data: Vec<HistoryPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoryPoint {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

/// Gateway session.
pub struct GatewayClient {
    client: reqwest::blocking::Client,
    base_url: String,
    client_id: u32,
    config: FetchConfig,
}

impl GatewayClient {
    /// Open a session and confirm the gateway is up and authenticated.
    ///
    /// Any failure here is fatal for a run.
    pub fn connect(config: &FetchConfig) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.connect_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(format!(
                "futbars/{} client-{}",
                env!("CARGO_PKG_VERSION"),
                config.client_id
            ))
            .build()
            .map_err(|e| ApiError::Connection(format!("failed to build HTTP client: {e}")))?;

        let gateway = Self {
            client,
            base_url: config.base_url(),
            client_id: config.client_id,
            config: config.clone(),
        };

        let status: AuthStatus = gateway.send_json(
            gateway
                .client
                .post(gateway.url("/iserver/auth/status"))
                .timeout(config.connect_timeout()),
        )?;
        if !status.connected || !status.authenticated {
            return Err(ApiError::NotAuthenticated);
        }

        info!(
            base_url = %gateway.base_url,
            client_id = gateway.client_id,
            "connected to gateway"
        );
        Ok(gateway)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send one request and decode the JSON body, mapping failures to `ApiError`.
    fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = request.send().map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(e.to_string())
            } else if e.is_connect() {
                ApiError::Connection(e.to_string())
            } else {
                ApiError::Other(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::NotAuthenticated);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        resp.json()
            .map_err(|e| ApiError::ResponseFormat(format!("decode response: {e}")))
    }

    /// Convert a UTC epoch-millisecond stamp to broker-local time.
    fn local_time(&self, epoch_ms: i64) -> Result<NaiveDateTime, ApiError> {
        DateTime::from_timestamp_millis(epoch_ms)
            .map(|utc| self.config.to_broker_time(utc))
            .ok_or_else(|| ApiError::ResponseFormat(format!("invalid timestamp: {epoch_ms}")))
    }

    /// Convert a broker-local cursor to the gateway's UTC `startTime` format.
    fn gateway_time(&self, local: NaiveDateTime) -> Result<String, ApiError> {
        self.config
            .from_broker_time(local)
            .map(|dt| dt.format(GATEWAY_TIME_FORMAT).to_string())
            .ok_or_else(|| ApiError::Other(format!("cannot place {local} in broker time")))
    }
}

impl MarketDataApi for GatewayClient {
    fn name(&self) -> &str {
        "gateway"
    }

    fn contract_details(
        &self,
        template: &ContractTemplate,
    ) -> Result<Vec<ContractDetails>, ApiError> {
        let mut query = vec![
            ("symbols", template.symbol.clone()),
            ("exchange", template.exchange.clone()),
        ];
        if template.include_expired {
            query.push(("includeExpired", "true".to_string()));
        }

        let resp: FuturesResponse =
            self.send_json(self.client.get(self.url("/trsrv/futures")).query(&query))?;

        let entries = resp.into_iter().flat_map(|(_, list)| list);
        let details: Vec<ContractDetails> = entries
            .map(|entry| ContractDetails {
                con_id: entry.conid,
                symbol: entry.symbol,
                local_symbol: entry.local_symbol,
                last_trade_date_or_contract_month: entry.expiration_date.into_string(),
                exchange: template.exchange.clone(),
                currency: template.currency.clone(),
            })
            .collect();

        debug!(symbol = %template.symbol, count = details.len(), "contract details received");
        Ok(details)
    }

    fn historical_bars(&self, request: &HistoricalRequest<'_>) -> Result<Vec<Bar>, ApiError> {
        let mut query = vec![
            ("conid", request.contract.con_id.to_string()),
            ("period", format!("{}d", request.duration_days)),
            ("bar", request.bar_size.code().to_string()),
            ("barType", request.what_to_show.bar_type().to_string()),
            ("outsideRth", (!request.use_rth).to_string()),
            ("direction", "-1".to_string()),
        ];
        if let Some(end) = request.end {
            query.push(("startTime", self.gateway_time(end)?));
        }

        let resp: HistoryResponse = self.send_json(
            self.client
                .get(self.url("/hmds/history"))
                .query(&query)
                .timeout(request.timeout),
        )?;

        let mut bars = resp
            .data
            .into_iter()
            .map(|p| {
                Ok(Bar {
                    date: self.local_time(p.t)?,
                    open: p.o,
                    high: p.h,
                    low: p.l,
                    close: p.c,
                    volume: p.v,
                    average: None,
                    bar_count: None,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    fn disconnect(&self) {
        match self.client.post(self.url("/logout")).send() {
            Ok(resp) => debug!(status = %resp.status(), "gateway logout"),
            Err(e) => debug!(error = %e, "gateway logout failed"),
        }
    }
}
