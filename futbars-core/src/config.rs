//! Run configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) gives the
//! stock MES setup against a local gateway.

use crate::domain::{BarSize, ContractTemplate, WhatToShow};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a fetch-and-merge run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Session label reported to the gateway and in logs.
    pub client_id: u32,
    /// Seconds allowed for establishing the session.
    pub connect_timeout_secs: u64,
    /// Local gateways serve a self-signed certificate.
    pub accept_invalid_certs: bool,

    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub include_expired: bool,

    /// Trailing window of expiries and bars to keep.
    pub lookback_days: i64,
    /// Span of one history request.
    pub window_days: u32,
    pub bar_size: BarSize,
    pub what_to_show: WhatToShow,
    /// Regular trading hours only.
    pub use_rth: bool,
    /// Pause after every stored page.
    pub rate_limit_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Attempts per page before the contract is abandoned for this run.
    pub max_attempts: u32,

    /// Broker-local time zone, as an IANA name (`America/Chicago`).
    pub timezone: Tz,

    /// Directory for per-contract files.
    pub work_dir: PathBuf,
    /// Checkpoint file, relative to `work_dir` unless absolute.
    pub checkpoint_file: PathBuf,
    /// Directory for the combined output.
    pub output_dir: PathBuf,
    /// Also write the combined dataset as Parquet.
    pub write_parquet: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            client_id: 1,
            connect_timeout_secs: 30,
            accept_invalid_certs: true,
            symbol: "MES".into(),
            exchange: "CME".into(),
            currency: "USD".into(),
            include_expired: true,
            lookback_days: 730,
            window_days: 7,
            bar_size: BarSize::OneMinute,
            what_to_show: WhatToShow::Trades,
            use_rth: false,
            rate_limit_delay_ms: 1100,
            request_timeout_secs: 60,
            max_attempts: 3,
            timezone: chrono_tz::America::Chicago,
            work_dir: PathBuf::from("."),
            checkpoint_file: PathBuf::from("fetch_log.json"),
            output_dir: PathBuf::from("."),
            write_parquet: false,
        }
    }
}

impl FetchConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FetchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty".into()));
        }
        if self.lookback_days <= 0 {
            return Err(ConfigError::Invalid(format!(
                "lookback_days must be positive, got {}",
                self.lookback_days
            )));
        }
        if self.window_days == 0 {
            return Err(ConfigError::Invalid("window_days must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn template(&self) -> ContractTemplate {
        ContractTemplate {
            symbol: self.symbol.clone(),
            exchange: self.exchange.clone(),
            currency: self.currency.clone(),
            include_expired: self.include_expired,
        }
    }

    /// Convert a UTC instant to broker-local wall-clock time.
    pub fn to_broker_time(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.timezone).naive_local()
    }

    /// Place a broker-local wall-clock time back on the UTC timeline.
    ///
    /// The repeated hour at the end of daylight saving resolves to its first
    /// occurrence; a time inside the skipped spring hour is moved forward an
    /// hour.
    pub fn from_broker_time(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(local + ChronoDuration::hours(1)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Current broker-local time.
    pub fn broker_now(&self) -> NaiveDateTime {
        self.to_broker_time(Utc::now())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        if self.checkpoint_file.is_absolute() {
            self.checkpoint_file.clone()
        } else {
            self.work_dir.join(&self.checkpoint_file)
        }
    }

    /// Gateway REST root, e.g. `https://127.0.0.1:5000/v1/api`.
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/v1/api", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = FetchConfig::from_toml("").unwrap();
        assert_eq!(config, FetchConfig::default());
        assert_eq!(config.window_days, 7);
        assert_eq!(config.lookback_days, 730);
        assert_eq!(config.rate_limit_delay(), Duration::from_millis(1100));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_applied() {
        let config = FetchConfig::from_toml(
            r#"
symbol = "MNQ"
port = 5001
window_days = 3
bar_size = "5 mins"
what_to_show = "MIDPOINT"
write_parquet = true
"#,
        )
        .unwrap();
        assert_eq!(config.symbol, "MNQ");
        assert_eq!(config.port, 5001);
        assert_eq!(config.window_days, 3);
        assert_eq!(config.bar_size, BarSize::FiveMinutes);
        assert_eq!(config.what_to_show, WhatToShow::Midpoint);
        assert!(config.write_parquet);
        assert_eq!(config.exchange, "CME");
    }

    #[test]
    fn rejects_zero_window() {
        let err = FetchConfig::from_toml("window_days = 0").unwrap_err();
        assert!(err.to_string().contains("window_days"));
    }

    #[test]
    fn rejects_zero_attempts() {
        assert!(FetchConfig::from_toml("max_attempts = 0").is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = FetchConfig::from_toml(r#"timezone = "America/Nowhere""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn checkpoint_path_is_relative_to_work_dir() {
        let config = FetchConfig {
            work_dir: PathBuf::from("/data/mes"),
            ..FetchConfig::default()
        };
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/data/mes/fetch_log.json")
        );
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn local(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn broker_time_follows_daylight_saving() {
        let config = FetchConfig::default();
        // CDT, UTC-5
        assert_eq!(
            config.to_broker_time(utc("2025-07-01T18:00:00Z")),
            local("2025-07-01 13:00:00")
        );
        // CST, UTC-6
        assert_eq!(
            config.to_broker_time(utc("2025-01-15T18:00:00Z")),
            local("2025-01-15 12:00:00")
        );
    }

    #[test]
    fn broker_time_round_trips_through_utc() {
        let config = FetchConfig::default();
        assert_eq!(
            config.from_broker_time(local("2025-07-01 13:00:00")),
            Some(utc("2025-07-01T18:00:00Z"))
        );
        assert_eq!(
            config.from_broker_time(local("2025-01-15 12:00:00")),
            Some(utc("2025-01-15T18:00:00Z"))
        );
    }

    #[test]
    fn broker_time_across_transitions() {
        let config = FetchConfig::default();
        // 2025-11-02 01:30 happens twice; the CDT one comes first
        assert_eq!(
            config.from_broker_time(local("2025-11-02 01:30:00")),
            Some(utc("2025-11-02T06:30:00Z"))
        );
        // 2025-03-09 02:30 never happens; 03:30 CDT does
        assert_eq!(
            config.from_broker_time(local("2025-03-09 02:30:00")),
            Some(utc("2025-03-09T08:30:00Z"))
        );
    }

    #[test]
    fn timezone_is_configurable() {
        let config = FetchConfig::from_toml(r#"timezone = "America/New_York""#).unwrap();
        assert_eq!(config.timezone, chrono_tz::America::New_York);
        assert_eq!(
            config.to_broker_time(utc("2025-07-01T18:00:00Z")),
            local("2025-07-01 14:00:00")
        );
    }

    #[test]
    fn base_url_uses_host_and_port() {
        assert_eq!(
            FetchConfig::default().base_url(),
            "https://127.0.0.1:5000/v1/api"
        );
    }
}
