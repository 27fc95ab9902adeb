//! Minute bars as returned by the gateway and as stored on disk.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp format of checkpoint cursors (broker-local time).
pub const CURSOR_FORMAT: &str = "%Y%m%d %H:%M:%S";

/// Timestamp format of the `date` column in every CSV file.
pub const CSV_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Minutes the cursor steps back past the oldest bar of a page.
pub const CURSOR_STEP_MINUTES: i64 = 1;

/// One OHLCV bar in broker-local time.
///
/// `average` and `bar_count` are optional because not every gateway endpoint
/// reports them; they serialize as empty CSV fields when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(with = "csv_date")]
    pub date: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub average: Option<f64>,
    #[serde(rename = "barCount")]
    pub bar_count: Option<i64>,
}

/// A bar tagged with the contract it belongs to. Row type of the combined file.
///
/// Fields are spelled out rather than flattened: the csv crate cannot
/// deserialize `#[serde(flatten)]` structs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedBar {
    #[serde(with = "csv_date")]
    pub date: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub average: Option<f64>,
    #[serde(rename = "barCount")]
    pub bar_count: Option<i64>,
    pub contract: String,
}

impl TaggedBar {
    pub fn new(bar: Bar, contract: &str) -> Self {
        Self {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            average: bar.average,
            bar_count: bar.bar_count,
            contract: contract.to_string(),
        }
    }
}

/// Bar interval requested from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarSize {
    #[serde(rename = "1 min")]
    OneMinute,
    #[serde(rename = "5 mins")]
    FiveMinutes,
    #[serde(rename = "15 mins")]
    FifteenMinutes,
    #[serde(rename = "1 hour")]
    OneHour,
}

impl BarSize {
    pub fn minutes(self) -> i64 {
        match self {
            BarSize::OneMinute => 1,
            BarSize::FiveMinutes => 5,
            BarSize::FifteenMinutes => 15,
            BarSize::OneHour => 60,
        }
    }

    /// Code used in gateway query strings and in output file names.
    pub fn code(self) -> &'static str {
        match self {
            BarSize::OneMinute => "1min",
            BarSize::FiveMinutes => "5min",
            BarSize::FifteenMinutes => "15min",
            BarSize::OneHour => "1h",
        }
    }
}

/// Which price series the bars are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhatToShow {
    Trades,
    Midpoint,
    Bid,
    Ask,
}

impl WhatToShow {
    /// Gateway `barType` parameter.
    pub fn bar_type(self) -> &'static str {
        match self {
            WhatToShow::Trades => "Last",
            WhatToShow::Midpoint => "Midpoint",
            WhatToShow::Bid => "Bid",
            WhatToShow::Ask => "Ask",
        }
    }
}

pub fn format_cursor(ts: NaiveDateTime) -> String {
    ts.format(CURSOR_FORMAT).to_string()
}

pub fn parse_cursor(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s.trim(), CURSOR_FORMAT)
}

/// Cursor for the page after one whose oldest bar is `oldest`.
pub fn next_cursor(oldest: NaiveDateTime) -> NaiveDateTime {
    oldest - Duration::minutes(CURSOR_STEP_MINUTES)
}

/// Smallest timestamp in a slice of bars.
pub fn earliest(bars: &[Bar]) -> Option<NaiveDateTime> {
    bars.iter().map(|b| b.date).min()
}

/// Largest timestamp in a slice of bars.
pub fn latest(bars: &[Bar]) -> Option<NaiveDateTime> {
    bars.iter().map(|b| b.date).max()
}

pub(crate) mod csv_date {
    use super::CSV_DATE_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(CSV_DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(raw.trim(), CSV_DATE_FORMAT)
            .map_err(|e| serde::de::Error::custom(format!("bad date '{raw}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn cursor_format_matches_broker_style() {
        let cursor = NaiveDate::from_ymd_opt(2024, 12, 20)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(format_cursor(cursor), "20241220 23:59:59");
        assert_eq!(parse_cursor("20241220 23:59:59").unwrap(), cursor);
    }

    #[test]
    fn parse_cursor_rejects_garbage() {
        assert!(parse_cursor("yesterday").is_err());
        assert!(parse_cursor("2024-12-20 23:59:59").is_err());
    }

    #[test]
    fn earliest_and_latest() {
        let bars: Vec<Bar> = [ts(9, 31), ts(9, 30), ts(9, 32)]
            .into_iter()
            .map(|date| Bar {
                date,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 0.0,
                average: None,
                bar_count: None,
            })
            .collect();
        assert_eq!(earliest(&bars), Some(ts(9, 30)));
        assert_eq!(latest(&bars), Some(ts(9, 32)));
        assert_eq!(earliest(&[]), None);
    }

    #[test]
    fn bar_size_serde_uses_broker_labels() {
        let parsed: BarSize = serde_json::from_str("\"1 min\"").unwrap();
        assert_eq!(parsed, BarSize::OneMinute);
        assert_eq!(parsed.code(), "1min");
        assert_eq!(BarSize::OneHour.minutes(), 60);
    }
}
