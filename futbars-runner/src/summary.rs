//! Quality summary of a combined dataset: size, time range, minute coverage,
//! and per-column descriptive statistics.

use chrono::NaiveDateTime;
use futbars_core::domain::{BarSize, TaggedBar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// count / mean / std / min / max of one numeric column.
///
/// `std` is the sample standard deviation (n − 1); it is `None` below two
/// values. Missing values (e.g. an absent `average`) are not counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnStats {
    pub fn from_values(name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        let count = values.len();
        if count == 0 {
            return Self {
                name: name.to_string(),
                count,
                mean: None,
                std: None,
                min: None,
                max: None,
            };
        }

        let n = count as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (count > 1).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        });
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            name: name.to_string(),
            count,
            mean: Some(mean),
            std,
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Summary of the combined dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub contracts: Vec<String>,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
    /// Whole minutes between first and last timestamp.
    pub minutes_spanned: i64,
    /// rows / expected bars over the span; `None` when the span holds no
    /// whole bar interval.
    ///
    /// Not capped at 1.0: overlapping contracts contribute one row each per
    /// minute, so a merged dataset can exceed full coverage.
    pub coverage: Option<f64>,
    /// 1 − coverage, as a fraction. Negative when coverage exceeds 1.0.
    pub missing_rate: Option<f64>,
    pub columns: Vec<ColumnStats>,
}

impl DatasetSummary {
    /// Missing rate as a percentage, for display.
    pub fn missing_percent(&self) -> Option<f64> {
        self.missing_rate.map(|r| r * 100.0)
    }
}

/// Summarize a combined dataset of `bar_size` bars. Bars need not be sorted.
pub fn summarize(bars: &[TaggedBar], bar_size: BarSize) -> DatasetSummary {
    let first = bars.iter().map(|b| b.date).min();
    let last = bars.iter().map(|b| b.date).max();
    let minutes_spanned = match (first, last) {
        (Some(f), Some(l)) => (l - f).num_minutes(),
        _ => 0,
    };

    let intervals = minutes_spanned / bar_size.minutes();
    let coverage = (intervals > 0).then(|| bars.len() as f64 / intervals as f64);
    let missing_rate = coverage.map(|c| 1.0 - c);

    let contracts: Vec<String> = bars
        .iter()
        .map(|b| b.contract.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let columns = vec![
        ColumnStats::from_values("open", bars.iter().map(|b| b.open)),
        ColumnStats::from_values("high", bars.iter().map(|b| b.high)),
        ColumnStats::from_values("low", bars.iter().map(|b| b.low)),
        ColumnStats::from_values("close", bars.iter().map(|b| b.close)),
        ColumnStats::from_values("volume", bars.iter().map(|b| b.volume)),
        ColumnStats::from_values("average", bars.iter().filter_map(|b| b.average)),
        ColumnStats::from_values(
            "barCount",
            bars.iter().filter_map(|b| b.bar_count).map(|c| c as f64),
        ),
    ];

    DatasetSummary {
        rows: bars.len(),
        contracts,
        first,
        last,
        minutes_spanned,
        coverage,
        missing_rate,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::minute_bars;
    use chrono::{Duration, NaiveDate};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn tagged(contract: &str, bars: Vec<futbars_core::domain::Bar>) -> Vec<TaggedBar> {
        bars.into_iter().map(|b| TaggedBar::new(b, contract)).collect()
    }

    #[test]
    fn column_stats_match_hand_computation() {
        let stats = ColumnStats::from_values("x", [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert_eq!(stats.mean, Some(5.0));
        assert_eq!(stats.min, Some(2.0));
        assert_eq!(stats.max, Some(9.0));
        // sample variance = 32 / 7
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((stats.std.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn single_value_has_no_std() {
        let stats = ColumnStats::from_values("x", [3.0]);
        assert_eq!(stats.mean, Some(3.0));
        assert_eq!(stats.std, None);
    }

    #[test]
    fn empty_column_is_all_none() {
        let stats = ColumnStats::from_values("x", std::iter::empty());
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_none() && stats.min.is_none() && stats.max.is_none());
    }

    #[test]
    fn coverage_with_a_gap() {
        // 09:30..=09:40 spans 10 minutes; drop 2 of the 11 bars
        let mut bars = minute_bars(start(), 11);
        bars.remove(5);
        bars.remove(3);
        let summary = summarize(&tagged("MESM4", bars), BarSize::OneMinute);

        assert_eq!(summary.rows, 9);
        assert_eq!(summary.minutes_spanned, 10);
        assert!((summary.coverage.unwrap() - 0.9).abs() < 1e-12);
        assert!((summary.missing_percent().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(summary.first, Some(start()));
        assert_eq!(summary.last, Some(start() + Duration::minutes(10)));
    }

    #[test]
    fn single_timestamp_has_no_coverage() {
        let summary = summarize(&tagged("MESM4", minute_bars(start(), 1)), BarSize::OneMinute);
        assert_eq!(summary.minutes_spanned, 0);
        assert_eq!(summary.coverage, None);
        assert_eq!(summary.missing_rate, None);
    }

    #[test]
    fn overlapping_contracts_can_exceed_full_coverage() {
        let mut bars = tagged("MESM4", minute_bars(start(), 5));
        bars.extend(tagged("MESU4", minute_bars(start(), 5)));
        let summary = summarize(&bars, BarSize::OneMinute);

        assert_eq!(summary.contracts, vec!["MESM4", "MESU4"]);
        assert!(summary.coverage.unwrap() > 1.0);
        assert!(summary.missing_rate.unwrap() < 0.0);
    }

    #[test]
    fn optional_columns_skip_missing_values() {
        let mut bars = minute_bars(start(), 3);
        bars[1].average = None;
        let summary = summarize(&tagged("MESM4", bars), BarSize::OneMinute);
        let average = summary.columns.iter().find(|c| c.name == "average").unwrap();
        assert_eq!(average.count, 2);
    }

    #[test]
    fn coverage_counts_bar_intervals() {
        // 13 five-minute bars spanning one hour, i.e. 12 intervals
        let bars: Vec<TaggedBar> = minute_bars(start(), 61)
            .into_iter()
            .step_by(5)
            .map(|b| TaggedBar::new(b, "MESM4"))
            .collect();
        let summary = summarize(&bars, BarSize::FiveMinutes);
        assert_eq!(summary.minutes_spanned, 60);
        assert_eq!(summary.rows, 13);
        assert!((summary.coverage.unwrap() - 13.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn empty_dataset() {
        let summary = summarize(&[], BarSize::OneMinute);
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.first, None);
        assert_eq!(summary.coverage, None);
        assert_eq!(summary.columns[0].count, 0);
    }
}
