//! Parquet copy of the combined dataset.
//!
//! Same columns as the combined CSV, with `date` stored as a millisecond
//! datetime. Writes are atomic (write to .tmp, rename into place).

use crate::domain::TaggedBar;
use polars::prelude::*;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("parquet I/O error: {0}")]
pub struct ParquetError(pub String);

/// Convert tagged bars to a Polars DataFrame.
pub fn bars_to_dataframe(bars: &[TaggedBar]) -> Result<DataFrame, ParquetError> {
    let dates: Vec<i64> = bars
        .iter()
        .map(|b| b.date.and_utc().timestamp_millis())
        .collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let averages: Vec<Option<f64>> = bars.iter().map(|b| b.average).collect();
    let counts: Vec<Option<i64>> = bars.iter().map(|b| b.bar_count).collect();
    let contracts: Vec<String> = bars.iter().map(|b| b.contract.clone()).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| ParquetError(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("average".into(), averages),
        Column::new("barCount".into(), counts),
        Column::new("contract".into(), contracts),
    ])
    .map_err(|e| ParquetError(format!("dataframe creation: {e}")))
}

/// Write tagged bars to `path` as Parquet.
pub fn write_parquet(bars: &[TaggedBar], path: &Path) -> Result<(), ParquetError> {
    let mut df = bars_to_dataframe(bars)?;
    let tmp_path = path.with_extension("parquet.tmp");

    let file =
        fs::File::create(&tmp_path).map_err(|e| ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| ParquetError(format!("write parquet: {e}")))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ParquetError(format!("atomic rename failed: {e}"))
    })?;
    Ok(())
}
