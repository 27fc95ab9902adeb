//! Combine per-contract files into one dataset.
//!
//! Rows that fail to parse are skipped, never the whole file. The rest are
//! tagged with their contract, deduplicated on `(date, contract)`
//! keeping the first occurrence, and sorted by `(date, contract)`. The result
//! depends only on the contract files, so merging twice produces the same
//! bytes.
//!
//! Output lands next to a `<file>.meta.json` manifest carrying the quality
//! summary and a BLAKE3 hash of the CSV bytes.

use crate::summary::{summarize, DatasetSummary};
use chrono::NaiveDateTime;
use futbars_core::data::{write_parquet, ContractFileWriter, ParquetError};
use futbars_core::domain::{BarSize, TaggedBar};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Timestamp format in output file names.
pub const OUTPUT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no contract file held any data")]
    NoData,

    #[error("output I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("manifest encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Parquet(#[from] ParquetError),
}

/// Why a contract file was left out of the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    Missing,
    Empty,
    Unreadable(String),
}

/// Rows from every readable contract file, deduplicated and sorted.
#[derive(Debug, Clone, Default)]
pub struct MergedDataset {
    pub bars: Vec<TaggedBar>,
    /// Contract id and rows loaded from its file, in load order.
    pub included: Vec<(String, usize)>,
    pub excluded: Vec<(String, Exclusion)>,
    /// Unparseable rows skipped across all files.
    pub malformed_dropped: usize,
    pub duplicates_dropped: usize,
}

/// Load, tag, deduplicate and sort the files of `contract_ids`.
///
/// Missing, empty and unreadable files are logged and excluded; they never
/// fail the merge. A file counts as unreadable only when it cannot be opened
/// or its header is wrong.
pub fn merge_contract_files(writer: &ContractFileWriter, contract_ids: &[String]) -> MergedDataset {
    let mut merged = MergedDataset::default();
    let mut rows = Vec::new();

    for id in contract_ids {
        let path = writer.path_for(id);
        if !path.exists() {
            warn!(contract = %id, file = %path.display(), "contract file missing, excluded");
            merged.excluded.push((id.clone(), Exclusion::Missing));
            continue;
        }

        match writer.read(id) {
            Ok(file) => {
                if !file.malformed.is_empty() {
                    warn!(
                        contract = %id,
                        skipped = file.malformed.len(),
                        "malformed rows skipped"
                    );
                    merged.malformed_dropped += file.malformed.len();
                }
                if file.bars.is_empty() {
                    warn!(contract = %id, file = %path.display(), "contract file empty, excluded");
                    merged.excluded.push((id.clone(), Exclusion::Empty));
                    continue;
                }
                info!(contract = %id, rows = file.bars.len(), "loaded contract file");
                merged.included.push((id.clone(), file.bars.len()));
                rows.extend(file.bars.into_iter().map(|b| TaggedBar::new(b, id)));
            }
            Err(e) => {
                warn!(contract = %id, error = %e, "contract file unreadable, excluded");
                merged
                    .excluded
                    .push((id.clone(), Exclusion::Unreadable(e.to_string())));
            }
        }
    }

    let before = rows.len();
    merged.bars = dedup_and_sort(rows);
    merged.duplicates_dropped = before - merged.bars.len();
    if merged.duplicates_dropped > 0 {
        info!(dropped = merged.duplicates_dropped, "duplicate rows dropped");
    }
    merged
}

/// Keep the first row per `(date, contract)`, then sort by `(date, contract)`.
pub fn dedup_and_sort(rows: Vec<TaggedBar>) -> Vec<TaggedBar> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut kept: Vec<TaggedBar> = rows
        .into_iter()
        .filter(|b| seen.insert((b.date, b.contract.clone())))
        .collect();
    kept.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.contract.cmp(&b.contract)));
    kept
}

/// `<SYMBOL>_<barcode>_<YYYYmmdd_HHMMSS>.csv`, e.g. `MES_1min_20250601_120000.csv`.
pub fn output_file_name(symbol: &str, bar_size: BarSize, stamp: NaiveDateTime) -> String {
    format!(
        "{symbol}_{}_{}.csv",
        bar_size.code(),
        stamp.format(OUTPUT_STAMP_FORMAT)
    )
}

/// Encode the combined CSV: bar columns plus `contract`.
pub fn encode_csv(bars: &[TaggedBar]) -> Result<Vec<u8>, MergeError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for bar in bars {
        wtr.serialize(bar)?;
    }
    wtr.into_inner().map_err(|e| MergeError::Io {
        path: PathBuf::from("<memory>"),
        source: e.into_error(),
    })
}

/// Sidecar written next to the combined file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeManifest {
    pub file: String,
    pub created: NaiveDateTime,
    /// BLAKE3 of the CSV bytes, hex.
    pub blake3: String,
    pub included: Vec<(String, usize)>,
    pub excluded: Vec<(String, Exclusion)>,
    pub malformed_dropped: usize,
    pub duplicates_dropped: usize,
    pub summary: DatasetSummary,
}

/// Where a merge was written.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub csv_path: PathBuf,
    pub manifest_path: PathBuf,
    pub parquet_path: Option<PathBuf>,
    pub manifest: MergeManifest,
}

/// Write a merged dataset to `output_dir`.
///
/// The CSV and manifest are written atomically (write to .tmp, rename). An
/// empty dataset is refused rather than producing a header-only file.
pub fn write_merged(
    merged: &MergedDataset,
    output_dir: &Path,
    symbol: &str,
    bar_size: BarSize,
    stamp: NaiveDateTime,
    parquet: bool,
) -> Result<MergeOutcome, MergeError> {
    if merged.bars.is_empty() {
        return Err(MergeError::NoData);
    }

    fs::create_dir_all(output_dir).map_err(|source| MergeError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let file = output_file_name(symbol, bar_size, stamp);
    let csv_path = output_dir.join(&file);
    let bytes = encode_csv(&merged.bars)?;
    let hash = blake3::hash(&bytes).to_hex().to_string();
    write_atomic(&csv_path, &bytes)?;

    let manifest = MergeManifest {
        file: file.clone(),
        created: stamp,
        blake3: hash,
        included: merged.included.clone(),
        excluded: merged.excluded.clone(),
        malformed_dropped: merged.malformed_dropped,
        duplicates_dropped: merged.duplicates_dropped,
        summary: summarize(&merged.bars, bar_size),
    };
    let manifest_path = output_dir.join(format!("{file}.meta.json"));
    write_atomic(&manifest_path, serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    let parquet_path = if parquet {
        let path = csv_path.with_extension("parquet");
        write_parquet(&merged.bars, &path)?;
        Some(path)
    } else {
        None
    };

    info!(
        file = %csv_path.display(),
        rows = merged.bars.len(),
        blake3 = %manifest.blake3,
        "combined dataset written"
    );

    Ok(MergeOutcome {
        csv_path,
        manifest_path,
        parquet_path,
        manifest,
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MergeError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|source| MergeError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        MergeError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}
