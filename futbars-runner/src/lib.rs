//! futbars runner — the download workflow on top of `futbars-core`.
//!
//! - Contract discovery over the lookback window
//! - The per-contract paginated fetch loop with retries and checkpoints
//! - Batch orchestration with progress callbacks
//! - Merge of contract files into one deduplicated dataset, with a quality
//!   summary and manifest

pub mod download;
pub mod enumerate;
pub mod fetcher;
pub mod merge;
pub mod pipeline;
pub mod summary;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use download::{fetch_contracts, FetchProgress, FetchSummary, LogProgress, NoProgress};
pub use enumerate::{enumerate_contracts, lookback_boundary, Enumeration};
pub use fetcher::{
    ContractReport, DoneReason, FetchError, FetchSettings, FetchState, PaginatedFetcher,
};
pub use merge::{
    dedup_and_sort, merge_contract_files, output_file_name, write_merged, Exclusion,
    MergeError, MergeManifest, MergeOutcome, MergedDataset,
};
pub use pipeline::{merge_work_dir, run_pipeline, PipelineError, PipelineOutcome};
pub use summary::{summarize, ColumnStats, DatasetSummary};
