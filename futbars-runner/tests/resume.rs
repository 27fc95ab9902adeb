//! Interrupted and resumed runs against an in-memory bar series.
//!
//! The series covers three days of consecutive minutes. Windows are one day
//! wide and open at the start, so a full walk takes three full pages, one page
//! holding the series' first bar, and a final empty window.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use futbars_core::data::{CheckpointStore, ContractFileWriter};
use futbars_core::domain::{Bar, TaggedBar};
use futbars_runner::testing::{contract, minute_bars, RecordingSleeper, SeriesApi};
use futbars_runner::{
    merge_contract_files, DoneReason, FetchSettings, FetchState, PaginatedFetcher,
};
use std::path::Path;

const SERIES_MINUTES: usize = 3 * 1440;

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn series() -> Vec<Bar> {
    minute_bars(now() - Duration::days(3), SERIES_MINUTES)
}

fn settings() -> FetchSettings {
    FetchSettings {
        window_days: 1,
        ..FetchSettings::default()
    }
}

fn run_once(api: &SeriesApi, dir: &Path) -> FetchState {
    let mut checkpoints = CheckpointStore::load(dir.join("fetch_log.json")).unwrap();
    let writer = ContractFileWriter::new(dir);
    let sleeper = RecordingSleeper::new();
    let mut fetcher =
        PaginatedFetcher::new(api, &mut checkpoints, &writer, &sleeper, settings(), now());
    let c = contract("MESU5", NaiveDate::from_ymd_opt(2025, 9, 19).unwrap());
    fetcher.run(&c).unwrap().state
}

fn assert_matches_series(merged: &[TaggedBar], expected: &[Bar]) {
    assert_eq!(merged.len(), expected.len());
    for (got, want) in merged.iter().zip(expected) {
        assert_eq!(got.date, want.date);
        assert_eq!(got.close, want.close);
        assert_eq!(got.contract, "MESU5");
    }
}

#[test]
fn full_walk_covers_series_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let api = SeriesApi::new(now()).with_series("MESU5", series());

    let state = run_once(&api, dir.path());
    assert_eq!(state, FetchState::Done(DoneReason::EmptyResponse));
    assert_eq!(api.requests().len(), 5);

    let writer = ContractFileWriter::new(dir.path());
    let merged = merge_contract_files(&writer, &["MESU5".to_string()]);
    assert_eq!(merged.duplicates_dropped, 0);
    assert_matches_series(&merged.bars, &series());
}

#[test]
fn failed_run_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let api = SeriesApi::new(now()).with_series("MESU5", series());
    // page 1 succeeds, then every attempt at page 2 fails
    for n in 1..=3 {
        api.fail_request(n);
    }

    let first = run_once(&api, dir.path());
    assert!(matches!(first, FetchState::Failed { .. }));

    let store = CheckpointStore::load(dir.path().join("fetch_log.json")).unwrap();
    let cursor = store.get("MESU5").unwrap();
    assert_eq!(cursor, now() - Duration::days(1));

    let second = run_once(&api, dir.path());
    assert_eq!(second, FetchState::Done(DoneReason::EmptyResponse));

    // the resumed run starts exactly at the stored cursor
    let requests = api.requests();
    assert_eq!(requests[4].end, Some(cursor));
    assert!(requests[4..].iter().all(|r| r.end <= Some(cursor)));

    let writer = ContractFileWriter::new(dir.path());
    let merged = merge_contract_files(&writer, &["MESU5".to_string()]);
    assert_eq!(merged.duplicates_dropped, 0);
    assert_matches_series(&merged.bars, &series());
}

#[test]
fn page_written_without_checkpoint_is_deduplicated_at_merge() {
    let dir = tempfile::tempdir().unwrap();
    let all = series();

    // a crash between append and checkpoint update left the newest day on
    // disk with no cursor recorded
    let writer = ContractFileWriter::new(dir.path());
    let newest_day: Vec<Bar> = all
        .iter()
        .filter(|b| b.date > now() - Duration::days(1))
        .cloned()
        .collect();
    writer.append("MESU5", &newest_day).unwrap();

    let api = SeriesApi::new(now()).with_series("MESU5", all.clone());
    let state = run_once(&api, dir.path());
    assert_eq!(state, FetchState::Done(DoneReason::EmptyResponse));

    let merged = merge_contract_files(&writer, &["MESU5".to_string()]);
    assert_eq!(merged.duplicates_dropped, newest_day.len());
    assert_matches_series(&merged.bars, &all);
}

#[test]
fn finished_contract_rerun_is_cheap() {
    let dir = tempfile::tempdir().unwrap();
    let api = SeriesApi::new(now()).with_series("MESU5", series());
    run_once(&api, dir.path());
    let after_first = api.requests().len();

    // the stored cursor sits before the series start, so one empty window
    let state = run_once(&api, dir.path());
    assert_eq!(state, FetchState::Done(DoneReason::EmptyResponse));
    assert_eq!(api.requests().len(), after_first + 1);
}
