//! Append-only per-contract CSV files.
//!
//! Layout: `{dir}/{CONTRACT}_temp.csv` with header
//! `date,open,high,low,close,volume,average,barCount`.
//!
//! Pages are appended as they arrive and never rewritten. The header goes in
//! only when the file is new (or was left empty by a crash), so a resumed run
//! simply keeps appending. A partial last line left by a killed process is cut
//! before the next append, and reading skips any row that still fails to parse.

use crate::domain::Bar;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const FILE_SUFFIX: &str = "_temp.csv";

const HEADER: [&str; 8] = [
    "date", "open", "high", "low", "close", "volume", "average", "barCount",
];

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("contract file I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("contract file CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("contract file {path} has unexpected header '{found}'")]
    Header { path: PathBuf, found: String },
}

/// Rows read back from a contract file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractRows {
    pub bars: Vec<Bar>,
    /// Line numbers of rows that did not parse and were skipped.
    pub malformed: Vec<u64>,
}

/// Owns the directory of per-contract files.
#[derive(Debug, Clone)]
pub struct ContractFileWriter {
    dir: PathBuf,
}

impl ContractFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a contract's file: `{dir}/{CONTRACT}_temp.csv`
    pub fn path_for(&self, contract_id: &str) -> PathBuf {
        self.dir.join(format!("{contract_id}{FILE_SUFFIX}"))
    }

    /// Append one page of bars. Returns the number of rows written.
    pub fn append(&self, contract_id: &str, bars: &[Bar]) -> Result<usize, WriterError> {
        let path = self.path_for(contract_id);
        let io_err = |source| WriterError::Io {
            path: path.clone(),
            source,
        };
        let csv_err = |source| WriterError::Csv {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let needs_header = trim_torn_tail(&path).map_err(io_err)? == 0;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for bar in bars {
            wtr.serialize(bar).map_err(csv_err)?;
        }
        wtr.flush().map_err(io_err)?;

        Ok(bars.len())
    }

    /// Whether a contract's file exists and holds at least one byte.
    pub fn has_data(&self, contract_id: &str) -> bool {
        fs::metadata(self.path_for(contract_id))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Read every bar written for a contract, in file order.
    ///
    /// Rows that fail to parse are logged and skipped. An empty file gives no
    /// rows; a header that is not ours is an error.
    pub fn read(&self, contract_id: &str) -> Result<ContractRows, WriterError> {
        let path = self.path_for(contract_id);
        let csv_err = |source| WriterError::Csv {
            path: path.clone(),
            source,
        };

        let mut rdr = csv::Reader::from_path(&path).map_err(csv_err)?;
        let headers = rdr.headers().map_err(csv_err)?.clone();
        if headers.is_empty() {
            return Ok(ContractRows::default());
        }
        if headers.iter().ne(HEADER) {
            return Err(WriterError::Header {
                path: path.clone(),
                found: headers.iter().collect::<Vec<_>>().join(","),
            });
        }

        let mut rows = ContractRows::default();
        for result in rdr.deserialize::<Bar>() {
            match result {
                Ok(bar) => rows.bars.push(bar),
                Err(e) if e.is_io_error() => return Err(csv_err(e)),
                Err(e) => {
                    let line = e.position().map_or(0, |p| p.line());
                    warn!(contract = contract_id, line, error = %e, "skipping malformed row");
                    rows.malformed.push(line);
                }
            }
        }
        Ok(rows)
    }

    /// Contract ids with a file in the directory, sorted.
    pub fn discover(&self) -> Result<Vec<String>, WriterError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(WriterError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| WriterError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(FILE_SUFFIX) {
                if !id.is_empty() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Cut `path` back to its last complete line and return the remaining length.
///
/// A missing file counts as empty. A file holding no newline at all is a torn
/// header and is emptied.
fn trim_torn_tail(path: &Path) -> io::Result<u64> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    let keep = last_line_end(&mut file, len)?;
    if keep < len {
        warn!(
            file = %path.display(),
            dropped_bytes = len - keep,
            "truncating partial line left by an interrupted write"
        );
        file.set_len(keep)?;
    }
    Ok(keep)
}

/// Offset just past the last `\n` in the first `len` bytes, or 0.
fn last_line_end(file: &mut File, len: u64) -> io::Result<u64> {
    let mut buf = [0u8; 4096];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}
