use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::TickRecord;

/// Filename timestamp layout: `{symbol}_{YYYYMMDD_HHMMSS}.json`
const FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
const FILE_TIME_LEN: usize = 15;
const FILE_EXTENSION: &str = ".json";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of one persistence cycle
#[derive(Debug, Clone, Default)]
pub struct PersistSummary {
    pub files_written: usize,
    pub records_written: usize,
    pub failures: usize,
}

/// Newest snapshot file found for one symbol
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub symbol: String,
    pub path: PathBuf,
    /// Raw records; replayed through normal admission so they get normalized and deduped
    pub records: Vec<Value>,
}

/// JSON snapshot files, one per symbol per persistence cycle
///
/// Files are written to a temporary name and renamed into place, so a reader
/// never sees a half-written snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every symbol's records to `{symbol}_{timestamp}.json`
    ///
    /// A failure on one symbol is logged and counted; the others are still written.
    pub fn write_snapshot(
        &self,
        snapshot: &[(String, Vec<TickRecord>)],
        at: DateTime<Utc>,
    ) -> Result<PersistSummary, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;

        let stamp = at.format(FILE_TIME_FORMAT).to_string();
        let mut summary = PersistSummary::default();

        for (symbol, records) in snapshot {
            if records.is_empty() {
                continue;
            }

            let path = self.dir.join(file_name(symbol, &stamp));
            match write_json_atomic(&path, records) {
                Ok(()) => {
                    summary.files_written += 1;
                    summary.records_written += records.len();
                }
                Err(e) => {
                    tracing::error!("❌ Failed to persist {}: {}", symbol, e);
                    summary.failures += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Newest file per symbol, selected by the timestamp embedded in its name
    ///
    /// Unreadable or corrupt files are logged and skipped. A missing
    /// directory means nothing to load.
    pub fn load_latest(&self) -> Result<Vec<LoadedSnapshot>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut newest: HashMap<String, (NaiveDateTime, PathBuf)> = HashMap::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| PersistenceError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some((symbol, stamp)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };

            let path = entry.path();
            match newest.get(&symbol) {
                Some((existing, _)) if *existing >= stamp => {}
                _ => {
                    newest.insert(symbol, (stamp, path));
                }
            }
        }

        let mut loaded = Vec::with_capacity(newest.len());
        for (symbol, (_, path)) in newest {
            match read_json_array(&path) {
                Ok(records) => {
                    tracing::info!("📂 Loaded {} records for {} from {}", records.len(), symbol, path.display());
                    loaded.push(LoadedSnapshot {
                        symbol,
                        path,
                        records,
                    });
                }
                Err(e) => tracing::error!("❌ Failed to load snapshot {}: {}", path.display(), e),
            }
        }

        loaded.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(loaded)
    }
}

fn file_name(symbol: &str, stamp: &str) -> String {
    format!("{}_{}{}", symbol, stamp, FILE_EXTENSION)
}

/// `BTCUSDT_20240101_120000.json` -> ("BTCUSDT", 2024-01-01 12:00:00)
///
/// The timestamp is taken from the end, so symbols containing `_` survive.
fn parse_file_name(name: &str) -> Option<(String, NaiveDateTime)> {
    let stem = name.strip_suffix(FILE_EXTENSION)?;
    if stem.len() < FILE_TIME_LEN + 2 || !stem.is_char_boundary(stem.len() - FILE_TIME_LEN) {
        return None;
    }

    let (head, stamp) = stem.split_at(stem.len() - FILE_TIME_LEN);
    let symbol = head.strip_suffix('_')?;
    if symbol.is_empty() {
        return None;
    }

    let parsed = NaiveDateTime::parse_from_str(stamp, FILE_TIME_FORMAT).ok()?;
    Some((symbol.to_string(), parsed))
}

fn write_json_atomic(path: &Path, records: &[TickRecord]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("json.tmp");

    {
        let file = File::create(&tmp).map_err(|e| PersistenceError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, records).map_err(|e| PersistenceError::json(&tmp, e))?;
        writer.flush().map_err(|e| PersistenceError::io(&tmp, e))?;
    }

    fs::rename(&tmp, path).map_err(|e| PersistenceError::io(path, e))
}

fn read_json_array(path: &Path) -> Result<Vec<Value>, PersistenceError> {
    let file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| PersistenceError::json(path, e))
}
