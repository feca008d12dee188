//! On-disk layout: `<root>/index.json` plus one directory per week end, each
//! holding up to four bucket files (`A.json`, `B.json`, `PA.json`, `PB.json`).

use crate::core::record::{ListType, StockRecord};
use crate::core::week::parse_date;
use crate::store::StoreError;
use chrono::NaiveDate;
use serde::{Serialize, de::DeserializeOwned};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const INDEX_FILE: &str = "index.json";

/// JSON encoding used for every file the store writes.
///
/// The fast variant skips pretty printing; both decode to the same data.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    fast: bool,
}

impl JsonCodec {
    pub fn new(fast: bool) -> Self {
        Self { fast }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<Vec<u8>> {
        if self.fast {
            serde_json::to_vec(value)
        } else {
            serde_json::to_vec_pretty(value)
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> serde_json::Result<T> {
        serde_json::from_slice(bytes)
    }
}

/// Paths and file primitives rooted at the data directory.
#[derive(Debug, Clone)]
pub struct DiskLayout {
    root: PathBuf,
    codec: JsonCodec,
}

impl DiskLayout {
    pub fn new(root: impl Into<PathBuf>, codec: JsonCodec) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codec(&self) -> JsonCodec {
        self.codec
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn week_dir(&self, week_end: NaiveDate) -> PathBuf {
        self.root.join(week_end.format("%Y-%m-%d").to_string())
    }

    pub fn bucket_path(&self, week_end: NaiveDate, list: ListType) -> PathBuf {
        self.week_dir(week_end).join(format!("{list}.json"))
    }

    pub fn ensure_week_dir(&self, week_end: NaiveDate) -> Result<(), StoreError> {
        let dir = self.week_dir(week_end);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Persistence { path: dir, source })
    }

    /// Reads the object rows of one bucket as raw JSON. Missing, unreadable
    /// or malformed files read as empty, and array entries that are not
    /// objects are skipped.
    pub fn load_rows(&self, week_end: NaiveDate, list: ListType) -> Vec<serde_json::Value> {
        let path = self.bucket_path(week_end, list);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read bucket {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }

        match self.codec.decode(&bytes) {
            Ok(serde_json::Value::Array(rows)) => {
                rows.into_iter().filter(serde_json::Value::is_object).collect()
            }
            Ok(_) => {
                warn!("Bucket {} is not a JSON array, ignoring", path.display());
                Vec::new()
            }
            Err(e) => {
                warn!("Bucket {} is not valid JSON: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Reads one bucket as records.
    pub fn load_bucket(&self, week_end: NaiveDate, list: ListType) -> Vec<StockRecord> {
        self.load_rows(week_end, list)
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable row in {week_end}/{list}: {e}");
                    None
                }
            })
            .collect()
    }

    /// Rewrites a bucket from raw rows, so rows this version cannot model
    /// survive untouched.
    pub fn save_rows(
        &self,
        week_end: NaiveDate,
        list: ListType,
        rows: &[serde_json::Value],
    ) -> Result<(), StoreError> {
        let payload = self.codec.encode(rows)?;
        atomic_write(&self.bucket_path(week_end, list), &payload)
    }

    /// Week directories present on disk, oldest first.
    pub fn week_dirs(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Persistence {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut weeks: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().and_then(parse_date))
            .collect();
        weeks.sort();
        Ok(weeks)
    }
}

/// Replaces `path` with `payload` so readers only ever see the old or the new
/// contents.
///
/// The payload goes to a temporary file in the target directory, is flushed
/// and synced, then renamed over the target. The temporary file is deleted if
/// any step fails.
pub fn atomic_write(path: &Path, payload: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let persistence = |source: std::io::Error| StoreError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(persistence)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".stocks-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(persistence)?;
    tmp.write_all(payload).map_err(persistence)?;
    tmp.flush().map_err(persistence)?;
    tmp.as_file().sync_all().map_err(persistence)?;
    // On failure the returned error owns the temp file and removes it on drop
    tmp.persist(path).map_err(|e| persistence(e.error))?;

    debug!("Wrote {} bytes to {}", payload.len(), path.display());
    Ok(())
}
