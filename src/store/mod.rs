//! Durable watchlist storage.
//!
//! Records live in one JSON array file per (week, list) bucket. An in-memory
//! [`Index`] mirrors those files for lookups by id, symbol and week and is
//! persisted to `index.json` after every mutation. All writers are serialized
//! by a single lock; readers grab the current `Arc<Index>` and never observe a
//! half-applied change because each mutation builds a new index and swaps it
//! in only after the files are durably written.

pub mod disk;
pub mod index;

use crate::core::record::{ListType, StockRecord, row_id};
use crate::core::week;
use chrono::{NaiveDate, Utc};
use disk::{DiskLayout, JsonCodec, atomic_write};
use index::{Index, Location};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

const MAX_SEARCH_RESULTS: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("stock not found")]
    NotFound,
    #[error("failed to persist {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Records grouped by list, always holding all four lists in display order.
pub type GroupedRecords = BTreeMap<ListType, Vec<StockRecord>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekSummary {
    pub week_end: NaiveDate,
    pub week_label: String,
}

pub struct WatchlistStore {
    layout: DiskLayout,
    index: RwLock<Arc<Index>>,
    write_lock: Mutex<()>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn current_week() -> Result<NaiveDate, StoreError> {
    week::week_end(today())
        .ok_or_else(|| StoreError::Validation("current week is out of range".to_string()))
}

impl WatchlistStore {
    /// Opens the store rooted at `root`, creating it when needed.
    ///
    /// A missing or corrupt `index.json` reads as empty; an index with no
    /// known weeks is rebuilt from the bucket files, and when there are none
    /// the current week is registered.
    pub fn open(root: impl Into<PathBuf>, codec: JsonCodec) -> Result<Self, StoreError> {
        let layout = DiskLayout::new(root, codec);
        fs::create_dir_all(layout.root()).map_err(|source| StoreError::Persistence {
            path: layout.root().to_path_buf(),
            source,
        })?;

        let index = load_index(&layout);
        let store = Self {
            layout,
            index: RwLock::new(Arc::new(index)),
            write_lock: Mutex::new(()),
        };

        if store.snapshot().weeks.is_empty() && !store.rebuild_from_files()? {
            store.register_week(current_week()?)?;
        }
        info!(
            "Opened watchlist store at {} ({} records)",
            store.root().display(),
            store.snapshot().by_id.len()
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Current index. Cheap; callers get an immutable snapshot.
    pub fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn state_version(&self) -> u64 {
        self.snapshot().state_version
    }

    /// Inserts or replaces a record.
    ///
    /// `previous` is where the record lived before an edit; when omitted the
    /// location already indexed for the id is used, so a record never ends up
    /// in two buckets.
    pub fn upsert(
        &self,
        record: StockRecord,
        previous: Option<Location>,
    ) -> Result<StockRecord, StoreError> {
        let record = record.normalized(today()).map_err(StoreError::Validation)?;
        let week = record
            .week_end
            .ok_or_else(|| StoreError::Validation("week could not be derived".to_string()))?;
        let list = record.list_type;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let previous = previous.or_else(|| current.by_id.get(&record.id).cloned());
        let mut next = (*current).clone();
        next.ensure_week(week);

        // Raw rows keep fields and values the record type does not model
        let mut rows = self.layout.load_rows(week, list);
        let row = serde_json::to_value(&record)?;
        match rows
            .iter_mut()
            .find(|existing| row_id(existing).as_deref() == Some(record.id.as_str()))
        {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        self.layout.save_rows(week, list, &rows)?;
        next.set_count(week, list, rows.len());

        if let Some(prev) = previous.filter(|prev| !prev.same_bucket(week, list)) {
            debug!(
                "Moving {} from {}/{} to {}/{}",
                record.id, prev.week, prev.list, week, list
            );
            if let Some(remaining) = self.remove_from_bucket(prev.week, prev.list, &record.id)? {
                next.set_count(prev.week, prev.list, remaining);
            }
        }

        next.insert_record(&record, week, list);
        let version = self.commit(next)?;
        debug!("Upserted {} into {}/{} (v{})", record.id, week, list, version);
        Ok(record)
    }

    /// Removes a record by id. Unknown ids report [`StoreError::NotFound`]
    /// without touching anything.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StoreError::NotFound);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let location = current.by_id.get(id).cloned().ok_or(StoreError::NotFound)?;
        let remaining = self
            .remove_from_bucket(location.week, location.list, id)?
            .ok_or(StoreError::NotFound)?;

        let mut next = (*current).clone();
        next.set_count(location.week, location.list, remaining);
        next.remove_record(id);
        let version = self.commit(next)?;
        debug!("Deleted {} from {}/{} (v{})", id, location.week, location.list, version);
        Ok(())
    }

    /// Re-derives the whole index from the bucket files on disk.
    ///
    /// Returns whether any records were found. The rebuilt index is persisted
    /// only when it holds records.
    pub fn rebuild_from_files(&self) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let mut next = Index {
            state_version: current.state_version,
            ..Default::default()
        };

        let mut found = false;
        for week in self.layout.week_dirs()? {
            next.ensure_week(week);
            for list in ListType::ALL {
                let records = self.layout.load_bucket(week, list);
                if records.is_empty() {
                    continue;
                }
                found = true;
                next.set_count(week, list, records.len());
                for record in &records {
                    next.insert_record(record, week, list);
                }
            }
        }

        info!(
            "Rebuilt index from {}: {} records across {} weeks",
            self.root().display(),
            next.by_id.len(),
            next.weeks.len()
        );
        if found {
            self.commit(next)?;
        } else {
            self.swap(next);
        }
        Ok(found)
    }

    /// Records of the given weeks (latest week when empty), grouped by list.
    /// Each record carries the week of the bucket it was read from.
    pub fn read(&self, weeks: &[NaiveDate]) -> Result<GroupedRecords, StoreError> {
        let weeks = if weeks.is_empty() {
            vec![self.latest_week()?]
        } else {
            weeks.to_vec()
        };

        let mut grouped: GroupedRecords = ListType::ALL.iter().map(|lt| (*lt, Vec::new())).collect();
        for week in weeks {
            for list in ListType::ALL {
                let records = self.layout.load_bucket(week, list);
                grouped.entry(list).or_default().extend(records.into_iter().map(|mut record| {
                    record.week_end = Some(week);
                    record
                }));
            }
        }
        Ok(grouped)
    }

    /// Same as [`read`](Self::read), flattened in list order.
    pub fn read_flat(&self, weeks: &[NaiveDate]) -> Result<Vec<StockRecord>, StoreError> {
        Ok(self.read(weeks)?.into_values().flatten().collect())
    }

    /// Looks a record up through the index and loads it from its bucket.
    pub fn get(&self, id: &str) -> Option<(Location, StockRecord)> {
        let id = id.trim();
        let location = self.snapshot().by_id.get(id).cloned()?;
        let record = self
            .layout
            .load_bucket(location.week, location.list)
            .into_iter()
            .find(|record| record.id.trim() == id)?;
        Some((location, record))
    }

    /// Most recent record for a symbol, ordered by reference date then week.
    ///
    /// Falls back to scanning the latest week when the index has no entry,
    /// which covers bucket files edited by hand.
    pub fn latest_for_symbol(&self, symbol: &str) -> Result<Option<StockRecord>, StoreError> {
        let index = self.snapshot();
        if let Some(entry) = index.latest_for_symbol(symbol) {
            let record = self
                .layout
                .load_bucket(entry.location.week, entry.location.list)
                .into_iter()
                .find(|record| record.id.trim() == entry.id);
            return Ok(record);
        }

        let candidates = self
            .read_flat(&[])?
            .into_iter()
            .filter(|record| record.symbol.trim().eq_ignore_ascii_case(symbol));
        Ok(candidates.max_by_key(|record| (record.reference_date(), record.week_end)))
    }

    /// Records whose symbol contains `query`, sorted by symbol, at most ten.
    pub fn search(
        &self,
        query: &str,
        list: Option<ListType>,
        weeks: &[NaiveDate],
    ) -> Result<Vec<StockRecord>, StoreError> {
        let query = query.trim().to_uppercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches: Vec<StockRecord> = self
            .read_flat(weeks)?
            .into_iter()
            .filter(|record| list.is_none_or(|lt| record.list_type == lt))
            .filter(|record| {
                let symbol = record.symbol.trim().to_uppercase();
                !symbol.is_empty() && symbol.contains(&query)
            })
            .collect();
        matches.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        matches.truncate(MAX_SEARCH_RESULTS);
        Ok(matches)
    }

    /// Known weeks, newest first.
    pub fn weeks(&self) -> Vec<WeekSummary> {
        let index = self.snapshot();
        index
            .weeks_desc()
            .into_iter()
            .map(|week_end| WeekSummary {
                week_end,
                week_label: index
                    .weeks
                    .get(&week_end)
                    .map(|bucket| bucket.label.clone())
                    .filter(|label| !label.is_empty())
                    .unwrap_or_else(|| week::week_label(week_end)),
            })
            .collect()
    }

    /// Latest known week; registers the current week when none is known.
    pub fn latest_week(&self) -> Result<NaiveDate, StoreError> {
        match self.snapshot().latest_week {
            Some(week) => Ok(week),
            None => self.register_week(current_week()?),
        }
    }

    /// Known weeks named by a raw `week` parameter, else the latest known
    /// week. Never writes; empty only when no week is known at all.
    pub fn known_weeks(&self, raw: Option<&str>) -> Vec<NaiveDate> {
        let index = self.snapshot();
        let selected = week::select_weeks(raw.unwrap_or_default(), &index.weeks);
        if selected.is_empty() {
            index.latest_week.into_iter().collect()
        } else {
            selected
        }
    }

    /// Like [`known_weeks`](Self::known_weeks), registering the current week
    /// when the store knows none.
    pub fn resolve_weeks(&self, raw: Option<&str>) -> Result<Vec<NaiveDate>, StoreError> {
        let weeks = self.known_weeks(raw);
        if weeks.is_empty() {
            Ok(vec![self.latest_week()?])
        } else {
            Ok(weeks)
        }
    }

    fn register_week(&self, week: NaiveDate) -> Result<NaiveDate, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        if let Some(latest) = current.latest_week {
            return Ok(latest);
        }
        // The directory keeps the week discoverable by a rebuild
        self.layout.ensure_week_dir(week)?;
        let mut next = (*current).clone();
        next.ensure_week(week);
        self.commit(next)?;
        Ok(week)
    }

    /// Drops `id` from a bucket file. Returns the remaining count, or `None`
    /// when the record was not in that bucket.
    fn remove_from_bucket(
        &self,
        week: NaiveDate,
        list: ListType,
        id: &str,
    ) -> Result<Option<usize>, StoreError> {
        let rows = self.layout.load_rows(week, list);
        let before = rows.len();
        let remaining: Vec<serde_json::Value> = rows
            .into_iter()
            .filter(|row| row_id(row).as_deref() != Some(id))
            .collect();
        if remaining.len() == before {
            return Ok(None);
        }
        self.layout.save_rows(week, list, &remaining)?;
        Ok(Some(remaining.len()))
    }

    /// Bumps the version, writes `index.json`, then publishes the new index.
    fn commit(&self, mut next: Index) -> Result<u64, StoreError> {
        next.state_version += 1;
        let payload = self.layout.codec().encode(&next)?;
        atomic_write(&self.layout.index_path(), &payload)?;
        let version = next.state_version;
        self.swap(next);
        Ok(version)
    }

    fn swap(&self, next: Index) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

fn load_index(layout: &DiskLayout) -> Index {
    let path = layout.index_path();
    match fs::read(&path) {
        Ok(bytes) => layout.codec().decode(&bytes).unwrap_or_else(|e| {
            warn!("Index {} is unreadable, starting empty: {}", path.display(), e);
            Index::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Index::default(),
        Err(e) => {
            warn!("Failed to read index {}: {}", path.display(), e);
            Index::default()
        }
    }
}
