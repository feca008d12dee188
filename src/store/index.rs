use crate::core::record::{ListType, StockRecord};
use crate::core::week::week_label;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a record lives and the fields needed to order it without opening
/// its bucket file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub week: NaiveDate,
    pub list: ListType,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub date_added: Option<NaiveDate>,
    #[serde(default)]
    pub date_spotted: Option<NaiveDate>,
}

impl Location {
    pub fn for_record(record: &StockRecord, week: NaiveDate, list: ListType) -> Self {
        Self {
            week,
            list,
            symbol: record.symbol.trim().to_uppercase(),
            date_added: record.date_added,
            date_spotted: record.date_spotted,
        }
    }

    pub fn same_bucket(&self, week: NaiveDate, list: ListType) -> bool {
        self.week == week && self.list == list
    }

    /// Ordering key within a symbol: reference date, then week.
    fn sort_key(&self) -> (NaiveDate, NaiveDate) {
        let reference = self.date_spotted.or(self.date_added).unwrap_or(self.week);
        (reference, self.week)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub id: String,
    #[serde(flatten)]
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListCount {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekBucket {
    pub label: String,
    #[serde(default)]
    pub lists: BTreeMap<ListType, ListCount>,
}

impl WeekBucket {
    fn new(week_end: NaiveDate) -> Self {
        Self {
            label: week_label(week_end),
            lists: ListType::ALL
                .iter()
                .map(|lt| (*lt, ListCount::default()))
                .collect(),
        }
    }

    pub fn count(&self, list: ListType) -> usize {
        self.lists.get(&list).map_or(0, |c| c.count)
    }
}

/// Derived lookup structures over every bucket file.
///
/// Everything here can be rebuilt from the bucket files alone; `index.json`
/// is only a cache of it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub by_id: BTreeMap<String, Location>,
    #[serde(default)]
    pub by_symbol: BTreeMap<String, Vec<SymbolEntry>>,
    #[serde(default)]
    pub weeks: BTreeMap<NaiveDate, WeekBucket>,
    #[serde(default)]
    pub latest_week: Option<NaiveDate>,
    #[serde(default)]
    pub state_version: u64,
}

impl Index {
    /// Registers a week if it is new. Week buckets are never removed.
    pub fn ensure_week(&mut self, week_end: NaiveDate) {
        let bucket = self
            .weeks
            .entry(week_end)
            .or_insert_with(|| WeekBucket::new(week_end));
        for lt in ListType::ALL {
            bucket.lists.entry(lt).or_default();
        }
        if self.latest_week.is_none_or(|latest| week_end > latest) {
            self.latest_week = Some(week_end);
        }
    }

    pub fn set_count(&mut self, week_end: NaiveDate, list: ListType, count: usize) {
        self.ensure_week(week_end);
        if let Some(bucket) = self.weeks.get_mut(&week_end) {
            bucket.lists.insert(list, ListCount { count });
        }
    }

    /// Adds or moves a record in `by_id` and `by_symbol`.
    pub fn insert_record(&mut self, record: &StockRecord, week: NaiveDate, list: ListType) {
        let id = record.id.trim();
        if id.is_empty() {
            return;
        }
        self.remove_record(id);

        let location = Location::for_record(record, week, list);
        self.by_id.insert(id.to_string(), location.clone());
        if location.symbol.is_empty() {
            return;
        }
        let entries = self.by_symbol.entry(location.symbol.clone()).or_default();
        entries.push(SymbolEntry {
            id: id.to_string(),
            location,
        });
        entries.sort_by(|a, b| {
            a.location
                .sort_key()
                .cmp(&b.location.sort_key())
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    pub fn remove_record(&mut self, id: &str) -> Option<Location> {
        let location = self.by_id.remove(id)?;
        if let Some(entries) = self.by_symbol.get_mut(&location.symbol) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                self.by_symbol.remove(&location.symbol);
            }
        }
        Some(location)
    }

    /// Most recent entry for a symbol by reference date, then week.
    pub fn latest_for_symbol(&self, symbol: &str) -> Option<&SymbolEntry> {
        self.by_symbol.get(symbol).and_then(|entries| entries.last())
    }

    /// Known week ends, newest first.
    pub fn weeks_desc(&self) -> Vec<NaiveDate> {
        self.weeks.keys().rev().copied().collect()
    }

    /// Index contents ignoring the version counter and cached latest week,
    /// i.e. the part that must be reproducible from the bucket files.
    pub fn same_contents(&self, other: &Index) -> bool {
        self.by_id == other.by_id && self.by_symbol == other.by_symbol && self.weeks == other.weeks
    }
}
