//! Watchlist records and their normalization rules

use crate::core::price::normalize_symbol;
use crate::core::week;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// The four watchlists a record can live in.
///
/// Ordering follows the fixed display order: A, B, PA, PB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Default)]
pub enum ListType {
    A,
    #[default]
    B,
    PA,
    PB,
}

impl ListType {
    pub const ALL: [ListType; 4] = [ListType::A, ListType::B, ListType::PA, ListType::PB];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListType::A => "A",
            ListType::B => "B",
            ListType::PA => "PA",
            ListType::PB => "PB",
        }
    }

    /// Lenient parse: anything outside the four known lists lands in B.
    pub fn coerce(value: &str) -> ListType {
        value.parse().unwrap_or_default()
    }
}

impl Display for ListType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(ListType::A),
            "B" => Ok(ListType::B),
            "PA" => Ok(ListType::PA),
            "PB" => Ok(ListType::PB),
            _ => Err(anyhow::anyhow!("Invalid list type: {}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for ListType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.as_str().map(ListType::coerce).unwrap_or_default())
    }
}

/// A single watchlist entry as stored in a bucket file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StockRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub symbol: String,
    #[serde(default, deserialize_with = "lenient_price")]
    pub initial_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: String,
    #[serde(default, with = "lenient_date")]
    pub date_spotted: Option<NaiveDate>,
    #[serde(default, with = "lenient_date")]
    pub date_bought: Option<NaiveDate>,
    #[serde(default, with = "lenient_date")]
    pub date_added: Option<NaiveDate>,
    #[serde(default)]
    pub list_type: ListType,
    #[serde(default, with = "lenient_date")]
    pub week_end: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub week_label: String,
    /// Fields this version does not know about, kept so rewrites are lossless.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StockRecord {
    /// Date used to place the record in a week: spotted, else added.
    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.date_spotted.or(self.date_added)
    }

    /// Fills `date_added`, `week_end` and `week_label` from the reference date,
    /// falling back to `today` when the record carries no dates at all.
    pub fn apply_week_defaults(&mut self, today: NaiveDate) -> Result<(), String> {
        let base = self.reference_date().unwrap_or(today);
        let end = week::week_end(base).ok_or_else(|| format!("date {base} is out of range"))?;
        if self.date_added.is_none() {
            self.date_added = Some(base);
        }
        self.week_end = Some(end);
        self.week_label = week::week_label(end);
        Ok(())
    }

    /// Validates and canonicalizes a record before it is written.
    ///
    /// The symbol is required; the list type was already coerced on the way
    /// in; a fresh id is assigned when missing.
    pub fn normalized(mut self, today: NaiveDate) -> Result<Self, String> {
        self.symbol = normalize_symbol(&self.symbol).ok_or("symbol is required")?;
        self.id = self.id.trim().to_string();
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self.reason = self.reason.trim().to_string();
        self.apply_week_defaults(today)?;
        Ok(self)
    }
}

/// Trimmed id of a raw bucket row, read the same way as [`StockRecord::id`].
pub fn row_id(row: &serde_json::Value) -> Option<String> {
    row.get("id")
        .and_then(text_value)
        .map(|id| id.trim().to_string())
}

fn text_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts strings, numbers and booleans as text; null and nested values
/// read as empty.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(text_value).unwrap_or_default())
}

/// Accepts a JSON number or a numeric string.
fn lenient_price<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| parse_price(&v)))
}

/// Reads a price out of an arbitrary JSON value.
pub fn parse_price(value: &serde_json::Value) -> Option<f64> {
    let price = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    price.filter(|p| p.is_finite())
}

/// Dates are stored as `YYYY-MM-DD`; empty strings and malformed values read
/// back as absent.
mod lenient_date {
    use crate::core::week::parse_date;
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => serializer.collect_str(&date.format("%Y-%m-%d")),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(serde_json::Value::String(s)) => parse_date(&s),
            _ => None,
        })
    }
}
