//! Week bucket arithmetic.
//!
//! Every record belongs to the week ending on the Sunday of the ISO week that
//! contains its reference date. Week ends double as bucket directory names.

use chrono::{Datelike, Duration, NaiveDate};
use std::collections::{BTreeMap, HashSet};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a `YYYY-MM-DD` date, ignoring surrounding whitespace.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

/// Sunday closing the ISO week that contains `date`, or `None` when that
/// Sunday falls outside the representable calendar.
pub fn week_end(date: NaiveDate) -> Option<NaiveDate> {
    let back = Duration::days(i64::from(date.weekday().num_days_from_monday()));
    date.checked_sub_signed(back)?
        .checked_add_signed(Duration::days(6))
}

/// Display label for a week, e.g. `Week of 01/07/24`.
pub fn week_label(week_end: NaiveDate) -> String {
    format!("Week of {}", week_end.format("%m/%d/%y"))
}

/// Maps any date string onto the end of its week.
pub fn normalize_week_value(value: &str) -> Option<NaiveDate> {
    parse_date(value).and_then(week_end)
}

/// Week ends bounding a `start..end` range, ordered regardless of argument
/// order.
pub fn week_range_bounds(start: &str, end: &str) -> Option<(NaiveDate, NaiveDate)> {
    let start = normalize_week_value(start)?;
    let end = normalize_week_value(end)?;
    Some(if start <= end { (start, end) } else { (end, start) })
}

/// Resolves a `week` query parameter against the weeks in `known`.
///
/// Accepts a comma separated list of dates and `start..end` or `start:end`
/// ranges. Every entry is mapped to its week end and kept only when known.
/// Ranges are walked over `known` rather than stepped week by week, so their
/// width does not matter. Duplicates keep their first position and
/// unparseable entries are dropped.
pub fn select_weeks<V>(raw: &str, known: &BTreeMap<NaiveDate, V>) -> Vec<NaiveDate> {
    let mut seen = HashSet::new();
    let mut weeks = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = part.split_once("..").or_else(|| part.split_once(':'));
        let matched: Vec<NaiveDate> = match range {
            Some((start, end)) => week_range_bounds(start, end)
                .map(|(first, last)| known.range(first..=last).map(|(week, _)| *week).collect())
                .unwrap_or_default(),
            None => normalize_week_value(part)
                .filter(|week| known.contains_key(week))
                .into_iter()
                .collect(),
        };
        for week in matched {
            if seen.insert(week) {
                weeks.push(week);
            }
        }
    }
    weeks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_week_end_mid_week() {
        // 2024-01-03 is a Wednesday
        assert_eq!(week_end(date("2024-01-03")), Some(date("2024-01-07")));
    }

    #[test]
    fn test_week_end_boundaries() {
        assert_eq!(week_end(date("2024-01-01")), Some(date("2024-01-07")));
        assert_eq!(week_end(date("2024-01-07")), Some(date("2024-01-07")));
        assert_eq!(week_end(date("2024-01-08")), Some(date("2024-01-14")));
        // Crosses a year boundary
        assert_eq!(week_end(date("2024-12-31")), Some(date("2025-01-05")));
    }

    #[test]
    fn test_week_end_is_idempotent() {
        let mut day = date("2023-12-20");
        for _ in 0..30 {
            let end = week_end(day).unwrap();
            assert_eq!(week_end(end), Some(end));
            assert_eq!(end.weekday(), chrono::Weekday::Sun);
            day += Duration::days(1);
        }
    }

    #[test]
    fn test_week_label() {
        assert_eq!(week_label(date("2024-01-07")), "Week of 01/07/24");
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("not-a-date").is_none());
        assert!(parse_date("").is_none());
        assert_eq!(parse_date(" 2024-02-29 "), Some(date("2024-02-29")));
    }

    #[test]
    fn test_week_end_at_calendar_edges() {
        assert_eq!(week_end(NaiveDate::MAX), None);
        assert!(normalize_week_value("+262142-12-31").is_none());
    }

    #[test]
    fn test_week_range_bounds_any_order() {
        let expected = Some((date("2024-01-07"), date("2024-01-21")));
        assert_eq!(week_range_bounds("2024-01-02", "2024-01-16"), expected);
        assert_eq!(week_range_bounds("2024-01-16", "2024-01-02"), expected);
        assert!(week_range_bounds("2024-01-02", "bogus").is_none());
    }

    fn known(weeks: &[&str]) -> BTreeMap<NaiveDate, ()> {
        weeks.iter().map(|w| (date(w), ())).collect()
    }

    #[test]
    fn test_select_weeks() {
        let known = known(&["2023-12-31", "2024-01-07", "2024-01-14", "2024-01-21"]);

        let weeks = select_weeks("2024-01-03, 2024-01-05,2024-01-08..2024-01-15,bogus", &known);
        assert_eq!(weeks, vec![date("2024-01-07"), date("2024-01-14"), date("2024-01-21")]);

        let weeks = select_weeks("2024-01-20:2024-01-10", &known);
        assert_eq!(weeks, vec![date("2024-01-14"), date("2024-01-21")]);

        // Unknown weeks are dropped
        assert!(select_weeks("1999-01-01", &known).is_empty());
        assert!(select_weeks("", &known).is_empty());
        assert!(select_weeks(" , ", &known).is_empty());
    }

    #[test]
    fn test_select_weeks_extreme_input() {
        let known = known(&["2024-01-07", "2024-01-14"]);

        let weeks = select_weeks("0001-01-01..9999-12-31", &known);
        assert_eq!(weeks, vec![date("2024-01-07"), date("2024-01-14")]);

        assert!(select_weeks("+262142-12-31", &known).is_empty());
        assert!(select_weeks("-262143-01-01..+262142-12-31", &known).is_empty());
    }
}
