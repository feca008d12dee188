//! Pricing abstractions and core types

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Latest known price per symbol. `None` means the upstream had no quote.
pub type PriceMap = HashMap<String, Option<f64>>;

/// Batch price lookup against an upstream quote source.
///
/// Implementations receive normalized symbols and either answer for the whole
/// batch or fail as a whole; callers never see a partially applied batch.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceMap>;
}

/// Trims and uppercases a ticker symbol. Returns `None` for blank input.
pub fn normalize_symbol(symbol: &str) -> Option<String> {
    let normalized = symbol.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Percentage move from `initial` to `current`.
///
/// Absent when either side is missing or zero.
pub fn percent_change(initial: Option<f64>, current: Option<f64>) -> Option<f64> {
    match (initial, current) {
        (Some(initial), Some(current)) if initial != 0.0 && current != 0.0 => {
            let change = (current - initial) / initial * 100.0;
            change.is_finite().then_some(change)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" aapl "), Some("AAPL".to_string()));
        assert_eq!(normalize_symbol("brk.b"), Some("BRK.B".to_string()));
        assert_eq!(normalize_symbol("   "), None);
        assert_eq!(normalize_symbol(""), None);
    }

    #[test]
    fn test_percent_change() {
        let change = percent_change(Some(100.0), Some(110.0)).unwrap();
        assert!((change - 10.0).abs() < 1e-9);

        let change = percent_change(Some(200.0), Some(150.0)).unwrap();
        assert!((change + 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_change_missing_inputs() {
        assert_eq!(percent_change(None, Some(10.0)), None);
        assert_eq!(percent_change(Some(10.0), None), None);
        assert_eq!(percent_change(Some(0.0), Some(10.0)), None);
        assert_eq!(percent_change(Some(10.0), Some(0.0)), None);
    }
}
