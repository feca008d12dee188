//! Core business logic abstractions

pub mod config;
pub mod log;
pub mod price;
pub mod record;
pub mod week;

// Re-export main types for cleaner imports
pub use price::{PriceFetcher, PriceMap, normalize_symbol, percent_change};
pub use record::{ListType, StockRecord};
