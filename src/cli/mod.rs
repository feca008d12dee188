//! Terminal front-end for maintenance commands.

pub mod setup;
pub mod ui;
pub mod watchlist;
pub mod weeks;

use crate::store::WatchlistStore;
use anyhow::Result;

/// Rebuilds `index.json` from the bucket files and reports what was found.
pub fn rebuild(store: &WatchlistStore) -> Result<()> {
    let found = store.rebuild_from_files()?;
    let index = store.snapshot();
    if found {
        println!(
            "{} {} records across {} weeks (version {})",
            ui::style_text("Rebuilt index:", ui::StyleType::TotalLabel),
            ui::style_text(&index.by_id.len().to_string(), ui::StyleType::TotalValue),
            index.weeks.len(),
            index.state_version
        );
    } else {
        println!(
            "{}",
            ui::style_text(
                &format!("No bucket files found under {}", store.root().display()),
                ui::StyleType::Subtle
            )
        );
    }
    Ok(())
}
