use super::ui;
use crate::core::price::{PriceFetcher, PriceMap, normalize_symbol, percent_change};
use crate::core::record::StockRecord;
use crate::store::WatchlistStore;
use anyhow::Result;
use comfy_table::{Cell, Table};
use tracing::warn;

/// Prints every list of the selected weeks with live prices.
pub async fn run(store: &WatchlistStore, fetcher: &dyn PriceFetcher, week: Option<&str>) -> Result<()> {
    let weeks = store.known_weeks(week);
    if weeks.is_empty() {
        println!("No weeks recorded yet.");
        return Ok(());
    }
    let grouped = store.read(&weeks)?;

    let mut symbols: Vec<String> = Vec::new();
    for record in grouped.values().flatten() {
        if let Some(symbol) = normalize_symbol(&record.symbol) {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
    }

    let prices = if symbols.is_empty() {
        PriceMap::new()
    } else {
        let pb = ui::new_spinner(&format!("Fetching {} prices", symbols.len()));
        let result = fetcher.fetch_prices(&symbols).await;
        pb.finish_and_clear();
        result.unwrap_or_else(|e| {
            warn!("Price fetch failed, showing stored data only: {e}");
            PriceMap::new()
        })
    };

    let labels: Vec<String> = weeks.iter().map(|w| w.to_string()).collect();
    println!(
        "\nWatchlist for {}",
        ui::style_text(&labels.join(", "), ui::StyleType::Title)
    );
    for (list, records) in &grouped {
        println!(
            "\n{} {}",
            ui::style_text(&format!("List {list}"), ui::StyleType::TotalLabel),
            ui::style_text(&format!("({} stocks)", records.len()), ui::StyleType::Subtle)
        );
        if records.is_empty() {
            continue;
        }
        println!("{}", list_table(records, &prices));
    }
    Ok(())
}

fn list_table(records: &[StockRecord], prices: &PriceMap) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Spotted"),
        ui::header_cell("Initial"),
        ui::header_cell("Current"),
        ui::header_cell("Change"),
        ui::header_cell("Reason"),
    ]);

    for record in records {
        let symbol = normalize_symbol(&record.symbol).unwrap_or_default();
        let current = prices.get(&symbol).copied().flatten();
        table.add_row(vec![
            Cell::new(&symbol),
            ui::format_optional_cell(record.date_spotted, |d| d.to_string()),
            ui::format_optional_cell(record.initial_price, |p| format!("{p:.2}")),
            ui::format_optional_cell(current, |p| format!("{p:.2}")),
            ui::change_cell(percent_change(record.initial_price, current)),
            Cell::new(&record.reason),
        ]);
    }
    table
}
