use super::ui;
use crate::core::record::ListType;
use crate::store::WatchlistStore;
use crate::store::index::Index;
use comfy_table::{Cell, Table};

pub fn run(store: &WatchlistStore) {
    let index = store.snapshot();
    if index.weeks.is_empty() {
        println!("No weeks recorded yet.");
        return;
    }

    println!("\n{}", ui::style_text("Weeks", ui::StyleType::Title));
    println!("{}", weeks_table(&index));
    println!(
        "{} {}",
        ui::style_text("Records:", ui::StyleType::TotalLabel),
        ui::style_text(&index.by_id.len().to_string(), ui::StyleType::TotalValue)
    );
}

/// One row per known week, newest first, with per-list record counts.
fn weeks_table(index: &Index) -> Table {
    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("Week"), ui::header_cell("Label")];
    header.extend(ListType::ALL.iter().map(|lt| ui::header_cell(lt.as_str())));
    header.push(ui::header_cell("Total"));
    table.set_header(header);

    for week in index.weeks_desc() {
        let Some(bucket) = index.weeks.get(&week) else {
            continue;
        };
        let mut row = vec![Cell::new(week), Cell::new(&bucket.label)];
        row.extend(ListType::ALL.iter().map(|lt| ui::count_cell(bucket.count(*lt))));
        row.push(ui::count_cell(
            ListType::ALL.iter().map(|lt| bucket.count(*lt)).sum(),
        ));
        table.add_row(row);
    }
    table
}
