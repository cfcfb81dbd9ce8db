/// Table formatting for query results using comfy-table

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use llink_core::Row;
use serde_json::Value;

/// Format rows as a table.
///
/// Columns follow the order they first appear in, so a `SELECT` prints
/// in its own column order.
pub fn format_rows_table(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No rows".to_string();
    }

    let mut columns: Vec<&String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key) {
                columns.push(key);
            }
        }
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(columns.iter().map(|c| Cell::new(c)).collect::<Vec<_>>());

    for row in rows {
        let cells = columns
            .iter()
            .map(|col| match row.get(col.as_str()) {
                Some(value) => Cell::new(format_value(value)),
                None => Cell::new("-"),
            })
            .collect::<Vec<_>>();
        table.add_row(cells);
    }

    table.to_string()
}

/// Two-column table of labels and values, for status output
pub fn format_pairs_table(pairs: &[(&str, String)]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    for (label, value) in pairs {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    table.to_string()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
