use comfy_table::{presets::NOTHING, Attribute, Cell, ContentArrangement, Table};
use serde_json::Value;

use crate::response::ResultTable;

const MAX_CELL_WIDTH: usize = 60;

fn styled_table() -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Disabled);
    table
}

fn header(text: &str) -> Cell {
    Cell::new(text)
        .add_attribute(Attribute::Bold)
        .add_attribute(Attribute::Dim)
}

/// Truncate text to `max_len` characters with an ellipsis.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => truncate(s, MAX_CELL_WIDTH),
        other => truncate(&other.to_string(), MAX_CELL_WIDTH),
    }
}

/// Renders a result table for the terminal: bold dim headers, no borders.
pub fn render_result_table(result: &ResultTable) -> String {
    let mut table = styled_table();
    table.set_header(result.columns.iter().map(|c| header(&c.name)));
    for row in &result.rows {
        table.add_row(row.iter().map(cell_text));
    }
    for i in 0..table.column_count() {
        if let Some(col) = table.column_mut(i) {
            col.set_padding((0, 3));
        }
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Column;
    use serde_json::json;

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }

    #[test]
    fn renders_headers_and_values() {
        let table = ResultTable {
            name: "PrimaryResult".to_string(),
            columns: vec![
                Column {
                    name: "name".to_string(),
                    kind: None,
                },
                Column {
                    name: "count".to_string(),
                    kind: None,
                },
            ],
            rows: vec![vec![json!("send_edition"), json!(3)], vec![Value::Null, json!(1.5)]],
        };
        let rendered = render_result_table(&table);
        assert!(rendered.contains("name"));
        assert!(rendered.contains("send_edition"));
        assert!(rendered.contains("1.5"));
        assert!(rendered.contains('-'));
    }
}
