use agent::{ToolOutput, ToolResult};
use ai::ToolCallInfo;
use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use db::{DatabaseResult, TableCatalog};
use serde_json::Value;

/// Rows beyond this are summarized instead of printed
const MAX_DISPLAY_ROWS: usize = 25;

pub(crate) fn tool_call(call: &ToolCallInfo) -> String {
    let arguments = if call.arguments.trim().is_empty() {
        "{}"
    } else {
        call.arguments.as_str()
    };
    format!("{} {} {}", "[tool]".yellow(), call.name.bold(), arguments.dimmed())
}

pub(crate) fn tool_result(result: &ToolResult) -> String {
    match &result.outcome {
        Ok(ToolOutput::Rows(rows)) => rows_table(rows),
        Ok(ToolOutput::Schema(catalog)) => schema_table(catalog),
        Err(err) => format!("{} {}", format!("[{}]", err.kind()).red(), err),
    }
}

pub(crate) fn rows_table(result: &DatabaseResult) -> String {
    if result.is_empty() {
        return "(no rows)".to_string();
    }

    let mut table = new_table();
    table.set_header(result.headers.iter().map(|header| header.name.as_str()));
    for row in result.rows.iter().take(MAX_DISPLAY_ROWS) {
        table.add_row(row.values().map(cell));
    }

    let mut rendered = table.to_string();
    let hidden = result.len().saturating_sub(MAX_DISPLAY_ROWS);
    if hidden > 0 {
        rendered.push_str(&format!("\n... {hidden} more rows"));
    }
    rendered.push_str(&format!("\n({} rows{})", result.len(), if result.truncated { ", truncated" } else { "" }));
    rendered
}

pub(crate) fn schema_table(catalog: &TableCatalog) -> String {
    if catalog.is_empty() {
        return "(no tables)".to_string();
    }

    let mut table = new_table();
    table.set_header(["table", "columns"]);
    for schema in &catalog.tables {
        let columns = schema
            .columns
            .iter()
            .map(|column| format!("{} {}", column.name, column.type_name))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row([schema.name.clone(), columns]);
    }
    table.to_string()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
