use ai::{HashMap, Tool, Value, create_tool, json};
use db::Category;

use crate::dispatcher::ToolName;

/// Tool descriptors for every [`ToolName`], in registration order
pub fn definitions() -> Vec<Tool> {
    ToolName::ALL.into_iter().map(ToolName::definition).collect()
}

pub(crate) fn query_tool() -> Tool {
    create_tool(
        ToolName::QueryDb.as_str(),
        "Execute a single read-only SQL query (SELECT or WITH) against the SQLite patient database and return the rows as JSON. \
         Write statements and multiple statements are rejected. Results are capped; `truncated` tells whether rows were cut off.",
        parameters(json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "The SQL SELECT query to execute.",
                },
            },
            "required": ["sql"],
        })),
    )
}

pub(crate) fn schema_tool() -> Tool {
    create_tool(
        ToolName::GetDbSchema.as_str(),
        "Return every table in the database with its columns and their declared types. Call this before writing SQL.",
        parameters(json!({
            "type": "object",
            "properties": {},
            "required": [],
        })),
    )
}

pub(crate) fn patient_data_tool() -> Tool {
    let categories: Vec<&str> = Category::names().collect();
    create_tool(
        ToolName::GetPatientData.as_str(),
        format!(
            "Retrieve one category of records for a patient, oldest first, optionally limited to a date range. \
             Available categories: {}.",
            categories.join(", ")
        ),
        parameters(json!({
            "type": "object",
            "properties": {
                "patient_id": {
                    "type": "string",
                    "description": "Unique patient identifier (the Id column of the patients table).",
                },
                "category": {
                    "type": "string",
                    "enum": categories,
                    "description": "Which kind of records to retrieve.",
                },
                "start_date": {
                    "type": "string",
                    "description": "Start of the date range, YYYY-MM-DD, inclusive. Must be provided with end_date.",
                },
                "end_date": {
                    "type": "string",
                    "description": "End of the date range, YYYY-MM-DD, inclusive. Must be provided with start_date.",
                },
            },
            "required": ["patient_id", "category"],
        })),
    )
}

fn parameters(schema: Value) -> HashMap<String, Value> {
    match schema {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}
