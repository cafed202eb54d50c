//! Routes model-issued tool calls to the data store.
//!
//! A call is resolved against the closed [`ToolName`] set, its JSON arguments
//! are decoded into the tool's typed argument record, the store operation runs,
//! and the outcome (rows, catalog or error) becomes a [`ToolResult`]. Every
//! path ends in a `ToolResult`; nothing here returns an error to the caller.

use std::fmt;
use std::str::FromStr;

use ai::{Tool, ToolCallInfo};
use db::{Category, Database, DatabaseResult, DateRange, PatientDataRequest, TableCatalog};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::tools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    QueryDb,
    GetDbSchema,
    GetPatientData,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [ToolName::QueryDb, ToolName::GetDbSchema, ToolName::GetPatientData];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::QueryDb => "query_db",
            ToolName::GetDbSchema => "get_db_schema",
            ToolName::GetPatientData => "get_patient_data",
        }
    }

    /// The descriptor registered with the model
    pub fn definition(self) -> Tool {
        match self {
            ToolName::QueryDb => tools::query_tool(),
            ToolName::GetDbSchema => tools::schema_tool(),
            ToolName::GetPatientData => tools::patient_data_tool(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ToolError::Dispatch(s.to_string()))
    }
}

#[derive(Debug, serde::Deserialize)]
struct QueryDbArgs {
    #[serde(alias = "query")]
    sql: String,
}

#[derive(Debug, serde::Deserialize)]
struct GetPatientDataArgs {
    patient_id: String,
    category: String,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

/// Successful tool output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Rows(DatabaseResult),
    Schema(TableCatalog),
}

#[derive(Debug)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub outcome: Result<ToolOutput, ToolError>,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// `{"success": true, "result": ..}` or
    /// `{"success": false, "error": {"kind": .., "message": ..}}`
    pub fn payload(&self) -> Value {
        match &self.outcome {
            Ok(output) => json!({
                "success": true,
                "result": output,
            }),
            Err(err) => json!({
                "success": false,
                "error": {
                    "kind": err.kind(),
                    "message": err.to_string(),
                },
            }),
        }
    }

    /// Text placed in the transcript as the `tool` message content
    pub fn to_content(&self) -> String {
        self.payload().to_string()
    }
}

#[derive(Debug)]
pub struct ToolDispatcher<D> {
    database: D,
}

impl<D: Database> ToolDispatcher<D> {
    pub fn new(database: D) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn into_database(self) -> D {
        self.database
    }

    pub async fn dispatch(&mut self, call: &ToolCallInfo) -> ToolResult {
        let outcome = self.run(call).await;

        match &outcome {
            Ok(_) => debug!(tool = %call.name, id = %call.id, "tool call succeeded"),
            Err(err) => warn!(
                tool = %call.name,
                id = %call.id,
                kind = err.kind(),
                "tool call failed: {err}"
            ),
        }

        ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            outcome,
        }
    }

    /// Calls are independent, they run one after the other in the order given
    pub async fn dispatch_all(&mut self, calls: &[ToolCallInfo]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.dispatch(call).await);
        }
        results
    }

    async fn run(&mut self, call: &ToolCallInfo) -> Result<ToolOutput, ToolError> {
        let name: ToolName = call.name.parse()?;
        let arguments = parse_arguments(name, &call.arguments)?;
        debug!(tool = %name, "dispatching");

        match name {
            ToolName::QueryDb => {
                let args: QueryDbArgs = decode(name, arguments)?;
                let rows = self.database.get_results(&args.sql).await?;
                Ok(ToolOutput::Rows(rows))
            }
            ToolName::GetDbSchema => {
                let catalog = self.database.get_schema().await?;
                Ok(ToolOutput::Schema(catalog))
            }
            ToolName::GetPatientData => {
                let args: GetPatientDataArgs = decode(name, arguments)?;
                let category: Category = args.category.parse()?;
                let date_range =
                    DateRange::parse(args.start_date.as_deref(), args.end_date.as_deref())?;
                let request =
                    PatientDataRequest::new(args.patient_id, category).with_date_range(date_range);
                let rows = self.database.get_patient_data(&request).await?;
                Ok(ToolOutput::Rows(rows))
            }
        }
    }
}

/// Models send an empty string for tools without parameters
fn parse_arguments(tool: ToolName, raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let value: Value = serde_json::from_str(raw).map_err(|err| {
        ToolError::argument(tool.as_str(), format!("arguments are not valid JSON: {err}"))
    })?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(ToolError::argument(
            tool.as_str(),
            "arguments must be a JSON object",
        ))
    }
}

/// Type errors name the offending field, serde alone only says what it expected
fn decode<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> Result<T, ToolError> {
    serde_path_to_error::deserialize(arguments).map_err(|err| {
        let field = err.path().to_string();
        let message = if field == "." {
            err.inner().to_string()
        } else {
            format!("field `{field}`: {}", err.inner())
        };
        ToolError::argument(tool.as_str(), message)
    })
}
