pub mod guard;
pub mod loader;
pub mod patient;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use serde_json::{Map, Value};

pub use guard::ReadOnlyGuard;
pub use patient::{Category, DateRange, PatientDataRequest};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The store could not be opened or the connection broke
    #[error("data store unreachable: {0}")]
    Connectivity(String),
    /// The engine rejected the statement
    #[error("{0}")]
    Syntax(String),
    /// The request was refused before (or instead of) touching the data
    #[error("{0}")]
    Validation(String),
}

impl DbError {
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(err) => {
                let message = err.message().to_string();
                if message.contains("readonly") {
                    DbError::Validation(format!(
                        "the data store is read-only, write statements are not allowed ({message})"
                    ))
                } else {
                    DbError::Syntax(message)
                }
            }
            other => DbError::Connectivity(other.to_string()),
        }
    }
}

/// Trait defining the interface for database operations
#[async_trait]
pub trait Database: Send {
    /// Validate that `query` is a single read-only statement and run it.
    /// At most the configured row cap is returned, `truncated` tells whether rows were dropped.
    async fn get_results(&mut self, query: &str) -> Result<DatabaseResult, DbError>;

    /// Get every table and its columns, in catalog order
    async fn get_schema(&mut self) -> Result<TableCatalog, DbError>;

    /// Run the canned lookup for a patient and category. Every matching record
    /// is returned, the row cap does not apply.
    async fn get_patient_data(
        &mut self,
        request: &PatientDataRequest,
    ) -> Result<DatabaseResult, DbError>;
}

/// Limits applied to free-form statements run through [`Database::get_results`]
#[derive(Debug, Clone)]
pub struct QueryPolicy {
    pub row_cap: usize,
    pub guard: ReadOnlyGuard,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self::from(&config::QueryConfig::default())
    }
}

impl From<&config::QueryConfig> for QueryPolicy {
    fn from(conf: &config::QueryConfig) -> Self {
        Self {
            row_cap: conf.row_cap,
            guard: ReadOnlyGuard::new(&conf.denied_keywords),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseResult {
    pub headers: Vec<ColumnDescriptor>,
    pub rows: Vec<Map<String, Value>>,
    pub truncated: bool,
}

impl DatabaseResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// Tables in catalog order. Serializes as `{ table: [{name, type}, ..], .. }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCatalog {
    pub tables: Vec<TableSchema>,
}

impl TableCatalog {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Serialize for TableCatalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for table in &self.tables {
            map.serialize_entry(&table.name, &table.columns)?;
        }
        map.end()
    }
}

/// Quote an identifier for interpolation into SQL text
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
