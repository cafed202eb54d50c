use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::{
    ColumnDescriptor, Database, DatabaseResult, DbError, PatientDataRequest, QueryPolicy,
    TableCatalog, TableSchema,
};

/// Read-only handle on a SQLite file.
///
/// The connection is opened explicitly with [`SqliteDatabase::open`] and closed with
/// [`SqliteDatabase::close`]. When a call fails because the store became
/// unreachable the connection is dropped and the next call reopens it.
#[derive(Debug)]
pub struct SqliteDatabase {
    path: PathBuf,
    policy: QueryPolicy,
    connection: Option<SqliteConnection>,
}

impl SqliteDatabase {
    /// Describe a store without touching the file yet
    pub fn new(path: impl Into<PathBuf>, policy: QueryPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            connection: None,
        }
    }

    pub async fn open(path: impl Into<PathBuf>, policy: QueryPolicy) -> Result<Self, DbError> {
        let mut database = Self::new(path, policy);
        database.connection().await?;
        Ok(database)
    }

    pub async fn close(mut self) {
        if let Some(connection) = self.connection.take()
            && let Err(err) = connection.close().await
        {
            warn!(path = %self.path.display(), "closing data store failed: {err}");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    async fn connection(&mut self) -> Result<&mut SqliteConnection, DbError> {
        match self.connection {
            Some(ref mut connection) => Ok(connection),
            None => {
                let options = SqliteConnectOptions::new()
                    .filename(&self.path)
                    .read_only(true)
                    .create_if_missing(false);
                let connection = SqliteConnection::connect_with(&options)
                    .await
                    .map_err(|err| {
                        DbError::Connectivity(format!("cannot open {}: {err}", self.path.display()))
                    })?;
                debug!(path = %self.path.display(), "opened data store read-only");
                Ok(self.connection.insert(connection))
            }
        }
    }

    /// Drop the connection after a connectivity failure so the next call reopens it
    fn settle<T>(&mut self, result: Result<T, DbError>) -> Result<T, DbError> {
        if let Err(DbError::Connectivity(reason)) = &result {
            warn!(path = %self.path.display(), "dropping data store connection: {reason}");
            self.connection = None;
        }
        result
    }
}

#[async_trait::async_trait]
impl Database for SqliteDatabase {
    async fn get_results(&mut self, query: &str) -> Result<DatabaseResult, DbError> {
        self.policy.guard.check(query)?;
        let row_cap = self.policy.row_cap;

        let result = match self.connection().await {
            Ok(connection) => fetch_rows(connection, sqlx::query(query), Some(row_cap)).await,
            Err(err) => Err(err),
        };

        self.settle(result)
    }

    async fn get_schema(&mut self) -> Result<TableCatalog, DbError> {
        let result = match self.connection().await {
            Ok(connection) => read_catalog(connection).await,
            Err(err) => Err(err),
        };

        self.settle(result)
    }

    async fn get_patient_data(
        &mut self,
        request: &PatientDataRequest,
    ) -> Result<DatabaseResult, DbError> {
        let (sql, binds) = request.statement();

        let query = binds
            .iter()
            .fold(sqlx::query(&sql), |query, value| query.bind(value.as_str()));

        let result = match self.connection().await {
            // a patient's history comes back whole, the newest records are last
            Ok(connection) => fetch_rows(connection, query, None).await,
            Err(err) => Err(err),
        };

        self.settle(result)
    }
}

async fn read_catalog(connection: &mut SqliteConnection) -> Result<TableCatalog, DbError> {
    let names: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(&mut *connection)
    .await
    .map_err(DbError::from_sqlx)?;

    let mut catalog = TableCatalog::default();
    for (name,) in names {
        let columns: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
                .bind(name.as_str())
                .fetch_all(&mut *connection)
                .await
                .map_err(DbError::from_sqlx)?;

        catalog.tables.push(TableSchema {
            name,
            columns: columns
                .into_iter()
                .map(|(name, type_name)| ColumnDescriptor { name, type_name })
                .collect(),
        });
    }

    Ok(catalog)
}

/// Stream rows, stopping at `row_cap` when one is given. One extra row is
/// pulled to know whether the result was cut short.
async fn fetch_rows<'q>(
    connection: &mut SqliteConnection,
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    row_cap: Option<usize>,
) -> Result<DatabaseResult, DbError> {
    let mut results = DatabaseResult::default();
    let mut keys: Vec<String> = vec![];
    let mut rows = query.fetch(connection);

    while let Some(row) = rows.try_next().await.map_err(DbError::from_sqlx)? {
        if row_cap.is_some_and(|cap| results.rows.len() == cap) {
            results.truncated = true;
            break;
        }

        if keys.is_empty() {
            results.headers = row
                .columns()
                .iter()
                .map(|col| ColumnDescriptor::new(col.name(), col.type_info().name()))
                .collect();
            keys = row_keys(&results.headers);
        }

        let record: Map<String, Value> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), decode_value(&row, i)))
            .collect();
        results.rows.push(record);
    }

    debug!(
        rows = results.rows.len(),
        truncated = results.truncated,
        "query finished"
    );
    Ok(results)
}

/// Object keys for a row, `id, id` from a join becomes `id, id_2`
fn row_keys(headers: &[ColumnDescriptor]) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .map(|header| {
            let mut key = header.name.clone();
            let mut n = 1;
            while !seen.insert(key.clone()) {
                n += 1;
                key = format!("{}_{n}", header.name);
            }
            key
        })
        .collect()
}

/// Decode by the storage class of the value itself, SQLite columns are not
/// bound to their declared type.
fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    let type_info = raw.type_info();
    match type_info.name() {
        "INTEGER" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::from(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}
