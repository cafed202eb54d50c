//! One-off import of a directory of Synthea CSV exports into SQLite.
//!
//! Every `<name>.csv` becomes table `<name>` with one `TEXT` column per header.
//! Existing tables of the same name are replaced.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use tracing::{debug, info};

use crate::quote_ident;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid csv in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{path} has no header row")]
    MissingHeaders { path: PathBuf },
    #[error("database error while loading {table}: {source}")]
    Database { table: String, source: sqlx::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub file: PathBuf,
    pub table: String,
    pub rows: u64,
}

/// Load every `*.csv` in `csv_dir` (sorted by file name) into `db_path`,
/// creating the database file when needed.
pub async fn load_csv_dir(csv_dir: &Path, db_path: &Path) -> Result<Vec<LoadedTable>, LoadError> {
    let files = csv_files(csv_dir)?;

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let mut connection = SqliteConnection::connect_with(&options)
        .await
        .map_err(|source| LoadError::Database {
            table: db_path.display().to_string(),
            source,
        })?;

    let mut loaded = Vec::with_capacity(files.len());
    for file in files {
        let table = load_csv_file(&mut connection, &file).await?;
        info!(table = %table.table, rows = table.rows, "loaded {}", file.display());
        loaded.push(table);
    }

    connection
        .close()
        .await
        .map_err(|source| LoadError::Database {
            table: db_path.display().to_string(),
            source,
        })?;

    Ok(loaded)
}

fn csv_files(csv_dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: csv_dir.to_path_buf(),
        source,
    };

    let mut files = vec![];
    for entry in std::fs::read_dir(csv_dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn load_csv_file(
    connection: &mut SqliteConnection,
    path: &Path,
) -> Result<LoadedTable, LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let table = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let db_err = |source| LoadError::Database {
        table: table.clone(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(LoadError::MissingHeaders {
            path: path.to_path_buf(),
        });
    }

    let quoted_table = quote_ident(&table);
    let columns = headers
        .iter()
        .map(|header| quote_ident(header))
        .collect::<Vec<_>>();
    let create = format!(
        "CREATE TABLE {quoted_table} ({})",
        columns
            .iter()
            .map(|column| format!("{column} TEXT"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let insert = format!(
        "INSERT INTO {quoted_table} ({}) VALUES ({})",
        columns.join(", "),
        vec!["?"; columns.len()].join(", ")
    );

    let mut tx = connection.begin().await.map_err(db_err)?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {quoted_table}"))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    sqlx::query(&create)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    debug!(%table, columns = columns.len(), "created table");

    let mut rows = 0;
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        record
            .iter()
            .fold(sqlx::query(&insert), |query, field| query.bind(field))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        rows += 1;
    }

    tx.commit().await.map_err(db_err)?;

    Ok(LoadedTable {
        file: path.to_path_buf(),
        table,
        rows,
    })
}
