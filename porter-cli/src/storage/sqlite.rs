//! SQLite row access for the export and import engines
//!
//! All SQL here is built from registry identifiers, which the introspector
//! has already validated; row values are always bound, never interpolated.

use std::str::FromStr;

use anyhow::{Context, Result};
use futures::TryStreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};

use super::value::Value;
use crate::error::StorageError;
use crate::metadata::PivotTable;
use crate::registry::EntityRegistry;

/// Audit log of identifier mappings written by an import run
pub const IMPORT_RECORD_TABLE: &str = "import_record";

/// Open a pool on a SQLite URL, creating the file when missing
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database URL '{}'", url))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database '{}'", url))
}

/// Double-quote an identifier
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Text(s) => query.bind(s.clone()),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Bool(b) => query.bind(*b),
        Value::DateTime(_) | Value::Uuid(_) | Value::Json(_) => query.bind(value.to_cell()),
    }
}

/// Which rows of a table to read
#[derive(Debug, Clone, Copy)]
pub enum RowFilter<'a> {
    All,
    /// `column = value`
    Equals { column: &'a str, value: &'a str },
    /// `column = value OR column IS NULL`
    EqualsOrNull { column: &'a str, value: &'a str },
}

/// Read rows as text cells, in insertion order
pub async fn select_rows(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[String],
    filter: RowFilter<'_>,
) -> Result<Vec<Vec<Option<String>>>> {
    let projection = columns
        .iter()
        .map(|c| format!("CAST({col} AS TEXT) AS {col}", col = quote(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let (clause, bound) = match filter {
        RowFilter::All => (String::new(), None),
        RowFilter::Equals { column, value } => {
            (format!(" WHERE {} = ?", quote(column)), Some(value))
        }
        RowFilter::EqualsOrNull { column, value } => (
            format!(" WHERE ({col} = ? OR {col} IS NULL)", col = quote(column)),
            Some(value),
        ),
    };
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY rowid",
        projection,
        quote(table),
        clause
    );

    let mut query = sqlx::query(&sql);
    if let Some(value) = bound {
        query = query.bind(value);
    }

    let mut rows = query.fetch(&mut *conn);
    let mut out = Vec::new();
    while let Some(row) = rows
        .try_next()
        .await
        .with_context(|| format!("Failed to read rows from '{}'", table))?
    {
        let mut cells = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            cells.push(row.try_get::<Option<String>, _>(idx)?);
        }
        out.push(cells);
    }

    Ok(out)
}

/// Read every (owner, target) pair of a pivot table
pub async fn select_pivot(
    conn: &mut SqliteConnection,
    pivot: &PivotTable,
) -> Result<Vec<(String, String)>> {
    let sql = format!(
        "SELECT CAST({o} AS TEXT) AS owner, CAST({t} AS TEXT) AS target FROM {} ORDER BY rowid",
        quote(&pivot.table_name),
        o = quote(&pivot.owner_column),
        t = quote(&pivot.target_column),
    );

    let rows = sqlx::query(&sql)
        .fetch_all(&mut *conn)
        .await
        .with_context(|| format!("Failed to read pivot '{}'", pivot.table_name))?;

    let mut pairs = Vec::with_capacity(rows.len());
    for row in rows {
        let owner: Option<String> = row.try_get("owner")?;
        let target: Option<String> = row.try_get("target")?;
        if let (Some(owner), Some(target)) = (owner, target) {
            pairs.push((owner, target));
        }
    }
    Ok(pairs)
}

/// Insert one row
pub async fn insert_row(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[String],
    values: &[Value],
) -> Result<(), sqlx::Error> {
    let names = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        names,
        placeholders
    );

    let mut query = sqlx::query(&sql);
    for value in values {
        query = bind_value(query, value);
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

/// Find rows whose natural key matches
///
/// Text and uuid values compare ignoring case and surrounding whitespace;
/// numbers and booleans compare by value. `key` pairs each unique column with
/// its value; `scope` restricts the lookup to one tenant column value.
pub async fn find_by_natural_key(
    conn: &mut SqliteConnection,
    table: &str,
    primary_key: &str,
    key: &[(&str, &Value)],
    scope: Option<(&str, &Value)>,
) -> Result<Vec<String>, sqlx::Error> {
    let mut conditions = Vec::with_capacity(key.len() + 1);
    let mut bound: Vec<&Value> = Vec::new();

    for (column, value) in key.iter().copied().chain(scope) {
        let column = quote(column);
        let condition = match value {
            Value::Null => format!("{} IS NULL", column),
            Value::Int(_) | Value::Bool(_) => format!("{} = ?", column),
            Value::Float(_) => format!("CAST({} AS REAL) = ?", column),
            Value::Text(_) | Value::Uuid(_) => {
                format!("lower(trim(CAST({} AS TEXT))) = lower(trim(?))", column)
            }
            Value::DateTime(_) | Value::Json(_) => format!("CAST({} AS TEXT) = ?", column),
        };
        conditions.push(condition);
        if !value.is_null() {
            bound.push(value);
        }
    }

    let sql = format!(
        "SELECT CAST({pk} AS TEXT) AS {pk} FROM {} WHERE {} ORDER BY rowid",
        quote(table),
        conditions.join(" AND "),
        pk = quote(primary_key),
    );

    let mut query = sqlx::query(&sql);
    for value in bound {
        query = bind_value(query, value);
    }

    let rows = query.fetch_all(&mut *conn).await?;
    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        ids.push(row.try_get::<String, _>(0)?);
    }
    Ok(ids)
}

/// Set one column of one row
pub async fn update_column(
    conn: &mut SqliteConnection,
    table: &str,
    primary_key: &str,
    id: &str,
    column: &str,
    value: &Value,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET {} = ? WHERE {} = ?",
        quote(table),
        quote(column),
        quote(primary_key)
    );
    let result = bind_value(sqlx::query(&sql), value)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Insert a pivot pair; returns false when the pair already existed
pub async fn insert_pivot(
    conn: &mut SqliteConnection,
    pivot: &PivotTable,
    owner: &str,
    target: &str,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
        quote(&pivot.table_name),
        quote(&pivot.owner_column),
        quote(&pivot.target_column)
    );
    let result = sqlx::query(&sql)
        .bind(owner)
        .bind(target)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Whether a row with the given primary key exists
pub async fn row_exists(
    conn: &mut SqliteConnection,
    table: &str,
    primary_key: &str,
    id: &str,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ? LIMIT 1",
        quote(table),
        quote(primary_key)
    );
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    Ok(row.is_some())
}

/// Count rows of a table
pub async fn count_rows(conn: &mut SqliteConnection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) AS count FROM {}", quote(table));
    let row = sqlx::query(&sql)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to count rows of '{}'", table))?;
    Ok(row.try_get("count")?)
}

/// Delete rows of a table, optionally only those with `column = value`
pub async fn delete_rows(
    conn: &mut SqliteConnection,
    table: &str,
    scope: Option<(&str, &str)>,
) -> Result<u64, sqlx::Error> {
    let result = match scope {
        Some((column, value)) => {
            let sql = format!("DELETE FROM {} WHERE {} = ?", quote(table), quote(column));
            sqlx::query(&sql).bind(value).execute(&mut *conn).await?
        }
        None => {
            let sql = format!("DELETE FROM {}", quote(table));
            sqlx::query(&sql).execute(&mut *conn).await?
        }
    };
    Ok(result.rows_affected())
}

/// Rows of `table` whose `column` equals `value`
#[derive(Debug, Clone, Copy)]
pub struct OwnerScope<'a> {
    pub table: &'a str,
    pub primary_key: &'a str,
    pub column: &'a str,
    pub value: &'a str,
}

/// Delete pivot pairs; with a scope only pairs whose `column` points at a
/// row inside it
pub async fn delete_pivot_rows(
    conn: &mut SqliteConnection,
    pivot_table: &str,
    column: &str,
    scope: Option<OwnerScope<'_>>,
) -> Result<u64, sqlx::Error> {
    let result = match scope {
        Some(scope) => {
            let sql = format!(
                "DELETE FROM {} WHERE {} IN (SELECT {} FROM {} WHERE {} = ?)",
                quote(pivot_table),
                quote(column),
                quote(scope.primary_key),
                quote(scope.table),
                quote(scope.column),
            );
            sqlx::query(&sql).bind(scope.value).execute(&mut *conn).await?
        }
        None => {
            let sql = format!("DELETE FROM {}", quote(pivot_table));
            sqlx::query(&sql).execute(&mut *conn).await?
        }
    };
    Ok(result.rows_affected())
}

/// Column names of a table (empty when the table does not exist)
pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>, sqlx::Error> {
    let sql = format!("PRAGMA table_info({})", quote(table));
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(row.try_get::<String, _>("name")?);
    }
    Ok(columns)
}

/// Check every registered table and pivot against the live schema
pub async fn verify_storage(
    conn: &mut SqliteConnection,
    registry: &EntityRegistry,
) -> Result<(), StorageError> {
    for entry in registry.ordered_entries() {
        let existing = table_columns(conn, entry.table_name()).await?;
        if existing.is_empty() {
            return Err(StorageError::MissingTable {
                entity: entry.type_id().to_string(),
                table: entry.table_name().to_string(),
            });
        }
        for column in entry.descriptor.export_header() {
            if !existing.contains(&column) {
                return Err(StorageError::MissingColumn {
                    table: entry.table_name().to_string(),
                    column,
                });
            }
        }
    }

    for pivot in registry.pivots() {
        let existing = table_columns(conn, pivot.table_name()).await?;
        if existing.is_empty() {
            return Err(StorageError::MissingTable {
                entity: pivot.owner.clone(),
                table: pivot.table_name().to_string(),
            });
        }
        for column in [&pivot.table.owner_column, &pivot.table.target_column] {
            if !existing.contains(column) {
                return Err(StorageError::MissingColumn {
                    table: pivot.table_name().to_string(),
                    column: column.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Create the import audit table if needed
pub async fn ensure_import_record_table(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            "id" INTEGER PRIMARY KEY AUTOINCREMENT,
            "tenantId" TEXT NOT NULL,
            "entityType" TEXT NOT NULL,
            "sourceId" TEXT NOT NULL,
            "destinationId" TEXT NOT NULL,
            "importedAt" TEXT NOT NULL
        )
        "#,
        quote(IMPORT_RECORD_TABLE)
    );
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// One row of the import audit table
#[derive(Debug, Clone, Copy)]
pub struct ImportRecordRow<'a> {
    pub tenant_id: &'a str,
    pub entity_type: &'a str,
    pub source_id: &'a str,
    pub destination_id: &'a str,
    pub imported_at: &'a str,
}

/// Append one identifier mapping to the audit table
pub async fn insert_import_record(
    conn: &mut SqliteConnection,
    record: ImportRecordRow<'_>,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"INSERT INTO {} ("tenantId", "entityType", "sourceId", "destinationId", "importedAt") VALUES (?, ?, ?, ?, ?)"#,
        quote(IMPORT_RECORD_TABLE)
    );
    sqlx::query(&sql)
        .bind(record.tenant_id)
        .bind(record.entity_type)
        .bind(record.source_id)
        .bind(record.destination_id)
        .bind(record.imported_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Whether an error is a UNIQUE or PRIMARY KEY constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() || db.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("scratch.db").display());
        let pool = connect(&url).await.unwrap();
        sqlx::query(r#"CREATE TABLE "currency" ("id" TEXT PRIMARY KEY, "isoCode" TEXT NOT NULL, "active" INTEGER)"#)
            .execute(&pool)
            .await
            .unwrap();
        (dir, pool)
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("name"), "\"name\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_insert_and_select() {
        let (_dir, pool) = scratch().await;
        let mut conn = pool.acquire().await.unwrap();
        let columns = vec!["id".to_string(), "isoCode".to_string(), "active".to_string()];

        insert_row(
            &mut conn,
            "currency",
            &columns,
            &[Value::Text("c1".into()), Value::Text("USD".into()), Value::Bool(true)],
        )
        .await
        .unwrap();
        insert_row(
            &mut conn,
            "currency",
            &columns,
            &[Value::Text("c2".into()), Value::Text("EUR".into()), Value::Null],
        )
        .await
        .unwrap();

        let rows = select_rows(&mut conn, "currency", &columns, RowFilter::All)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Some("c1".into()), Some("USD".into()), Some("1".into())]);
        assert_eq!(rows[1][2], None);

        let filtered = select_rows(
            &mut conn,
            "currency",
            &columns,
            RowFilter::Equals { column: "isoCode", value: "EUR" },
        )
        .await
        .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn test_natural_key_ignores_case_and_whitespace() {
        let (_dir, pool) = scratch().await;
        let mut conn = pool.acquire().await.unwrap();
        let columns = vec!["id".to_string(), "isoCode".to_string()];
        insert_row(&mut conn, "currency", &columns, &[Value::Text("c1".into()), Value::Text("USD".into())])
            .await
            .unwrap();

        let key = Value::Text("  usd ".into());
        let ids = find_by_natural_key(&mut conn, "currency", "id", &[("isoCode", &key)], None)
            .await
            .unwrap();
        assert_eq!(ids, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_natural_key_compares_numbers_and_booleans_by_value() {
        let (_dir, pool) = scratch().await;
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query(r#"CREATE TABLE "rate" ("id" TEXT PRIMARY KEY, "active" INTEGER, "weight" REAL)"#)
            .execute(&mut *conn)
            .await
            .unwrap();
        let columns = vec!["id".to_string(), "active".to_string(), "weight".to_string()];
        insert_row(
            &mut conn,
            "rate",
            &columns,
            &[Value::Text("r1".into()), Value::Bool(true), Value::Float(1.0)],
        )
        .await
        .unwrap();
        insert_row(
            &mut conn,
            "rate",
            &columns,
            &[Value::Text("r2".into()), Value::Bool(false), Value::Float(1.5)],
        )
        .await
        .unwrap();

        let active = Value::Bool(true);
        let ids = find_by_natural_key(&mut conn, "rate", "id", &[("active", &active)], None)
            .await
            .unwrap();
        assert_eq!(ids, vec!["r1".to_string()]);

        let whole = Value::Float(1.0);
        let ids = find_by_natural_key(&mut conn, "rate", "id", &[("weight", &whole)], None)
            .await
            .unwrap();
        assert_eq!(ids, vec!["r1".to_string()]);

        let inactive = Value::Bool(false);
        let half = Value::Float(1.5);
        let ids = find_by_natural_key(
            &mut conn,
            "rate",
            "id",
            &[("active", &inactive), ("weight", &half)],
            None,
        )
        .await
        .unwrap();
        assert_eq!(ids, vec!["r2".to_string()]);
    }

    #[tokio::test]
    async fn test_unique_violation_detected() {
        let (_dir, pool) = scratch().await;
        let mut conn = pool.acquire().await.unwrap();
        let columns = vec!["id".to_string(), "isoCode".to_string()];
        let values = [Value::Text("c1".into()), Value::Text("USD".into())];

        insert_row(&mut conn, "currency", &columns, &values).await.unwrap();
        let err = insert_row(&mut conn, "currency", &columns, &values)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_table_columns_of_missing_table_is_empty() {
        let (_dir, pool) = scratch().await;
        let mut conn = pool.acquire().await.unwrap();

        assert!(table_columns(&mut conn, "ghost").await.unwrap().is_empty());
        assert_eq!(
            table_columns(&mut conn, "currency").await.unwrap(),
            vec!["id", "isoCode", "active"]
        );
    }
}
