//! Table creation from registry descriptors

use anyhow::{Context, Result};
use sqlx::SqliteConnection;

use super::sqlite::quote;
use crate::metadata::{EntityDescriptor, RelationRole};
use crate::registry::{EntityRegistry, PivotEntry};

/// `CREATE TABLE` statement for one entity type
///
/// Nullable foreign keys use `ON DELETE SET NULL` so that teardown in reverse
/// import order never trips over audit links or deferred edges.
pub fn create_table_sql(registry: &EntityRegistry, descriptor: &EntityDescriptor) -> String {
    let mut lines = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote(&descriptor.primary_key))];

    for column in &descriptor.columns {
        let mut line = format!("{} {}", quote(&column.name), column.column_type.sql_type());
        if !column.nullable {
            line.push_str(" NOT NULL");
        }
        lines.push(line);
    }

    for edge in descriptor.column_edges() {
        let Some(column) = edge.column() else {
            continue;
        };
        let mut line = format!("{} TEXT", quote(column));
        if !edge.nullable {
            line.push_str(" NOT NULL");
        }
        if let Some(target) = registry.entry(&edge.target) {
            line.push_str(&format!(
                " REFERENCES {}({})",
                quote(target.table_name()),
                quote(&target.descriptor.primary_key)
            ));
            if edge.nullable {
                line.push_str(" ON DELETE SET NULL");
            }
        }
        lines.push(line);
    }

    // Natural keys of reference data are unique per tenant
    if descriptor.is_static {
        let tenant = descriptor
            .column_edges()
            .find(|e| e.role == RelationRole::Tenant)
            .and_then(|e| e.column());
        for unique in &descriptor.uniques {
            let columns: Vec<String> = tenant
                .into_iter()
                .chain(unique.columns.iter().map(String::as_str))
                .map(quote)
                .collect();
            lines.push(format!("UNIQUE ({})", columns.join(", ")));
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote(&descriptor.table_name),
        lines.join(",\n    ")
    )
}

/// `CREATE TABLE` statement for a pivot
pub fn create_pivot_sql(registry: &EntityRegistry, pivot: &PivotEntry) -> String {
    let reference = |type_id: &str| {
        registry
            .entry(type_id)
            .map(|e| {
                format!(
                    " REFERENCES {}({}) ON DELETE CASCADE",
                    quote(e.table_name()),
                    quote(&e.descriptor.primary_key)
                )
            })
            .unwrap_or_default()
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {o} TEXT NOT NULL{or},\n    {t} TEXT NOT NULL{tr},\n    PRIMARY KEY ({o}, {t})\n)",
        table = quote(pivot.table_name()),
        o = quote(&pivot.table.owner_column),
        or = reference(&pivot.owner),
        t = quote(&pivot.table.target_column),
        tr = reference(&pivot.target),
    )
}

/// Create every registered table and pivot, in import order
pub async fn create_schema(conn: &mut SqliteConnection, registry: &EntityRegistry) -> Result<usize> {
    let mut created = 0;

    for entry in registry.ordered_entries() {
        let sql = create_table_sql(registry, &entry.descriptor);
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create table '{}'", entry.table_name()))?;
        created += 1;
    }

    for pivot in registry.pivots() {
        let sql = create_pivot_sql(registry, pivot);
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create pivot '{}'", pivot.table_name()))?;
        created += 1;
    }

    log::debug!("Created {} tables", created);
    Ok(created)
}
