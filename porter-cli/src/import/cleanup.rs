//! Destination teardown before an import
//!
//! Pivots go first, then entity tables in reverse import order. Global
//! reference data (static and not tenant-owned) is never touched.

use sqlx::{Connection, SqliteConnection};

use crate::registry::{EntityRegistry, RegistryEntry};
use crate::storage::sqlite::{self, OwnerScope};

/// Rows removed per table
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub tables: Vec<(String, u64)>,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.tables.iter().map(|(_, n)| n).sum()
    }
}

/// Whether an entry's rows are removed by cleanup
pub fn is_cleanable(entry: &RegistryEntry) -> bool {
    !entry.is_static() || entry.descriptor.is_tenant_based
}

/// Remove destination rows in one transaction
///
/// With `tenant` set only that tenant's rows are removed and the tenant row
/// itself is kept; without it every cleanable table is emptied.
pub async fn cleanup(
    conn: &mut SqliteConnection,
    registry: &EntityRegistry,
    tenant: Option<&str>,
) -> Result<CleanupReport, sqlx::Error> {
    let mut report = CleanupReport::default();
    let mut tx = conn.begin().await?;

    for pivot in registry.pivots().iter().rev() {
        let endpoints = [
            (&pivot.owner, &pivot.table.owner_column),
            (&pivot.target, &pivot.table.target_column),
        ];

        let mut removed = 0;
        match tenant {
            Some(tenant) => {
                for (type_id, column) in endpoints {
                    let Some(entry) = registry.entry(type_id) else {
                        continue;
                    };
                    if !is_cleanable(entry) {
                        continue;
                    }
                    let Some(scope_column) = entry.scope_column() else {
                        continue;
                    };
                    let scope = OwnerScope {
                        table: entry.table_name(),
                        primary_key: &entry.descriptor.primary_key,
                        column: scope_column,
                        value: tenant,
                    };
                    removed += sqlite::delete_pivot_rows(&mut tx, pivot.table_name(), column, Some(scope))
                        .await?;
                }
            }
            None => {
                let touches_cleanable = endpoints
                    .iter()
                    .filter_map(|(type_id, _)| registry.entry(type_id))
                    .any(is_cleanable);
                if touches_cleanable {
                    removed = sqlite::delete_pivot_rows(&mut tx, pivot.table_name(), &pivot.table.owner_column, None)
                        .await?;
                }
            }
        }

        if removed > 0 {
            log::info!("Cleaned up {} rows from pivot '{}'", removed, pivot.table_name());
        }
        report.tables.push((pivot.table_name().to_string(), removed));
    }

    for entry in registry.delete_order() {
        if !is_cleanable(entry) {
            continue;
        }

        let removed = match tenant {
            // The destination tenant row stays; everything it owns goes
            Some(_) if entry.is_tenant_root() => continue,
            Some(tenant) => match entry.scope_column() {
                Some(column) => sqlite::delete_rows(&mut tx, entry.table_name(), Some((column, tenant))).await?,
                None => continue,
            },
            None => sqlite::delete_rows(&mut tx, entry.table_name(), None).await?,
        };

        if removed > 0 {
            log::info!("Cleaned up {} rows from '{}'", removed, entry.table_name());
        }
        report.tables.push((entry.table_name().to_string(), removed));
    }

    tx.commit().await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::bootstrap;
    use crate::storage::schema::create_schema;
    use crate::storage::sqlite::{connect, count_rows};

    async fn seeded() -> (tempfile::TempDir, sqlx::SqlitePool, EntityRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("dest.db").display());
        let pool = connect(&url).await.unwrap();
        let registry = bootstrap(&[]).unwrap();
        let mut conn = pool.acquire().await.unwrap();
        create_schema(&mut conn, &registry).await.unwrap();

        for sql in [
            r#"INSERT INTO "tenant" ("id", "name") VALUES ('T1', 'Acme'), ('T2', 'Other')"#,
            r#"INSERT INTO "currency" ("id", "isoCode", "currency") VALUES ('C1', 'USD', 'US Dollar')"#,
            r#"INSERT INTO "organization" ("id", "tenantId", "name", "currency", "isDefault") VALUES ('O1', 'T1', 'A', 'USD', 1), ('O2', 'T2', 'B', 'USD', 1)"#,
            r#"INSERT INTO "user" ("id", "tenantId", "email") VALUES ('U1', 'T1', 'a@x.io'), ('U2', 'T2', 'b@x.io')"#,
            r#"UPDATE "organization" SET "createdByUserId" = 'U1' WHERE "id" = 'O1'"#,
            r#"INSERT INTO "tag" ("id", "tenantId", "organizationId", "name") VALUES ('G1', 'T1', 'O1', 'a'), ('G2', 'T2', 'O2', 'b')"#,
            r#"INSERT INTO "tag_organization" ("organizationId", "tagId") VALUES ('O1', 'G1'), ('O2', 'G2')"#,
        ] {
            sqlx::query(sql).execute(&mut *conn).await.unwrap();
        }
        drop(conn);
        (dir, pool, registry)
    }

    #[tokio::test]
    async fn test_scoped_cleanup_keeps_other_tenants() {
        let (_dir, pool, registry) = seeded().await;
        let mut conn = pool.acquire().await.unwrap();

        let report = cleanup(&mut conn, &registry, Some("T1")).await.unwrap();
        assert!(report.total() > 0);

        assert_eq!(count_rows(&mut conn, "tenant").await.unwrap(), 2);
        assert_eq!(count_rows(&mut conn, "organization").await.unwrap(), 1);
        assert_eq!(count_rows(&mut conn, "user").await.unwrap(), 1);
        assert_eq!(count_rows(&mut conn, "tag").await.unwrap(), 1);
        assert_eq!(count_rows(&mut conn, "tag_organization").await.unwrap(), 1);
        assert_eq!(count_rows(&mut conn, "currency").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_cleanup_keeps_reference_data() {
        let (_dir, pool, registry) = seeded().await;
        let mut conn = pool.acquire().await.unwrap();

        cleanup(&mut conn, &registry, None).await.unwrap();

        for table in ["tenant", "organization", "user", "tag", "tag_organization"] {
            assert_eq!(count_rows(&mut conn, table).await.unwrap(), 0, "{}", table);
        }
        assert_eq!(count_rows(&mut conn, "currency").await.unwrap(), 1);
    }
}
