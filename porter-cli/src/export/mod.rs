//! Export engine
//!
//! Snapshots one tenant's rows into an archive, one unit per entity type in
//! registry order, followed by each pivot once both its endpoints are out.
//! Identifiers are written verbatim; all remapping happens on import.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::archive::{TabularUnit, UnitSink};
use crate::metadata::RelationRole;
use crate::registry::{EntityRegistry, PivotEntry, RegistryEntry};
use crate::storage::sqlite::{self, RowFilter};
use crate::storage::Value;

/// Stand-in written for the exported tenant's own id
pub const TENANT_PLACEHOLDER: &str = "{{tenantId}}";

/// What to export
#[derive(Debug, Clone)]
pub struct ExportScope {
    pub tenant_id: String,
    /// Write `TENANT_PLACEHOLDER` instead of the tenant id
    pub use_placeholder: bool,
    /// Restrict the export to these storage names (entity tables or pivots)
    pub only: Option<Vec<String>>,
}

impl ExportScope {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            use_placeholder: true,
            only: None,
        }
    }

    fn includes(&self, name: &str) -> bool {
        self.only
            .as_ref()
            .map(|only| only.iter().any(|n| n == name))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Entity,
    Pivot,
}

/// One written unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub kind: UnitKind,
    pub rows: usize,
}

/// Result of an export run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub units: Vec<UnitReport>,
}

impl ExportReport {
    pub fn total_rows(&self) -> usize {
        self.units.iter().map(|u| u.rows).sum()
    }

    pub fn rows_for(&self, name: &str) -> Option<usize> {
        self.units.iter().find(|u| u.name == name).map(|u| u.rows)
    }
}

/// Reads rows from a source database into an archive
pub struct ExportEngine<'a> {
    registry: &'a EntityRegistry,
    pool: &'a SqlitePool,
}

impl<'a> ExportEngine<'a> {
    pub fn new(registry: &'a EntityRegistry, pool: &'a SqlitePool) -> Self {
        Self { registry, pool }
    }

    /// Export the scoped tenant's rows into `sink`
    pub async fn export(&self, scope: &ExportScope, sink: &mut dyn UnitSink) -> Result<ExportReport> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire source connection")?;
        sqlite::verify_storage(&mut conn, self.registry)
            .await
            .context("Source database does not match the registry")?;

        let root = self
            .registry
            .tenant_root()
            .context("Registry has no tenant entry")?;
        let exists = sqlite::row_exists(
            &mut conn,
            root.table_name(),
            &root.descriptor.primary_key,
            &scope.tenant_id,
        )
        .await?;
        if !exists {
            anyhow::bail!("Tenant '{}' does not exist in the source database", scope.tenant_id);
        }

        let mut report = ExportReport::default();
        // Source ids of every exported row, per entity type (pivot scoping)
        let mut exported: HashMap<String, HashSet<String>> = HashMap::new();

        for entry in self.registry.ordered_entries() {
            let wanted = scope.includes(entry.table_name());
            let owns_wanted_pivot = self
                .registry
                .pivots()
                .iter()
                .any(|p| p.owner == entry.type_id() && scope.includes(p.table_name()));

            if wanted || owns_wanted_pivot {
                let unit = self.read_entity(&mut conn, entry, scope).await?;
                let pk = entry.descriptor.primary_key.as_str();
                let ids = self.source_ids(&unit, pk, entry, scope);
                exported.insert(entry.type_id().to_string(), ids);

                if wanted && !unit.is_empty() {
                    log::info!("Exported {} rows from '{}'", unit.len(), entry.table_name());
                    sink.write_unit(&unit)
                        .with_context(|| format!("Failed to write unit '{}'", unit.name))?;
                    report.units.push(UnitReport {
                        name: unit.name.clone(),
                        kind: UnitKind::Entity,
                        rows: unit.len(),
                    });
                } else if wanted {
                    log::debug!("No rows in '{}'; skipping unit", entry.table_name());
                }
            }

            for pivot in self.registry.pivots_after(entry.type_id()) {
                if !scope.includes(pivot.table_name()) {
                    continue;
                }
                let owners = exported.get(&pivot.owner);
                let unit = self.read_pivot(&mut conn, pivot, owners, scope).await?;
                if unit.is_empty() {
                    continue;
                }
                log::info!("Exported {} pairs from pivot '{}'", unit.len(), pivot.table_name());
                sink.write_unit(&unit)
                    .with_context(|| format!("Failed to write unit '{}'", unit.name))?;
                report.units.push(UnitReport {
                    name: unit.name.clone(),
                    kind: UnitKind::Pivot,
                    rows: unit.len(),
                });
            }
        }

        sink.finish().context("Failed to finalize archive")?;
        Ok(report)
    }

    async fn read_entity(
        &self,
        conn: &mut sqlx::SqliteConnection,
        entry: &RegistryEntry,
        scope: &ExportScope,
    ) -> Result<TabularUnit> {
        let descriptor = &entry.descriptor;
        let header = descriptor.export_header();

        let nullable_scope = descriptor
            .column_edges()
            .any(|e| e.role == RelationRole::Tenant && e.nullable);
        let filter = match entry.scope_column() {
            Some(column) if entry.is_static() && nullable_scope => RowFilter::EqualsOrNull {
                column,
                value: &scope.tenant_id,
            },
            Some(column) => RowFilter::Equals {
                column,
                value: &scope.tenant_id,
            },
            None => RowFilter::All,
        };

        let rows = sqlite::select_rows(conn, entry.table_name(), &header, filter).await?;

        // Per header position: how to render the cell
        let tenant_cells: Vec<bool> = header
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                (idx == 0 && entry.is_tenant_root())
                    || descriptor
                        .edge_for_column(column)
                        .map(|e| e.role == RelationRole::Tenant)
                        .unwrap_or(false)
            })
            .collect();
        let column_types: Vec<_> = header
            .iter()
            .map(|column| descriptor.column(column).map(|c| c.column_type))
            .collect();

        let mut unit = TabularUnit::new(entry.table_name(), header);
        for row in rows {
            let cells = row
                .into_iter()
                .enumerate()
                .map(|(idx, cell)| {
                    let Some(raw) = cell else {
                        return String::new();
                    };
                    if tenant_cells[idx] {
                        return self.tenant_cell(raw, scope);
                    }
                    match column_types[idx] {
                        Some(column_type) => Value::normalize_cell(&raw, column_type),
                        None => raw,
                    }
                })
                .collect();
            unit.push_row(cells);
        }
        Ok(unit)
    }

    async fn read_pivot(
        &self,
        conn: &mut sqlx::SqliteConnection,
        pivot: &PivotEntry,
        owners: Option<&HashSet<String>>,
        scope: &ExportScope,
    ) -> Result<TabularUnit> {
        let pairs = sqlite::select_pivot(conn, &pivot.table).await?;

        let mut unit = pivot_template(pivot);
        for (owner, target) in pairs {
            if !owners.map(|ids| ids.contains(&owner)).unwrap_or(false) {
                continue;
            }
            let owner = self.maybe_tenant(&pivot.owner, owner, scope);
            let target = self.maybe_tenant(&pivot.target, target, scope);
            unit.push_row(vec![owner, target]);
        }
        Ok(unit)
    }

    /// Real source ids of the rows in a unit
    fn source_ids(
        &self,
        unit: &TabularUnit,
        primary_key: &str,
        entry: &RegistryEntry,
        scope: &ExportScope,
    ) -> HashSet<String> {
        let Some(idx) = unit.column_index(primary_key) else {
            return HashSet::new();
        };
        unit.rows
            .iter()
            .map(|row| {
                if entry.is_tenant_root() && row[idx] == TENANT_PLACEHOLDER {
                    scope.tenant_id.clone()
                } else {
                    row[idx].clone()
                }
            })
            .collect()
    }

    fn tenant_cell(&self, raw: String, scope: &ExportScope) -> String {
        if scope.use_placeholder && raw == scope.tenant_id {
            TENANT_PLACEHOLDER.to_string()
        } else {
            raw
        }
    }

    fn maybe_tenant(&self, type_id: &str, id: String, scope: &ExportScope) -> String {
        if type_id == self.registry.tenant_type() {
            self.tenant_cell(id, scope)
        } else {
            id
        }
    }
}

/// Write a header-only unit for every entity type and pivot
///
/// The result is an import template: fill the units and feed them back.
pub fn export_templates(registry: &EntityRegistry, sink: &mut dyn UnitSink) -> Result<usize> {
    let mut written = 0;
    for entry in registry.ordered_entries() {
        let unit = TabularUnit::new(entry.table_name(), entry.descriptor.export_header());
        sink.write_unit(&unit)?;
        written += 1;
    }
    for pivot in registry.pivots() {
        sink.write_unit(&pivot_template(pivot))?;
        written += 1;
    }
    sink.finish()?;
    Ok(written)
}

fn pivot_template(pivot: &PivotEntry) -> TabularUnit {
    TabularUnit::new(
        pivot.table_name(),
        vec![
            pivot.table.owner_column.clone(),
            pivot.table.target_column.clone(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{DirectorySource, UnitSource, create_sink};
    use crate::registry::bootstrap;
    use crate::storage::schema::create_schema;
    use crate::storage::sqlite::connect;

    async fn seeded() -> (tempfile::TempDir, SqlitePool, EntityRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("source.db").display());
        let pool = connect(&url).await.unwrap();
        let registry = bootstrap(&[]).unwrap();
        let mut conn = pool.acquire().await.unwrap();
        create_schema(&mut conn, &registry).await.unwrap();

        for sql in [
            r#"INSERT INTO "tenant" ("id", "name") VALUES ('T1', 'Acme'), ('T9', 'Other')"#,
            r#"INSERT INTO "organization" ("id", "tenantId", "name", "currency", "isDefault") VALUES ('O1', 'T1', 'Acme Org', 'USD', 1)"#,
            r#"INSERT INTO "organization" ("id", "tenantId", "name", "currency", "isDefault") VALUES ('O9', 'T9', 'Other Org', 'EUR', 0)"#,
            r#"INSERT INTO "currency" ("id", "isoCode", "currency") VALUES ('C1', 'USD', 'US Dollar')"#,
            r#"INSERT INTO "tag" ("id", "tenantId", "organizationId", "name") VALUES ('G1', 'T1', 'O1', 'urgent'), ('G9', 'T9', 'O9', 'other')"#,
            r#"INSERT INTO "tag_organization" ("organizationId", "tagId") VALUES ('O1', 'G1'), ('O9', 'G9')"#,
        ] {
            sqlx::query(sql).execute(&mut *conn).await.unwrap();
        }
        drop(conn);
        (dir, pool, registry)
    }

    #[tokio::test]
    async fn test_export_scopes_to_tenant() {
        let (dir, pool, registry) = seeded().await;
        let out = dir.path().join("out");
        let mut sink = create_sink(&out).unwrap();

        let report = ExportEngine::new(&registry, &pool)
            .export(&ExportScope::tenant("T1"), sink.as_mut())
            .await
            .unwrap();

        assert_eq!(report.rows_for("tenant"), Some(1));
        assert_eq!(report.rows_for("organization"), Some(1));
        assert_eq!(report.rows_for("tag"), Some(1));
        assert_eq!(report.rows_for("currency"), Some(1));
        assert_eq!(report.rows_for("tag_organization"), Some(1));
        // Empty types produce no unit
        assert_eq!(report.rows_for("employee"), None);

        let mut source = DirectorySource::open(&out).unwrap();
        assert!(source.read_unit("employee").unwrap().is_none());

        let tenant = source.read_unit("tenant").unwrap().unwrap();
        assert_eq!(tenant.rows[0][0], TENANT_PLACEHOLDER);

        let org = source.read_unit("organization").unwrap().unwrap();
        let record = org.records().next().unwrap();
        assert_eq!(record["id"], "O1");
        assert_eq!(record["tenantId"], TENANT_PLACEHOLDER);
        assert_eq!(record["isDefault"], "true");
        assert_eq!(record["createdByUserId"], "");
    }

    #[tokio::test]
    async fn test_units_follow_registry_order() {
        let (dir, pool, registry) = seeded().await;
        let mut sink = create_sink(&dir.path().join("out.zip")).unwrap();

        let report = ExportEngine::new(&registry, &pool)
            .export(&ExportScope::tenant("T1"), sink.as_mut())
            .await
            .unwrap();

        let names: Vec<_> = report.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["tenant", "organization", "currency", "tag", "tag_organization"]);
    }

    #[tokio::test]
    async fn test_export_without_placeholder_keeps_ids() {
        let (dir, pool, registry) = seeded().await;
        let out = dir.path().join("raw");
        let mut sink = create_sink(&out).unwrap();

        let scope = ExportScope {
            use_placeholder: false,
            ..ExportScope::tenant("T1")
        };
        ExportEngine::new(&registry, &pool)
            .export(&scope, sink.as_mut())
            .await
            .unwrap();

        let mut source = DirectorySource::open(&out).unwrap();
        let tag = source.read_unit("tag").unwrap().unwrap();
        assert_eq!(tag.records().next().unwrap()["tenantId"], "T1");
    }

    #[tokio::test]
    async fn test_export_only_selected_tables() {
        let (dir, pool, registry) = seeded().await;
        let mut sink = create_sink(&dir.path().join("only")).unwrap();

        let scope = ExportScope {
            only: Some(vec!["tag_organization".to_string()]),
            ..ExportScope::tenant("T1")
        };
        let report = ExportEngine::new(&registry, &pool)
            .export(&scope, sink.as_mut())
            .await
            .unwrap();

        assert_eq!(report.units.len(), 1);
        assert_eq!(report.rows_for("tag_organization"), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_tenant_fails() {
        let (dir, pool, registry) = seeded().await;
        let mut sink = create_sink(&dir.path().join("none")).unwrap();

        let result = ExportEngine::new(&registry, &pool)
            .export(&ExportScope::tenant("nope"), sink.as_mut())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_templates_are_header_only() {
        let (dir, _pool, registry) = seeded().await;
        let out = dir.path().join("templates");
        let mut sink = create_sink(&out).unwrap();

        let written = export_templates(&registry, sink.as_mut()).unwrap();
        assert_eq!(written, registry.len() + registry.pivots().len());

        let mut source = DirectorySource::open(&out).unwrap();
        let employee = source.read_unit("employee").unwrap().unwrap();
        assert!(employee.is_empty());
        assert_eq!(employee.header, registry.entry("employee").unwrap().descriptor.export_header());
    }
}
