//! Import engine
//!
//! Re-inserts an archive into a destination database in registry order,
//! remapping every identifier through the [`RemapStore`]. Each entity type is
//! one transaction: a failing row rolls the whole batch back, the run then
//! continues with the next type unless the failed entry is essential.

pub mod cleanup;
pub mod remap;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use serde::Serialize;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::archive::{ArchiveError, TabularUnit, UnitSource};
use crate::error::StorageError;
use crate::export::UnitKind;
use crate::metadata::{EntityDescriptor, RelationRole};
use crate::registry::{EntityRegistry, PivotEntry, RegistryEntry};
use crate::storage::sqlite::{self, ImportRecordRow};
use crate::storage::{Value, ValueError};

use cleanup::cleanup;
use remap::{RemapKind, RemapStore, StagedBatch};

/// A row that could not be imported; fails its entity batch
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("row {row}: column '{column}' references {target} '{source_id}' which was not imported")]
    MissingDependency {
        row: usize,
        column: String,
        target: String,
        source_id: String,
    },

    #[error("row {row}: {matches} existing rows match its natural key ({key})")]
    AmbiguousMatch {
        row: usize,
        key: String,
        matches: usize,
    },

    #[error("row {row}: column '{column}': {source}")]
    InvalidValue {
        row: usize,
        column: String,
        #[source]
        source: ValueError,
    },

    #[error("row {row}: {message}")]
    Constraint { row: usize, message: String },
}

/// Failure that stops the whole run
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("essential entity '{entity}' failed: {reason}")]
    Essential { entity: String, reason: String },

    #[error("target tenant '{0}' does not exist in the destination")]
    UnknownTenant(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Knobs of one import run
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Remove existing destination rows first
    pub cleanup: bool,
    /// Import into this existing tenant instead of creating a new one
    pub target_tenant: Option<String>,
    /// Write every mapping to the `import_record` table
    pub persist_remap: bool,
    /// Checked between entity types
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Imported,
    Skipped,
    Failed,
    Cancelled,
}

/// Status line of one entity type or pivot
#[derive(Debug, Clone, Serialize)]
pub struct EntityStatus {
    pub name: String,
    pub kind: UnitKind,
    pub outcome: Outcome,
    /// Rows inserted
    pub inserted: usize,
    /// Static rows matched to existing destination rows
    pub matched: usize,
    /// Pivot pairs dropped for an unresolved endpoint, or duplicates ignored
    pub dropped: usize,
    /// Why the batch did not import
    pub reason: Option<String>,
    #[serde(skip)]
    pub errors: Vec<RowError>,
}

impl EntityStatus {
    fn new(name: &str, kind: UnitKind, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            kind,
            outcome,
            inserted: 0,
            matched: 0,
            dropped: 0,
            reason: None,
            errors: Vec::new(),
        }
    }

    fn failed(name: &str, kind: UnitKind, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(name, kind, Outcome::Failed)
        }
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        match self.outcome {
            Outcome::Imported if self.kind == UnitKind::Pivot => {
                format!("{} pairs linked, {} dropped", self.inserted, self.dropped)
            }
            Outcome::Imported => format!("{} inserted, {} matched", self.inserted, self.matched),
            Outcome::Skipped => "no unit in archive".to_string(),
            Outcome::Cancelled => "cancelled".to_string(),
            Outcome::Failed => self
                .reason
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
        }
    }
}

/// Counts across entity types (pivots excluded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportTotals {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Result of an import run
#[derive(Debug)]
pub struct ImportReport {
    pub statuses: Vec<EntityStatus>,
    /// Destination tenant the archive was imported into
    pub tenant_id: String,
    pub remap: RemapStore,
    /// Deferred columns patched after the run
    pub patched: usize,
    /// Deferred columns left NULL because their target never arrived
    pub unpatched: usize,
}

impl ImportReport {
    pub fn totals(&self) -> ImportTotals {
        let mut totals = ImportTotals::default();
        for status in self.statuses.iter().filter(|s| s.kind == UnitKind::Entity) {
            match status.outcome {
                Outcome::Imported => totals.imported += 1,
                Outcome::Skipped => totals.skipped += 1,
                Outcome::Failed => totals.failed += 1,
                Outcome::Cancelled => totals.cancelled += 1,
            }
        }
        totals
    }

    pub fn status(&self, name: &str) -> Option<&EntityStatus> {
        self.statuses.iter().find(|s| s.name == name)
    }
}

/// Column value written later, once its target is known
#[derive(Debug, Clone)]
struct DeferredPatch {
    table: String,
    primary_key: String,
    row_id: String,
    column: String,
    target: String,
    source_value: String,
}

/// What happened to one imported row
enum RowOutcome {
    Inserted,
    Matched,
}

/// Row failures split by whether the batch or the run is affected
enum RowFailure {
    Row(RowError),
    Fatal(sqlx::Error),
}

impl From<RowError> for RowFailure {
    fn from(err: RowError) -> Self {
        RowFailure::Row(err)
    }
}

/// Turn a statement error into a row error, or keep it fatal when the
/// connection itself failed
fn classify(row: usize, err: sqlx::Error) -> RowFailure {
    match err {
        sqlx::Error::Database(db) => RowFailure::Row(RowError::Constraint {
            row,
            message: db.message().to_string(),
        }),
        other => RowFailure::Fatal(other),
    }
}

/// Mutable state of one batch
struct Batch<'r> {
    staged: StagedBatch,
    patches: Vec<DeferredPatch>,
    remap: &'r RemapStore,
    tenant_id: &'r str,
}

/// Writes an archive into a destination database
pub struct ImportEngine<'a> {
    registry: &'a EntityRegistry,
    pool: &'a SqlitePool,
    options: ImportOptions,
}

impl<'a> ImportEngine<'a> {
    pub fn new(registry: &'a EntityRegistry, pool: &'a SqlitePool, options: ImportOptions) -> Self {
        Self {
            registry,
            pool,
            options,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Import every unit of `source`
    pub async fn run(&self, source: &mut dyn UnitSource) -> Result<ImportReport, ImportError> {
        let mut conn = self.pool.acquire().await?;
        sqlite::verify_storage(&mut conn, self.registry).await?;

        if let Some(tenant) = &self.options.target_tenant {
            let root = self.registry.tenant_root();
            let exists = match root {
                Some(root) => {
                    sqlite::row_exists(&mut conn, root.table_name(), &root.descriptor.primary_key, tenant)
                        .await?
                }
                None => false,
            };
            if !exists {
                return Err(ImportError::UnknownTenant(tenant.clone()));
            }
        }

        if self.options.cleanup {
            let report = cleanup(&mut conn, self.registry, self.options.target_tenant.as_deref()).await?;
            log::info!("Cleanup removed {} rows", report.total());
        }

        let tenant_id = self
            .options
            .target_tenant
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let known: HashSet<String> = source.unit_names().into_iter().collect();
        for name in &known {
            if self.registry.entry_by_table(name).is_none()
                && !self.registry.pivots().iter().any(|p| p.table_name() == name)
            {
                log::warn!("Archive unit '{}' matches no registered table; ignoring it", name);
            }
        }

        let mut remap = RemapStore::new();
        let mut patches: Vec<DeferredPatch> = Vec::new();
        let mut statuses = Vec::new();
        let mut cancelled = false;

        for entry in self.registry.ordered_entries() {
            if !cancelled && self.is_cancelled() {
                log::warn!("Import cancelled before '{}'", entry.table_name());
                cancelled = true;
            }
            if cancelled {
                statuses.push(EntityStatus::new(entry.table_name(), UnitKind::Entity, Outcome::Cancelled));
                for pivot in self.registry.pivots_after(entry.type_id()) {
                    statuses.push(EntityStatus::new(pivot.table_name(), UnitKind::Pivot, Outcome::Cancelled));
                }
                continue;
            }

            let status = match source.read_unit(entry.table_name())? {
                None => {
                    if entry.is_tenant_root() && self.options.target_tenant.is_none() {
                        return Err(ImportError::Essential {
                            entity: entry.type_id().to_string(),
                            reason: "archive has no tenant unit and no target tenant was given"
                                .to_string(),
                        });
                    }
                    log::info!("No unit for '{}'; skipping", entry.table_name());
                    EntityStatus::new(entry.table_name(), UnitKind::Entity, Outcome::Skipped)
                }
                Some(unit) => {
                    self.import_entity(&mut conn, entry, &unit, &tenant_id, &mut remap, &mut patches)
                        .await?
                }
            };

            if status.outcome == Outcome::Failed {
                log::error!("Failed to import '{}': {}", entry.table_name(), status.summary());
                for err in &status.errors {
                    log::error!("  {}: {}", entry.table_name(), err);
                }
                if entry.is_essential() {
                    return Err(ImportError::Essential {
                        entity: entry.type_id().to_string(),
                        reason: status.summary(),
                    });
                }
            }
            statuses.push(status);

            for pivot in self.registry.pivots_after(entry.type_id()) {
                let status = match source.read_unit(pivot.table_name())? {
                    None => EntityStatus::new(pivot.table_name(), UnitKind::Pivot, Outcome::Skipped),
                    Some(unit) => self.import_pivot(&mut conn, pivot, &unit, &remap).await?,
                };
                statuses.push(status);
            }
        }

        let (patched, unpatched) = self.apply_patches(&mut conn, &patches, &remap).await?;

        if self.options.persist_remap && !remap.is_empty() {
            self.persist(&mut conn, &tenant_id, &remap).await?;
        }

        Ok(ImportReport {
            statuses,
            tenant_id,
            remap,
            patched,
            unpatched,
        })
    }

    async fn import_entity(
        &self,
        conn: &mut SqliteConnection,
        entry: &RegistryEntry,
        unit: &TabularUnit,
        tenant_id: &str,
        remap: &mut RemapStore,
        patches: &mut Vec<DeferredPatch>,
    ) -> Result<EntityStatus, ImportError> {
        let descriptor = &entry.descriptor;
        let name = entry.table_name();

        if unit.column_index(&descriptor.primary_key).is_none() {
            return Ok(EntityStatus::failed(
                name,
                UnitKind::Entity,
                format!("unit has no '{}' column", descriptor.primary_key),
            ));
        }
        let known = descriptor.export_header();
        for column in unit.header.iter().filter(|c| !known.contains(c)) {
            log::warn!("Unit '{}' has unknown column '{}'; ignoring it", name, column);
        }

        log::info!("Importing {} rows into '{}'", unit.len(), name);

        let mut tx = conn.begin().await?;
        let mut batch = Batch {
            staged: StagedBatch::new(),
            patches: Vec::new(),
            remap,
            tenant_id,
        };
        let mut status = EntityStatus::new(name, UnitKind::Entity, Outcome::Imported);

        for (idx, record) in unit.records().enumerate() {
            let row = idx + 1;
            match self.import_row(&mut tx, entry, &record, row, &mut batch).await {
                Ok(RowOutcome::Inserted) => status.inserted += 1,
                Ok(RowOutcome::Matched) => status.matched += 1,
                Err(RowFailure::Row(err)) => status.errors.push(err),
                Err(RowFailure::Fatal(err)) => return Err(err.into()),
            }
        }

        if !status.errors.is_empty() {
            tx.rollback().await?;
            let first = &status.errors[0];
            status.reason = Some(format!("{} failing row(s), first: {}", status.errors.len(), first));
            status.outcome = Outcome::Failed;
            status.inserted = 0;
            status.matched = 0;
            return Ok(status);
        }

        tx.commit().await?;
        let Batch {
            staged, patches: new_patches, ..
        } = batch;
        remap.commit(staged);
        patches.extend(new_patches);

        log::info!("Imported '{}': {}", name, status.summary());
        Ok(status)
    }

    async fn import_row(
        &self,
        conn: &mut SqliteConnection,
        entry: &RegistryEntry,
        record: &IndexMap<&str, &str>,
        row: usize,
        batch: &mut Batch<'_>,
    ) -> Result<RowOutcome, RowFailure> {
        let descriptor = &entry.descriptor;
        let type_id = entry.type_id();

        let source_id = record
            .get(descriptor.primary_key.as_str())
            .map(|s| s.trim())
            .unwrap_or_default();
        if source_id.is_empty() {
            return Err(RowError::Constraint {
                row,
                message: format!("empty '{}'", descriptor.primary_key),
            }
            .into());
        }
        if batch.staged.staged(source_id).is_some() {
            return Err(RowError::Constraint {
                row,
                message: format!("duplicate source id '{}'", source_id),
            }
            .into());
        }

        // The tenant row maps onto the run's tenant
        if entry.is_tenant_root() {
            if !batch.staged.is_empty() {
                return Err(RowError::Constraint {
                    row,
                    message: "archive contains more than one tenant".to_string(),
                }
                .into());
            }
            if self.options.target_tenant.is_some() {
                batch
                    .staged
                    .stage(type_id, source_id, batch.tenant_id, RemapKind::Substituted);
                return Ok(RowOutcome::Matched);
            }
        }

        let (mut columns, mut values, row_patches) = self.build_values(entry, record, row, batch)?;

        if entry.is_static() {
            if let Some(existing) = self.match_static(conn, descriptor, &columns, &values, row).await? {
                batch
                    .staged
                    .stage(type_id, source_id, &existing, RemapKind::Matched);
                return Ok(RowOutcome::Matched);
            }
        }

        let new_id = if entry.is_tenant_root() {
            batch.tenant_id.to_string()
        } else {
            Uuid::new_v4().to_string()
        };
        columns.insert(0, descriptor.primary_key.clone());
        values.insert(0, Value::Text(new_id.clone()));

        if let Err(err) = sqlite::insert_row(conn, entry.table_name(), &columns, &values).await {
            // A concurrent or differently-normalized duplicate: retry the lookup
            if entry.is_static() && sqlite::is_unique_violation(&err) {
                if let Some(existing) = self
                    .match_static(conn, descriptor, &columns[1..], &values[1..], row)
                    .await?
                {
                    batch
                        .staged
                        .stage(type_id, source_id, &existing, RemapKind::Matched);
                    return Ok(RowOutcome::Matched);
                }
            }
            return Err(classify(row, err));
        }

        batch
            .staged
            .stage(type_id, source_id, &new_id, RemapKind::Inserted);
        for (column, target, source_value) in row_patches {
            batch.patches.push(DeferredPatch {
                table: entry.table_name().to_string(),
                primary_key: descriptor.primary_key.clone(),
                row_id: new_id.clone(),
                column,
                target,
                source_value,
            });
        }
        Ok(RowOutcome::Inserted)
    }

    /// Convert scalar cells and remap relation cells
    ///
    /// Returns the columns to write (without primary key), their values and
    /// the deferred `(column, target, source value)` patches.
    #[allow(clippy::type_complexity)]
    fn build_values(
        &self,
        entry: &RegistryEntry,
        record: &IndexMap<&str, &str>,
        row: usize,
        batch: &Batch<'_>,
    ) -> Result<(Vec<String>, Vec<Value>, Vec<(String, String, String)>), RowError> {
        let descriptor = &entry.descriptor;
        let type_id = entry.type_id();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut deferred = Vec::new();

        for column in &descriptor.columns {
            let Some(cell) = record.get(column.name.as_str()) else {
                continue;
            };
            let value = Value::parse(cell, column.column_type).map_err(|source| {
                RowError::InvalidValue {
                    row,
                    column: column.name.clone(),
                    source,
                }
            })?;
            columns.push(column.name.clone());
            values.push(value);
        }

        for edge in descriptor.column_edges() {
            let Some(column) = edge.column() else {
                continue;
            };
            let Some(cell) = record.get(column) else {
                continue;
            };
            let cell = cell.trim();

            let value = if cell.is_empty() {
                Value::Null
            } else {
                match edge.role {
                    RelationRole::Tenant => Value::Text(batch.tenant_id.to_string()),
                    // Audit users may arrive later; never fail a row over them
                    RelationRole::Audit => match batch.remap.resolve(&edge.target, cell) {
                        Some(id) => Value::Text(id.to_string()),
                        None if self.registry.entry(&edge.target).is_some() => {
                            deferred.push((column.to_string(), edge.target.clone(), cell.to_string()));
                            Value::Null
                        }
                        None => Value::Null,
                    },
                    RelationRole::Organization | RelationRole::Data => {
                        if self.registry.is_external(type_id, column)
                            || self.registry.entry(&edge.target).is_none()
                        {
                            Value::Null
                        } else if self.registry.is_deferred(type_id, column) {
                            deferred.push((column.to_string(), edge.target.clone(), cell.to_string()));
                            Value::Null
                        } else {
                            match batch.remap.resolve(&edge.target, cell) {
                                Some(id) => Value::Text(id.to_string()),
                                None => {
                                    return Err(RowError::MissingDependency {
                                        row,
                                        column: column.to_string(),
                                        target: edge.target.clone(),
                                        source_id: cell.to_string(),
                                    });
                                }
                            }
                        }
                    }
                }
            };

            columns.push(column.to_string());
            values.push(value);
        }

        Ok((columns, values, deferred))
    }

    /// Look up an existing row by any unique constraint of a static type
    async fn match_static(
        &self,
        conn: &mut SqliteConnection,
        descriptor: &EntityDescriptor,
        columns: &[String],
        values: &[Value],
        row: usize,
    ) -> Result<Option<String>, RowFailure> {
        let value_of = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .map(|idx| &values[idx])
        };
        let scope = descriptor
            .tenant_column()
            .and_then(|column| value_of(column).map(|value| (column, value)));

        for unique in &descriptor.uniques {
            let mut key = Vec::with_capacity(unique.columns.len());
            for column in &unique.columns {
                match value_of(column) {
                    Some(value) => key.push((column.as_str(), value)),
                    None => break,
                }
            }
            if key.len() != unique.columns.len() || key.iter().all(|(_, v)| v.is_null()) {
                continue;
            }

            let ids = sqlite::find_by_natural_key(
                conn,
                &descriptor.table_name,
                &descriptor.primary_key,
                &key,
                scope,
            )
            .await
            .map_err(|e| classify(row, e))?;

            match ids.len() {
                0 => continue,
                1 => return Ok(ids.into_iter().next()),
                matches => {
                    return Err(RowError::AmbiguousMatch {
                        row,
                        key: unique.columns.join(", "),
                        matches,
                    }
                    .into());
                }
            }
        }
        Ok(None)
    }

    async fn import_pivot(
        &self,
        conn: &mut SqliteConnection,
        pivot: &PivotEntry,
        unit: &TabularUnit,
        remap: &RemapStore,
    ) -> Result<EntityStatus, ImportError> {
        let name = pivot.table_name();
        let (Some(owner_idx), Some(target_idx)) = (
            unit.column_index(&pivot.table.owner_column),
            unit.column_index(&pivot.table.target_column),
        ) else {
            return Ok(EntityStatus::failed(
                name,
                UnitKind::Pivot,
                format!(
                    "unit needs '{}' and '{}' columns",
                    pivot.table.owner_column, pivot.table.target_column
                ),
            ));
        };

        let mut tx = conn.begin().await?;
        let mut status = EntityStatus::new(name, UnitKind::Pivot, Outcome::Imported);

        for (idx, cells) in unit.rows.iter().enumerate() {
            let row = idx + 1;
            let owner_cell = cells.get(owner_idx).map(String::as_str).unwrap_or_default();
            let target_cell = cells.get(target_idx).map(String::as_str).unwrap_or_default();
            let owner = remap.resolve(&pivot.owner, owner_cell);
            let target = remap.resolve(&pivot.target, target_cell);
            let (Some(owner), Some(target)) = (owner, target) else {
                log::warn!(
                    "{} row {}: dropping pair ({}, {}); {} endpoint was not imported",
                    name,
                    row,
                    owner_cell,
                    target_cell,
                    if owner.is_none() { pivot.owner.as_str() } else { pivot.target.as_str() }
                );
                status.dropped += 1;
                continue;
            };

            match sqlite::insert_pivot(&mut tx, &pivot.table, owner, target).await {
                Ok(true) => status.inserted += 1,
                Ok(false) => status.dropped += 1,
                Err(err) => match classify(row, err) {
                    RowFailure::Row(err) => status.errors.push(err),
                    RowFailure::Fatal(err) => return Err(err.into()),
                },
            }
        }

        if !status.errors.is_empty() {
            tx.rollback().await?;
            status.reason = Some(format!(
                "{} failing pair(s), first: {}",
                status.errors.len(),
                status.errors[0]
            ));
            status.outcome = Outcome::Failed;
            status.inserted = 0;
            log::error!("Failed to import pivot '{}': {}", name, status.summary());
            return Ok(status);
        }

        tx.commit().await?;
        log::info!("Imported pivot '{}': {}", name, status.summary());
        Ok(status)
    }

    /// Write deferred columns now that every type has been imported
    async fn apply_patches(
        &self,
        conn: &mut SqliteConnection,
        patches: &[DeferredPatch],
        remap: &RemapStore,
    ) -> Result<(usize, usize), ImportError> {
        if patches.is_empty() {
            return Ok((0, 0));
        }

        let mut tx = conn.begin().await?;
        let (mut patched, mut unpatched) = (0, 0);
        for patch in patches {
            match remap.resolve(&patch.target, &patch.source_value) {
                Some(id) => {
                    sqlite::update_column(
                        &mut tx,
                        &patch.table,
                        &patch.primary_key,
                        &patch.row_id,
                        &patch.column,
                        &Value::Text(id.to_string()),
                    )
                    .await?;
                    patched += 1;
                }
                None => {
                    log::warn!(
                        "{}.{} of row '{}' left empty: {} '{}' was not imported",
                        patch.table,
                        patch.column,
                        patch.row_id,
                        patch.target,
                        patch.source_value
                    );
                    unpatched += 1;
                }
            }
        }
        tx.commit().await?;

        log::info!("Patched {} deferred references ({} unresolved)", patched, unpatched);
        Ok((patched, unpatched))
    }

    async fn persist(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        remap: &RemapStore,
    ) -> Result<(), ImportError> {
        sqlite::ensure_import_record_table(conn).await?;

        let imported_at = chrono::Utc::now().to_rfc3339();
        let mut tx = conn.begin().await?;
        for record in remap.records() {
            sqlite::insert_import_record(
                &mut tx,
                ImportRecordRow {
                    tenant_id,
                    entity_type: &record.entity_type,
                    source_id: &record.source_id,
                    destination_id: &record.target_id,
                    imported_at: &imported_at,
                },
            )
            .await?;
        }
        tx.commit().await?;

        log::info!("Recorded {} identifier mappings", remap.len());
        Ok(())
    }
}
