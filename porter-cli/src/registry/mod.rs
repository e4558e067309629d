//! Entity registry
//!
//! The ordered list of exportable entity types. Built once through
//! [`RegistryBuilder`], immutable afterwards and shared by reference with the
//! export and import engines.

pub mod catalog;
pub mod extensions;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::graph::{DeferredEdge, DependencyCategory, DependencyGraph, GraphEdge};
use crate::metadata::{EntityDefinition, EntityDescriptor, PivotTable, RelationRole, introspect};

/// Column substitution applied when scoping rows to a tenant
///
/// The tenant entry itself has no `tenantId` column; its own `id` is used
/// instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitute {
    pub original_field: String,
    pub substitute_field: String,
}

/// Per-entry registration flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    /// Reference data matched by natural key instead of always inserted
    #[serde(default)]
    pub is_static: bool,
    /// Failure of this entry aborts the whole import run
    #[serde(default)]
    pub essential: bool,
    /// Marks the root tenant entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitute: Option<Substitute>,
}

impl EntryOptions {
    /// Ordinary tenant data
    pub fn data() -> Self {
        Self::default()
    }

    /// Global reference data
    pub fn reference() -> Self {
        Self {
            is_static: true,
            ..Self::default()
        }
    }

    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    /// Root tenant entry (`tenantId` is substituted by `id`)
    pub fn tenant_root() -> Self {
        Self {
            is_static: false,
            essential: true,
            substitute: Some(Substitute {
                original_field: crate::metadata::TENANT_COLUMN.to_string(),
                substitute_field: crate::metadata::definition::DEFAULT_PRIMARY_KEY.to_string(),
            }),
        }
    }
}

/// One entity type to register
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRegistration {
    pub definition: EntityDefinition,
    pub options: EntryOptions,
}

impl EntityRegistration {
    pub fn new(definition: EntityDefinition, options: EntryOptions) -> Self {
        Self {
            definition,
            options,
        }
    }
}

/// Source of additional entity types (plugins, extension files)
pub trait EntityProvider {
    /// Human readable provider name for logs
    fn name(&self) -> &str;

    /// Entity types contributed by this provider, in registration order
    fn entity_types(&self) -> Vec<EntityRegistration>;
}

/// A registered entity type in import order
#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntry {
    pub descriptor: EntityDescriptor,
    pub options: EntryOptions,
    /// Position in the ordered entries
    pub position: usize,
}

impl RegistryEntry {
    pub fn type_id(&self) -> &str {
        &self.descriptor.type_id
    }

    pub fn table_name(&self) -> &str {
        &self.descriptor.table_name
    }

    pub fn is_static(&self) -> bool {
        self.options.is_static
    }

    pub fn is_essential(&self) -> bool {
        self.options.essential
    }

    pub fn is_tenant_root(&self) -> bool {
        self.options.substitute.is_some()
    }

    /// Column used to scope rows to a tenant (after substitution)
    pub fn scope_column(&self) -> Option<&str> {
        match &self.options.substitute {
            Some(substitute) => Some(substitute.substitute_field.as_str()),
            None => self.descriptor.tenant_column(),
        }
    }
}

/// A many-to-many pivot table scheduled after both endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotEntry {
    /// Entity type owning the relation
    pub owner: String,
    /// Entity type on the other side
    pub target: String,
    pub property: String,
    pub table: PivotTable,
    /// The endpoint imported last; the pivot follows it
    pub after: String,
}

impl PivotEntry {
    pub fn table_name(&self) -> &str {
        &self.table.table_name
    }
}

/// Collects registrations, then validates and orders them once
#[derive(Default)]
pub struct RegistryBuilder {
    registrations: Vec<EntityRegistration>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one entity type
    pub fn register_entity_type(
        &mut self,
        definition: EntityDefinition,
        options: EntryOptions,
    ) -> &mut Self {
        self.registrations
            .push(EntityRegistration::new(definition, options));
        self
    }

    /// Register every entity type contributed by a provider
    pub fn register_provider(&mut self, provider: &dyn EntityProvider) -> &mut Self {
        let types = provider.entity_types();
        log::debug!(
            "Registering {} entity type(s) from provider '{}'",
            types.len(),
            provider.name()
        );
        self.registrations.extend(types);
        self
    }

    /// Introspect, validate and order every registration
    pub fn build(&self) -> Result<EntityRegistry, RegistryError> {
        let mut descriptors = Vec::with_capacity(self.registrations.len());
        let mut options_by_type: HashMap<String, EntryOptions> = HashMap::new();
        let mut tables: HashMap<String, String> = HashMap::new();
        let mut tenant_root: Option<String> = None;

        for registration in &self.registrations {
            let descriptor = introspect(&registration.definition, registration.options.is_static)?;

            if options_by_type.contains_key(&descriptor.type_id) {
                return Err(RegistryError::DuplicateType(descriptor.type_id));
            }
            if let Some(first) = tables.get(&descriptor.table_name) {
                return Err(RegistryError::DuplicateTable {
                    table: descriptor.table_name.clone(),
                    first: first.clone(),
                    second: descriptor.type_id,
                });
            }
            if registration.options.substitute.is_some() {
                if let Some(existing) = &tenant_root {
                    return Err(RegistryError::DuplicateTenantRoot(
                        existing.clone(),
                        descriptor.type_id,
                    ));
                }
                tenant_root = Some(descriptor.type_id.clone());
            }

            tables.insert(descriptor.table_name.clone(), descriptor.type_id.clone());
            options_by_type.insert(descriptor.type_id.clone(), registration.options.clone());
            descriptors.push(descriptor);
        }

        let tenant_root = tenant_root.ok_or(RegistryError::MissingTenantRoot)?;

        // The organization type is whatever organization links point at
        let organization_type = descriptors
            .iter()
            .flat_map(|d| d.column_edges())
            .find(|e| e.role == RelationRole::Organization)
            .map(|e| e.target.clone())
            .filter(|target| options_by_type.contains_key(target));

        let graph = DependencyGraph::build(&descriptors)?;

        let mut pinned = vec![tenant_root.as_str()];
        if let Some(organization) = &organization_type {
            pinned.push(organization.as_str());
        }
        let sorted = graph.insert_order(&pinned)?;

        let mut by_type: HashMap<String, EntityDescriptor> = descriptors
            .into_iter()
            .map(|d| (d.type_id.clone(), d))
            .collect();

        let mut entries = Vec::with_capacity(sorted.order.len());
        let mut index = HashMap::new();
        for (position, type_id) in sorted.order.iter().enumerate() {
            let Some(descriptor) = by_type.remove(type_id) else {
                continue;
            };
            let options = options_by_type.remove(type_id).unwrap_or_default();
            index.insert(type_id.clone(), position);
            entries.push(RegistryEntry {
                descriptor,
                options,
                position,
            });
        }

        let pivots = schedule_pivots(&entries, &index, &tables)?;

        log::debug!(
            "Registry built: {} entity types, {} pivots, {} deferred edges",
            entries.len(),
            pivots.len(),
            sorted.deferred.len()
        );

        Ok(EntityRegistry {
            entries,
            index,
            pivots,
            deferred: sorted.deferred,
            graph,
            tenant_root,
            organization_type,
        })
    }
}

/// Place each pivot right after the later of its two endpoints
fn schedule_pivots(
    entries: &[RegistryEntry],
    index: &HashMap<String, usize>,
    entity_tables: &HashMap<String, String>,
) -> Result<Vec<PivotEntry>, RegistryError> {
    let mut seen = HashSet::new();
    let mut pivots = Vec::new();

    for entry in entries {
        for edge in entry.descriptor.pivot_edges() {
            let Some(table) = edge.pivot() else {
                continue;
            };
            if entity_tables.contains_key(&table.table_name) || !seen.insert(table.table_name.clone())
            {
                return Err(RegistryError::DuplicatePivot(table.table_name.clone()));
            }

            let Some(&target_position) = index.get(&edge.target) else {
                log::warn!(
                    "Pivot '{}' of '{}' references unregistered '{}'; it will not be exported or imported",
                    table.table_name,
                    entry.type_id(),
                    edge.target
                );
                continue;
            };

            let after = if target_position > entry.position {
                edge.target.clone()
            } else {
                entry.type_id().to_string()
            };

            pivots.push(PivotEntry {
                owner: entry.type_id().to_string(),
                target: edge.target.clone(),
                property: edge.property.clone(),
                table: table.clone(),
                after,
            });
        }
    }

    // Stable order: by the position of the endpoint they follow
    pivots.sort_by_key(|p| index.get(&p.after).copied().unwrap_or(usize::MAX));
    Ok(pivots)
}

/// Immutable, validated and ordered set of entity types
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
    pivots: Vec<PivotEntry>,
    deferred: Vec<DeferredEdge>,
    graph: DependencyGraph,
    tenant_root: String,
    organization_type: Option<String>,
}

impl EntityRegistry {
    /// Entries in import order (dependencies first)
    pub fn ordered_entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn entry(&self, type_id: &str) -> Option<&RegistryEntry> {
        self.index.get(type_id).map(|&i| &self.entries[i])
    }

    /// Entry stored in the given table
    pub fn entry_by_table(&self, table: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.table_name() == table)
    }

    pub fn position(&self, type_id: &str) -> Option<usize> {
        self.index.get(type_id).copied()
    }

    /// All pivots, in the order they are exported and imported
    pub fn pivots(&self) -> &[PivotEntry] {
        &self.pivots
    }

    /// Pivots that become importable right after the given entry
    pub fn pivots_after<'a>(&'a self, type_id: &'a str) -> impl Iterator<Item = &'a PivotEntry> {
        self.pivots.iter().filter(move |p| p.after == type_id)
    }

    /// Entries in teardown order (dependents first)
    pub fn delete_order(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().rev()
    }

    /// Edges left out of ordering and patched after the import
    pub fn deferred_edges(&self) -> &[DeferredEdge] {
        &self.deferred
    }

    pub fn is_deferred(&self, type_id: &str, column: &str) -> bool {
        self.deferred
            .iter()
            .any(|d| d.edge.entity == type_id && d.edge.column == column)
    }

    /// Nullable edges pointing outside the registry
    pub fn external_edges(&self) -> &[GraphEdge] {
        &self.graph.external
    }

    pub fn is_external(&self, type_id: &str, column: &str) -> bool {
        self.graph
            .external
            .iter()
            .any(|e| e.entity == type_id && e.column == column)
    }

    /// The root tenant entry
    pub fn tenant_root(&self) -> Option<&RegistryEntry> {
        self.entry(&self.tenant_root)
    }

    pub fn tenant_type(&self) -> &str {
        &self.tenant_root
    }

    pub fn organization_type(&self) -> Option<&str> {
        self.organization_type.as_deref()
    }

    pub fn categorize(&self, type_id: &str) -> DependencyCategory {
        self.graph.categorize(type_id)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Build the registry from the built-in catalog plus any providers
///
/// This is the only bootstrap path; providers register after the catalog so
/// their types can reference built-in ones.
pub fn bootstrap(providers: &[&dyn EntityProvider]) -> Result<EntityRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    builder.register_provider(&catalog::BuiltinCatalog);
    for provider in providers {
        builder.register_provider(*provider);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::metadata::ColumnType;

    fn minimal() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        builder
            .register_entity_type(
                EntityDefinition::new("tenant").column("name", ColumnType::Text),
                EntryOptions::tenant_root(),
            )
            .register_entity_type(
                EntityDefinition::new("employee")
                    .organization_owned()
                    .many_to_many("tags", "tag", "tag_employee"),
                EntryOptions::data(),
            )
            .register_entity_type(
                EntityDefinition::new("organization").tenant_owned(),
                EntryOptions::data().essential(),
            )
            .register_entity_type(
                EntityDefinition::new("tag").organization_owned(),
                EntryOptions::data(),
            );
        builder
    }

    #[test]
    fn test_tenant_and_organization_come_first() {
        let registry = minimal().build().unwrap();

        let order: Vec<_> = registry.ordered_entries().iter().map(|e| e.type_id()).collect();
        assert_eq!(order, vec!["tenant", "organization", "employee", "tag"]);
        assert_eq!(registry.organization_type(), Some("organization"));
        assert!(registry.tenant_root().unwrap().is_tenant_root());
    }

    #[test]
    fn test_pivot_scheduled_after_later_endpoint() {
        let registry = minimal().build().unwrap();

        let pivots = registry.pivots();
        assert_eq!(pivots.len(), 1);
        assert_eq!(pivots[0].table_name(), "tag_employee");
        assert_eq!(pivots[0].after, "tag");
        assert_eq!(registry.pivots_after("tag").count(), 1);
        assert_eq!(registry.pivots_after("employee").count(), 0);
    }

    #[test]
    fn test_scope_column_uses_substitute() {
        let registry = minimal().build().unwrap();

        assert_eq!(registry.entry("tenant").unwrap().scope_column(), Some("id"));
        assert_eq!(registry.entry("tag").unwrap().scope_column(), Some("tenantId"));
    }

    #[test]
    fn test_delete_order_is_reverse() {
        let registry = minimal().build().unwrap();

        let delete: Vec<_> = registry.delete_order().map(|e| e.type_id()).collect();
        assert_eq!(delete, vec!["tag", "employee", "organization", "tenant"]);
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut builder = minimal();
        builder.register_entity_type(EntityDefinition::new("tag").table("tag_v2"), EntryOptions::data());

        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::DuplicateType("tag".to_string())
        );
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut builder = minimal();
        builder.register_entity_type(EntityDefinition::new("label").table("tag"), EntryOptions::data());

        assert!(matches!(
            builder.build().unwrap_err(),
            RegistryError::DuplicateTable { ref table, .. } if table == "tag"
        ));
    }

    #[test]
    fn test_missing_tenant_root_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register_entity_type(EntityDefinition::new("tag"), EntryOptions::data());

        assert_eq!(builder.build().unwrap_err(), RegistryError::MissingTenantRoot);
    }

    #[test]
    fn test_second_tenant_root_rejected() {
        let mut builder = minimal();
        builder.register_entity_type(EntityDefinition::new("realm"), EntryOptions::tenant_root());

        assert!(matches!(
            builder.build().unwrap_err(),
            RegistryError::DuplicateTenantRoot(..)
        ));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let mut builder = minimal();
        builder
            .register_entity_type(EntityDefinition::new("a").belongs_to("b", "b"), EntryOptions::data())
            .register_entity_type(EntityDefinition::new("b").belongs_to("a", "a"), EntryOptions::data());

        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::Graph(GraphError::Cycle {
                entities: vec!["a".to_string(), "b".to_string()]
            })
        );
    }

    #[test]
    fn test_pivot_table_colliding_with_entity_table_rejected() {
        let mut builder = minimal();
        builder.register_entity_type(EntityDefinition::new("tag_employee"), EntryOptions::data());

        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::DuplicatePivot("tag_employee".to_string())
        );
    }

    #[test]
    fn test_provider_registration() {
        struct Plugin;
        impl EntityProvider for Plugin {
            fn name(&self) -> &str {
                "plugin"
            }
            fn entity_types(&self) -> Vec<EntityRegistration> {
                vec![EntityRegistration::new(
                    EntityDefinition::new("plugin_note")
                        .tenant_owned()
                        .belongs_to("employee", "employee"),
                    EntryOptions::data(),
                )]
            }
        }

        let mut builder = minimal();
        builder.register_provider(&Plugin);
        let registry = builder.build().unwrap();

        let note = registry.position("plugin_note").unwrap();
        assert!(registry.position("employee").unwrap() < note);
    }
}
