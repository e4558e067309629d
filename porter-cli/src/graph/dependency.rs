//! Dependency graph logic for ordering entity imports
//!
//! This module provides functions to:
//! - Build a dependency graph from entity relation edges
//! - Prune audit and ownership edges that must not drive ordering
//! - Perform a deterministic topological sort (ties broken by registration order)
//! - Defer nullable edges that close a cycle
//! - Categorize entities as standalone, dependent, or junction

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::error::GraphError;
use crate::metadata::{EntityDescriptor, RelationRole};

/// A foreign key column edge between two registered entity types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GraphEdge {
    /// Dependent entity type
    pub entity: String,
    /// Depended-upon entity type
    pub target: String,
    /// Foreign key column on the dependent table
    pub column: String,
    pub nullable: bool,
}

/// Why an edge does not constrain ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeferReason {
    /// Row references another row of its own type
    SelfReference,
    /// Nullable edge removed to break a cycle
    CycleBreak,
    /// Nullable edge from an ownership entity to a later type
    Ownership,
}

/// Edge whose value is written after the whole import has run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeferredEdge {
    pub edge: GraphEdge,
    pub reason: DeferReason,
}

/// Represents the category of an entity in the dependency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DependencyCategory {
    /// Entity has no data edges to other registered entities
    Standalone,
    /// Entity references exactly one other registered entity
    Dependent,
    /// Entity references 2+ registered entities (link-table shape)
    Junction,
}

impl DependencyCategory {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Standalone => "○",
            Self::Dependent => "→",
            Self::Junction => "⬌",
        }
    }
}

/// Result of a successful sort
#[derive(Debug, Clone, Default)]
pub struct InsertOrder {
    /// Entity type ids, dependencies first
    pub order: Vec<String>,
    /// Edges removed from ordering; resolved after the run
    pub deferred: Vec<DeferredEdge>,
}

/// Dependency graph over the registered entity types
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Entity type ids in registration order
    pub entities: Vec<String>,
    /// Registration index by type id
    index: HashMap<String, usize>,
    /// Retained data edges between two different registered types
    pub edges: Vec<GraphEdge>,
    /// Nullable self references (always deferred)
    pub self_references: Vec<GraphEdge>,
    /// Nullable edges to unregistered types; nulled on import
    pub external: Vec<GraphEdge>,
}

impl DependencyGraph {
    /// Build a dependency graph from descriptors given in registration order
    ///
    /// Audit, tenant and organization edges are pruned. Pivot edges never
    /// order their owner (they are imported after both endpoints).
    pub fn build(descriptors: &[EntityDescriptor]) -> Result<Self, GraphError> {
        let mut graph = DependencyGraph::default();

        for (idx, descriptor) in descriptors.iter().enumerate() {
            graph.entities.push(descriptor.type_id.clone());
            graph.index.insert(descriptor.type_id.clone(), idx);
        }

        for descriptor in descriptors {
            for edge in descriptor.column_edges() {
                if edge.role != RelationRole::Data {
                    continue;
                }
                let Some(column) = edge.column() else {
                    continue;
                };

                let graph_edge = GraphEdge {
                    entity: descriptor.type_id.clone(),
                    target: edge.target.clone(),
                    column: column.to_string(),
                    nullable: edge.nullable,
                };

                if !graph.index.contains_key(&edge.target) {
                    if !edge.nullable {
                        return Err(GraphError::UnresolvedDependency {
                            entity: graph_edge.entity,
                            target: graph_edge.target,
                            column: graph_edge.column,
                        });
                    }
                    log::warn!(
                        "Entity '{}' references unregistered '{}' via '{}'; values will be nulled on import",
                        graph_edge.entity,
                        graph_edge.target,
                        graph_edge.column
                    );
                    graph.external.push(graph_edge);
                } else if edge.target == descriptor.type_id {
                    // A required self link can never be written before its row exists
                    if !edge.nullable {
                        return Err(GraphError::Cycle {
                            entities: vec![graph_edge.entity],
                        });
                    }
                    graph.self_references.push(graph_edge);
                } else {
                    graph.edges.push(graph_edge);
                }
            }
        }

        Ok(graph)
    }

    /// Registration index of an entity type
    pub fn position(&self, entity: &str) -> Option<usize> {
        self.index.get(entity).copied()
    }

    /// Unique registered targets an entity depends on
    pub fn dependencies_of(&self, entity: &str) -> HashSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.entity == entity)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Categorize an entity based on its data edges
    pub fn categorize(&self, entity: &str) -> DependencyCategory {
        match self.dependencies_of(entity).len() {
            0 => DependencyCategory::Standalone,
            1 => DependencyCategory::Dependent,
            _ => DependencyCategory::Junction,
        }
    }

    /// Topological sort using Kahn's algorithm
    ///
    /// `pinned` types are emitted first, in the given order, regardless of
    /// their edges (tenant and organization). Remaining ties are broken by
    /// registration order. When the sort stalls, nullable edges lying on a
    /// cycle are deferred and sorting resumes; if no such edge exists the
    /// participating types are reported.
    pub fn insert_order(&self, pinned: &[&str]) -> Result<InsertOrder, GraphError> {
        let n = self.entities.len();
        let mut result = InsertOrder::default();
        let mut emitted = vec![false; n];

        for edge in &self.self_references {
            result.deferred.push(DeferredEdge {
                edge: edge.clone(),
                reason: DeferReason::SelfReference,
            });
        }

        // Pinned types go first; their own outgoing edges must point backwards
        let pinned_idx: Vec<usize> = pinned.iter().filter_map(|p| self.position(p)).collect();
        for (pos, &idx) in pinned_idx.iter().enumerate() {
            let name = &self.entities[idx];
            for edge in self.edges.iter().filter(|e| &e.entity == name) {
                let satisfied = pinned_idx[..pos]
                    .iter()
                    .any(|&p| self.entities[p] == edge.target);
                if satisfied {
                    continue;
                }
                if !edge.nullable {
                    return Err(GraphError::PinnedDependency {
                        entity: edge.entity.clone(),
                        target: edge.target.clone(),
                        column: edge.column.clone(),
                    });
                }
                result.deferred.push(DeferredEdge {
                    edge: edge.clone(),
                    reason: DeferReason::Ownership,
                });
            }
            emitted[idx] = true;
            result.order.push(name.clone());
        }

        // Pending edges per dependent, keyed by target index
        let mut pending: Vec<HashMap<usize, Vec<&GraphEdge>>> = vec![HashMap::new(); n];
        let mut dependents: Vec<HashSet<usize>> = vec![HashSet::new(); n];
        for edge in &self.edges {
            let (Some(from), Some(to)) = (self.position(&edge.entity), self.position(&edge.target))
            else {
                continue;
            };
            if emitted[from] || emitted[to] {
                continue;
            }
            pending[from].entry(to).or_default().push(edge);
            dependents[to].insert(from);
        }

        let mut ready: BTreeSet<usize> = (0..n)
            .filter(|&i| !emitted[i] && pending[i].is_empty())
            .collect();

        loop {
            while let Some(idx) = ready.pop_first() {
                emitted[idx] = true;
                result.order.push(self.entities[idx].clone());

                for &dependent in &dependents[idx] {
                    if pending[dependent].remove(&idx).is_some()
                        && pending[dependent].is_empty()
                        && !emitted[dependent]
                    {
                        ready.insert(dependent);
                    }
                }
            }

            if result.order.len() == n {
                break;
            }

            // Stalled: every remaining type waits on another remaining type
            let remaining: Vec<usize> = (0..n).filter(|&i| !emitted[i]).collect();
            let cyclic: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| self.reaches(&pending, i, i))
                .collect();

            let mut broke_any = false;
            for &from in &cyclic {
                let breakable: Vec<usize> = pending[from]
                    .iter()
                    .filter(|(to, edges)| {
                        edges.iter().all(|e| e.nullable) && self.reaches(&pending, **to, from)
                    })
                    .map(|(to, _)| *to)
                    .collect();

                for to in breakable {
                    if let Some(edges) = pending[from].remove(&to) {
                        log::debug!(
                            "Deferring {} edge(s) {} -> {} to break a cycle",
                            edges.len(),
                            self.entities[from],
                            self.entities[to]
                        );
                        for edge in edges {
                            result.deferred.push(DeferredEdge {
                                edge: edge.clone(),
                                reason: DeferReason::CycleBreak,
                            });
                        }
                        broke_any = true;
                    }
                }
                if pending[from].is_empty() {
                    ready.insert(from);
                }
            }

            if !broke_any {
                let participants = if cyclic.is_empty() { remaining } else { cyclic };
                let entities = participants
                    .into_iter()
                    .map(|i| self.entities[i].clone())
                    .collect();
                return Err(GraphError::Cycle { entities });
            }
        }

        Ok(result)
    }

    /// Delete order (dependents before dependencies - reverse of insert)
    pub fn delete_order(&self, pinned: &[&str]) -> Result<Vec<String>, GraphError> {
        let mut order = self.insert_order(pinned)?.order;
        order.reverse();
        Ok(order)
    }

    /// Whether `to` is reachable from `from` following pending edges
    /// (at least one step)
    fn reaches(&self, pending: &[HashMap<usize, Vec<&GraphEdge>>], from: usize, to: usize) -> bool {
        let mut stack: Vec<usize> = pending[from].keys().copied().collect();
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if seen.insert(node) {
                stack.extend(pending[node].keys().copied());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnType, EntityDefinition, introspect};

    fn build(definitions: Vec<EntityDefinition>) -> Result<DependencyGraph, GraphError> {
        let descriptors: Vec<_> = definitions
            .iter()
            .map(|d| introspect(d, false).unwrap())
            .collect();
        DependencyGraph::build(&descriptors)
    }

    fn pos(order: &[String], name: &str) -> usize {
        order.iter().position(|e| e == name).unwrap()
    }

    #[test]
    fn test_standalone_entity() {
        let graph = build(vec![
            EntityDefinition::new("standalone").column("name", ColumnType::Text),
        ])
        .unwrap();

        assert_eq!(graph.categorize("standalone"), DependencyCategory::Standalone);
    }

    #[test]
    fn test_dependent_and_junction_entity() {
        let graph = build(vec![
            EntityDefinition::new("account"),
            EntityDefinition::new("contact"),
            EntityDefinition::new("account_contact")
                .belongs_to("account", "account")
                .belongs_to("contact", "contact"),
            EntityDefinition::new("note").belongs_to("account", "account"),
        ])
        .unwrap();

        assert_eq!(graph.categorize("account"), DependencyCategory::Standalone);
        assert_eq!(graph.categorize("note"), DependencyCategory::Dependent);
        assert_eq!(graph.categorize("account_contact"), DependencyCategory::Junction);
    }

    #[test]
    fn test_topological_sort_chain() {
        // Registered in reverse to prove the graph, not the list, decides
        let graph = build(vec![
            EntityDefinition::new("child").belongs_to("parent", "parent"),
            EntityDefinition::new("parent").belongs_to("grandparent", "grandparent"),
            EntityDefinition::new("grandparent"),
        ])
        .unwrap();

        let order = graph.insert_order(&[]).unwrap().order;
        assert!(pos(&order, "grandparent") < pos(&order, "parent"));
        assert!(pos(&order, "parent") < pos(&order, "child"));
    }

    #[test]
    fn test_ties_follow_registration_order() {
        let graph = build(vec![
            EntityDefinition::new("zeta"),
            EntityDefinition::new("alpha"),
            EntityDefinition::new("mid"),
        ])
        .unwrap();

        let order = graph.insert_order(&[]).unwrap().order;
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_pinned_types_first() {
        let graph = build(vec![
            EntityDefinition::new("currency"),
            EntityDefinition::new("employee").organization_owned(),
            EntityDefinition::new("organization").tenant_owned(),
            EntityDefinition::new("tenant"),
        ])
        .unwrap();

        let order = graph.insert_order(&["tenant", "organization"]).unwrap().order;
        assert_eq!(order, vec!["tenant", "organization", "currency", "employee"]);
    }

    #[test]
    fn test_pinned_required_dependency_fails() {
        let graph = build(vec![
            EntityDefinition::new("tenant"),
            EntityDefinition::new("currency"),
            EntityDefinition::new("organization")
                .tenant_owned()
                .belongs_to("currency", "currency"),
        ])
        .unwrap();

        let err = graph.insert_order(&["tenant", "organization"]).unwrap_err();
        assert!(matches!(err, GraphError::PinnedDependency { ref target, .. } if target == "currency"));
    }

    #[test]
    fn test_pinned_nullable_dependency_deferred() {
        let graph = build(vec![
            EntityDefinition::new("tenant"),
            EntityDefinition::new("image_asset"),
            EntityDefinition::new("organization")
                .tenant_owned()
                .belongs_to_optional("image", "image_asset"),
        ])
        .unwrap();

        let result = graph.insert_order(&["tenant", "organization"]).unwrap();
        assert_eq!(result.order[..2], ["tenant".to_string(), "organization".to_string()]);
        assert_eq!(result.deferred.len(), 1);
        assert_eq!(result.deferred[0].reason, DeferReason::Ownership);
    }

    #[test]
    fn test_delete_order_reverses_insert() {
        let graph = build(vec![
            EntityDefinition::new("parent"),
            EntityDefinition::new("child").belongs_to("parent", "parent"),
        ])
        .unwrap();

        let mut insert = graph.insert_order(&[]).unwrap().order;
        let delete = graph.delete_order(&[]).unwrap();
        insert.reverse();
        assert_eq!(delete, insert);
        assert!(pos(&delete, "child") < pos(&delete, "parent"));
    }

    #[test]
    fn test_audit_and_ownership_edges_ignored_for_ordering() {
        let graph = build(vec![
            EntityDefinition::new("tenant"),
            EntityDefinition::new("user").tenant_owned().audited(),
            EntityDefinition::new("tag").tenant_owned().audited(),
        ])
        .unwrap();

        assert!(graph.edges.is_empty());
        assert_eq!(graph.categorize("tag"), DependencyCategory::Standalone);
    }

    #[test]
    fn test_self_reference_deferred() {
        let graph = build(vec![
            EntityDefinition::new("organization_department")
                .belongs_to_optional("parent", "organization_department"),
        ])
        .unwrap();

        let result = graph.insert_order(&[]).unwrap();
        assert_eq!(result.order.len(), 1);
        assert_eq!(result.deferred.len(), 1);
        assert_eq!(result.deferred[0].reason, DeferReason::SelfReference);
    }

    #[test]
    fn test_required_self_reference_fails() {
        let err = build(vec![
            EntityDefinition::new("standalone"),
            EntityDefinition::new("category").belongs_to("parent", "category"),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            GraphError::Cycle {
                entities: vec!["category".to_string()]
            }
        );
    }

    #[test]
    fn test_nullable_cycle_is_deferred() {
        let graph = build(vec![
            EntityDefinition::new("invoice").belongs_to_optional("payment", "payment"),
            EntityDefinition::new("payment").belongs_to("invoice", "invoice"),
        ])
        .unwrap();

        let result = graph.insert_order(&[]).unwrap();
        assert_eq!(result.order, vec!["invoice", "payment"]);
        assert_eq!(result.deferred.len(), 1);
        assert_eq!(result.deferred[0].edge.column, "paymentId");
        assert_eq!(result.deferred[0].reason, DeferReason::CycleBreak);
    }

    #[test]
    fn test_required_cycle_reports_participants() {
        let graph = build(vec![
            EntityDefinition::new("standalone"),
            EntityDefinition::new("a").belongs_to("b", "b"),
            EntityDefinition::new("b").belongs_to("c", "c"),
            EntityDefinition::new("c").belongs_to("a", "a"),
            EntityDefinition::new("downstream").belongs_to("a", "a"),
        ])
        .unwrap();

        let err = graph.insert_order(&[]).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                entities: vec!["a".to_string(), "b".to_string(), "c".to_string()]
            }
        );
    }

    #[test]
    fn test_unregistered_required_target_fails() {
        let err = build(vec![
            EntityDefinition::new("invoice_item").belongs_to("invoice", "invoice"),
        ])
        .unwrap_err();

        assert!(matches!(err, GraphError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_unregistered_nullable_target_is_external() {
        let graph = build(vec![
            EntityDefinition::new("expense").belongs_to_optional("vendor", "organization_vendor"),
        ])
        .unwrap();

        assert_eq!(graph.external.len(), 1);
        assert!(graph.edges.is_empty());
    }
}
