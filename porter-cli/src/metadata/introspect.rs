//! Metadata introspection
//!
//! Classifies a declared `EntityDefinition` into an `EntityDescriptor`:
//! - many-to-one / one-to-one relations become foreign key column edges
//! - many-to-many relations become pivot edges
//! - relation-id projection columns are dropped
//! - tenant, organization and audit links get their own roles

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::definition::{EntityDefinition, RelationKind, camel_case};
use super::models::{
    Cardinality, ColumnDescriptor, EdgeStorage, EntityDescriptor, PivotTable, RelationEdge,
    RelationRole, UniqueConstraint,
};
use crate::error::MetadataError;

/// Owning tenant column
pub const TENANT_COLUMN: &str = "tenantId";
/// Owning organization column
pub const ORGANIZATION_COLUMN: &str = "organizationId";
/// Audit link columns (never used for ordering)
pub const AUDIT_COLUMNS: &[&str] = &["createdByUserId", "updatedByUserId", "deletedByUserId"];

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Check that a table or column name can be safely quoted into SQL
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Classify the role of a foreign key column
pub fn classify_column(column: &str) -> RelationRole {
    if column == TENANT_COLUMN {
        RelationRole::Tenant
    } else if column == ORGANIZATION_COLUMN {
        RelationRole::Organization
    } else if AUDIT_COLUMNS.contains(&column) {
        RelationRole::Audit
    } else {
        RelationRole::Data
    }
}

/// Build the descriptor for one entity definition
///
/// `is_static` comes from the registry entry, not from the mapping.
pub fn introspect(
    definition: &EntityDefinition,
    is_static: bool,
) -> Result<EntityDescriptor, MetadataError> {
    let type_id = definition.type_id.as_str();

    if definition.table_name.is_empty() {
        return Err(MetadataError::MissingTable(type_id.to_string()));
    }
    // The primary key may be declared explicitly or left implicit, but never nullable
    if definition.primary_key.is_empty()
        || definition
            .columns
            .iter()
            .any(|c| c.name == definition.primary_key && c.nullable)
    {
        return Err(MetadataError::MissingPrimaryKey(type_id.to_string()));
    }
    check_identifier(type_id, &definition.table_name)?;
    check_identifier(type_id, &definition.primary_key)?;

    let mut seen = HashSet::new();
    for column in &definition.columns {
        check_identifier(type_id, &column.name)?;
        if !seen.insert(column.name.as_str()) {
            return Err(MetadataError::DuplicateColumn {
                entity: type_id.to_string(),
                column: column.name.clone(),
            });
        }
    }

    let mut relations = Vec::new();
    let mut relation_columns: HashSet<String> = HashSet::new();

    for relation in &definition.relations {
        match relation.kind {
            RelationKind::ManyToOne | RelationKind::OneToOne => {
                let join_column = relation
                    .join_column
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", relation.property));

                let Some(column) = definition.columns.iter().find(|c| c.name == join_column)
                else {
                    return Err(MetadataError::UndeclaredJoinColumn {
                        entity: type_id.to_string(),
                        relation: relation.property.clone(),
                        column: join_column,
                    });
                };

                relations.push(RelationEdge {
                    property: relation.property.clone(),
                    target: relation.target.clone(),
                    cardinality: if relation.kind == RelationKind::OneToOne {
                        Cardinality::OneToOne
                    } else {
                        Cardinality::ManyToOne
                    },
                    nullable: column.nullable,
                    role: classify_column(&join_column),
                    storage: EdgeStorage::Column {
                        name: join_column.clone(),
                    },
                });
                relation_columns.insert(join_column);
            }
            RelationKind::ManyToMany => {
                let Some(table_name) = relation.join_table.clone() else {
                    return Err(MetadataError::MissingJoinTable {
                        entity: type_id.to_string(),
                        relation: relation.property.clone(),
                    });
                };
                let owner_column = relation
                    .join_column
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", camel_case(type_id)));
                let target_column = relation
                    .inverse_join_column
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", camel_case(&relation.target)));

                for name in [&table_name, &owner_column, &target_column] {
                    check_identifier(type_id, name)?;
                }
                if owner_column == target_column {
                    return Err(MetadataError::AmbiguousPivot {
                        entity: type_id.to_string(),
                        table: table_name,
                    });
                }

                relations.push(RelationEdge {
                    property: relation.property.clone(),
                    target: relation.target.clone(),
                    cardinality: Cardinality::ManyToMany,
                    // Pivot rows are optional by nature
                    nullable: true,
                    role: RelationRole::Data,
                    storage: EdgeStorage::Pivot(PivotTable {
                        table_name,
                        owner_column,
                        target_column,
                    }),
                });
            }
        }
    }

    // Relation id projections are redundant with their edge
    let mut columns = Vec::new();
    for column in &definition.columns {
        if let Some(property) = &column.relation_id_of {
            if !definition.relations.iter().any(|r| &r.property == property) {
                return Err(MetadataError::UnknownRelationId {
                    entity: type_id.to_string(),
                    column: column.name.clone(),
                    relation: property.clone(),
                });
            }
            continue;
        }
        if column.name == definition.primary_key || relation_columns.contains(&column.name) {
            continue;
        }
        columns.push(ColumnDescriptor {
            name: column.name.clone(),
            column_type: column.column_type,
            nullable: column.nullable,
        });
    }

    let uniques = definition
        .uniques
        .iter()
        .filter_map(|unique| {
            let columns: Vec<String> = unique
                .iter()
                .filter(|c| !relation_columns.contains(*c))
                .cloned()
                .collect();
            (!columns.is_empty()).then_some(UniqueConstraint { columns })
        })
        .collect::<Vec<_>>();

    for unique in &uniques {
        for column in &unique.columns {
            if !columns.iter().any(|c| &c.name == column) {
                return Err(MetadataError::UnknownUniqueColumn {
                    entity: type_id.to_string(),
                    column: column.clone(),
                });
            }
        }
    }

    let is_tenant_based = relations.iter().any(|e| e.role == RelationRole::Tenant);

    Ok(EntityDescriptor {
        type_id: type_id.to_string(),
        table_name: definition.table_name.clone(),
        primary_key: definition.primary_key.clone(),
        columns,
        relations,
        uniques,
        is_static,
        is_tenant_based,
    })
}

fn check_identifier(entity: &str, name: &str) -> Result<(), MetadataError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(MetadataError::InvalidIdentifier {
            entity: entity.to_string(),
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::models::ColumnType;

    fn employee() -> EntityDefinition {
        EntityDefinition::new("employee")
            .organization_owned()
            .audited()
            .column("firstName", ColumnType::Text)
            .optional("startedWorkOn", ColumnType::DateTime)
            .belongs_to_optional("organizationPosition", "organization_position")
            .many_to_many("tags", "tag", "tag_employee")
            .relation_id("tagIds", "tags")
    }

    #[test]
    fn test_scalar_columns_exclude_relations() {
        let descriptor = introspect(&employee(), false).unwrap();

        let names: Vec<_> = descriptor.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["firstName", "startedWorkOn"]);
    }

    #[test]
    fn test_relation_roles() {
        let descriptor = introspect(&employee(), false).unwrap();

        let role = |column: &str| descriptor.edge_for_column(column).unwrap().role;
        assert_eq!(role("tenantId"), RelationRole::Tenant);
        assert_eq!(role("organizationId"), RelationRole::Organization);
        assert_eq!(role("createdByUserId"), RelationRole::Audit);
        assert_eq!(role("organizationPositionId"), RelationRole::Data);
        assert!(descriptor.is_tenant_based);
        assert_eq!(descriptor.tenant_column(), Some("tenantId"));
    }

    #[test]
    fn test_one_to_one_owns_join_column() {
        let definition = EntityDefinition::new("employee")
            .tenant_owned()
            .one_to_one("user", "user", false)
            .one_to_one("badge", "badge", true);
        let descriptor = introspect(&definition, false).unwrap();

        let user = descriptor.edge_for_column("userId").unwrap();
        assert_eq!(user.cardinality, Cardinality::OneToOne);
        assert_eq!(user.role, RelationRole::Data);
        assert!(!user.nullable);
        assert!(descriptor.edge_for_column("badgeId").unwrap().nullable);
        assert!(descriptor.export_header().contains(&"userId".to_string()));
    }

    #[test]
    fn test_many_to_many_becomes_pivot() {
        let descriptor = introspect(&employee(), false).unwrap();

        let pivots: Vec<_> = descriptor.pivot_edges().collect();
        assert_eq!(pivots.len(), 1);
        let pivot = pivots[0].pivot().unwrap();
        assert_eq!(pivot.table_name, "tag_employee");
        assert_eq!(pivot.owner_column, "employeeId");
        assert_eq!(pivot.target_column, "tagId");
        assert_eq!(pivots[0].cardinality, Cardinality::ManyToMany);
        // Never a column on the entity
        assert!(!descriptor.export_header().contains(&"tagsId".to_string()));
    }

    #[test]
    fn test_export_header_order() {
        let descriptor = introspect(&employee(), false).unwrap();

        assert_eq!(
            descriptor.export_header(),
            vec![
                "id",
                "firstName",
                "startedWorkOn",
                "tenantId",
                "organizationId",
                "createdByUserId",
                "updatedByUserId",
                "organizationPositionId",
            ]
        );
    }

    #[test]
    fn test_relation_id_column_excluded() {
        let descriptor = introspect(&employee(), false).unwrap();
        assert!(descriptor.column("tagIds").is_none());
    }

    #[test]
    fn test_relation_id_to_unknown_relation_fails() {
        let def = EntityDefinition::new("skill").relation_id("employeeIds", "employees");

        let err = introspect(&def, false).unwrap_err();
        assert!(matches!(err, MetadataError::UnknownRelationId { .. }));
    }

    #[test]
    fn test_undeclared_join_column_fails() {
        let mut def = EntityDefinition::new("invoice_item");
        def.relations.push(crate::metadata::definition::RelationDefinition {
            property: "invoice".to_string(),
            target: "invoice".to_string(),
            kind: RelationKind::ManyToOne,
            join_column: None,
            join_table: None,
            inverse_join_column: None,
        });

        let err = introspect(&def, false).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::UndeclaredJoinColumn { ref column, .. } if column == "invoiceId"
        ));
    }

    #[test]
    fn test_missing_table_fails() {
        let def = EntityDefinition::new("ghost").table("");
        assert!(matches!(
            introspect(&def, false),
            Err(MetadataError::MissingTable(_))
        ));
    }

    #[test]
    fn test_invalid_identifier_fails() {
        let def = EntityDefinition::new("bad").column("name; DROP TABLE x", ColumnType::Text);
        assert!(matches!(
            introspect(&def, false),
            Err(MetadataError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_unique_constraint_drops_relation_columns() {
        let def = EntityDefinition::new("organization_position")
            .organization_owned()
            .column("name", ColumnType::Text)
            .unique(&["name", "organizationId"])
            .unique(&["tenantId"]);

        let descriptor = introspect(&def, false).unwrap();
        assert_eq!(descriptor.uniques.len(), 1);
        assert_eq!(descriptor.uniques[0].columns, vec!["name".to_string()]);
    }

    #[test]
    fn test_static_flag_passthrough() {
        let def = EntityDefinition::new("currency")
            .column("isoCode", ColumnType::Text)
            .unique(&["isoCode"]);

        let descriptor = introspect(&def, true).unwrap();
        assert!(descriptor.is_static);
        assert!(!descriptor.is_tenant_based);
    }
}
