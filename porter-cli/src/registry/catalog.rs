//! Built-in entity catalog
//!
//! Declares the core entity types of the backend. Registration order follows
//! the historic hand-maintained import list; the runtime order is always the
//! computed topological order.

use super::{EntityProvider, EntityRegistration, EntryOptions};
use crate::metadata::{ColumnType, EntityDefinition};

/// Historic import order, kept as a reviewed cross-check of the computed order
pub const MANUAL_ORDER: &[&str] = &[
    "tenant",
    "report_category",
    "report",
    "feature",
    "language",
    "country",
    "currency",
    "role",
    "role_permission",
    "organization",
    "user",
    "user_organization",
    "organization_position",
    "organization_team",
    "organization_vendor",
    "organization_department",
    "organization_employment_type",
    "organization_contact",
    "organization_project",
    "tag",
    "skill",
    "employee",
    "candidate",
    "expense_category",
    "expense",
    "income",
    "invoice",
    "invoice_item",
    "payment",
    "timesheet",
    "time_log",
];

/// The built-in catalog as an entity provider
pub struct BuiltinCatalog;

impl EntityProvider for BuiltinCatalog {
    fn name(&self) -> &str {
        "builtin"
    }

    fn entity_types(&self) -> Vec<EntityRegistration> {
        builtin_definitions()
    }
}

/// Every built-in entity type, in registration order
pub fn builtin_definitions() -> Vec<EntityRegistration> {
    use ColumnType::*;

    let reg = EntityRegistration::new;

    vec![
        reg(
            EntityDefinition::new("tenant").column("name", Text),
            EntryOptions::tenant_root(),
        ),
        // Reference data shared by every tenant
        reg(
            EntityDefinition::new("report_category")
                .column("name", Text)
                .optional("iconClass", Text)
                .unique(&["name"]),
            EntryOptions::reference(),
        ),
        reg(
            EntityDefinition::new("report")
                .column("name", Text)
                .column("slug", Text)
                .optional("description", Text)
                .belongs_to("category", "report_category")
                .unique(&["name", "slug"]),
            EntryOptions::reference(),
        ),
        reg(
            EntityDefinition::new("feature")
                .column("name", Text)
                .column("code", Text)
                .optional("description", Text)
                .column("isPaid", Boolean)
                .belongs_to_optional("parent", "feature")
                .unique(&["name", "code"]),
            EntryOptions::reference(),
        ),
        reg(
            EntityDefinition::new("language")
                .column("name", Text)
                .column("code", Text)
                .column("isSystem", Boolean)
                .unique(&["name", "code"]),
            EntryOptions::reference(),
        ),
        reg(
            EntityDefinition::new("country")
                .column("isoCode", Text)
                .column("country", Text)
                .unique(&["isoCode"]),
            EntryOptions::reference(),
        ),
        reg(
            EntityDefinition::new("currency")
                .column("isoCode", Text)
                .column("currency", Text)
                .unique(&["isoCode"]),
            EntryOptions::reference(),
        ),
        // Tenant scoped
        reg(
            EntityDefinition::new("role")
                .tenant_owned()
                .column("name", Text)
                .column("isSystem", Boolean),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("role_permission")
                .tenant_owned()
                .belongs_to("role", "role")
                .column("permission", Text)
                .column("enabled", Boolean),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("organization")
                .tenant_owned()
                .audited()
                .column("name", Text)
                .optional("officialName", Text)
                .column("currency", Text)
                .column("isDefault", Boolean)
                .optional("startWeekOn", Text)
                .many_to_many("tags", "tag", "tag_organization")
                .relation_id("tagIds", "tags"),
            EntryOptions::data().essential(),
        ),
        reg(
            EntityDefinition::new("user")
                .tenant_owned()
                .belongs_to_optional("role", "role")
                .column("email", Text)
                .optional("firstName", Text)
                .optional("lastName", Text)
                .optional("hash", Text)
                .optional("preferredLanguage", Text)
                .unique(&["email"]),
            EntryOptions::reference(),
        ),
        reg(
            EntityDefinition::new("user_organization")
                .organization_owned()
                .belongs_to("user", "user")
                .column("isDefault", Boolean)
                .column("isActive", Boolean),
            EntryOptions::data(),
        ),
        // Organization structure
        reg(
            EntityDefinition::new("organization_position")
                .organization_owned()
                .column("name", Text),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("organization_team")
                .organization_owned()
                .column("name", Text)
                .optional("prefix", Text),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("organization_vendor")
                .organization_owned()
                .column("name", Text)
                .optional("email", Text),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("organization_department")
                .organization_owned()
                .column("name", Text)
                .belongs_to_optional("parent", "organization_department"),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("organization_employment_type")
                .organization_owned()
                .column("name", Text),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("organization_contact")
                .organization_owned()
                .audited()
                .column("name", Text)
                .column("contactType", Text)
                .optional("budget", Real),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("organization_project")
                .organization_owned()
                .column("name", Text)
                .column("billable", Boolean)
                .optional("startDate", DateTime)
                .belongs_to_optional("organizationContact", "organization_contact"),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("tag")
                .tenant_owned()
                .belongs_to_optional("organization", "organization")
                .column("name", Text)
                .optional("color", Text),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("skill")
                .tenant_owned()
                .belongs_to_optional("organization", "organization")
                .column("name", Text)
                .optional("color", Text)
                .unique(&["name"]),
            EntryOptions::reference(),
        ),
        // People
        reg(
            EntityDefinition::new("employee")
                .organization_owned()
                .audited()
                .one_to_one("user", "user", false)
                .belongs_to_optional("organizationPosition", "organization_position")
                .optional("startedWorkOn", DateTime)
                .column("isActive", Boolean)
                .optional("billRateValue", Integer)
                .optional("billRateCurrency", Text)
                .many_to_many("tags", "tag", "tag_employee")
                .many_to_many("skills", "skill", "skill_employee")
                .many_to_many("departments", "organization_department", "organization_department_employee")
                .many_to_many("projects", "organization_project", "organization_project_employee"),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("candidate")
                .organization_owned()
                .belongs_to("user", "user")
                .belongs_to_optional("organizationPosition", "organization_position")
                .optional("rating", Real)
                .optional("appliedDate", DateTime)
                .many_to_many("departments", "organization_department", "candidate_department"),
            EntryOptions::data(),
        ),
        // Accounting
        reg(
            EntityDefinition::new("expense_category")
                .organization_owned()
                .column("name", Text),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("expense")
                .organization_owned()
                .column("amount", Real)
                .column("currency", Text)
                .column("valueDate", DateTime)
                .optional("notes", Text)
                .belongs_to_optional("employee", "employee")
                .belongs_to_optional("vendor", "organization_vendor")
                .belongs_to_optional("category", "expense_category")
                .belongs_to_optional("project", "organization_project"),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("income")
                .organization_owned()
                .column("amount", Real)
                .column("currency", Text)
                .column("valueDate", DateTime)
                .optional("clientName", Text)
                .belongs_to_optional("employee", "employee"),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("invoice")
                .organization_owned()
                .audited()
                .column("invoiceNumber", Integer)
                .column("invoiceDate", DateTime)
                .optional("dueDate", DateTime)
                .column("currency", Text)
                .column("totalValue", Real)
                .column("paid", Boolean)
                .belongs_to_optional("toContact", "organization_contact"),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("invoice_item")
                .organization_owned()
                .belongs_to("invoice", "invoice")
                .optional("description", Text)
                .column("price", Real)
                .column("quantity", Integer)
                .belongs_to_optional("employee", "employee")
                .belongs_to_optional("project", "organization_project")
                .belongs_to_optional("expense", "expense"),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("payment")
                .organization_owned()
                .belongs_to_optional("invoice", "invoice")
                .belongs_to_optional("employee", "employee")
                .belongs_to_optional("recordedBy", "user")
                .column("amount", Real)
                .column("currency", Text)
                .column("paymentDate", DateTime),
            EntryOptions::data(),
        ),
        // Time tracking
        reg(
            EntityDefinition::new("timesheet")
                .organization_owned()
                .belongs_to("employee", "employee")
                .belongs_to_optional("approvedBy", "employee")
                .column("startedAt", DateTime)
                .optional("stoppedAt", DateTime)
                .column("duration", Integer)
                .column("status", Text),
            EntryOptions::data(),
        ),
        reg(
            EntityDefinition::new("time_log")
                .organization_owned()
                .belongs_to("employee", "employee")
                .belongs_to_optional("timesheet", "timesheet")
                .belongs_to_optional("project", "organization_project")
                .column("startedAt", DateTime)
                .optional("stoppedAt", DateTime)
                .column("logType", Text)
                .column("isBillable", Boolean),
            EntryOptions::data(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::registry::RegistryBuilder;

    fn builtin_registry() -> crate::registry::EntityRegistry {
        let mut builder = RegistryBuilder::new();
        builder.register_provider(&BuiltinCatalog);
        builder.build().unwrap()
    }

    #[test]
    fn test_catalog_builds() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), MANUAL_ORDER.len());
        assert_eq!(registry.tenant_type(), "tenant");
        assert_eq!(registry.organization_type(), Some("organization"));
    }

    #[test]
    fn test_manual_order_matches_computed_order() {
        let registry = builtin_registry();
        let pinned = ["tenant", "organization"];

        let computed: Vec<_> = registry
            .ordered_entries()
            .iter()
            .map(|e| e.type_id())
            .collect();
        assert_eq!(computed[..2], pinned);

        // Apart from the forced ownership types the lists agree exactly
        let rest = |list: Vec<&str>| -> Vec<String> {
            list.into_iter()
                .filter(|t| !pinned.contains(t))
                .map(str::to_string)
                .collect()
        };
        assert_eq!(rest(computed), rest(MANUAL_ORDER.to_vec()));
    }

    #[test]
    fn test_manual_order_respects_dependencies() {
        let registry = builtin_registry();

        for edge in &registry.graph().edges {
            if registry.is_deferred(&edge.entity, &edge.column) {
                continue;
            }
            let dependent = MANUAL_ORDER.iter().position(|t| *t == edge.entity).unwrap();
            let dependency = MANUAL_ORDER.iter().position(|t| *t == edge.target).unwrap();
            assert!(
                dependency < dependent,
                "{} must come before {} ({})",
                edge.target,
                edge.entity,
                edge.column
            );
        }
    }

    #[test]
    fn test_every_non_deferred_dependency_is_earlier() {
        let registry = builtin_registry();

        for edge in &registry.graph().edges {
            if registry.is_deferred(&edge.entity, &edge.column) {
                continue;
            }
            assert!(registry.position(&edge.target) < registry.position(&edge.entity));
        }
    }

    #[test]
    fn test_self_references_are_deferred() {
        let registry = builtin_registry();

        let deferred: HashSet<_> = registry
            .deferred_edges()
            .iter()
            .map(|d| (d.edge.entity.as_str(), d.edge.column.as_str()))
            .collect();
        assert!(deferred.contains(&("feature", "parentId")));
        assert!(deferred.contains(&("organization_department", "parentId")));
    }

    #[test]
    fn test_static_entries() {
        let registry = builtin_registry();

        for type_id in ["currency", "country", "language", "skill", "user"] {
            let entry = registry.entry(type_id).unwrap();
            assert!(entry.is_static(), "{} should be static", type_id);
            assert!(!entry.descriptor.uniques.is_empty());
        }
        assert!(!registry.entry("employee").unwrap().is_static());
    }

    #[test]
    fn test_pivots_follow_both_endpoints() {
        let registry = builtin_registry();

        let tables: Vec<_> = registry.pivots().iter().map(|p| p.table_name()).collect();
        assert!(tables.contains(&"tag_employee"));
        assert!(tables.contains(&"tag_organization"));
        assert!(tables.contains(&"candidate_department"));

        for pivot in registry.pivots() {
            let after = registry.position(&pivot.after).unwrap();
            assert!(registry.position(&pivot.owner).unwrap() <= after);
            assert!(registry.position(&pivot.target).unwrap() <= after);
        }

        let tag_org = registry
            .pivots()
            .iter()
            .find(|p| p.table_name() == "tag_organization")
            .unwrap();
        assert_eq!(tag_org.after, "tag");
        assert_eq!(tag_org.table.owner_column, "organizationId");
        assert_eq!(tag_org.table.target_column, "tagId");
    }
}
