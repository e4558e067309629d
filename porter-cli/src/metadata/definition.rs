//! Declared entity mappings
//!
//! An `EntityDefinition` is the raw structural description of an entity type:
//! the columns of its table and the relations it declares. It is what an ORM
//! mapping would contain, written out explicitly. Definitions are turned into
//! classified `EntityDescriptor`s by the introspector.

use serde::{Deserialize, Serialize};

use super::models::ColumnType;

/// Default primary key column for every entity table
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A column as declared on the entity table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    /// Set when the column is a read-only projection of a relation
    /// (e.g. `tagIds` mirroring the `tags` relation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_id_of: Option<String>,
}

/// Kind of declared relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    ManyToOne,
    OneToOne,
    ManyToMany,
}

/// A relation as declared on the entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// Property name on the owning entity (e.g. "organization")
    pub property: String,
    /// Target entity type id
    pub target: String,
    pub kind: RelationKind,
    /// Foreign key column for many-to-one/one-to-one relations,
    /// or the owner-side column of the pivot for many-to-many.
    /// Defaults to `<property>Id` / `<ownerType>Id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_column: Option<String>,
    /// Pivot table name (many-to-many only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_table: Option<String>,
    /// Target-side column of the pivot (many-to-many only).
    /// Defaults to `<targetType>Id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_join_column: Option<String>,
}

/// Structural description of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Stable entity type identifier
    #[serde(rename = "type")]
    pub type_id: String,
    /// Storage (table) name
    #[serde(default)]
    pub table_name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
    /// Unique constraints as lists of column names
    #[serde(default)]
    pub uniques: Vec<Vec<String>>,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl EntityDefinition {
    /// Start a definition whose table name equals the type id
    pub fn new(type_id: impl Into<String>) -> Self {
        let type_id = type_id.into();
        Self {
            table_name: type_id.clone(),
            type_id,
            primary_key: default_primary_key(),
            columns: Vec::new(),
            relations: Vec::new(),
            uniques: Vec::new(),
        }
    }

    /// Override the table name
    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Declare a required scalar column
    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.to_string(),
            column_type,
            nullable: false,
            relation_id_of: None,
        });
        self
    }

    /// Declare a nullable scalar column
    pub fn optional(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.to_string(),
            column_type,
            nullable: true,
            relation_id_of: None,
        });
        self
    }

    /// Declare a read-only relation id projection column
    pub fn relation_id(mut self, name: &str, property: &str) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.to_string(),
            column_type: ColumnType::Json,
            nullable: true,
            relation_id_of: Some(property.to_string()),
        });
        self
    }

    /// Required many-to-one relation; declares the `<property>Id` column too
    pub fn belongs_to(self, property: &str, target: &str) -> Self {
        self.foreign_key(property, target, RelationKind::ManyToOne, false)
    }

    /// Nullable many-to-one relation; declares the `<property>Id` column too
    pub fn belongs_to_optional(self, property: &str, target: &str) -> Self {
        self.foreign_key(property, target, RelationKind::ManyToOne, true)
    }

    /// One-to-one relation owning the join column
    pub fn one_to_one(self, property: &str, target: &str, nullable: bool) -> Self {
        self.foreign_key(property, target, RelationKind::OneToOne, nullable)
    }

    fn foreign_key(
        mut self,
        property: &str,
        target: &str,
        kind: RelationKind,
        nullable: bool,
    ) -> Self {
        let join_column = format!("{}Id", property);
        self.columns.push(ColumnDefinition {
            name: join_column.clone(),
            column_type: ColumnType::Uuid,
            nullable,
            relation_id_of: None,
        });
        self.relations.push(RelationDefinition {
            property: property.to_string(),
            target: target.to_string(),
            kind,
            join_column: Some(join_column),
            join_table: None,
            inverse_join_column: None,
        });
        self
    }

    /// Many-to-many relation stored in `join_table`
    pub fn many_to_many(mut self, property: &str, target: &str, join_table: &str) -> Self {
        self.relations.push(RelationDefinition {
            property: property.to_string(),
            target: target.to_string(),
            kind: RelationKind::ManyToMany,
            join_column: None,
            join_table: Some(join_table.to_string()),
            inverse_join_column: None,
        });
        self
    }

    /// Owned by a tenant (`tenantId`)
    pub fn tenant_owned(self) -> Self {
        self.belongs_to("tenant", "tenant")
    }

    /// Owned by a tenant and one of its organizations
    pub fn organization_owned(self) -> Self {
        self.tenant_owned().belongs_to("organization", "organization")
    }

    /// Adds the created-by / updated-by user links
    pub fn audited(self) -> Self {
        self.belongs_to_optional("createdByUser", "user")
            .belongs_to_optional("updatedByUser", "user")
    }

    /// Declare a unique constraint
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.uniques
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// Lower camel case of a snake_case identifier ("organization_team" -> "organizationTeam")
pub fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper_next = false;
    for ch in snake.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
