//! Classified entity metadata models

use serde::{Deserialize, Serialize};

/// Storage type of a scalar column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Integer,
    Real,
    Boolean,
    DateTime,
    Uuid,
    Json,
}

impl ColumnType {
    /// SQLite column affinity used when creating tables
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::DateTime | ColumnType::Uuid | ColumnType::Json => {
                "TEXT"
            }
        }
    }
}

/// A scalar column of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Relation cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    ManyToOne,
    OneToOne,
    ManyToMany,
}

/// What a relation means to the export/import engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationRole {
    /// Ordinary data relation, used for ordering
    Data,
    /// created-by / updated-by / deleted-by user links
    Audit,
    /// Owning tenant link
    Tenant,
    /// Owning organization link
    Organization,
}

/// Join table backing a many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PivotTable {
    pub table_name: String,
    /// Column referencing the owning entity
    pub owner_column: String,
    /// Column referencing the target entity
    pub target_column: String,
}

/// Where the identifiers of a relation live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EdgeStorage {
    /// Foreign key column on the owning table
    Column { name: String },
    /// Separate pivot table
    Pivot(PivotTable),
}

/// Directed edge from a dependent entity type to the type it references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    /// Property name on the owning entity
    pub property: String,
    /// Target entity type id
    pub target: String,
    pub cardinality: Cardinality,
    pub nullable: bool,
    pub role: RelationRole,
    pub storage: EdgeStorage,
}

impl RelationEdge {
    /// Foreign key column name (None for pivots)
    pub fn column(&self) -> Option<&str> {
        match &self.storage {
            EdgeStorage::Column { name } => Some(name),
            EdgeStorage::Pivot(_) => None,
        }
    }

    /// Pivot table (None for column edges)
    pub fn pivot(&self) -> Option<&PivotTable> {
        match &self.storage {
            EdgeStorage::Pivot(pivot) => Some(pivot),
            EdgeStorage::Column { .. } => None,
        }
    }
}

/// Ordered set of columns uniquely identifying a row within its type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub columns: Vec<String>,
}

/// Complete classified description of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Stable entity type identifier
    pub type_id: String,
    /// Table name (also the archive unit name)
    pub table_name: String,
    pub primary_key: String,
    /// Scalar columns only: no primary key, no foreign keys, no relation-id projections
    pub columns: Vec<ColumnDescriptor>,
    pub relations: Vec<RelationEdge>,
    pub uniques: Vec<UniqueConstraint>,
    /// Global reference data, matched by natural key on import
    pub is_static: bool,
    /// Carries an owning-tenant link
    pub is_tenant_based: bool,
}

impl EntityDescriptor {
    /// Edges stored as a column on this table
    pub fn column_edges(&self) -> impl Iterator<Item = &RelationEdge> {
        self.relations.iter().filter(|e| e.column().is_some())
    }

    /// Many-to-many edges owned by this entity
    pub fn pivot_edges(&self) -> impl Iterator<Item = &RelationEdge> {
        self.relations.iter().filter(|e| e.pivot().is_some())
    }

    /// Relation edge stored in the given column
    pub fn edge_for_column(&self, column: &str) -> Option<&RelationEdge> {
        self.column_edges().find(|e| e.column() == Some(column))
    }

    /// Scalar column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column holding the owning tenant id
    pub fn tenant_column(&self) -> Option<&str> {
        self.column_edges()
            .find(|e| e.role == RelationRole::Tenant)
            .and_then(|e| e.column())
    }

    /// Archive header: primary key, scalar columns, then relation columns
    pub fn export_header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(1 + self.columns.len() + self.relations.len());
        header.push(self.primary_key.clone());
        header.extend(self.columns.iter().map(|c| c.name.clone()));
        header.extend(self.column_edges().filter_map(|e| e.column().map(str::to_string)));
        header
    }
}
