//! Configuration error taxonomy
//!
//! Everything here is raised while building the registry or checking it
//! against the database, and is fatal at startup: no export or import may run
//! against an invalid registry. Row and run level errors live in
//! `crate::import`.

use thiserror::Error;

/// An entity definition could not be classified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("entity '{0}' has no storage table")]
    MissingTable(String),

    #[error("entity '{0}' has no usable primary key")]
    MissingPrimaryKey(String),

    #[error("entity '{entity}': '{name}' is not a valid SQL identifier")]
    InvalidIdentifier { entity: String, name: String },

    #[error("entity '{entity}' declares column '{column}' twice")]
    DuplicateColumn { entity: String, column: String },

    #[error("entity '{entity}': relation '{relation}' uses undeclared join column '{column}'")]
    UndeclaredJoinColumn {
        entity: String,
        relation: String,
        column: String,
    },

    #[error("entity '{entity}': many-to-many relation '{relation}' has no join table")]
    MissingJoinTable { entity: String, relation: String },

    #[error("entity '{entity}': pivot '{table}' uses the same column for both sides")]
    AmbiguousPivot { entity: String, table: String },

    #[error("entity '{entity}': relation id column '{column}' refers to unknown relation '{relation}'")]
    UnknownRelationId {
        entity: String,
        column: String,
        relation: String,
    },

    #[error("entity '{entity}': unique constraint uses unknown column '{column}'")]
    UnknownUniqueColumn { entity: String, column: String },
}

/// The dependency graph cannot produce a valid order
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("circular dependency detected involving: {}", .entities.join(", "))]
    Cycle { entities: Vec<String> },

    #[error("entity '{entity}' requires '{target}' (column '{column}') which is not registered")]
    UnresolvedDependency {
        entity: String,
        target: String,
        column: String,
    },

    #[error("ownership entity '{entity}' requires '{target}' (column '{column}') which cannot be ordered before it")]
    PinnedDependency {
        entity: String,
        target: String,
        column: String,
    },
}

/// The registry could not be assembled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("entity type '{0}' is registered twice")]
    DuplicateType(String),

    #[error("table '{table}' is used by both '{first}' and '{second}'")]
    DuplicateTable {
        table: String,
        first: String,
        second: String,
    },

    #[error("pivot table '{0}' is declared by more than one relation")]
    DuplicatePivot(String),

    #[error("no root tenant entry is registered (an entry with a substitute rule)")]
    MissingTenantRoot,

    #[error("more than one root tenant entry is registered: '{0}' and '{1}'")]
    DuplicateTenantRoot(String, String),
}

/// The live database does not match the registry
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("table '{table}' for entity '{entity}' does not exist")]
    MissingTable { entity: String, table: String },

    #[error("table '{table}' has no column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_entities() {
        let err = GraphError::Cycle {
            entities: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "circular dependency detected involving: a, b");
    }

    #[test]
    fn test_registry_error_wraps_graph_error() {
        let err: RegistryError = GraphError::Cycle {
            entities: vec!["x".to_string()],
        }
        .into();
        assert!(err.to_string().contains("x"));
    }
}
