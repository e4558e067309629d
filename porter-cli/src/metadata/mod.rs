//! Entity metadata: declared mappings and their classified descriptors

pub mod definition;
pub mod introspect;
pub mod models;

pub use definition::EntityDefinition;
pub use introspect::{TENANT_COLUMN, introspect};
pub use models::{ColumnType, EntityDescriptor, PivotTable, RelationRole};
