//! Extension entity types declared in TOML files
//!
//! ```toml
//! name = "notes-plugin"
//!
//! [[entity]]
//! type = "plugin_note"
//! essential = false
//!
//! [[entity.columns]]
//! name = "title"
//!
//! [[entity.columns]]
//! name = "employeeId"
//! type = "uuid"
//! nullable = true
//!
//! [[entity.relations]]
//! property = "employee"
//! target = "employee"
//! kind = "many-to-one"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::{EntityProvider, EntityRegistration, EntryOptions};
use crate::metadata::EntityDefinition;

#[derive(Debug, Deserialize)]
struct ExtensionFile {
    name: Option<String>,
    #[serde(default)]
    entity: Vec<ExtensionEntity>,
}

#[derive(Debug, Deserialize)]
struct ExtensionEntity {
    #[serde(flatten)]
    definition: EntityDefinition,
    #[serde(default)]
    is_static: bool,
    #[serde(default)]
    essential: bool,
}

/// Entity types loaded from one extension file
#[derive(Debug, Clone)]
pub struct TomlEntityProvider {
    name: String,
    registrations: Vec<EntityRegistration>,
}

impl TomlEntityProvider {
    /// Load and parse an extension file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read extension file {}", path.display()))?;
        Self::parse(&content, path)
    }

    /// Parse extension content; `source` is only used for naming and errors
    pub fn parse(content: &str, source: &Path) -> Result<Self> {
        let file: ExtensionFile = toml::from_str(content)
            .with_context(|| format!("Failed to parse extension file {}", source.display()))?;

        let mut registrations = Vec::with_capacity(file.entity.len());
        for entity in file.entity {
            let mut definition = entity.definition;
            if definition.table_name.is_empty() {
                definition.table_name = definition.type_id.clone();
            }
            if definition.type_id.trim().is_empty() {
                bail!("Extension file {} declares an entity without a type", source.display());
            }
            registrations.push(EntityRegistration::new(
                definition,
                EntryOptions {
                    is_static: entity.is_static,
                    essential: entity.essential,
                    substitute: None,
                },
            ));
        }

        let name = file.name.unwrap_or_else(|| {
            source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "extension".to_string())
        });

        Ok(Self {
            name,
            registrations,
        })
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }
}

impl EntityProvider for TomlEntityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn entity_types(&self) -> Vec<EntityRegistration> {
        self.registrations.clone()
    }
}

/// Load every configured extension file
pub fn load_all(paths: &[PathBuf]) -> Result<Vec<TomlEntityProvider>> {
    paths
        .iter()
        .map(|path| TomlEntityProvider::load(path))
        .collect()
}
