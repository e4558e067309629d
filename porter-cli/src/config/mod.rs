//! Application configuration
//!
//! Layered: config file, then `.env`, then `PORTER_*` environment variables.
//! Command line flags are applied last by the command handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Database used when nothing else is configured
pub const DEFAULT_DATABASE_URL: &str = "sqlite://porter.db";

pub const DATABASE_URL_VAR: &str = "PORTER_DATABASE_URL";
/// Comma-separated list of extension definition files
pub const EXTENSIONS_VAR: &str = "PORTER_EXTENSIONS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite URL of the database to export from or import into
    pub database_url: Option<String>,
    /// TOML files declaring extra entity types
    pub extensions: Vec<PathBuf>,
}

/// `<config dir>/tenant-porter/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tenant-porter")
        .join("config.toml")
}

impl Config {
    /// Load every layer
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    log::debug!("No config file at {}", path.display());
                    Self::default()
                }
            }
        };

        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a TOML config file; relative extension paths are resolved
    /// against the file's directory
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        if let Some(base) = path.parent() {
            for extension in &mut config.extensions {
                if extension.is_relative() {
                    *extension = base.join(&*extension);
                }
            }
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override values from environment variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_VAR).filter(|v| !v.trim().is_empty()) {
            self.database_url = Some(url.trim().to_string());
        }
        if let Some(list) = lookup(EXTENSIONS_VAR) {
            self.extensions = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
    }

    /// Configured database URL, or the default
    pub fn database_url(&self) -> &str {
        self.database_url.as_deref().unwrap_or(DEFAULT_DATABASE_URL)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_parse_config() {
        let config = Config::parse(
            r#"
            database_url = "sqlite:///var/lib/porter/main.db"
            extensions = ["crm.toml"]
            "#,
        )
        .unwrap();
        assert_eq!(config.database_url(), "sqlite:///var/lib/porter/main.db");
        assert_eq!(config.extensions, vec![PathBuf::from("crm.toml")]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database_url(), DEFAULT_DATABASE_URL);
    }

    #[test]
    fn test_unknown_value_type_rejected() {
        assert!(Config::parse("extensions = 3").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse(r#"database_url = "sqlite://file.db""#).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (DATABASE_URL_VAR, " sqlite://env.db "),
            (EXTENSIONS_VAR, "a.toml, ,b.toml"),
        ]);

        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database_url(), "sqlite://env.db");
        assert_eq!(
            config.extensions,
            vec![PathBuf::from("a.toml"), PathBuf::from("b.toml")]
        );
    }

    #[test]
    fn test_blank_env_value_ignored() {
        let mut config = Config::parse(r#"database_url = "sqlite://file.db""#).unwrap();
        config.apply_env(|key| (key == DATABASE_URL_VAR).then(|| "  ".to_string()));
        assert_eq!(config.database_url(), "sqlite://file.db");
    }

    #[test]
    fn test_relative_extensions_resolved_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "extensions = [\"ext/crm.toml\", \"/abs/hr.toml\"]").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.extensions[0], dir.path().join("ext/crm.toml"));
        assert_eq!(config.extensions[1], PathBuf::from("/abs/hr.toml"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
