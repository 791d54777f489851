//! Configuration file support for clinitree
//!
//! Reads from .clinitree/config.toml

use crate::validate::ValidationOptions;
use crate::db::{Database, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the database lives when CLINITREE_DB_PATH is not set
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct DatabaseConfig {
    /// Relative paths are resolved against the directory holding `.clinitree`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ValidationConfig {
    /// Report pathology/test/cluster ids that are missing from the catalog
    /// Default: false
    #[serde(default)]
    pub check_catalog: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Default: 3000
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// tracing filter directive used when CLINITREE_LOG is unset
    /// Default: "warn"
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl Config {
    /// Load config from .clinitree/config.toml
    /// Returns default config if the file doesn't exist or can't be parsed
    pub fn load() -> Self {
        match Self::find_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load a specific config file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read config, using defaults");
                return Self::default();
            }
        };
        let mut config: Config = match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not parse config, using defaults");
                return Self::default();
            }
        };

        // .clinitree/config.toml -> resolve against the project directory
        if let Some(db_path) = &config.database.path {
            if db_path.is_relative() {
                if let Some(project_dir) = path.parent().and_then(Path::parent) {
                    config.database.path = Some(project_dir.join(db_path));
                }
            }
        }
        config
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".clinitree").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Database file to use. CLINITREE_DB_PATH still wins over `database.path`.
    pub fn db_path(&self) -> PathBuf {
        match &self.database.path {
            Some(path) if std::env::var_os(crate::db::DB_PATH_ENV).is_none() => path.clone(),
            _ => Database::db_path(),
        }
    }

    /// Open (or create) the database this config points at
    pub fn open_database(&self) -> Result<Database> {
        Database::open_or_create(&self.db_path())
    }

    /// Validation options for `db`, loading the catalog only when asked to
    pub fn validation_options(&self, db: &Database) -> Result<ValidationOptions> {
        let catalog = if self.validation.check_catalog {
            Some(db.catalog_index()?)
        } else {
            None
        };
        Ok(ValidationOptions { catalog })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database.path.is_none());
        assert!(!config.validation.check_catalog);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[validation]
check_catalog = true

[server]
port = 8088
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validation.check_catalog);
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn test_relative_db_path_resolves_against_project() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join(".clinitree");
        std::fs::create_dir_all(&data_dir).unwrap();
        let config_path = data_dir.join("config.toml");
        std::fs::write(&config_path, "[database]\npath = \"data/trees.db\"\n").unwrap();

        let config = Config::load_from(&config_path);
        assert_eq!(config.database.path, Some(dir.path().join("data/trees.db")));
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[server]\nport = \"not a number\"\n").unwrap();

        let config = Config::load_from(&config_path);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_validation_options_follow_config() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();

        let mut config = Config::default();
        assert!(config.validation_options(&db).unwrap().catalog.is_none());

        config.validation.check_catalog = true;
        db.create_pathology("Lombalgie commune", None).unwrap();
        let options = config.validation_options(&db).unwrap();
        assert_eq!(options.catalog.unwrap().pathology_ids.len(), 1);
    }
}
