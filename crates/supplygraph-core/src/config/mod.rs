//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::graph::{DEFAULT_MAX_HOPS, DEFAULT_MAX_HOPS_LIMIT, SchemaRegistry};
use crate::storage::database::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "SUPPLYGRAPH_CONFIG_DIR";

/// Store backends that can be selected by `store.backend`
pub const STORE_BACKENDS: [&str; 2] = ["sqlite", "memory"];

/// SupplyGraph configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub traversal: TraversalConfig,
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: String,
    /// Database file; `None` means `<config dir>/supplygraph.db`
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    /// How long a write waits on another process's lock before failing
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub default_max_hops: u32,
    pub max_hops_limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// TOML registry replacing the standard one
    pub registry_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_max_hops: DEFAULT_MAX_HOPS,
            max_hops_limit: DEFAULT_MAX_HOPS_LIMIT,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("supplygraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !STORE_BACKENDS.contains(&self.store.backend.as_str()) {
            return Err(anyhow!(
                "Invalid store backend: {}. Valid options: {}",
                self.store.backend,
                STORE_BACKENDS.join(", ")
            ));
        }
        if self.store.max_connections == 0 {
            return Err(anyhow!("store.max_connections must be at least 1"));
        }
        if self.traversal.max_hops_limit == 0 {
            return Err(anyhow!("traversal.max_hops_limit must be at least 1"));
        }
        if self.traversal.default_max_hops == 0
            || self.traversal.default_max_hops > self.traversal.max_hops_limit
        {
            return Err(anyhow!(
                "traversal.default_max_hops must be between 1 and traversal.max_hops_limit ({})",
                self.traversal.max_hops_limit
            ));
        }
        Ok(())
    }

    /// Resolved database file for the sqlite backend
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("supplygraph.db")),
        }
    }

    /// Load the configured schema registry, or the standard one
    pub fn schema_registry(&self) -> anyhow::Result<SchemaRegistry> {
        match &self.schema.registry_path {
            Some(path) => SchemaRegistry::load(path)
                .with_context(|| format!("Failed to load schema registry: {}", path.display())),
            None => Ok(SchemaRegistry::standard()),
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "store.backend" => Ok(self.store.backend.clone()),
            "store.path" => Ok(self.database_path()?.display().to_string()),
            "store.max_connections" => Ok(self.store.max_connections.to_string()),
            "store.busy_timeout_ms" => Ok(self.store.busy_timeout_ms.to_string()),

            "traversal.default_max_hops" => Ok(self.traversal.default_max_hops.to_string()),
            "traversal.max_hops_limit" => Ok(self.traversal.max_hops_limit.to_string()),

            "schema.registry_path" => Ok(match &self.schema.registry_path {
                Some(path) => path.display().to_string(),
                None => "(standard)".to_string(),
            }),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `supplygraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "store.backend" => {
                if !STORE_BACKENDS.contains(&value) {
                    return Err(anyhow!(
                        "Invalid store backend: {}. Valid options: {}",
                        value,
                        STORE_BACKENDS.join(", ")
                    ));
                }
                self.store.backend = value.to_string();
            }
            "store.path" => {
                self.store.path = optional_path(value);
            }
            "store.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("store.max_connections must be at least 1"));
                }
                self.store.max_connections = max;
            }
            "store.busy_timeout_ms" => {
                self.store.busy_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid busy_timeout_ms value: {}", value))?;
            }

            "traversal.default_max_hops" => {
                let hops: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid default_max_hops value: {}", value))?;
                if hops == 0 || hops > self.traversal.max_hops_limit {
                    return Err(anyhow!(
                        "default_max_hops must be between 1 and {}",
                        self.traversal.max_hops_limit
                    ));
                }
                self.traversal.default_max_hops = hops;
            }
            "traversal.max_hops_limit" => {
                let limit: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_hops_limit value: {}", value))?;
                if limit == 0 || limit < self.traversal.default_max_hops {
                    return Err(anyhow!(
                        "max_hops_limit must be at least traversal.default_max_hops ({})",
                        self.traversal.default_max_hops
                    ));
                }
                self.traversal.max_hops_limit = limit;
            }

            "schema.registry_path" => {
                self.schema.registry_path = optional_path(value);
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `supplygraph config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "store.backend",
            "store.path",
            "store.max_connections",
            "store.busy_timeout_ms",
            "traversal.default_max_hops",
            "traversal.max_hops_limit",
            "schema.registry_path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Empty or `default` clears an optional path
fn optional_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if value.is_empty() || value == "default" {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.store.backend, "sqlite");
        assert!(config.store.path.is_none());
        assert_eq!(config.store.max_connections, 5);
        assert_eq!(config.store.busy_timeout_ms, 5000);
        assert_eq!(config.traversal.default_max_hops, 4);
        assert_eq!(config.traversal.max_hops_limit, 16);
        assert!(config.schema.registry_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();

        config.set("store.backend", "memory").unwrap();
        assert_eq!(config.get("store.backend").unwrap(), "memory");

        config.set("store.path", "/tmp/graph.db").unwrap();
        assert_eq!(config.get("store.path").unwrap(), "/tmp/graph.db");
        config.set("store.path", "default").unwrap();
        assert!(config.store.path.is_none());

        config.set("traversal.default_max_hops", "6").unwrap();
        assert_eq!(config.traversal.default_max_hops, 6);

        config.set("store.busy_timeout_ms", "250").unwrap();
        assert_eq!(config.get("store.busy_timeout_ms").unwrap(), "250");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();

        assert!(config.set("store.backend", "postgres").is_err());
        assert!(config.set("store.max_connections", "0").is_err());
        assert!(config.set("store.busy_timeout_ms", "-1").is_err());
        assert!(config.set("traversal.default_max_hops", "17").is_err());
        assert!(config.set("traversal.max_hops_limit", "2").is_err());
        assert!(config.set("traversal.default_max_hops", "many").is_err());
        assert!(config.set("unknown.key", "1").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_list_contains_every_key() {
        let config = Config::default();
        let keys: Vec<String> = config.list().unwrap().into_iter().map(|(k, _)| k).collect();

        assert_eq!(keys.len(), 7);
        assert!(keys.contains(&"traversal.max_hops_limit".to_string()));
        assert!(keys.contains(&"schema.registry_path".to_string()));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("store.backend", "memory").unwrap();
        config.set("traversal.max_hops_limit", "8").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[traversal]\nmax_hops_limit = 10\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.traversal.max_hops_limit, 10);
        assert_eq!(loaded.traversal.default_max_hops, 4);
        assert_eq!(loaded.store.backend, "sqlite");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[store]\nbackend = \"cassandra\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
