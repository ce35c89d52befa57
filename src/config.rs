use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub memory: MemoryConfig,
  pub durable: DurableConfig,
  pub response: ResponseConfig,
  /// How often each tier drops expired entries
  #[serde(with = "humantime_serde")]
  pub sweep_interval: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      memory: MemoryConfig::default(),
      durable: DurableConfig::default(),
      response: ResponseConfig::default(),
      sweep_interval: Duration::from_secs(60),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
  pub enabled: bool,
  /// Entry count at which the least recently accessed entry is evicted
  pub max_items: usize,
  #[serde(with = "humantime_serde")]
  pub ttl: Duration,
}

impl Default for MemoryConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_items: 1000,
      ttl: Duration::from_secs(5 * 60),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
  pub enabled: bool,
  pub store_namespace: String,
  #[serde(with = "humantime_serde")]
  pub ttl: Duration,
  pub backend: BackendKind,
  /// SQLite database file (defaults to `<data dir>/tiercache/cache.db`)
  pub path: Option<PathBuf>,
}

impl Default for DurableConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      store_namespace: "tiercache".to_string(),
      ttl: Duration::from_secs(24 * 60 * 60),
      backend: BackendKind::Sqlite,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
  pub enabled: bool,
  pub cache_namespace: String,
  #[serde(with = "humantime_serde")]
  pub ttl: Duration,
  /// Shares the durable tier's database file when both use SQLite
  pub backend: BackendKind,
}

impl Default for ResponseConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      cache_namespace: "tiercache-responses".to_string(),
      ttl: Duration::from_secs(60 * 60),
      backend: BackendKind::Sqlite,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// Embedded on-disk database
  #[default]
  Sqlite,
  /// In-process stand-in; nothing survives a restart
  Memory,
  /// Capability missing: the tier always misses
  None,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tiercache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tiercache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tiercache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tiercache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.sweep_interval.is_zero() {
      return Err(eyre!("sweep_interval must be greater than zero"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert!(config.memory.enabled);
    assert_eq!(config.memory.max_items, 1000);
    assert_eq!(config.durable.backend, BackendKind::Sqlite);
    assert_eq!(config.response.cache_namespace, "tiercache-responses");
    assert_eq!(config.sweep_interval, Duration::from_secs(60));
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
memory:
  max_items: 2
  ttl: 5s
durable:
  enabled: false
response:
  backend: none
sweep_interval: 30s
"#,
    )
    .unwrap();

    assert_eq!(config.memory.max_items, 2);
    assert_eq!(config.memory.ttl, Duration::from_secs(5));
    assert!(config.memory.enabled);
    assert!(!config.durable.enabled);
    assert_eq!(config.durable.store_namespace, "tiercache");
    assert_eq!(config.response.backend, BackendKind::None);
    assert_eq!(config.sweep_interval, Duration::from_secs(30));
  }

  #[test]
  fn test_example_config_parses() {
    let config = Config::from_yaml(include_str!("../config.example.yaml")).unwrap();
    assert_eq!(config.durable.ttl, Duration::from_secs(24 * 60 * 60));
    assert_eq!(config.response.ttl, Duration::from_secs(60 * 60));
    assert!(config.durable.path.is_none());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/tiercache.yaml"))).is_err());
  }

  #[test]
  fn test_rejects_zero_sweep_interval() {
    let err = Config::from_yaml("sweep_interval: 0s\n").unwrap_err();
    assert!(err.to_string().contains("sweep_interval"));
  }

  #[test]
  fn test_rejects_unknown_backend() {
    assert!(Config::from_yaml("durable:\n  backend: redis\n").is_err());
  }
}
