use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::worker::{Manifest, WorkerVersion};

const DEFAULT_ORIGIN: &str = "http://localhost:5000";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the assets are served from
  pub origin: String,
  /// Worker policy version to run
  pub version: WorkerVersion,
  /// SQLite database path (defaults to $XDG_DATA_HOME/kc-offline/cache.db)
  pub database: Option<PathBuf>,
  /// Network timeout for a single request, in seconds
  pub timeout_secs: u64,
  pub cache: CacheConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: DEFAULT_ORIGIN.to_string(),
      version: WorkerVersion::default(),
      database: None,
      timeout_secs: 30,
      cache: CacheConfig::default(),
    }
  }
}

/// Overrides for the built-in manifest of the selected version
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Generation identifier; bump it whenever the asset list changes
  pub name: Option<String>,
  pub assets: Option<Vec<String>>,
  pub offline_page: Option<String>,
  /// URL substring routed network-first
  pub network_first: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kc-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kc-offline/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
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
    let local = PathBuf::from("kc-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kc-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  /// The built-in manifest of the selected version with file overrides applied.
  pub fn manifest(&self) -> Result<Manifest> {
    let mut manifest = Manifest::builtin(self.version);

    if let Some(name) = &self.cache.name {
      manifest.cache_name = name.clone();
    }
    if let Some(assets) = &self.cache.assets {
      manifest.assets = assets.clone();
    }
    if let Some(page) = &self.cache.offline_page {
      manifest.offline_page = page.clone();
    }
    if let Some(marker) = &self.cache.network_first {
      manifest.network_first_marker = marker.clone();
    }

    manifest.validate()?;
    Ok(manifest)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.origin, DEFAULT_ORIGIN);
    assert_eq!(config.version, WorkerVersion::V2);
    assert_eq!(config.manifest().unwrap(), Manifest::builtin(WorkerVersion::V2));
  }

  #[test]
  fn test_overrides_apply_to_selected_version() {
    let config = Config::parse(
      r#"
origin: https://kc.example.org
version: v1
timeout_secs: 5
cache:
  name: kc-scheme-v1b
  assets:
    - /scheme
    - /static/pdfs/haryana.pdf
"#,
    )
    .unwrap();

    let manifest = config.manifest().unwrap();
    assert_eq!(manifest.version, WorkerVersion::V1);
    assert_eq!(manifest.cache_name, "kc-scheme-v1b");
    assert_eq!(manifest.assets.len(), 2);
    assert_eq!(config.timeout(), Duration::from_secs(5));
    assert_eq!(config.origin_url().unwrap().host_str(), Some("kc.example.org"));
  }

  #[test]
  fn test_invalid_override_is_rejected() {
    let config = Config::parse(
      r#"
cache:
  assets:
    - /static/pdfs/haryana.pdf
"#,
    )
    .unwrap();
    // v2 without the offline page in its assets
    assert!(config.manifest().is_err());
  }

  #[test]
  fn test_unknown_version_fails_to_parse() {
    assert!(Config::parse("version: v9").is_err());
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/kc-offline.yaml"))).is_err());
  }
}
