//! Built-in cache generations and their asset manifests.

use clap::ValueEnum;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use url::Url;

/// Offline fallback document served when the dynamic page is unreachable.
pub const OFFLINE_PAGE: &str = "/static/pwa/offline.html";

/// URL substring marking the dynamic page.
pub const NETWORK_FIRST_MARKER: &str = "/scheme";

pub const V1_CACHE_NAME: &str = "kc-scheme-v1";

pub const V1_ASSETS: &[&str] = &[
  "/scheme",
  "/static/pwa/manifest.json",
  "/static/pdfs/haryana.pdf",
  "/static/pdfs/karnataka.pdf",
  "/static/pdfs/rajasthan.pdf",
];

pub const V2_CACHE_NAME: &str = "kc-scheme-v3";

// The dynamic page is deliberately absent: it is always fetched live.
pub const V2_ASSETS: &[&str] = &[
  "/",
  OFFLINE_PAGE,
  "/static/pwa/manifest.json",
  "/static/pwa/icon-192.png",
  "/static/pdfs/haryana.pdf",
  "/static/pdfs/karnataka.pdf",
  "/static/pdfs/rajasthan.pdf",
];

/// Worker policy version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkerVersion {
  /// Install and fetch only, cache-first for every request
  V1,
  /// Adds activation pruning and network-first for the dynamic page
  #[default]
  V2,
}

impl WorkerVersion {
  pub fn cache_name(self) -> &'static str {
    match self {
      Self::V1 => V1_CACHE_NAME,
      Self::V2 => V2_CACHE_NAME,
    }
  }

  pub fn assets(self) -> &'static [&'static str] {
    match self {
      Self::V1 => V1_ASSETS,
      Self::V2 => V2_ASSETS,
    }
  }

  /// Whether the worker handles activate by deleting stale generations.
  pub fn prunes_on_activate(self) -> bool {
    self == Self::V2
  }

  /// Whether install asks the runtime to skip the waiting phase.
  pub fn skips_waiting(self) -> bool {
    self == Self::V2
  }

  /// Whether requests matching the marker go to the network first.
  pub fn splits_routing(self) -> bool {
    self == Self::V2
  }
}

/// Everything a worker needs to know about the generation it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  pub version: WorkerVersion,
  /// Generation identifier; must change with every deployment
  pub cache_name: String,
  pub assets: Vec<String>,
  pub network_first_marker: String,
  pub offline_page: String,
}

impl Manifest {
  /// The manifest shipped with a policy version.
  pub fn builtin(version: WorkerVersion) -> Self {
    Self {
      version,
      cache_name: version.cache_name().to_string(),
      assets: version.assets().iter().map(|s| s.to_string()).collect(),
      network_first_marker: NETWORK_FIRST_MARKER.to_string(),
      offline_page: OFFLINE_PAGE.to_string(),
    }
  }

  /// Check that the manifest can be installed and served.
  pub fn validate(&self) -> Result<()> {
    if self.cache_name.trim().is_empty() {
      return Err(eyre!("Cache name must not be empty"));
    }

    if self.assets.is_empty() {
      return Err(eyre!("Cache {} has no assets to install", self.cache_name));
    }

    if self.version.splits_routing() {
      if !self.assets.iter().any(|a| a == &self.offline_page) {
        return Err(eyre!(
          "Offline page {} is not in the asset list of {}; the fallback would never resolve",
          self.offline_page,
          self.cache_name
        ));
      }

      if self
        .assets
        .iter()
        .any(|a| a.contains(&self.network_first_marker))
      {
        return Err(eyre!(
          "Asset list of {} contains the network-first page {}",
          self.cache_name,
          self.network_first_marker
        ));
      }
    }

    Ok(())
  }

  /// Whether a request URL should be served network-first.
  pub fn is_network_first(&self, url: &Url) -> bool {
    self.version.splits_routing() && url.as_str().contains(&self.network_first_marker)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builtin_manifests() {
    let v1 = Manifest::builtin(WorkerVersion::V1);
    assert_eq!(v1.cache_name, "kc-scheme-v1");
    assert_eq!(v1.assets.len(), 5);
    assert!(v1.validate().is_ok());

    let v2 = Manifest::builtin(WorkerVersion::V2);
    assert_eq!(v2.cache_name, "kc-scheme-v3");
    assert_eq!(v2.assets.len(), 7);
    assert!(v2.assets.contains(&"/".to_string()));
    assert!(v2.assets.contains(&OFFLINE_PAGE.to_string()));
    assert!(!v2.assets.contains(&"/scheme".to_string()));
    assert!(v2.validate().is_ok());
  }

  #[test]
  fn test_v2_requires_cached_offline_page() {
    let mut manifest = Manifest::builtin(WorkerVersion::V2);
    manifest.assets.retain(|a| a != OFFLINE_PAGE);
    assert!(manifest.validate().is_err());

    // v1 never serves the fallback, so it does not need it
    let mut manifest = Manifest::builtin(WorkerVersion::V1);
    manifest.offline_page = "/missing.html".into();
    assert!(manifest.validate().is_ok());
  }

  #[test]
  fn test_v2_rejects_caching_dynamic_page() {
    let mut manifest = Manifest::builtin(WorkerVersion::V2);
    manifest.assets.push("/scheme".into());
    assert!(manifest.validate().is_err());
  }

  #[test]
  fn test_empty_manifest_is_rejected() {
    let mut manifest = Manifest::builtin(WorkerVersion::V1);
    manifest.assets.clear();
    assert!(manifest.validate().is_err());
  }

  #[test]
  fn test_network_first_routing() {
    let url = Url::parse("http://localhost:5000/scheme?state=haryana").unwrap();
    let pdf = Url::parse("http://localhost:5000/static/pdfs/haryana.pdf").unwrap();

    assert!(Manifest::builtin(WorkerVersion::V2).is_network_first(&url));
    assert!(!Manifest::builtin(WorkerVersion::V2).is_network_first(&pdf));
    assert!(!Manifest::builtin(WorkerVersion::V1).is_network_first(&url));
  }
}
