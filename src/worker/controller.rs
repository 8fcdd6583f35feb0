//! Install, activate and fetch handlers for one cache generation.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStore, FetchResponse, Request};
use crate::network::{resolve, Fetcher};

use super::event::WorkerScope;
use super::manifest::Manifest;

/// Reacts to worker events on behalf of one manifest.
///
/// The store and the network are both injected; the controller itself keeps
/// no state besides the signals it raises on its `WorkerScope`.
pub struct CacheController<S: CacheStore, F: Fetcher> {
  manifest: Manifest,
  origin: Url,
  cache: CacheLayer<S>,
  fetcher: F,
  scope: WorkerScope,
}

impl<S: CacheStore, F: Fetcher> CacheController<S, F> {
  pub fn new(manifest: Manifest, origin: Url, store: Arc<S>, fetcher: F) -> Result<Self> {
    manifest.validate()?;

    Ok(Self {
      manifest,
      origin,
      cache: CacheLayer::new(store),
      fetcher,
      scope: WorkerScope::default(),
    })
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn scope(&self) -> &WorkerScope {
    &self.scope
  }

  pub fn store(&self) -> &S {
    self.cache.storage()
  }

  #[cfg(test)]
  pub(crate) fn fetcher(&self) -> &F {
    &self.fetcher
  }

  /// Build a GET request for a path relative to the origin.
  pub fn request(&self, path: &str) -> Result<Request> {
    Ok(Request::get(resolve(&self.origin, path)?))
  }

  /// Populate the current generation with every asset in the manifest.
  ///
  /// All assets are fetched before anything is stored; one failed fetch
  /// (network error or non-2xx status) fails the whole install.
  pub async fn handle_install(&self) -> Result<()> {
    let name = &self.manifest.cache_name;
    info!(cache = %name, assets = self.manifest.assets.len(), "Installing cache");

    self.store().open(name)?;

    let requests = self
      .manifest
      .assets
      .iter()
      .map(|path| self.request(path))
      .collect::<Result<Vec<_>>>()?;

    let responses = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

    let mut entries = Vec::with_capacity(requests.len());
    for (request, response) in requests.into_iter().zip(responses) {
      let response =
        response.map_err(|e| eyre!("Failed to install cache {}: {}", name, e))?;

      if !response.is_ok() {
        return Err(eyre!(
          "Failed to install cache {}: {} returned status {}",
          name,
          request.url,
          response.status
        ));
      }

      entries.push((request, response));
    }

    self.store().put_all(name, &entries)?;
    info!(cache = %name, entries = entries.len(), "Cache installed");

    if self.manifest.version.skips_waiting() {
      self.scope.skip_waiting();
    }

    Ok(())
  }

  /// Delete every generation other than the current one.
  ///
  /// Returns the names of the deleted generations. Versions without an
  /// activate handler leave the store untouched.
  pub async fn handle_activate(&self) -> Result<Vec<String>> {
    if !self.manifest.version.prunes_on_activate() {
      debug!(cache = %self.manifest.cache_name, "No activate handler for this version");
      return Ok(Vec::new());
    }

    let mut deleted = Vec::new();
    for name in self.store().keys()? {
      if name != self.manifest.cache_name {
        self.store().delete(&name)?;
        info!(cache = %name, "Deleted stale cache");
        deleted.push(name);
      }
    }

    self.scope.claim_clients();
    Ok(deleted)
  }

  /// Answer an intercepted request.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchResponse> {
    if self.manifest.is_network_first(&request.url) {
      let fallback = self.request(&self.manifest.offline_page)?;
      self
        .cache
        .network_first(request, &fallback, || self.fetcher.fetch(request))
        .await
    } else {
      self
        .cache
        .cache_first(request, || self.fetcher.fetch(request))
        .await
    }
  }

  /// Send a request straight to the network, bypassing every cache.
  ///
  /// Used by the runtime for requests arriving before the worker controls
  /// its clients.
  pub async fn passthrough(&self, request: &Request) -> Result<FetchResponse> {
    let response = self.fetcher.fetch(request).await.map_err(|e| {
      warn!(url = %request.url, error = %e, "Uncontrolled request failed");
      e
    })?;
    Ok(FetchResponse::from_network(response))
  }
}
