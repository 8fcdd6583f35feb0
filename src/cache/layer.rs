//! Cache layer that orchestrates retrieval strategies with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{CacheStore, FetchResponse, Request, Response};

/// Cache layer that applies a retrieval strategy to one request.
///
/// This layer sits between the fetch handler and the network client. It never
/// writes network responses back into the store; generations are only
/// populated by install.
pub struct CacheLayer<S: CacheStore> {
  storage: Arc<S>,
}

impl<S: CacheStore> CacheLayer<S> {
  /// Create a new cache layer over a shared store.
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Look the request up across all generations - on a hit, return it
  /// 2. On a miss, fetch from network and return the result as-is
  ///
  /// A network failure on a miss is returned to the caller unchanged.
  pub async fn cache_first<F, Fut>(&self, request: &Request, fetcher: F) -> Result<FetchResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.storage.match_request(request)? {
      debug!(url = %request.url, generation = %cached.generation, "Cache hit");
      return Ok(FetchResponse::from_cache(cached));
    }

    debug!(url = %request.url, "Cache miss, fetching from network");
    let response = fetcher().await?;
    Ok(FetchResponse::from_network(response))
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Fetch from network - any response that arrived is returned, whatever
  ///    its status
  /// 2. On network failure, return the stored `fallback` document
  ///    (offline mode)
  pub async fn network_first<F, Fut>(
    &self,
    request: &Request,
    fallback: &Request,
    fetcher: F,
  ) -> Result<FetchResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetcher().await {
      Ok(response) => Ok(FetchResponse::from_network(response)),
      Err(err) => {
        warn!(url = %request.url, error = %err, "Network unavailable, serving offline page");
        match self.storage.match_request(fallback)? {
          Some(cached) => Ok(FetchResponse::offline(cached)),
          None => Err(eyre!(
            "Network failed for {} and offline page {} is not cached: {}",
            request.url,
            fallback.url,
            err
          )),
        }
      }
    }
  }
}

impl<S: CacheStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
