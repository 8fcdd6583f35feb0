//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  #[default]
  Get,
  Head,
  Post,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
    }
  }
}

/// An intercepted outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  /// Create a GET request for an absolute URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
    }
  }

  /// Key used to look the request up in a cache generation.
  pub fn cache_key(&self) -> &str {
    self.url.as_str()
  }
}

impl fmt::Display for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method.as_str(), self.url)
  }
}

/// A response, either received from the network or read back from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  /// A 200 response with the given body.
  #[cfg(test)]
  pub fn ok(url: impl Into<String>, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.into(),
      status: 200,
      content_type: content_type.map(String::from),
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// A response read back from a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// Generation the response was found in
  pub generation: String,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
  /// SHA-256 of the body, hex encoded
  pub digest: String,
}

/// Per-generation totals used for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
  pub name: String,
  pub entries: usize,
  pub bytes: u64,
  pub created_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A store maps generation names to request-keyed responses. Generations are
/// written once by `put_all` and removed as a whole by `delete`; entries are
/// never edited in place.
pub trait CacheStore: Send + Sync {
  /// Open a generation, creating it if absent.
  fn open(&self, name: &str) -> Result<()>;

  /// Store every entry into a generation, or nothing at all.
  fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Names of all generations, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a generation. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look a request up in one generation.
  fn match_in(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Look a request up across all generations, oldest first.
  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    for name in self.keys()? {
      if let Some(hit) = self.match_in(&name, request)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }

  /// Totals for every generation, oldest first.
  fn summaries(&self) -> Result<Vec<GenerationSummary>>;
}

/// Where a fetch answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Stored response from a cache generation
  Cache,
  /// Network unavailable, serving the offline document
  OfflineFallback,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Network => write!(f, "network"),
      Self::Cache => write!(f, "cache"),
      Self::OfflineFallback => write!(f, "offline fallback"),
    }
  }
}

/// The resolved answer to a fetch event.
#[derive(Debug, Clone)]
pub struct FetchResponse {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// Generation the response was read from (if from cache)
  pub generation: Option<String>,
  /// When the response was stored (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// SHA-256 of the stored body (if from cache)
  pub digest: Option<String>,
}

impl FetchResponse {
  /// Create a fetch answer from a live network response.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      generation: None,
      cached_at: None,
      digest: None,
    }
  }

  /// Create a fetch answer from a cache hit.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      generation: Some(cached.generation),
      cached_at: Some(cached.cached_at),
      digest: Some(cached.digest),
    }
  }

  /// Create a fetch answer for offline mode.
  pub fn offline(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::OfflineFallback,
      generation: Some(cached.generation),
      cached_at: Some(cached.cached_at),
      digest: Some(cached.digest),
    }
  }
}

/// SHA-256 of a response body, hex encoded.
pub fn body_digest(body: &[u8]) -> String {
  use sha2::{Digest, Sha256};

  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}
