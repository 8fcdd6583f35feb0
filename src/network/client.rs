use crate::cache::{Method, Request, Response};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Network fetch primitive.
///
/// Implementations resolve to `Ok` for every response that arrived, whatever
/// its status, and fail only when no response could be obtained.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  /// Every request fails once `timeout` elapses without a complete response
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("kc-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

/// Resolve a path (or absolute URL) against an origin
pub fn resolve(origin: &Url, path: &str) -> Result<Url> {
  origin
    .join(path)
    .map_err(|e| eyre!("Invalid asset path {}: {}", path, e))
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
    };

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let url = response.url().to_string();

    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
      match value.to_str() {
        Ok(value) => {
          headers.insert(name.as_str().to_string(), value.to_string());
        }
        Err(_) => debug!(url = %request.url, header = %name, "Skipping non-UTF-8 header value"),
      }
    }
    let content_type = headers.get("content-type").cloned();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    debug!(url = %url, status, bytes = body.len(), "Fetched from network");

    Ok(Response {
      url,
      status,
      content_type,
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_relative_paths() {
    let origin = Url::parse("https://kc.example.org").unwrap();
    assert_eq!(
      resolve(&origin, "/static/pdfs/haryana.pdf").unwrap().as_str(),
      "https://kc.example.org/static/pdfs/haryana.pdf"
    );
    assert_eq!(resolve(&origin, "/").unwrap().as_str(), "https://kc.example.org/");
  }

  #[test]
  fn test_resolve_keeps_absolute_urls() {
    let origin = Url::parse("https://kc.example.org").unwrap();
    assert_eq!(
      resolve(&origin, "https://cdn.example.org/x.pdf").unwrap().as_str(),
      "https://cdn.example.org/x.pdf"
    );
  }

  #[tokio::test]
  async fn test_unreachable_host_is_an_error() {
    let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();
    let origin = Url::parse("http://127.0.0.1:9").unwrap();
    let request = Request::get(resolve(&origin, "/scheme").unwrap());
    assert!(fetcher.fetch(&request).await.is_err());
  }
}
