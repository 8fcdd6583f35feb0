//! Scripted fetcher for tests.

use crate::cache::{Request, Response};
use crate::network::Fetcher;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serves canned responses by path and counts every call.
#[derive(Default)]
pub struct FakeFetcher {
  responses: Mutex<HashMap<String, Response>>,
  unreachable: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer `path` with a 200 response carrying `body`.
  pub fn serve(&self, path: &str, body: &str) -> &Self {
    self.serve_response(path, Response::ok(path, Some("text/plain"), body))
  }

  pub fn serve_response(&self, path: &str, response: Response) -> &Self {
    self
      .responses
      .lock()
      .unwrap()
      .insert(path.to_string(), response);
    self
  }

  /// Every asset of a manifest, with the path as body.
  pub fn serve_all(&self, paths: &[String]) -> &Self {
    for path in paths {
      self.serve(path, path);
    }
    self
  }

  /// Fail requests for `path` as if the connection dropped.
  pub fn fail(&self, path: &str) -> &Self {
    self.unreachable.lock().unwrap().insert(path.to_string());
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn reset_calls(&self) {
    self.calls.store(0, Ordering::SeqCst);
  }
}

impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let path = request.url.path().to_string();

    if self.offline.load(Ordering::SeqCst) || self.unreachable.lock().unwrap().contains(&path) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }

    let mut response = self
      .responses
      .lock()
      .unwrap()
      .get(&path)
      .cloned()
      .unwrap_or_else(|| {
        let mut missing = Response::ok(&path, Some("text/html"), "not found");
        missing.status = 404;
        missing
      });
    response.url = request.url.to_string();
    Ok(response)
  }
}
