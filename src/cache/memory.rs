//! In-process cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::traits::{
  body_digest, CacheStore, CachedResponse, GenerationSummary, Method, Request, Response,
};

#[derive(Debug, Clone)]
struct StoredEntry {
  response: Response,
  digest: String,
  cached_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Generation {
  name: String,
  created_at: DateTime<Utc>,
  entries: BTreeMap<String, StoredEntry>,
}

/// Cache store held entirely in memory.
///
/// Used for dry runs, where nothing should outlive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
  generations: Mutex<Vec<Generation>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Vec<Generation>>> {
    self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn find_or_create<'a>(generations: &'a mut Vec<Generation>, name: &str) -> &'a mut Generation {
  if let Some(index) = generations.iter().position(|g| g.name == name) {
    return &mut generations[index];
  }

  generations.push(Generation {
    name: name.to_string(),
    created_at: Utc::now(),
    entries: BTreeMap::new(),
  });
  let last = generations.len() - 1;
  &mut generations[last]
}

impl CacheStore for MemoryStore {
  fn open(&self, name: &str) -> Result<()> {
    let mut generations = self.lock()?;
    find_or_create(&mut generations, name);
    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    // Validate everything before touching the map
    if let Some((request, _)) = entries.iter().find(|(r, _)| r.method != Method::Get) {
      return Err(eyre!("Only GET requests can be cached, got {}", request));
    }

    let mut generations = self.lock()?;
    let generation = find_or_create(&mut generations, name);
    let now = Utc::now();

    for (request, response) in entries {
      generation.entries.insert(
        request.cache_key().to_string(),
        StoredEntry {
          response: response.clone(),
          digest: body_digest(&response.body),
          cached_at: now,
        },
      );
    }

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.iter().map(|g| g.name.clone()).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut generations = self.lock()?;
    let before = generations.len();
    generations.retain(|g| g.name != name);
    Ok(generations.len() != before)
  }

  fn match_in(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    if request.method != Method::Get {
      return Ok(None);
    }

    let generations = self.lock()?;
    let hit = generations
      .iter()
      .find(|g| g.name == name)
      .and_then(|g| g.entries.get(request.cache_key()))
      .map(|entry| CachedResponse {
        response: entry.response.clone(),
        generation: name.to_string(),
        cached_at: entry.cached_at,
        digest: entry.digest.clone(),
      });

    Ok(hit)
  }

  fn summaries(&self) -> Result<Vec<GenerationSummary>> {
    let generations = self.lock()?;
    Ok(
      generations
        .iter()
        .map(|g| GenerationSummary {
          name: g.name.clone(),
          entries: g.entries.len(),
          bytes: g.entries.values().map(|e| e.response.body.len() as u64).sum(),
          created_at: g.created_at,
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:5000").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_match_searches_generations_oldest_first() {
    let store = MemoryStore::new();
    let req = request("/static/pdfs/haryana.pdf");
    store
      .put_all("old", &[(req.clone(), Response::ok(req.cache_key(), None, "old"))])
      .unwrap();
    store
      .put_all("new", &[(req.clone(), Response::ok(req.cache_key(), None, "new"))])
      .unwrap();

    let hit = store.match_request(&req).unwrap().unwrap();
    assert_eq!(hit.generation, "old");
    assert_eq!(hit.response.body, b"old");

    store.delete("old").unwrap();
    let hit = store.match_request(&req).unwrap().unwrap();
    assert_eq!(hit.generation, "new");
  }

  #[test]
  fn test_rejected_put_all_creates_nothing() {
    let store = MemoryStore::new();
    let mut req = request("/form");
    req.method = Method::Post;

    assert!(store
      .put_all("gen", &[(req.clone(), Response::ok(req.cache_key(), None, ""))])
      .is_err());
    assert!(store.keys().unwrap().is_empty());
  }
}
