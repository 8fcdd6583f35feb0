//! SQLite-backed cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::traits::{
  body_digest, CacheStore, CachedResponse, GenerationSummary, Method, Request, Response,
};

/// SQLite-based cache store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the given path, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    debug!(path = %path.display(), "Opened cache database");

    Self::with_connection(conn)
  }

  /// Open a store that lives only as long as this value.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("kc-offline").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache generation, in creation order
CREATE TABLE IF NOT EXISTS generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request URL
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    -- Final URL of the response, after redirects
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);
"#;

impl CacheStore for SqliteStore {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    for (request, response) in entries {
      if request.method != Method::Get {
        return Err(eyre!("Only GET requests can be cached, got {}", request));
      }

      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (generation, request_key, response_url, status, content_type, headers, body, digest, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          name,
          request.cache_key(),
          response.url,
          response.status,
          response.content_type,
          headers,
          response.body,
          body_digest(&response.body),
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", request.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_in(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    if request.method != Method::Get {
      return Ok(None);
    }

    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT response_url, status, content_type, headers, body, digest, cached_at
         FROM cache_entries
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    type Row = (String, u16, Option<String>, String, Vec<u8>, String, String);
    let row: Option<Row> = stmt
      .query_row(params![name, request.cache_key()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    let Some((url, status, content_type, headers, body, digest, cached_at)) = row else {
      return Ok(None);
    };

    // A body that no longer matches its digest is treated as absent
    if body_digest(&body) != digest {
      warn!(cache = %name, url = %request.url, "Stored body failed digest check, ignoring entry");
      return Ok(None);
    }

    let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(CachedResponse {
      response: Response {
        url,
        status,
        content_type,
        headers,
        body,
      },
      generation: name.to_string(),
      cached_at: parse_datetime(&cached_at)?,
      digest,
    }))
  }

  fn summaries(&self) -> Result<Vec<GenerationSummary>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.created_at, COUNT(e.request_key), COALESCE(SUM(LENGTH(e.body)), 0)
         FROM generations g
         LEFT JOIN cache_entries e ON e.generation = g.name
         GROUP BY g.id
         ORDER BY g.id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, i64>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to summarize caches: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache summary: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, entries, bytes)| -> Result<GenerationSummary> {
        Ok(GenerationSummary {
          name,
          entries: entries as usize,
          bytes: bytes as u64,
          created_at: parse_datetime(&created_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:5000").unwrap().join(path).unwrap())
  }

  fn entry(path: &str, body: &str) -> (Request, Response) {
    let req = request(path);
    let resp = Response::ok(req.cache_key(), Some("application/pdf"), body);
    (req, resp)
  }

  #[test]
  fn test_put_all_then_match() {
    let store = SqliteStore::in_memory().unwrap();
    store
      .put_all("kc-scheme-v1", &[entry("/a.pdf", "a"), entry("/b.pdf", "b")])
      .unwrap();

    let hit = store.match_request(&request("/b.pdf")).unwrap().unwrap();
    assert_eq!(hit.response.body, b"b");
    assert_eq!(hit.generation, "kc-scheme-v1");
    assert_eq!(hit.digest, body_digest(b"b"));
    assert!(store.match_request(&request("/c.pdf")).unwrap().is_none());
  }

  #[test]
  fn test_headers_survive_storage() {
    let store = SqliteStore::in_memory().unwrap();
    let (req, mut resp) = entry("/static/pwa/manifest.json", "{}");
    resp.headers.insert("etag".into(), "\"abc\"".into());
    store.put_all("gen", &[(req.clone(), resp.clone())]).unwrap();

    let hit = store.match_in("gen", &req).unwrap().unwrap();
    assert_eq!(hit.response, resp);
  }

  #[test]
  fn test_redirected_url_survives_storage() {
    let store = SqliteStore::in_memory().unwrap();
    let req = request("/static/pwa/offline.html");
    let resp = Response::ok(
      "http://localhost:5000/static/pwa/offline-v2.html",
      Some("text/html"),
      "offline",
    );
    store.put_all("gen", &[(req.clone(), resp.clone())]).unwrap();

    let hit = store.match_in("gen", &req).unwrap().unwrap();
    assert_eq!(hit.response.url, "http://localhost:5000/static/pwa/offline-v2.html");

    let memory = crate::cache::MemoryStore::new();
    memory.put_all("gen", &[(req.clone(), resp)]).unwrap();
    assert_eq!(memory.match_in("gen", &req).unwrap().unwrap().response, hit.response);
  }

  #[test]
  fn test_corrupted_body_is_a_miss() {
    let store = SqliteStore::in_memory().unwrap();
    store.put_all("gen", &[entry("/a.pdf", "original")]).unwrap();

    store
      .lock()
      .unwrap()
      .execute("UPDATE cache_entries SET body = X'00'", [])
      .unwrap();

    assert!(store.match_in("gen", &request("/a.pdf")).unwrap().is_none());
  }

  #[test]
  fn test_non_get_never_matches() {
    let store = SqliteStore::in_memory().unwrap();
    store.put_all("gen", &[entry("/a.pdf", "a")]).unwrap();

    let mut post = request("/a.pdf");
    post.method = Method::Post;
    assert!(store.match_request(&post).unwrap().is_none());
  }

  #[test]
  fn test_failed_put_all_writes_nothing() {
    let store = SqliteStore::in_memory().unwrap();
    let mut bad = entry("/b.pdf", "b");
    bad.0.method = Method::Post;

    assert!(store.put_all("gen", &[entry("/a.pdf", "a"), bad]).is_err());
    assert!(store.keys().unwrap().is_empty());
    assert!(store.match_request(&request("/a.pdf")).unwrap().is_none());
  }

  #[test]
  fn test_keys_in_creation_order_and_delete() {
    let store = SqliteStore::in_memory().unwrap();
    store.open("kc-scheme-v1").unwrap();
    store.put_all("kc-scheme-v3", &[entry("/a.pdf", "a")]).unwrap();
    store.open("kc-scheme-v1").unwrap();

    assert_eq!(store.keys().unwrap(), vec!["kc-scheme-v1", "kc-scheme-v3"]);

    assert!(store.delete("kc-scheme-v3").unwrap());
    assert!(!store.delete("kc-scheme-v3").unwrap());
    assert_eq!(store.keys().unwrap(), vec!["kc-scheme-v1"]);
    assert!(store.match_request(&request("/a.pdf")).unwrap().is_none());
  }

  #[test]
  fn test_summaries() {
    let store = SqliteStore::in_memory().unwrap();
    store.open("empty").unwrap();
    store
      .put_all("full", &[entry("/a.pdf", "aaa"), entry("/b.pdf", "bb")])
      .unwrap();

    let summaries = store.summaries().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].name, "empty");
    assert_eq!(summaries[0].entries, 0);
    assert_eq!(summaries[1].entries, 2);
    assert_eq!(summaries[1].bytes, 5);
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-03-01 12:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
