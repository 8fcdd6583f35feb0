//! Generation-versioned response cache.
//!
//! This module provides the storage side of offline support:
//! - Stores responses per named cache generation, keyed by request URL
//! - Writes a generation's assets all-or-nothing
//! - Implements the cache-first and network-first retrieval strategies

mod layer;
mod memory;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use memory::MemoryStore;
pub use storage::SqliteStore;
pub use traits::{
  CacheStore, FetchResponse, GenerationSummary, Method, Request, Response, ResponseSource,
};
