//! Persistence collaborator.
//!
//! The engine keeps its durable state (cookies, URL-cache hints) in a plain
//! asynchronous key/value store organised in named tables. Every call is
//! independent; no multi-key transactions are required.
//!
//! # Available backends
//!
//! - [`InMemoryStore`]: no persistence, used for tests and private sessions.
//! - [`SqliteStore`]: SQLite-backed store (feature `sqlite_store`).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tunnel_proxy::storage::{InMemoryStore, KvStore, StoreRecord, COOKIE_TABLE};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! store.put(COOKIE_TABLE, StoreRecord::new("id", serde_json::json!({"v": 1}))).await?;
//! assert!(store.get(COOKIE_TABLE, "id").await?.is_some());
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// In-memory store module.
pub mod in_memory;
/// SQLite-backed store module.
#[cfg(feature = "sqlite_store")]
pub mod sqlite_store;

pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite_store")]
pub use sqlite_store::SqliteStore;

/// Table holding persisted (non-session) cookies, keyed by cookie id.
pub const COOKIE_TABLE: &str = "cookie";
/// Table holding sticky relay assignments, keyed by target URL.
pub const URL_CACHE_TABLE: &str = "url-cache";

/// A handle to a type-erased store.
pub type StoreHandle = Arc<dyn KvStore>;

/// One record of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub key: String,
    pub value: serde_json::Value,
}

impl StoreRecord {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Object-safe asynchronous key/value store.
pub trait KvStore: Send + Sync {
    /// Retrieves the record stored under `key`, or `None` if not found.
    fn get<'a>(&'a self, table: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<StoreRecord>>>;

    /// Inserts or replaces the record with the same key.
    fn put<'a>(&'a self, table: &'a str, record: StoreRecord) -> BoxFuture<'a, Result<()>>;

    /// Removes the record stored under `key`. Removing a missing key is not an error.
    fn delete<'a>(&'a self, table: &'a str, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Visits every record of `table`. Enumeration stops early when the visitor returns `false`.
    fn enumerate<'a>(
        &'a self,
        table: &'a str,
        visitor: &'a mut (dyn FnMut(StoreRecord) -> bool + Send),
    ) -> BoxFuture<'a, Result<()>>;
}
