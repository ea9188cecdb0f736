use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};

use crate::engine::storage::{KvStore, StoreRecord};

/// In-memory store (no persistence). Used when the host does not provide a database.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .map_or(0, |t| t.len())
    }
}

impl KvStore for InMemoryStore {
    fn get<'a>(&'a self, table: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<StoreRecord>>> {
        async move {
            let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
            Ok(tables
                .get(table)
                .and_then(|t| t.get(key))
                .map(|v| StoreRecord::new(key, v.clone())))
        }
        .boxed()
    }

    fn put<'a>(&'a self, table: &'a str, record: StoreRecord) -> BoxFuture<'a, Result<()>> {
        async move {
            self.tables
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(table.to_string())
                .or_default()
                .insert(record.key, record.value);
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, table: &'a str, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Some(t) = self.tables.lock().unwrap_or_else(|e| e.into_inner()).get_mut(table) {
                t.remove(key);
            }
            Ok(())
        }
        .boxed()
    }

    fn enumerate<'a>(
        &'a self,
        table: &'a str,
        visitor: &'a mut (dyn FnMut(StoreRecord) -> bool + Send),
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            // Snapshot first so the visitor never runs under the lock
            let records: Vec<StoreRecord> = {
                let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
                tables
                    .get(table)
                    .map(|t| t.iter().map(|(k, v)| StoreRecord::new(k.clone(), v.clone())).collect())
                    .unwrap_or_default()
            };

            for record in records {
                if !visitor(record) {
                    break;
                }
            }
            Ok(())
        }
        .boxed()
    }
}
