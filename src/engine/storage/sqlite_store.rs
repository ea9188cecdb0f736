use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, OpenFlags, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;

use crate::engine::storage::{KvStore, StoreRecord};

/// SQLite-based key/value store. Blocking calls run on tokio's blocking pool.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Creates a new SQLite store with the specified database file path.
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE |
                    OpenFlags::SQLITE_OPEN_CREATE |
                    OpenFlags::SQLITE_OPEN_URI
            )
            .with_init(|c| {
                c.busy_timeout(std::time::Duration::from_millis(500))?;
                c.pragma_update(None, "journal_mode", &"WAL")?;
                c.execute_batch(
                    "CREATE TABLE IF NOT EXISTS kv_store (
                        tbl TEXT NOT NULL,
                        key TEXT NOT NULL,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                        PRIMARY KEY(tbl, key)
                    );"
                )?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(8)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)?;

        Ok(Self { pool })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PooledConnection<SqliteConnectionManager>) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(conn)
        })
        .await?
    }
}

impl KvStore for SqliteStore {
    fn get<'a>(&'a self, table: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<StoreRecord>>> {
        let (tbl, k) = (table.to_string(), key.to_string());
        async move {
            let raw = self
                .blocking(move |conn| {
                    Ok(conn
                        .query_row(
                            "SELECT value FROM kv_store WHERE tbl=?1 AND key=?2",
                            params![tbl, k],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?)
                })
                .await?;

            match raw {
                Some(text) => Ok(Some(StoreRecord::new(key, serde_json::from_str(&text)?))),
                None => Ok(None),
            }
        }
        .boxed()
    }

    fn put<'a>(&'a self, table: &'a str, record: StoreRecord) -> BoxFuture<'a, Result<()>> {
        let tbl = table.to_string();
        async move {
            let value = serde_json::to_string(&record.value)?;
            self.blocking(move |conn| {
                conn.execute(
                    "INSERT INTO kv_store(tbl,key,value) VALUES (?1,?2,?3)
                     ON CONFLICT(tbl,key) DO UPDATE
                     SET value=excluded.value, updated_at=strftime('%s','now')",
                    params![tbl, record.key, value],
                )?;
                Ok(())
            })
            .await
        }
        .boxed()
    }

    fn delete<'a>(&'a self, table: &'a str, key: &'a str) -> BoxFuture<'a, Result<()>> {
        let (tbl, k) = (table.to_string(), key.to_string());
        async move {
            self.blocking(move |conn| {
                conn.execute("DELETE FROM kv_store WHERE tbl=?1 AND key=?2", params![tbl, k])?;
                Ok(())
            })
            .await
        }
        .boxed()
    }

    fn enumerate<'a>(
        &'a self,
        table: &'a str,
        visitor: &'a mut (dyn FnMut(StoreRecord) -> bool + Send),
    ) -> BoxFuture<'a, Result<()>> {
        let tbl = table.to_string();
        async move {
            let rows: Vec<(String, String)> = self
                .blocking(move |conn| {
                    let mut stmt = conn.prepare("SELECT key, value FROM kv_store WHERE tbl=?1 ORDER BY key")?;
                    let rows = stmt
                        .query_map(params![tbl], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;

            for (key, text) in rows {
                let value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        log::warn!("kv_store: skipping unreadable record {}/{}: {}", table, key, e);
                        continue;
                    }
                };
                if !visitor(StoreRecord::new(key, value)) {
                    break;
                }
            }
            Ok(())
        }
        .boxed()
    }
}
