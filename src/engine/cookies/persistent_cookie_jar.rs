use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::cookies::{Cookie, CookieJar, CookieJarHandle};
use crate::engine::storage::{StoreHandle, StoreRecord, COOKIE_TABLE};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// A [`CookieJar`] paired with a durable store.
///
/// Reads and writes go to the in-memory jar. Changes reach the store when
/// [`flush`](PersistentCookieJar::flush) runs, usually from the background task
/// started by [`spawn_flusher`](PersistentCookieJar::spawn_flusher). Session
/// cookies never reach the store.
pub struct PersistentCookieJar {
    jar: CookieJarHandle,
    store: StoreHandle,
}

impl PersistentCookieJar {
    pub fn new(jar: CookieJarHandle, store: StoreHandle) -> Self {
        Self { jar, store }
    }

    pub fn with_store(store: StoreHandle) -> Self {
        Self::new(CookieJar::new().into_handle(), store)
    }

    /// Shared handle to the in-memory jar.
    pub fn jar(&self) -> CookieJarHandle {
        self.jar.clone()
    }

    /// Reads the persisted cookies into the jar. Records that expired while the
    /// engine was down are deleted from the store instead.
    pub async fn load(&self, now: i64) -> Result<usize> {
        let mut live = Vec::new();
        let mut stale = Vec::new();

        let mut visitor = |record: StoreRecord| {
            match serde_json::from_value::<Cookie>(record.value) {
                Ok(cookie) if !cookie.expired_at(now) => live.push(cookie),
                Ok(_) => stale.push(record.key),
                Err(e) => {
                    log::warn!("Dropping unreadable cookie record {}: {}", record.key, e);
                    stale.push(record.key);
                }
            }
            true
        };
        self.store.enumerate(COOKIE_TABLE, &mut visitor).await?;

        for key in &stale {
            self.store.delete(COOKIE_TABLE, key).await?;
        }

        let loaded = live.len();
        {
            let mut jar = self.jar.write().unwrap_or_else(|e| e.into_inner());
            for cookie in live {
                jar.restore(cookie);
            }
        }

        log::debug!("Loaded {} cookies ({} expired records removed)", loaded, stale.len());
        Ok(loaded)
    }

    /// Writes every change made since the last flush.
    ///
    /// On a store error the failing change and all the ones after it stay
    /// dirty for the next flush.
    pub async fn flush(&self, now: i64) -> Result<()> {
        let changes = {
            let mut jar = self.jar.write().unwrap_or_else(|e| e.into_inner());
            jar.take_dirty()
        };
        if changes.is_empty() {
            return Ok(());
        }

        let mut changes = changes.into_iter();
        while let Some((id, current)) = changes.next() {
            if let Err(e) = self.write_change(&id, current, now).await {
                let unwritten: Vec<String> = std::iter::once(id).chain(changes.map(|(id, _)| id)).collect();
                log::debug!("Cookie flush stopped, {} changes kept for retry", unwritten.len());
                {
                    let mut jar = self.jar.write().unwrap_or_else(|e| e.into_inner());
                    jar.mark_dirty(unwritten);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn write_change(&self, id: &str, current: Option<Cookie>, now: i64) -> Result<()> {
        match current {
            Some(cookie) if cookie.expired_at(now) => self.store.delete(COOKIE_TABLE, id).await,
            // A persistent cookie may have been replaced by a session one
            Some(cookie) if cookie.is_session() => self.store.delete(COOKIE_TABLE, id).await,
            Some(cookie) => {
                let value = serde_json::to_value(&cookie)?;
                self.store.put(COOKIE_TABLE, StoreRecord::new(id, value)).await
            }
            None => self.store.delete(COOKIE_TABLE, id).await,
        }
    }

    /// Stores a cookie written by page script (`document.cookie`).
    pub fn set_from_page(&self, cookie: Cookie) -> Option<Cookie> {
        // Scripts cannot touch HttpOnly cookies
        if cookie.http_only {
            return None;
        }
        let mut jar = self.jar.write().unwrap_or_else(|e| e.into_inner());
        jar.set(cookie.clone());
        Some(cookie)
    }

    /// Non-HttpOnly cookies, as pushed to newly opened pages.
    pub fn all_visible(&self) -> Vec<Cookie> {
        let jar = self.jar.read().unwrap_or_else(|e| e.into_inner());
        jar.all_visible()
    }

    /// Starts a task that flushes every `interval` until `cancel` fires, then
    /// flushes a last time. Intervals under a millisecond are raised to one.
    pub fn spawn_flusher(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = interval.max(MIN_FLUSH_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush(crate::engine::dates::now_millis()).await {
                            log::warn!("Cookie flush failed: {}", e);
                        }
                    }
                }
            }

            if let Err(e) = self.flush(crate::engine::dates::now_millis()).await {
                log::warn!("Final cookie flush failed: {}", e);
            }
            log::debug!("Cookie flusher stopped");
        })
    }
}
