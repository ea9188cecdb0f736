//! Rendezvous between an HTML response and the page it boots.
//!
//! The pipeline registers a page id before streaming a document, injects the
//! id into the document, and holds back the upstream body until the page
//! reports in. The page sends two signals:
//!
//! - *init begin*: the page is booting. The timeout is disarmed but the wait
//!   continues.
//! - *init end*: the page finished booting. The wait resolves.
//!
//! Without *init begin* the wait gives up after the timeout, because some
//! navigations never run script (view-source, script disabled).
//!
//! A [`PageTicket`] owns its registry entry: dropping the ticket, waited on
//! or not, removes the entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

struct PendingPageWait {
    done: oneshot::Sender<()>,
    begun: Option<oneshot::Sender<()>>,
}

/// A registered page, to be passed to [`PageWaitRegistry::wait`].
pub struct PageTicket {
    pub id: u64,
    registry: Arc<PageWaitRegistry>,
    done: oneshot::Receiver<()>,
    begun: oneshot::Receiver<()>,
}

impl std::fmt::Debug for PageTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTicket").field("id", &self.id).finish()
    }
}

impl Drop for PageTicket {
    fn drop(&mut self) {
        if self.registry.lock().remove(&self.id).is_some() {
            log::debug!("Page {} dropped before it reported in", self.id);
        }
    }
}

#[derive(Default)]
pub struct PageWaitRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingPageWait>>,
}

impl PageWaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>) -> PageTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (done_tx, done_rx) = oneshot::channel();
        let (begun_tx, begun_rx) = oneshot::channel();

        self.lock().insert(
            id,
            PendingPageWait {
                done: done_tx,
                begun: Some(begun_tx),
            },
        );

        PageTicket {
            id,
            registry: self.clone(),
            done: done_rx,
            begun: begun_rx,
        }
    }

    /// Delivers a page signal. Returns false for unknown (finished or timed out) ids.
    pub fn notify(&self, id: u64, is_done: bool) -> bool {
        let mut pending = self.lock();
        if is_done {
            match pending.remove(&id) {
                Some(wait) => {
                    let _ = wait.done.send(());
                    true
                }
                None => {
                    log::warn!("Unknown page id: {}", id);
                    false
                }
            }
        } else {
            match pending.get_mut(&id) {
                Some(wait) => {
                    if let Some(begun) = wait.begun.take() {
                        let _ = begun.send(());
                    }
                    true
                }
                None => {
                    log::warn!("Unknown page id: {}", id);
                    false
                }
            }
        }
    }

    /// Waits for the page to finish booting. Returns false on timeout.
    ///
    /// The entry is gone once this returns, and also if the future is dropped
    /// half way.
    pub async fn wait(&self, mut ticket: PageTicket, timeout: Duration) -> bool {
        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);
        let mut armed = true;

        loop {
            tokio::select! {
                r = &mut ticket.done => return r.is_ok(),
                _ = &mut ticket.begun, if armed => armed = false,
                _ = &mut sleep, if armed => return false,
            }
        }
    }

    /// Pages still being waited for.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingPageWait>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
