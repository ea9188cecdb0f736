//! Messages exchanged with proxied pages.
//!
//! Pages talk to the engine through a message channel, never through shared
//! memory. [`PageMessage`] is what a page sends; [`ServiceMessage`] is what
//! the engine publishes on the [`MessageBus`], addressed by a [`Recipient`].
//! The host delivers each [`Outbound`] to the matching pages.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::config::ProxyConfig;
use crate::engine::cookies::Cookie;

/// Host-assigned identifier of a page (window client).
pub type ClientId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "val", rename_all = "snake_case")]
pub enum PageMessage {
    /// Cookie written by page script
    CookiePush(Cookie),
    /// Page asks for every script-visible cookie
    CookiePull,
    /// Page with this id started booting
    InitBegin(u64),
    /// Page with this id finished booting
    InitEnd(u64),
    ConfigGet,
    ConfigSet(ProxyConfig),
    ReadyCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "val", rename_all = "snake_case")]
pub enum ServiceMessage {
    CookiePush(Vec<Cookie>),
    Config(ProxyConfig),
    ConfigChanged(ProxyConfig),
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    All,
    AllExcept(ClientId),
    Only(ClientId),
}

impl Recipient {
    pub fn includes(&self, client: &str) -> bool {
        match self {
            Recipient::All => true,
            Recipient::AllExcept(id) => id != client,
            Recipient::Only(id) => id == client,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub message: ServiceMessage,
}

/// A handle for receiving engine messages.
pub type Subscription = broadcast::Receiver<Outbound>;

#[derive(Debug, Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<Outbound>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }

    pub fn publish(&self, to: Recipient, message: ServiceMessage) {
        // Sending only fails when nobody listens
        let _ = self.tx.send(Outbound { to, message });
    }
}
