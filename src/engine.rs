//! The forwarding core: configuration, URL addressing, routing, the relay
//! protocol, cookies, persistence, the content pipeline and the engine that
//! ties them together.

pub mod cdn;
pub mod config;
pub mod cookies;
pub mod dates;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod errors;
pub mod events;
pub mod forward;
pub mod page_wait;
pub mod pipeline;
pub mod protocol;
pub mod router;
pub mod storage;
pub mod tld;
pub mod url_cache;
pub mod url_codec;

pub use config::ProxyConfig;
pub use engine::{FetchOutcome, ProxyEngine};
pub use errors::ProxyError;
pub use events::{MessageBus, Outbound, PageMessage, Recipient, ServiceMessage};
pub use url_codec::UrlCodec;

/// Capacity of the page message bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;
