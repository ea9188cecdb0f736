//! Sticky route hints.
//!
//! After a cacheable `GET 200` the engine remembers which relay line served a
//! URL, together with the opaque routing info the relay asked to have echoed
//! back. Later fetches of the same URL reuse that line at tier 0. Entries are
//! a soft hint: failures to read or write them are logged and ignored.

use http::header::{CACHE_CONTROL, EXPIRES};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::engine::dates::parse_http_date;
use crate::engine::storage::{StoreHandle, StoreRecord, URL_CACHE_TABLE};
use crate::engine::url_codec::strip_fragment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlCacheEntry {
    pub url: String,
    /// Relay line that served the URL
    pub host: String,
    /// Opaque relay state, echoed as `--raw-info`
    pub routing_info: Option<String>,
    /// Unix milliseconds
    pub expires_at: i64,
}

pub struct UrlCache {
    store: StoreHandle,
}

impl UrlCache {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Unexpired entry for `url`. Expired entries are deleted on the way.
    pub async fn lookup(&self, url: &str, now: i64) -> Option<UrlCacheEntry> {
        let key = strip_fragment(url);
        let record = match self.store.get(URL_CACHE_TABLE, key).await {
            Ok(record) => record?,
            Err(e) => {
                log::warn!("url-cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let entry: UrlCacheEntry = match serde_json::from_value(record.value) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("url-cache record for {} unreadable: {}", key, e);
                return None;
            }
        };

        if entry.expires_at <= now {
            if let Err(e) = self.store.delete(URL_CACHE_TABLE, key).await {
                log::warn!("url-cache delete failed for {}: {}", key, e);
            }
            return None;
        }
        Some(entry)
    }

    /// Records the line that served `url` if `headers` make the response
    /// cacheable. Returns whether an entry was written.
    pub async fn remember(
        &self,
        url: &str,
        host: &str,
        routing_info: Option<&str>,
        headers: &HeaderMap,
        now: i64,
    ) -> bool {
        let Some(lifetime) = cache_lifetime(headers, now) else {
            return false;
        };

        let key = strip_fragment(url);
        let entry = UrlCacheEntry {
            url: key.to_string(),
            host: host.to_string(),
            routing_info: routing_info.map(str::to_string),
            expires_at: now.saturating_add(lifetime),
        };

        let value = match serde_json::to_value(&entry) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("url-cache entry for {} not serializable: {}", key, e);
                return false;
            }
        };
        match self.store.put(URL_CACHE_TABLE, StoreRecord::new(key, value)).await {
            Ok(()) => {
                log::debug!("url-cache: {} -> {} for {} ms", key, host, lifetime);
                true
            }
            Err(e) => {
                log::warn!("url-cache write failed for {}: {}", key, e);
                false
            }
        }
    }
}

/// Freshness lifetime in milliseconds, or `None` when the response must not
/// be remembered. `s-maxage` beats `max-age`, which beats `Expires`.
pub fn cache_lifetime(headers: &HeaderMap, now: i64) -> Option<i64> {
    let mut max_age = None;
    let mut s_maxage = None;

    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(value) = value.to_str() else { continue };
        for directive in value.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            let (name, arg) = match directive.split_once('=') {
                Some((n, a)) => (n.trim().to_string(), Some(a.trim().trim_matches('"').to_string())),
                None => (directive.clone(), None),
            };
            match name.as_str() {
                "no-store" | "no-cache" | "private" => return None,
                "max-age" => max_age = arg.and_then(|a| a.parse::<i64>().ok()),
                "s-maxage" => s_maxage = arg.and_then(|a| a.parse::<i64>().ok()),
                _ => {}
            }
        }
    }

    let lifetime = match s_maxage.or(max_age) {
        Some(secs) => secs.saturating_mul(1000),
        None => {
            let expires = headers.get(EXPIRES)?.to_str().ok()?;
            parse_http_date(expires)? - now
        }
    };
    (lifetime > 0).then_some(lifetime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::{InMemoryStore, KvStore};
    use http::HeaderValue;
    use std::sync::Arc;

    const NOW: i64 = 1_445_412_480_000;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.append(*k, HeaderValue::from_static(v));
        }
        h
    }

    #[test]
    fn lifetime_from_cache_control() {
        assert_eq!(cache_lifetime(&headers(&[("cache-control", "public, max-age=60")]), NOW), Some(60_000));
        assert_eq!(
            cache_lifetime(&headers(&[("cache-control", "max-age=60, s-maxage=600")]), NOW),
            Some(600_000)
        );
        assert_eq!(cache_lifetime(&headers(&[("cache-control", "max-age=0")]), NOW), None);
        assert_eq!(cache_lifetime(&headers(&[("cache-control", "no-store, max-age=60")]), NOW), None);
        assert_eq!(cache_lifetime(&headers(&[("cache-control", "private, max-age=60")]), NOW), None);
        assert_eq!(cache_lifetime(&HeaderMap::new(), NOW), None);
    }

    #[test]
    fn lifetime_from_expires() {
        let h = headers(&[("expires", "Wed, 21 Oct 2015 07:29:00 GMT")]);
        assert_eq!(cache_lifetime(&h, NOW), Some(60_000));

        let past = headers(&[("expires", "Wed, 21 Oct 2015 07:00:00 GMT")]);
        assert_eq!(cache_lifetime(&past, NOW), None);

        // max-age wins over Expires
        let both = headers(&[("expires", "Wed, 21 Oct 2015 07:29:00 GMT"), ("cache-control", "max-age=5")]);
        assert_eq!(cache_lifetime(&both, NOW), Some(5_000));
    }

    #[tokio::test]
    async fn remember_then_lookup_until_expiry() {
        let store = Arc::new(InMemoryStore::new());
        let cache = UrlCache::new(store.clone());
        let h = headers(&[("cache-control", "max-age=60")]);

        assert!(cache.remember("https://a.com/x.js#f", "r1.relay.net", Some("X"), &h, NOW).await);

        let hit = cache.lookup("https://a.com/x.js", NOW + 1_000).await.unwrap();
        assert_eq!(hit.host, "r1.relay.net");
        assert_eq!(hit.routing_info.as_deref(), Some("X"));

        assert!(cache.lookup("https://a.com/x.js", NOW + 60_000).await.is_none());
        assert_eq!(store.len(URL_CACHE_TABLE), 0);
    }

    #[tokio::test]
    async fn uncacheable_responses_are_not_written() {
        let store = Arc::new(InMemoryStore::new());
        let cache = UrlCache::new(store.clone());
        let h = headers(&[("cache-control", "no-cache")]);
        assert!(!cache.remember("https://a.com/", "r1", None, &h, NOW).await);
        assert!(store.get(URL_CACHE_TABLE, "https://a.com/").await.unwrap().is_none());
    }
}
