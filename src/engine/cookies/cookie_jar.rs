//! In-memory cookie jar indexed by a domain trie.
//!
//! The jar owns every [`Cookie`] in an id map and indexes ids in a
//! [`CookieTrieNode`]. Lookups walk the trie from the top-level label of the
//! request host down to its most specific label, which yields every cookie
//! whose domain is the host or one of its superdomains.
//!
//! ## Notes & limitations
//! - SameSite is **not** enforced.
//! - Expired cookies are evicted lazily, when a query runs into them.
//! - Mutations record the cookie id in a dirty set, drained by
//!   [`PersistentCookieJar`](super::PersistentCookieJar).
//! - This type is **not** internally synchronized. Share it as a
//!   [`CookieJarHandle`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use url::Url;

use crate::engine::cookies::cookies::is_sub_path;
use crate::engine::cookies::{Cookie, CookieTrieNode};
use crate::engine::tld::TldResolver;
use crate::net::CredentialsMode;

/// A handle to a shared cookie jar. Take the write lock for queries too, they
/// may evict expired cookies.
pub type CookieJarHandle = Arc<RwLock<CookieJar>>;

#[derive(Debug, Default)]
pub struct CookieJar {
    by_id: HashMap<String, Cookie>,
    root: CookieTrieNode,
    dirty: HashSet<String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_handle(self) -> CookieJarHandle {
        Arc::new(RwLock::new(self))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Cookie> {
        self.by_id.get(id)
    }

    /// Upserts `cookie` by id and marks it dirty. An expired cookie deletes the
    /// record with the same id.
    pub fn set(&mut self, cookie: Cookie) {
        let id = cookie.id();
        self.dirty.insert(id.clone());
        self.upsert(id, cookie);
    }

    /// Inserts a cookie read back from the store without marking it dirty.
    pub(crate) fn restore(&mut self, cookie: Cookie) {
        let id = cookie.id();
        self.upsert(id, cookie);
    }

    fn upsert(&mut self, id: String, cookie: Cookie) {
        if cookie.is_expired {
            if self.by_id.remove(&id).is_some() {
                self.root.remove(&cookie.domain, &id);
            }
            return;
        }

        match self.by_id.get_mut(&id) {
            // Existing ids are updated in place, the trie already points at them
            Some(existing) => *existing = cookie,
            None => {
                self.root.insert(&cookie.domain, id.clone());
                self.by_id.insert(id, cookie);
            }
        }
    }

    /// Parses and stores the `Set-Cookie` lines of a response for `url`.
    /// Returns the accepted cookies; rejected lines are dropped silently.
    ///
    /// Cookies whose `Domain` is a public suffix are refused.
    pub fn store_response_cookies(
        &mut self,
        url: &Url,
        lines: &[String],
        tld: &TldResolver,
        now: i64,
    ) -> Vec<Cookie> {
        let mut accepted = Vec::new();
        for line in lines {
            let Some(cookie) = Cookie::parse(line, url, now) else {
                continue;
            };
            if !cookie.host_only && tld.is_public_suffix(&cookie.domain) {
                log::warn!("cookie rejected: domain `{}` is a public suffix", cookie.domain);
                continue;
            }
            self.set(cookie.clone());
            accepted.push(cookie);
        }
        accepted
    }

    /// Builds the `Cookie` header value for `url`. Broader domains come first.
    pub fn query(&mut self, url: &Url, now: i64) -> String {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let path = url.path();
        let is_https = url.scheme() == "https";

        let mut pairs = Vec::new();
        let mut evict = Vec::new();

        for (id, full_match) in self.root.collect(&host) {
            let Some(cookie) = self.by_id.get_mut(&id) else {
                continue;
            };

            if cookie.expired_at(now) {
                cookie.is_expired = true;
                evict.push(id);
                continue;
            }
            if cookie.secure && !is_https {
                continue;
            }
            // Host-only cookies need the complete domain
            if cookie.host_only && !full_match {
                continue;
            }
            if !is_sub_path(&cookie.path, path) {
                continue;
            }
            pairs.push(cookie.header_pair());
        }

        for id in evict {
            if let Some(cookie) = self.by_id.remove(&id) {
                self.root.remove(&cookie.domain, &id);
                self.dirty.insert(id);
            }
        }

        pairs.join("; ")
    }

    /// Cookie header for a request made by a page at `client` to `target`,
    /// honoring the request credentials mode.
    pub fn credentials_for(
        &mut self,
        target: &Url,
        client: &Url,
        mode: CredentialsMode,
        tld: &TldResolver,
        now: i64,
    ) -> Option<String> {
        match mode {
            CredentialsMode::Omit => return None,
            CredentialsMode::SameOrigin => {
                let target_host = target.host_str().unwrap_or_default();
                let client_host = client.host_str().unwrap_or_default();
                if !tld.same_site(target_host, client_host) {
                    return None;
                }
            }
            CredentialsMode::Include => {}
        }

        let header = self.query(target, now);
        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }

    /// All cookies visible to page scripts.
    pub fn all_visible(&self) -> Vec<Cookie> {
        self.by_id.values().filter(|c| !c.http_only).cloned().collect()
    }

    /// Drains the dirty set, pairing each id with its current record (`None` once deleted).
    pub(crate) fn take_dirty(&mut self) -> Vec<(String, Option<Cookie>)> {
        self.dirty
            .drain()
            .map(|id| {
                let current = self.by_id.get(&id).cloned();
                (id, current)
            })
            .collect()
    }

    /// Puts ids back into the dirty set, for changes a flush could not write.
    pub(crate) fn mark_dirty(&mut self, ids: impl IntoIterator<Item = String>) {
        self.dirty.extend(ids);
    }

    /// Removes every cookie; all of them become dirty so the store follows.
    pub fn clear(&mut self) {
        self.dirty.extend(self.by_id.keys().cloned());
        self.by_id.clear();
        self.root.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn jar_with(lines: &[(&str, &str)]) -> CookieJar {
        let mut jar = CookieJar::new();
        for (line, url) in lines {
            let c = Cookie::parse(line, &u(url), NOW).expect("cookie accepted");
            jar.set(c);
        }
        jar
    }

    #[test]
    fn domain_cookie_visible_to_subdomains_only() {
        let mut jar = jar_with(&[("a=1; Domain=example.com; Path=/", "https://example.com/")]);

        assert_eq!(jar.query(&u("https://a.example.com/x"), NOW), "a=1");
        assert_eq!(jar.query(&u("https://example.com/"), NOW), "a=1");
        assert_eq!(jar.query(&u("https://example.org/"), NOW), "");
    }

    #[test]
    fn host_only_cookie_needs_exact_host() {
        let mut jar = jar_with(&[("h=1; Path=/", "https://a.example.com/")]);

        assert_eq!(jar.query(&u("https://a.example.com/"), NOW), "h=1");
        assert_eq!(jar.query(&u("https://b.example.com/"), NOW), "");
        assert_eq!(jar.query(&u("https://x.a.example.com/"), NOW), "");
    }

    #[test]
    fn broader_scope_first() {
        let mut jar = jar_with(&[
            ("leaf=2; Path=/", "https://www.example.com/"),
            ("root=1; Domain=example.com; Path=/", "https://www.example.com/"),
        ]);
        assert_eq!(jar.query(&u("https://www.example.com/"), NOW), "root=1; leaf=2");
    }

    #[test]
    fn secure_and_path_filters() {
        let mut jar = jar_with(&[
            ("s=1; Secure; Path=/", "https://a.com/"),
            ("p=2; Path=/docs", "https://a.com/docs"),
        ]);

        assert_eq!(jar.query(&u("http://a.com/"), NOW), "");
        assert_eq!(jar.query(&u("https://a.com/"), NOW), "s=1");
        assert_eq!(jar.query(&u("https://a.com/docs/x"), NOW), "s=1; p=2");
        assert_eq!(jar.query(&u("https://a.com/docsx"), NOW), "s=1");
    }

    #[test]
    fn same_id_overwrites_in_place() {
        let mut jar = jar_with(&[("a=1; Path=/", "https://a.com/"), ("a=2; Path=/", "https://a.com/")]);
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.query(&u("https://a.com/"), NOW), "a=2");
    }

    #[test]
    fn expired_instruction_deletes_existing() {
        let mut jar = jar_with(&[("a=1; Path=/", "https://a.com/")]);
        let gone = Cookie::parse("a=; Path=/; Max-Age=0", &u("https://a.com/"), NOW).unwrap();
        jar.set(gone);
        assert!(jar.is_empty());
        assert_eq!(jar.query(&u("https://a.com/"), NOW), "");
    }

    #[test]
    fn expiry_is_evicted_lazily_on_query() {
        let mut jar = jar_with(&[("a=1; Path=/; Max-Age=10", "https://a.com/")]);
        jar.take_dirty();

        assert_eq!(jar.query(&u("https://a.com/"), NOW + 5_000), "a=1");
        assert_eq!(jar.query(&u("https://a.com/"), NOW + 10_000), "");
        assert!(jar.is_empty());

        let dirty = jar.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].1.is_none());
    }

    #[test]
    fn credentials_modes() {
        let tld = TldResolver::default();
        let mut jar = jar_with(&[("a=1; Domain=example.com; Path=/", "https://www.example.com/")]);
        let target = u("https://api.example.com/");

        assert_eq!(
            jar.credentials_for(&target, &u("https://other.org/"), CredentialsMode::Omit, &tld, NOW),
            None
        );
        assert_eq!(
            jar.credentials_for(&target, &u("https://other.org/"), CredentialsMode::SameOrigin, &tld, NOW),
            None
        );
        assert_eq!(
            jar.credentials_for(&target, &u("https://www.example.com/"), CredentialsMode::SameOrigin, &tld, NOW)
                .as_deref(),
            Some("a=1")
        );
        assert_eq!(
            jar.credentials_for(&target, &u("https://other.org/"), CredentialsMode::Include, &tld, NOW)
                .as_deref(),
            Some("a=1")
        );
    }

    #[test]
    fn store_response_cookies_reports_accepted_only() {
        let mut jar = CookieJar::new();
        let lines = vec!["a=1".to_string(), "b=2; Domain=evil.com".to_string()];
        let accepted = jar.store_response_cookies(&u("https://a.com/"), &lines, &TldResolver::default(), NOW);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].name, "a");
    }

    #[test]
    fn public_suffix_domain_is_refused() {
        let mut jar = CookieJar::new();
        let lines = vec!["a=1; Domain=co.uk; Path=/".to_string(), "b=2; Domain=shop.co.uk; Path=/".to_string()];
        let accepted = jar.store_response_cookies(&u("https://www.shop.co.uk/"), &lines, &TldResolver::default(), NOW);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].name, "b");
    }

    #[test]
    fn all_visible_hides_http_only() {
        let jar = jar_with(&[("a=1; Path=/", "https://a.com/"), ("b=2; Path=/; HttpOnly", "https://a.com/")]);
        let visible = jar.all_visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "a");
    }
}
