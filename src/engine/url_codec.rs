//! Mapping between real target URLs and their proxied form.
//!
//! A proxied URL is `<root><delimiter><absolute-target-url>`, e.g.
//! `https://proxy.example/-----https://www.example.com/a?b`. Anything that is
//! not an http(s) URL, or that already carries the prefix, is "internal" and
//! is never encoded again.

use lazy_static::lazy_static;
use std::collections::HashMap;
use url::form_urlencoded;
use url::Url;

/// Separates the proxy root from the embedded target URL.
pub const URL_DELIM: &str = "-----";

/// File name of the in-page helper script, relative to the root.
pub const HELPER_FILE: &str = "x.js";

const SEARCH_TEMPLATE: &str = "https://www.google.com/search?q=";

lazy_static! {
    static ref ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("google", "https://www.google.com/");
        m.insert("youtube", "https://www.youtube.com/");
        m.insert("github", "https://github.com/");
        m.insert("twitter", "https://twitter.com/");
        m.insert("facebook", "https://www.facebook.com/");
        m.insert("wiki", "https://www.wikipedia.org/");
        m.insert("wikipedia", "https://www.wikipedia.org/");
        m
    };
}

#[derive(Debug, Clone)]
pub struct UrlCodec {
    root: String,
    prefix: String,
}

impl UrlCodec {
    /// Creates a codec for a proxy served from `root` (a trailing `/` is added if missing).
    pub fn new(root: &str) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        let prefix = format!("{}{}", root, URL_DELIM);
        Self { root, prefix }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Origin of the proxy itself, with a trailing slash. This is what an
    /// origin-only referrer policy reduces the page referrer to.
    pub fn root_origin(&self) -> String {
        match Url::parse(&self.root) {
            Ok(u) => format!("{}/", u.origin().ascii_serialization()),
            Err(_) => self.root.clone(),
        }
    }

    pub fn helper_js(&self) -> String {
        format!("{}{}", self.root, HELPER_FILE)
    }

    /// Non-http(s) URLs and already-prefixed URLs are left alone.
    pub fn is_internal(&self, url: &str) -> bool {
        !is_http_scheme(url) || url.starts_with(&self.prefix)
    }

    /// Encodes an absolute URL into its proxied form. Idempotent; strings that
    /// do not parse as URLs are returned unchanged.
    pub fn encode(&self, url: &str) -> String {
        if self.is_internal(url) || Url::parse(url).is_err() {
            return url.to_string();
        }
        format!("{}{}", self.prefix, url)
    }

    pub fn encode_url(&self, url: &Url) -> String {
        self.encode(url.as_str())
    }

    /// Strips the proxy prefix, if present.
    pub fn decode(&self, url: &str) -> String {
        match url.strip_prefix(&self.prefix) {
            Some(target) => target.to_string(),
            None => url.to_string(),
        }
    }

    /// Returns true for URLs under the root that are not proxied targets
    /// (home page, helper script, assets).
    pub fn is_own_asset(&self, url: &str) -> bool {
        url.starts_with(&self.root) && !url.starts_with(&self.prefix)
    }

    /// Resolves `reference` against `base`. Malformed input yields `None`.
    pub fn resolve_relative(reference: &str, base: &Url) -> Option<Url> {
        base.join(reference).ok()
    }

    /// Turns what a user typed into the address box into a target URL:
    /// absolute URLs as-is, known aliases, bare host names over https, and
    /// anything else as a search query.
    pub fn from_user_input(input: &str) -> Option<String> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if is_http_scheme(input) {
            if let Ok(url) = Url::parse(input) {
                return Some(url.to_string());
            }
        }

        if let Some(alias) = ALIASES.get(input.to_ascii_lowercase().as_str()) {
            return Some(alias.to_string());
        }

        let looks_like_host = !input.contains(char::is_whitespace)
            && (input.contains('.') || input.starts_with("localhost"));
        if looks_like_host {
            if let Ok(url) = Url::parse(&format!("https://{}", input)) {
                if url.host_str().is_some() {
                    return Some(url.to_string());
                }
            }
        }

        let query: String = form_urlencoded::byte_serialize(input.as_bytes()).collect();
        Some(format!("{}{}", SEARCH_TEMPLATE, query))
    }
}

pub fn is_http_scheme(url: &str) -> bool {
    let lower = url.get(..6).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http:") || lower.starts_with("https:")
}

/// Removes the `#fragment` part.
pub fn strip_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(p) => &url[..p],
        None => url,
    }
}

/// Removes everything up to and including `://`.
pub fn strip_scheme(url: &str) -> &str {
    match url.find("://") {
        Some(p) => &url[p + 3..],
        None => url,
    }
}
