//! Cookie core type and `Set-Cookie` parsing.
//!
//! A [`Cookie`] is identified by [`Cookie::id`]: `(secure ? ";" : "") + name +
//! ";" + domain + path`. Two `Set-Cookie` instructions producing the same id
//! address the same record.
//!
//! Parsing follows the browser rules that matter for scoping:
//! - `Domain` must be the request host or one of its superdomains (leading dot
//!   ignored). Without it the cookie is *host-only* and bound to the request host.
//! - `Path` must be a prefix of the request path on a `/` boundary. Without it
//!   the request path is used.
//! - `Secure` cookies are only accepted from https URLs.
//! - `__Secure-` names require `Secure` over https; `__Host-` names also require
//!   no `Domain` and `Path=/`.
//! - `Max-Age` overrides `Expires`.
//!
//! SameSite is recorded but not enforced anywhere.

use crate::engine::dates::parse_http_date;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name (case-sensitive, may be empty).
    pub name: String,

    /// Raw cookie value (not URL-decoded).
    pub value: String,

    /// Domain the cookie is bound to, lowercased, without leading dot.
    pub domain: String,

    /// True when the cookie had no `Domain` attribute; it then only matches
    /// `domain` exactly.
    pub host_only: bool,

    /// Path scoping (e.g. `"/"`).
    pub path: String,

    /// Expiry in unix milliseconds. Session cookies have `None`.
    pub expires: Option<i64>,

    /// Set once the cookie is known to be expired; it is evicted lazily.
    #[serde(default)]
    pub is_expired: bool,

    /// If `true`, cookie is sent only over HTTPS.
    pub secure: bool,

    /// If `true`, cookie is hidden from page scripts.
    pub http_only: bool,

    /// Raw SameSite attribute (`"Strict"`, `"Lax"`, `"None"` or empty).
    #[serde(default)]
    pub same_site: String,
}

impl Cookie {
    /// Identity key; equal ids overwrite each other.
    pub fn id(&self) -> String {
        format!(
            "{}{};{}{}",
            if self.secure { ";" } else { "" },
            self.name,
            self.domain,
            self.path
        )
    }

    /// Session cookies live in memory only.
    pub fn is_session(&self) -> bool {
        self.expires.is_none()
    }

    pub fn expired_at(&self, now: i64) -> bool {
        self.is_expired || self.expires.is_some_and(|t| t <= now)
    }

    /// The `name=value` pair as sent in a `Cookie` header (just the value for nameless cookies).
    pub fn header_pair(&self) -> String {
        if self.name.is_empty() {
            self.value.clone()
        } else {
            format!("{}={}", self.name, self.value)
        }
    }

    /// Parses one `Set-Cookie` line received for `url` at time `now` (unix ms).
    ///
    /// Returns `None` when the cookie violates a scoping or prefix rule.
    pub fn parse(line: &str, url: &Url, now: i64) -> Option<Cookie> {
        let mut cookie = Cookie {
            name: String::new(),
            value: String::new(),
            domain: String::new(),
            host_only: false,
            path: String::new(),
            expires: None,
            is_expired: false,
            secure: false,
            http_only: false,
            same_site: String::new(),
        };
        let mut max_age_seen = false;

        for (i, segment) in line.split(';').enumerate() {
            let segment = segment.trim();
            let (key, val) = match segment.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                // "s; secure" -> first segment is a nameless value, later ones are flags
                None if i == 0 => ("", segment),
                None => (segment, ""),
            };

            if i == 0 {
                cookie.name = key.to_string();
                cookie.value = val.to_string();
                continue;
            }

            match key.to_ascii_lowercase().as_str() {
                "expires" => {
                    if !max_age_seen {
                        if let Some(t) = parse_http_date(val) {
                            cookie.expires = Some(t);
                        }
                    }
                }
                "max-age" => {
                    if let Ok(secs) = val.parse::<i64>() {
                        cookie.expires = Some(now.saturating_add(secs.saturating_mul(1000)));
                        max_age_seen = true;
                    }
                }
                "domain" => cookie.domain = val.trim_start_matches('.').to_ascii_lowercase(),
                "path" => cookie.path = val.to_string(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = val.to_string(),
                _ => {}
            }
        }

        if cookie.expired_at(now) {
            cookie.is_expired = true;
        }

        let is_https = url.scheme() == "https";

        if cookie.name.starts_with("__Secure-") && !(is_https && cookie.secure) {
            log::debug!("cookie rejected: {} requires secure over https", cookie.name);
            return None;
        }
        if cookie.name.starts_with("__Host-")
            && !(is_https && cookie.secure && cookie.domain.is_empty() && cookie.path == "/")
        {
            log::debug!("cookie rejected: {} violates __Host- rules", cookie.name);
            return None;
        }
        if cookie.secure && !is_https {
            log::debug!("cookie rejected: secure cookie {} over {}", cookie.name, url.scheme());
            return None;
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if cookie.domain.is_empty() {
            cookie.domain = host;
            cookie.host_only = true;
        } else if !is_sub_domain(&cookie.domain, &host) {
            log::warn!("invalid cookie domain! `{}` is not a superdomain of `{}`", cookie.domain, host);
            return None;
        }

        let path = url.path();
        if cookie.path.is_empty() {
            cookie.path = path.to_string();
        } else if !is_sub_path(&cookie.path, path) {
            log::warn!("invalid cookie path! `{}` is not a prefix of `{}`", cookie.path, path);
            return None;
        }

        Some(cookie)
    }
}

/// `host` equals `domain` or ends with `"." + domain`. Both must be lowercase.
pub(crate) fn is_sub_domain(domain: &str, host: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

/// `url_path` equals `cookie_path` or lies below it on a `/` boundary.
pub(crate) fn is_sub_path(cookie_path: &str, url_path: &str) -> bool {
    if url_path == cookie_path {
        return true;
    }
    if cookie_path.ends_with('/') {
        url_path.starts_with(cookie_path)
    } else {
        url_path.len() > cookie_path.len()
            && url_path.starts_with(cookie_path)
            && url_path.as_bytes()[cookie_path.len()] == b'/'
    }
}
