//! Registrable-domain reduction used for same-site comparisons.
//!
//! This is a heuristic for cookie and credential scoping, not a security
//! boundary. The built-in suffix set covers the common generic and country
//! suffixes; callers with a full public suffix list can supply their own.

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

const BUILTIN_SUFFIXES: &str = "\
com,net,org,edu,gov,mil,int,info,biz,io,co,me,tv,cc,app,dev,xyz,top,site,online,\
cn,com.cn,net.cn,org.cn,gov.cn,edu.cn,\
hk,com.hk,net.hk,org.hk,tw,com.tw,jp,co.jp,ne.jp,or.jp,kr,co.kr,\
sg,com.sg,uk,co.uk,org.uk,ac.uk,gov.uk,au,com.au,net.au,org.au,\
de,fr,it,es,nl,ru,com.ru,br,com.br,in,co.in,ca,us,eu,ch,se,no,pl,\
github.io,gitlab.io,herokuapp.com,appspot.com,blogspot.com,workers.dev,pages.dev,netlify.app,vercel.app";

lazy_static! {
    static ref BUILTIN: HashSet<String> = BUILTIN_SUFFIXES.split(',').map(str::to_string).collect();
}

pub struct TldResolver {
    suffixes: HashSet<String>,
    cache: RwLock<HashMap<String, String>>,
}

impl Default for TldResolver {
    fn default() -> Self {
        Self::new(BUILTIN.clone())
    }
}

impl TldResolver {
    pub fn new(suffixes: HashSet<String>) -> Self {
        Self {
            suffixes,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_public_suffix(&self, domain: &str) -> bool {
        self.suffixes.contains(domain)
    }

    /// Reduces `host` to its registrable domain (public suffix plus one label).
    ///
    /// IPv4 literals are returned unchanged. A host that is itself a public
    /// suffix is returned as-is; an unknown suffix is treated as a single label.
    pub fn registrable_domain(&self, host: &str) -> String {
        let host = host.to_ascii_lowercase();

        if let Some(hit) = self.cache.read().unwrap_or_else(|e| e.into_inner()).get(&host) {
            return hit.clone();
        }

        let ret = if is_ipv4(&host) {
            host.clone()
        } else {
            self.reduce(&host)
        };

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host, ret.clone());
        ret
    }

    /// True when both hosts share a registrable domain.
    pub fn same_site(&self, a: &str, b: &str) -> bool {
        self.registrable_domain(a) == self.registrable_domain(b)
    }

    fn reduce(&self, host: &str) -> String {
        if self.is_public_suffix(host) {
            return host.to_string();
        }

        // Walk "a.b.c" -> "b.c" -> "c"; the first hit is the longest public suffix
        let mut pos = 0;
        while let Some(dot) = host[pos..].find('.') {
            let next = pos + dot + 1;
            if self.is_public_suffix(&host[next..]) {
                return host[pos..].to_string();
            }
            pos = next;
        }

        // Unknown suffix: the last label acts as the suffix
        let mut labels = host.rsplitn(3, '.');
        match (labels.next(), labels.next()) {
            (Some(last), Some(second)) => format!("{}.{}", second, last),
            _ => host.to_string(),
        }
    }
}

/// Dotted-decimal check matching up to four numeric parts.
pub fn is_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    !s.is_empty()
        && parts.len() <= 4
        && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduces_to_suffix_plus_one_label() {
        let tld = TldResolver::default();
        assert_eq!(tld.registrable_domain("www.example.com"), "example.com");
        assert_eq!(tld.registrable_domain("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(tld.registrable_domain("example.com"), "example.com");
        assert_eq!(tld.registrable_domain("user.github.io"), "user.github.io");
        assert_eq!(tld.registrable_domain("WWW.Example.COM"), "example.com");
    }

    #[test]
    fn suffix_and_ip_hosts_are_their_own_domain() {
        let tld = TldResolver::default();
        assert_eq!(tld.registrable_domain("co.uk"), "co.uk");
        assert_eq!(tld.registrable_domain("192.168.1.10"), "192.168.1.10");
        assert_eq!(tld.registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn unknown_suffix_falls_back_to_last_label() {
        let tld = TldResolver::default();
        assert_eq!(tld.registrable_domain("a.b.internal"), "b.internal");
    }

    #[test]
    fn same_site_compares_registrable_domains() {
        let tld = TldResolver::default();
        assert!(tld.same_site("a.example.com", "b.example.com"));
        assert!(!tld.same_site("a.example.com", "example.org"));
    }

    #[test]
    fn ipv4_detection() {
        assert!(is_ipv4("127.0.0.1"));
        assert!(!is_ipv4("127.0.0.a"));
        assert!(!is_ipv4(""));
        assert!(!is_ipv4("1.2.3.4.5"));
    }
}
