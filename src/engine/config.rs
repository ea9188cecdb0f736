//! Proxy configuration.
//!
//! [`ProxyConfig`] mirrors the relay configuration document served next to the
//! proxy's home page (node table, default/acceleration node, direct hosts,
//! static boost) and carries the engine tunables. Every field has a default, so
//! a partial JSON document is accepted.

use crate::engine::errors::ProxyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Protocol version announced to relays in every packed request.
pub const DEFAULT_JS_VER: &str = "51";

/// One relay node: a labelled set of lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human readable name, shown in the node picker
    pub label: String,
    /// Hidden nodes (e.g. acceleration nodes) are not offered for manual selection
    pub hidden: bool,
    /// Lines of this node; load is spread over them by weight
    pub lines: Vec<LineConfig>,
}

/// A relay line, either a bare `host[:port]` (weight 1) or a weighted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LineConfig {
    Host(String),
    Weighted { host: String, weight: f64 },
}

impl LineConfig {
    pub fn host(&self) -> &str {
        match self {
            LineConfig::Host(host) => host,
            LineConfig::Weighted { host, .. } => host,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            LineConfig::Host(_) => 1.0,
            LineConfig::Weighted { weight, .. } => *weight,
        }
    }
}

/// Static-resource acceleration through a CDN mirror.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticBoost {
    pub enable: bool,
    /// Latest published manifest version
    pub ver: u32,
    /// Base URL of the mirror; `<base><ver>/full` is the manifest
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Version of this configuration document
    pub ver: String,
    /// Relay nodes by id
    pub node_map: BTreeMap<String, NodeConfig>,
    /// Node used for tier 0 and tier 1 dispatch
    pub node_default: String,
    /// Low-cost node used for tier 2 dispatch
    pub node_acc: String,
    /// Hosts that answer CORS requests themselves and can be fetched directly
    pub direct_hosts: Vec<String>,
    pub static_boost: StaticBoost,

    /// Root URL the proxy is served from (must end with `/`)
    pub root_url: String,
    /// Protocol version sent as `--ver`
    pub js_ver: String,
    /// Followed redirects before giving up
    pub max_redirects: u32,
    /// Relay dispatch attempts per request
    pub max_attempts: u32,
    pub page_wait_timeout_ms: u64,
    pub cookie_flush_interval_ms: u64,
    /// Accept cookies set by hosts of a different site than the page
    pub third_party_cookies: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let mut node_map = BTreeMap::new();
        node_map.insert(
            "local".to_string(),
            NodeConfig {
                label: "Local relay".to_string(),
                hidden: false,
                lines: vec![LineConfig::Host("localhost:8443".to_string())],
            },
        );

        Self {
            ver: "1".to_string(),
            node_map,
            node_default: "local".to_string(),
            node_acc: "local".to_string(),
            direct_hosts: Vec::new(),
            static_boost: StaticBoost::default(),
            root_url: "http://localhost:8080/".to_string(),
            js_ver: DEFAULT_JS_VER.to_string(),
            max_redirects: 5,
            max_attempts: 5,
            page_wait_timeout_ms: 2000,
            cookie_flush_interval_ms: 3000,
            third_party_cookies: true,
        }
    }
}

impl ProxyConfig {
    /// Parses a JSON configuration document. Missing fields keep their defaults.
    pub fn from_json(s: &str) -> Result<Self, ProxyError> {
        let mut config: ProxyConfig = serde_json::from_str(s)?;
        if !config.root_url.ends_with('/') {
            config.root_url.push('/');
        }
        Ok(config)
    }

    pub fn page_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.page_wait_timeout_ms)
    }

    pub fn cookie_flush_interval(&self) -> Duration {
        Duration::from_millis(self.cookie_flush_interval_ms)
    }
}
