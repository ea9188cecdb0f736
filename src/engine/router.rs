//! Relay selection.
//!
//! Every configured node becomes a [`NodeGroup`] whose line weights are
//! normalized to the 32-bit range and sorted in descending order. A line is
//! picked by walking the cumulative weights until they exceed the hash of the
//! target URL, so a given URL always lands on the same line of a node.
//!
//! The whole table lives in an immutable [`RouterConfig`]. [`NodeRouter`]
//! hands out snapshots and swaps the table atomically on reload.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use url::form_urlencoded;
use url::Url;

use crate::engine::config::{NodeConfig, ProxyConfig};
use crate::engine::errors::ProxyError;
use crate::engine::url_codec::{strip_fragment, strip_scheme};

/// Tier served by the acceleration node.
pub const ACCELERATION_TIER: u32 = 2;

const HASH_RANGE: f64 = 4_294_967_296.0;

/// Deterministic hash of a target URL, used for sticky line selection.
pub fn url_hash(url: &str) -> u32 {
    xxhash_rust::xxh32::xxh32(url.as_bytes(), 0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayLine {
    pub host: String,
    /// Share of the 32-bit hash range
    pub weight: u64,
}

#[derive(Debug, Clone)]
pub struct NodeGroup {
    pub id: String,
    pub label: String,
    pub hidden: bool,
    lines: Vec<RelayLine>,
}

impl NodeGroup {
    pub fn from_config(id: &str, node: &NodeConfig) -> Result<Self, ProxyError> {
        if node.lines.is_empty() {
            return Err(ProxyError::EmptyNode(id.to_string()));
        }

        let raw: Vec<f64> = node.lines.iter().map(|l| l.weight().max(0.0)).collect();
        let mut total: f64 = raw.iter().sum();
        let equal = total <= 0.0;
        if equal {
            total = raw.len() as f64;
        }

        let mut lines: Vec<RelayLine> = node
            .lines
            .iter()
            .zip(raw)
            .map(|(line, w)| {
                let w = if equal { 1.0 } else { w };
                RelayLine {
                    host: line.host().to_string(),
                    weight: (w / total * HASH_RANGE).round() as u64,
                }
            })
            .collect();
        lines.sort_by(|a, b| b.weight.cmp(&a.weight));

        Ok(Self {
            id: id.to_string(),
            label: node.label.clone(),
            hidden: node.hidden,
            lines,
        })
    }

    pub fn lines(&self) -> &[RelayLine] {
        &self.lines
    }

    pub fn select_line(&self, url_hash: u32) -> &str {
        let mut acc = 0u64;
        for line in &self.lines {
            acc += line.weight;
            if acc > url_hash as u64 {
                return &line.host;
            }
        }
        // Rounding can leave the top of the range uncovered
        self.lines.last().map(|l| l.host.as_str()).unwrap_or_default()
    }
}

/// Immutable routing table.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    nodes: HashMap<String, NodeGroup>,
    default_node: String,
    acc_node: String,
    js_ver: String,
}

impl RouterConfig {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let mut nodes = HashMap::new();
        for (id, node) in &config.node_map {
            nodes.insert(id.clone(), NodeGroup::from_config(id, node)?);
        }

        for id in [&config.node_default, &config.node_acc] {
            if !nodes.contains_key(id) {
                return Err(ProxyError::UnknownNode(id.clone()));
            }
        }

        Ok(Self {
            nodes,
            default_node: config.node_default.clone(),
            acc_node: config.node_acc.clone(),
            js_ver: config.js_ver.clone(),
        })
    }

    pub fn node(&self, id: &str) -> Option<&NodeGroup> {
        self.nodes.get(id)
    }

    pub fn default_node(&self) -> &str {
        &self.default_node
    }

    /// Node serving a dispatch tier: the acceleration node for tier 2, the default node otherwise.
    pub fn node_for_tier(&self, tier: u32) -> &str {
        if tier == ACCELERATION_TIER {
            &self.acc_node
        } else {
            &self.default_node
        }
    }

    pub fn select_line(&self, node_id: &str, url_hash: u32) -> Result<&str, ProxyError> {
        self.nodes
            .get(node_id)
            .map(|group| group.select_line(url_hash))
            .ok_or_else(|| ProxyError::UnknownNode(node_id.to_string()))
    }

    /// Line used for a target at the given tier.
    pub fn line_for(&self, url_hash: u32, tier: u32) -> Result<&str, ProxyError> {
        self.select_line(self.node_for_tier(tier), url_hash)
    }

    /// `http://` for local hosts, `https://` otherwise.
    pub fn build_transport_url(host: &str) -> Result<Url, ProxyError> {
        let s = if is_local_host(host) { "" } else { "s" };
        let url = format!("http{}://{}/http", s, host);
        Url::parse(&url).map_err(|_| ProxyError::InvalidUrl(url))
    }

    /// Tunnel address for a WebSocket target. Returns `None` for non-ws schemes.
    pub fn build_ws_url(&self, target: &Url, args: &[(&str, &str)]) -> Option<Url> {
        let scheme = match target.scheme() {
            "wss" => "https",
            "ws" => "http",
            _ => return None,
        };

        let href = strip_fragment(target.as_str());
        let tunneled = format!("{}://{}", scheme, strip_scheme(href));

        let mut query = form_urlencoded::Serializer::new(String::new());
        for (k, v) in args {
            query.append_pair(k, v);
        }
        query.append_pair("url__", &tunneled);
        query.append_pair("ver__", &self.js_ver);

        let host = self.select_line(&self.default_node, url_hash(href)).ok()?;
        let s = if is_local_host(host) { "" } else { "s" };
        Url::parse(&format!("ws{}://{}/ws?{}", s, host, query.finish())).ok()
    }
}

fn is_local_host(host: &str) -> bool {
    let name = match host.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or_default(),
        None => host.split(':').next().unwrap_or_default(),
    };
    name.eq_ignore_ascii_case("localhost") || name.starts_with("127.") || name == "::1"
}

/// Shared, reloadable routing table.
#[derive(Debug)]
pub struct NodeRouter {
    current: RwLock<Arc<RouterConfig>>,
}

impl NodeRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The table in effect now. A request keeps its snapshot for its whole lifecycle.
    pub fn snapshot(&self) -> Arc<RouterConfig> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reload(&self, config: RouterConfig) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        log::info!("Routing table reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::LineConfig;
    use std::collections::BTreeMap;

    fn weighted(lines: &[(&str, f64)]) -> NodeConfig {
        NodeConfig {
            label: "test".into(),
            hidden: false,
            lines: lines
                .iter()
                .map(|(h, w)| LineConfig::Weighted {
                    host: h.to_string(),
                    weight: *w,
                })
                .collect(),
        }
    }

    fn config() -> ProxyConfig {
        let mut node_map = BTreeMap::new();
        node_map.insert("main".to_string(), weighted(&[("a.relay.net", 1.0), ("b.relay.net", 3.0)]));
        node_map.insert("acc".to_string(), weighted(&[("acc.relay.net", 1.0)]));
        ProxyConfig {
            node_map,
            node_default: "main".into(),
            node_acc: "acc".into(),
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn weights_are_normalized_and_sorted() {
        let group = NodeGroup::from_config("main", &weighted(&[("a", 1.0), ("b", 3.0)])).unwrap();
        let lines = group.lines();
        assert_eq!(lines[0].host, "b");
        assert_eq!(lines[0].weight, 3_221_225_472);
        assert_eq!(lines[1].weight, 1_073_741_824);
    }

    #[test]
    fn one_to_three_split() {
        let group = NodeGroup::from_config("main", &weighted(&[("a", 1.0), ("b", 3.0)])).unwrap();
        let samples = 20_000;
        let hits = (0..samples)
            .filter(|_| group.select_line(rand::random::<u32>()) == "b")
            .count();
        let ratio = hits as f64 / samples as f64;
        assert!((0.72..0.78).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn selection_is_sticky() {
        let router = RouterConfig::from_config(&config()).unwrap();
        let h = url_hash("https://example.com/a.js");
        let first = router.select_line("main", h).unwrap().to_string();
        for _ in 0..10 {
            assert_eq!(router.select_line("main", h).unwrap(), first);
        }
        assert_eq!(router.select_line("main", u32::MAX).unwrap(), "a.relay.net");
    }

    #[test]
    fn tiers_pick_nodes() {
        let router = RouterConfig::from_config(&config()).unwrap();
        assert_eq!(router.node_for_tier(0), "main");
        assert_eq!(router.node_for_tier(1), "main");
        assert_eq!(router.node_for_tier(2), "acc");
        assert_eq!(router.line_for(0, 2).unwrap(), "acc.relay.net");
    }

    #[test]
    fn unknown_and_empty_nodes_are_rejected() {
        let mut cfg = config();
        cfg.node_acc = "missing".into();
        assert!(matches!(RouterConfig::from_config(&cfg), Err(ProxyError::UnknownNode(_))));

        let mut cfg = config();
        cfg.node_map.insert("main".into(), NodeConfig::default());
        assert!(matches!(RouterConfig::from_config(&cfg), Err(ProxyError::EmptyNode(_))));
    }

    #[test]
    fn transport_url_scheme_follows_host() {
        assert_eq!(
            RouterConfig::build_transport_url("localhost:8443").unwrap().as_str(),
            "http://localhost:8443/http"
        );
        assert_eq!(
            RouterConfig::build_transport_url("127.0.0.1:9000").unwrap().as_str(),
            "http://127.0.0.1:9000/http"
        );
        assert_eq!(
            RouterConfig::build_transport_url("node.relay.net").unwrap().as_str(),
            "https://node.relay.net/http"
        );
    }

    #[test]
    fn ws_url_carries_target_and_version() {
        let mut cfg = config();
        cfg.node_map.insert("main".into(), weighted(&[("localhost:8443", 1.0)]));
        let router = RouterConfig::from_config(&cfg).unwrap();

        let target = Url::parse("wss://chat.example.com/socket?x=1#frag").unwrap();
        let ws = router.build_ws_url(&target, &[("k", "v")]).unwrap();
        assert_eq!(ws.scheme(), "ws");
        assert_eq!(ws.path(), "/ws");

        let pairs: HashMap<_, _> = ws.query_pairs().into_owned().collect();
        assert_eq!(pairs["k"], "v");
        assert_eq!(pairs["url__"], "https://chat.example.com/socket?x=1");
        assert_eq!(pairs["ver__"], cfg.js_ver);

        let http = Url::parse("https://example.com/").unwrap();
        assert!(router.build_ws_url(&http, &[]).is_none());
    }

    #[test]
    fn reload_swaps_snapshot() {
        let router = NodeRouter::new(RouterConfig::from_config(&config()).unwrap());
        let before = router.snapshot();

        let mut cfg = config();
        cfg.node_default = "acc".into();
        router.reload(RouterConfig::from_config(&cfg).unwrap());

        assert_eq!(before.default_node(), "main");
        assert_eq!(router.snapshot().default_node(), "acc");
    }
}
