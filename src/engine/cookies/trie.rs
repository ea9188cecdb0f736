use std::collections::HashMap;

/// Domain trie keyed by reversed labels: `a.b.com` lives at root -> `com` -> `b` -> `a`.
///
/// Nodes hold the ids of the cookies whose domain is exactly the path to that
/// node. The records themselves live in the jar's id map, so updating a cookie
/// in place never touches the trie.
#[derive(Debug, Default)]
pub struct CookieTrieNode {
    children: HashMap<String, CookieTrieNode>,
    items: Vec<String>,
}

impl CookieTrieNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, domain: &str, id: String) {
        let mut node = self;
        for label in domain.rsplit('.') {
            node = node.children.entry(label.to_string()).or_default();
        }
        node.items.push(id);
    }

    pub fn remove(&mut self, domain: &str, id: &str) {
        let mut node = self;
        for label in domain.rsplit('.') {
            node = match node.children.get_mut(label) {
                Some(child) => child,
                None => return,
            };
        }
        node.items.retain(|i| i != id);
    }

    /// Walks from the top-level label of `host` down to its most specific
    /// label and returns `(id, full_match)` for every cookie on the way,
    /// broader domains first. `full_match` is true only for cookies stored at
    /// the node of `host` itself.
    pub fn collect(&self, host: &str) -> Vec<(String, bool)> {
        let labels: Vec<&str> = host.rsplit('.').collect();
        let mut out = Vec::new();
        let mut node = self;

        for (depth, label) in labels.iter().enumerate() {
            node = match node.children.get(*label) {
                Some(child) => child,
                None => break,
            };
            let full = depth + 1 == labels.len();
            out.extend(node.items.iter().map(|id| (id.clone(), full)));
        }

        out
    }

    pub fn clear(&mut self) {
        self.children.clear();
        self.items.clear();
    }
}
