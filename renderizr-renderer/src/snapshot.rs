//! KV snapshot: the per-template view of the store that templates render
//! against.
//!
//! A snapshot is rebuilt from scratch on every render: [`KvSnapshot::replace`]
//! purges every entry before inserting the new batch. Keys are absolute,
//! rooted at `/`, with the template's key prefix already stripped.

use std::collections::{BTreeMap, BTreeSet};

use glob::{MatchOptions, Pattern, PatternError};
use serde_json::{Map, Value};

use renderizr_core::{KeyPrefix, KvPair};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvSnapshot {
    entries: BTreeMap<String, String>,
}

impl KvSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Purge, then insert every pair with `prefix` stripped from its key.
    pub fn replace<I>(&mut self, pairs: I, prefix: &KeyPrefix)
    where
        I: IntoIterator<Item = KvPair>,
    {
        self.purge();
        for pair in pairs {
            self.entries.insert(prefix.strip(&pair.key), pair.value);
        }
    }

    pub fn purge(&mut self) {
        self.entries.clear();
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(KeyPrefix::new(key).as_str().to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(KeyPrefix::new(key).as_str())
            .map(String::as_str)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries whose key matches a glob `pattern` (`*` and `?` stop at `/`).
    pub fn matching(&self, pattern: &str) -> Result<Vec<(&str, &str)>, PatternError> {
        let pattern = Pattern::new(KeyPrefix::new(pattern).as_str())?;
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::default()
        };
        Ok(self
            .iter()
            .filter(|(key, _)| pattern.matches_with(key, options))
            .collect())
    }

    /// Names of the immediate children of `dir`, leaves and directories alike.
    pub fn list(&self, dir: &str) -> Vec<String> {
        self.children(dir, false)
    }

    /// Names of the immediate children of `dir` that have children themselves.
    pub fn list_dirs(&self, dir: &str) -> Vec<String> {
        self.children(dir, true)
    }

    fn children(&self, dir: &str, dirs_only: bool) -> Vec<String> {
        let dir = KeyPrefix::new(dir);
        let mut names = BTreeSet::new();
        for key in self.entries.keys() {
            let rest = dir.strip(key);
            if !dir.is_root() && rest == *key {
                continue;
            }
            let mut segments = rest.split('/').filter(|s| !s.is_empty());
            let Some(first) = segments.next() else {
                continue;
            };
            if dirs_only && segments.next().is_none() {
                continue;
            }
            names.insert(first.to_string());
        }
        names.into_iter().collect()
    }

    /// Nested object view: `/db/host` becomes `{"db": {"host": ...}}`.
    ///
    /// A key whose path collides with a value already placed (`/db` and
    /// `/db/host`) keeps the first one in key order; the other stays
    /// reachable through the lookup functions.
    pub fn to_tree(&self) -> Map<String, Value> {
        let mut root = Map::new();
        for (key, value) in &self.entries {
            let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
            let Some((leaf, parents)) = segments.split_last() else {
                continue;
            };
            if !insert_path(&mut root, parents, leaf, value) {
                tracing::debug!(key = %key, "key shadowed in template context tree");
            }
        }
        root
    }
}

fn insert_path(node: &mut Map<String, Value>, parents: &[&str], leaf: &str, value: &str) -> bool {
    match parents.split_first() {
        None => {
            if node.contains_key(leaf) {
                return false;
            }
            node.insert(leaf.to_string(), Value::String(value.to_string()));
            true
        }
        Some((head, tail)) => {
            let child = node
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match child {
                Value::Object(map) => insert_path(map, tail, leaf, value),
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<KvPair> {
        items.iter().map(|(k, v)| KvPair::new(*k, *v)).collect()
    }

    #[test]
    fn replace_strips_prefix_and_purges_previous_entries() {
        let mut snapshot = KvSnapshot::new();
        let prefix = KeyPrefix::new("/app");
        snapshot.replace(pairs(&[("/app/db/host", "10.0.0.1"), ("/app/old", "x")]), &prefix);
        assert_eq!(snapshot.get("/db/host"), Some("10.0.0.1"));

        snapshot.replace(pairs(&[("/app/db/port", "5432")]), &prefix);
        assert_eq!(snapshot.len(), 1, "previous batch must be purged");
        assert!(!snapshot.exists("/old"));
        assert_eq!(snapshot.get("db/port"), Some("5432"));
    }

    #[test]
    fn list_and_list_dirs() {
        let mut snapshot = KvSnapshot::new();
        snapshot.replace(
            pairs(&[
                ("/upstreams/api/1", "10.0.0.1"),
                ("/upstreams/api/2", "10.0.0.2"),
                ("/upstreams/web/1", "10.0.1.1"),
                ("/upstreams/timeout", "5s"),
                ("/upstreamsx", "no"),
            ]),
            &KeyPrefix::root(),
        );
        assert_eq!(snapshot.list("/upstreams"), vec!["api", "timeout", "web"]);
        assert_eq!(snapshot.list_dirs("/upstreams"), vec!["api", "web"]);
        assert_eq!(snapshot.list("/upstreams/api"), vec!["1", "2"]);
        assert!(snapshot.list_dirs("/upstreams/api").is_empty());
    }

    #[test]
    fn glob_does_not_cross_segments() {
        let mut snapshot = KvSnapshot::new();
        snapshot.set("/hosts/a/ip", "1");
        snapshot.set("/hosts/b/ip", "2");
        snapshot.set("/hosts/b/extra/ip", "3");
        let matched: Vec<&str> = snapshot
            .matching("/hosts/*/ip")
            .expect("valid pattern")
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(matched, vec!["1", "2"]);
        assert_eq!(snapshot.matching("/hosts/?/ip").unwrap().len(), 2);
    }

    #[test]
    fn many_wildcards_match_without_blowup() {
        let mut snapshot = KvSnapshot::new();
        snapshot.set(&format!("/{}b", "a".repeat(64)), "hit");
        let pattern = format!("/{}c", "*".repeat(32));
        assert!(snapshot.matching(&pattern).unwrap().is_empty());
        assert_eq!(snapshot.matching("/*b").unwrap().len(), 1);
    }

    #[test]
    fn malformed_pattern_is_an_error() {
        let snapshot = KvSnapshot::new();
        assert!(snapshot.matching("/hosts/[a").is_err());
    }

    #[test]
    fn tree_nests_segments_and_keeps_first_on_collision() {
        let mut snapshot = KvSnapshot::new();
        snapshot.set("/db", "flat");
        snapshot.set("/db/host", "nested");
        snapshot.set("/app/name", "demo");
        let tree = Value::Object(snapshot.to_tree());
        assert_eq!(tree, json!({"db": "flat", "app": {"name": "demo"}}));
    }
}
