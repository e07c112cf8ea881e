//! Copy-on-write route table with host-tiered, longest-prefix matching.
//!
//! Readers load the current [`RouteSnapshot`] through an [`ArcSwap`]
//! without taking any lock. Writers clone the entry map into a
//! [`RouteBatch`], mutate it, rebuild the lookup index, and publish the
//! new snapshot with a single atomic store. A reader therefore sees
//! either the whole batch or none of it, never a half-applied event.
//!
//! Matching ([`RouteSnapshot::lookup`]):
//!
//! 1. Entries for the exact request host are tried first, then entries
//!    with the wildcard (empty) host.
//! 2. Within a host tier an `Exact` entry must equal the path; a `Prefix`
//!    entry matches when the path starts with its pattern (plain string
//!    prefix, no segment boundary).
//! 3. An `Exact` hit wins over any prefix; among prefixes the longest
//!    pattern wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::ingress::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    Prefix,
}

impl MatchMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
        }
    }
}

/// Identity of a route. An empty `host` matches any host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteKey {
    pub host: String,
    pub path: String,
    pub mode: MatchMode,
}

impl RouteKey {
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            mode,
        }
    }
}

/// A service and port, resolved to an address only at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BackendRef {
    pub namespace: String,
    pub service: String,
    pub port: u16,
}

impl std::fmt::Display for BackendRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.service, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub key: RouteKey,
    pub backend: BackendRef,
    pub owner: ResourceId,
}

#[derive(Debug, Default)]
struct HostRoutes {
    exact: HashMap<String, RouteEntry>,
    /// Sorted longest pattern first.
    prefixes: Vec<RouteEntry>,
}

impl HostRoutes {
    fn find(&self, path: &str) -> Option<&RouteEntry> {
        self.exact.get(path).or_else(|| {
            self.prefixes
                .iter()
                .find(|entry| path.starts_with(entry.key.path.as_str()))
        })
    }
}

/// An immutable, fully indexed view of the table at one instant.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    entries: HashMap<RouteKey, RouteEntry>,
    hosts: HashMap<String, HostRoutes>,
}

impl RouteSnapshot {
    fn from_entries(entries: HashMap<RouteKey, RouteEntry>) -> Self {
        let mut hosts: HashMap<String, HostRoutes> = HashMap::new();
        for entry in entries.values() {
            let tier = hosts.entry(entry.key.host.clone()).or_default();
            match entry.key.mode {
                MatchMode::Exact => {
                    tier.exact.insert(entry.key.path.clone(), entry.clone());
                }
                MatchMode::Prefix => tier.prefixes.push(entry.clone()),
            }
        }
        for tier in hosts.values_mut() {
            tier.prefixes.sort_by(|a, b| {
                b.key
                    .path
                    .len()
                    .cmp(&a.key.path.len())
                    .then_with(|| a.key.path.cmp(&b.key.path))
            });
        }
        Self { entries, hosts }
    }

    /// Match a normalized host and a request path.
    #[must_use]
    pub fn lookup(&self, host: &str, path: &str) -> Option<&RouteEntry> {
        if !host.is_empty() {
            if let Some(entry) = self.hosts.get(host).and_then(|tier| tier.find(path)) {
                return Some(entry);
            }
        }
        self.hosts.get("").and_then(|tier| tier.find(path))
    }

    #[must_use]
    pub fn get(&self, key: &RouteKey) -> Option<&RouteEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries ordered by key, for stable output.
    #[must_use]
    pub fn sorted_entries(&self) -> Vec<&RouteEntry> {
        let mut entries: Vec<&RouteEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

/// Pending mutations for one atomic publish.
#[derive(Debug)]
pub struct RouteBatch {
    entries: HashMap<RouteKey, RouteEntry>,
    changed: bool,
}

impl RouteBatch {
    /// Insert or replace the entry for `entry.key`.
    pub fn insert(&mut self, entry: RouteEntry) -> Option<RouteEntry> {
        if self.entries.get(&entry.key) == Some(&entry) {
            return Some(entry);
        }
        self.changed = true;
        self.entries.insert(entry.key.clone(), entry)
    }

    pub fn remove(&mut self, key: &RouteKey) -> Option<RouteEntry> {
        let removed = self.entries.remove(key);
        self.changed |= removed.is_some();
        removed
    }

    #[must_use]
    pub fn get(&self, key: &RouteKey) -> Option<&RouteEntry> {
        self.entries.get(key)
    }
}

pub struct RouteTable {
    current: ArcSwap<RouteSnapshot>,
    writer: Mutex<()>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.len())
            .finish_non_exhaustive()
    }
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    #[must_use]
    pub fn lookup(&self, host: &str, path: &str) -> Option<BackendRef> {
        self.current
            .load()
            .lookup(host, path)
            .map(|entry| entry.backend.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Apply a batch of mutations and publish them with one swap.
    ///
    /// Writers are serialized; readers are never blocked. Nothing is
    /// published when the batch leaves the table unchanged.
    pub fn update<R>(&self, f: impl FnOnce(&mut RouteBatch) -> R) -> R {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = RouteBatch {
            entries: self.current.load().entries.clone(),
            changed: false,
        };
        let result = f(&mut batch);
        if batch.changed {
            self.current
                .store(Arc::new(RouteSnapshot::from_entries(batch.entries)));
        }
        result
    }

    pub fn insert(&self, entry: RouteEntry) -> Option<RouteEntry> {
        self.update(|batch| batch.insert(entry))
    }

    pub fn remove(&self, key: &RouteKey) -> Option<RouteEntry> {
        self.update(|batch| batch.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(host: &str, path: &str, mode: MatchMode, service: &str) -> RouteEntry {
        RouteEntry {
            key: RouteKey::new(host, path, mode),
            backend: BackendRef {
                namespace: "default".into(),
                service: service.into(),
                port: 80,
            },
            owner: ResourceId::new("default", "test"),
        }
    }

    fn service_for(table: &RouteTable, host: &str, path: &str) -> Option<String> {
        table.lookup(host, path).map(|b| b.service)
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::new();
        table.insert(entry("", "/a", MatchMode::Prefix, "short"));
        table.insert(entry("", "/a/b", MatchMode::Prefix, "long"));

        assert_eq!(service_for(&table, "", "/a/b/c").as_deref(), Some("long"));
        assert_eq!(service_for(&table, "", "/a/x").as_deref(), Some("short"));
        assert_eq!(service_for(&table, "", "/a").as_deref(), Some("short"));
    }

    #[test]
    fn longest_prefix_is_independent_of_insert_order() {
        let table = RouteTable::new();
        table.insert(entry("", "/a/b", MatchMode::Prefix, "long"));
        table.insert(entry("", "/a", MatchMode::Prefix, "short"));

        for _ in 0..10 {
            assert_eq!(service_for(&table, "", "/a/b/c").as_deref(), Some("long"));
        }
    }

    #[test]
    fn exact_does_not_match_longer_path() {
        let table = RouteTable::new();
        table.insert(entry("", "/x", MatchMode::Exact, "exact"));

        assert_eq!(service_for(&table, "", "/x").as_deref(), Some("exact"));
        assert!(table.lookup("", "/x/y").is_none());
    }

    #[test]
    fn prefix_is_a_plain_string_prefix() {
        let table = RouteTable::new();
        table.insert(entry("", "/x", MatchMode::Prefix, "prefix"));

        assert_eq!(service_for(&table, "", "/x/y").as_deref(), Some("prefix"));
        assert_eq!(service_for(&table, "", "/xyz").as_deref(), Some("prefix"));
        assert!(table.lookup("", "/y").is_none());
    }

    #[test]
    fn exact_beats_prefix_with_same_pattern() {
        let table = RouteTable::new();
        table.insert(entry("", "/x", MatchMode::Prefix, "prefix"));
        table.insert(entry("", "/x", MatchMode::Exact, "exact"));

        assert_eq!(service_for(&table, "", "/x").as_deref(), Some("exact"));
        assert_eq!(service_for(&table, "", "/x/1").as_deref(), Some("prefix"));
    }

    #[test]
    fn exact_host_beats_wildcard() {
        let table = RouteTable::new();
        table.insert(entry("", "/", MatchMode::Prefix, "any"));
        table.insert(entry("example.com", "/", MatchMode::Prefix, "site"));

        assert_eq!(
            service_for(&table, "example.com", "/page").as_deref(),
            Some("site")
        );
        assert_eq!(
            service_for(&table, "other.com", "/page").as_deref(),
            Some("any")
        );
    }

    #[test]
    fn host_tier_falls_back_to_wildcard_when_path_misses() {
        let table = RouteTable::new();
        table.insert(entry("example.com", "/api", MatchMode::Prefix, "api"));
        table.insert(entry("", "/static", MatchMode::Prefix, "cdn"));

        assert_eq!(
            service_for(&table, "example.com", "/static/app.js").as_deref(),
            Some("cdn")
        );
        assert!(table.lookup("example.com", "/other").is_none());
    }

    #[test]
    fn empty_request_host_only_sees_wildcard() {
        let table = RouteTable::new();
        table.insert(entry("example.com", "/", MatchMode::Prefix, "site"));
        assert!(table.lookup("", "/").is_none());
    }

    #[test]
    fn insert_replaces_target() {
        let table = RouteTable::new();
        table.insert(entry("", "/", MatchMode::Prefix, "old"));
        let previous = table.insert(entry("", "/", MatchMode::Prefix, "new"));

        assert_eq!(previous.unwrap().backend.service, "old");
        assert_eq!(table.len(), 1);
        assert_eq!(service_for(&table, "", "/").as_deref(), Some("new"));
    }

    #[test]
    fn remove_deletes_only_that_key() {
        let table = RouteTable::new();
        table.insert(entry("", "/a", MatchMode::Prefix, "a"));
        table.insert(entry("", "/b", MatchMode::Prefix, "b"));

        let removed = table.remove(&RouteKey::new("", "/a", MatchMode::Prefix));
        assert!(removed.is_some());
        assert!(table.lookup("", "/a").is_none());
        assert_eq!(service_for(&table, "", "/b").as_deref(), Some("b"));
        assert!(table
            .remove(&RouteKey::new("", "/a", MatchMode::Prefix))
            .is_none());
    }

    #[test]
    fn held_snapshot_is_unaffected_by_later_writes() {
        let table = RouteTable::new();
        table.insert(entry("", "/", MatchMode::Prefix, "v1"));
        let before = table.snapshot();

        table.update(|batch| {
            batch.remove(&RouteKey::new("", "/", MatchMode::Prefix));
            batch.insert(entry("", "/", MatchMode::Prefix, "v2"));
        });

        assert_eq!(before.lookup("", "/").unwrap().backend.service, "v1");
        assert_eq!(service_for(&table, "", "/").as_deref(), Some("v2"));
    }

    #[test]
    fn unchanged_batch_does_not_publish() {
        let table = RouteTable::new();
        table.insert(entry("", "/", MatchMode::Prefix, "v1"));
        let before = table.snapshot();

        table.update(|batch| {
            batch.insert(entry("", "/", MatchMode::Prefix, "v1"));
        });

        assert!(Arc::ptr_eq(&before, &table.snapshot()));
    }

    #[test]
    fn concurrent_readers_see_whole_batches() {
        let table = Arc::new(RouteTable::new());
        table.update(|batch| {
            batch.insert(entry("", "/a", MatchMode::Prefix, "gen0"));
            batch.insert(entry("", "/b", MatchMode::Prefix, "gen0"));
        });

        let reader = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    let snapshot = table.snapshot();
                    let a = &snapshot.lookup("", "/a").unwrap().backend.service;
                    let b = &snapshot.lookup("", "/b").unwrap().backend.service;
                    assert_eq!(a, b);
                }
            })
        };

        for generation in 1..500 {
            let name = format!("gen{generation}");
            table.update(|batch| {
                batch.insert(entry("", "/a", MatchMode::Prefix, &name));
                batch.insert(entry("", "/b", MatchMode::Prefix, &name));
            });
        }

        reader.join().unwrap();
    }

    #[test]
    fn sorted_entries_are_stable() {
        let table = RouteTable::new();
        table.insert(entry("b.com", "/", MatchMode::Prefix, "b"));
        table.insert(entry("a.com", "/z", MatchMode::Exact, "a2"));
        table.insert(entry("a.com", "/a", MatchMode::Prefix, "a1"));

        let snapshot = table.snapshot();
        let services: Vec<&str> = snapshot
            .sorted_entries()
            .iter()
            .map(|e| e.backend.service.as_str())
            .collect();
        assert_eq!(services, vec!["a1", "a2", "b"]);
    }
}
