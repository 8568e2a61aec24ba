// lidlink Engine — TTL Caches
//
// Short-lived caches for data that is expensive to fetch from the
// transport. Expiry is lazy (checked on read); `purge_expired` runs from
// the sweep timer to bound memory for keys that are never read again.

use crate::atoms::types::{CacheStats, Identifier};
use crate::engine::config::CacheConfig;
use crate::engine::ingest::GroupSnapshot;
use crate::engine::transport::ContactRecord;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (V, Instant)>,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new(), hits: 0, misses: 0 }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, (value, now + self.ttl));
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let live = match self.entries.get(key) {
            Some((_, expiry)) => now < *expiry,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if !live {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|(v, _)| v.clone())
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(v, _)| v)
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, expiry)| now < *expiry);
        before - self.entries.len()
    }

    /// Keep only entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|k, (v, _)| keep(k, v));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { keys: self.entries.len(), hits: self.hits, misses: self.misses }
    }
}

// ── Resolver caches ────────────────────────────────────────────────────

pub struct ResolverCaches {
    /// context id → last fetched membership
    pub groups: TtlCache<String, GroupSnapshot>,
    /// (context id, pseudonymous id) → canonical id
    pub participants: TtlCache<(String, Identifier), Identifier>,
    /// identifier as queried → directory record
    pub contacts: TtlCache<Identifier, ContactRecord>,
}

impl ResolverCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            groups: TtlCache::new(Duration::from_secs(config.group_snapshot_ttl_secs)),
            participants: TtlCache::new(Duration::from_secs(config.participant_ttl_secs)),
            contacts: TtlCache::new(Duration::from_secs(config.contact_ttl_secs)),
        }
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        self.groups.purge_expired(now) + self.participants.purge_expired(now) + self.contacts.purge_expired(now)
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.participants.clear();
        self.contacts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_expires_lazily_on_read() {
        let mut c: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        c.insert_at("g1", 7, t0);
        assert_eq!(c.get_at(&"g1", t0 + Duration::from_secs(299)), Some(7));
        assert_eq!(c.get_at(&"g1", t0 + Duration::from_secs(300)), None);
        assert!(c.is_empty());
        let s = c.stats();
        assert_eq!((s.hits, s.misses), (1, 1));
    }

    #[test]
    fn purge_drops_only_expired() {
        let mut c: TtlCache<u8, u8> = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        c.insert_at(1, 1, t0);
        c.insert_at(2, 2, t0 + Duration::from_secs(8));
        assert_eq!(c.purge_expired(t0 + Duration::from_secs(11)), 1);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn caches_use_independent_ttls() {
        let caches = ResolverCaches::new(&CacheConfig::default());
        assert_eq!(caches.groups.ttl(), Duration::from_secs(300));
        assert_eq!(caches.participants.ttl(), Duration::from_secs(1800));
        assert_eq!(caches.contacts.ttl(), Duration::from_secs(3600));
    }
}
