// lidlink Identity — Pending Contact Queue
//
// Canonical-only observations waiting for a pseudonymous counterpart with
// the same name. Entries are promoted by the correlator or evicted by the
// sweep once they outlive the retention window; eviction never maps.

use crate::atoms::types::{Identifier, ObservationSource, PendingContact};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingQueue {
    entries: BTreeMap<Identifier, PendingContact>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a pending contact. The caller guarantees the
    /// canonical id is not mapped. Returns true for a new entry.
    pub fn offer(
        &mut self,
        canonical: &Identifier,
        name: &str,
        source: ObservationSource,
        at: DateTime<Utc>,
    ) -> bool {
        if let Some(existing) = self.entries.get_mut(canonical) {
            existing.name = name.to_string();
            existing.source = source;
            if at > existing.last_observed_at {
                existing.last_observed_at = at;
            }
            return false;
        }
        debug!("[lid:pending] {} waiting for LID as '{}'", canonical, name);
        self.entries.insert(
            canonical.clone(),
            PendingContact {
                canonical: canonical.clone(),
                name: name.to_string(),
                first_observed_at: at,
                last_observed_at: at,
                source,
            },
        );
        true
    }

    /// The single pending canonical whose name equals `name`, if exactly one.
    /// Several pending contacts sharing a name resolve to nothing.
    pub fn resolve_against(&self, pseudonymous: &Identifier, name: &str) -> Option<&Identifier> {
        let mut matches = self.entries.values().filter(|p| p.name == name);
        let first = matches.next()?;
        if matches.next().is_some() {
            debug!("[lid:pending] {} matches several pending contacts named '{}'", pseudonymous, name);
            return None;
        }
        Some(&first.canonical)
    }

    pub fn remove(&mut self, canonical: &Identifier) -> Option<PendingContact> {
        self.entries.remove(canonical)
    }

    /// Evict every entry last seen before `now - retention`.
    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<PendingContact> {
        let cutoff = now - retention;
        let expired: Vec<Identifier> = self
            .entries
            .values()
            .filter(|p| p.last_observed_at < cutoff)
            .map(|p| p.canonical.clone())
            .collect();
        expired.iter().filter_map(|id| self.entries.remove(id)).collect()
    }

    pub fn get(&self, canonical: &Identifier) -> Option<&PendingContact> {
        self.entries.get(canonical)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingContact> {
        self.entries.values()
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
}
