// lidlink Identity — Mapping Store
//
// Authoritative pseudonymous ⇄ canonical index. Both directions are
// updated inside the same `&mut self` call, so a caller holding the
// resolver write lock can never publish half a pair.
//
// Invariants:
//   • forward[p].canonical == c  ⇔  reverse[c] == p   (no orphans)
//   • automatic sources never displace an existing binding; only
//     `MappingSource::Forced` may.

use crate::atoms::types::{Identifier, Mapping, MappingSource};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Result of a [`MappingStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// The identical pair already existed.
    Unchanged,
    /// Forced put that displaced one or more conflicting mappings.
    Replaced(Vec<Mapping>),
    /// Refused; the store is untouched.
    Rejected(String),
}

impl PutOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PutOutcome::Created | PutOutcome::Replaced(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingStore {
    forward: BTreeMap<Identifier, Mapping>,
    reverse: BTreeMap<Identifier, Identifier>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &mut self,
        pseudonymous: &Identifier,
        canonical: &Identifier,
        source: MappingSource,
        at: DateTime<Utc>,
    ) -> PutOutcome {
        if !pseudonymous.is_pseudonymous() || !canonical.is_canonical() {
            let reason = format!("kind mismatch: {} → {}", pseudonymous, canonical);
            warn!("[lid:store] Rejected mapping, {}", reason);
            return PutOutcome::Rejected(reason);
        }

        if let Some(existing) = self.forward.get_mut(pseudonymous) {
            if existing.canonical == *canonical {
                if source == MappingSource::Forced && existing.source != MappingSource::Forced {
                    existing.source = MappingSource::Forced;
                    existing.created_at = at;
                }
                return PutOutcome::Unchanged;
            }
        }

        let forced = source == MappingSource::Forced;
        let mut displaced = Vec::new();

        if let Some(existing) = self.forward.get(pseudonymous) {
            if !forced {
                let reason = format!(
                    "{} already mapped to {} ({})",
                    pseudonymous, existing.canonical, existing.source
                );
                warn!("[lid:store] Rejected {} mapping, {}", source, reason);
                return PutOutcome::Rejected(reason);
            }
        }
        if let Some(bound) = self.reverse.get(canonical) {
            if !forced {
                let reason = format!("{} already bound to {}", canonical, bound);
                warn!("[lid:store] Rejected {} mapping, {}", source, reason);
                return PutOutcome::Rejected(reason);
            }
        }

        if let Some(old) = self.remove(pseudonymous) {
            displaced.push(old);
        }
        if let Some(old_pseudo) = self.reverse.get(canonical).cloned() {
            if let Some(old) = self.remove(&old_pseudo) {
                displaced.push(old);
            }
        }

        self.forward.insert(
            pseudonymous.clone(),
            Mapping {
                pseudonymous: pseudonymous.clone(),
                canonical: canonical.clone(),
                created_at: at,
                source,
            },
        );
        self.reverse.insert(canonical.clone(), pseudonymous.clone());

        debug!("[lid:store] Stored {} → {} ({})", pseudonymous, canonical, source);
        if displaced.is_empty() {
            PutOutcome::Created
        } else {
            for old in &displaced {
                warn!("[lid:store] Displaced {} → {} ({})", old.pseudonymous, old.canonical, old.source);
            }
            PutOutcome::Replaced(displaced)
        }
    }

    /// Remove a pair by its pseudonymous side, keeping both indexes in step.
    pub fn remove(&mut self, pseudonymous: &Identifier) -> Option<Mapping> {
        let mapping = self.forward.remove(pseudonymous)?;
        self.reverse.remove(&mapping.canonical);
        Some(mapping)
    }

    pub fn get(&self, pseudonymous: &Identifier) -> Option<&Identifier> {
        self.forward.get(pseudonymous).map(|m| &m.canonical)
    }

    pub fn mapping(&self, pseudonymous: &Identifier) -> Option<&Mapping> {
        self.forward.get(pseudonymous)
    }

    pub fn reverse(&self, canonical: &Identifier) -> Option<&Identifier> {
        self.reverse.get(canonical)
    }

    /// True when the identifier participates in a mapping on either side.
    pub fn is_bound(&self, id: &Identifier) -> bool {
        if id.is_pseudonymous() {
            self.forward.contains_key(id)
        } else {
            self.reverse.contains_key(id)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.forward.values()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Forward and reverse indexes agree exactly.
    pub fn is_consistent(&self) -> bool {
        self.forward.len() == self.reverse.len()
            && self.forward.iter().all(|(p, m)| {
                m.pseudonymous == *p && self.reverse.get(&m.canonical) == Some(p)
            })
    }
}
