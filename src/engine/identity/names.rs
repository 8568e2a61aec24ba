// lidlink Identity — Name Registry
//
// Bidirectional multimap between normalized display names and the
// identifiers observed using them. Ambiguity is expected: family members
// and shared devices legitimately share a name, so every set may hold
// several identifiers of either kind.

use crate::atoms::types::{IdKind, Identifier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Case-fold, trim and collapse whitespace. `None` when nothing is left.
pub fn normalize_name(name: &str) -> Option<String> {
    let folded = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if folded.is_empty() {
        None
    } else {
        Some(folded)
    }
}

/// Identifiers observed under one normalized name, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    #[serde(default)]
    pub canonical: BTreeSet<Identifier>,
    #[serde(default)]
    pub pseudonymous: BTreeSet<Identifier>,
}

impl NameEntry {
    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty() && self.pseudonymous.is_empty()
    }

    fn of_kind_mut(&mut self, kind: IdKind) -> &mut BTreeSet<Identifier> {
        match kind {
            IdKind::Canonical => &mut self.canonical,
            IdKind::Pseudonymous => &mut self.pseudonymous,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IdentifierNames {
    latest: String,
    all: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameRegistry {
    by_name: BTreeMap<String, NameEntry>,
    by_id: HashMap<Identifier, IdentifierNames>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` under an already-normalized name. Returns true when the
    /// registry changed (new name for the id, or new id for the name).
    pub fn record(&mut self, id: &Identifier, name: &str) -> bool {
        let inserted = self
            .by_name
            .entry(name.to_string())
            .or_default()
            .of_kind_mut(id.kind())
            .insert(id.clone());

        let names = self.by_id.entry(id.clone()).or_insert_with(|| IdentifierNames {
            latest: name.to_string(),
            all: BTreeSet::new(),
        });
        let renamed = names.latest != name;
        names.latest = name.to_string();
        names.all.insert(name.to_string());

        inserted || renamed
    }

    /// Drop the evidence that `id` used `name`. Empty entries disappear.
    pub fn retract(&mut self, id: &Identifier, name: &str) -> bool {
        let Some(entry) = self.by_name.get_mut(name) else {
            return false;
        };
        let removed = entry.of_kind_mut(id.kind()).remove(id);
        if entry.is_empty() {
            self.by_name.remove(name);
        }

        if let Some(names) = self.by_id.get_mut(id) {
            names.all.remove(name);
            match names.all.iter().next_back() {
                None => {
                    self.by_id.remove(id);
                }
                Some(_) if names.latest != name => {}
                Some(other) => names.latest = other.clone(),
            }
        }
        removed
    }

    pub fn entry(&self, name: &str) -> Option<&NameEntry> {
        self.by_name.get(name)
    }

    /// Identifiers observed under `name` (normalized before lookup).
    pub fn identifiers_for_name(&self, name: &str) -> NameEntry {
        normalize_name(name)
            .and_then(|n| self.by_name.get(&n).cloned())
            .unwrap_or_default()
    }

    /// Most recent name the identifier was observed with.
    pub fn name_for_identifier(&self, id: &Identifier) -> Option<&str> {
        self.by_id.get(id).map(|n| n.latest.as_str())
    }

    /// Every name the identifier has been observed with.
    pub fn names_for(&self, id: &Identifier) -> BTreeSet<String> {
        self.by_id.get(id).map(|n| n.all.clone()).unwrap_or_default()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &NameEntry)> {
        self.by_name.iter()
    }

    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }

    pub fn identifier_count(&self) -> usize {
        self.by_id.len()
    }

    /// Latest name per identifier, for persistence.
    pub fn latest_names(&self) -> BTreeMap<Identifier, String> {
        self.by_id.iter().map(|(id, n)| (id.clone(), n.latest.clone())).collect()
    }

    /// Rebuild from a persisted name table. `latest` hints are honoured only
    /// when consistent with the table.
    pub fn from_parts(
        by_name: BTreeMap<String, NameEntry>,
        latest: &BTreeMap<Identifier, String>,
    ) -> Self {
        let mut registry = NameRegistry::new();
        for (name, entry) in by_name {
            let Some(name) = normalize_name(&name) else { continue };
            for id in entry.canonical.iter().chain(entry.pseudonymous.iter()) {
                registry.record(id, &name);
            }
        }
        for (id, name) in latest {
            if let Some(names) = registry.by_id.get_mut(id) {
                if names.all.contains(name) {
                    names.latest = name.clone();
                }
            }
        }
        registry
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
    }
}
