// lidlink Identity — Snapshot Persistence
//
// One versioned JSON document per process:
//   { version, mappings, reverse, nameRegistry, identifierNames,
//     mappingMeta, pending, lastUpdated }
// `pending` is optional; documents written without it re-queue every
// unbound canonical id as first seen at load time.
// Written to a temp file and renamed into place so a crash mid-write never
// leaves a truncated snapshot behind.

use super::mapping::MappingStore;
use super::names::{NameEntry, NameRegistry};
use super::pending::PendingQueue;
use super::ResolverState;
use crate::atoms::constants::SNAPSHOT_VERSION;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Identifier, MappingSource, ObservationSource};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingMeta {
    pub source: MappingSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMeta {
    pub name: String,
    pub source: ObservationSource,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub reverse: BTreeMap<String, String>,
    #[serde(default)]
    pub name_registry: BTreeMap<String, NameEntry>,
    #[serde(default)]
    pub identifier_names: BTreeMap<String, String>,
    #[serde(default)]
    pub mapping_meta: BTreeMap<String, MappingMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<BTreeMap<String, PendingMeta>>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Snapshot {
    pub fn capture(state: &ResolverState) -> Self {
        let ResolverState { registry, store, pending } = state;
        let mut mappings = BTreeMap::new();
        let mut reverse = BTreeMap::new();
        let mut mapping_meta = BTreeMap::new();
        for m in store.iter() {
            mappings.insert(m.pseudonymous.to_string(), m.canonical.to_string());
            reverse.insert(m.canonical.to_string(), m.pseudonymous.to_string());
            mapping_meta.insert(
                m.pseudonymous.to_string(),
                MappingMeta { source: m.source, created_at: m.created_at },
            );
        }
        Snapshot {
            version: SNAPSHOT_VERSION,
            mappings,
            reverse,
            name_registry: registry.entries().map(|(k, v)| (k.clone(), v.clone())).collect(),
            identifier_names: registry
                .latest_names()
                .into_iter()
                .map(|(id, name)| (id.to_string(), name))
                .collect(),
            mapping_meta,
            pending: Some(
                pending
                    .iter()
                    .map(|p| {
                        let meta = PendingMeta {
                            name: p.name.clone(),
                            source: p.source,
                            first_observed_at: p.first_observed_at,
                            last_observed_at: p.last_observed_at,
                        };
                        (p.canonical.to_string(), meta)
                    })
                    .collect(),
            ),
            last_updated: Utc::now(),
        }
    }

    /// Rebuild the resolver state. The forward index is authoritative; a
    /// drifted reverse index is rebuilt, not trusted. Pending entries for
    /// ids that are bound or no longer named are dropped.
    pub fn restore(self, loaded_at: DateTime<Utc>) -> EngineResult<ResolverState> {
        if self.version != SNAPSHOT_VERSION {
            return Err(EngineError::Snapshot(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }

        let mut store = MappingStore::new();
        for (p, c) in &self.mappings {
            let pseudonymous = Identifier::parse(p)?;
            let canonical = Identifier::parse(c)?;
            let (source, at) = match self.mapping_meta.get(p) {
                Some(meta) => (meta.source, meta.created_at),
                None => (MappingSource::ExactName, self.last_updated),
            };
            if !store.put(&pseudonymous, &canonical, source, at).is_applied() {
                warn!("[lid:snapshot] Dropped conflicting mapping {} → {}", p, c);
            }
        }

        let drifted = self.reverse.len() != store.len()
            || self.reverse.iter().any(|(c, p)| {
                let rebuilt = Identifier::parse(c).ok().and_then(|c| store.reverse(&c).cloned());
                rebuilt.map(|r| r.to_string()) != Some(p.clone())
            });
        if drifted {
            warn!("[lid:snapshot] Reverse index disagreed with mappings, rebuilt from forward index");
        }

        let latest: BTreeMap<Identifier, String> = self
            .identifier_names
            .iter()
            .filter_map(|(id, name)| Identifier::parse(id).ok().map(|id| (id, name.clone())))
            .collect();
        let registry = NameRegistry::from_parts(self.name_registry, &latest);

        let mut pending = PendingQueue::new();
        match self.pending {
            Some(entries) => {
                for (raw, meta) in entries {
                    let Ok(canonical) = Identifier::parse(&raw) else {
                        warn!("[lid:snapshot] Dropped unreadable pending id {}", raw);
                        continue;
                    };
                    if !canonical.is_canonical()
                        || store.is_bound(&canonical)
                        || registry.name_for_identifier(&canonical).is_none()
                    {
                        continue;
                    }
                    pending.offer(&canonical, &meta.name, meta.source, meta.first_observed_at);
                    pending.offer(&canonical, &meta.name, meta.source, meta.last_observed_at);
                }
            }
            None => {
                for (id, name) in registry.latest_names() {
                    if id.is_canonical() && !store.is_bound(&id) {
                        pending.offer(&id, &name, ObservationSource::ContactEvent, loaded_at);
                    }
                }
            }
        }

        Ok(ResolverState { registry, store, pending })
    }
}

// ── File I/O ───────────────────────────────────────────────────────────

/// `Ok(None)` when no snapshot exists yet.
pub fn load_snapshot(path: &Path) -> EngineResult<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&text)?;
    Ok(Some(snapshot))
}

pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension(format!("{}.tmp", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    std::fs::write(&tmp, json)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!("[lid:snapshot] Wrote {} mappings to {}", snapshot.mappings.len(), path.display());
    Ok(())
}
