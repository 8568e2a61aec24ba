// lidlink Engine — Identity Resolution
//
// Module layout:
//   names      — NameRegistry, normalize_name
//   mapping    — MappingStore (pseudonymous ⇄ canonical bijection)
//   pending    — PendingQueue (canonical ids awaiting a LID)
//   correlator — MatchStrategy chain (group backfill, exact, fuzzy)
//   snapshot   — versioned JSON persistence
//   backfill   — async paths that consult the transport (group fetch,
//                in-context resolution, directory lookups)
//
// `IdentityEngine` is the one owner of all resolver state. Every mutation
// takes the state write lock for its whole duration, so readers never see
// half of a forward/reverse pair.

pub mod backfill;
pub mod correlator;
pub mod mapping;
pub mod names;
pub mod pending;
pub mod snapshot;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    DisplayNameObservation, IdKind, Identifier, Mapping, MappingSource, PendingContact,
    ResolverStats,
};
use crate::engine::cache::ResolverCaches;
use crate::engine::config::ResolverConfig;
use crate::engine::ingest::{self, Observation};
use chrono::{DateTime, Utc};
use correlator::{CorrelationView, Correlator, Trigger, Verdict};
use log::{error, info, warn};
use mapping::{MappingStore, PutOutcome};
use names::{normalize_name, NameEntry, NameRegistry};
use parking_lot::{Mutex, RwLock};
use pending::PendingQueue;
use snapshot::{load_snapshot, save_snapshot, Snapshot};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub use backfill::BackfillReport;

// ── State ──────────────────────────────────────────────────────────────

/// The three structures mutated together under one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub registry: NameRegistry,
    pub store: MappingStore,
    pub pending: PendingQueue,
}

impl ResolverState {
    fn view(&self) -> CorrelationView<'_> {
        CorrelationView { registry: &self.registry, store: &self.store, pending: &self.pending }
    }
}

// ── Engine ─────────────────────────────────────────────────────────────

pub struct IdentityEngine {
    state: RwLock<ResolverState>,
    caches: Mutex<ResolverCaches>,
    correlator: Correlator,
    dirty: AtomicBool,
    snapshot_path: PathBuf,
    retention: chrono::Duration,
    trunk_country_code: Option<String>,
}

impl IdentityEngine {
    /// Empty engine; nothing is read from disk.
    pub fn new(config: &ResolverConfig) -> Self {
        IdentityEngine {
            state: RwLock::new(ResolverState::default()),
            caches: Mutex::new(ResolverCaches::new(&config.cache)),
            correlator: Correlator::from_config(&config.strategies),
            dirty: AtomicBool::new(false),
            snapshot_path: config.snapshot_path(),
            retention: config.pending_retention(),
            trunk_country_code: config.trunk_country_code.clone(),
        }
    }

    /// Engine seeded from the snapshot on disk. A corrupt or unreadable
    /// snapshot is logged and the engine starts empty.
    pub fn open(config: &ResolverConfig) -> Self {
        let engine = Self::new(config);
        match engine.load() {
            Ok(true) => {}
            Ok(false) => info!("[lid] No existing mappings at {}", engine.snapshot_path.display()),
            Err(e) => error!(
                "[lid] Could not load {} ({}), starting empty",
                engine.snapshot_path.display(),
                e
            ),
        }
        engine
    }

    fn load(&self) -> EngineResult<bool> {
        let Some(snapshot) = load_snapshot(&self.snapshot_path)? else {
            return Ok(false);
        };
        let restored = snapshot.restore(Utc::now())?;
        let mut state = self.state.write();
        *state = restored;
        info!(
            "[lid] Loaded {} mappings, {} names, {} pending from {}",
            state.store.len(),
            state.registry.name_count(),
            state.pending.len(),
            self.snapshot_path.display()
        );
        Ok(true)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    fn parse(&self, raw: &str) -> EngineResult<Identifier> {
        Identifier::parse_with_trunk(raw, self.trunk_country_code.as_deref())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    // ── Ingest ─────────────────────────────────────────────────────────

    /// Fold one transport event into the registry. Returns mappings created.
    pub fn observe(&self, observation: &Observation) -> Vec<Mapping> {
        self.observe_at(observation, Utc::now())
    }

    pub fn observe_at(&self, observation: &Observation, at: DateTime<Utc>) -> Vec<Mapping> {
        let records = ingest::normalize(observation, at, self.trunk_country_code.as_deref());
        if records.is_empty() {
            return vec![];
        }
        let mut state = self.state.write();
        records.iter().filter_map(|obs| self.apply(&mut state, obs)).collect()
    }

    /// Record a single display-name observation.
    pub fn record(&self, observation: &DisplayNameObservation) -> Option<Mapping> {
        let mut state = self.state.write();
        self.apply(&mut state, observation)
    }

    /// Replay stored history in arrival order. Returns mappings created.
    pub fn ingest_history<I>(&self, observations: I) -> usize
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut processed = 0usize;
        let mut created = 0usize;
        for observation in observations {
            processed += 1;
            created += self.observe(&observation).len();
        }
        info!("[lid] Replayed {} events, {} new mappings", processed, created);
        created
    }

    fn apply(&self, state: &mut ResolverState, obs: &DisplayNameObservation) -> Option<Mapping> {
        let name = normalize_name(&obs.name)?;
        let id = &obs.identifier;
        if state.registry.record(id, &name) {
            self.mark_dirty();
        }

        let verdict = self.correlator.correlate(
            &Trigger { identifier: id, name: &name, source: obs.source },
            &state.view(),
        );
        let created = match verdict {
            Verdict::Matched { pseudonymous, canonical, source } => {
                self.commit(state, &pseudonymous, &canonical, source, obs.observed_at, &name)
            }
            Verdict::Ambiguous(_) | Verdict::Abstain => None,
        };

        if id.kind() == IdKind::Canonical && !state.store.is_bound(id) {
            state.pending.offer(id, &name, obs.source, obs.observed_at);
            self.mark_dirty();
        }
        created
    }

    fn commit(
        &self,
        state: &mut ResolverState,
        pseudonymous: &Identifier,
        canonical: &Identifier,
        source: MappingSource,
        at: DateTime<Utc>,
        name: &str,
    ) -> Option<Mapping> {
        if !state.store.put(pseudonymous, canonical, source, at).is_applied() {
            return None;
        }
        state.pending.remove(canonical);
        self.mark_dirty();
        info!(
            "[lid] Mapping created: {} → {} via {} ('{}')",
            pseudonymous, canonical, source, name
        );
        state.store.mapping(pseudonymous).cloned()
    }

    // ── Housekeeping ───────────────────────────────────────────────────

    /// Evict pending contacts past retention and retract their unmatched
    /// name evidence, then purge expired cache entries.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let evicted = {
            let mut state = self.state.write();
            let evicted = state.pending.sweep(now, self.retention);
            for contact in &evicted {
                if state.store.is_bound(&contact.canonical) {
                    continue;
                }
                for name in state.registry.names_for(&contact.canonical) {
                    state.registry.retract(&contact.canonical, &name);
                }
            }
            evicted.len()
        };
        if evicted > 0 {
            self.mark_dirty();
            info!("[lid] Evicted {} stale pending contacts", evicted);
        }
        self.caches.lock().purge_expired(Instant::now());
        evicted
    }

    /// Write the snapshot if anything changed since the last flush.
    pub fn flush(&self) -> EngineResult<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        match self.write_snapshot() {
            Ok(()) => Ok(true),
            Err(e) => {
                self.mark_dirty();
                Err(e)
            }
        }
    }

    /// Write the snapshot unconditionally.
    pub fn flush_now(&self) -> EngineResult<()> {
        self.dirty.store(false, Ordering::Release);
        self.write_snapshot().inspect_err(|_| self.mark_dirty())
    }

    fn write_snapshot(&self) -> EngineResult<()> {
        let snapshot = self.snapshot();
        save_snapshot(&self.snapshot_path, &snapshot)
    }

    /// Consistent copy of the persisted state.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot::capture(&state)
    }

    /// Wipe every mapping, name and pending contact, and delete the file.
    pub fn clear(&self) -> EngineResult<()> {
        {
            let mut state = self.state.write();
            state.registry.clear();
            state.store.clear();
            state.pending.clear();
        }
        self.caches.lock().clear();
        self.dirty.store(false, Ordering::Release);
        if self.snapshot_path.exists() {
            std::fs::remove_file(&self.snapshot_path)?;
        }
        warn!("[lid] All LID mappings cleared");
        Ok(())
    }

    // ── Query API ──────────────────────────────────────────────────────

    /// Canonical ids resolve to themselves; LIDs through the mapping store.
    pub fn resolve(&self, raw: &str) -> Option<Identifier> {
        let id = self.parse(raw).ok()?;
        match id.kind() {
            IdKind::Canonical => Some(id),
            IdKind::Pseudonymous => self.state.read().store.get(&id).cloned(),
        }
    }

    pub fn reverse_lookup(&self, raw: &str) -> Option<Identifier> {
        let id = self.parse(raw).ok().filter(|id| id.is_canonical())?;
        self.state.read().store.reverse(&id).cloned()
    }

    pub fn names_for(&self, raw: &str) -> BTreeSet<String> {
        match self.parse(raw) {
            Ok(id) => self.state.read().registry.names_for(&id),
            Err(_) => BTreeSet::new(),
        }
    }

    pub fn name_for_identifier(&self, raw: &str) -> Option<String> {
        let id = self.parse(raw).ok()?;
        self.state.read().registry.name_for_identifier(&id).map(String::from)
    }

    pub fn identifiers_for_name(&self, name: &str) -> NameEntry {
        self.state.read().registry.identifiers_for_name(name)
    }

    pub fn mapping_for(&self, raw: &str) -> Option<Mapping> {
        let id = self.parse(raw).ok()?;
        self.state.read().store.mapping(&id).cloned()
    }

    pub fn mappings(&self) -> Vec<Mapping> {
        self.state.read().store.iter().cloned().collect()
    }

    pub fn pending_contacts(&self) -> Vec<PendingContact> {
        self.state.read().pending.iter().cloned().collect()
    }

    /// Administrative override: always binds `pseudonymous` to `canonical`,
    /// displacing conflicting mappings on either side.
    pub fn force_map(&self, pseudonymous: &str, canonical: &str, name: Option<&str>) -> EngineResult<Mapping> {
        let p = self.parse(pseudonymous)?;
        let c = self.parse(canonical)?;
        if !p.is_pseudonymous() {
            return Err(EngineError::InvalidIdentifier(format!("{} is not a LID", p)));
        }
        if !c.is_canonical() {
            return Err(EngineError::InvalidIdentifier(format!("{} is not a phone number", c)));
        }

        let (mapping, displaced) = {
            let mut state = self.state.write();
            let displaced: Vec<Identifier> = match state.store.put(&p, &c, MappingSource::Forced, Utc::now()) {
                PutOutcome::Replaced(old) => old.into_iter().map(|m| m.pseudonymous).collect(),
                PutOutcome::Rejected(reason) => return Err(EngineError::InvalidIdentifier(reason)),
                PutOutcome::Created | PutOutcome::Unchanged => Vec::new(),
            };
            state.pending.remove(&c);
            if let Some(name) = name.and_then(normalize_name) {
                state.registry.record(&p, &name);
                state.registry.record(&c, &name);
            }
            let mapping = state
                .store
                .mapping(&p)
                .cloned()
                .ok_or_else(|| EngineError::Other(format!("forced mapping {} vanished", p)))?;
            (mapping, displaced)
        };
        {
            // Cached routes through either side of the old pairs are stale.
            let mut caches = self.caches.lock();
            caches
                .participants
                .retain(|(_, lid), canon| *lid != p && *canon != c && !displaced.contains(lid));
            caches.contacts.retain(|id, _| *id != p && !displaced.contains(id));
        }
        self.mark_dirty();
        info!("[lid] Manual mapping created: {} → {}", p, c);
        Ok(mapping)
    }

    pub fn stats(&self) -> ResolverStats {
        let (total_mappings, pending_contacts, total_names, total_identifiers) = {
            let state = self.state.read();
            (
                state.store.len(),
                state.pending.len(),
                state.registry.name_count(),
                state.registry.identifier_count(),
            )
        };
        let caches = self.caches.lock();
        ResolverStats {
            total_mappings,
            pending_contacts,
            total_names,
            total_identifiers,
            group_snapshots: caches.groups.stats(),
            participants: caches.participants.stats(),
            contacts: caches.contacts.stats(),
        }
    }

    /// Forward and reverse indexes agree.
    pub fn is_consistent(&self) -> bool {
        self.state.read().store.is_consistent()
    }

    /// Copy of the full in-memory state, pending contacts included.
    pub fn clone_state(&self) -> ResolverState {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::ObservationSource;
    use crate::engine::ingest::{ContactUpdate, GroupMember, GroupSnapshot, MessageReceipt};

    fn engine() -> IdentityEngine {
        IdentityEngine::new(&ResolverConfig::in_dir("/nonexistent/lidlink-test"))
    }

    fn seen(raw: &str, name: &str) -> DisplayNameObservation {
        DisplayNameObservation::new(Identifier::parse(raw).unwrap(), name, ObservationSource::Message)
    }

    #[test]
    fn exact_match_scenario() {
        let e = engine();
        e.record(&seen("80444922015783@lid", "John Doe"));
        let created = e.record(&seen("6281130569787@s.whatsapp.net", "John Doe"));
        assert_eq!(created.map(|m| m.source), Some(MappingSource::ExactName));
        assert_eq!(e.resolve("80444922015783@lid").unwrap().as_str(), "6281130569787");
        assert_eq!(e.reverse_lookup("6281130569787").unwrap().as_str(), "80444922015783@lid");
        assert!(e.pending_contacts().is_empty());
    }

    #[test]
    fn exact_match_is_order_independent() {
        let e = engine();
        e.record(&seen("6281130569787", "john doe"));
        assert_eq!(e.pending_contacts().len(), 1);
        e.record(&seen("80444922015783@lid", "JOHN  DOE"));
        assert_eq!(e.resolve("80444922015783@lid").unwrap().as_str(), "6281130569787");
        assert!(e.pending_contacts().is_empty());
    }

    #[test]
    fn ambiguity_scenario() {
        let e = engine();
        e.record(&seen("111", "Jane"));
        e.record(&seen("222", "Jane"));
        e.record(&seen("lid1", "Jane"));
        assert_eq!(e.resolve("lid1"), None);
        assert_eq!(e.stats().total_mappings, 0);
    }

    #[test]
    fn fuzzy_match_scenario() {
        let e = engine();
        e.record(&seen("333", "Agam Wiliam"));
        let created = e.record(&seen("lid2", "Agam William")).unwrap();
        assert_eq!(created.source, MappingSource::FuzzyName);
        assert_eq!(e.resolve("lid2").unwrap().as_str(), "333");
    }

    #[test]
    fn canonical_resolves_to_itself() {
        let e = engine();
        assert_eq!(e.resolve("+62 811-3056").unwrap().as_str(), "628113056");
        assert_eq!(e.resolve("unknown@lid"), None);
        assert_eq!(e.resolve("1203630@g.us"), None);
    }

    #[test]
    fn record_twice_leaves_registry_unchanged() {
        let e = engine();
        let obs = seen("lid1", "Jane");
        e.record(&obs);
        let once = e.clone_state().registry;
        e.record(&obs);
        assert_eq!(e.clone_state().registry, once);
    }

    #[test]
    fn automatic_mapping_is_not_overwritten() {
        let e = engine();
        e.record(&seen("lidA", "Budi"));
        e.record(&seen("111", "Budi"));
        // Same LID later observed under a name shared with another number.
        e.record(&seen("222", "Budi Santoso"));
        e.record(&seen("lidA", "Budi Santoso"));
        assert_eq!(e.resolve("lidA").unwrap().as_str(), "111");
        assert!(e.is_consistent());
    }

    #[test]
    fn force_map_overrides_and_records_name() {
        let e = engine();
        e.record(&seen("lidX", "Rina"));
        e.record(&seen("111", "Rina"));
        assert_eq!(e.resolve("lidX").unwrap().as_str(), "111");

        let m = e.force_map("lidX", "999", Some("Rina K")).unwrap();
        assert_eq!(m.source, MappingSource::Forced);
        assert_eq!(e.resolve("lidX").unwrap().as_str(), "999");
        assert_eq!(e.reverse_lookup("111"), None);
        assert!(e.names_for("999").contains("rina k"));
        assert!(e.is_consistent());
    }

    #[test]
    fn force_map_rejects_swapped_arguments() {
        let e = engine();
        assert!(e.force_map("999", "lidX", None).is_err());
    }

    #[test]
    fn sweep_evicts_and_retracts_evidence() {
        let e = engine();
        let old = Utc::now() - chrono::Duration::hours(25);
        e.record(&seen("444", "Dewi").at(old));
        assert_eq!(e.pending_contacts().len(), 1);

        assert_eq!(e.sweep(Utc::now()), 1);
        assert!(e.pending_contacts().is_empty());

        e.record(&seen("lid4", "Dewi"));
        assert_eq!(e.resolve("lid4"), None);
    }

    #[test]
    fn observe_group_snapshot_promotes_pending() {
        let e = engine();
        e.observe(&Observation::ContactEvent(ContactUpdate {
            identifier: "555@s.whatsapp.net".into(),
            display_name: Some("Rina".into()),
        }));
        e.observe(&Observation::ContactEvent(ContactUpdate {
            identifier: "556@s.whatsapp.net".into(),
            display_name: Some("Rina".into()),
        }));
        // 556 gets mapped elsewhere, leaving 555 as the only pending "rina".
        e.force_map("other@lid", "556", None).unwrap();

        let created = e.observe(&Observation::GroupSnapshot(GroupSnapshot {
            context_id: "g1@g.us".into(),
            subject: None,
            members: vec![GroupMember { identifier: "lid9@lid".into(), display_name: Some("Rina".into()) }],
        }));
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].source, MappingSource::GroupBackfill);
        assert_eq!(e.resolve("lid9@lid").unwrap().as_str(), "555");
    }

    #[test]
    fn self_messages_are_ignored() {
        let e = engine();
        let created = e.observe(&Observation::Message(MessageReceipt {
            context_id: "111@s.whatsapp.net".into(),
            sender_id: "111@s.whatsapp.net".into(),
            is_self: true,
            display_name: Some("Me".into()),
        }));
        assert!(created.is_empty());
        assert_eq!(e.stats().total_identifiers, 0);
    }

    #[test]
    fn flush_writes_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolverConfig::in_dir(dir.path());
        let e = IdentityEngine::new(&config);
        assert!(!e.flush().unwrap());
        e.record(&seen("lidA", "Budi"));
        assert!(e.flush().unwrap());
        assert!(!e.flush().unwrap());
        assert!(config.snapshot_path().exists());
    }

    #[test]
    fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolverConfig::in_dir(dir.path());
        std::fs::write(config.snapshot_path(), "{ not json").unwrap();
        let e = IdentityEngine::open(&config);
        assert_eq!(e.stats().total_mappings, 0);
    }

    #[test]
    fn clear_removes_state_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolverConfig::in_dir(dir.path());
        let e = IdentityEngine::new(&config);
        e.force_map("lidA", "111", Some("Budi")).unwrap();
        e.flush_now().unwrap();
        e.clear().unwrap();
        assert!(!config.snapshot_path().exists());
        assert_eq!(e.stats(), ResolverStats::default());
    }
}
