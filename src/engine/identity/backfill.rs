// lidlink Identity — Transport-backed Resolution
//
// The only resolver paths that await: group membership fetches and
// directory lookups. Locks are never held across an await point; each
// fetched snapshot is folded in through the same write-locked path as any
// other observation.

use super::IdentityEngine;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Identifier, Mapping};
use crate::engine::ingest::{GroupSnapshot, Observation};
use crate::engine::transport::{ContactDirectory, ContactRecord, GroupFetcher};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub contexts_total: usize,
    pub contexts_processed: usize,
    pub contexts_failed: Vec<String>,
    pub members_seen: usize,
    pub mappings_created: usize,
    pub pending_contacts: usize,
}

impl IdentityEngine {
    /// Cached membership for `context_id`, fetching on a miss. The bool is
    /// true when the snapshot was freshly fetched (and still needs ingesting).
    async fn group_snapshot(
        &self,
        context_id: &str,
        fetcher: &dyn GroupFetcher,
        timeout: Duration,
        force_refresh: bool,
    ) -> EngineResult<(GroupSnapshot, bool)> {
        if !force_refresh {
            let cached = self.caches.lock().groups.get(&context_id.to_string());
            if let Some(snapshot) = cached {
                return Ok((snapshot, false));
            }
        }

        let snapshot = tokio::time::timeout(timeout, fetcher.fetch_group(context_id))
            .await
            .map_err(|_| EngineError::Timeout(context_id.to_string()))??;
        self.caches.lock().groups.insert(context_id.to_string(), snapshot.clone());
        Ok((snapshot, true))
    }

    /// Fold a membership snapshot into the registry and remember which LIDs
    /// of this context are now resolved.
    pub fn ingest_group(&self, snapshot: &GroupSnapshot) -> Vec<Mapping> {
        let created = self.observe(&Observation::GroupSnapshot(snapshot.clone()));

        let resolved: Vec<(Identifier, Identifier)> = {
            let state = self.state.read();
            snapshot
                .members
                .iter()
                .filter_map(|m| self.parse(&m.identifier).ok())
                .filter(|id| id.is_pseudonymous())
                .filter_map(|id| state.store.get(&id).cloned().map(|c| (id, c)))
                .collect()
        };
        let mut caches = self.caches.lock();
        for (lid, canonical) in resolved {
            caches.participants.insert((snapshot.context_id.clone(), lid), canonical);
        }
        created
    }

    /// Fetch and ingest each context in turn. Failures and timeouts skip
    /// that context; the rest of the batch continues.
    pub async fn backfill(
        &self,
        contexts: &[String],
        fetcher: &dyn GroupFetcher,
        timeout: Duration,
    ) -> BackfillReport {
        let mut report = BackfillReport { contexts_total: contexts.len(), ..Default::default() };
        info!("[lid:backfill] Processing {} groups", contexts.len());

        for context_id in contexts {
            match self.group_snapshot(context_id, fetcher, timeout, false).await {
                Ok((snapshot, fetched)) => {
                    report.contexts_processed += 1;
                    report.members_seen += snapshot.members.len();
                    if fetched {
                        report.mappings_created += self.ingest_group(&snapshot).len();
                    }
                    debug!(
                        "[lid:backfill] {} ({} members)",
                        snapshot.subject.as_deref().unwrap_or(context_id),
                        snapshot.members.len()
                    );
                }
                Err(e) => {
                    warn!("[lid:backfill] Skipping {}: {}", context_id, e);
                    report.contexts_failed.push(context_id.clone());
                }
            }
        }

        report.pending_contacts = self.stats().pending_contacts;
        info!(
            "[lid:backfill] Done: {}/{} groups, {} members, {} new mappings, {} pending",
            report.contexts_processed,
            report.contexts_total,
            report.members_seen,
            report.mappings_created,
            report.pending_contacts
        );
        report
    }

    /// Re-fetch one context regardless of the snapshot cache, e.g. after a
    /// membership-change notification.
    pub async fn refresh_group(
        &self,
        context_id: &str,
        fetcher: &dyn GroupFetcher,
        timeout: Duration,
    ) -> EngineResult<Vec<Mapping>> {
        let (snapshot, _) = self.group_snapshot(context_id, fetcher, timeout, true).await?;
        Ok(self.ingest_group(&snapshot))
    }

    /// Resolve a participant seen in `context_id`: participant cache, then
    /// the mapping store, then the group's membership (fetched on a miss).
    pub async fn resolve_in_context(
        &self,
        context_id: &str,
        participant: &str,
        fetcher: &dyn GroupFetcher,
        timeout: Duration,
    ) -> Option<Identifier> {
        let id = self.parse(participant).ok()?;
        if id.is_canonical() {
            return Some(id);
        }

        let key = (context_id.to_string(), id.clone());
        let cached = self.caches.lock().participants.get(&key);
        if let Some(canonical) = cached {
            return Some(canonical);
        }
        let known = self.state.read().store.get(&id).cloned();
        if let Some(canonical) = known {
            self.caches.lock().participants.insert(key, canonical.clone());
            return Some(canonical);
        }

        match self.group_snapshot(context_id, fetcher, timeout, false).await {
            Ok((snapshot, true)) => {
                self.ingest_group(&snapshot);
            }
            Ok((_, false)) => {}
            Err(e) => {
                warn!("[lid] Failed to fetch {} for LID resolution: {}", context_id, e);
                return None;
            }
        }

        let resolved = self.state.read().store.get(&id).cloned();
        if resolved.is_none() {
            debug!("[lid] Could not resolve {} in {}", id, context_id);
        }
        resolved
    }

    /// Directory metadata for any identifier. LIDs are resolved first; when
    /// the directory has nothing (or fails) the last cached record is used.
    pub async fn lookup_contact(
        &self,
        raw: &str,
        directory: &dyn ContactDirectory,
    ) -> Option<ContactRecord> {
        let id = self.parse(raw).ok()?;
        let cached = || self.caches.lock().contacts.get(&id);

        let Some(canonical) = self.resolve(raw) else {
            return cached();
        };
        match directory.lookup(&canonical).await {
            Ok(Some(record)) => {
                self.caches.lock().contacts.insert(id.clone(), record.clone());
                Some(record)
            }
            Ok(None) => cached(),
            Err(e) => {
                warn!("[lid] Directory lookup for {} failed: {}", canonical, e);
                cached()
            }
        }
    }
}
