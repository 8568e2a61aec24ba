// lidlink Identity — Correlator
//
// Decides when name evidence is strong enough to bind a pseudonymous id to
// a canonical one. Strategies run in a fixed chain:
//
//   GroupBackfill → Exact → Fuzzy
//
// The first strategy that returns `Matched` or `Ambiguous` ends the chain.
// `Ambiguous` means "several candidates": nothing is created, the case is
// logged, and the next observation touching the name retries it.
//
// Strategies only read state. The engine commits a `Matched` verdict
// through the mapping store, which refuses to overwrite existing bindings.

use super::mapping::MappingStore;
use super::names::{NameEntry, NameRegistry};
use super::pending::PendingQueue;
use crate::atoms::types::{IdKind, Identifier, MappingSource, ObservationSource};
use crate::engine::config::StrategyConfig;
use log::info;
use std::collections::BTreeSet;

// ── Verdicts ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Matched {
        pseudonymous: Identifier,
        canonical: Identifier,
        source: MappingSource,
    },
    Ambiguous(String),
    Abstain,
}

/// Read-only view over the three resolver structures.
pub struct CorrelationView<'a> {
    pub registry: &'a NameRegistry,
    pub store: &'a MappingStore,
    pub pending: &'a PendingQueue,
}

/// The observation that changed a name's evidence set.
pub struct Trigger<'a> {
    pub identifier: &'a Identifier,
    /// Normalized name.
    pub name: &'a str,
    pub source: ObservationSource,
}

pub trait MatchStrategy: Send + Sync {
    fn label(&self) -> &'static str;
    fn propose(&self, trigger: &Trigger<'_>, view: &CorrelationView<'_>) -> Verdict;
}

// ── Similarity ─────────────────────────────────────────────────────────

/// `(maxLen - editDistance) / maxLen` over Unicode scalar values.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    (max_len.saturating_sub(distance)) as f64 / max_len as f64
}

fn unbound<'a>(
    ids: &'a BTreeSet<Identifier>,
    store: &'a MappingStore,
) -> impl Iterator<Item = &'a Identifier> + 'a {
    ids.iter().filter(move |id| !store.is_bound(id))
}

// ── Exact ──────────────────────────────────────────────────────────────

pub struct ExactName;

impl MatchStrategy for ExactName {
    fn label(&self) -> &'static str {
        "exact"
    }

    fn propose(&self, trigger: &Trigger<'_>, view: &CorrelationView<'_>) -> Verdict {
        let Some(entry) = view.registry.entry(trigger.name) else {
            return Verdict::Abstain;
        };
        let open_pseudo: Vec<&Identifier> = unbound(&entry.pseudonymous, view.store).collect();
        if open_pseudo.is_empty() || entry.canonical.is_empty() {
            return Verdict::Abstain;
        }

        if entry.canonical.len() > 1 {
            return Verdict::Ambiguous(format!(
                "{} canonical ids share '{}'",
                entry.canonical.len(),
                trigger.name
            ));
        }
        if open_pseudo.len() > 1 {
            return Verdict::Ambiguous(format!(
                "{} unmapped LIDs share '{}'",
                open_pseudo.len(),
                trigger.name
            ));
        }

        let canonical = entry.canonical.iter().next().cloned();
        match canonical {
            Some(c) if view.store.is_bound(&c) => Verdict::Ambiguous(format!(
                "'{}' canonical {} already bound to another LID",
                trigger.name, c
            )),
            Some(c) => Verdict::Matched {
                pseudonymous: open_pseudo[0].clone(),
                canonical: c,
                source: MappingSource::ExactName,
            },
            None => Verdict::Abstain,
        }
    }
}

// ── Fuzzy ──────────────────────────────────────────────────────────────

pub struct FuzzyName {
    pub threshold: f64,
}

impl FuzzyName {
    /// Other names scoring at or above the threshold that satisfy `keep`.
    fn candidates<'a>(
        &self,
        name: &str,
        registry: &'a NameRegistry,
        keep: impl Fn(&NameEntry) -> bool,
    ) -> Vec<(&'a String, &'a NameEntry)> {
        registry
            .entries()
            .filter(|(other, _)| other.as_str() != name)
            .filter(|(_, entry)| keep(entry))
            .filter(|(other, _)| similarity(name, other) >= self.threshold)
            .collect()
    }
}

impl MatchStrategy for FuzzyName {
    fn label(&self) -> &'static str {
        "fuzzy"
    }

    fn propose(&self, trigger: &Trigger<'_>, view: &CorrelationView<'_>) -> Verdict {
        let id = trigger.identifier;
        if view.store.is_bound(id) {
            return Verdict::Abstain;
        }
        let Some(own) = view.registry.entry(trigger.name) else {
            return Verdict::Abstain;
        };
        let store = view.store;

        match id.kind() {
            IdKind::Pseudonymous => {
                // Names with canonical evidence of their own are exact-pass territory.
                if !own.canonical.is_empty() || unbound(&own.pseudonymous, store).count() != 1 {
                    return Verdict::Abstain;
                }
                let found = self.candidates(trigger.name, view.registry, |e| {
                    unbound(&e.canonical, store).next().is_some()
                });
                match found.as_slice() {
                    [] => Verdict::Abstain,
                    [(other, entry)] => {
                        let open: Vec<&Identifier> = unbound(&entry.canonical, store).collect();
                        if entry.canonical.len() != 1 || open.len() != 1 {
                            return Verdict::Ambiguous(format!(
                                "'{}' ≈ '{}' which has {} canonical ids",
                                trigger.name,
                                other,
                                entry.canonical.len()
                            ));
                        }
                        Verdict::Matched {
                            pseudonymous: id.clone(),
                            canonical: open[0].clone(),
                            source: MappingSource::FuzzyName,
                        }
                    }
                    many => Verdict::Ambiguous(format!(
                        "'{}' is similar to {} names",
                        trigger.name,
                        many.len()
                    )),
                }
            }
            IdKind::Canonical => {
                if !own.pseudonymous.is_empty() || own.canonical.len() != 1 {
                    return Verdict::Abstain;
                }
                let found = self.candidates(trigger.name, view.registry, |e| {
                    e.canonical.is_empty() && unbound(&e.pseudonymous, store).next().is_some()
                });
                match found.as_slice() {
                    [] => Verdict::Abstain,
                    [(other, entry)] => {
                        let open: Vec<&Identifier> = unbound(&entry.pseudonymous, store).collect();
                        if open.len() != 1 {
                            return Verdict::Ambiguous(format!(
                                "'{}' ≈ '{}' which has {} unmapped LIDs",
                                trigger.name,
                                other,
                                open.len()
                            ));
                        }
                        Verdict::Matched {
                            pseudonymous: open[0].clone(),
                            canonical: id.clone(),
                            source: MappingSource::FuzzyName,
                        }
                    }
                    many => Verdict::Ambiguous(format!(
                        "'{}' is similar to {} names",
                        trigger.name,
                        many.len()
                    )),
                }
            }
        }
    }
}

// ── Group backfill ─────────────────────────────────────────────────────

/// A LID seen in a group snapshot whose name equals exactly one pending
/// contact. Co-membership plus an identical name counts as strong evidence.
pub struct GroupBackfill;

impl MatchStrategy for GroupBackfill {
    fn label(&self) -> &'static str {
        "group-backfill"
    }

    fn propose(&self, trigger: &Trigger<'_>, view: &CorrelationView<'_>) -> Verdict {
        let id = trigger.identifier;
        if trigger.source != ObservationSource::GroupSnapshot
            || !id.is_pseudonymous()
            || view.store.is_bound(id)
        {
            return Verdict::Abstain;
        }
        match view.pending.resolve_against(id, trigger.name) {
            Some(canonical) if !view.store.is_bound(canonical) => Verdict::Matched {
                pseudonymous: id.clone(),
                canonical: canonical.clone(),
                source: MappingSource::GroupBackfill,
            },
            _ => Verdict::Abstain,
        }
    }
}

// ── Correlator ─────────────────────────────────────────────────────────

pub struct Correlator {
    strategies: Vec<Box<dyn MatchStrategy>>,
}

impl Correlator {
    pub fn new(strategies: Vec<Box<dyn MatchStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        let mut strategies: Vec<Box<dyn MatchStrategy>> = Vec::new();
        if config.group_backfill {
            strategies.push(Box::new(GroupBackfill));
        }
        if config.exact {
            strategies.push(Box::new(ExactName));
        }
        if config.fuzzy {
            strategies.push(Box::new(FuzzyName { threshold: config.fuzzy_threshold }));
        }
        Self::new(strategies)
    }

    #[cfg(test)]
    fn labels(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.label()).collect()
    }

    pub fn correlate(&self, trigger: &Trigger<'_>, view: &CorrelationView<'_>) -> Verdict {
        for strategy in &self.strategies {
            match strategy.propose(trigger, view) {
                Verdict::Abstain => continue,
                Verdict::Ambiguous(reason) => {
                    info!(
                        "[lid:correlator] Unresolved ({}) for {}: {}",
                        strategy.label(),
                        trigger.identifier,
                        reason
                    );
                    return Verdict::Ambiguous(reason);
                }
                matched => return matched,
            }
        }
        Verdict::Abstain
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::from_config(&StrategyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    struct Fixture {
        registry: NameRegistry,
        store: MappingStore,
        pending: PendingQueue,
    }

    impl Fixture {
        fn new() -> Self {
            Self { registry: NameRegistry::new(), store: MappingStore::new(), pending: PendingQueue::new() }
        }

        fn see(&mut self, raw: &str, name: &str) -> Identifier {
            let i = id(raw);
            self.registry.record(&i, name);
            i
        }

        fn run(&self, c: &Correlator, trigger: &Identifier, name: &str, source: ObservationSource) -> Verdict {
            let view = CorrelationView { registry: &self.registry, store: &self.store, pending: &self.pending };
            c.correlate(&Trigger { identifier: trigger, name, source }, &view)
        }
    }

    #[test]
    fn similarity_matches_formula() {
        assert!((similarity("agam wiliam", "agam william") - 11.0 / 12.0).abs() < 1e-9);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn exact_pass_maps_single_pair() {
        let mut f = Fixture::new();
        let lid = f.see("80444922015783@lid", "john doe");
        f.see("6281130569787", "john doe");
        let v = f.run(&Correlator::default(), &lid, "john doe", ObservationSource::Message);
        assert_eq!(
            v,
            Verdict::Matched {
                pseudonymous: lid,
                canonical: id("6281130569787"),
                source: MappingSource::ExactName
            }
        );
    }

    #[test]
    fn exact_pass_refuses_multiple_canonicals() {
        let mut f = Fixture::new();
        f.see("111", "jane");
        f.see("222", "jane");
        let lid = f.see("lid1", "jane");
        let v = f.run(&Correlator::default(), &lid, "jane", ObservationSource::Message);
        assert!(matches!(v, Verdict::Ambiguous(_)));
    }

    #[test]
    fn fuzzy_pass_maps_near_name() {
        let mut f = Fixture::new();
        f.see("333", "agam wiliam");
        let lid = f.see("lid2", "agam william");
        let v = f.run(&Correlator::default(), &lid, "agam william", ObservationSource::Message);
        assert!(matches!(v, Verdict::Matched { source: MappingSource::FuzzyName, .. }));
    }

    #[test]
    fn fuzzy_pass_works_from_canonical_side() {
        let mut f = Fixture::new();
        f.see("lid2", "agam william");
        let c = f.see("333", "agam wiliam");
        let v = f.run(&Correlator::default(), &c, "agam wiliam", ObservationSource::ContactEvent);
        assert_eq!(
            v,
            Verdict::Matched {
                pseudonymous: id("lid2"),
                canonical: c,
                source: MappingSource::FuzzyName
            }
        );
    }

    #[test]
    fn fuzzy_pass_refuses_two_candidates() {
        let mut f = Fixture::new();
        f.see("333", "agam wiliam");
        f.see("444", "agam willam");
        let lid = f.see("lid2", "agam william");
        let v = f.run(&Correlator::default(), &lid, "agam william", ObservationSource::Message);
        assert!(matches!(v, Verdict::Ambiguous(_)));
    }

    #[test]
    fn fuzzy_pass_ignores_dissimilar_names() {
        let mut f = Fixture::new();
        f.see("333", "budi santoso");
        let lid = f.see("lid2", "agam william");
        let v = f.run(&Correlator::default(), &lid, "agam william", ObservationSource::Message);
        assert_eq!(v, Verdict::Abstain);
    }

    #[test]
    fn disabled_fuzzy_strategy_abstains() {
        let mut f = Fixture::new();
        f.see("333", "agam wiliam");
        let lid = f.see("lid2", "agam william");
        let config = StrategyConfig { fuzzy: false, ..Default::default() };
        let c = Correlator::from_config(&config);
        assert_eq!(c.labels(), vec!["group-backfill", "exact"]);
        assert_eq!(f.run(&c, &lid, "agam william", ObservationSource::Message), Verdict::Abstain);
    }

    #[test]
    fn group_backfill_promotes_pending_only_for_snapshots() {
        let mut f = Fixture::new();
        let c = f.see("555", "rina");
        f.pending.offer(&c, "rina", ObservationSource::GroupSnapshot, Utc::now());
        f.see("999", "rina");
        let lid = f.see("lid9", "rina");

        // Two canonicals share the name: the exact pass alone would refuse.
        let from_message = f.run(&Correlator::default(), &lid, "rina", ObservationSource::Message);
        assert!(matches!(from_message, Verdict::Ambiguous(_)));

        let from_group = f.run(&Correlator::default(), &lid, "rina", ObservationSource::GroupSnapshot);
        assert_eq!(
            from_group,
            Verdict::Matched { pseudonymous: lid, canonical: c, source: MappingSource::GroupBackfill }
        );
    }
}
