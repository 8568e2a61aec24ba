// End-to-end behaviour of the resolver through its public API: the
// correlation scenarios, persistence through a real file, and the service
// lifecycle.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use lidlink::engine::ingest::{ContactUpdate, GroupMember, GroupSnapshot, MessageReceipt};
use lidlink::engine::transport::GroupFetcher;
use lidlink::{
    DisplayNameObservation, EngineError, EngineResult, IdentityEngine, Identifier, MappingSource,
    Observation, ObservationSource, ResolverConfig, ResolverService,
};
use std::sync::Arc;

fn message(sender: &str, name: &str) -> Observation {
    Observation::Message(MessageReceipt {
        context_id: "120363041234567890@g.us".into(),
        sender_id: sender.into(),
        is_self: false,
        display_name: Some(name.into()),
    })
}

fn contact(id: &str, name: &str) -> Observation {
    Observation::ContactEvent(ContactUpdate { identifier: id.into(), display_name: Some(name.into()) })
}

fn engine_in(dir: &tempfile::TempDir) -> (ResolverConfig, IdentityEngine) {
    let config = ResolverConfig::in_dir(dir.path());
    let engine = IdentityEngine::open(&config);
    (config, engine)
}

fn assert_bijection(engine: &IdentityEngine) {
    assert!(engine.is_consistent());
    for m in engine.mappings() {
        assert_eq!(engine.resolve(m.pseudonymous.as_str()).as_ref(), Some(&m.canonical));
        assert_eq!(engine.reverse_lookup(m.canonical.as_str()).as_ref(), Some(&m.pseudonymous));
    }
}

#[test]
fn exact_match_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);

    engine.observe(&message("80444922015783@lid", "John Doe"));
    engine.observe(&message("6281130569787@s.whatsapp.net", "John Doe"));

    let resolved = engine.resolve("80444922015783@lid").unwrap();
    assert_eq!(resolved.as_str(), "6281130569787");
    assert_eq!(engine.mapping_for("80444922015783@lid").unwrap().source, MappingSource::ExactName);
    assert_bijection(&engine);
}

#[test]
fn ambiguity_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);

    engine.observe(&contact("111", "Jane"));
    engine.observe(&contact("222", "Jane"));
    let created = engine.observe(&message("lid1", "Jane"));

    assert!(created.is_empty());
    assert!(engine.resolve("lid1").is_none());
    assert_eq!(engine.stats().total_mappings, 0);
}

#[test]
fn fuzzy_match_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);

    engine.observe(&contact("333", "Agam Wiliam"));
    engine.observe(&message("lid2", "Agam William"));

    let mapping = engine.mapping_for("lid2").unwrap();
    assert_eq!(mapping.canonical.as_str(), "333");
    assert_eq!(mapping.source, MappingSource::FuzzyName);
}

#[test]
fn fuzzy_outcome_depends_on_arrival_order() {
    let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let (_, lid_first) = engine_in(&dir_a);
    let (_, rival_first) = engine_in(&dir_b);

    // A similar second name arriving after the LID cannot undo the match.
    lid_first.observe(&contact("333", "Agam Wiliam"));
    lid_first.observe(&message("lid2@lid", "Agam William"));
    lid_first.observe(&contact("444", "Agam Willem"));
    assert_eq!(lid_first.resolve("lid2@lid").unwrap().as_str(), "333");
    assert_eq!(lid_first.mapping_for("lid2@lid").unwrap().source, MappingSource::FuzzyName);

    // Arriving before it, the same name makes the fuzzy pass ambiguous.
    rival_first.observe(&contact("333", "Agam Wiliam"));
    rival_first.observe(&contact("444", "Agam Willem"));
    rival_first.observe(&message("lid2@lid", "Agam William"));
    assert!(rival_first.resolve("lid2@lid").is_none());
}

#[test]
fn eviction_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);
    let long_ago = Utc::now() - ChronoDuration::hours(30);

    engine.observe_at(&contact("444", "Dewi Lestari"), long_ago);
    assert_eq!(engine.pending_contacts().len(), 1);

    assert_eq!(engine.sweep(Utc::now()), 1);
    assert!(engine.pending_contacts().is_empty());

    engine.observe(&message("lid4@lid", "Dewi Lestari"));
    engine.observe(&message("lid5@lid", "Dewi Lestary"));
    assert!(engine.resolve("lid4@lid").is_none());
    assert!(engine.resolve("lid5@lid").is_none());
}

#[test]
fn pending_contacts_survive_restart_and_still_expire() {
    let dir = tempfile::tempdir().unwrap();
    let (config, engine) = engine_in(&dir);
    let long_ago = Utc::now() - ChronoDuration::hours(25);

    engine.observe_at(&contact("444", "Dewi"), long_ago);
    engine.flush_now().unwrap();

    let reopened = IdentityEngine::open(&config);
    let pending = reopened.pending_contacts();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].last_observed_at, long_ago);

    assert_eq!(reopened.sweep(Utc::now()), 1);
    reopened.observe(&message("lid4@lid", "Dewi"));
    assert!(reopened.resolve("lid4@lid").is_none());
}

#[test]
fn recent_pending_survives_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);
    let long_ago = Utc::now() - ChronoDuration::hours(30);

    engine.observe_at(&contact("444", "Dewi"), long_ago);
    // A fresh sighting refreshes the retention clock.
    engine.observe(&contact("444", "Dewi"));
    assert_eq!(engine.sweep(Utc::now()), 0);

    engine.observe(&message("lid4@lid", "Dewi"));
    assert_eq!(engine.resolve("lid4@lid").unwrap().as_str(), "444");
}

#[test]
fn force_override() {
    let dir = tempfile::tempdir().unwrap();
    let (config, engine) = engine_in(&dir);

    engine.observe(&message("lidX", "Rina"));
    engine.observe(&contact("111", "Rina"));
    assert_eq!(engine.resolve("lidX").unwrap().as_str(), "111");

    let forced = engine.force_map("lidX", "999", None).unwrap();
    assert_eq!(forced.source, MappingSource::Forced);
    assert_eq!(engine.resolve("lidX").unwrap().as_str(), "999");
    assert!(engine.reverse_lookup("111").is_none());
    assert_bijection(&engine);

    engine.flush().unwrap();
    let reopened = IdentityEngine::open(&config);
    assert_eq!(reopened.mapping_for("lidX").unwrap().source, MappingSource::Forced);
}

#[test]
fn force_map_rejects_wrong_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);
    assert!(matches!(engine.force_map("111", "222", None), Err(EngineError::InvalidIdentifier(_))));
    assert!(matches!(engine.force_map("lidA", "lidB", None), Err(EngineError::InvalidIdentifier(_))));
    assert!(matches!(engine.force_map("lidA", "123@g.us", None), Err(EngineError::InvalidIdentifier(_))));
}

#[test]
fn record_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);
    let obs = DisplayNameObservation::new(
        Identifier::parse("628555").unwrap(),
        "Sari",
        ObservationSource::ContactEvent,
    );

    engine.record(&obs);
    let once = engine.clone_state();
    engine.record(&obs);
    assert_eq!(engine.clone_state().registry, once.registry);
}

#[test]
fn snapshot_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (config, engine) = engine_in(&dir);

    engine.observe(&message("8044@lid", "John Doe"));
    engine.observe(&message("6281130569787", "John Doe"));
    engine.observe(&contact("628777", "Budi"));
    engine.observe(&contact("628777", "Budi Santoso"));
    engine.observe(&message("9001@lid", "Unknown Person"));
    engine.force_map("7007@lid", "628999", Some("Teknisi A")).unwrap();
    assert!(engine.flush().unwrap());

    let before = engine.clone_state();
    let reopened = IdentityEngine::open(&config);
    let after = reopened.clone_state();

    assert_eq!(after.store, before.store);
    assert_eq!(after.registry, before.registry);
    assert_eq!(reopened.name_for_identifier("628777").as_deref(), Some("budi santoso"));
    assert_eq!(reopened.names_for("628777").len(), 2);
    assert_bijection(&reopened);
}

#[test]
fn snapshot_document_shape() {
    let dir = tempfile::tempdir().unwrap();
    let (config, engine) = engine_in(&dir);

    engine.observe(&message("8044@lid", "John Doe"));
    engine.observe(&message("6281130569787", "John Doe"));
    engine.flush().unwrap();

    let text = std::fs::read_to_string(config.snapshot_path()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["mappings"]["8044@lid"], "6281130569787");
    assert_eq!(doc["reverse"]["6281130569787"], "8044@lid");
    assert_eq!(doc["nameRegistry"]["john doe"]["canonical"][0], "6281130569787");
    assert!(doc["lastUpdated"].is_string());
}

#[test]
fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = ResolverConfig::in_dir(dir.path());
    std::fs::write(config.snapshot_path(), "{ not json").unwrap();

    let engine = IdentityEngine::open(&config);
    assert_eq!(engine.stats().total_mappings, 0);

    engine.observe(&message("8044@lid", "John Doe"));
    engine.observe(&message("6281130569787", "John Doe"));
    engine.flush().unwrap();
    assert_eq!(IdentityEngine::open(&config).stats().total_mappings, 1);
}

#[test]
fn history_replay_is_order_independent_for_exact_names() {
    let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let (_, forward) = engine_in(&dir_a);
    let (_, backward) = engine_in(&dir_b);

    let events = vec![
        message("8044@lid", "John Doe"),
        contact("6281130569787", "John Doe"),
        message("9001@lid", "Sari"),
        contact("628111", "Sari"),
    ];
    assert_eq!(forward.ingest_history(events.clone()), 2);
    assert_eq!(backward.ingest_history(events.into_iter().rev()), 2);
    assert_eq!(forward.mappings().len(), backward.mappings().len());
    for m in forward.mappings() {
        assert_eq!(backward.resolve(m.pseudonymous.as_str()), Some(m.canonical));
    }
}

#[test]
fn bound_identifiers_are_never_reassigned_automatically() {
    let dir = tempfile::tempdir().unwrap();
    let (_, engine) = engine_in(&dir);

    engine.observe(&message("lidA", "Budi"));
    engine.observe(&contact("111", "Budi"));
    engine.observe(&contact("222", "Budi"));
    engine.observe(&message("lidB", "Budi"));

    assert_eq!(engine.resolve("lidA").unwrap().as_str(), "111");
    assert_ne!(engine.resolve("lidB").map(|c| c.as_str().to_string()).as_deref(), Some("111"));
    assert_bijection(&engine);
}

// ── Service lifecycle ──────────────────────────────────────────────────

struct StaticGroups;

#[async_trait]
impl GroupFetcher for StaticGroups {
    async fn fetch_group(&self, context_id: &str) -> EngineResult<GroupSnapshot> {
        match context_id {
            "ops@g.us" => Ok(GroupSnapshot {
                context_id: context_id.into(),
                subject: Some("Ops".into()),
                members: vec![
                    GroupMember { identifier: "628111@s.whatsapp.net".into(), display_name: Some("Sari".into()) },
                    GroupMember { identifier: "628222@s.whatsapp.net".into(), display_name: Some("Budi".into()) },
                ],
            }),
            other => Err(EngineError::transport(other, "forbidden")),
        }
    }
}

#[tokio::test]
async fn service_backfill_then_messages_then_shutdown_flush() {
    let dir = tempfile::tempdir().unwrap();
    let config = ResolverConfig::in_dir(dir.path());
    let engine = Arc::new(IdentityEngine::open(&config));
    let service = ResolverService::spawn(Arc::clone(&engine), Arc::new(StaticGroups), &config);
    let handle = service.handle();

    let report = handle
        .backfill_and_wait(vec!["ops@g.us".into(), "private@g.us".into()])
        .await
        .unwrap();
    assert_eq!(report.contexts_processed, 1);
    assert_eq!(report.contexts_failed.len(), 1);
    assert_eq!(report.pending_contacts, 2);

    handle.observe(message("9001@lid", "Sari")).await.unwrap();
    handle.observe(message("9002@lid", "budi")).await.unwrap();
    service.shutdown().await;

    let reopened = IdentityEngine::open(&config);
    assert_eq!(reopened.resolve("9001@lid").unwrap().as_str(), "628111");
    assert_eq!(reopened.resolve("9002@lid").unwrap().as_str(), "628222");
    assert_eq!(reopened.reverse_lookup("628222@s.whatsapp.net").unwrap().as_str(), "9002@lid");
}
