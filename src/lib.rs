// lidlink — LID ⇄ phone number resolver for WhatsApp bridges
//
//   atoms  — error enum, constants, identifier + mapping types
//   engine — registry, correlation, persistence, service, transport glue

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{
    DisplayNameObservation, IdKind, Identifier, Mapping, MappingSource, ObservationSource,
    PendingContact, ResolverStats,
};
pub use engine::config::{load_config, ResolverConfig};
pub use engine::identity::{BackfillReport, IdentityEngine};
pub use engine::ingest::Observation;
pub use engine::service::{ResolverHandle, ResolverService};

use engine::query::{run_query_listener, QueryContext};
use engine::whatsapp::{run_webhook_listener, EvolutionApi};
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Daemon entry point: load config, restore the snapshot, start the
/// resolver service and both listeners, seed from the configured groups,
/// then run until Ctrl-C and flush on the way out.
pub async fn run() -> EngineResult<()> {
    let config = load_config()?;
    config.validate()?;

    let engine = Arc::new(IdentityEngine::open(&config));
    let api = Arc::new(EvolutionApi::new(&config.transport));
    let service = ResolverService::spawn(Arc::clone(&engine), api.clone(), &config);
    let stop = Arc::new(AtomicBool::new(false));

    let webhook = {
        let handle = service.handle();
        let stop = Arc::clone(&stop);
        let port = config.transport.webhook_port;
        tokio::spawn(async move {
            if let Err(e) = run_webhook_listener(handle, port, stop).await {
                error!("[whatsapp] Webhook listener failed: {}", e);
            }
        })
    };

    let query = (config.transport.query_port != 0).then(|| {
        let ctx = Arc::new(QueryContext {
            engine: Arc::clone(&engine),
            groups: api.clone(),
            directory: api.clone(),
            fetch_timeout: config.backfill_timeout(),
        });
        let stop = Arc::clone(&stop);
        let port = config.transport.query_port;
        tokio::spawn(async move {
            if let Err(e) = run_query_listener(ctx, port, stop).await {
                error!("[lid] Query listener failed: {}", e);
            }
        })
    });

    if !config.transport.backfill_groups.is_empty() {
        service.handle().backfill(config.transport.backfill_groups.clone()).await?;
    }

    info!(
        "[lid] Ready: {} mappings loaded from {}",
        engine.stats().total_mappings,
        engine.snapshot_path().display()
    );
    tokio::signal::ctrl_c().await?;
    info!("[lid] Shutting down");

    stop.store(true, Ordering::Relaxed);
    service.shutdown().await;
    let _ = webhook.await;
    if let Some(query) = query {
        let _ = query.await;
    }
    Ok(())
}
