// lidlink Engine — Resolver Service
//
// One task owns every write that originates from the transport. Webhook
// events and backfill requests arrive over a bounded mpsc queue; two
// interval timers drive the periodic snapshot flush and the pending sweep.
// Shutdown drains whatever is already queued, then writes a final snapshot.

use crate::atoms::constants::SERVICE_QUEUE_DEPTH;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::ResolverConfig;
use crate::engine::identity::{BackfillReport, IdentityEngine};
use crate::engine::ingest::Observation;
use crate::engine::transport::GroupFetcher;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub enum ServiceCommand {
    Observe(Observation),
    Backfill {
        contexts: Vec<String>,
        reply: Option<oneshot::Sender<BackfillReport>>,
    },
    /// Re-fetch one group, bypassing the snapshot cache.
    RefreshGroup(String),
    Flush(Option<oneshot::Sender<EngineResult<bool>>>),
}

/// Cloneable sender side. Every listener gets one.
#[derive(Clone)]
pub struct ResolverHandle {
    tx: mpsc::Sender<ServiceCommand>,
}

impl ResolverHandle {
    async fn send(&self, cmd: ServiceCommand) -> EngineResult<()> {
        self.tx.send(cmd).await.map_err(|_| EngineError::ServiceStopped)
    }

    pub async fn observe(&self, observation: Observation) -> EngineResult<()> {
        self.send(ServiceCommand::Observe(observation)).await
    }

    /// Queue a backfill without waiting for it.
    pub async fn backfill(&self, contexts: Vec<String>) -> EngineResult<()> {
        self.send(ServiceCommand::Backfill { contexts, reply: None }).await
    }

    /// Queue a backfill and wait for its report.
    pub async fn backfill_and_wait(&self, contexts: Vec<String>) -> EngineResult<BackfillReport> {
        let (reply, rx) = oneshot::channel();
        self.send(ServiceCommand::Backfill { contexts, reply: Some(reply) }).await?;
        rx.await.map_err(|_| EngineError::ServiceStopped)
    }

    pub async fn refresh_group(&self, context_id: impl Into<String>) -> EngineResult<()> {
        self.send(ServiceCommand::RefreshGroup(context_id.into())).await
    }

    /// Write the snapshot if anything changed. Ok(true) when a file was written.
    pub async fn flush(&self) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(ServiceCommand::Flush(Some(reply))).await?;
        rx.await.map_err(|_| EngineError::ServiceStopped)?
    }
}

pub struct ResolverService {
    handle: ResolverHandle,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

struct Worker {
    engine: Arc<IdentityEngine>,
    fetcher: Arc<dyn GroupFetcher>,
    backfill_timeout: Duration,
}

impl ResolverService {
    pub fn spawn(
        engine: Arc<IdentityEngine>,
        fetcher: Arc<dyn GroupFetcher>,
        config: &ResolverConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SERVICE_QUEUE_DEPTH);
        let shutdown = Arc::new(Notify::new());
        let worker = Worker { engine, fetcher, backfill_timeout: config.backfill_timeout() };
        let task = tokio::spawn(worker.run(
            rx,
            Arc::clone(&shutdown),
            config.flush_interval(),
            config.sweep_interval(),
        ));
        info!(
            "[lid] Resolver service started (flush every {}s, sweep every {}s)",
            config.flush_interval_secs, config.pending_sweep_interval_secs
        );
        ResolverService { handle: ResolverHandle { tx }, shutdown, task }
    }

    pub fn handle(&self) -> ResolverHandle {
        self.handle.clone()
    }

    /// Stop the timers, drain queued commands and flush. Returns once the
    /// final snapshot has been written.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            error!("[lid] Resolver service task failed: {}", e);
        }
    }
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::Receiver<ServiceCommand>,
        shutdown: Arc<Notify>,
        flush_every: Duration,
        sweep_every: Duration,
    ) {
        let mut flush_tick = tokio::time::interval_at(tokio::time::Instant::now() + flush_every, flush_every);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = tokio::time::interval_at(tokio::time::Instant::now() + sweep_every, sweep_every);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = flush_tick.tick() => {
                    if let Err(e) = self.engine.flush() {
                        error!("[lid] Periodic flush failed: {}", e);
                    }
                }
                _ = sweep_tick.tick() => {
                    let evicted = self.engine.sweep(Utc::now());
                    if evicted > 0 {
                        debug!("[lid] Sweep evicted {} pending contacts", evicted);
                    }
                }
            }
        }

        rx.close();
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
        }
        match self.engine.flush() {
            Ok(_) => info!("[lid] Resolver service stopped"),
            Err(e) => error!("[lid] Final flush failed: {}", e),
        }
    }

    async fn handle(&self, cmd: ServiceCommand) {
        match cmd {
            ServiceCommand::Observe(observation) => {
                self.engine.observe(&observation);
            }
            ServiceCommand::Backfill { contexts, reply } => {
                let report = self
                    .engine
                    .backfill(&contexts, self.fetcher.as_ref(), self.backfill_timeout)
                    .await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            ServiceCommand::RefreshGroup(context_id) => {
                if let Err(e) = self
                    .engine
                    .refresh_group(&context_id, self.fetcher.as_ref(), self.backfill_timeout)
                    .await
                {
                    warn!("[lid] Refresh of {} failed: {}", context_id, e);
                }
            }
            ServiceCommand::Flush(reply) => {
                let result = self.engine.flush();
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            error!("[lid] Flush failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}
