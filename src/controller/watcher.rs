//! Reconciliation of discovered targets against running probe workers
//!
//! The watcher owns the only mutable view of which targets are probed. Every
//! cycle it asks the registry for the candidate set, stops the workers whose
//! target vanished or changed, then prepares and starts workers for the new
//! ones. A target whose preparation fails is not registered, so it shows up
//! as new again on the next cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::metrics::{Metrics, UNKNOWN_TARGET};
use super::probe::ProbeWorker;
use crate::config::ProbeSettings;
use crate::discovery::{ServiceRegistry, Target};
use crate::error::Result;
use crate::storage::StoreFactory;

struct WatchedTarget {
    target: Target,
    stop: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

/// Outcome of one reconciliation cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Targets whose worker was started
    pub added: Vec<Target>,
    /// Targets whose worker was stopped
    pub removed: Vec<Target>,
    /// Targets that should have been started but failed preparation
    pub failed: Vec<Target>,
}

/// Split the candidate set into targets to start and targets to stop
///
/// A target is kept only when an identical one is already watched. A target
/// whose address, role or replicas changed lands in both lists.
pub fn diff_targets(current: &[Target], candidates: &[Target]) -> (Vec<Target>, Vec<Target>) {
    let to_add = slice_diff(candidates, current);
    let to_remove = slice_diff(current, candidates);
    (to_add, to_remove)
}

/// Elements of `a` with no equal element in `b`
fn slice_diff(a: &[Target], b: &[Target]) -> Vec<Target> {
    let by_name: HashMap<&str, &Target> = b.iter().map(|t| (t.name.as_str(), t)).collect();
    a.iter()
        .filter(|t| by_name.get(t.name.as_str()).copied() != Some(*t))
        .cloned()
        .collect()
}

pub struct Watcher {
    registry: Arc<dyn ServiceRegistry>,
    stores: Arc<dyn StoreFactory>,
    settings: ProbeSettings,
    metrics: Arc<Metrics>,
    watched: HashMap<String, WatchedTarget>,
}

impl Watcher {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        stores: Arc<dyn StoreFactory>,
        settings: ProbeSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            stores,
            settings,
            metrics,
            watched: HashMap::new(),
        }
    }

    /// Targets with a running worker, sorted by name
    pub fn watched_targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.watched.values().map(|w| w.target.clone()).collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    /// Reconcile until `shutdown` is cancelled, then stop every worker
    ///
    /// A cycle in progress is abandoned on cancellation, including a worker
    /// still seeding its durability bucket.
    pub async fn watch(&mut self, interval: Duration, shutdown: CancellationToken) {
        info!("Starting target watcher, polling every {:?}", interval);

        loop {
            let summary = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                summary = self.reconcile_once() => summary,
            };

            if summary != ReconcileSummary::default() {
                info!(
                    "Reconciled targets: {} added, {} removed, {} failed, {} watched",
                    summary.added.len(),
                    summary.removed.len(),
                    summary.failed.len(),
                    self.watched.len()
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.shutdown().await;
    }

    #[instrument(skip(self), fields(watched = self.watched.len()))]
    pub async fn reconcile_once(&mut self) -> ReconcileSummary {
        let candidates = self.discover_targets().await;
        let current = self.watched_targets();
        let (to_add, to_remove) = diff_targets(&current, &candidates);

        // stop first so a restarted name never has two workers
        self.flush_old_probes(&to_remove).await;
        let (added, failed) = self.create_new_probes(to_add).await;

        ReconcileSummary {
            added,
            removed: to_remove,
            failed,
        }
    }

    /// Candidate targets; any discovery failure shrinks the set
    async fn discover_targets(&self) -> Vec<Target> {
        let services = match self.registry.list_matching_services().await {
            Ok(services) => services,
            Err(e) => {
                error!("Error while discovering services: {}", e.status_message());
                self.metrics.inc_discovery_error(UNKNOWN_TARGET);
                return Vec::new();
            }
        };

        let mut targets = Vec::with_capacity(services.len());
        for (name, role) in services {
            match self.registry.resolve_endpoint(&name, role).await {
                Ok((address, replicas)) => targets.push(Target {
                    name,
                    address,
                    role,
                    replicas,
                }),
                Err(e) => {
                    error!("Cannot resolve service {}: {}", name, e.status_message());
                    self.metrics.inc_discovery_error(&name);
                }
            }
        }
        targets
    }

    async fn flush_old_probes(&mut self, targets: &[Target]) {
        for target in targets {
            let Some(watched) = self.watched.remove(&target.name) else {
                continue;
            };
            info!("Removing probe for {}", target.name);
            watched.stop.cancel();
            match watched.handle.await {
                Ok(Ok(())) => debug!("Probe for {} stopped", target.name),
                Ok(Err(e)) => warn!("Probe for {} ended with error: {}", target.name, e),
                Err(e) => error!("Probe task for {} failed: {}", target.name, e),
            }
        }
    }

    async fn create_new_probes(&mut self, targets: Vec<Target>) -> (Vec<Target>, Vec<Target>) {
        let mut added = Vec::new();
        let mut failed = Vec::new();

        for target in targets {
            let worker = match ProbeWorker::connect(
                target.clone(),
                self.stores.as_ref(),
                self.settings.clone(),
                Arc::clone(&self.metrics),
            ) {
                Ok(worker) => worker,
                Err(e) => {
                    error!(
                        "Error while creating probe for {}: {}",
                        target.name,
                        e.status_message()
                    );
                    failed.push(target);
                    continue;
                }
            };

            if let Err(e) = worker.prepare().await {
                error!(
                    "Error while preparing probe for {}: {}",
                    target.name,
                    e.status_message()
                );
                failed.push(target);
                continue;
            }

            let worker = Arc::new(worker);
            let stop = worker.stop_signal();
            let handle = tokio::spawn(worker.run());
            self.watched.insert(
                target.name.clone(),
                WatchedTarget {
                    target: target.clone(),
                    stop,
                    handle,
                },
            );
            added.push(target);
        }

        (added, failed)
    }

    /// Stop every running worker; in-flight checks are left to finish
    pub async fn shutdown(&mut self) {
        let targets = self.watched_targets();
        info!("Stopping {} probes", targets.len());
        self.flush_old_probes(&targets).await;
    }
}
