//! Probe worker for one discovered S3 target
//!
//! A worker goes through two phases:
//!
//! - **Preparation** ([`ProbeWorker::prepare`]): make sure the buckets the
//!   checks rely on exist, seeding the durability corpus the first time.
//!   Runs to completion before the worker is registered.
//! - **Scheduling** ([`ProbeWorker::run`]): two independent triggers launch
//!   detached checks until the stop signal fires.
//!
//! Checks are fire-and-forget. A slow check is never awaited by the loop, so
//! several invocations of the same check may overlap on one endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::Metrics;
use crate::config::ProbeSettings;
use crate::discovery::{Role, Target};
use crate::error::Result;
use crate::storage::{ObjectStore, StoreFactory};

const MILLISECONDS_IN_MINUTE: u64 = 60_000;

pub struct ProbeWorker {
    pub(super) target: Target,
    pub(super) store: Arc<dyn ObjectStore>,
    pub(super) replicas: Vec<Arc<dyn ObjectStore>>,
    pub(super) settings: ProbeSettings,
    pub(super) metrics: Arc<Metrics>,
    stop: CancellationToken,
}

impl ProbeWorker {
    pub fn new(
        target: Target,
        store: Arc<dyn ObjectStore>,
        replicas: Vec<Arc<dyn ObjectStore>>,
        settings: ProbeSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            target,
            store,
            replicas,
            settings,
            metrics,
            stop: CancellationToken::new(),
        }
    }

    /// Build a worker with one client for the target and one per replica
    pub fn connect(
        target: Target,
        stores: &dyn StoreFactory,
        settings: ProbeSettings,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let store = stores.connect(&target.address)?;
        let replicas = target
            .replicas
            .iter()
            .map(|address| stores.connect(address))
            .collect::<Result<Vec<_>>>()?;

        info!("Probe created for: {} ({})", target.name, target.address);
        Ok(Self::new(target, store, replicas, settings, metrics))
    }

    /// Token that terminates [`ProbeWorker::run`] once cancelled
    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Get the buckets ready for the role of the target
    pub async fn prepare(&self) -> Result<()> {
        debug!("Preparing probe for {}", self.target.name);

        match self.target.role {
            Role::Gateway => self.prepare_gateway_buckets().await.map_err(|e| {
                warn!("Cannot prepare gateway bucket for {}: {}", self.target.name, e);
                e
            }),
            Role::Simple => {
                self.prepare_latency_bucket().await.map_err(|e| {
                    warn!("Cannot prepare latency bucket for {}: {}", self.target.name, e);
                    e
                })?;
                self.prepare_durability_bucket().await.map_err(|e| {
                    warn!("Cannot prepare durability bucket for {}: {}", self.target.name, e);
                    e
                })
            }
        }
    }

    /// Scheduling loop, returns once the stop signal is cancelled
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Starting probing on {}", self.target.name);

        let mut check_trigger = trigger(self.settings.probe_rate);
        let mut durability_trigger = trigger(self.settings.durability_probe_rate);
        let gateway = self.target.role.is_gateway();

        loop {
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => {
                    info!("Terminating probe on {}", self.target.name);
                    return Ok(());
                }
                _ = next_fire(&mut check_trigger) => {
                    let worker = Arc::clone(&self);
                    if gateway {
                        tokio::spawn(async move {
                            let _ = worker.gateway_check().await;
                        });
                    } else {
                        tokio::spawn(async move {
                            let _ = worker.latency_check().await;
                        });
                    }
                }
                _ = next_fire(&mut durability_trigger) => {
                    if !gateway {
                        let worker = Arc::clone(&self);
                        tokio::spawn(async move {
                            let _ = worker.durability_check().await;
                        });
                    }
                }
            }
        }
    }
}

/// Period between two fires for a rate expressed per minute
///
/// A zero rate has no period: the trigger never fires.
pub fn trigger_period(rate_per_minute: u32) -> Option<Duration> {
    if rate_per_minute == 0 {
        return None;
    }
    let millis = (MILLISECONDS_IN_MINUTE / u64::from(rate_per_minute)).max(1);
    Some(Duration::from_millis(millis))
}

fn trigger(rate_per_minute: u32) -> Option<Interval> {
    trigger_period(rate_per_minute).map(|period| {
        // first fire one period from now, not immediately
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    })
}

async fn next_fire(trigger: &mut Option<Interval>) {
    match trigger {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
