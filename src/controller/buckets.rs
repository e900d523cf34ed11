//! Bucket preparation for probe workers
//!
//! Latency and gateway buckets expire their objects after one day so that
//! checks interrupted halfway never accumulate garbage. The durability bucket
//! is seeded exactly once, when it is created.

use tracing::{debug, info, warn};

use super::checks::{random_payload, with_deadline};
use super::probe::ProbeWorker;
use crate::error::{Error, Result};
use crate::storage::ObjectStore;

/// Lifetime of latency and gateway check objects
pub const EXPIRY_DAYS: i32 = 1;

/// Name prefix of durability corpus objects
pub const DURABILITY_ITEM_PREFIX: &str = "fake-item-";

const PROGRESS_EVERY: usize = 100;

/// Name of the `index`-th durability corpus object
pub fn durability_item_name(index: usize) -> String {
    format!("{}{}", DURABILITY_ITEM_PREFIX, index)
}

impl ProbeWorker {
    /// Create `bucket` on `store` unless it exists, then attach the expiry rule
    ///
    /// Returns whether the bucket was created.
    async fn ensure_expiring_bucket(&self, store: &dyn ObjectStore, bucket: &str) -> Result<bool> {
        let timeout = self.settings.latency_timeout;

        if with_deadline("bucket_exists", timeout, store.bucket_exists(bucket)).await? {
            return Ok(false);
        }

        info!("Preparing bucket {} on {}", bucket, store.endpoint());
        with_deadline("make_bucket", timeout, store.make_bucket(bucket)).await?;

        // objects of a bucket without the rule are still removed by the checks
        if let Err(e) = with_deadline(
            "set_bucket_expiry",
            timeout,
            store.set_bucket_expiry(bucket, EXPIRY_DAYS),
        )
        .await
        {
            warn!(
                "Cannot set lifecycle on bucket {} of {}: {}",
                bucket,
                store.endpoint(),
                e
            );
        }
        Ok(true)
    }

    pub async fn prepare_latency_bucket(&self) -> Result<()> {
        debug!("Checking if latency bucket is present on {}", self.target.name);

        let bucket = &self.settings.latency_bucket;
        if self.ensure_expiring_bucket(self.store.as_ref(), bucket).await? {
            self.metrics.inc_bucket_created(&self.target.name);
        }
        Ok(())
    }

    /// Create and seed the durability bucket
    ///
    /// An existing bucket is left untouched, whatever it holds. Each corpus
    /// object is retried until it is written, with no upper bound.
    pub async fn prepare_durability_bucket(&self) -> Result<()> {
        debug!("Checking if durability bucket is present on {}", self.target.name);

        let bucket = self.settings.durability_bucket.as_str();
        let timeout = self.settings.latency_timeout;
        let store = self.store.as_ref();

        if with_deadline("bucket_exists", timeout, store.bucket_exists(bucket)).await? {
            debug!("Durability bucket already present on {}", self.target.name);
            return Ok(());
        }

        with_deadline("make_bucket", timeout, store.make_bucket(bucket)).await?;
        self.metrics.inc_bucket_created(&self.target.name);

        info!("Preparing durability bucket on {}", self.target.name);
        self.seed_durability_items().await;
        Ok(())
    }

    async fn seed_durability_items(&self) {
        let bucket = self.settings.durability_bucket.as_str();
        let total = self.settings.durability_item_total;
        let delay = self.settings.seed_retry_delay;
        let payload = random_payload(self.settings.durability_item_size);

        for index in 0..total {
            let name = durability_item_name(index);
            loop {
                let written = with_deadline(
                    "put_object",
                    self.settings.latency_timeout,
                    self.store.put_object(bucket, &name, payload.clone()),
                )
                .await;

                match written {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(
                            "{}> error (item: {}): {}, retrying in {:?}",
                            self.target.name, index, e, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            if index % PROGRESS_EVERY == 0 {
                info!(
                    "{}> {} objects written ({}%)",
                    self.target.name,
                    index,
                    index * 100 / total
                );
            }
        }

        info!("{}> durability corpus of {} objects written", self.target.name, total);
    }

    /// Create the shared gateway bucket on every destination
    ///
    /// All destinations are attempted; the first failure is returned.
    pub async fn prepare_gateway_buckets(&self) -> Result<()> {
        debug!("Checking if gateway buckets are present on {}", self.target.name);

        if self.replicas.is_empty() {
            return Err(Error::NoGatewayDestinations(self.target.name.clone()));
        }

        let bucket = &self.settings.gateway_bucket;
        let mut first_error = None;

        for replica in &self.replicas {
            match self.ensure_expiring_bucket(replica.as_ref(), bucket).await {
                Ok(true) => {
                    self.metrics
                        .inc_gateway_bucket_created(&self.target.name, replica.endpoint());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Cannot prepare gateway bucket on {} for {}: {}",
                        replica.endpoint(),
                        self.target.name,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
