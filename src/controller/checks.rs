//! Latency, durability and gateway checks run by a probe worker
//!
//! Every storage call is bounded by a deadline. Timed operations are recorded
//! in `s3_requests_total`, `s3_requests_success_total` and
//! `s3_latency_seconds`, labelled with the operation and target names.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use rand::RngCore;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::probe::ProbeWorker;
use crate::error::{Error, Result};
use crate::storage::{count_objects, drain, ObjectStore};

/// Size of the object written through a gateway
pub const GATEWAY_OBJECT_SIZE: usize = 1024;

/// Length in hex characters of the names of probe objects
const OBJECT_NAME_LEN: usize = 20;

/// Random hex object name, `len` characters long
pub fn random_object_name(len: usize) -> String {
    let mut buffer = vec![0u8; len.div_ceil(2)];
    rand::rng().fill_bytes(&mut buffer);
    let mut name = hex::encode(buffer);
    name.truncate(len);
    name
}

/// Random payload of `size` bytes
pub fn random_payload(size: usize) -> Bytes {
    let mut buffer = vec![0u8; size];
    rand::rng().fill_bytes(&mut buffer);
    Bytes::from(buffer)
}

/// Await `fut`, failing with [`Error::Timeout`] past `timeout`
pub async fn with_deadline<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}

async fn read_object(store: &dyn ObjectStore, bucket: &str, key: &str) -> Result<usize> {
    let body = store.get_object(bucket, key).await?;
    drain(body).await
}

impl ProbeWorker {
    /// Run `fut` under the check timeout and record its outcome
    async fn measure_operation<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = with_deadline(operation, self.settings.latency_timeout, fut).await;

        self.metrics.observe_operation(
            operation,
            &self.target.name,
            start.elapsed(),
            result.is_ok(),
        );

        if let Err(e) = &result {
            warn!(
                "Error while executing {} on {}: {}",
                operation,
                self.target.name,
                e.status_message()
            );
        }
        result
    }

    /// List buckets, then write, read back and remove one random object
    ///
    /// Stops at the first failing step.
    pub async fn latency_check(&self) -> Result<()> {
        let store = self.store.as_ref();
        let bucket = self.settings.latency_bucket.as_str();
        let object_name = random_object_name(OBJECT_NAME_LEN);

        self.measure_operation("list_buckets", store.list_buckets())
            .await?;

        let payload = random_payload(self.settings.latency_item_size);
        self.measure_operation("put_object", store.put_object(bucket, &object_name, payload))
            .await?;

        self.measure_operation("get_object", read_object(store, bucket, &object_name))
            .await?;

        self.measure_operation("remove_object", store.remove_object(bucket, &object_name))
            .await?;

        debug!("Latency check succeeded on {}", self.target.name);
        Ok(())
    }

    /// Count the durability corpus and publish expected and found gauges
    pub async fn durability_check(&self) -> Result<()> {
        let listing = self.store.list_objects(&self.settings.durability_bucket);
        let found = with_deadline(
            "list_objects",
            self.settings.durability_timeout,
            count_objects(listing),
        )
        .await
        .map_err(|e| {
            warn!(
                "Durability check failed on {}: {}",
                self.target.name,
                e.status_message()
            );
            e
        })?;

        self.metrics.set_durability_items(
            &self.target.name,
            self.settings.durability_item_total,
            found,
        );

        if found < self.settings.durability_item_total {
            warn!(
                "{}> {} durability items found, {} expected",
                self.target.name, found, self.settings.durability_item_total
            );
        }
        Ok(())
    }

    /// Write one object through the gateway, then read and remove it on every destination
    ///
    /// A failing destination does not stop the others. Only the initial write
    /// aborts the check.
    pub async fn gateway_check(&self) -> Result<()> {
        let bucket = self.settings.gateway_bucket.as_str();
        let object_name = random_object_name(OBJECT_NAME_LEN);
        let payload = random_payload(GATEWAY_OBJECT_SIZE);

        self.measure_operation(
            "gateway_put_object",
            self.store.put_object(bucket, &object_name, payload),
        )
        .await?;

        let timeout = self.settings.latency_timeout;
        for replica in &self.replicas {
            let destination = replica.endpoint();

            let read = with_deadline(
                "gateway_get_object",
                timeout,
                read_object(replica.as_ref(), bucket, &object_name),
            )
            .await;
            self.record_gateway_outcome("gateway_get_object", destination, &read);

            let removed = with_deadline(
                "gateway_remove_object",
                timeout,
                replica.remove_object(bucket, &object_name),
            )
            .await;
            self.record_gateway_outcome("gateway_remove_object", destination, &removed);
        }

        Ok(())
    }

    fn record_gateway_outcome<T>(&self, operation: &str, destination: &str, result: &Result<T>) {
        self.metrics.observe_gateway_operation(
            operation,
            &self.target.name,
            destination,
            result.is_ok(),
        );
        if let Err(e) = result {
            warn!(
                "Error while executing {} on {} (destination {}): {}",
                operation,
                self.target.name,
                destination,
                e.status_message()
            );
        }
    }
}
