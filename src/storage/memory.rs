//! In-memory object store with fault injection, used by the controller tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};

use super::{ObjectBody, ObjectListing, ObjectStore, StoreFactory};
use crate::error::{Error, Result};

#[derive(Default)]
struct Bucket {
    objects: BTreeMap<String, Bytes>,
    expiry_days: Option<i32>,
}

pub struct MemoryStore {
    endpoint: String,
    buckets: Mutex<BTreeMap<String, Bucket>>,
    unreachable: AtomicBool,
    failing_puts: AtomicUsize,
    puts: AtomicUsize,
    latency: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            buckets: Mutex::new(BTreeMap::new()),
            unreachable: AtomicBool::new(false),
            failing_puts: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Every call fails while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` object writes
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Number of write attempts, failed ones included
    pub fn put_attempts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().unwrap().contains_key(bucket)
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|b| b.objects.len())
            .unwrap_or(0)
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn expiry_days(&self, bucket: &str) -> Option<i32> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|b| b.expiry_days)
    }

    /// Create an empty bucket, bypassing fault injection
    pub fn create_bucket(&self, bucket: &str) {
        self.insert_objects(bucket, 0);
    }

    /// Create a bucket holding `count` objects, bypassing fault injection
    pub fn insert_objects(&self, bucket: &str, count: usize) {
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets.entry(bucket.to_string()).or_default();
        for i in 0..count {
            entry
                .objects
                .insert(format!("existing-{}", i), Bytes::from_static(b"x"));
        }
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::storage(operation, "connection refused"));
        }
        Ok(())
    }

    fn missing_bucket(operation: &str, bucket: &str) -> Error {
        Error::storage(operation, format!("NoSuchBucket: {}", bucket))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        self.enter("list_buckets").await?;
        Ok(self.buckets.lock().unwrap().keys().cloned().collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.enter("bucket_exists").await?;
        Ok(self.has_bucket(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.enter("make_bucket").await?;
        if bucket.is_empty() || bucket.contains('/') {
            return Err(Error::storage("make_bucket", "InvalidBucketName"));
        }
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(bucket) {
            return Err(Error::storage("make_bucket", "BucketAlreadyOwnedByYou"));
        }
        buckets.insert(bucket.to_string(), Bucket::default());
        Ok(())
    }

    async fn set_bucket_expiry(&self, bucket: &str, days: i32) -> Result<()> {
        self.enter("set_bucket_expiry").await?;
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket("set_bucket_expiry", bucket))?;
        entry.expiry_days = Some(days);
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.enter("put_object").await?;

        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::storage("put_object", "injected failure"));
        }

        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket("put_object", bucket))?;
        entry.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody> {
        self.enter("get_object").await?;
        let buckets = self.buckets.lock().unwrap();
        let data = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket("get_object", bucket))?
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::storage("get_object", format!("NoSuchKey: {}", key)))?;

        let chunks: Vec<Result<Bytes>> = data
            .chunks(1024)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.enter("remove_object").await?;
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket("remove_object", bucket))?;
        entry.objects.remove(key);
        Ok(())
    }

    fn list_objects(&self, bucket: &str) -> ObjectListing {
        if self.unreachable.load(Ordering::SeqCst) {
            return stream::iter(vec![Err(Error::storage("list_objects", "connection refused"))])
                .boxed();
        }
        let keys: Vec<Result<String>> = match self.buckets.lock().unwrap().get(bucket) {
            Some(b) => b.objects.keys().cloned().map(Ok).collect(),
            None => vec![Err(Self::missing_bucket("list_objects", bucket))],
        };
        stream::iter(keys).boxed()
    }
}

/// Hands out one shared [`MemoryStore`] per address
#[derive(Default)]
pub struct MemoryStoreFactory {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
    connects: AtomicUsize,
}

impl MemoryStoreFactory {
    pub fn store(&self, address: &str) -> Arc<MemoryStore> {
        self.stores
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(address)))
            .clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn connect(&self, address: &str) -> Result<Arc<dyn ObjectStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if address.is_empty() {
            return Err(Error::ConfigError("empty S3 endpoint address".to_string()));
        }
        Ok(self.store(address))
    }
}
