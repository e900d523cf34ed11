//! Object storage access
//!
//! Probe workers talk to S3 endpoints through the [`ObjectStore`] trait. The
//! production implementation is [`S3Store`]; callers bound every call with
//! their own deadline.

#[cfg(test)]
pub(crate) mod memory;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::Result;

pub use s3::{endpoint_url, S3Store, S3StoreFactory};

/// Body of a fetched object, consumed chunk by chunk
pub type ObjectBody = BoxStream<'static, Result<Bytes>>;

/// Keys of a bucket, or the error that interrupted the listing
pub type ObjectListing = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Address this client is connected to
    fn endpoint(&self) -> &str;

    async fn list_buckets(&self) -> Result<Vec<String>>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// Attach a lifecycle rule expiring every object after `days`
    async fn set_bucket_expiry(&self, bucket: &str, days: i32) -> Result<()>;

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody>;

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Stream every key of the bucket, following continuation tokens
    fn list_objects(&self, bucket: &str) -> ObjectListing;
}

/// Builds a client for a resolved endpoint address
pub trait StoreFactory: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn ObjectStore>>;
}

/// Read a body to the end, returning the number of bytes seen
pub async fn drain(mut body: ObjectBody) -> Result<usize> {
    let mut total = 0;
    while let Some(chunk) = body.next().await {
        total += chunk?.len();
    }
    Ok(total)
}

/// Count the keys of a listing, stopping at the first error
pub async fn count_objects(mut listing: ObjectListing) -> Result<usize> {
    let mut total = 0;
    while let Some(key) = listing.next().await {
        key?;
        total += 1;
    }
    Ok(total)
}
