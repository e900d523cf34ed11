//! S3 adapter built on aws-sdk-s3
//!
//! One client per endpoint, static credentials, path-style addressing so that
//! MinIO and other S3-compatible servers work without virtual-host DNS.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, BucketLocationConstraint, CreateBucketConfiguration,
    ExpirationStatus, LifecycleExpiration, LifecycleRule,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::{stream, StreamExt};
use tracing::debug;

use super::{ObjectBody, ObjectListing, ObjectStore, StoreFactory};
use crate::error::{Error, Result};

const LIFECYCLE_RULE_ID: &str = "expire-bucket";
const DEFAULT_REGION: &str = "us-east-1";

/// Turn a registry address into an endpoint URL
///
/// Addresses registered without a scheme are plain HTTP.
pub fn endpoint_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

pub struct S3Store {
    client: Client,
    endpoint: String,
    region: String,
}

impl S3Store {
    pub fn connect(address: &str, access_key: &str, secret_key: &str, region: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "s3-probe");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint_url(address))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        debug!("S3 client created for {}", address);

        Self {
            client: Client::from_conf(config),
            endpoint: address.to_string(),
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| Error::storage("list_buckets", DisplayErrorContext(&e)))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match e.as_service_error() {
                Some(service_error) if service_error.is_not_found() => Ok(false),
                _ => Err(Error::storage("bucket_exists", DisplayErrorContext(&e))),
            },
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 is the only region S3 rejects an explicit constraint for
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| Error::storage("make_bucket", DisplayErrorContext(&e)))?;
        Ok(())
    }

    #[allow(deprecated)]
    async fn set_bucket_expiry(&self, bucket: &str, days: i32) -> Result<()> {
        let rule = LifecycleRule::builder()
            .id(LIFECYCLE_RULE_ID)
            .status(ExpirationStatus::Enabled)
            .prefix("")
            .expiration(LifecycleExpiration::builder().days(days).build())
            .build()
            .map_err(|e| Error::storage("set_bucket_expiry", e))?;

        let lifecycle = BucketLifecycleConfiguration::builder()
            .rules(rule)
            .build()
            .map_err(|e| Error::storage("set_bucket_expiry", e))?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(lifecycle)
            .send()
            .await
            .map_err(|e| Error::storage("set_bucket_expiry", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Error::storage("put_object", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::storage("get_object", DisplayErrorContext(&e)))?;

        let body = stream::try_unfold(output.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(Error::storage("get_object", e)),
            }
        });
        Ok(body.boxed())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::storage("remove_object", DisplayErrorContext(&e)))?;
        Ok(())
    }

    fn list_objects(&self, bucket: &str) -> ObjectListing {
        let pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        stream::unfold(pages, |mut pages| async move {
            let page = pages.next().await?;
            Some((page, pages))
        })
        .flat_map(|page| {
            let keys: Vec<Result<String>> = match page {
                Ok(output) => output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| Ok(key.to_string()))
                    .collect(),
                Err(e) => vec![Err(Error::storage("list_objects", DisplayErrorContext(&e)))],
            };
            stream::iter(keys)
        })
        .boxed()
    }
}

/// Builds [`S3Store`] clients sharing one set of credentials
#[derive(Clone)]
pub struct S3StoreFactory {
    access_key: String,
    secret_key: String,
    region: String,
}

impl S3StoreFactory {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
        }
    }
}

impl StoreFactory for S3StoreFactory {
    fn connect(&self, address: &str) -> Result<Arc<dyn ObjectStore>> {
        if address.trim().is_empty() {
            return Err(Error::ConfigError("empty S3 endpoint address".to_string()));
        }
        Ok(Arc::new(S3Store::connect(
            address,
            &self.access_key,
            &self.secret_key,
            &self.region,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_defaults_to_http() {
        assert_eq!(endpoint_url("localhost:9000"), "http://localhost:9000");
        assert_eq!(endpoint_url("http://s3.local"), "http://s3.local");
        assert_eq!(endpoint_url("https://s3.local:443"), "https://s3.local:443");
    }

    #[test]
    fn test_factory_rejects_empty_address() {
        let factory = S3StoreFactory::new("key", "secret", "us-east-1");
        assert!(factory.connect("").is_err());
    }

    #[test]
    fn test_factory_keeps_address() {
        let factory = S3StoreFactory::new("key", "secret", "us-east-1");
        let store = factory.connect("s3.us-east-1.prod:8080").unwrap();
        assert_eq!(store.endpoint(), "s3.us-east-1.prod:8080");
    }
}
