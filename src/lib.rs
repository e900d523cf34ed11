//! S3 endpoint probe
//!
//! Discovers S3 services from Consul, keeps one probe worker per endpoint
//! and exports latency, durability and gateway replication metrics for
//! Prometheus.

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod rest_api;
pub mod storage;

pub use error::{Error, Result};
