//! Command-line and environment configuration
//!
//! Every flag can also be supplied through an `S3_PROBE_*` environment
//! variable. Durations accept humantime syntax (`30s`, `10m`, ...).

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Clone, Debug)]
#[command(name = "s3-probe")]
#[command(about = "Discovers S3 endpoints from Consul and probes them continuously", long_about = None)]
#[command(version)]
pub struct Config {
    /// Consul HTTP API address
    #[arg(long = "consul", default_value = "http://localhost:8500", env = "S3_PROBE_CONSUL_ADDR")]
    pub consul_addr: String,

    /// Consul tag identifying plain S3 services
    #[arg(long, default_value = "s3", env = "S3_PROBE_TAG")]
    pub tag: String,

    /// Consul tag identifying S3 gateway services
    #[arg(long, default_value = "s3-gateway", env = "S3_PROBE_GATEWAY_TAG")]
    pub gateway_tag: String,

    /// Bucket used by the latency probe (read and write)
    #[arg(long, default_value = "monitoring-latency", env = "S3_PROBE_LATENCY_BUCKET")]
    pub latency_bucket: String,

    /// Bucket used by the gateway probe (read and write)
    #[arg(long, default_value = "monitoring-gateway", env = "S3_PROBE_GATEWAY_BUCKET")]
    pub gateway_bucket: String,

    /// Bucket holding the durability corpus
    #[arg(long, default_value = "monitoring-durability", env = "S3_PROBE_DURABILITY_BUCKET")]
    pub durability_bucket: String,

    /// How often Consul is polled to discover new S3 endpoints
    #[arg(long, default_value = "600s", value_parser = humantime::parse_duration, env = "S3_PROBE_INTERVAL")]
    pub interval: Duration,

    /// Timeout of one durability check
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration, env = "S3_PROBE_DURABILITY_TIMEOUT")]
    pub durability_timeout: Duration,

    /// Timeout of each step of the latency and gateway checks
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration, env = "S3_PROBE_LATENCY_TIMEOUT")]
    pub latency_timeout: Duration,

    /// Address the metrics endpoint listens on
    #[arg(long, default_value = "0.0.0.0:8080", env = "S3_PROBE_LISTEN_ADDRESS")]
    pub listen_address: SocketAddr,

    /// Access key of the S3 endpoints
    #[arg(long, default_value = "", env = "S3_PROBE_ACCESS_KEY")]
    pub s3_access_key: String,

    /// Secret key of the S3 endpoints
    #[arg(long, default_value = "", env = "S3_PROBE_SECRET_KEY", hide_env_values = true)]
    pub s3_secret_key: String,

    /// Region announced to the S3 endpoints
    #[arg(long, default_value = "us-east-1", env = "S3_PROBE_REGION")]
    pub s3_region: String,

    /// Latency (or gateway) checks per minute, 0 disables them
    #[arg(long, default_value_t = 120, env = "S3_PROBE_PROBE_RATE")]
    pub probe_rate: u32,

    /// Durability checks per minute, 0 disables them
    #[arg(long, default_value_t = 1, env = "S3_PROBE_DURABILITY_PROBE_RATE")]
    pub durability_probe_rate: u32,

    /// Size in bytes of the objects written by the latency check
    #[arg(long, default_value_t = 10 * 1024, env = "S3_PROBE_LATENCY_ITEM_SIZE")]
    pub latency_item_size: usize,

    /// Size in bytes of each durability corpus object
    #[arg(long, default_value_t = 10 * 1024, env = "S3_PROBE_DURABILITY_ITEM_SIZE")]
    pub durability_item_size: usize,

    /// Number of objects in the durability corpus
    #[arg(long = "item-total", default_value_t = 100_000, env = "S3_PROBE_ITEM_TOTAL")]
    pub durability_item_total: usize,

    /// Delay between two attempts at writing a durability corpus object
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration, env = "S3_PROBE_SEED_RETRY_DELAY")]
    pub seed_retry_delay: Duration,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "S3_PROBE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Config {
    /// Reject settings the probe cannot run with
    pub fn validate(&self) -> Result<()> {
        for (flag, bucket) in [
            ("latency-bucket", &self.latency_bucket),
            ("gateway-bucket", &self.gateway_bucket),
            ("durability-bucket", &self.durability_bucket),
        ] {
            if bucket.is_empty() {
                return Err(Error::ConfigError(format!("--{} must not be empty", flag)));
            }
        }

        if self.latency_item_size == 0 || self.durability_item_size == 0 {
            return Err(Error::ConfigError("item sizes must be greater than 0".to_string()));
        }

        if self.latency_timeout.is_zero() || self.durability_timeout.is_zero() {
            return Err(Error::ConfigError("timeouts must be greater than 0".to_string()));
        }

        if self.interval.is_zero() {
            return Err(Error::ConfigError("--interval must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// The part of the configuration every probe worker carries
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            latency_bucket: self.latency_bucket.clone(),
            durability_bucket: self.durability_bucket.clone(),
            gateway_bucket: self.gateway_bucket.clone(),
            probe_rate: self.probe_rate,
            durability_probe_rate: self.durability_probe_rate,
            latency_item_size: self.latency_item_size,
            durability_item_size: self.durability_item_size,
            durability_item_total: self.durability_item_total,
            latency_timeout: self.latency_timeout,
            durability_timeout: self.durability_timeout,
            seed_retry_delay: self.seed_retry_delay,
        }
    }
}

/// Bucket names, rates, sizes and timeouts of one probe worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSettings {
    pub latency_bucket: String,
    pub durability_bucket: String,
    pub gateway_bucket: String,
    pub probe_rate: u32,
    pub durability_probe_rate: u32,
    pub latency_item_size: usize,
    pub durability_item_size: usize,
    pub durability_item_total: usize,
    pub latency_timeout: Duration,
    pub durability_timeout: Duration,
    pub seed_retry_delay: Duration,
}
