//! Prometheus metrics for the S3 probe
//!
//! All families live in one [`Metrics`] value that is built against a
//! [`Registry`] at startup and shared by `Arc` with every worker.

use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Latency histogram buckets, in seconds
pub const LATENCY_BUCKETS: [f64; 19] = [
    0.001, 0.0025, 0.005, 0.010, 0.015, 0.020, 0.025, 0.030, 0.040, 0.050, 0.060, 0.075, 0.100,
    0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Label reported on discovery errors that are not tied to one service
pub const UNKNOWN_TARGET: &str = "N/A";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
    pub target: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GatewayLabels {
    pub operation: String,
    pub target: String,
    pub destination: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TargetLabels {
    pub target: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DestinationLabels {
    pub target: String,
    pub destination: String,
}

fn latency_histogram() -> Histogram {
    Histogram::new(LATENCY_BUCKETS.iter().copied())
}

pub struct Metrics {
    pub requests: Family<OperationLabels, Counter>,
    pub requests_success: Family<OperationLabels, Counter>,
    pub gateway_requests: Family<GatewayLabels, Counter>,
    pub gateway_requests_success: Family<GatewayLabels, Counter>,
    pub bucket_created: Family<TargetLabels, Counter>,
    pub gateway_bucket_created: Family<DestinationLabels, Counter>,
    pub discovery_errors: Family<TargetLabels, Counter>,
    pub durability_items_expected: Family<TargetLabels, Gauge>,
    pub durability_items_found: Family<TargetLabels, Gauge>,
    pub latency: Family<OperationLabels, Histogram>,
}

impl Metrics {
    /// Create every family and register it under the `s3` prefix
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self {
            requests: Family::default(),
            requests_success: Family::default(),
            gateway_requests: Family::default(),
            gateway_requests_success: Family::default(),
            bucket_created: Family::default(),
            gateway_bucket_created: Family::default(),
            discovery_errors: Family::default(),
            durability_items_expected: Family::default(),
            durability_items_found: Family::default(),
            latency: Family::new_with_constructor(latency_histogram),
        };

        let registry = registry.sub_registry_with_prefix("s3");
        registry.register(
            "requests",
            "Total number of requests on S3 endpoint",
            metrics.requests.clone(),
        );
        registry.register(
            "requests_success",
            "Total number of successful requests on S3 endpoint",
            metrics.requests_success.clone(),
        );
        registry.register(
            "gateway_requests",
            "Total number of gateway requests on S3 endpoint",
            metrics.gateway_requests.clone(),
        );
        registry.register(
            "gateway_requests_success",
            "Total number of successful gateway requests on S3 endpoint",
            metrics.gateway_requests_success.clone(),
        );
        registry.register(
            "bucket_created",
            "Total number of monitoring buckets created",
            metrics.bucket_created.clone(),
        );
        registry.register(
            "gateway_bucket_created",
            "Total number of monitoring gateway buckets created",
            metrics.gateway_bucket_created.clone(),
        );
        registry.register(
            "discovery_error",
            "Total number of service discovery errors",
            metrics.discovery_errors.clone(),
        );
        registry.register(
            "durability_items_expected",
            "Number of items that should be present on the endpoint",
            metrics.durability_items_expected.clone(),
        );
        registry.register(
            "durability_items_found",
            "Number of items that are present on the endpoint",
            metrics.durability_items_found.clone(),
        );
        registry.register(
            "latency_seconds",
            "Latency for operation on the S3 endpoint",
            metrics.latency.clone(),
        );

        metrics
    }

    /// Record one timed operation against a target
    pub fn observe_operation(&self, operation: &str, target: &str, elapsed: Duration, success: bool) {
        let labels = OperationLabels {
            operation: operation.to_string(),
            target: target.to_string(),
        };
        self.requests.get_or_create(&labels).inc();
        self.latency
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64());
        if success {
            self.requests_success.get_or_create(&labels).inc();
        }
    }

    /// Record one operation against a gateway destination
    pub fn observe_gateway_operation(
        &self,
        operation: &str,
        target: &str,
        destination: &str,
        success: bool,
    ) {
        let labels = GatewayLabels {
            operation: operation.to_string(),
            target: target.to_string(),
            destination: destination.to_string(),
        };
        self.gateway_requests.get_or_create(&labels).inc();
        if success {
            self.gateway_requests_success.get_or_create(&labels).inc();
        }
    }

    pub fn inc_bucket_created(&self, target: &str) {
        self.bucket_created.get_or_create(&target_labels(target)).inc();
    }

    pub fn inc_gateway_bucket_created(&self, target: &str, destination: &str) {
        let labels = DestinationLabels {
            target: target.to_string(),
            destination: destination.to_string(),
        };
        self.gateway_bucket_created.get_or_create(&labels).inc();
    }

    pub fn inc_discovery_error(&self, target: &str) {
        self.discovery_errors.get_or_create(&target_labels(target)).inc();
    }

    pub fn set_durability_items(&self, target: &str, expected: usize, found: usize) {
        let labels = target_labels(target);
        self.durability_items_expected
            .get_or_create(&labels)
            .set(expected as i64);
        self.durability_items_found
            .get_or_create(&labels)
            .set(found as i64);
    }
}

fn target_labels(target: &str) -> TargetLabels {
    TargetLabels {
        target: target.to_string(),
    }
}

/// Read side of the families, for assertions
///
/// Reading a series that was never written creates it at zero.
#[cfg(test)]
impl Metrics {
    pub fn unregistered() -> Self {
        Self::register(&mut Registry::default())
    }

    pub fn requests_total(&self, operation: &str, target: &str) -> u64 {
        self.requests
            .get_or_create(&operation_labels(operation, target))
            .get()
    }

    pub fn requests_success_total(&self, operation: &str, target: &str) -> u64 {
        self.requests_success
            .get_or_create(&operation_labels(operation, target))
            .get()
    }

    pub fn gateway_requests_total(&self, operation: &str, target: &str, destination: &str) -> u64 {
        self.gateway_requests
            .get_or_create(&gateway_labels(operation, target, destination))
            .get()
    }

    pub fn gateway_requests_success_total(
        &self,
        operation: &str,
        target: &str,
        destination: &str,
    ) -> u64 {
        self.gateway_requests_success
            .get_or_create(&gateway_labels(operation, target, destination))
            .get()
    }

    pub fn discovery_errors_total(&self, target: &str) -> u64 {
        self.discovery_errors
            .get_or_create(&target_labels(target))
            .get()
    }

    pub fn bucket_created_total(&self, target: &str) -> u64 {
        self.bucket_created.get_or_create(&target_labels(target)).get()
    }

    pub fn durability_items(&self, target: &str) -> (i64, i64) {
        let labels = target_labels(target);
        (
            self.durability_items_expected.get_or_create(&labels).get(),
            self.durability_items_found.get_or_create(&labels).get(),
        )
    }
}

#[cfg(test)]
fn operation_labels(operation: &str, target: &str) -> OperationLabels {
    OperationLabels {
        operation: operation.to_string(),
        target: target.to_string(),
    }
}

#[cfg(test)]
fn gateway_labels(operation: &str, target: &str, destination: &str) -> GatewayLabels {
    GatewayLabels {
        operation: operation.to_string(),
        target: target.to_string(),
        destination: destination.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_observe_operation_counts_success_separately() {
        let metrics = Metrics::unregistered();
        metrics.observe_operation("put_object", "s3-par", Duration::from_millis(12), true);
        metrics.observe_operation("put_object", "s3-par", Duration::from_millis(40), false);

        assert_eq!(metrics.requests_total("put_object", "s3-par"), 2);
        assert_eq!(metrics.requests_success_total("put_object", "s3-par"), 1);
        assert_eq!(metrics.requests_total("put_object", "other"), 0);
    }

    #[test]
    fn test_durability_gauges() {
        let metrics = Metrics::unregistered();
        metrics.set_durability_items("s3-par", 10, 8);
        assert_eq!(metrics.durability_items("s3-par"), (10, 8));
    }

    #[test]
    fn test_exposition_names() {
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);
        metrics.observe_operation("list_buckets", "s3-par", Duration::from_millis(3), true);
        metrics.observe_gateway_operation("gateway_get_object", "gw", "s3-a", true);
        metrics.inc_discovery_error(UNKNOWN_TARGET);
        metrics.set_durability_items("s3-par", 10, 10);

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();

        assert!(buffer.contains("s3_requests_total{operation=\"list_buckets\",target=\"s3-par\"} 1"));
        assert!(buffer.contains("s3_requests_success_total"));
        assert!(buffer.contains(
            "s3_gateway_requests_total{operation=\"gateway_get_object\",target=\"gw\",destination=\"s3-a\"} 1"
        ));
        assert!(buffer.contains("s3_discovery_error_total{target=\"N/A\"} 1"));
        assert!(buffer.contains("s3_durability_items_found{target=\"s3-par\"} 10"));
        assert!(buffer.contains("s3_latency_seconds_bucket"));
    }
}
