//! Probe controller
//!
//! The [`Watcher`] reconciles discovered targets into running
//! [`ProbeWorker`]s; each worker prepares its buckets and then schedules
//! latency, durability or gateway checks on its own triggers.

mod buckets;
mod checks;
pub mod metrics;
mod probe;
mod watcher;

pub use buckets::{durability_item_name, DURABILITY_ITEM_PREFIX, EXPIRY_DAYS};
pub use checks::{random_object_name, random_payload, with_deadline, GATEWAY_OBJECT_SIZE};
pub use metrics::Metrics;
pub use probe::{trigger_period, ProbeWorker};
pub use watcher::{diff_targets, ReconcileSummary, Watcher};
