//! HTTP exposition of the probe metrics
//!
//! Serves the Prometheus registry on `/metrics` and a readiness endpoint on
//! `/ready`.

mod server;

pub use server::{metrics_handler, ready_handler, router, run_server};
