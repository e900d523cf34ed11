//! Service discovery for S3 endpoints
//!
//! The watcher only sees the [`ServiceRegistry`] trait; [`ConsulRegistry`] is
//! the production implementation backed by the Consul HTTP API.

mod consul;
#[cfg(test)]
pub(crate) mod static_registry;
mod types;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

pub use consul::{
    destinations_from_entries, endpoint_from_entries, parse_destinations, select_services,
    AgentService, ConsulRegistry, ServiceEntry,
};
pub use types::*;

/// Source of candidate targets
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Every registered service carrying the plain or the gateway tag, with its role
    async fn list_matching_services(&self) -> Result<BTreeMap<String, Role>>;

    /// Resolve the address of a service and, for gateways, its replica addresses
    async fn resolve_endpoint(&self, name: &str, role: Role) -> Result<(String, Vec<String>)>;
}
