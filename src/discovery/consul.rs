//! Consul-backed service registry
//!
//! Services are selected by tag from the catalog, then resolved through the
//! health endpoint. The address of a service comes from its metadata:
//!
//! - `proxy_address` wins when present
//! - otherwise `external_cluster_fqdn`
//! - otherwise resolution fails
//!
//! Gateways additionally carry `gateway_destinations`, a `;`-separated list of
//! `datacenter:service` pairs. Each pair is resolved in its own datacenter.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Destination, Role, ServiceRegistry};
use crate::error::{Error, Result};

const PROXY_ADDRESS_META: &str = "proxy_address";
const EXTERNAL_FQDN_META: &str = "external_cluster_fqdn";
const GATEWAY_DESTINATIONS_META: &str = "gateway_destinations";

/// One entry of `/v1/health/service/:service`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    #[serde(default)]
    pub service: AgentService,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub meta: Option<HashMap<String, String>>,
}

impl AgentService {
    fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.as_ref()?.get(key).map(String::as_str)
    }
}

/// Registry client talking to a Consul agent over HTTP
pub struct ConsulRegistry {
    client: Client,
    base_url: String,
    tag: String,
    gateway_tag: String,
}

impl ConsulRegistry {
    pub fn new(
        address: &str,
        tag: impl Into<String>,
        gateway_tag: impl Into<String>,
    ) -> Result<Self> {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("s3-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            tag: tag.into(),
            gateway_tag: gateway_tag.into(),
        })
    }

    async fn health_service(
        &self,
        service: &str,
        datacenter: Option<&str>,
    ) -> Result<Vec<ServiceEntry>> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service);
        let mut request = self.client.get(&url);
        if let Some(dc) = datacenter {
            request = request.query(&[("dc", dc)]);
        }

        debug!("Querying Consul health endpoint: {}", url);

        let entries = request
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ServiceEntry>>()
            .await?;
        Ok(entries)
    }

    async fn resolve_destinations(&self, destinations: &[Destination]) -> Result<Vec<String>> {
        let mut endpoints = Vec::with_capacity(destinations.len());

        for destination in destinations {
            let entries = self
                .health_service(&destination.service, Some(&destination.datacenter))
                .await
                .map_err(|e| {
                    warn!(
                        "Consul query failed for {} (dc: {}, service: {}): {}",
                        destination.raw, destination.datacenter, destination.service, e
                    );
                    e
                })?;
            let endpoint = endpoint_from_entries(&destination.service, &entries)?;
            info!("Added gateway destination: {}", endpoint);
            endpoints.push(endpoint);
        }

        Ok(endpoints)
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn list_matching_services(&self) -> Result<BTreeMap<String, Role>> {
        let url = format!("{}/v1/catalog/services", self.base_url);
        let services = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<HashMap<String, Vec<String>>>()
            .await?;

        Ok(select_services(&services, &self.tag, &self.gateway_tag))
    }

    async fn resolve_endpoint(&self, name: &str, role: Role) -> Result<(String, Vec<String>)> {
        info!("Fetching endpoints for service: {}", name);

        let entries = self.health_service(name, None).await?;
        let endpoint = endpoint_from_entries(name, &entries)?;

        if !role.is_gateway() {
            return Ok((endpoint, Vec::new()));
        }

        let destinations = destinations_from_entries(&entries)?;
        let replicas = self.resolve_destinations(&destinations).await?;
        Ok((endpoint, replicas))
    }
}

/// Keep the services tagged with `tag` or `gateway_tag`
///
/// The first matching tag of a service decides its role.
pub fn select_services(
    services: &HashMap<String, Vec<String>>,
    tag: &str,
    gateway_tag: &str,
) -> BTreeMap<String, Role> {
    let mut selected = BTreeMap::new();

    for (name, tags) in services {
        let role = tags.iter().find_map(|t| {
            if t == gateway_tag {
                Some(Role::Gateway)
            } else if t == tag {
                Some(Role::Simple)
            } else {
                None
            }
        });

        if let Some(role) = role {
            selected.insert(name.clone(), role);
        }
    }

    selected
}

/// Resolve the address a service should be probed on
pub fn endpoint_from_entries(name: &str, entries: &[ServiceEntry]) -> Result<String> {
    let lookup = |key: &str| {
        entries
            .iter()
            .find_map(|entry| entry.service.meta_value(key))
            .map(str::to_string)
    };

    lookup(PROXY_ADDRESS_META)
        .or_else(|| lookup(EXTERNAL_FQDN_META))
        .ok_or_else(|| Error::EndpointNotFound(name.to_string()))
}

/// Extract the gateway destinations registered on a service
///
/// A gateway without `gateway_destinations` is malformed. When several
/// entries carry the key, the last one wins.
pub fn destinations_from_entries(entries: &[ServiceEntry]) -> Result<Vec<Destination>> {
    entries
        .iter()
        .filter_map(|entry| entry.service.meta_value(GATEWAY_DESTINATIONS_META))
        .last()
        .ok_or_else(|| {
            warn!("Gateway service registered without {}", GATEWAY_DESTINATIONS_META);
            Error::MalformedDestinations(format!("{} missing", GATEWAY_DESTINATIONS_META))
        })
        .and_then(parse_destinations)
}

/// Parse a `dc:service;dc:service` list
///
/// A single pair without `:` rejects the whole list.
pub fn parse_destinations(raw: &str) -> Result<Vec<Destination>> {
    debug!("Processing gateway destinations: {}", raw);

    raw.split(';')
        .map(|pair| {
            let (datacenter, service) = pair.rsplit_once(':').ok_or_else(|| {
                warn!("Failed to match gateway destination: {}", pair);
                Error::MalformedDestinations(raw.to_string())
            })?;
            Ok(Destination {
                datacenter: datacenter.to_string(),
                service: service.to_string(),
                raw: pair.to_string(),
            })
        })
        .collect()
}
