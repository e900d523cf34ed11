//! In-process registry used by the controller tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Role, ServiceRegistry, Target};
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    targets: BTreeMap<String, Target>,
    listing_fails: bool,
    unresolvable: Vec<String>,
}

/// Registry serving a fixed, mutable set of targets
#[derive(Default)]
pub struct StaticRegistry {
    state: Mutex<State>,
}

impl StaticRegistry {
    pub fn with_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let registry = Self::default();
        registry.set_targets(targets);
        registry
    }

    pub fn set_targets(&self, targets: impl IntoIterator<Item = Target>) {
        let mut state = self.state.lock().unwrap();
        state.targets = targets.into_iter().map(|t| (t.name.clone(), t)).collect();
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().listing_fails = fail;
    }

    pub fn fail_resolution_of(&self, name: &str) {
        self.state.lock().unwrap().unresolvable.push(name.to_string());
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn list_matching_services(&self) -> Result<BTreeMap<String, Role>> {
        let state = self.state.lock().unwrap();
        if state.listing_fails {
            return Err(Error::Discovery("catalog unavailable".to_string()));
        }
        Ok(state
            .targets
            .values()
            .map(|t| (t.name.clone(), t.role))
            .collect())
    }

    async fn resolve_endpoint(&self, name: &str, _role: Role) -> Result<(String, Vec<String>)> {
        let state = self.state.lock().unwrap();
        if state.unresolvable.iter().any(|n| n == name) {
            return Err(Error::EndpointNotFound(name.to_string()));
        }
        state
            .targets
            .get(name)
            .map(|t| (t.address.clone(), t.replicas.clone()))
            .ok_or_else(|| Error::EndpointNotFound(name.to_string()))
    }
}
