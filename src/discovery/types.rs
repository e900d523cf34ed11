//! Shared types for discovered S3 targets
//!
//! These types are used across the registry client and controller logic.

use serde::{Deserialize, Serialize};

/// Role a discovered S3 service plays
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Role {
    /// Stand-alone S3 endpoint, probed for latency and durability
    Simple,

    /// Write gateway replicating to one or more destination endpoints
    Gateway,
}

impl Role {
    pub fn is_gateway(&self) -> bool {
        matches!(self, Role::Gateway)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Simple => write!(f, "Simple"),
            Role::Gateway => write!(f, "Gateway"),
        }
    }
}

/// One discovered S3 endpoint
///
/// The name is the identity key. Two targets are equal only when the name,
/// address, role and the ordered replica list all match, so a target whose
/// endpoint moved compares unequal and gets its worker restarted.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub address: String,
    pub role: Role,
    pub replicas: Vec<String>,
}

impl Target {
    pub fn simple(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            role: Role::Simple,
            replicas: Vec::new(),
        }
    }

    pub fn gateway(
        name: impl Into<String>,
        address: impl Into<String>,
        replicas: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            role: Role::Gateway,
            replicas,
        }
    }
}

/// A `datacenter:service` pair listed in `gateway_destinations`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub datacenter: String,
    pub service: String,
    pub raw: String,
}
