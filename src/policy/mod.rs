//! Classification policy
//!
//! A policy is loaded once at startup from a JSON array of rule objects and
//! never changes afterwards. It answers three questions for the fold step:
//! which named network an address belongs to, what to do with a virtual
//! host, and what to do with a top-level site path.

pub mod models;

pub use models::{Disposition, NetworkMatch, NetworkRule, Rule};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

use crate::error::PolicyError;

/// Label for addresses that match no network rule
pub const DEFAULT_LABEL: &str = "default";

/// Immutable set of network, virtual host, and site rules
#[derive(Debug, Clone, Default)]
pub struct Policy {
    networks: Vec<NetworkRule>,
    virtual_hosts: HashMap<String, Disposition>,
    sites: HashMap<String, Disposition>,
}

impl Policy {
    /// Build a policy from already-classified rules.
    ///
    /// Network rules keep their declared order. A later virtual host or site
    /// rule for the same name replaces an earlier one.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut policy = Policy::default();

        for rule in rules {
            match rule {
                Rule::Network(net) => policy.networks.push(net),
                Rule::VirtualHost { host, disposition } => {
                    policy.virtual_hosts.insert(host, disposition);
                }
                Rule::Site {
                    prefix,
                    disposition,
                } => {
                    policy.sites.insert(prefix, disposition);
                }
            }
        }

        policy
    }

    /// Load a policy from the JSON objects of a policy file
    pub fn load(objects: &[Map<String, Value>]) -> Result<Self, PolicyError> {
        let rules = objects
            .iter()
            .map(Rule::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_rules(rules))
    }

    /// Parse a policy from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, PolicyError> {
        let objects: Vec<Map<String, Value>> = serde_json::from_str(json)?;
        Self::load(&objects)
    }

    /// Read and parse a policy file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let policy = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            networks = policy.networks.len(),
            virtual_hosts = policy.virtual_hosts.len(),
            sites = policy.sites.len(),
            "Loaded classification policy"
        );
        Ok(policy)
    }

    /// Find the first network rule, in declared order, containing `addr`.
    ///
    /// Overlapping prefixes are not ranked by specificity; order alone decides.
    /// An address outside every rule gets the `default` label with no detail
    /// tracking.
    pub fn resolve_network(&self, addr: IpAddr) -> NetworkMatch {
        let client = addr.to_string();

        match self.networks.iter().find(|rule| rule.contains(&addr)) {
            Some(rule) => NetworkMatch {
                client,
                addr: Some(addr),
                track_clients: rule.track_clients,
                track_paths: rule.track_paths,
                ignore: rule.ignore,
                untracked: false,
                label: rule.name.clone(),
            },
            None => NetworkMatch {
                client,
                addr: Some(addr),
                track_clients: false,
                track_paths: false,
                ignore: false,
                untracked: false,
                label: DEFAULT_LABEL.to_string(),
            },
        }
    }

    /// Disposition of a virtual host; unlisted hosts are tracked
    pub fn resolve_virtual_host(&self, host: &str) -> Disposition {
        self.virtual_hosts
            .get(host)
            .copied()
            .unwrap_or(Disposition::Track)
    }

    /// Disposition of a top-level site segment; unlisted sites are ignored
    pub fn resolve_site(&self, prefix: &str) -> Disposition {
        self.sites
            .get(prefix)
            .copied()
            .unwrap_or(Disposition::Ignore)
    }

    pub fn networks(&self) -> &[NetworkRule] {
        &self.networks
    }
}
