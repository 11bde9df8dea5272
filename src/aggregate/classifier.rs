//! Network classification of logged clients

use ipnet::IpNet;
use once_cell::sync::Lazy;
use std::net::IpAddr;

use crate::policy::{NetworkMatch, Policy};
use crate::resolver::Resolver;

/// Client identity recorded when a hostname could not be resolved
pub const UNRESOLVED_CLIENT: &str = "unknownDNS";

/// Network label for hostnames whose lookup failed
pub const LOOKUP_ERROR_LABEL: &str = "error";

/// Network label for hostnames outside the institutional domain
pub const OUTSIDE_DOMAIN_LABEL: &str = "outsideBUDNS";

/// Institutional domain whose hostnames are worth resolving
pub const DEFAULT_DNS_SUFFIX: &str = ".bu.edu";

// Fixed campus ranges for the on/off split, independent of any policy
static CAMPUS_NETWORKS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    ["10.0.0.0/8", "128.197.0.0/16", "168.122.0.0/16"]
        .iter()
        .map(|net| net.parse().unwrap())
        .collect()
});

/// Whether an address is inside the campus ranges. Unknown addresses are off campus.
pub fn is_on_campus(addr: Option<IpAddr>) -> bool {
    match addr {
        Some(addr) => CAMPUS_NETWORKS.iter().any(|net| net.contains(&addr)),
        None => false,
    }
}

/// Applies a [`Policy`] to logged clients, resolving hostnames where needed
pub struct Classifier<R> {
    policy: Policy,
    resolver: R,
    dns_suffix: String,
}

impl<R: Resolver> Classifier<R> {
    pub fn new(policy: Policy, resolver: R) -> Self {
        Self {
            policy,
            resolver,
            dns_suffix: DEFAULT_DNS_SUFFIX.to_string(),
        }
    }

    /// Use a different institutional domain suffix (e.g. `.example.edu`)
    pub fn with_dns_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dns_suffix = suffix.into();
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Classify the client field of a log record.
    ///
    /// A literal address is matched against the policy directly. A hostname
    /// in the institutional domain is resolved first; if that fails the
    /// client is labelled `error`. Any other hostname is labelled
    /// `outsideBUDNS`: it is counted off campus but never reaches a
    /// virtual host bucket.
    pub fn classify_network(&self, client: &str) -> NetworkMatch {
        if let Ok(addr) = client.parse::<IpAddr>() {
            return self.policy.resolve_network(addr);
        }

        if !client.ends_with(&self.dns_suffix) {
            return NetworkMatch {
                client: client.to_string(),
                addr: None,
                track_clients: false,
                track_paths: false,
                ignore: false,
                untracked: true,
                label: OUTSIDE_DOMAIN_LABEL.to_string(),
            };
        }

        match self.resolver.resolve(client) {
            Some(addr) => self.policy.resolve_network(addr),
            None => NetworkMatch {
                client: UNRESOLVED_CLIENT.to_string(),
                addr: None,
                track_clients: true,
                track_paths: false,
                ignore: false,
                untracked: false,
                label: LOOKUP_ERROR_LABEL.to_string(),
            },
        }
    }
}
