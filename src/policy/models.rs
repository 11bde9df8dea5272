//! Rule model for the classification policy

use ipnet::IpNet;
use serde_json::{Map, Value};
use std::net::IpAddr;

use crate::error::PolicyError;

/// How much detail is retained for a virtual host or site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the record from this level of the report
    Ignore,
    /// Count requests and bytes only
    Summarize,
    /// Count requests and bytes and keep per-client / per-path detail
    Track,
}

impl Disposition {
    /// Map a rule's `status` string to a disposition.
    ///
    /// Anything other than `ignore` or `summarize`, including a missing
    /// status, means `Track`.
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            Some("ignore") => Disposition::Ignore,
            Some("summarize") => Disposition::Summarize,
            _ => Disposition::Track,
        }
    }

    /// Whether records with this disposition are dropped
    pub fn is_ignored(self) -> bool {
        matches!(self, Disposition::Ignore)
    }

    /// Whether records with this disposition keep per-client / per-path detail
    pub fn tracks_detail(self) -> bool {
        matches!(self, Disposition::Track)
    }
}

/// A named IP network and the detail to keep for addresses inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRule {
    pub name: String,
    pub net: IpNet,
    pub track_clients: bool,
    pub track_paths: bool,
    /// Count toward the grand totals only
    pub ignore: bool,
}

impl NetworkRule {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.net.contains(addr)
    }
}

/// One entry of a policy file, decided once at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Network(NetworkRule),
    VirtualHost {
        host: String,
        disposition: Disposition,
    },
    Site {
        prefix: String,
        disposition: Disposition,
    },
}

impl Rule {
    /// Build a rule from one JSON object of a policy file.
    ///
    /// The rule kind is chosen by which identifying key is present:
    /// `virtual` wins over `site`, and an object with neither is a network
    /// rule. The `track` string enables client tracking when it contains
    /// `hosts` and path tracking when it contains `uri`. `ignore` is tested
    /// for presence only; its value is never read.
    pub fn from_json(object: &Map<String, Value>) -> Result<Self, PolicyError> {
        let field = |key: &str| object.get(key).and_then(Value::as_str);
        let status = field("status");

        if let Some(host) = object.get("virtual") {
            return Ok(Rule::VirtualHost {
                host: json_string(host),
                disposition: Disposition::from_status(status),
            });
        }

        if let Some(prefix) = object.get("site") {
            return Ok(Rule::Site {
                prefix: json_string(prefix),
                disposition: Disposition::from_status(status),
            });
        }

        let name = field("name").unwrap_or_default().to_string();
        let track = field("track").unwrap_or_default();
        let net = field("net").ok_or_else(|| PolicyError::MissingNetwork { name: name.clone() })?;
        let net = net
            .trim()
            .parse::<IpNet>()
            .map_err(|source| PolicyError::InvalidNetwork {
                name: name.clone(),
                net: net.to_string(),
                source,
            })?;

        Ok(Rule::Network(NetworkRule {
            name,
            net: net.trunc(),
            track_clients: track.contains("hosts"),
            track_paths: track.contains("uri"),
            ignore: object.contains_key("ignore"),
        }))
    }
}

fn json_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Result of classifying a client address against the network rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMatch {
    /// Client identity recorded in per-client counters
    pub client: String,
    /// Address used for the campus membership test, when one is known
    pub addr: Option<IpAddr>,
    pub track_clients: bool,
    pub track_paths: bool,
    /// Count toward the grand totals only
    pub ignore: bool,
    /// Count toward the campus split but keep out of every virtual host
    pub untracked: bool,
    /// Rule name, or one of the sentinel labels
    pub label: String,
}
