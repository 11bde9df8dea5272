use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::aggregate::classifier::DEFAULT_DNS_SUFFIX;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub policy_path: PathBuf,
    pub progress_interval: u64,
    /// Where to write the JSON snapshot; `-` means stderr
    pub snapshot: Option<String>,
    pub dns: DnsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub suffix: String,
    #[serde(default = "DnsConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "DnsConfig::default_cache_entries")]
    pub cache_entries: u64,
}

impl DnsConfig {
    const fn default_timeout_ms() -> u64 {
        2000
    }

    const fn default_cache_entries() -> u64 {
        100_000
    }
}

impl Config {
    const fn default_progress_interval() -> u64 {
        500_000
    }

    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let policy_path = std::env::var("VHOSTLOG_POLICY")
            .unwrap_or_else(|_| "ipnets.json".to_string())
            .into();

        let progress_interval = match std::env::var("VHOSTLOG_PROGRESS_INTERVAL") {
            Ok(v) => v.parse::<u64>()?,
            Err(_) => Self::default_progress_interval(),
        };

        let snapshot = std::env::var("VHOSTLOG_SNAPSHOT")
            .ok()
            .filter(|v| !v.is_empty());

        let suffix =
            std::env::var("VHOSTLOG_DNS_SUFFIX").unwrap_or_else(|_| DEFAULT_DNS_SUFFIX.to_string());

        let timeout_ms = std::env::var("VHOSTLOG_DNS_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_else(DnsConfig::default_timeout_ms);

        let cache_entries = std::env::var("VHOSTLOG_DNS_CACHE")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_else(DnsConfig::default_cache_entries);

        if !suffix.starts_with('.') {
            tracing::warn!(
                "VHOSTLOG_DNS_SUFFIX '{suffix}' has no leading dot and will also match hosts like 'x{suffix}'"
            );
        }

        Ok(Config {
            policy_path,
            progress_interval,
            snapshot,
            dns: DnsConfig {
                suffix,
                timeout_ms,
                cache_entries,
            },
        })
    }
}
