//! Counters that make up a traffic report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key in [`Bucket::paths`] that mirrors [`Bucket::requests`]
pub const TOTAL_KEY: &str = "_total";

/// Counters for one label (network or site) under one virtual host.
///
/// The aliases accept snapshots written by the older Go report tool, which
/// kept no per-bucket byte count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bucket {
    #[serde(alias = "NumRequests")]
    pub requests: u64,
    pub bytes: i64,
    /// Hits per client identity, filled only while client tracking is on
    #[serde(alias = "Hosts")]
    pub clients: BTreeMap<String, u64>,
    /// Hits per base path plus the `_total` key, filled only while path tracking is on
    #[serde(alias = "Base_uri")]
    pub paths: BTreeMap<String, u64>,
    #[serde(alias = "TrackHosts")]
    pub track_clients: bool,
    #[serde(alias = "TrackURI")]
    pub track_paths: bool,
}

impl Bucket {
    pub fn new(track_clients: bool, track_paths: bool) -> Self {
        Self {
            track_clients,
            track_paths,
            ..Default::default()
        }
    }

    /// Count one request
    pub fn record(
        &mut self,
        client: &str,
        path: &str,
        bytes: i64,
        track_clients: bool,
        track_paths: bool,
    ) {
        self.requests = self.requests.saturating_add(1);
        self.bytes = self.bytes.saturating_add(bytes);
        bump(&mut self.paths, TOTAL_KEY, 1);

        if track_clients {
            bump(&mut self.clients, client, 1);
        }
        if track_paths {
            bump(&mut self.paths, path, 1);
        }

        self.track_clients |= track_clients;
        self.track_paths |= track_paths;
    }

    /// Number of distinct paths, not counting `_total`
    pub fn unique_paths(&self) -> usize {
        self.paths.keys().filter(|k| *k != TOTAL_KEY).count()
    }

    /// Add another bucket's counts into this one
    pub fn merge(&mut self, other: Bucket) {
        self.requests = self.requests.saturating_add(other.requests);
        self.bytes = self.bytes.saturating_add(other.bytes);
        merge_counts(&mut self.clients, other.clients);
        merge_counts(&mut self.paths, other.paths);
        self.track_clients |= other.track_clients;
        self.track_paths |= other.track_paths;
    }
}

/// Per-network and per-site buckets for one virtual host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualHostStats {
    #[serde(alias = "Networks")]
    pub networks: BTreeMap<String, Bucket>,
    #[serde(alias = "Sites")]
    pub sites: BTreeMap<String, Bucket>,
}

impl VirtualHostStats {
    pub fn merge(&mut self, other: VirtualHostStats) {
        merge_buckets(&mut self.networks, other.networks);
        merge_buckets(&mut self.sites, other.sites);
    }
}

/// Whole-run counters.
///
/// `total` always equals `on_campus + off_campus + ignored()`; the same
/// holds for the byte counters. Snapshots from the Go report tool
/// (`Total`, `OnCampus`, `Tracked`, ...) deserialize through the aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateState {
    #[serde(alias = "Total")]
    pub total: u64,
    #[serde(alias = "TotalBytes")]
    pub total_bytes: i64,
    #[serde(alias = "OnCampus")]
    pub on_campus: u64,
    #[serde(alias = "OnCampusBytes")]
    pub on_campus_bytes: i64,
    #[serde(alias = "OffCampus")]
    pub off_campus: u64,
    #[serde(alias = "OffCampusBytes")]
    pub off_campus_bytes: i64,
    #[serde(alias = "Tracked")]
    pub virtual_hosts: BTreeMap<String, VirtualHostStats>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests counted in the totals only.
    ///
    /// A foreign snapshot whose split exceeds its total gives zero.
    pub fn ignored(&self) -> u64 {
        self.total
            .saturating_sub(self.on_campus)
            .saturating_sub(self.off_campus)
    }

    pub fn ignored_bytes(&self) -> i64 {
        self.total_bytes
            .saturating_sub(self.on_campus_bytes)
            .saturating_sub(self.off_campus_bytes)
    }

    /// Add another run's counters into this one.
    ///
    /// Every counter is summed and nested maps are unioned with summed
    /// values, so merging shards in any order gives the same result.
    pub fn merge(&mut self, other: AggregateState) {
        self.total = self.total.saturating_add(other.total);
        self.total_bytes = self.total_bytes.saturating_add(other.total_bytes);
        self.on_campus = self.on_campus.saturating_add(other.on_campus);
        self.on_campus_bytes = self.on_campus_bytes.saturating_add(other.on_campus_bytes);
        self.off_campus = self.off_campus.saturating_add(other.off_campus);
        self.off_campus_bytes = self.off_campus_bytes.saturating_add(other.off_campus_bytes);

        for (host, stats) in other.virtual_hosts {
            self.virtual_hosts.entry(host).or_default().merge(stats);
        }
    }
}

fn bump(counts: &mut BTreeMap<String, u64>, key: &str, by: u64) {
    let count = counts.entry(key.to_string()).or_insert(0);
    *count = count.saturating_add(by);
}

fn merge_counts(into: &mut BTreeMap<String, u64>, from: BTreeMap<String, u64>) {
    for (key, count) in from {
        let total = into.entry(key).or_insert(0);
        *total = total.saturating_add(count);
    }
}

fn merge_buckets(into: &mut BTreeMap<String, Bucket>, from: BTreeMap<String, Bucket>) {
    for (label, bucket) in from {
        into.entry(label).or_default().merge(bucket);
    }
}
