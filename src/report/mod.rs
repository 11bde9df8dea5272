//! Report output: the human-readable summary and JSON snapshots

pub mod costs;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

use crate::aggregate::{AggregateState, Bucket, TOTAL_KEY};
use crate::error::{LookupError, ReportError};
use crate::resolver::Resolver;

const RULE: &str = "=======================================================================";

/// Format an integer with comma thousands separators
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    grouped
}

fn count(value: u64) -> String {
    group_thousands(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Percentage of `part` in `whole`; zero when `whole` is zero
pub fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        100.0 * part / whole
    }
}

/// Entries sorted by count, highest first, ties by key
pub fn sorted_by_count(counts: &BTreeMap<String, u64>) -> Vec<(&str, u64)> {
    let mut sorted: Vec<(&str, u64)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    sorted
}

/// Human-readable report of an [`AggregateState`]
pub struct TextReport<'a> {
    state: &'a AggregateState,
    hostnames: Option<&'a dyn Resolver>,
}

impl<'a> TextReport<'a> {
    pub fn new(state: &'a AggregateState) -> Self {
        Self {
            state,
            hostnames: None,
        }
    }

    /// Name each tracked client with a reverse lookup through `resolver`
    pub fn with_hostnames(mut self, resolver: &'a dyn Resolver) -> Self {
        self.hostnames = Some(resolver);
        self
    }

    fn hostname(resolver: &dyn Resolver, client: &str) -> String {
        let answer = client
            .parse::<IpAddr>()
            .map_err(|_| LookupError::Failed(format!("'{}' is not an address", client)))
            .and_then(|addr| resolver.reverse(addr));

        match answer {
            Ok(name) => name,
            Err(e) => format!("DNS-error:{}", e),
        }
    }

    fn split_line(
        f: &mut fmt::Formatter<'_>,
        title: &str,
        requests: u64,
        bytes: i64,
        state: &AggregateState,
    ) -> fmt::Result {
        writeln!(
            f,
            "### {}: requests= {} ({:.2} %) kbytes= {} ({:.2} %)",
            title,
            count(requests),
            percent(requests as f64, state.total as f64),
            group_thousands(bytes / 1024),
            percent(bytes as f64, state.total_bytes as f64),
        )
    }

    fn buckets(
        &self,
        f: &mut fmt::Formatter<'_>,
        section: &str,
        buckets: &BTreeMap<String, Bucket>,
    ) -> fmt::Result {
        for (label, bucket) in buckets {
            writeln!(f)?;
            writeln!(f, "{}", RULE)?;
            writeln!(
                f,
                "*** {}:{} ({} requests; {} unique hosts, {} base_uri; {} kbytes)",
                section,
                label,
                count(bucket.paths.get(TOTAL_KEY).copied().unwrap_or(bucket.requests)),
                bucket.clients.len(),
                bucket.unique_paths(),
                group_thousands(bucket.bytes / 1024),
            )?;

            if bucket.track_clients {
                writeln!(f)?;
                writeln!(f, " * {} IPs", label)?;
                for (client, hits) in sorted_by_count(&bucket.clients) {
                    match self.hostnames {
                        Some(resolver) => writeln!(
                            f,
                            "    {}: {} ({}:{} - hostname={})",
                            count(hits),
                            client,
                            section,
                            label,
                            Self::hostname(resolver, client)
                        )?,
                        None => {
                            writeln!(f, "    {}: {} ({}:{})", count(hits), client, section, label)?
                        }
                    }
                }
            }

            if bucket.track_paths {
                writeln!(f)?;
                writeln!(f, " * {} base_uri requests", label)?;
                for (path, hits) in sorted_by_count(&bucket.paths) {
                    if path != TOTAL_KEY {
                        writeln!(f, "    {}: {} ({}:{})", count(hits), path, section, label)?;
                    }
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state;

        writeln!(
            f,
            "### Total requests= {} kbytes={:.2}",
            count(state.total),
            state.total_bytes as f64 / 1024.0
        )?;
        Self::split_line(f, "On Campus", state.on_campus, state.on_campus_bytes, state)?;
        Self::split_line(f, "Off Campus", state.off_campus, state.off_campus_bytes, state)?;
        Self::split_line(f, "Ignored", state.ignored(), state.ignored_bytes(), state)?;

        for (host, stats) in &state.virtual_hosts {
            self.buckets(f, &format!("network-{}", host), &stats.networks)?;
            self.buckets(f, &format!("sites-{}", host), &stats.sites)?;
        }

        Ok(())
    }
}

/// Write a JSON snapshot of `state`.
///
/// `destination` is a file path, or `-` for standard error.
pub fn write_snapshot(state: &AggregateState, destination: &str) -> Result<(), ReportError> {
    if destination == "-" {
        let stderr = io::stderr();
        let mut writer = stderr.lock();
        serde_json::to_writer(&mut writer, state)?;
        writer.flush()?;
        return Ok(());
    }

    let mut writer = BufWriter::new(File::create(destination)?);
    serde_json::to_writer_pretty(&mut writer, state)?;
    writer.flush()?;
    info!(path = destination, "Wrote snapshot");
    Ok(())
}

/// Read a JSON snapshot written by [`write_snapshot`]
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<AggregateState, ReportError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Read and merge several snapshots into one state
pub fn merge_snapshots<P: AsRef<Path>>(paths: &[P]) -> Result<AggregateState, ReportError> {
    let mut merged = AggregateState::new();

    for path in paths {
        let path = path.as_ref();
        info!(path = %path.display(), "Adding snapshot");
        merged.merge(read_snapshot(path)?);
    }

    Ok(merged)
}
