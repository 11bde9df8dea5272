use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vhostlog::aggregate::{Classifier, TrafficAggregator};
use vhostlog::config::Config;
use vhostlog::ingest::ingest;
use vhostlog::policy::Policy;
use vhostlog::report::costs::CostEstimate;
use vhostlog::report::{merge_snapshots, write_snapshot, TextReport};
use vhostlog::resolver::{NoResolver, Resolver, SystemResolver};

#[derive(Parser)]
#[command(name = "vhostlog")]
#[command(about = "Per-network, per-virtual-host traffic reports from access logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read access log lines from stdin and print a traffic report
    Report {
        /// Policy file (JSON array of network, virtual host, and site rules)
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Write a JSON snapshot to this path ("-" for stderr)
        #[arg(long)]
        snapshot: Option<String>,
        /// Log progress every this many lines (0 disables)
        #[arg(long)]
        progress_interval: Option<u64>,
        /// Timeout for a single hostname lookup
        #[arg(long)]
        dns_timeout_ms: Option<u64>,
        /// Domain suffix whose hostnames are resolved before classification
        #[arg(long)]
        dns_suffix: Option<String>,
        /// Skip all DNS: institutional hostnames become failed lookups and
        /// tracked clients are listed without hostnames
        #[arg(long)]
        no_dns: bool,
    },
    /// Merge snapshots and print the combined report
    Merge {
        #[arg(required = true)]
        snapshots: Vec<PathBuf>,
        /// Write the merged snapshot here instead of printing a report ("-" for stderr)
        #[arg(long)]
        output: Option<String>,
        /// List tracked clients without reverse-resolving their hostnames
        #[arg(long)]
        no_dns: bool,
    },
    /// Merge snapshots and estimate monthly CDN costs
    Costs {
        #[arg(required = true)]
        snapshots: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Report {
            policy,
            snapshot,
            progress_interval,
            dns_timeout_ms,
            dns_suffix,
            no_dns,
        } => {
            let mut config = Config::from_env()?;
            if let Some(policy) = policy {
                config.policy_path = policy;
            }
            if snapshot.is_some() {
                config.snapshot = snapshot;
            }
            if let Some(interval) = progress_interval {
                config.progress_interval = interval;
            }
            if let Some(timeout_ms) = dns_timeout_ms {
                config.dns.timeout_ms = timeout_ms;
            }
            if let Some(suffix) = dns_suffix {
                config.dns.suffix = suffix;
            }

            let policy = Policy::from_file(&config.policy_path).with_context(|| {
                format!("Failed to load policy from {}", config.policy_path.display())
            })?;

            if no_dns {
                info!("Hostname resolution disabled");
                run_report(&config, policy, &NoResolver, false)
            } else {
                let resolver = system_resolver(&config)?;
                run_report(&config, policy, &resolver, true)
            }
        }
        Commands::Merge {
            snapshots,
            output,
            no_dns,
        } => {
            let merged = merge_snapshots(&snapshots).context("Failed to merge snapshots")?;
            match output {
                Some(destination) => write_snapshot(&merged, &destination)
                    .with_context(|| format!("Failed to write merged snapshot to {}", destination)),
                None => {
                    let mut out = io::stdout().lock();
                    if no_dns {
                        write!(out, "{}", TextReport::new(&merged))?;
                    } else {
                        let resolver = system_resolver(&Config::from_env()?)?;
                        write!(out, "{}", TextReport::new(&merged).with_hostnames(&resolver))?;
                    }
                    Ok(())
                }
            }
        }
        Commands::Costs { snapshots } => {
            let merged = merge_snapshots(&snapshots).context("Failed to merge snapshots")?;
            let mut out = io::stdout().lock();
            writeln!(out, "tracked {} vhosts", merged.virtual_hosts.len())?;
            write!(out, "{}", CostEstimate::from_state(&merged))?;
            Ok(())
        }
    }
}

fn system_resolver(config: &Config) -> Result<SystemResolver> {
    SystemResolver::new(
        Duration::from_millis(config.dns.timeout_ms),
        config.dns.cache_entries,
    )
    .context("Failed to start hostname resolver")
}

fn run_report<R: Resolver>(
    config: &Config,
    policy: Policy,
    resolver: &R,
    hostnames: bool,
) -> Result<()> {
    let classifier = Classifier::new(policy, resolver).with_dns_suffix(config.dns.suffix.clone());
    let mut aggregator = TrafficAggregator::new(classifier);

    let stdin = io::stdin();
    ingest(stdin.lock(), &mut aggregator, config.progress_interval)
        .context("Failed to read access log from stdin")?;

    let state = aggregator.into_state();

    let mut report = TextReport::new(&state);
    if hostnames {
        report = report.with_hostnames(resolver);
    }

    let mut out = io::stdout().lock();
    write!(out, "{}", report)?;
    out.flush()?;

    if let Some(destination) = &config.snapshot {
        write_snapshot(&state, destination)
            .with_context(|| format!("Failed to write snapshot to {}", destination))?;
    }

    Ok(())
}
