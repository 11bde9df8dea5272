//! Hostname resolution for logged clients
//!
//! Some servers log a reverse-resolved hostname instead of the client
//! address. Hostnames inside the institutional domain are resolved back to
//! an address so they can be classified; every lookup is bounded by a
//! timeout and a timeout counts as a failed lookup. The report goes the
//! other way and names tracked client addresses.

use moka::sync::Cache;
use std::net::IpAddr;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::error::LookupError;

/// Resolves hostnames to addresses, and optionally addresses to hostnames
pub trait Resolver {
    /// First address for `host`, or `None` when the lookup fails or times out
    fn resolve(&self, host: &str) -> Option<IpAddr>;

    /// Hostname for `addr`, used only for display
    fn reverse(&self, _addr: IpAddr) -> Result<String, LookupError> {
        Err(LookupError::Unavailable)
    }
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn resolve(&self, host: &str) -> Option<IpAddr> {
        (**self).resolve(host)
    }

    fn reverse(&self, addr: IpAddr) -> Result<String, LookupError> {
        (**self).reverse(addr)
    }
}

/// Resolver backed by the system resolver, with memoized answers
pub struct SystemResolver {
    runtime: Runtime,
    timeout: Duration,
    cache: Cache<String, Option<IpAddr>>,
    reverse_cache: Cache<IpAddr, Result<String, LookupError>>,
}

impl SystemResolver {
    /// Create a resolver
    ///
    /// # Arguments
    /// * `timeout` - Upper bound on a single lookup
    /// * `max_cache_entries` - How many answers (including failures) to remember, per direction
    pub fn new(timeout: Duration, max_cache_entries: u64) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let cache = Cache::builder().max_capacity(max_cache_entries).build();
        let reverse_cache = Cache::builder().max_capacity(max_cache_entries).build();

        Ok(Self {
            runtime,
            timeout,
            cache,
            reverse_cache,
        })
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn lookup(&self, host: &str) -> Option<IpAddr> {
        let lookup = tokio::net::lookup_host((host, 0));

        match self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, lookup).await })
        {
            Ok(Ok(mut addrs)) => addrs.next().map(|addr| addr.ip()),
            Ok(Err(e)) => {
                debug!(host, error = %e, "Hostname lookup failed");
                None
            }
            Err(_) => {
                debug!(host, timeout_ms = self.timeout_ms(), "Hostname lookup timed out");
                None
            }
        }
    }

    fn reverse_lookup(&self, addr: IpAddr) -> Result<String, LookupError> {
        // getnameinfo blocks, so it runs on the blocking pool under the timeout
        let answer = self.runtime.block_on(async {
            let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr));
            tokio::time::timeout(self.timeout, lookup).await
        });

        match answer {
            Ok(Ok(Ok(name))) => Ok(name),
            Ok(Ok(Err(e))) => {
                debug!(%addr, error = %e, "Reverse lookup failed");
                Err(LookupError::Failed(e.to_string()))
            }
            Ok(Err(e)) => Err(LookupError::Failed(e.to_string())),
            Err(_) => {
                debug!(%addr, timeout_ms = self.timeout_ms(), "Reverse lookup timed out");
                Err(LookupError::Timeout(self.timeout_ms()))
            }
        }
    }
}

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> Option<IpAddr> {
        self.cache
            .get_with(host.to_string(), || self.lookup(host))
    }

    fn reverse(&self, addr: IpAddr) -> Result<String, LookupError> {
        self.reverse_cache
            .get_with(addr, || self.reverse_lookup(addr))
    }
}

/// Resolver that never answers, for runs without DNS access
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl Resolver for NoResolver {
    fn resolve(&self, _host: &str) -> Option<IpAddr> {
        None
    }
}
