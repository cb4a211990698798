//! Hostname Resolution Module
//!
//! This module maps report source addresses to display hostnames through reverse DNS.
//! Lookups are slow and may fail, so every run goes through a [`HostnameCache`] that asks
//! the resolver at most once per distinct address and falls back to the bare IP.
use crate::error::Result;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::Resolver;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

/// Anything that can turn an IP address string into a hostname.
pub trait HostnameResolver {
    /// Returns the hostname for `ip`, or `None` when it cannot be resolved.
    fn resolve(&self, ip: &str) -> Option<String>;
}

/// Reverse DNS (PTR) lookups with a bounded timeout.
pub struct DnsResolver {
    resolver: Resolver,
}

impl DnsResolver {
    /// Builds a resolver that gives up on a lookup after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        let resolver = Resolver::new(ResolverConfig::default(), opts)?;
        Ok(Self { resolver })
    }
}

impl HostnameResolver for DnsResolver {
    fn resolve(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = ip.parse().ok()?;
        match self.resolver.reverse_lookup(addr) {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .filter(|name| !name.is_empty()),
            Err(e) => {
                log::debug!("Reverse lookup failed for {}: {}", ip, e);
                None
            }
        }
    }
}

/// A resolver that never resolves, so every source is shown by its IP.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLookup;

impl HostnameResolver for NoLookup {
    fn resolve(&self, _ip: &str) -> Option<String> {
        None
    }
}

/// Per-run memo of resolved hostnames.
pub struct HostnameCache<'r> {
    resolver: &'r dyn HostnameResolver,
    names: HashMap<String, String>,
}

impl<'r> HostnameCache<'r> {
    pub fn new(resolver: &'r dyn HostnameResolver) -> Self {
        Self {
            resolver,
            names: HashMap::new(),
        }
    }

    /// Returns the display name for `ip`, resolving it on first sight only.
    pub fn hostname_for(&mut self, ip: &str) -> String {
        if let Some(name) = self.names.get(ip) {
            return name.clone();
        }
        let name = if ip.is_empty() {
            String::new()
        } else {
            self.resolver.resolve(ip).unwrap_or_else(|| ip.to_string())
        };
        self.names.insert(ip.to_string(), name.clone());
        name
    }

    /// Number of distinct addresses seen so far.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
