//! Domain resolution probes.
//!
//! A probe resolves one domain through one specific resolver. The scorer and
//! the health monitor only see the [`DomainProbe`] trait, so tests can swap in
//! deterministic probes.

#![allow(clippy::missing_errors_doc)]

use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::Duration;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Resolves a domain through a given resolver.
#[async_trait]
pub trait DomainProbe: Send + Sync {
    /// Resolve `domain` through `resolver` and return how many addresses came back.
    async fn lookup(&self, resolver: IpAddr, domain: &str) -> Result<usize>;
}

/// Probe backed by trust-dns, one uncached resolver instance per upstream.
///
/// Answers must never come from a cache, otherwise the measured latency says
/// nothing about the upstream.
pub struct ResolverProbe {
    port: u16,
    timeout: Duration,
    resolvers: DashMap<IpAddr, TokioAsyncResolver>,
}

impl ResolverProbe {
    /// Create a probe querying upstreams on `port` with a per-lookup `timeout`.
    #[must_use]
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            resolvers: DashMap::new(),
        }
    }

    fn resolver_for(&self, server: IpAddr) -> Result<TokioAsyncResolver> {
        if let Some(resolver) = self.resolvers.get(&server) {
            return Ok(resolver.clone());
        }

        let config = ResolverConfig::from_parts(
            None,
            vec![],
            NameServerConfigGroup::from_ips_clear(&[server], self.port, true),
        );
        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        let resolver = TokioAsyncResolver::tokio(config, opts).map_err(Error::Resolver)?;
        self.resolvers.insert(server, resolver.clone());
        Ok(resolver)
    }
}

#[async_trait]
impl DomainProbe for ResolverProbe {
    async fn lookup(&self, resolver: IpAddr, domain: &str) -> Result<usize> {
        let client = self.resolver_for(resolver)?;

        // Fully qualified, so no search-domain expansion happens
        let fqdn = if domain.ends_with('.') {
            domain.to_string()
        } else {
            format!("{domain}.")
        };

        let response = client.lookup_ip(fqdn.as_str()).await?;
        let count = response.iter().count();
        if count == 0 {
            return Err(Error::network(format!("{domain}: empty answer from {resolver}")));
        }
        Ok(count)
    }
}
