//! Publishing relay hostnames in DNS
//!
//! When a relay is accepted its hostname is pointed at this edge node. The
//! node's address is whatever the API hostname currently resolves to; it is
//! resolved on every sync so that address changes are picked up.

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use spacekit_core::tracing::metrics::counter;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

/// DNS record types the sync publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// First IPv4 address of `hostname`
    async fn resolve_ipv4(&self, hostname: &str) -> Result<Ipv4Addr>;
}

#[async_trait]
pub trait DnsSink: Send + Sync {
    /// Create or replace the `record_type` record for `hostname`
    async fn upsert(&self, hostname: &str, record_type: RecordType, address: IpAddr)
    -> Result<()>;
}

/// Resolver backed by the system configuration
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    /// Use /etc/resolv.conf, falling back to Cloudflare's public resolvers
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("Failed to read system resolver config, using public resolvers: {e}");
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn resolve_ipv4(&self, hostname: &str) -> Result<Ipv4Addr> {
        let lookup = self
            .resolver
            .lookup_ip(hostname)
            .await
            .map_err(|e| RelayError::Dns(format!("Failed to resolve {hostname}: {e}")))?;

        lookup
            .iter()
            .find_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| RelayError::Dns(format!("No IPv4 address for {hostname}")))
    }
}

/// Points relay hostnames at the address of the API hostname
#[derive(Clone)]
pub struct DnsSync {
    resolver: Arc<dyn AddressResolver>,
    sink: Arc<dyn DnsSink>,
    target_hostname: String,
}

impl DnsSync {
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        sink: Arc<dyn DnsSink>,
        target_hostname: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            sink,
            target_hostname: target_hostname.into(),
        }
    }

    /// Resolve the target and upsert an A record for `hostname`
    pub async fn sync(&self, hostname: &str) -> Result<()> {
        let address = self.resolver.resolve_ipv4(&self.target_hostname).await?;
        debug!(
            hostname,
            target = %self.target_hostname,
            %address,
            "Resolved edge address"
        );
        self.sink
            .upsert(hostname, RecordType::A, IpAddr::V4(address))
            .await?;
        info!(hostname, %address, "Published relay DNS record");
        Ok(())
    }

    /// Run [`DnsSync::sync`] in the background. Failures are logged and dropped.
    pub fn spawn_upsert(&self, hostname: String) -> JoinHandle<()> {
        let sync = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sync.sync(&hostname).await {
                counter("relay_dns_sync_failures_total").increment();
                warn!(hostname = %hostname, "DNS sync failed: {e}");
            }
        })
    }
}
