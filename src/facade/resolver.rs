//! Mapping between replication addresses and node identities
//!
//! Members are known to the engine by `ip:port`; clients know them by
//! hostname. Identities come from a reverse lookup of the address host,
//! removals go the other way.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::common::{host_part, Error, ResolverConfig, ResolverKind, Result};

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Hostnames registered for `host` (an IP address or a name).
    async fn reverse(&self, host: &str) -> Result<Vec<String>>;

    /// Address of the node named `name`.
    async fn forward(&self, name: &str) -> Result<IpAddr>;
}

pub fn from_config(config: &ResolverConfig) -> Result<Arc<dyn Resolver>> {
    match config.kind {
        ResolverKind::Dns => Ok(Arc::new(DnsResolver::from_system_conf()?)),
        ResolverKind::Static => Ok(Arc::new(StaticResolver::new(config.hosts.clone()))),
    }
}

/// Identity of the member at `address`. Exactly one hostname must match.
pub async fn resolve_identity(resolver: &dyn Resolver, address: &str) -> Result<String> {
    let host = host_part(address);
    let mut names = resolver.reverse(host).await.map_err(|e| match e {
        e @ Error::UnresolvedNode { .. } => e,
        other => unresolved(address, other.to_string()),
    })?;

    match names.len() {
        1 => Ok(names.remove(0)),
        0 => Err(unresolved(address, "no host name")),
        _ => Err(unresolved(
            address,
            format!("more than one host name: {}", names.join(", ")),
        )),
    }
}

fn unresolved(address: &str, reason: impl Into<String>) -> Error {
    Error::UnresolvedNode {
        address: address.to_string(),
        reason: reason.into(),
    }
}

/// System DNS: PTR records for reverse lookups, the host resolver for
/// forward ones.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn from_system_conf() -> Result<Self> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::InvalidConfig(format!("system resolver: {}", e)))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn reverse(&self, host: &str) -> Result<Vec<String>> {
        let ip: IpAddr = match host.parse() {
            Ok(ip) => ip,
            Err(_) => self.forward(host).await?,
        };
        let lookup = self
            .inner
            .reverse_lookup(ip)
            .await
            .map_err(|e| unresolved(host, e.to_string()))?;
        Ok(lookup
            .iter()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
            .collect())
    }

    async fn forward(&self, name: &str) -> Result<IpAddr> {
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(ip);
        }
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|e| unresolved(name, e.to_string()))?
            .map(|addr| addr.ip())
            .collect();
        prefer_ipv4(&addrs).ok_or_else(|| unresolved(name, "no address"))
    }
}

fn prefer_ipv4(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Fixed address to hostname table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: BTreeMap<String, String>,
}

impl StaticResolver {
    pub fn new(hosts: BTreeMap<String, String>) -> Self {
        Self { hosts }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn reverse(&self, host: &str) -> Result<Vec<String>> {
        match self.hosts.get(host) {
            Some(name) => Ok(vec![name.clone()]),
            None => Err(unresolved(host, "unknown node")),
        }
    }

    async fn forward(&self, name: &str) -> Result<IpAddr> {
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(ip);
        }
        self.hosts
            .iter()
            .find(|(_, hostname)| hostname.as_str() == name)
            .and_then(|(addr, _)| addr.parse().ok())
            .ok_or_else(|| unresolved(name, "unknown node"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StaticResolver {
        StaticResolver::new(BTreeMap::from([
            ("10.0.0.1".to_string(), "n1".to_string()),
            ("10.0.0.2".to_string(), "n2".to_string()),
        ]))
    }

    /// Returns whatever it was built with.
    struct Fixed(Vec<String>);

    #[async_trait]
    impl Resolver for Fixed {
        async fn reverse(&self, _host: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }

        async fn forward(&self, name: &str) -> Result<IpAddr> {
            Err(unresolved(name, "unsupported"))
        }
    }

    #[tokio::test]
    async fn test_static_lookup() {
        let resolver = table();
        assert_eq!(
            resolve_identity(&resolver, "10.0.0.2:8081").await.unwrap(),
            "n2"
        );
        assert_eq!(
            resolver.forward("n1").await.unwrap(),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolver.forward("10.0.0.9").await.unwrap(),
            "10.0.0.9".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let err = resolve_identity(&table(), "10.0.0.3:8081")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedNode { .. }));
        assert!(table().forward("n9").await.is_err());
    }

    #[tokio::test]
    async fn test_name_count() {
        let none = Fixed(Vec::new());
        let many = Fixed(vec!["a".into(), "b".into()]);
        assert!(matches!(
            resolve_identity(&none, "10.0.0.1:8081").await,
            Err(Error::UnresolvedNode { .. })
        ));
        let err = resolve_identity(&many, "10.0.0.1:8081")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn test_prefer_ipv4() {
        let v6: IpAddr = "::1".parse().unwrap();
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(prefer_ipv4(&[v6, v4]), Some(v4));
        assert_eq!(prefer_ipv4(&[v6]), Some(v6));
        assert_eq!(prefer_ipv4(&[]), None);
    }
}
