//! Cluster DNS resolver.

use async_trait::async_trait;

use super::{BackendKind, BackendResolver, ResolvedBackend};
use crate::error::ResolveError;
use crate::routing::BackendRef;

/// Resolves `service` in `namespace` through the system resolver as
/// `service.namespace.svc.<cluster_domain>`, returning the first address.
pub struct DnsResolver {
    cluster_domain: String,
}

impl DnsResolver {
    #[must_use]
    pub fn new(cluster_domain: impl Into<String>) -> Self {
        Self {
            cluster_domain: cluster_domain.into(),
        }
    }

    #[must_use]
    pub fn service_fqdn(&self, backend: &BackendRef) -> String {
        format!(
            "{}.{}.svc.{}",
            backend.service,
            backend.namespace,
            self.cluster_domain.trim_matches('.')
        )
    }
}

#[async_trait]
impl BackendResolver for DnsResolver {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn resolve(&self, backend: &BackendRef) -> Result<ResolvedBackend, ResolveError> {
        let fqdn = self.service_fqdn(backend);
        let mut addrs = tokio::net::lookup_host((fqdn.as_str(), backend.port))
            .await
            .map_err(|e| ResolveError::Lookup {
                service: backend.service.clone(),
                source: Box::new(e),
            })?;

        addrs
            .next()
            .map(|addr| ResolvedBackend {
                host: addr.ip().to_string(),
                kind: BackendKind::ClusterIp,
            })
            .ok_or_else(|| ResolveError::NotFound {
                service: backend.service.clone(),
            })
    }
}
