//! Backend resolution: service reference → live network address.
//!
//! The dispatcher calls [`BackendResolver::resolve`] once per request and
//! never caches the answer, so a service that moves is picked up by the
//! very next request. Implementations:
//!
//! - [`dns::DnsResolver`] -- cluster DNS (`svc.namespace.svc.cluster.local`).
//! - [`directory::StaticResolver`] -- the `services` section of a manifest.
//! - `kube::KubeServiceResolver` -- Service objects from the API server
//!   (behind the `kubernetes` feature).

pub mod directory;
pub mod dns;
#[cfg(feature = "kubernetes")]
pub mod kube;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ResolveError;
use crate::routing::BackendRef;

pub use directory::{ServiceDirectory, StaticResolver};
pub use dns::DnsResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// An in-cluster address; the client's Host header is forwarded as sent.
    ClusterIp,
    /// An external DNS name; the outbound Host header is the host the client addressed.
    ExternalName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub host: String,
    pub kind: BackendKind,
}

/// A service entry as published by a control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub host: String,
    pub kind: BackendKind,
}

// async_trait is required because resolvers are held as Arc<dyn BackendResolver>.
#[async_trait]
pub trait BackendResolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve(&self, backend: &BackendRef) -> Result<ResolvedBackend, ResolveError>;
}

/// Format `host:port`, bracketing bare IPv6 literals.
#[must_use]
pub fn target_authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
