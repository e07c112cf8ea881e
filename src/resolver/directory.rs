//! Manifest-backed service directory and its resolver.
//!
//! [`ServiceDirectory`] is replaced wholesale by the manifest source each
//! time the file changes; [`StaticResolver`] reads whatever is current at
//! request time. Keys are either `name` or `namespace/name`, the
//! namespaced form winning when both exist.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use super::{BackendResolver, ResolvedBackend, ServiceRecord};
use crate::error::ResolveError;
use crate::routing::BackendRef;

#[derive(Debug)]
pub struct ServiceDirectory {
    services: ArcSwap<HashMap<String, ServiceRecord>>,
}

impl Default for ServiceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn replace(&self, services: HashMap<String, ServiceRecord>) {
        self.services.store(Arc::new(services));
    }

    #[must_use]
    pub fn get(&self, namespace: &str, name: &str) -> Option<ServiceRecord> {
        let services = self.services.load();
        services
            .get(&format!("{namespace}/{name}"))
            .or_else(|| services.get(name))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.load().is_empty()
    }
}

pub struct StaticResolver {
    directory: Arc<ServiceDirectory>,
}

impl StaticResolver {
    #[must_use]
    pub fn new(directory: Arc<ServiceDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl BackendResolver for StaticResolver {
    fn name(&self) -> &'static str {
        "manifest"
    }

    async fn resolve(&self, backend: &BackendRef) -> Result<ResolvedBackend, ResolveError> {
        self.directory
            .get(&backend.namespace, &backend.service)
            .map(|record| ResolvedBackend {
                host: record.host,
                kind: record.kind,
            })
            .ok_or_else(|| ResolveError::NotFound {
                service: backend.service.clone(),
            })
    }
}
