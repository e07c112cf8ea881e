//! Control-plane view of ingress resources.
//!
//! [`IngressSnapshot`] is the immutable value the reconciler receives with
//! every event: an identity, a generation, and the flattened list of
//! (host, path, pathType, backend) rules. Event sources convert their own
//! wire shapes into it; [`manifest`] holds the YAML/JSON file shape.

pub mod manifest;

use serde::Serialize;

/// Namespaced identity of an ingress resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSnapshot {
    pub id: ResourceId,
    pub generation: i64,
    pub rules: Vec<IngressRule>,
}

/// One declared path rule. Empty `host` means any host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub host: String,
    pub path: Option<String>,
    pub path_type: Option<String>,
    pub backend: Option<ServiceBackend>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBackend {
    pub name: String,
    pub port: Option<PortRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRef {
    Number(i32),
    Name(String),
}
