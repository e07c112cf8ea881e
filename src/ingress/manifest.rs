//! Serde data structures for manifest files.
//!
//! A manifest mirrors the shape of `networking.k8s.io/v1` Ingress objects
//! (so real manifests can be pasted in, extra fields and all) plus an
//! optional `services` section used by the manifest resolver. Only the
//! top-level [`Manifest`] rejects unknown fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{IngressRule, IngressSnapshot, PortRef, ResourceId, ServiceBackend};
use crate::error::SwitchyardError;
use crate::resolver::{BackendKind, ServiceRecord};

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub ingresses: Vec<IngressManifest>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceManifest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngressManifest {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: IngressSpec,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IngressSpec {
    #[serde(default)]
    pub rules: Vec<RuleManifest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpRuleValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpRuleValue {
    #[serde(default)]
    pub paths: Vec<PathManifest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_type: Option<String>,

    #[serde(default)]
    pub backend: BackendManifest,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceBackendManifest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceBackendManifest {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortManifest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A service entry for the manifest resolver. Exactly one of `address`
/// or `external_name` must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
}

impl IngressManifest {
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Flatten `spec.rules[].http.paths[]` into snapshot rules.
    #[must_use]
    pub fn to_snapshot(&self) -> IngressSnapshot {
        let rules = self
            .spec
            .rules
            .iter()
            .flat_map(|rule| {
                let host = rule.host.clone().unwrap_or_default();
                rule.http
                    .iter()
                    .flat_map(|http| http.paths.iter())
                    .map(move |p| IngressRule {
                        host: host.clone(),
                        path: p.path.clone(),
                        path_type: p.path_type.clone(),
                        backend: p.backend.service.as_ref().map(|svc| ServiceBackend {
                            name: svc.name.clone(),
                            port: svc.port.as_ref().and_then(PortManifest::to_port_ref),
                        }),
                    })
            })
            .collect();

        IngressSnapshot {
            id: self.id(),
            generation: self.metadata.generation.unwrap_or(0),
            rules,
        }
    }
}

impl PortManifest {
    fn to_port_ref(&self) -> Option<PortRef> {
        self.number
            .map(PortRef::Number)
            .or_else(|| self.name.clone().map(PortRef::Name))
    }
}

impl ServiceManifest {
    pub fn to_record(&self) -> Result<ServiceRecord, String> {
        match (&self.address, &self.external_name) {
            (Some(address), None) if !address.is_empty() => Ok(ServiceRecord {
                host: address.clone(),
                kind: BackendKind::ClusterIp,
            }),
            (None, Some(external)) if !external.is_empty() => Ok(ServiceRecord {
                host: external.clone(),
                kind: BackendKind::ExternalName,
            }),
            (Some(_), Some(_)) => Err("set either address or externalName, not both".into()),
            _ => Err("one of address or externalName is required".into()),
        }
    }
}

/// Parse manifest text based on file extension.
pub fn parse_manifest_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<Manifest, SwitchyardError> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => {
            serde_yml::from_str(content).map_err(|e| SwitchyardError::ManifestParse {
                path: path_display.to_string(),
                source: Box::new(e),
            })
        }

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| SwitchyardError::ManifestParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        other => Err(SwitchyardError::UnsupportedFormat(other.to_string())),
    }
}
