//! Kubernetes Service resolver.
//!
//! Fetches the Service object on every request. `ExternalName` services
//! resolve to `spec.externalName`; everything else resolves to the
//! cluster IP, or to the service DNS name for headless services.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::Client;

use super::{BackendKind, BackendResolver, ResolvedBackend};
use crate::error::ResolveError;
use crate::routing::BackendRef;

pub struct KubeServiceResolver {
    client: Client,
}

impl KubeServiceResolver {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendResolver for KubeServiceResolver {
    fn name(&self) -> &'static str {
        "kube"
    }

    async fn resolve(&self, backend: &BackendRef) -> Result<ResolvedBackend, ResolveError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &backend.namespace);
        let service = api
            .get_opt(&backend.service)
            .await
            .map_err(|e| ResolveError::Lookup {
                service: backend.service.clone(),
                source: Box::new(e),
            })?
            .ok_or_else(|| ResolveError::NotFound {
                service: backend.service.clone(),
            })?;

        resolved_from_service(&service, backend).ok_or_else(|| ResolveError::NotFound {
            service: backend.service.clone(),
        })
    }
}

fn resolved_from_service(service: &Service, backend: &BackendRef) -> Option<ResolvedBackend> {
    let spec = service.spec.as_ref()?;

    if spec.type_.as_deref() == Some("ExternalName") {
        return spec
            .external_name
            .as_ref()
            .filter(|name| !name.is_empty())
            .map(|name| ResolvedBackend {
                host: name.clone(),
                kind: BackendKind::ExternalName,
            });
    }

    let host = match spec.cluster_ip.as_deref() {
        Some(ip) if !ip.is_empty() && ip != "None" => ip.to_string(),
        _ => format!("{}.{}.svc", backend.service, backend.namespace),
    };
    Some(ResolvedBackend {
        host,
        kind: BackendKind::ClusterIp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn backend() -> BackendRef {
        BackendRef {
            namespace: "shop".into(),
            service: "cart".into(),
            port: 80,
        }
    }

    fn service(spec: ServiceSpec) -> Service {
        Service {
            spec: Some(spec),
            ..Service::default()
        }
    }

    #[test]
    fn external_name_service() {
        let svc = service(ServiceSpec {
            type_: Some("ExternalName".into()),
            external_name: Some("cart.example.net".into()),
            ..ServiceSpec::default()
        });
        let resolved = resolved_from_service(&svc, &backend()).unwrap();
        assert_eq!(resolved.host, "cart.example.net");
        assert_eq!(resolved.kind, BackendKind::ExternalName);
    }

    #[test]
    fn cluster_ip_service() {
        let svc = service(ServiceSpec {
            type_: Some("ClusterIP".into()),
            cluster_ip: Some("10.96.0.20".into()),
            ..ServiceSpec::default()
        });
        let resolved = resolved_from_service(&svc, &backend()).unwrap();
        assert_eq!(resolved.host, "10.96.0.20");
        assert_eq!(resolved.kind, BackendKind::ClusterIp);
    }

    #[test]
    fn headless_service_uses_dns_name() {
        let svc = service(ServiceSpec {
            cluster_ip: Some("None".into()),
            ..ServiceSpec::default()
        });
        let resolved = resolved_from_service(&svc, &backend()).unwrap();
        assert_eq!(resolved.host, "cart.shop.svc");
    }

    #[test]
    fn external_name_without_target_is_unresolvable() {
        let svc = service(ServiceSpec {
            type_: Some("ExternalName".into()),
            ..ServiceSpec::default()
        });
        assert!(resolved_from_service(&svc, &backend()).is_none());
    }
}
