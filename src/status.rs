//! Publishing the edge's address back to the control plane.
//!
//! After routes for a resource are installed the reconciler hands the
//! configured [`LoadBalancerStatus`] to a [`StatusReporter`] on a
//! detached task. Reports are best-effort: failures are logged by the
//! caller and never retried.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SwitchyardError;
use crate::ingress::ResourceId;

/// The externally visible address of this edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadBalancerStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl LoadBalancerStatus {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.ip.is_none()
    }
}

#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(
        &self,
        id: &ResourceId,
        status: &LoadBalancerStatus,
    ) -> Result<(), SwitchyardError>;
}

/// Reporter for control planes without a writable status (manifest files).
pub struct LogStatusReporter;

#[async_trait]
impl StatusReporter for LogStatusReporter {
    async fn report(
        &self,
        id: &ResourceId,
        status: &LoadBalancerStatus,
    ) -> Result<(), SwitchyardError> {
        tracing::info!(
            resource = %id,
            hostname = status.hostname.as_deref().unwrap_or(""),
            ip = status.ip.as_deref().unwrap_or(""),
            "ingress status published"
        );
        Ok(())
    }
}

#[cfg(feature = "kubernetes")]
pub use kube_reporter::KubeStatusReporter;

#[cfg(feature = "kubernetes")]
mod kube_reporter {
    use async_trait::async_trait;
    use k8s_openapi::api::networking::v1::Ingress;
    use kube::api::{Api, Patch, PatchParams};
    use kube::Client;

    use super::{LoadBalancerStatus, StatusReporter};
    use crate::error::SwitchyardError;
    use crate::ingress::ResourceId;

    /// Merge-patches `status.loadBalancer.ingress` on the Ingress object.
    pub struct KubeStatusReporter {
        client: Client,
    }

    impl KubeStatusReporter {
        #[must_use]
        pub fn new(client: Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl StatusReporter for KubeStatusReporter {
        async fn report(
            &self,
            id: &ResourceId,
            status: &LoadBalancerStatus,
        ) -> Result<(), SwitchyardError> {
            let api: Api<Ingress> = Api::namespaced(self.client.clone(), &id.namespace);
            let patch = serde_json::json!({
                "status": { "loadBalancer": { "ingress": [status] } }
            });
            api.patch_status(
                &id.name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| SwitchyardError::StatusReport {
                resource: id.to_string(),
                source: Box::new(e),
            })?;
            Ok(())
        }
    }
}
