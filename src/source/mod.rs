//! Concrete event sources feeding the reconciler.
//!
//! - [`ManifestSource`] polls a YAML/JSON manifest file.
//! - `KubeIngressSource` watches `networking.k8s.io/v1` Ingress objects
//!   (requires the `kubernetes` feature).

pub mod manifest;

#[cfg(feature = "kubernetes")]
pub mod kube;

#[cfg(feature = "kubernetes")]
pub use self::kube::KubeIngressSource;
pub use manifest::{parse_manifest_file, ManifestSource};
