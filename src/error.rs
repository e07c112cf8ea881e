//! Unified error types for Switchyard.
//!
//! Defines [`SwitchyardError`] (the main crate error enum),
//! [`DerivationError`] for ingress rules that cannot be turned into
//! routes, and [`ResolveError`] for per-request backend lookups. All use
//! `thiserror` (or a hand-written `Display`) so messages carry enough
//! context to find the offending resource.

use std::path::PathBuf;

/// A single ingress rule that was rejected while deriving routes.
///
/// Never fatal: the rule is skipped and the rest of the resource is
/// still installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationError {
    pub resource: String,
    pub rule: usize,
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for DerivationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "  ingress {} rule[{}]: {}: {}",
            self.resource, self.rule, self.field, self.message
        )
    }
}

impl std::error::Error for DerivationError {}

fn format_errors(errors: &[DerivationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SwitchyardError {
    #[error("No event source configured.\n\n  {hint}")]
    NoEventSource { hint: String },

    #[error("Manifest file not found: {}", path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("Manifest parse error in {path}:\n  {source}")]
    ManifestParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Manifest has rejected rules:\n{}", format_errors(.errors))]
    ManifestInvalid { errors: Vec<DerivationError> },

    #[error("Unsupported manifest format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(hyper::StatusCode),

    #[error("Event source '{source_name}' failed: {source}")]
    EventSource {
        source_name: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Event source '{source_name}' closed its stream")]
    EventStreamClosed { source_name: &'static str },

    #[error("Status report for {resource} failed: {source}")]
    StatusReport {
        resource: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Resolver '{0}' requires the '{1}' event source")]
    ResolverMismatch(&'static str, &'static str),

    #[cfg(feature = "kubernetes")]
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[cfg(feature = "kubernetes")]
    #[error("Kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::KubeconfigError),
}

/// Why a backend reference could not be turned into an address.
///
/// Every variant maps to a gateway-class response; none is cached.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("service {service} not found")]
    NotFound { service: String },

    #[error("lookup of service {service} failed: {source}")]
    Lookup {
        service: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("lookup of service {service} timed out after {after_ms}ms")]
    Timeout { service: String, after_ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_error_names_resource_and_rule() {
        let err = DerivationError {
            resource: "default/web".into(),
            rule: 2,
            field: "path",
            message: "must start with '/'".into(),
        };
        assert_eq!(
            err.to_string(),
            "  ingress default/web rule[2]: path: must start with '/'"
        );
    }

    #[test]
    fn manifest_invalid_lists_every_error() {
        let errors = vec![
            DerivationError {
                resource: "a/b".into(),
                rule: 0,
                field: "host",
                message: "bad".into(),
            },
            DerivationError {
                resource: "a/b".into(),
                rule: 1,
                field: "backend",
                message: "missing".into(),
            },
        ];
        let msg = SwitchyardError::ManifestInvalid { errors }.to_string();
        assert!(msg.contains("rule[0]: host: bad"));
        assert!(msg.contains("rule[1]: backend: missing"));
    }
}
