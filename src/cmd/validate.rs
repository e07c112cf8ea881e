//! `switchyard validate`: check a manifest file without serving.
//!
//! Parses the manifest, derives every route the reconciler would install
//! and reports rejected rules, in human-readable text or JSON.

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::error::{DerivationError, SwitchyardError};
use crate::ingress::manifest::Manifest;
use crate::reconciler::derive::{derive_routes, DerivedRoute};
use crate::source::parse_manifest_file;

/// Derived routes and rejected rules of a whole manifest, in file order.
pub struct ValidationReport {
    pub resources: usize,
    pub routes: Vec<DerivedRoute>,
    pub errors: Vec<DerivationError>,
    pub services: usize,
    pub service_errors: Vec<String>,
}

#[must_use]
pub fn check_manifest(manifest: &Manifest) -> ValidationReport {
    let mut routes = Vec::new();
    let mut errors = Vec::new();
    for ingress in &manifest.ingresses {
        let (derived, rejected) = derive_routes(&ingress.to_snapshot());
        routes.extend(derived);
        errors.extend(rejected);
    }
    let service_errors = manifest
        .services
        .iter()
        .filter_map(|(name, svc)| svc.to_record().err().map(|e| format!("  service {name}: {e}")))
        .collect();

    ValidationReport {
        resources: manifest.ingresses.len(),
        routes,
        errors,
        services: manifest.services.len(),
        service_errors,
    }
}

pub fn execute(args: &ValidateArgs) -> Result<(), SwitchyardError> {
    let path = &args.manifest;

    if !path.exists() {
        return Err(SwitchyardError::ManifestNotFound { path: path.clone() });
    }

    let content = std::fs::read_to_string(path)?;
    let manifest = parse_manifest_file(path, &content)?;
    let report = check_manifest(&manifest);
    let valid = report.errors.is_empty() && report.service_errors.is_empty();

    match args.format {
        ValidateFormat::Text => print_text(&path.display().to_string(), &report, valid),
        ValidateFormat::Json => {
            let routes: Vec<serde_json::Value> = report
                .routes
                .iter()
                .map(|(key, backend)| {
                    serde_json::json!({
                        "host": key.host,
                        "path": key.path,
                        "mode": key.mode.as_str(),
                        "backend": backend.to_string(),
                    })
                })
                .collect();
            let errors: Vec<serde_json::Value> = report
                .errors
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "resource": e.resource,
                        "rule": e.rule,
                        "field": e.field,
                        "message": e.message,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "valid": valid,
                    "resources": report.resources,
                    "routes": routes,
                    "errors": errors,
                    "service_errors": report.service_errors,
                })
            );
        }
    }

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(SwitchyardError::ManifestInvalid {
            errors: report.errors,
        })
    }
}

fn print_text(path: &str, report: &ValidationReport, valid: bool) {
    let mark = if valid { "\u{2713}" } else { "\u{2717}" };
    println!(
        "{mark} {path}: {} ingresses, {} routes, {} services",
        report.resources,
        report.routes.len(),
        report.services
    );
    for (key, backend) in &report.routes {
        let host = if key.host.is_empty() { "*" } else { &key.host };
        println!("  {host}{} ({}) -> {backend}", key.path, key.mode.as_str());
    }
    if !report.errors.is_empty() || !report.service_errors.is_empty() {
        eprintln!(
            "\n{} rejected entries:",
            report.errors.len() + report.service_errors.len()
        );
        for error in &report.errors {
            eprintln!("{error}");
        }
        for error in &report.service_errors {
            eprintln!("{error}");
        }
    }
}

#[cfg(all(test, feature = "yaml"))]
mod tests {
    use super::*;
    use crate::ingress::manifest::parse_manifest_str;
    use crate::routing::MatchMode;

    #[test]
    fn reports_routes_and_rejections() {
        let manifest = parse_manifest_str(
            "yaml",
            r"
ingresses:
  - metadata: { name: web, namespace: shop }
    spec:
      rules:
        - host: shop.example.com
          http:
            paths:
              - path: /
                pathType: Prefix
                backend: { service: { name: web, port: { number: 80 } } }
              - path: /admin
                pathType: Prefix
                backend: { service: { name: admin, port: { name: http } } }
services:
  web: { address: 10.0.0.4 }
  broken: {}
",
            "inline",
        )
        .unwrap();

        let report = check_manifest(&manifest);
        assert_eq!(report.resources, 1);
        assert_eq!(report.routes.len(), 1);
        assert_eq!(report.routes[0].0.host, "shop.example.com");
        assert_eq!(report.routes[0].0.mode, MatchMode::Prefix);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].rule, 1);
        assert_eq!(report.service_errors.len(), 1);
    }
}
