//! Rule-to-route derivation.
//!
//! Each rule of an [`IngressSnapshot`] becomes at most one
//! `(RouteKey, BackendRef)` pair. Rules that cannot be routed produce a
//! [`DerivationError`] instead and are skipped; they never prevent the
//! other rules of the same resource from being installed.

use std::collections::HashMap;

use crate::error::DerivationError;
use crate::ingress::{IngressRule, IngressSnapshot, PortRef};
use crate::routing::{BackendRef, MatchMode, RouteKey};

pub type DerivedRoute = (RouteKey, BackendRef);

/// Map an ingress `pathType` onto a match mode.
///
/// Only an explicit `Exact` is exact; an unset type, `Prefix` and
/// `ImplementationSpecific` all match by prefix.
pub fn match_mode(path_type: Option<&str>) -> Result<MatchMode, String> {
    match path_type {
        Some("Exact") => Ok(MatchMode::Exact),
        None | Some("Prefix" | "ImplementationSpecific") => Ok(MatchMode::Prefix),
        Some(other) => Err(format!(
            "unknown pathType '{other}' (expected Exact, Prefix or ImplementationSpecific)"
        )),
    }
}

/// Derive every routable rule of `resource`.
///
/// When two rules of the same resource produce the same key the later rule
/// wins, keeping the position of the first.
#[must_use]
pub fn derive_routes(resource: &IngressSnapshot) -> (Vec<DerivedRoute>, Vec<DerivationError>) {
    let mut routes: Vec<DerivedRoute> = Vec::with_capacity(resource.rules.len());
    let mut positions: HashMap<RouteKey, usize> = HashMap::new();
    let mut errors = Vec::new();

    for (index, rule) in resource.rules.iter().enumerate() {
        match derive_rule(&resource.id.namespace, rule) {
            Ok((key, backend)) => {
                if let Some(&pos) = positions.get(&key) {
                    routes[pos].1 = backend;
                } else {
                    positions.insert(key.clone(), routes.len());
                    routes.push((key, backend));
                }
            }
            Err((field, message)) => errors.push(DerivationError {
                resource: resource.id.to_string(),
                rule: index,
                field,
                message,
            }),
        }
    }

    (routes, errors)
}

fn derive_rule(
    namespace: &str,
    rule: &IngressRule,
) -> Result<DerivedRoute, (&'static str, String)> {
    let mode = match_mode(rule.path_type.as_deref()).map_err(|m| ("pathType", m))?;
    let host = derive_host(&rule.host).map_err(|m| ("host", m))?;
    let path = derive_path(rule.path.as_deref(), mode).map_err(|m| ("path", m))?;

    let service = rule
        .backend
        .as_ref()
        .ok_or_else(|| ("backend", "rule has no service backend".to_string()))?;
    if service.name.is_empty() {
        return Err(("backend.service.name", "service name cannot be empty".into()));
    }
    let port = match &service.port {
        Some(PortRef::Number(n)) => u16::try_from(*n)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ("backend.service.port", format!("port {n} is out of range")))?,
        Some(PortRef::Name(name)) => {
            return Err((
                "backend.service.port",
                format!("named port '{name}' is not supported, use a port number"),
            ))
        }
        None => return Err(("backend.service.port", "port is required".into())),
    };

    Ok((
        RouteKey::new(host, path, mode),
        BackendRef {
            namespace: namespace.to_string(),
            service: service.name.clone(),
            port,
        },
    ))
}

fn derive_host(raw: &str) -> Result<String, String> {
    let host = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.contains('*') {
        return Err(format!(
            "wildcard host '{raw}' is not supported (omit host to match any host)"
        ));
    }
    if host
        .chars()
        .any(|c| c == '/' || c == ':' || c.is_whitespace())
    {
        return Err(format!("'{raw}' is not a valid host name"));
    }
    Ok(host)
}

fn derive_path(raw: Option<&str>, mode: MatchMode) -> Result<String, String> {
    match raw {
        None | Some("") if mode == MatchMode::Exact => {
            Err("path is required when pathType is Exact".into())
        }
        None | Some("") => Ok("/".into()),
        Some(path) if !path.starts_with('/') => Err(format!(
            "path must start with '/' (did you mean '/{path}'?)"
        )),
        Some(path) => Ok(path.to_string()),
    }
}
