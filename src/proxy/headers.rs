//! Outbound request preparation and hop-by-hop stripping.
//!
//! [`prepare_outbound`] rewrites an inbound request in place for the
//! upstream: absolute `http://` URI for the resolved target, hop-by-hop
//! headers removed, `Host` chosen by backend kind, and (when enabled)
//! `X-Forwarded-*` metadata appended. Bodies are never touched.
//!
//! `Upgrade` requests keep their `Connection: upgrade` / `Upgrade` pair so
//! the backend can answer `101 Switching Protocols`.

use std::net::IpAddr;
use std::sync::LazyLock;

use axum::body::Body;
use axum::http::uri::InvalidUri;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri};

use crate::resolver::BackendKind;

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "proxy-connection",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| token.trim().parse::<HeaderName>().ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Settings that shape the outbound request.
#[derive(Debug, Clone, Copy)]
pub struct Outbound<'a> {
    pub authority: &'a str,
    pub kind: BackendKind,
    pub client_ip: IpAddr,
    pub forwarded_headers: bool,
}

/// Turn an inbound request into the request sent upstream.
pub fn prepare_outbound(
    mut req: Request<Body>,
    target: Outbound<'_>,
) -> Result<Request<Body>, InvalidUri> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let uri: Uri = format!("http://{}{path_and_query}", target.authority).parse()?;

    let client_host = req.headers().get(header::HOST).cloned();
    let original_host = client_host.clone().or_else(|| {
        req.uri()
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
    });
    let upgrade = upgrade_protocol(req.headers());

    *req.uri_mut() = uri;
    let headers = req.headers_mut();
    strip_hop_by_hop(headers);
    if let Some(protocol) = upgrade {
        restore_upgrade(headers, protocol);
    }

    // ClusterIP: the client's Host passes through untouched.
    // ExternalName: Host is the host the client addressed, even in absolute-form.
    let host = match target.kind {
        BackendKind::ClusterIp => client_host,
        BackendKind::ExternalName => original_host.clone(),
    }
    .or_else(|| HeaderValue::from_str(target.authority).ok());
    if let Some(host) = host {
        headers.insert(header::HOST, host);
    }

    if target.forwarded_headers {
        append_forwarded(headers, target.client_ip, original_host.as_ref());
    }

    Ok(req)
}

/// The protocol a request or response asks to switch to, if any.
///
/// Requires both an `Upgrade` header and an `upgrade` token in `Connection`.
pub fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let requested = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if requested {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

/// Put back the upgrade handshake headers after hop-by-hop stripping.
pub fn restore_upgrade(headers: &mut HeaderMap, protocol: HeaderValue) {
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, protocol);
}

fn append_forwarded(
    headers: &mut HeaderMap,
    client_ip: IpAddr,
    original_host: Option<&HeaderValue>,
) {
    let client_ip = client_ip.to_string();
    let xff = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map_or_else(
            || client_ip.clone(),
            |existing| format!("{existing}, {client_ip}"),
        );
    if let Ok(val) = HeaderValue::from_str(&xff) {
        headers.insert("x-forwarded-for", val);
    }

    let real_ip = xff.split(',').next().unwrap_or(&client_ip).trim();
    if let Ok(val) = HeaderValue::from_str(real_ip) {
        headers.insert("x-real-ip", val);
    }

    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    if let Some(host) = original_host {
        headers.insert("x-forwarded-host", host.clone());
    }
}
