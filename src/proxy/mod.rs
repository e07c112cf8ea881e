//! Per-request dispatch.
//!
//! [`dispatch_handler`] is the Axum fallback for every request on the
//! proxy listener. It looks the request up in the route table, resolves
//! the backend service to a live address, and streams the request and
//! response through the pooled client. Header rewriting lives in
//! [`headers`].
//!
//! Outcomes:
//!
//! - no matching route: `404`, the resolver is never consulted
//! - resolution failure or timeout: `502`
//! - upstream connect failure, timeout or protocol error: `502`
//! - otherwise the upstream status, headers and body, unbuffered
//! - `101 Switching Protocols`: both upgraded connections are spliced
//!   together on a background task until either side closes

pub mod headers;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::error::ResolveError;
use crate::resolver::target_authority;
use crate::routing::normalize_host;
use crate::server::AppState;

use headers::{prepare_outbound, restore_upgrade, strip_hop_by_hop, upgrade_protocol, Outbound};

/// Host the client addressed, from `Host` or an absolute-form URI.
fn request_host(req: &Request) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
        .map(normalize_host)
        .unwrap_or_default()
}

pub async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let host = request_host(&req);
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let Some(backend) = state.routes.lookup(&host, &path) else {
        state.stats.unrouted.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            request_id = %request_id,
            method = %method,
            host = %host,
            path = %path,
            "no route matched"
        );
        return StatusCode::NOT_FOUND.into_response();
    };

    let settings = &state.settings;
    let resolved = match tokio::time::timeout(
        settings.resolve_timeout,
        state.resolver.resolve(&backend),
    )
    .await
    {
        Ok(Ok(resolved)) => resolved,
        Ok(Err(e)) => {
            return bad_gateway(&state, request_id, &backend, &e, "backend resolution failed");
        }
        Err(_) => {
            let e = ResolveError::Timeout {
                service: backend.service.clone(),
                after_ms: millis(settings.resolve_timeout),
            };
            return bad_gateway(&state, request_id, &backend, &e, "backend resolution failed");
        }
    };

    let client_upgrade = upgrade_protocol(req.headers()).map(|_| hyper::upgrade::on(&mut req));

    let authority = target_authority(&resolved.host, backend.port);
    let outbound = match prepare_outbound(
        req,
        Outbound {
            authority: &authority,
            kind: resolved.kind,
            client_ip: addr.ip(),
            forwarded_headers: settings.forwarded_headers,
        },
    ) {
        Ok(outbound) => outbound,
        Err(e) => return bad_gateway(&state, request_id, &backend, &e, "invalid upstream uri"),
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        host = %host,
        path = %path,
        backend = %backend,
        target = %authority,
        "forwarding request"
    );

    let mut upstream = match tokio::time::timeout(
        settings.upstream_timeout,
        state.http_client.request(outbound),
    )
    .await
    {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            return bad_gateway(&state, request_id, &backend, &e, "upstream request failed");
        }
        Err(_) => {
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                request_id = %request_id,
                backend = %backend,
                timeout_ms = millis(settings.upstream_timeout),
                "upstream request timed out"
            );
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    state.stats.forwarded.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        request_id = %request_id,
        method = %method,
        host = %host,
        path = %path,
        backend = %backend,
        status = upstream.status().as_u16(),
        "request forwarded"
    );

    let mut upgrade = None;
    if upstream.status() == StatusCode::SWITCHING_PROTOCOLS {
        let protocol = upgrade_protocol(upstream.headers());
        if let (Some(protocol), Some(client)) = (protocol, client_upgrade) {
            let server = hyper::upgrade::on(&mut upstream);
            tokio::spawn(splice_upgraded(request_id, client, server));
            upgrade = Some(protocol);
        }
    }

    let mut response = upstream.map(Body::new);
    strip_hop_by_hop(response.headers_mut());
    if let Some(protocol) = upgrade {
        restore_upgrade(response.headers_mut(), protocol);
    }
    response
}

/// Copy bytes both ways between an upgraded client and backend connection.
async fn splice_upgraded(request_id: uuid::Uuid, client: OnUpgrade, server: OnUpgrade) {
    let (client, server) = match tokio::try_join!(client, server) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "connection upgrade failed");
            return;
        }
    };
    let mut client = TokioIo::new(client);
    let mut server = TokioIo::new(server);
    match tokio::io::copy_bidirectional(&mut client, &mut server).await {
        Ok((sent, received)) => {
            tracing::debug!(request_id = %request_id, sent, received, "upgraded connection closed");
        }
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "upgraded connection ended");
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn bad_gateway(
    state: &AppState,
    request_id: uuid::Uuid,
    backend: &crate::routing::BackendRef,
    error: &dyn std::error::Error,
    message: &'static str,
) -> Response {
    state.stats.failed.fetch_add(1, Ordering::Relaxed);
    tracing::error!(
        request_id = %request_id,
        backend = %backend,
        error = %error,
        "{message}"
    );
    StatusCode::BAD_GATEWAY.into_response()
}
