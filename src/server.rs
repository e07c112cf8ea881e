//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state read by every request
//! task), [`build_proxy_router`] and [`build_admin_router`] for the two
//! listeners, [`build_http_client`] for the connection-pooled hyper
//! client, and [`shutdown_signal`] for SIGTERM / Ctrl+C handling.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::routing::get;
use axum::Router;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::health::{health_handler, routes_handler};
use crate::proxy;
use crate::reconciler::ReconcileStats;
use crate::resolver::BackendResolver;
use crate::routing::RouteTable;

#[derive(Debug, Default)]
pub struct Stats {
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
    pub unrouted: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub upstream_timeout: Duration,
    pub resolve_timeout: Duration,
    pub forwarded_headers: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(2),
            forwarded_headers: false,
        }
    }
}

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, Body>;

pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub resolver: Arc<dyn BackendResolver>,
    pub http_client: HttpClient,
    pub settings: ProxySettings,
    pub start_time: Instant,
    pub stats: Stats,
    pub reconcile: Arc<ReconcileStats>,
}

impl AppState {
    #[must_use]
    pub fn new(
        routes: Arc<RouteTable>,
        resolver: Arc<dyn BackendResolver>,
        settings: ProxySettings,
        reconcile: Arc<ReconcileStats>,
    ) -> Self {
        Self {
            routes,
            resolver,
            http_client: build_http_client(),
            settings,
            start_time: Instant::now(),
            stats: Stats::default(),
            reconcile,
        }
    }
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // When multiple rustls crypto providers are compiled in, rustls cannot
    // auto-detect which one to use. Explicitly install `ring`.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

/// Every path on the proxy listener is dispatched through the route table.
///
/// Request bodies are unlimited unless `max_body` is set.
pub fn build_proxy_router(state: Arc<AppState>, max_body: Option<usize>) -> Router {
    let router = Router::new().fallback(proxy::dispatch_handler);
    let router = match max_body {
        Some(limit) => router.layer(RequestBodyLimitLayer::new(limit)),
        None => router,
    };
    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub fn build_admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/routes", get(routes_handler))
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
