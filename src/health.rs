//! Admin listener handlers: `GET /healthz` and `GET /routes`.
//!
//! `/healthz` returns a [`HealthResponse`] with version, uptime, route
//! table size, reconciler counters and request statistics. `/routes`
//! lists every installed route mapping, sorted by host, path and mode.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub commit: String,
    pub uptime_seconds: u64,
    pub resolver: String,
    pub routing: RoutingHealth,
    pub stats: StatsResponse,
}

#[derive(Serialize, Deserialize)]
pub struct RoutingHealth {
    pub routes: usize,
    pub resources: u64,
    pub events_applied: u64,
    pub rejected_rules: u64,
}

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub requests_forwarded: u64,
    pub requests_failed: u64,
    pub requests_unrouted: u64,
}

#[derive(Serialize, Deserialize)]
pub struct RouteMapping {
    pub host: String,
    pub path: String,
    pub mode: String,
    pub backend: String,
    pub owner: String,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let reconcile = &state.reconcile;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("SWITCHYARD_GIT_SHORT").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        resolver: state.resolver.name().to_string(),
        routing: RoutingHealth {
            routes: state.routes.len(),
            resources: reconcile.resources.load(Ordering::Relaxed),
            events_applied: reconcile.events_applied.load(Ordering::Relaxed),
            rejected_rules: reconcile.rejected_rules.load(Ordering::Relaxed),
        },
        stats: StatsResponse {
            requests_forwarded: state.stats.forwarded.load(Ordering::Relaxed),
            requests_failed: state.stats.failed.load(Ordering::Relaxed),
            requests_unrouted: state.stats.unrouted.load(Ordering::Relaxed),
        },
    })
}

pub async fn routes_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RouteMapping>> {
    let snapshot = state.routes.snapshot();
    let mappings = snapshot
        .sorted_entries()
        .into_iter()
        .map(|entry| RouteMapping {
            host: if entry.key.host.is_empty() {
                "*".to_string()
            } else {
                entry.key.host.clone()
            },
            path: entry.key.path.clone(),
            mode: entry.key.mode.as_str().to_string(),
            backend: entry.backend.to_string(),
            owner: entry.owner.to_string(),
        })
        .collect();
    Json(mappings)
}
