//! The shared routing table.
//!
//! [`RouteTable`] maps [`RouteKey`]s to [`RouteEntry`]s and answers
//! `lookup(host, path)` on every inbound request. It is written only by
//! the reconciler and read concurrently by every dispatcher task; see
//! [`table`] for the synchronization strategy and matching rules.

pub mod table;

pub use table::{
    BackendRef, MatchMode, RouteBatch, RouteEntry, RouteKey, RouteSnapshot, RouteTable,
};

/// Lowercase a request host and strip any port and trailing dot.
///
/// Bracketed IPv6 literals keep their brackets: `[::1]:8080` becomes `[::1]`.
#[must_use]
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        raw.find(']').map_or(raw, |end| &raw[..=end])
    } else {
        raw.rsplit_once(':').map_or(raw, |(host, _port)| host)
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}
