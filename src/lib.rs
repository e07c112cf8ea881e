//! Switchyard is a host- and path-based HTTP ingress edge proxy.
//!
//! It watches ingress resources (from a manifest file or the Kubernetes
//! API), keeps a routing table mapping `(host, path)` to backend
//! services, and forwards each inbound request to the live address of
//! the matching service.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate, health).
//! - [`ingress`] -- Ingress resource model and the manifest file format.
//! - [`source`] -- Event sources: manifest polling and the Kubernetes watcher.
//! - [`reconciler`] -- Turns resource events into route table updates.
//! - [`routing`] -- The copy-on-write route table and host/path matching.
//! - [`resolver`] -- Backend service to network address resolution.
//! - [`proxy`] -- Per-request dispatch and header rewriting.
//! - [`server`] -- Axum listeners, shared state, HTTP client, and shutdown.
//! - [`health`] -- Admin endpoints (`/healthz`, `/routes`).
//! - [`status`] -- Publishing the edge address to ingress status.
//! - [`backoff`] -- Restart delays for failed event sources.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML manifest support _(enabled by default)_ |
//! | `json` | JSON manifest support |
//! | `kubernetes` | Ingress watcher, Service resolver and status reporting via the Kubernetes API |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod backoff;
pub mod cli;
pub mod cmd;
pub mod error;
pub mod health;
pub mod ingress;
pub mod logging;
pub mod proxy;
pub mod reconciler;
pub mod resolver;
pub mod routing;
pub mod server;
pub mod source;
pub mod status;
