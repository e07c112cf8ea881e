//! `switchyard run`: start the edge proxy.
//!
//! Wires an event source, backend resolver and status reporter from the
//! command line, runs the reconciler under a restart supervisor, and
//! serves the proxy and admin listeners until SIGTERM / Ctrl+C or until
//! the event stream ends for good.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::backoff;
use crate::cli::{ResolverKind, RunArgs};
use crate::error::SwitchyardError;
use crate::logging;
use crate::reconciler::{EventSource, Reconciler};
use crate::resolver::{BackendResolver, DnsResolver, ServiceDirectory, StaticResolver};
use crate::routing::RouteTable;
use crate::server::{self, AppState, ProxySettings};
use crate::source::ManifestSource;
use crate::status::{LoadBalancerStatus, LogStatusReporter, StatusReporter};

const RESTART_BASE_MS: u64 = 500;
const RESTART_MAX_MS: u64 = 30_000;

/// Everything `run` needs from the control plane.
struct Wiring {
    source: Box<dyn EventSource>,
    resolver: Arc<dyn BackendResolver>,
    reporter: Arc<dyn StatusReporter>,
}

pub async fn execute(args: RunArgs) -> Result<(), SwitchyardError> {
    logging::init(&args.log_level, logging::resolve_format(args.pretty, args.json));

    let Wiring {
        source,
        resolver,
        reporter,
    } = wire(&args).await?;

    let table = Arc::new(RouteTable::new());
    let publish = LoadBalancerStatus {
        hostname: args.publish_hostname.clone(),
        ip: args.publish_ip.clone(),
    };
    let reconciler = Reconciler::new(Arc::clone(&table)).with_status_reporter(reporter, publish);

    let settings = ProxySettings {
        upstream_timeout: Duration::from_millis(args.timeout),
        resolve_timeout: Duration::from_millis(args.resolve_timeout),
        forwarded_headers: args.forwarded_headers,
    };
    let resolver_name = resolver.name();
    let source_name = source.name();
    let state = Arc::new(AppState::new(table, resolver, settings, reconciler.stats()));

    let proxy_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let admin_addr: SocketAddr = format!("{}:{}", args.host, args.admin_port).parse()?;
    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let reconcile_handle = tokio::spawn(supervise(
        reconciler,
        source,
        shutdown_rx.clone(),
        Arc::clone(&shutdown_tx),
    ));

    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        server::shutdown_signal().await;
        signal_tx.send_replace(true);
    });

    tracing::info!(
        proxy = %proxy_addr,
        admin = %admin_addr,
        source = source_name,
        resolver = resolver_name,
        "switchyard started"
    );

    let proxy = axum::serve(
        proxy_listener,
        server::build_proxy_router(Arc::clone(&state), args.max_body)
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin = axum::serve(admin_listener, server::build_admin_router(state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let (proxy_result, admin_result) = tokio::join!(
        stop_all_on_exit("proxy", proxy, &shutdown_tx),
        stop_all_on_exit("admin", admin, &shutdown_tx),
    );

    let reconcile_result = match reconcile_handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "reconciler task failed");
            Ok(())
        }
    };

    proxy_result?;
    admin_result?;
    reconcile_result?;

    tracing::info!("switchyard stopped");
    Ok(())
}

async fn wire(args: &RunArgs) -> Result<Wiring, SwitchyardError> {
    let directory = Arc::new(ServiceDirectory::new());

    #[cfg(feature = "kubernetes")]
    let client = if args.kubernetes || args.resolver == ResolverKind::Kube {
        Some(kube_client(args.kubeconfig.as_deref()).await?)
    } else {
        None
    };

    let resolver: Arc<dyn BackendResolver> = match args.resolver {
        ResolverKind::Dns => Arc::new(DnsResolver::new(&args.cluster_domain)),
        ResolverKind::Manifest => {
            if args.manifest.is_none() {
                return Err(SwitchyardError::ResolverMismatch("manifest", "manifest"));
            }
            Arc::new(StaticResolver::new(Arc::clone(&directory)))
        }
        #[cfg(feature = "kubernetes")]
        ResolverKind::Kube => match &client {
            Some(client) => Arc::new(crate::resolver::kube::KubeServiceResolver::new(
                client.clone(),
            )),
            None => return Err(SwitchyardError::ResolverMismatch("kube", "kubernetes")),
        },
    };

    if let Some(path) = &args.manifest {
        let mut source = ManifestSource::new(path.clone(), Duration::from_secs(args.poll_interval));
        if args.resolver == ResolverKind::Manifest {
            source = source.with_service_directory(directory);
        }
        tracing::info!(path = %path.display(), "watching manifest file");
        return Ok(Wiring {
            source: Box::new(source),
            resolver,
            reporter: Arc::new(LogStatusReporter),
        });
    }

    #[cfg(feature = "kubernetes")]
    if let (true, Some(client)) = (args.kubernetes, client) {
        tracing::info!(
            namespace = args.namespace.as_deref().unwrap_or("*"),
            "watching ingress objects"
        );
        return Ok(Wiring {
            source: Box::new(crate::source::KubeIngressSource::new(
                client.clone(),
                args.namespace.as_deref(),
            )),
            resolver,
            reporter: Arc::new(crate::status::KubeStatusReporter::new(client)),
        });
    }

    Err(SwitchyardError::NoEventSource {
        hint: no_source_hint().into(),
    })
}

/// Client from an explicit kubeconfig, else the inferred in-cluster or
/// `$KUBECONFIG` configuration.
#[cfg(feature = "kubernetes")]
async fn kube_client(
    kubeconfig: Option<&std::path::Path>,
) -> Result<kube::Client, SwitchyardError> {
    let Some(path) = kubeconfig else {
        return Ok(kube::Client::try_default().await?);
    };
    let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
    let options = kube::config::KubeConfigOptions::default();
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?;
    tracing::info!(path = %path.display(), "using kubeconfig");
    Ok(kube::Client::try_from(config)?)
}

#[cfg(feature = "kubernetes")]
const fn no_source_hint() -> &'static str {
    "Provide --manifest <file> or --kubernetes."
}

#[cfg(not(feature = "kubernetes"))]
const fn no_source_hint() -> &'static str {
    "Provide --manifest <file> (rebuild with --features kubernetes to watch a cluster)."
}

/// Run the reconciler, restarting it with backoff after transport errors.
///
/// A closed event stream cannot be recovered: shutdown is triggered for
/// the whole process and the error is returned.
async fn supervise(
    mut reconciler: Reconciler,
    mut source: Box<dyn EventSource>,
    mut shutdown: watch::Receiver<bool>,
    trigger: Arc<watch::Sender<bool>>,
) -> Result<(), SwitchyardError> {
    let stats = reconciler.stats();
    let mut attempt = 0u32;

    loop {
        let applied_before = stats.events_applied.load(Ordering::Relaxed);
        match reconciler.run(source.as_mut(), &mut shutdown).await {
            Ok(()) => return Ok(()),
            Err(e @ SwitchyardError::EventStreamClosed { .. }) => {
                tracing::error!(error = %e, "event stream ended, shutting down");
                trigger.send_replace(true);
                return Err(e);
            }
            Err(e) => {
                if stats.events_applied.load(Ordering::Relaxed) > applied_before {
                    attempt = 0;
                }
                attempt = attempt.saturating_add(1);
                let delay = backoff::retry_delay(attempt, RESTART_BASE_MS, RESTART_MAX_MS);
                tracing::warn!(
                    source = source.name(),
                    error = %e,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "event source failed, restarting"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Ok(()),
                }
            }
        }
    }
}

/// Serve until done, then trigger shutdown so the other listener and the
/// reconciler stop too.
async fn stop_all_on_exit<F>(
    listener: &'static str,
    serve: F,
    trigger: &watch::Sender<bool>,
) -> std::io::Result<()>
where
    F: IntoFuture<Output = std::io::Result<()>>,
{
    let result = serve.await;
    if let Err(e) = &result {
        tracing::error!(listener, error = %e, "listener failed, shutting down");
    }
    trigger.send_replace(true);
    result
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::{IngressRule, IngressSnapshot, PortRef, ResourceId, ServiceBackend};
    use crate::reconciler::{ChannelSource, ResourceEvent};

    struct FlakySource {
        failures: u32,
        inner: ChannelSource,
    }

    #[async_trait::async_trait]
    impl EventSource for FlakySource {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn next(&mut self) -> Result<Option<ResourceEvent>, SwitchyardError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(SwitchyardError::EventSource {
                    source_name: "flaky",
                    source: "connection reset".into(),
                });
            }
            self.inner.next().await
        }
    }

    fn snapshot() -> IngressSnapshot {
        IngressSnapshot {
            id: ResourceId::new("default", "web"),
            generation: 1,
            rules: vec![IngressRule {
                host: String::new(),
                path: Some("/".into()),
                path_type: None,
                backend: Some(ServiceBackend {
                    name: "web".into(),
                    port: Some(PortRef::Number(80)),
                }),
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_transport_errors_then_stops_on_close() {
        let (tx, inner) = ChannelSource::new(4);
        let table = Arc::new(RouteTable::new());
        let reconciler = Reconciler::new(Arc::clone(&table));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        tx.send(ResourceEvent::added(snapshot())).await.unwrap();
        drop(tx);

        let result = supervise(
            reconciler,
            Box::new(FlakySource { failures: 2, inner }),
            shutdown_rx.clone(),
            Arc::clone(&shutdown_tx),
        )
        .await;

        assert!(matches!(
            result,
            Err(SwitchyardError::EventStreamClosed { source_name: "flaky" })
        ));
        assert_eq!(table.len(), 1);
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn stops_cleanly_on_shutdown() {
        let (_tx, inner) = ChannelSource::new(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let task = tokio::spawn(supervise(
            Reconciler::new(Arc::new(RouteTable::new())),
            Box::new(inner),
            shutdown_rx,
            Arc::clone(&shutdown_tx),
        ));
        shutdown_tx.send_replace(true);

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn failed_listener_stops_the_other_one() {
        let (tx, rx) = watch::channel(false);
        let failing = async { Err::<(), _>(std::io::Error::other("address in use")) };
        let healthy = async {
            wait_for_shutdown(rx).await;
            Ok::<(), std::io::Error>(())
        };

        let (failed, stopped) = tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(
                stop_all_on_exit("proxy", failing, &tx),
                stop_all_on_exit("admin", healthy, &tx),
            )
        })
        .await
        .expect("healthy listener kept running");

        assert!(failed.is_err());
        assert!(stopped.is_ok());
        assert!(*tx.borrow());
    }

    #[cfg(feature = "kubernetes")]
    #[tokio::test]
    async fn missing_kubeconfig_is_reported() {
        let name = format!("switchyard-{}.kubeconfig", uuid::Uuid::new_v4());
        let path = std::env::temp_dir().join(name);
        let result = kube_client(Some(&path)).await;
        assert!(matches!(result, Err(SwitchyardError::KubeConfig(_))));
    }

    #[tokio::test]
    async fn wait_for_shutdown_returns_once_set() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_shutdown(rx));
        tx.send_replace(true);
        waiter.await.unwrap();
    }
}
