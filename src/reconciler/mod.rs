//! The route reconciler: sole writer of the [`RouteTable`].
//!
//! [`Reconciler::run`] pulls one [`ResourceEvent`] at a time from an
//! [`EventSource`] and applies it to completion before asking for the
//! next. Every event is published to the table as a single atomic batch,
//! so a `Modified` never exposes a window where the resource's routes are
//! missing.
//!
//! Key collisions follow last-writer-wins: the resource whose event was
//! processed most recently owns the key. There is no conflict detection.
//! When the owning resource later drops the key, ownership falls back to
//! the most recently applied resource that still declares it, so the
//! table always equals what the present resources derive.
//!
//! Events are applied in receipt order. Versions are not compared; the
//! source is trusted to deliver a resource's events in order.

pub mod derive;
pub mod event;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::SwitchyardError;
use crate::ingress::{IngressSnapshot, ResourceId};
use crate::routing::{BackendRef, RouteBatch, RouteEntry, RouteKey, RouteTable};
use crate::status::{LoadBalancerStatus, StatusReporter};

use derive::{derive_routes, DerivedRoute};
pub use event::{ChannelSource, EventKind, EventSource, ResourceEvent};

#[derive(Debug, Default)]
pub struct ReconcileStats {
    pub events_applied: AtomicU64,
    pub rejected_rules: AtomicU64,
    pub resources: AtomicU64,
}

#[derive(Debug)]
struct Applied {
    seq: u64,
    generation: i64,
    routes: Vec<DerivedRoute>,
}

pub struct Reconciler {
    table: Arc<RouteTable>,
    applied: HashMap<ResourceId, Applied>,
    sequence: u64,
    reporter: Option<Arc<dyn StatusReporter>>,
    publish: LoadBalancerStatus,
    stats: Arc<ReconcileStats>,
}

impl Reconciler {
    #[must_use]
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self {
            table,
            applied: HashMap::new(),
            sequence: 0,
            reporter: None,
            publish: LoadBalancerStatus::default(),
            stats: Arc::new(ReconcileStats::default()),
        }
    }

    /// Report `publish` for every resource whose routes get installed.
    /// An empty status disables reporting.
    #[must_use]
    pub fn with_status_reporter(
        mut self,
        reporter: Arc<dyn StatusReporter>,
        publish: LoadBalancerStatus,
    ) -> Self {
        self.reporter = Some(reporter);
        self.publish = publish;
        self
    }

    #[must_use]
    pub fn stats(&self) -> Arc<ReconcileStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    #[must_use]
    pub fn generation(&self, id: &ResourceId) -> Option<i64> {
        self.applied.get(id).map(|a| a.generation)
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.applied.len()
    }

    pub fn apply(&mut self, event: ResourceEvent) {
        match event.kind {
            EventKind::Added => {
                self.on_added(&event.resource);
            }
            EventKind::Modified => {
                self.on_modified(&event.resource);
            }
            EventKind::Deleted => {
                self.on_removed(&event.resource.id);
            }
        }
        self.stats.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Install the routes of a new resource. Re-adding a known resource
    /// replaces its routes, so repeated delivery is harmless.
    pub fn on_added(&mut self, resource: &IngressSnapshot) -> usize {
        self.install(resource, EventKind::Added)
    }

    /// Replace every route of `resource` with its new rule set.
    pub fn on_modified(&mut self, resource: &IngressSnapshot) -> usize {
        if !self.applied.contains_key(&resource.id) {
            tracing::debug!(resource = %resource.id, "modified event for unknown ingress, adding");
        }
        self.install(resource, EventKind::Modified)
    }

    /// Remove every route attributed to `id`. Unknown ids are ignored.
    pub fn on_removed(&mut self, id: &ResourceId) -> usize {
        let Some(previous) = self.applied.remove(id) else {
            tracing::debug!(resource = %id, "deleted event for unknown ingress, ignoring");
            return 0;
        };

        let applied = &self.applied;
        let removed = self.table.update(|batch| {
            retire_routes(batch, applied, id, &previous.routes, &HashSet::new())
        });
        self.stats
            .resources
            .store(self.applied.len() as u64, Ordering::Relaxed);

        tracing::info!(
            resource = %id,
            generation = previous.generation,
            routes = removed,
            "ingress removed"
        );
        removed
    }

    fn install(&mut self, resource: &IngressSnapshot, kind: EventKind) -> usize {
        let (routes, errors) = derive_routes(resource);
        for error in &errors {
            tracing::warn!(
                resource = %resource.id,
                rule = error.rule,
                field = error.field,
                error = %error.message,
                "skipping ingress rule"
            );
        }
        self.stats
            .rejected_rules
            .fetch_add(errors.len() as u64, Ordering::Relaxed);

        self.sequence += 1;
        let id = &resource.id;
        let previous = self.applied.remove(id);

        let applied = &self.applied;
        self.table.update(|batch| {
            if let Some(previous) = &previous {
                let keep: HashSet<&RouteKey> = routes.iter().map(|(key, _)| key).collect();
                retire_routes(batch, applied, id, &previous.routes, &keep);
            }
            for (key, backend) in &routes {
                let replaced = batch.insert(RouteEntry {
                    key: key.clone(),
                    backend: backend.clone(),
                    owner: id.clone(),
                });
                if let Some(replaced) = replaced.filter(|e| &e.owner != id) {
                    tracing::debug!(
                        host = %key.host,
                        path = %key.path,
                        previous_owner = %replaced.owner,
                        owner = %id,
                        "route taken over by most recent ingress"
                    );
                }
            }
        });

        let installed = routes.len();
        self.applied.insert(
            id.clone(),
            Applied {
                seq: self.sequence,
                generation: resource.generation,
                routes,
            },
        );
        self.stats
            .resources
            .store(self.applied.len() as u64, Ordering::Relaxed);

        tracing::info!(
            resource = %id,
            event = kind.as_str(),
            generation = resource.generation,
            routes = installed,
            rejected = errors.len(),
            "ingress applied"
        );

        self.report_status(id);
        installed
    }

    fn report_status(&self, id: &ResourceId) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if self.publish.is_empty() {
            return;
        }
        let reporter = Arc::clone(reporter);
        let status = self.publish.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = reporter.report(&id, &status).await {
                tracing::warn!(resource = %id, error = %e, "failed to publish ingress status");
            }
        });
    }

    /// Consume `source` until shutdown, end-of-stream, or a transport error.
    ///
    /// Shutdown returns `Ok(())`. End-of-stream returns
    /// [`SwitchyardError::EventStreamClosed`]; transport errors are passed
    /// through. Either way the caller decides whether to restart.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SwitchyardError>
    where
        S: EventSource + ?Sized,
    {
        loop {
            if *shutdown.borrow_and_update() {
                tracing::debug!("reconciler shutting down");
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::debug!("shutdown sender dropped, reconciler stopping");
                        return Ok(());
                    }
                    continue;
                }
                next = source.next() => next,
            };

            match next? {
                Some(event) => self.apply(event),
                None => {
                    return Err(SwitchyardError::EventStreamClosed {
                        source_name: source.name(),
                    })
                }
            }
        }
    }
}

/// Drop the keys `id` owns from `routes`, except those in `keep`, and hand
/// each dropped key to the latest other resource still declaring it.
fn retire_routes(
    batch: &mut RouteBatch,
    applied: &HashMap<ResourceId, Applied>,
    id: &ResourceId,
    routes: &[DerivedRoute],
    keep: &HashSet<&RouteKey>,
) -> usize {
    let mut removed = 0;
    for (key, _) in routes {
        if keep.contains(key) {
            continue;
        }
        if !batch.get(key).is_some_and(|entry| &entry.owner == id) {
            continue;
        }
        batch.remove(key);
        removed += 1;

        if let Some((owner, backend)) = latest_claim(applied, key) {
            batch.insert(RouteEntry {
                key: key.clone(),
                backend,
                owner,
            });
        }
    }
    removed
}

fn latest_claim(
    applied: &HashMap<ResourceId, Applied>,
    key: &RouteKey,
) -> Option<(ResourceId, BackendRef)> {
    applied
        .iter()
        .filter_map(|(id, a)| {
            a.routes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, backend)| (a.seq, id, backend))
        })
        .max_by_key(|(seq, _, _)| *seq)
        .map(|(_, id, backend)| (id.clone(), backend.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::{IngressRule, PortRef, ServiceBackend};
    use crate::routing::MatchMode;

    fn rule(host: &str, path: &str, service: &str) -> IngressRule {
        IngressRule {
            host: host.into(),
            path: Some(path.into()),
            path_type: Some("Prefix".into()),
            backend: Some(ServiceBackend {
                name: service.into(),
                port: Some(PortRef::Number(80)),
            }),
        }
    }

    fn ingress(name: &str, generation: i64, rules: Vec<IngressRule>) -> IngressSnapshot {
        IngressSnapshot {
            id: ResourceId::new("default", name),
            generation,
            rules,
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(Arc::new(RouteTable::new()))
    }

    fn service_at(r: &Reconciler, host: &str, path: &str) -> Option<String> {
        r.table().lookup(host, path).map(|b| b.service)
    }

    #[test]
    fn added_installs_every_rule() {
        let mut r = reconciler();
        let installed = r.on_added(&ingress(
            "web",
            1,
            vec![rule("a.com", "/", "a"), rule("b.com", "/", "b")],
        ));
        assert_eq!(installed, 2);
        assert_eq!(service_at(&r, "a.com", "/x").as_deref(), Some("a"));
        assert_eq!(service_at(&r, "b.com", "/x").as_deref(), Some("b"));
        assert_eq!(r.resource_count(), 1);
    }

    #[test]
    fn added_twice_is_idempotent() {
        let mut r = reconciler();
        let web = ingress("web", 1, vec![rule("", "/", "a"), rule("", "/b", "b")]);
        r.on_added(&web);
        let once: Vec<RouteEntry> = r
            .table()
            .snapshot()
            .sorted_entries()
            .into_iter()
            .cloned()
            .collect();

        r.on_added(&web);
        let twice: Vec<RouteEntry> = r
            .table()
            .snapshot()
            .sorted_entries()
            .into_iter()
            .cloned()
            .collect();

        assert_eq!(once, twice);
    }

    #[test]
    fn modified_drops_stale_rules() {
        let mut r = reconciler();
        r.on_added(&ingress(
            "web",
            1,
            vec![rule("", "/old", "old"), rule("", "/kept", "kept")],
        ));
        r.on_modified(&ingress(
            "web",
            2,
            vec![rule("", "/kept", "kept2"), rule("", "/new", "new")],
        ));

        assert!(service_at(&r, "", "/old").is_none());
        assert_eq!(service_at(&r, "", "/kept").as_deref(), Some("kept2"));
        assert_eq!(service_at(&r, "", "/new").as_deref(), Some("new"));
        assert_eq!(r.table().len(), 2);
        assert_eq!(r.generation(&ResourceId::new("default", "web")), Some(2));
    }

    #[test]
    fn removed_leaves_other_resources() {
        let mut r = reconciler();
        let web = ingress("web", 1, vec![rule("", "/e1", "a"), rule("", "/e2", "a")]);
        r.on_added(&web);
        r.on_added(&ingress("api", 1, vec![rule("", "/api", "api")]));

        assert_eq!(r.on_removed(&web.id), 2);
        assert!(service_at(&r, "", "/e1").is_none());
        assert!(service_at(&r, "", "/e2").is_none());
        assert_eq!(service_at(&r, "", "/api").as_deref(), Some("api"));
        assert_eq!(r.table().len(), 1);
    }

    #[test]
    fn removing_unknown_resource_is_a_no_op() {
        let mut r = reconciler();
        r.on_added(&ingress("web", 1, vec![rule("", "/", "a")]));
        assert_eq!(r.on_removed(&ResourceId::new("default", "ghost")), 0);
        assert_eq!(r.table().len(), 1);
    }

    #[test]
    fn last_writer_wins_on_collision() {
        let mut r = reconciler();
        r.on_added(&ingress("first", 1, vec![rule("", "/shared", "first")]));
        r.on_added(&ingress("second", 1, vec![rule("", "/shared", "second")]));

        assert_eq!(service_at(&r, "", "/shared").as_deref(), Some("second"));

        // Re-applying the first resource makes it the latest writer again.
        r.on_modified(&ingress("first", 2, vec![rule("", "/shared", "first")]));
        assert_eq!(service_at(&r, "", "/shared").as_deref(), Some("first"));
    }

    #[test]
    fn removing_shadowed_owner_keeps_winner() {
        let mut r = reconciler();
        r.on_added(&ingress("first", 1, vec![rule("", "/shared", "first")]));
        r.on_added(&ingress("second", 1, vec![rule("", "/shared", "second")]));

        r.on_removed(&ResourceId::new("default", "first"));
        assert_eq!(service_at(&r, "", "/shared").as_deref(), Some("second"));
    }

    #[test]
    fn removing_winner_restores_remaining_claim() {
        let mut r = reconciler();
        r.on_added(&ingress("first", 1, vec![rule("", "/shared", "first")]));
        r.on_added(&ingress("second", 1, vec![rule("", "/shared", "second")]));

        r.on_removed(&ResourceId::new("default", "second"));
        let entry = r
            .table()
            .snapshot()
            .get(&RouteKey::new("", "/shared", MatchMode::Prefix))
            .cloned()
            .unwrap();
        assert_eq!(entry.backend.service, "first");
        assert_eq!(entry.owner, ResourceId::new("default", "first"));
    }

    #[test]
    fn bad_rule_does_not_block_the_rest() {
        let mut r = reconciler();
        let mut broken = rule("", "/broken", "x");
        broken.backend = None;
        let installed = r.on_added(&ingress(
            "web",
            1,
            vec![broken, rule("", "/fine", "fine")],
        ));

        assert_eq!(installed, 1);
        assert_eq!(service_at(&r, "", "/fine").as_deref(), Some("fine"));
        assert_eq!(r.stats().rejected_rules.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn apply_counts_events() {
        let mut r = reconciler();
        let web = ingress("web", 1, vec![rule("", "/", "a")]);
        r.apply(ResourceEvent::added(web.clone()));
        r.apply(ResourceEvent::deleted(web));
        assert_eq!(r.stats().events_applied.load(Ordering::Relaxed), 2);
        assert_eq!(r.stats().resources.load(Ordering::Relaxed), 0);
        assert!(r.table().is_empty());
    }

    #[tokio::test]
    async fn run_ends_with_stream_closed() {
        let mut r = reconciler();
        let (tx, mut source) = ChannelSource::new(8);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tx.send(ResourceEvent::added(ingress("web", 1, vec![rule("", "/", "a")])))
            .await
            .unwrap();
        drop(tx);

        let result = r.run(&mut source, &mut shutdown_rx).await;
        assert!(matches!(
            result,
            Err(SwitchyardError::EventStreamClosed { source_name: "channel" })
        ));
        assert_eq!(service_at(&r, "", "/").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_while_waiting() {
        let mut r = reconciler();
        let (_tx, mut source) = ChannelSource::new(8);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = shutdown_tx.send(true);
            shutdown_tx
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            r.run(&mut source, &mut shutdown_rx),
        )
        .await
        .expect("reconciler did not stop");
        assert!(result.is_ok());
        drop(stopper.await.unwrap());
    }

    #[tokio::test]
    async fn run_returns_immediately_when_already_shut_down() {
        let mut r = reconciler();
        let (_tx, mut source) = ChannelSource::new(8);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        assert!(r.run(&mut source, &mut shutdown_rx).await.is_ok());
    }

    struct Recording(tokio::sync::mpsc::UnboundedSender<(ResourceId, LoadBalancerStatus)>);

    #[async_trait::async_trait]
    impl StatusReporter for Recording {
        async fn report(
            &self,
            id: &ResourceId,
            status: &LoadBalancerStatus,
        ) -> Result<(), SwitchyardError> {
            let _ = self.0.send((id.clone(), status.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn reports_status_after_install() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let publish = LoadBalancerStatus {
            hostname: Some("edge.example.com".into()),
            ip: None,
        };
        let mut r = reconciler().with_status_reporter(Arc::new(Recording(tx)), publish.clone());

        r.on_added(&ingress("web", 1, vec![rule("", "/", "a")]));
        let (id, status) = rx.recv().await.unwrap();
        assert_eq!(id, ResourceId::new("default", "web"));
        assert_eq!(status, publish);

        r.on_removed(&id);
        assert!(rx.try_recv().is_err());
    }
}
