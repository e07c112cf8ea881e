//! Kubernetes Ingress watcher.
//!
//! Wraps a `kube::runtime::watcher` stream. The watcher re-lists after
//! every (re)connect; ids that were known before the re-list but are not
//! part of it are reported as deleted once the re-list completes.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::watcher;
use kube::Client;

use crate::error::SwitchyardError;
use crate::ingress::{IngressRule, IngressSnapshot, PortRef, ResourceId, ServiceBackend};
use crate::reconciler::{EventSource, ResourceEvent};

pub struct KubeIngressSource {
    stream: BoxStream<'static, Result<watcher::Event<Ingress>, watcher::Error>>,
    known: HashMap<ResourceId, IngressSnapshot>,
    relist: Option<HashSet<ResourceId>>,
    pending: VecDeque<ResourceEvent>,
}

impl KubeIngressSource {
    /// Watch ingresses in `namespace`, or in every namespace when `None`.
    #[must_use]
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let api: Api<Ingress> = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self {
            stream: watcher(api, watcher::Config::default()).boxed(),
            known: HashMap::new(),
            relist: None,
            pending: VecDeque::new(),
        }
    }

    fn on_apply(&mut self, ingress: &Ingress) {
        let snapshot = snapshot_from_ingress(ingress);
        if let Some(seen) = self.relist.as_mut() {
            seen.insert(snapshot.id.clone());
        }
        match self.known.get(&snapshot.id) {
            Some(prev) if *prev == snapshot => {}
            Some(_) => self.pending.push_back(ResourceEvent::modified(snapshot.clone())),
            None => self.pending.push_back(ResourceEvent::added(snapshot.clone())),
        }
        self.known.insert(snapshot.id.clone(), snapshot);
    }

    fn on_delete(&mut self, ingress: &Ingress) {
        let id = resource_id(ingress);
        if let Some(prev) = self.known.remove(&id) {
            self.pending.push_back(ResourceEvent::deleted(prev));
        }
    }

    fn on_init_done(&mut self) {
        let Some(seen) = self.relist.take() else {
            return;
        };
        let mut gone: Vec<ResourceId> = self
            .known
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        gone.sort();
        for id in gone {
            if let Some(prev) = self.known.remove(&id) {
                self.pending.push_back(ResourceEvent::deleted(prev));
            }
        }
        tracing::info!(resources = self.known.len(), "ingress watcher initial sync complete");
    }
}

#[async_trait]
impl EventSource for KubeIngressSource {
    fn name(&self) -> &'static str {
        "kube"
    }

    async fn next(&mut self) -> Result<Option<ResourceEvent>, SwitchyardError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.stream.next().await {
                Some(Ok(watcher::Event::Apply(ingress) | watcher::Event::InitApply(ingress))) => {
                    self.on_apply(&ingress);
                }
                Some(Ok(watcher::Event::Delete(ingress))) => self.on_delete(&ingress),
                Some(Ok(watcher::Event::Init)) => {
                    tracing::debug!("ingress watcher re-listing");
                    self.relist = Some(HashSet::new());
                }
                Some(Ok(watcher::Event::InitDone)) => self.on_init_done(),
                Some(Err(e)) => {
                    return Err(SwitchyardError::EventSource {
                        source_name: "kube",
                        source: Box::new(e),
                    })
                }
                None => return Ok(None),
            }
        }
    }
}

fn resource_id(ingress: &Ingress) -> ResourceId {
    ResourceId::new(
        ingress
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        ingress.metadata.name.clone().unwrap_or_default(),
    )
}

/// Flatten an Ingress object's `spec.rules[].http.paths[]`.
#[must_use]
pub fn snapshot_from_ingress(ingress: &Ingress) -> IngressSnapshot {
    let rules = ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .flat_map(|rule| {
            let host = rule.host.clone().unwrap_or_default();
            rule.http
                .iter()
                .flat_map(|http| http.paths.iter())
                .map(move |p| IngressRule {
                    host: host.clone(),
                    path: p.path.clone(),
                    path_type: Some(p.path_type.clone()),
                    backend: p.backend.service.as_ref().map(|svc| ServiceBackend {
                        name: svc.name.clone(),
                        port: svc.port.as_ref().and_then(|port| {
                            port.number
                                .map(PortRef::Number)
                                .or_else(|| port.name.clone().map(PortRef::Name))
                        }),
                    }),
                })
        })
        .collect();

    IngressSnapshot {
        id: resource_id(ingress),
        generation: ingress.metadata.generation.unwrap_or(0),
        rules,
    }
}
