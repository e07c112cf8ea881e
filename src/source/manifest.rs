//! Polling manifest-file event source with SHA-256 change detection.
//!
//! [`ManifestSource`] re-reads a YAML/JSON manifest every poll interval
//! and turns the difference from the previous read into resource events:
//! unseen ids become `Added`, ids whose canonical digest changed become
//! `Modified`, vanished ids become `Deleted`. When the manifest carries a
//! `services` section it is published to a [`ServiceDirectory`].
//!
//! Read and parse failures are returned as transport errors. The previous
//! view is kept, so a later successful read only emits real changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::SwitchyardError;
use crate::ingress::manifest::{parse_manifest_str, IngressManifest, Manifest};
use crate::ingress::{IngressSnapshot, ResourceId};
use crate::reconciler::{EventSource, ResourceEvent};
use crate::resolver::{ServiceDirectory, ServiceRecord};

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

struct Known {
    digest: String,
    snapshot: IngressSnapshot,
}

pub struct ManifestSource {
    path: PathBuf,
    interval: Duration,
    directory: Option<Arc<ServiceDirectory>>,
    known: HashMap<ResourceId, Known>,
    file_digest: Option<String>,
    pending: VecDeque<ResourceEvent>,
    primed: bool,
}

impl ManifestSource {
    #[must_use]
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            directory: None,
            known: HashMap::new(),
            file_digest: None,
            pending: VecDeque::new(),
            primed: false,
        }
    }

    /// Publish the manifest's `services` section to `directory`.
    #[must_use]
    pub fn with_service_directory(mut self, directory: Arc<ServiceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    async fn refresh(&mut self) -> Result<(), SwitchyardError> {
        let content = read_manifest(&self.path).await?;
        let file_digest = sha256_hex(content.as_bytes());
        if self.file_digest.as_deref() == Some(file_digest.as_str()) {
            return Ok(());
        }

        let manifest = parse_manifest_file(&self.path, &content)?;
        if let Some(directory) = &self.directory {
            directory.replace(service_records(&manifest));
        }
        self.diff(&manifest.ingresses);
        self.file_digest = Some(file_digest);
        Ok(())
    }

    fn diff(&mut self, ingresses: &[IngressManifest]) {
        let mut seen: HashSet<ResourceId> = HashSet::with_capacity(ingresses.len());

        for ingress in ingresses {
            let snapshot = ingress.to_snapshot();
            let id = snapshot.id.clone();
            if !seen.insert(id.clone()) {
                tracing::warn!(
                    resource = %id,
                    "ingress declared twice in manifest, later entry wins"
                );
            }

            // serde_json of a derived Serialize is infallible for these types
            let digest = sha256_hex(&serde_json::to_vec(ingress).unwrap_or_default());
            match self.known.get(&id) {
                Some(known) if known.digest == digest => continue,
                Some(_) => self.pending.push_back(ResourceEvent::modified(snapshot.clone())),
                None => self.pending.push_back(ResourceEvent::added(snapshot.clone())),
            }
            self.known.insert(id, Known { digest, snapshot });
        }

        let mut vanished: Vec<ResourceId> = self
            .known
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        vanished.sort();
        for id in vanished {
            if let Some(known) = self.known.remove(&id) {
                self.pending.push_back(ResourceEvent::deleted(known.snapshot));
            }
        }
    }
}

#[async_trait]
impl EventSource for ManifestSource {
    fn name(&self) -> &'static str {
        "manifest"
    }

    async fn next(&mut self) -> Result<Option<ResourceEvent>, SwitchyardError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.primed {
                tokio::time::sleep(self.interval).await;
            }
            self.primed = true;
            self.refresh().await?;
        }
    }
}

async fn read_manifest(path: &Path) -> Result<String, SwitchyardError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SwitchyardError::ManifestNotFound {
                path: path.to_path_buf(),
            }
        } else {
            SwitchyardError::Io(e)
        }
    })
}

/// Parse manifest text, picking the format from the file extension.
pub fn parse_manifest_file(path: &Path, content: &str) -> Result<Manifest, SwitchyardError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    parse_manifest_str(ext, content, &path.display().to_string())
}

fn service_records(manifest: &Manifest) -> HashMap<String, ServiceRecord> {
    manifest
        .services
        .iter()
        .filter_map(|(name, service)| match service.to_record() {
            Ok(record) => Some((name.clone(), record)),
            Err(message) => {
                tracing::warn!(service = %name, error = %message, "skipping manifest service");
                None
            }
        })
        .collect()
}
