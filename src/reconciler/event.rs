//! Typed resource events and the source contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SwitchyardError;
use crate::ingress::IngressSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    pub resource: IngressSnapshot,
}

impl ResourceEvent {
    #[must_use]
    pub const fn added(resource: IngressSnapshot) -> Self {
        Self {
            kind: EventKind::Added,
            resource,
        }
    }

    #[must_use]
    pub const fn modified(resource: IngressSnapshot) -> Self {
        Self {
            kind: EventKind::Modified,
            resource,
        }
    }

    #[must_use]
    pub const fn deleted(resource: IngressSnapshot) -> Self {
        Self {
            kind: EventKind::Deleted,
            resource,
        }
    }
}

/// An ordered stream of resource events.
///
/// `Ok(None)` is end-of-stream; `Err` is a transport failure. Either ends
/// the reconciler's current run. Implementations must be cancel-safe:
/// dropping a pending `next()` must not lose an event that was already
/// taken off the transport.
// async_trait is required because sources are held as Box<dyn EventSource>.
#[async_trait]
pub trait EventSource: Send {
    fn name(&self) -> &'static str;
    async fn next(&mut self) -> Result<Option<ResourceEvent>, SwitchyardError>;
}

/// Event source fed through a tokio channel. The stream ends when every
/// sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<ResourceEvent>,
}

impl ChannelSource {
    #[must_use]
    pub fn new(buffer: usize) -> (mpsc::Sender<ResourceEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn next(&mut self) -> Result<Option<ResourceEvent>, SwitchyardError> {
        Ok(self.rx.recv().await)
    }
}
