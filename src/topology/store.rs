//! Topology Store
//!
//! Holds the current snapshot. Installing swaps an `Arc` inside a watch
//! channel, so readers either see the old snapshot or the new one and
//! in-flight selections keep whatever they already hold.

use super::events::TopologyEvent;
use super::view::TopologyView;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Holder of the current topology snapshot; installs from any clone are serialized
#[derive(Debug, Clone)]
pub struct TopologyStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    snapshot_tx: watch::Sender<Arc<TopologyView>>,
    event_tx: broadcast::Sender<TopologyEvent>,
    /// Held across version assignment and swap so versions install in order
    next_version: Mutex<u64>,
}

impl TopologyStore {
    /// Create a store holding an empty snapshot
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(TopologyView::empty()));
        let (event_tx, _) = broadcast::channel(1024);

        Self {
            inner: Arc::new(StoreInner {
                snapshot_tx,
                event_tx,
                next_version: Mutex::new(1),
            }),
        }
    }

    /// The snapshot selections should use right now
    pub fn current(&self) -> Arc<TopologyView> {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Receiver that is notified whenever a new snapshot is installed
    pub fn subscribe(&self) -> watch::Receiver<Arc<TopologyView>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Receiver for lifecycle events
    pub fn events(&self) -> broadcast::Receiver<TopologyEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Version the next installed snapshot will receive
    pub fn next_version(&self) -> u64 {
        *self.inner.next_version.lock()
    }

    /// Assign a version and make `view` the current snapshot
    pub fn install(&self, mut view: TopologyView) -> Arc<TopologyView> {
        let mut next_version = self.inner.next_version.lock();
        let version = *next_version;
        *next_version += 1;
        view.version = version;

        let snapshot = Arc::new(view);
        self.inner.snapshot_tx.send_replace(snapshot.clone());
        drop(next_version);

        info!(
            version,
            general = snapshot.general.node_count(),
            operator = snapshot.operator.node_count(),
            rejected = snapshot.validation_errors.len(),
            "Installed topology snapshot"
        );

        self.emit(TopologyEvent::SnapshotInstalled {
            version,
            datacenters: snapshot.reported.len(),
            general_nodes: snapshot.general.node_count(),
            operator_nodes: snapshot.operator.node_count(),
        });
        if !snapshot.validation_errors.is_empty() {
            self.emit(TopologyEvent::RecordsRejected {
                version,
                count: snapshot.validation_errors.len(),
            });
        }
        if snapshot.stale_count > 0 {
            self.emit(TopologyEvent::StaleRecordsDropped {
                version,
                count: snapshot.stale_count,
            });
        }

        snapshot
    }

    /// Send an event; having no listeners is fine
    pub fn emit(&self, event: TopologyEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

impl Default for TopologyStore {
    fn default() -> Self {
        Self::new()
    }
}
