//! Topology Refresh
//!
//! Fetches raw topology from a source, builds a view against the previous
//! snapshot's datacenter index and installs it. A failed refresh leaves the
//! current snapshot in place.

use super::events::TopologyEvent;
use super::node::RawTopology;
use super::store::TopologyStore;
use super::view::{TopologyView, ViewOptions};
use crate::config::PickerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// =============================================================================
// Sources
// =============================================================================

/// Where raw node reports come from
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Fetch the current raw topology
    async fn fetch(&self) -> Result<RawTopology>;
}

/// In-memory source for simulation and tests
#[derive(Debug, Default)]
pub struct StaticSource {
    raw: Mutex<RawTopology>,
}

impl StaticSource {
    pub fn new(raw: RawTopology) -> Self {
        Self {
            raw: Mutex::new(raw),
        }
    }

    /// Replace what the next fetch returns
    pub fn set(&self, raw: RawTopology) {
        *self.raw.lock() = raw;
    }
}

#[async_trait]
impl TopologySource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> Result<RawTopology> {
        Ok(self.raw.lock().clone())
    }
}

/// Reads the JSON topology shape from a file on every fetch
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    name: String,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file:{}", path.display());
        Self { path, name }
    }
}

#[async_trait]
impl TopologySource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<RawTopology> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::SourceUnavailable {
                source_name: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// =============================================================================
// Refresh Statistics
// =============================================================================

/// Outcome counters for the refresh loop
#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    pub succeeded: u64,
    pub failed: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// =============================================================================
// Refresher
// =============================================================================

/// Sole writer of the topology store
pub struct TopologyRefresher {
    source: Arc<dyn TopologySource>,
    store: TopologyStore,
    config: PickerConfig,
    stats: Mutex<RefreshStats>,
}

impl TopologyRefresher {
    pub fn new(source: Arc<dyn TopologySource>, store: TopologyStore, config: PickerConfig) -> Self {
        Self {
            source,
            store,
            config,
            stats: Mutex::new(RefreshStats::default()),
        }
    }

    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    pub fn stats(&self) -> RefreshStats {
        self.stats.lock().clone()
    }

    /// Fetch, build and install one snapshot
    pub async fn refresh_once(&self) -> Result<Arc<TopologyView>> {
        match self.try_refresh().await {
            Ok(snapshot) => {
                let mut stats = self.stats.lock();
                stats.succeeded += 1;
                stats.last_success = Some(snapshot.built_at);
                stats.last_error = None;
                Ok(snapshot)
            }
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "Topology refresh failed");
                {
                    let mut stats = self.stats.lock();
                    stats.failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.store.emit(TopologyEvent::RefreshFailed {
                    reason: e.to_string(),
                    transient: e.is_transient(),
                });
                Err(e)
            }
        }
    }

    async fn try_refresh(&self) -> Result<Arc<TopologyView>> {
        let timeout = self.config.fetch_timeout();
        let raw = tokio::time::timeout(timeout, self.source.fetch())
            .await
            .map_err(|_| Error::RefreshTimeout {
                timeout_ms: self.config.fetch_timeout_ms,
            })??;

        debug!(
            source = self.source.name(),
            records = raw.record_count(),
            "Fetched raw topology"
        );

        let previous = self.store.current();
        let options = ViewOptions::from_config(&self.config, Utc::now());
        let view = TopologyView::build_with_index(&raw, &options, &previous.datacenter_index);

        Ok(self.store.install(view))
    }

    /// Refresh on the configured interval until `shutdown` turns true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            source = self.source.name(),
            interval_ms = self.config.refresh_interval_ms,
            "Starting topology refresh loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are logged and reported as events; keep the last good snapshot
                    let _ = self.refresh_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(source = self.source.name(), "Topology refresh loop stopped");
    }
}
