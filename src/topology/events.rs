//! Topology Events
//!
//! Events emitted by the topology store for external consumers to react to
//! snapshot refreshes.

use serde::{Deserialize, Serialize};

/// Events emitted by the topology store and refresher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TopologyEvent {
    /// A new snapshot was installed
    SnapshotInstalled {
        version: u64,
        datacenters: usize,
        general_nodes: usize,
        operator_nodes: usize,
    },

    /// Some records in the refreshed batch were rejected
    RecordsRejected { version: u64, count: usize },

    /// Reports older than the lag window were dropped
    StaleRecordsDropped { version: u64, count: usize },

    /// A refresh attempt failed; the previous snapshot stays current
    RefreshFailed { reason: String, transient: bool },
}

impl TopologyEvent {
    /// Snapshot version this event refers to, if any
    pub fn version(&self) -> Option<u64> {
        match self {
            TopologyEvent::SnapshotInstalled { version, .. } => Some(*version),
            TopologyEvent::RecordsRejected { version, .. } => Some(*version),
            TopologyEvent::StaleRecordsDropped { version, .. } => Some(*version),
            TopologyEvent::RefreshFailed { .. } => None,
        }
    }

    /// Check if this event signals a problem with the input or the source
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            TopologyEvent::RecordsRejected { .. } | TopologyEvent::RefreshFailed { .. }
        )
    }
}

impl std::fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyEvent::SnapshotInstalled {
                version,
                datacenters,
                general_nodes,
                operator_nodes,
            } => write!(
                f,
                "snapshot v{} installed ({} datacenters, {} general / {} operator nodes)",
                version, datacenters, general_nodes, operator_nodes
            ),
            TopologyEvent::RecordsRejected { version, count } => {
                write!(f, "snapshot v{} rejected {} record(s)", version, count)
            }
            TopologyEvent::StaleRecordsDropped { version, count } => {
                write!(f, "snapshot v{} dropped {} stale record(s)", version, count)
            }
            TopologyEvent::RefreshFailed { reason, .. } => write!(f, "refresh failed: {}", reason),
        }
    }
}
