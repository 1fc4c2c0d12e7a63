//! Storage Nodes and Raw Reports
//!
//! `RawTopology` is the serialized shape produced by the polling collaborator
//! (datacenter name -> list of node status records). Records are kept as
//! untyped JSON until view construction so that one bad record can be
//! rejected on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

use crate::error::Result;

// =============================================================================
// Node ID
// =============================================================================

/// Unique identifier for a storage node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Storage Node
// =============================================================================

/// A validated storage node as seen by one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageNode {
    pub id: NodeId,
    pub datacenter: String,
    /// Free capacity as of the last report
    pub available_bytes: u64,
    /// Reported or derived utilization in [0, 100]
    pub utilization_pct: f64,
    pub report_timestamp: Option<DateTime<Utc>>,
}

impl StorageNode {
    /// Check if the node can take an object of the given size
    #[inline]
    pub fn has_capacity(&self, size_bytes: u64) -> bool {
        self.available_bytes >= size_bytes
    }

    /// Check if the last report is older than `now - lag`
    pub fn is_stale(&self, now: DateTime<Utc>, lag: chrono::Duration) -> bool {
        match self.report_timestamp {
            Some(ts) => now.signed_duration_since(ts) > lag,
            None => false,
        }
    }
}

// =============================================================================
// Raw Reports
// =============================================================================

/// Report time as either RFC 3339 text or epoch milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportTimestamp {
    EpochMillis(i64),
    Rfc3339(DateTime<Utc>),
}

impl ReportTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ReportTimestamp::EpochMillis(ms) => DateTime::from_timestamp_millis(*ms),
            ReportTimestamp::Rfc3339(ts) => Some(*ts),
        }
    }
}

/// One node status record as delivered by the polling collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNodeReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
    /// Used to derive utilization when `utilization_pct` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utilization_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_timestamp: Option<ReportTimestamp>,
}

impl RawNodeReport {
    /// Utilization as reported, else derived from total/available, else 0
    pub fn effective_utilization(&self) -> f64 {
        if let Some(pct) = self.utilization_pct {
            return pct;
        }
        match (self.total_bytes, self.available_bytes) {
            (Some(total), Some(available)) if total > 0 => {
                let used = total.saturating_sub(available);
                (used as f64 / total as f64) * 100.0
            }
            _ => 0.0,
        }
    }
}

/// Datacenter name -> raw node records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTopology(pub BTreeMap<String, Vec<serde_json::Value>>);

impl RawTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Append a typed report under a datacenter
    pub fn push(&mut self, datacenter: impl Into<String>, report: &RawNodeReport) -> Result<()> {
        let value = serde_json::to_value(report)?;
        self.0.entry(datacenter.into()).or_default().push(value);
        Ok(())
    }

    /// Total number of records across all datacenters
    pub fn record_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_forms() {
        let millis: ReportTimestamp = serde_json::from_str("1700000000000").unwrap();
        let text: ReportTimestamp = serde_json::from_str("\"2023-11-14T22:13:20Z\"").unwrap();
        assert_eq!(millis.to_datetime(), text.to_datetime());
    }

    #[test]
    fn test_derived_utilization() {
        let report = RawNodeReport {
            available_bytes: Some(250),
            total_bytes: Some(1000),
            ..Default::default()
        };
        assert!((report.effective_utilization() - 75.0).abs() < f64::EPSILON);

        let reported = RawNodeReport {
            utilization_pct: Some(12.5),
            total_bytes: Some(1000),
            available_bytes: Some(10),
            ..Default::default()
        };
        assert_eq!(reported.effective_utilization(), 12.5);

        assert_eq!(RawNodeReport::default().effective_utilization(), 0.0);
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let node = StorageNode {
            id: "1.stor".into(),
            datacenter: "dc1".into(),
            available_bytes: 10,
            utilization_pct: 1.0,
            report_timestamp: Some(now - chrono::Duration::minutes(10)),
        };
        assert!(node.is_stale(now, chrono::Duration::minutes(5)));
        assert!(!node.is_stale(now, chrono::Duration::minutes(15)));

        let unstamped = StorageNode {
            report_timestamp: None,
            ..node
        };
        assert!(!unstamped.is_stale(now, chrono::Duration::zero()));
    }

    #[test]
    fn test_raw_topology_push() {
        let mut raw = RawTopology::new();
        raw.push(
            "dc1",
            &RawNodeReport {
                id: Some("1.stor".into()),
                available_bytes: Some(100),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(raw.record_count(), 1);
        assert_eq!(raw.0["dc1"][0]["availableBytes"], 100);
    }
}
