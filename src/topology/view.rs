//! Topology View
//!
//! Builds the general and operator datacenter buckets from a raw topology.
//! Both buckets come out of a single pass over the same records, so they are
//! always refreshed together.

use super::node::{NodeId, RawNodeReport, RawTopology, StorageNode};
use crate::config::PickerConfig;
use crate::error::{Error, Result, ValidationError, ValidationErrors, ValidationReason};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Datacenter Buckets
// =============================================================================

/// Datacenter name -> eligible nodes, largest `available_bytes` first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DatacenterBuckets(BTreeMap<String, Vec<Arc<StorageNode>>>);

impl DatacenterBuckets {
    /// Nodes of one datacenter in selection order
    pub fn get(&self, datacenter: &str) -> &[Arc<StorageNode>] {
        self.0.get(datacenter).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every datacenter that reported, including ones with no eligible node
    pub fn datacenters(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Datacenters with at least one eligible node, in name order
    pub fn in_use(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, nodes)| !nodes.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Arc<StorageNode>])> {
        self.0.iter().map(|(name, nodes)| (name.as_str(), nodes.as_slice()))
    }

    pub fn node_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn contains(&self, datacenter: &str, id: &NodeId) -> bool {
        self.get(datacenter).iter().any(|node| &node.id == id)
    }

    fn sort(&mut self) {
        for nodes in self.0.values_mut() {
            nodes.sort_by(|a, b| selection_order(a, b));
        }
    }
}

/// Descending by available bytes, ties broken by id
fn selection_order(a: &StorageNode, b: &StorageNode) -> Ordering {
    b.available_bytes
        .cmp(&a.available_bytes)
        .then_with(|| a.id.cmp(&b.id))
}

// =============================================================================
// Build Options
// =============================================================================

/// Cutoffs and clock used for one view build
#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub max_utilization_pct: f64,
    pub max_operator_utilization_pct: f64,
    pub lag: Option<Duration>,
    /// Reference time for staleness; fixed per build so rebuilds are identical
    pub now: DateTime<Utc>,
}

impl ViewOptions {
    pub fn from_config(config: &PickerConfig, now: DateTime<Utc>) -> Self {
        Self {
            max_utilization_pct: config.max_utilization_pct,
            max_operator_utilization_pct: config.max_operator_utilization_pct,
            lag: config.lag(),
            now,
        }
    }
}

// =============================================================================
// Topology View
// =============================================================================

/// Immutable snapshot of eligible storage nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyView {
    /// Assigned by the store on install, 0 for views never installed
    pub version: u64,
    pub built_at: DateTime<Utc>,
    /// Nodes under the general utilization cutoff
    pub general: DatacenterBuckets,
    /// Nodes under the operator utilization cutoff
    pub operator: DatacenterBuckets,
    /// Valid, fresh records per datacenter before utilization filtering
    pub reported: BTreeMap<String, usize>,
    /// Node id -> datacenter it was first observed in
    #[serde(skip)]
    pub datacenter_index: BTreeMap<NodeId, String>,
    pub validation_errors: ValidationErrors,
    /// Records dropped for being older than the lag window
    pub stale_count: usize,
}

impl TopologyView {
    /// A view with no nodes
    pub fn empty() -> Self {
        Self {
            version: 0,
            built_at: Utc::now(),
            general: DatacenterBuckets::default(),
            operator: DatacenterBuckets::default(),
            reported: BTreeMap::new(),
            datacenter_index: BTreeMap::new(),
            validation_errors: ValidationErrors::default(),
            stale_count: 0,
        }
    }

    /// Build a view with no memory of earlier snapshots
    pub fn build(raw: &RawTopology, options: &ViewOptions) -> Self {
        Self::build_with_index(raw, options, &BTreeMap::new())
    }

    /// Build a view, rejecting nodes that moved away from the datacenter
    /// recorded in `previous`
    pub fn build_with_index(
        raw: &RawTopology,
        options: &ViewOptions,
        previous: &BTreeMap<NodeId, String>,
    ) -> Self {
        let mut general = DatacenterBuckets::default();
        let mut operator = DatacenterBuckets::default();
        let mut reported = BTreeMap::new();
        let mut datacenter_index = previous.clone();
        let mut errors = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stale_count = 0;

        for (datacenter, records) in &raw.0 {
            general.0.entry(datacenter.clone()).or_default();
            operator.0.entry(datacenter.clone()).or_default();
            let fresh = reported.entry(datacenter.clone()).or_insert(0usize);

            for (index, value) in records.iter().enumerate() {
                let node = match validate_record(datacenter, value) {
                    Ok(node) => node,
                    Err((node_id, reason)) => {
                        errors.push(ValidationError {
                            datacenter: datacenter.clone(),
                            index,
                            node_id,
                            reason,
                        });
                        continue;
                    }
                };

                let reject = |reason| ValidationError {
                    datacenter: datacenter.clone(),
                    index,
                    node_id: Some(node.id.to_string()),
                    reason,
                };

                if !seen.insert(node.id.clone()) {
                    errors.push(reject(ValidationReason::DuplicateId));
                    continue;
                }

                match datacenter_index.get(&node.id) {
                    Some(first) if first != datacenter => {
                        errors.push(reject(ValidationReason::DatacenterChanged {
                            previous: first.clone(),
                        }));
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        datacenter_index.insert(node.id.clone(), datacenter.clone());
                    }
                }

                if let Some(lag) = options.lag {
                    if node.is_stale(options.now, lag) {
                        debug!(node = %node.id, datacenter = %datacenter, "Skipping stale report");
                        stale_count += 1;
                        continue;
                    }
                }

                *fresh += 1;
                let node = Arc::new(node);
                if node.utilization_pct < options.max_utilization_pct {
                    general.0.entry(datacenter.clone()).or_default().push(node.clone());
                }
                if node.utilization_pct < options.max_operator_utilization_pct {
                    operator.0.entry(datacenter.clone()).or_default().push(node);
                }
            }
        }

        general.sort();
        operator.sort();

        if !errors.is_empty() {
            warn!(
                rejected = errors.len(),
                total = raw.record_count(),
                "Rejected malformed node reports"
            );
        }

        debug!(
            general = general.node_count(),
            operator = operator.node_count(),
            stale = stale_count,
            "Built topology view"
        );

        Self {
            version: 0,
            built_at: options.now,
            general,
            operator,
            reported,
            datacenter_index,
            validation_errors: ValidationErrors(errors),
            stale_count,
        }
    }

    /// Buckets to select from
    pub fn buckets(&self, operator: bool) -> &DatacenterBuckets {
        if operator {
            &self.operator
        } else {
            &self.general
        }
    }

    /// Fail if any record was rejected
    pub fn ensure_valid(&self) -> Result<()> {
        if self.validation_errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self.validation_errors.clone()))
        }
    }

    /// Every datacenter present in the raw input
    pub fn datacenters(&self) -> impl Iterator<Item = &str> {
        self.reported.keys().map(String::as_str)
    }
}

/// Turn one raw record into a node, or say why it was rejected
fn validate_record(
    datacenter: &str,
    value: &serde_json::Value,
) -> std::result::Result<StorageNode, (Option<String>, ValidationReason)> {
    let claimed_id = value
        .get("id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let report: RawNodeReport = serde_json::from_value(value.clone()).map_err(|e| {
        (
            claimed_id.clone(),
            ValidationReason::Malformed {
                detail: e.to_string(),
            },
        )
    })?;

    let id = match report.id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err((None, ValidationReason::MissingId)),
    };
    let fail = |reason| (Some(id.clone()), reason);

    let available_bytes = report
        .available_bytes
        .ok_or_else(|| fail(ValidationReason::MissingAvailableBytes))?;

    if let Some(found) = &report.datacenter {
        if found != datacenter {
            return Err(fail(ValidationReason::DatacenterMismatch {
                found: found.clone(),
            }));
        }
    }

    let utilization_pct = report.effective_utilization();
    if !(0.0..=100.0).contains(&utilization_pct) {
        return Err(fail(ValidationReason::UtilizationOutOfRange {
            value: utilization_pct,
        }));
    }

    let report_timestamp = match &report.report_timestamp {
        Some(ts) => Some(ts.to_datetime().ok_or_else(|| {
            fail(ValidationReason::Malformed {
                detail: "reportTimestamp out of range".into(),
            })
        })?),
        None => None,
    };

    Ok(StorageNode {
        id: NodeId(id),
        datacenter: datacenter.to_string(),
        available_bytes,
        utilization_pct,
        report_timestamp,
    })
}
