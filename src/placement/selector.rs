//! Placement Selector
//!
//! Picks `replicas` distinct storage nodes from one topology snapshot.
//!
//! Datacenters with at least one eligible node form a ring ordered by name.
//! In spread mode a cursor walks the ring: each replica slot is served by the
//! next datacenter at or after the cursor that still has a node large enough,
//! and the cursor then moves past that datacenter. A datacenter whose bucket
//! runs out is skipped for the rest of the call, so its slots fall through to
//! the next datacenter in ring order. Within a datacenter nodes are consumed
//! front to back (largest available first); a node is never offered twice in
//! one call.
//!
//! Without spread (`multi_dc` off, or fewer than two datacenters holding a
//! node large enough) datacenters are drained one after another in name order.

use super::request::PlacementRequest;
use crate::config::PickerConfig;
use crate::error::{PlacementError, Result};
use crate::topology::{StorageNode, TopologyStore, TopologyView};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Choose Statistics
// =============================================================================

/// Selection state after a `choose` call, successful or not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChooseStats {
    /// Version of the snapshot selected from
    pub view_version: u64,
    /// Whether the operator view was used
    pub operator: bool,
    /// Whether the chosen replicas were spread over more than one datacenter
    #[serde(rename = "multiDC")]
    pub multi_dc: bool,
    /// Datacenters with at least one eligible node, in ring order
    pub dcs_in_use: Vec<String>,
    /// Nodes consumed (chosen or skipped as too small) per datacenter
    pub offsets: BTreeMap<String, usize>,
    /// Datacenters that ran out of usable nodes during the call
    pub exhausted: Vec<String>,
    /// Replicas placed per datacenter
    pub chosen_per_dc: BTreeMap<String, usize>,
    pub replicas_requested: usize,
    pub replicas_satisfied: usize,
    pub object_size_bytes: u64,
}

// =============================================================================
// Placement Decision
// =============================================================================

/// Successful placement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDecision {
    /// One node per replica slot, in slot order
    pub chosen: Vec<Arc<StorageNode>>,
    pub stats: ChooseStats,
    /// Snapshot the decision was made against
    #[serde(skip)]
    pub view: Arc<TopologyView>,
}

impl PlacementDecision {
    /// Distinct datacenters among the chosen nodes
    pub fn datacenters(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.chosen.iter().map(|n| n.datacenter.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

// =============================================================================
// Datacenter Cursor
// =============================================================================

/// Per-datacenter offset into its sorted bucket
struct DatacenterCursor<'a> {
    name: &'a str,
    nodes: &'a [Arc<StorageNode>],
    offset: usize,
    exhausted: bool,
    chosen: usize,
}

impl<'a> DatacenterCursor<'a> {
    /// Next unconsumed node that fits, advancing past everything inspected
    fn take(&mut self, size_bytes: u64) -> Option<Arc<StorageNode>> {
        if self.exhausted {
            return None;
        }
        while let Some(node) = self.nodes.get(self.offset) {
            self.offset += 1;
            if node.has_capacity(size_bytes) {
                self.chosen += 1;
                return Some(node.clone());
            }
        }
        self.exhausted = true;
        None
    }
}

// =============================================================================
// Placement Selector
// =============================================================================

/// Pure selection over a snapshot; holds only policy
#[derive(Debug, Clone)]
pub struct PlacementSelector {
    multi_dc: bool,
    max_object_size_bytes: u64,
}

impl PlacementSelector {
    pub fn new(config: &PickerConfig) -> Self {
        Self {
            multi_dc: config.multi_dc,
            max_object_size_bytes: config.max_object_size_bytes(),
        }
    }

    /// Choose `request.replicas` distinct nodes from `view`
    pub fn choose(
        &self,
        request: &PlacementRequest,
        view: &Arc<TopologyView>,
    ) -> Result<PlacementDecision> {
        request.validate(self.max_object_size_bytes)?;

        let buckets = view.buckets(request.operator);
        let dcs_in_use = buckets.in_use();
        let size = request.object_size_bytes;

        let mut cursors: Vec<DatacenterCursor<'_>> = buckets
            .iter()
            .filter(|(_, nodes)| !nodes.is_empty())
            .map(|(name, nodes)| DatacenterCursor {
                name,
                nodes,
                offset: 0,
                exhausted: false,
                chosen: 0,
            })
            .collect();

        // Only datacenters holding a node large enough count towards spreading
        let fitting_dcs = cursors
            .iter()
            .filter(|c| c.nodes.iter().any(|n| n.has_capacity(size)))
            .count();
        let spread = self.multi_dc && fitting_dcs >= 2;

        let mut chosen = Vec::with_capacity(request.replicas);
        let mut next = 0;

        while chosen.len() < request.replicas {
            let node = if spread {
                take_round_robin(&mut cursors, &mut next, size)
            } else {
                take_sequential(&mut cursors, size)
            };
            match node {
                Some(node) => chosen.push(node),
                None => break,
            }
        }

        let stats = ChooseStats {
            view_version: view.version,
            operator: request.operator,
            multi_dc: spread && spans_datacenters(&chosen),
            offsets: cursors
                .iter()
                .map(|c| (c.name.to_string(), c.offset))
                .collect(),
            exhausted: cursors
                .iter()
                .filter(|c| c.exhausted)
                .map(|c| c.name.to_string())
                .collect(),
            chosen_per_dc: cursors
                .iter()
                .map(|c| (c.name.to_string(), c.chosen))
                .collect(),
            dcs_in_use,
            replicas_requested: request.replicas,
            replicas_satisfied: chosen.len(),
            object_size_bytes: size,
        };

        if chosen.len() < request.replicas {
            debug!(
                version = view.version,
                requested = request.replicas,
                satisfied = chosen.len(),
                size,
                exhausted = ?stats.exhausted,
                "Placement failed"
            );
            return Err(PlacementError {
                replicas_requested: request.replicas,
                replicas_satisfied: chosen.len(),
                object_size_bytes: size,
                exhausted: stats.exhausted.clone(),
                stats,
            }
            .into());
        }

        debug!(
            version = view.version,
            replicas = request.replicas,
            size,
            multi_dc = spread,
            nodes = ?chosen.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            "Placement chosen"
        );

        Ok(PlacementDecision {
            chosen,
            stats,
            view: view.clone(),
        })
    }
}

/// Serve one slot from the first usable datacenter at or after `next`
fn take_round_robin(
    cursors: &mut [DatacenterCursor<'_>],
    next: &mut usize,
    size_bytes: u64,
) -> Option<Arc<StorageNode>> {
    let len = cursors.len();
    for step in 0..len {
        let idx = (*next + step) % len;
        if let Some(node) = cursors[idx].take(size_bytes) {
            *next = (idx + 1) % len;
            return Some(node);
        }
    }
    None
}

/// Whether the chosen nodes sit in more than one datacenter
fn spans_datacenters(chosen: &[Arc<StorageNode>]) -> bool {
    chosen
        .split_first()
        .map(|(first, rest)| rest.iter().any(|n| n.datacenter != first.datacenter))
        .unwrap_or(false)
}

/// Serve one slot from the first datacenter, in order, that still has a node
fn take_sequential(
    cursors: &mut [DatacenterCursor<'_>],
    size_bytes: u64,
) -> Option<Arc<StorageNode>> {
    cursors.iter_mut().find_map(|cursor| cursor.take(size_bytes))
}

// =============================================================================
// Picker
// =============================================================================

/// Selection against whatever snapshot the store holds at call time
#[derive(Debug, Clone)]
pub struct Picker {
    store: TopologyStore,
    selector: PlacementSelector,
}

impl Picker {
    pub fn new(config: &PickerConfig, store: TopologyStore) -> Self {
        Self {
            store,
            selector: PlacementSelector::new(config),
        }
    }

    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    /// Take the current snapshot and choose from it
    pub fn choose(&self, request: &PlacementRequest) -> Result<PlacementDecision> {
        let view = self.store.current();
        self.selector.choose(request, &view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::topology::{RawTopology, ViewOptions};
    use assert_matches::assert_matches;
    use chrono::DateTime;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use std::collections::HashSet;

    fn options() -> ViewOptions {
        ViewOptions {
            max_utilization_pct: 90.0,
            max_operator_utilization_pct: 92.0,
            lag: None,
            now: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    fn view(value: serde_json::Value) -> Arc<TopologyView> {
        let raw: RawTopology = serde_json::from_value(value).unwrap();
        Arc::new(TopologyView::build(&raw, &options()))
    }

    fn selector() -> PlacementSelector {
        PlacementSelector::new(&PickerConfig::default())
    }

    fn ids(decision: &PlacementDecision) -> Vec<&str> {
        decision.chosen.iter().map(|n| n.id.as_str()).collect()
    }

    fn example_view() -> Arc<TopologyView> {
        view(json!({
            "dc1": [
                {"id": "a", "availableBytes": 200, "utilizationPct": 10},
                {"id": "b", "availableBytes": 50, "utilizationPct": 95}
            ],
            "dc2": [
                {"id": "c", "availableBytes": 300, "utilizationPct": 20}
            ]
        }))
    }

    #[test]
    fn test_spreads_across_datacenters() {
        let decision = selector()
            .choose(&PlacementRequest::new(2, 100), &example_view())
            .unwrap();

        assert_eq!(ids(&decision), vec!["a", "c"]);
        assert_eq!(decision.datacenters(), vec!["dc1", "dc2"]);
        assert!(decision.stats.multi_dc);
        assert_eq!(decision.stats.dcs_in_use, vec!["dc1", "dc2"]);
    }

    #[test]
    fn test_more_replicas_than_nodes_fails() {
        let err = selector()
            .choose(&PlacementRequest::new(3, 100), &example_view())
            .unwrap_err();

        assert!(err.is_capacity_shortfall());
        let placement = err.placement().unwrap();
        assert_eq!(placement.replicas_requested, 3);
        assert_eq!(placement.replicas_satisfied, 2);
        assert_eq!(placement.stats.dcs_in_use, vec!["dc1", "dc2"]);
        assert_eq!(placement.exhausted, vec!["dc1", "dc2"]);
        assert_eq!(placement.stats.offsets["dc1"], 1);
        assert_eq!(placement.stats.offsets["dc2"], 1);
    }

    #[test]
    fn test_skips_nodes_that_are_too_small() {
        let v = view(json!({
            "dc1": [
                {"id": "big", "availableBytes": 1000},
                {"id": "small", "availableBytes": 10},
                {"id": "mid", "availableBytes": 500}
            ]
        }));
        let decision = selector().choose(&PlacementRequest::new(2, 400), &v).unwrap();
        assert_eq!(ids(&decision), vec!["big", "mid"]);

        let err = selector().choose(&PlacementRequest::new(3, 400), &v).unwrap_err();
        let placement = err.placement().unwrap();
        assert_eq!(placement.replicas_satisfied, 2);
        assert_eq!(placement.stats.offsets["dc1"], 3);
    }

    #[test]
    fn test_round_robin_wraps() {
        let v = view(json!({
            "dc1": [{"id": "a1", "availableBytes": 30}, {"id": "a2", "availableBytes": 20}],
            "dc2": [{"id": "b1", "availableBytes": 30}, {"id": "b2", "availableBytes": 20}],
            "dc3": [{"id": "c1", "availableBytes": 30}]
        }));
        let decision = selector().choose(&PlacementRequest::new(5, 1), &v).unwrap();
        assert_eq!(ids(&decision), vec!["a1", "b1", "c1", "a2", "b2"]);
        assert_eq!(decision.stats.chosen_per_dc["dc1"], 2);
        assert_eq!(decision.stats.chosen_per_dc["dc3"], 1);
    }

    #[test]
    fn test_exhausted_datacenter_reroutes() {
        let v = view(json!({
            "dc1": [{"id": "a1", "availableBytes": 5}],
            "dc2": [{"id": "b1", "availableBytes": 100}, {"id": "b2", "availableBytes": 90}],
            "dc3": [{"id": "c1", "availableBytes": 100}]
        }));

        // dc1 has no node large enough; its turn falls through to dc2
        let decision = selector().choose(&PlacementRequest::new(3, 50), &v).unwrap();
        assert_eq!(ids(&decision), vec!["b1", "c1", "b2"]);
        assert_eq!(decision.stats.exhausted, vec!["dc1"]);
        assert_eq!(decision.datacenters(), vec!["dc2", "dc3"]);
    }

    #[test]
    fn test_one_datacenter_with_capacity_is_not_multi_dc() {
        let v = view(json!({
            "dc1": [{"id": "tiny", "availableBytes": 5}],
            "dc2": [{"id": "b1", "availableBytes": 100}, {"id": "b2", "availableBytes": 90}]
        }));
        let decision = selector().choose(&PlacementRequest::new(2, 50), &v).unwrap();

        assert_eq!(ids(&decision), vec!["b1", "b2"]);
        assert_eq!(decision.datacenters(), vec!["dc2"]);
        assert!(!decision.stats.multi_dc);
        assert_eq!(decision.stats.dcs_in_use, vec!["dc1", "dc2"]);
        assert_eq!(decision.stats.exhausted, vec!["dc1"]);
    }

    #[test]
    fn test_single_replica_is_not_multi_dc() {
        let decision = selector()
            .choose(&PlacementRequest::new(1, 100), &example_view())
            .unwrap();
        assert_eq!(ids(&decision), vec!["a"]);
        assert!(!decision.stats.multi_dc);
    }

    #[test]
    fn test_single_datacenter_is_not_an_error() {
        let v = view(json!({
            "dc1": [
                {"id": "a", "availableBytes": 300},
                {"id": "b", "availableBytes": 200},
                {"id": "c", "availableBytes": 100}
            ],
            "dc2": [{"id": "full", "availableBytes": 900, "utilizationPct": 99}]
        }));
        let decision = selector().choose(&PlacementRequest::new(3, 10), &v).unwrap();
        assert_eq!(ids(&decision), vec!["a", "b", "c"]);
        assert!(!decision.stats.multi_dc);
        assert_eq!(decision.stats.dcs_in_use, vec!["dc1"]);
    }

    #[test]
    fn test_multi_dc_disabled_drains_in_order() {
        let config = PickerConfig {
            multi_dc: false,
            ..Default::default()
        };
        let v = view(json!({
            "dc1": [{"id": "a1", "availableBytes": 30}, {"id": "a2", "availableBytes": 20}],
            "dc2": [{"id": "b1", "availableBytes": 30}]
        }));
        let decision = PlacementSelector::new(&config)
            .choose(&PlacementRequest::new(3, 1), &v)
            .unwrap();
        assert_eq!(ids(&decision), vec!["a1", "a2", "b1"]);
        assert!(!decision.stats.multi_dc);
    }

    #[test]
    fn test_operator_view() {
        let v = view(json!({
            "dc1": [
                {"id": "a", "availableBytes": 100, "utilizationPct": 10},
                {"id": "b", "availableBytes": 100, "utilizationPct": 91}
            ]
        }));
        assert!(selector().choose(&PlacementRequest::new(2, 10), &v).is_err());

        let decision = selector()
            .choose(&PlacementRequest::new(2, 10).operator(), &v)
            .unwrap();
        assert_eq!(ids(&decision), vec!["a", "b"]);
        assert!(decision.stats.operator);
    }

    #[test]
    fn test_empty_view_fails_cleanly() {
        let err = selector()
            .choose(&PlacementRequest::new(1, 1), &Arc::new(TopologyView::empty()))
            .unwrap_err();
        let placement = err.placement().unwrap();
        assert_eq!(placement.replicas_satisfied, 0);
        assert!(placement.stats.dcs_in_use.is_empty());
    }

    #[test]
    fn test_invalid_request_rejected_before_selection() {
        assert_matches!(
            selector().choose(&PlacementRequest::new(0, 1), &example_view()),
            Err(Error::Configuration(_))
        );
        let too_big = PickerConfig::default().max_object_size_bytes() + 1;
        assert_matches!(
            selector().choose(&PlacementRequest::new(1, too_big), &example_view()),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_deterministic() {
        let v = example_view();
        let first = selector().choose(&PlacementRequest::new(2, 100), &v).unwrap();
        let second = selector().choose(&PlacementRequest::new(2, 100), &v).unwrap();
        assert_eq!(first.chosen, second.chosen);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn test_picker_uses_current_snapshot() {
        let store = TopologyStore::new();
        let picker = Picker::new(&PickerConfig::default(), store.clone());
        assert!(picker.choose(&PlacementRequest::new(1, 1)).is_err());

        let raw: RawTopology =
            serde_json::from_value(json!({"dc1": [{"id": "a", "availableBytes": 10}]})).unwrap();
        store.install(TopologyView::build(&raw, &options()));

        let decision = picker.choose(&PlacementRequest::new(1, 1)).unwrap();
        assert_eq!(decision.stats.view_version, 1);
        assert_eq!(decision.view.version, 1);
    }

    fn random_view(rng: &mut StdRng) -> Arc<TopologyView> {
        let mut dcs = serde_json::Map::new();
        let dc_count = rng.gen_range(1..=4);
        for d in 0..dc_count {
            let node_count = rng.gen_range(0..5);
            let nodes: Vec<_> = (0..node_count)
                .map(|n| {
                    json!({
                        "id": format!("{}.dc{}", n, d),
                        "availableBytes": rng.gen_range(0..1000u64),
                        "utilizationPct": rng.gen_range(0..100u64)
                    })
                })
                .collect();
            dcs.insert(format!("dc{}", d), serde_json::Value::Array(nodes));
        }
        view(serde_json::Value::Object(dcs))
    }

    #[test]
    fn test_selection_properties() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let v = random_view(&mut rng);
            let replicas = rng.gen_range(1..=6usize);
            let size = rng.gen_range(1..=600u64);
            let request = PlacementRequest::new(replicas, size);

            let fitting: Vec<_> = v
                .general
                .iter()
                .flat_map(|(_, nodes)| nodes.iter())
                .filter(|n| n.has_capacity(size))
                .collect();
            let fitting_dcs: HashSet<_> = fitting.iter().map(|n| n.datacenter.as_str()).collect();

            match selector().choose(&request, &v) {
                Ok(decision) => {
                    assert_eq!(decision.chosen.len(), replicas);
                    let distinct: HashSet<_> = decision.chosen.iter().map(|n| &n.id).collect();
                    assert_eq!(distinct.len(), replicas);
                    assert!(decision.chosen.iter().all(|n| n.has_capacity(size)));
                    assert_eq!(decision.stats.multi_dc, decision.datacenters().len() >= 2);

                    if fitting_dcs.len() >= 2 && replicas <= fitting_dcs.len() {
                        assert_eq!(decision.datacenters().len(), replicas);
                    }
                }
                Err(err) => {
                    assert!(err.is_capacity_shortfall());
                    assert!(fitting.len() < replicas);
                }
            }
        }
    }
}
