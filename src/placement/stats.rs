//! Topology Summary
//!
//! Per-datacenter counts for a snapshot, optionally overlaid with the state a
//! `choose` call left behind. Pure function of its inputs; this is the data
//! the tabular and JSON renderers consume.

use super::selector::ChooseStats;
use crate::topology::TopologyView;
use serde::Serialize;

/// Counts for one datacenter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterSummary {
    pub name: String,
    /// Valid, fresh reports
    pub reported: usize,
    /// Nodes under the general cutoff
    pub general_nodes: usize,
    /// Nodes under the operator cutoff
    pub operator_nodes: usize,
    /// Free bytes across the nodes of the view that was selected from
    pub available_bytes: u64,
    /// Datacenter had eligible nodes for the choose call
    pub in_use: bool,
    /// Nodes the choose call walked past
    pub consumed: usize,
    /// Nodes the choose call picked
    pub chosen: usize,
    pub exhausted: bool,
}

/// Totals across all datacenters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTotals {
    pub datacenters: usize,
    pub datacenters_in_use: usize,
    pub reported: usize,
    pub general_nodes: usize,
    pub operator_nodes: usize,
    pub available_bytes: u64,
    pub consumed: usize,
    pub chosen: usize,
    pub rejected_records: usize,
    pub stale_records: usize,
}

/// Summary of a snapshot and, optionally, one selection against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySummary {
    pub view_version: u64,
    /// Whether counts like `available_bytes` refer to the operator view
    pub operator: bool,
    pub datacenters: Vec<DatacenterSummary>,
    pub totals: SummaryTotals,
}

impl TopologySummary {
    /// Summarize `view`; with `outcome`, fold in what that call consumed
    pub fn new(view: &TopologyView, outcome: Option<&ChooseStats>) -> Self {
        let operator = outcome.map(|s| s.operator).unwrap_or(false);
        Self::build(view, operator, outcome)
    }

    /// Summarize `view` with availability taken from one of its buckets
    pub fn for_view(view: &TopologyView, operator: bool) -> Self {
        Self::build(view, operator, None)
    }

    fn build(view: &TopologyView, operator: bool, outcome: Option<&ChooseStats>) -> Self {
        let selected = view.buckets(operator);

        let datacenters: Vec<DatacenterSummary> = view
            .datacenters()
            .map(|name| {
                let (in_use, consumed, chosen, exhausted) = match outcome {
                    Some(stats) => (
                        stats.dcs_in_use.iter().any(|dc| dc == name),
                        stats.offsets.get(name).copied().unwrap_or(0),
                        stats.chosen_per_dc.get(name).copied().unwrap_or(0),
                        stats.exhausted.iter().any(|dc| dc == name),
                    ),
                    None => (!selected.get(name).is_empty(), 0, 0, false),
                };

                DatacenterSummary {
                    name: name.to_string(),
                    reported: view.reported.get(name).copied().unwrap_or(0),
                    general_nodes: view.general.get(name).len(),
                    operator_nodes: view.operator.get(name).len(),
                    available_bytes: selected
                        .get(name)
                        .iter()
                        .map(|n| n.available_bytes)
                        .fold(0u64, u64::saturating_add),
                    in_use,
                    consumed,
                    chosen,
                    exhausted,
                }
            })
            .collect();

        let totals = datacenters.iter().fold(
            SummaryTotals {
                datacenters: datacenters.len(),
                rejected_records: view.validation_errors.len(),
                stale_records: view.stale_count,
                ..Default::default()
            },
            |mut acc, dc| {
                acc.datacenters_in_use += usize::from(dc.in_use);
                acc.reported += dc.reported;
                acc.general_nodes += dc.general_nodes;
                acc.operator_nodes += dc.operator_nodes;
                acc.available_bytes = acc.available_bytes.saturating_add(dc.available_bytes);
                acc.consumed += dc.consumed;
                acc.chosen += dc.chosen;
                acc
            },
        );

        Self {
            view_version: view.version,
            operator,
            datacenters,
            totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PickerConfig;
    use crate::placement::{PlacementRequest, PlacementSelector};
    use crate::topology::{RawTopology, ViewOptions};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn example_view() -> Arc<TopologyView> {
        let raw: RawTopology = serde_json::from_value(json!({
            "dc1": [
                {"id": "a", "availableBytes": 200, "utilizationPct": 10},
                {"id": "b", "availableBytes": 50, "utilizationPct": 95},
                {"availableBytes": 1}
            ],
            "dc2": [{"id": "c", "availableBytes": 300, "utilizationPct": 20}],
            "dc3": [{"id": "d", "availableBytes": 300, "utilizationPct": 91}]
        }))
        .unwrap();
        let options = ViewOptions::from_config(&PickerConfig::default(), Utc::now());
        Arc::new(TopologyView::build(&raw, &options))
    }

    #[test]
    fn test_view_only_summary() {
        let view = example_view();
        let summary = TopologySummary::new(&view, None);

        assert_eq!(summary.datacenters.len(), 3);
        let dc1 = &summary.datacenters[0];
        assert_eq!(dc1.name, "dc1");
        assert_eq!(dc1.reported, 2);
        assert_eq!(dc1.general_nodes, 1);
        assert_eq!(dc1.operator_nodes, 1);
        assert_eq!(dc1.available_bytes, 200);
        assert!(dc1.in_use);

        let dc3 = &summary.datacenters[2];
        assert_eq!(dc3.general_nodes, 0);
        assert_eq!(dc3.operator_nodes, 1);
        assert!(!dc3.in_use);

        assert_eq!(summary.totals.datacenters_in_use, 2);
        assert_eq!(summary.totals.general_nodes, 2);
        assert_eq!(summary.totals.available_bytes, 500);
        assert_eq!(summary.totals.rejected_records, 1);
    }

    #[test]
    fn test_operator_view_summary() {
        let view = example_view();
        let summary = TopologySummary::for_view(&view, true);
        assert!(summary.operator);
        assert_eq!(summary.totals.datacenters_in_use, 3);
        assert_eq!(summary.totals.available_bytes, 800);
        assert_eq!(summary.totals.chosen, 0);
    }

    #[test]
    fn test_summary_with_failed_outcome() {
        let view = example_view();
        let err = PlacementSelector::new(&PickerConfig::default())
            .choose(&PlacementRequest::new(3, 100), &view)
            .unwrap_err();
        let stats = &err.placement().unwrap().stats;

        let summary = TopologySummary::new(&view, Some(stats));
        assert_eq!(summary.totals.chosen, 2);
        assert_eq!(summary.totals.consumed, 2);
        assert!(summary.datacenters[0].exhausted);
        assert!(summary.datacenters[1].exhausted);
        assert!(!summary.datacenters[2].in_use);
    }

    #[test]
    fn test_summary_with_operator_outcome() {
        let view = example_view();
        let decision = PlacementSelector::new(&PickerConfig::default())
            .choose(&PlacementRequest::new(3, 100).operator(), &view)
            .unwrap();

        let summary = TopologySummary::new(&view, Some(&decision.stats));
        assert!(summary.operator);
        assert_eq!(summary.totals.datacenters_in_use, 3);
        assert_eq!(summary.totals.chosen, 3);
        assert_eq!(summary.totals.available_bytes, 800);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["totals"]["chosen"], 3);
        assert_eq!(json["datacenters"][2]["name"], "dc3");
    }
}
