//! Storage Picker - Datacenter-Aware Placement Selection
//!
//! Chooses a set of distinct storage nodes to hold an object's replicas,
//! spread across datacenters where possible, from a periodically refreshed
//! and partially stale view of cluster capacity.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Refresh Driver                                 │
//! │   ┌──────────────────┐    fetch     ┌──────────────────────────────┐    │
//! │   │ TopologySource   │ ───────────▶ │  TopologyView::build         │    │
//! │   │ (file / static)  │  (timeout)   │  general + operator buckets  │    │
//! │   └──────────────────┘              └──────────────┬───────────────┘    │
//! │                                                    │ install (swap)     │
//! │                                     ┌──────────────┴───────────────┐    │
//! │                                     │  TopologyStore (watch chan)  │    │
//! │                                     └──────────────┬───────────────┘    │
//! ├────────────────────────────────────────────────────┼────────────────────┤
//! │                         Placement                  │ Arc snapshot       │
//! │   ┌──────────────────┐              ┌──────────────┴───────────────┐    │
//! │   │ PlacementRequest │ ───────────▶ │  PlacementSelector::choose   │    │
//! │   └──────────────────┘              │  round-robin over DCs        │    │
//! │                                     └──────────────┬───────────────┘    │
//! │                                                    ▼                    │
//! │                          PlacementDecision | PlacementError             │
//! │                          + ChooseStats -> TopologySummary               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`topology`]: Raw reports, view construction, snapshot store, refresh
//! - [`placement`]: Requests, selection, and selection summaries
//! - [`config`]: Cutoffs, lag, limits and refresh timing
//! - [`error`]: Error types and handling
//!
//! # Usage
//!
//! ```ignore
//! use storage_picker::{PickerConfig, Picker, PlacementRequest, TopologyStore, TopologyView,
//!     RawTopology, ViewOptions};
//!
//! let config = PickerConfig::default();
//! let store = TopologyStore::new();
//! let raw = RawTopology::from_json_str(input)?;
//! store.install(TopologyView::build(&raw, &ViewOptions::from_config(&config, chrono::Utc::now())));
//!
//! let picker = Picker::new(&config, store);
//! let decision = picker.choose(&PlacementRequest::new(2, 1 << 20))?;
//! ```

pub mod config;
pub mod error;
pub mod placement;
pub mod topology;

// Re-export commonly used types
pub use config::PickerConfig;

pub use error::{
    Error, ErrorAction, PlacementError, Result, ValidationError, ValidationErrors,
    ValidationReason,
};

pub use placement::{
    ChooseStats, DatacenterSummary, Picker, PlacementDecision, PlacementRequest,
    PlacementSelector, SummaryTotals, TopologySummary,
};

pub use topology::{
    DatacenterBuckets, JsonFileSource, NodeId, RawNodeReport, RawTopology, StaticSource,
    StorageNode, TopologyEvent, TopologyRefresher, TopologySource, TopologyStore, TopologyView,
    ViewOptions,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
