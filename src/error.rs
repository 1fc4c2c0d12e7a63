//! Error types for the Storage Picker
//!
//! Provides structured error types for topology view construction,
//! placement selection, configuration and the refresh path.

use crate::placement::ChooseStats;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the picker
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Topology validation failed: {0}")]
    Validation(ValidationErrors),

    // =========================================================================
    // Placement Errors
    // =========================================================================
    #[error("{0}")]
    Placement(Box<PlacementError>),

    // =========================================================================
    // Refresh Errors
    // =========================================================================
    #[error("Topology refresh timed out after {timeout_ms}ms")]
    RefreshTimeout { timeout_ms: u64 },

    #[error("Topology source unavailable: {source_name} - {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Why a single raw node report was rejected
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ValidationReason {
    /// Record has no `id`
    MissingId,
    /// Record has no `availableBytes`
    MissingAvailableBytes,
    /// Record names a datacenter other than the one it is grouped under
    DatacenterMismatch { found: String },
    /// Node was first observed in another datacenter
    DatacenterChanged { previous: String },
    /// Another record in the same batch already used this id
    DuplicateId,
    /// Utilization outside [0, 100]
    UtilizationOutOfRange { value: f64 },
    /// Record is not an object or a field has the wrong type
    Malformed { detail: String },
}

impl std::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationReason::MissingId => write!(f, "missing id"),
            ValidationReason::MissingAvailableBytes => write!(f, "missing availableBytes"),
            ValidationReason::DatacenterMismatch { found } => {
                write!(f, "datacenter field {:?} does not match grouping key", found)
            }
            ValidationReason::DatacenterChanged { previous } => {
                write!(f, "node was previously observed in datacenter {:?}", previous)
            }
            ValidationReason::DuplicateId => write!(f, "duplicate node id"),
            ValidationReason::UtilizationOutOfRange { value } => {
                write!(f, "utilizationPct {} outside [0, 100]", value)
            }
            ValidationReason::Malformed { detail } => write!(f, "malformed record: {}", detail),
        }
    }
}

/// A rejected raw node report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Datacenter key the record was grouped under
    pub datacenter: String,
    /// Position of the record within its datacenter list
    pub index: usize,
    /// Node id, when the record carried one
    pub node_id: Option<String>,
    pub reason: ValidationReason,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "{}[{}] ({}): {}", self.datacenter, self.index, id, self.reason),
            None => write!(f, "{}[{}]: {}", self.datacenter, self.index, self.reason),
        }
    }
}

/// Aggregate of per-record validation failures
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} record(s) rejected", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, err)?;
        }
        Ok(())
    }
}

// =============================================================================
// Placement Error
// =============================================================================

/// No set of distinct, sufficiently large nodes could be assembled
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementError {
    pub replicas_requested: usize,
    pub replicas_satisfied: usize,
    pub object_size_bytes: u64,
    /// Datacenters whose buckets ran out during the attempt
    pub exhausted: Vec<String>,
    /// Selection state at the point of failure
    pub stats: ChooseStats,
}

impl std::fmt::Display for PlacementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Insufficient capacity: {} of {} replicas satisfiable for {} bytes",
            self.replicas_satisfied, self.replicas_requested, self.object_size_bytes
        )?;
        if self.stats.dcs_in_use.is_empty() {
            write!(f, " (no datacenter has eligible storage nodes)")
        } else {
            write!(
                f,
                " (datacenters {:?}, exhausted {:?})",
                self.stats.dcs_in_use, self.exhausted
            )
        }
    }
}

impl From<PlacementError> for Error {
    fn from(err: PlacementError) -> Self {
        Error::Placement(Box::new(err))
    }
}

// =============================================================================
// Caller Guidance
// =============================================================================

/// Suggested reaction for a caller; the picker itself never retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RetryWithBackoff,
    /// Retry once a newer topology snapshot is available
    RetryAfterRefresh(Duration),
    /// Input is wrong, retrying will not help
    NoRetry,
}

impl Error {
    /// Determine what a caller should do about this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::RefreshTimeout { .. } | Error::SourceUnavailable { .. } | Error::Io(_) => {
                ErrorAction::RetryWithBackoff
            }

            Error::Placement(_) => ErrorAction::RetryAfterRefresh(Duration::from_secs(30)),

            Error::Configuration(_) | Error::Validation(_) | Error::JsonParse(_) => {
                ErrorAction::NoRetry
            }
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRetry)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RefreshTimeout { .. } | Error::SourceUnavailable { .. } | Error::Io(_)
        )
    }

    /// Expected "not enough capacity" outcome rather than a fault
    pub fn is_capacity_shortfall(&self) -> bool {
        matches!(self, Error::Placement(_))
    }

    /// Placement details, if this is a placement failure
    pub fn placement(&self) -> Option<&PlacementError> {
        match self {
            Error::Placement(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for the picker
pub type Result<T> = std::result::Result<T, Error>;
