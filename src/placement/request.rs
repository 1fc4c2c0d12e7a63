//! Placement Request

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A request to place `replicas` copies of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRequest {
    /// Number of distinct nodes wanted
    pub replicas: usize,
    /// Size every chosen node must be able to hold
    pub object_size_bytes: u64,
    /// Select from the operator view instead of the general view
    #[serde(default)]
    pub operator: bool,
}

impl PlacementRequest {
    pub fn new(replicas: usize, object_size_bytes: u64) -> Self {
        Self {
            replicas,
            object_size_bytes,
            operator: false,
        }
    }

    /// Use the operator utilization cutoff
    pub fn operator(mut self) -> Self {
        self.operator = true;
        self
    }

    /// Reject parameters no selection could satisfy
    pub fn validate(&self, max_object_size_bytes: u64) -> Result<()> {
        if self.replicas < 1 {
            return Err(Error::Configuration("replicas must be at least 1".into()));
        }
        if self.object_size_bytes == 0 {
            return Err(Error::Configuration("object size must be positive".into()));
        }
        if self.object_size_bytes > max_object_size_bytes {
            return Err(Error::Configuration(format!(
                "object size {} exceeds the streaming limit of {} bytes",
                self.object_size_bytes, max_object_size_bytes
            )));
        }
        Ok(())
    }
}
