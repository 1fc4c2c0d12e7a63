//! Picker Configuration
//!
//! Utilization cutoffs, staleness lag, size limits and refresh timing.
//! Loaded from a JSON file (camelCase keys) and overridable from the CLI.

use crate::error::{Error, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const MIB: u64 = 1024 * 1024;

// =============================================================================
// Defaults
// =============================================================================

fn default_max_utilization_pct() -> f64 {
    90.0
}

fn default_max_operator_utilization_pct() -> f64 {
    92.0
}

fn default_max_streaming_size_mb() -> u64 {
    5120
}

fn default_lag_ms() -> Option<u64> {
    Some(60 * 60 * 1000)
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval_ms() -> u64 {
    30_000
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

// =============================================================================
// Picker Configuration
// =============================================================================

/// Configuration for view construction, selection and refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerConfig {
    /// Nodes at or above this utilization are left out of the general view
    #[serde(default = "default_max_utilization_pct")]
    pub max_utilization_pct: f64,

    /// Nodes at or above this utilization are left out of the operator view
    #[serde(default = "default_max_operator_utilization_pct")]
    pub max_operator_utilization_pct: f64,

    /// Upper bound on a requested object size, in MiB
    #[serde(default = "default_max_streaming_size_mb", rename = "defaultMaxStreamingSizeMB")]
    pub default_max_streaming_size_mb: u64,

    /// Maximum age of a node report; `None` keeps every report
    #[serde(default = "default_lag_ms")]
    pub lag_ms: Option<u64>,

    /// Spread replicas round-robin across datacenters
    #[serde(default = "default_true", rename = "multiDC")]
    pub multi_dc: bool,

    /// Interval between topology refreshes
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Timeout for a single topology fetch
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            max_utilization_pct: default_max_utilization_pct(),
            max_operator_utilization_pct: default_max_operator_utilization_pct(),
            default_max_streaming_size_mb: default_max_streaming_size_mb(),
            lag_ms: default_lag_ms(),
            multi_dc: true,
            refresh_interval_ms: default_refresh_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl PickerConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no selection could work with
    pub fn validate(&self) -> Result<()> {
        check_percentage("maxUtilizationPct", self.max_utilization_pct)?;
        check_percentage("maxOperatorUtilizationPct", self.max_operator_utilization_pct)?;

        if self.default_max_streaming_size_mb == 0 {
            return Err(Error::Configuration(
                "defaultMaxStreamingSizeMB must be positive".into(),
            ));
        }
        if self.refresh_interval_ms == 0 {
            return Err(Error::Configuration("refreshIntervalMs must be positive".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(Error::Configuration("fetchTimeoutMs must be positive".into()));
        }

        if self.max_operator_utilization_pct < self.max_utilization_pct {
            warn!(
                general = self.max_utilization_pct,
                operator = self.max_operator_utilization_pct,
                "Operator utilization cutoff is below the general cutoff"
            );
        }

        Ok(())
    }

    /// Largest object a placement may be requested for, in bytes
    pub fn max_object_size_bytes(&self) -> u64 {
        self.default_max_streaming_size_mb.saturating_mul(MIB)
    }

    /// Staleness window, if enabled
    pub fn lag(&self) -> Option<ChronoDuration> {
        self.lag_ms
            .map(|ms| ChronoDuration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX)))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn check_percentage(name: &str, value: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(Error::Configuration(format!(
            "{} must be within [0, 100], got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PickerConfig::default();
        assert_eq!(config.max_utilization_pct, 90.0);
        assert_eq!(config.max_operator_utilization_pct, 92.0);
        assert_eq!(config.default_max_streaming_size_mb, 5120);
        assert_eq!(config.max_object_size_bytes(), 5120 * 1024 * 1024);
        assert!(config.multi_dc);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PickerConfig =
            serde_json::from_str(r#"{"maxUtilizationPct": 80, "multiDC": false, "lagMs": null}"#)
                .unwrap();
        assert_eq!(config.max_utilization_pct, 80.0);
        assert_eq!(config.max_operator_utilization_pct, 92.0);
        assert!(!config.multi_dc);
        assert!(config.lag().is_none());
    }

    #[test]
    fn test_percentage_over_100_rejected() {
        let config = PickerConfig {
            max_operator_utilization_pct: 101.0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let config = PickerConfig {
            max_utilization_pct: -1.0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_zero_timing_rejected() {
        let config = PickerConfig {
            fetch_timeout_ms: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"maxUtilizationPct": 85, "refreshIntervalMs": 500}}"#).unwrap();

        let config = PickerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_utilization_pct, 85.0);
        assert_eq!(config.refresh_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"maxUtilizationPct": 150}}"#).unwrap();
        assert_matches!(
            PickerConfig::from_file(file.path()),
            Err(Error::Configuration(_))
        );
    }
}
