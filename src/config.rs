//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SafeguardError, SafeguardResult, ValidationError};

/// Longest accepted escort retention window (365 days).
pub const MAX_RETENTION_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeguardConfig {
    /// How long an ended escort session's trail is kept before purge.
    pub retention_window_secs: u64,
    /// Interval between retention sweeps.
    pub reaper_interval_secs: u64,
    /// Per-send bound on a single notification.
    pub notification_timeout_ms: u64,
    /// Maximum notification sends in flight for one dispatch.
    pub max_parallel_sends: usize,
    /// Smallest accepted catchment radius.
    pub min_radius_km: f64,
    /// Largest accepted catchment radius; also the geo prefilter bound.
    pub max_radius_km: f64,
    /// Request runtime sizing.
    pub runtime: RuntimeConfig,
}

impl Default for SafeguardConfig {
    fn default() -> Self {
        Self {
            retention_window_secs: 24 * 60 * 60,
            reaper_interval_secs: 5 * 60,
            notification_timeout_ms: 5_000,
            max_parallel_sends: 32,
            min_radius_km: 1.0,
            max_radius_km: 50.0,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Worker pool sizing for the request runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Workers serving panic/report/escort mutations.
    pub urgent_workers: usize,
    /// Workers serving listings and history.
    pub query_workers: usize,
    /// Maximum queued jobs per pool.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            urgent_workers: 4,
            query_workers: 2,
            queue_capacity: 1024,
        }
    }
}

impl SafeguardConfig {
    /// Load and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// `Internal` if the file cannot be read or parsed, `Validation` if a value
    /// is out of range.
    pub fn from_path(path: impl AsRef<Path>) -> SafeguardResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SafeguardError::internal(format!("read config {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON config document.
    ///
    /// # Errors
    ///
    /// As for [`Self::from_path`].
    pub fn from_json(raw: &str) -> SafeguardResult<Self> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| SafeguardError::internal(format!("parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fail = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.retention_window_secs == 0 {
            return fail("retention_window_secs must be > 0");
        }
        if self.retention_window_secs > MAX_RETENTION_WINDOW_SECS {
            return fail("retention_window_secs must be <= 365 days");
        }
        if self.reaper_interval_secs == 0 {
            return fail("reaper_interval_secs must be > 0");
        }
        if self.notification_timeout_ms == 0 {
            return fail("notification_timeout_ms must be > 0");
        }
        if self.max_parallel_sends == 0 {
            return fail("max_parallel_sends must be > 0");
        }
        if !(self.min_radius_km.is_finite() && self.min_radius_km > 0.0) {
            return fail("min_radius_km must be a positive number");
        }
        if !(self.max_radius_km.is_finite() && self.max_radius_km >= self.min_radius_km) {
            return fail("max_radius_km must be >= min_radius_km");
        }
        if self.runtime.urgent_workers == 0 || self.runtime.query_workers == 0 {
            return fail("runtime worker counts must be > 0");
        }
        if self.runtime.queue_capacity == 0 {
            return fail("runtime.queue_capacity must be > 0");
        }
        Ok(())
    }

    /// Retention window, capped at [`MAX_RETENTION_WINDOW_SECS`] for configs
    /// that skipped [`Self::validate`].
    #[must_use]
    pub fn retention_window(&self) -> chrono::Duration {
        let secs = self.retention_window_secs.min(MAX_RETENTION_WINDOW_SECS);
        chrono::Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
            .unwrap_or_else(|| chrono::Duration::days(365))
    }

    #[must_use]
    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    #[must_use]
    pub const fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }
}
