//! Session configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! survivor_policy = "most_transactions"
//!
//! [refresh]
//! dataset_interval_ms = 30000
//! queue_interval_ms = 10000
//!
//! [view]
//! high_density_threshold = 2000
//!
//! [actors]
//! merge = "user:default"
//! reconciler = "user:reconciler"
//!
//! [filter]
//! rolling_window_months = 6
//! statuses = ["approved", "pending"]
//!
//! [filter.type_visibility]
//! Invoice = false
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphResult, ValidationError};
use crate::filter::FilterConfig;
use crate::merge::{SurvivorPolicy, DEFAULT_MERGE_ACTOR};
use crate::view::DEFAULT_HIGH_DENSITY_THRESHOLD;

/// Actor recorded for reconciliation decisions when none is given.
pub const DEFAULT_RECONCILER_ACTOR: &str = "user:reconciler";

fn config_error(reason: String) -> ValidationError {
    ValidationError::InvalidConfig { reason }
}

/// Background refresh cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Dataset re-fetch interval.
    pub dataset_interval_ms: u64,
    /// Reconciliation queue re-fetch interval.
    pub queue_interval_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            dataset_interval_ms: 30_000,
            queue_interval_ms: 10_000,
        }
    }
}

impl RefreshConfig {
    /// Dataset interval as a `Duration`.
    #[must_use]
    pub const fn dataset_interval(&self) -> Duration {
        Duration::from_millis(self.dataset_interval_ms)
    }

    /// Queue interval as a `Duration`.
    #[must_use]
    pub const fn queue_interval(&self) -> Duration {
        Duration::from_millis(self.queue_interval_ms)
    }
}

/// View derivation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Visible-node count above which the view is flagged high density.
    pub high_density_threshold: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            high_density_threshold: DEFAULT_HIGH_DENSITY_THRESHOLD,
        }
    }
}

/// Default actor names written to audit entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Manual merges.
    pub merge: String,
    /// Reconciliation decisions.
    pub reconciler: String,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            merge: DEFAULT_MERGE_ACTOR.to_string(),
            reconciler: DEFAULT_RECONCILER_ACTOR.to_string(),
        }
    }
}

/// Everything a [`crate::session::GraphSession`] is configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Survivor choice for merges of the current selection.
    pub survivor_policy: SurvivorPolicy,
    /// Refresh cadences.
    pub refresh: RefreshConfig,
    /// View settings.
    pub view: ViewConfig,
    /// Default actors.
    pub actors: ActorConfig,
    /// Initial filter.
    pub filter: FilterConfig,
}

impl SessionConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on parse or validation failure.
    pub fn from_toml_str(contents: &str) -> GraphResult<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| config_error(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the file cannot be read,
    /// parsed or validated.
    pub fn load(path: &Path) -> GraphResult<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Like [`SessionConfig::load`], but a missing or broken file yields defaults.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                Self::default()
            }
        }
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if serialization fails.
    pub fn to_toml_string(&self) -> GraphResult<String> {
        toml::to_string_pretty(self).map_err(|e| config_error(format!("failed to serialize config: {e}")).into())
    }

    /// Checks cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.refresh.dataset_interval_ms == 0 || self.refresh.queue_interval_ms == 0 {
            return Err(config_error("refresh intervals must be positive".to_string()));
        }
        if self.actors.merge.trim().is_empty() || self.actors.reconciler.trim().is_empty() {
            return Err(config_error("actor names cannot be empty".to_string()));
        }
        self.filter.validate()
    }
}
