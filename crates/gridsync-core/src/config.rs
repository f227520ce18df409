//! Recalculation limits, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use gridsync_engine::EvaluatorLimits;

use crate::error::{CoreError, Result};

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

/// Bounds on a single write's recalculation, plus evaluator limits.
///
/// Every field is optional in the file; missing fields take the defaults below.
///
/// ```toml
/// max_closure_cells = 10000
/// time_budget_ms = 2000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecalcConfig {
    /// Largest dependents closure a single write may recompute.
    pub max_closure_cells: usize,
    /// Wall-clock budget for one write's cascade, in milliseconds.
    pub time_budget_ms: u64,
    /// Deepest chain of formula references the resolver will follow.
    pub max_depth: usize,
    /// Most cells one resolution pass may fetch.
    pub max_gathered_cells: usize,
    pub max_operations: u64,
    pub max_expr_depth: usize,
    /// Capacity of the change feed channel.
    pub feed_capacity: usize,
}

impl Default for RecalcConfig {
    fn default() -> Self {
        RecalcConfig {
            max_closure_cells: 10_000,
            time_budget_ms: 2_000,
            max_depth: 256,
            max_gathered_cells: 100_000,
            max_operations: 1_000_000,
            max_expr_depth: 128,
            feed_capacity: 256,
        }
    }
}

impl RecalcConfig {
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read a config file, refusing anything larger than 1 MiB.
    pub fn load(path: &Path) -> Result<Self> {
        let config_error = |message: String| CoreError::Config {
            path: path.to_path_buf(),
            message,
        };

        let meta = std::fs::metadata(path)?;
        if meta.len() > MAX_CONFIG_FILE_BYTES {
            return Err(config_error(format!(
                "file too large ({} bytes, max {})",
                meta.len(),
                MAX_CONFIG_FILE_BYTES
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|err| config_error(err.to_string()))
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn evaluator_limits(&self) -> EvaluatorLimits {
        EvaluatorLimits {
            max_operations: self.max_operations,
            max_expr_depth: self.max_expr_depth,
        }
    }
}
