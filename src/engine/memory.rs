//! Workspace memory guard
//!
//! Interpreter sessions accumulate variables across calls with nothing
//! bounding them. The guard estimates aggregate resident size from the
//! interpreter's own variable listing and, when a configured budget is
//! exceeded, evicts the largest variables to reclaim headroom before a
//! run. Guard failures never abort an otherwise-successful run.

use crate::interpreter::{commands, list_variables, Interpreter};
use crate::models::MemoryStatus;
use crate::utils::errors::Result;
use tracing::{info, warn};

/// Fraction of the limit at which `near_limit` is reported
const NEAR_LIMIT_RATIO: f64 = 0.8;

/// Default threshold for directly-invoked large-variable sweeps
pub const DEFAULT_CLEAR_THRESHOLD_MB: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct MemoryGuard {
    limit_mb: Option<f64>,
}

impl MemoryGuard {
    pub fn new(limit_mb: Option<f64>) -> Self {
        Self { limit_mb }
    }

    pub fn limit_mb(&self) -> Option<f64> {
        self.limit_mb
    }

    /// Threshold used for automatic pre-run eviction: half the budget,
    /// capped at the direct-sweep default
    pub fn auto_threshold_mb(&self) -> f64 {
        self.limit_mb
            .map(|limit| (limit / 2.0).min(DEFAULT_CLEAR_THRESHOLD_MB))
            .unwrap_or(DEFAULT_CLEAR_THRESHOLD_MB)
    }

    /// Point-in-time memory summary. Inspection failures degrade to an
    /// empty status rather than raising.
    pub fn status(&self, interpreter: &dyn Interpreter) -> MemoryStatus {
        match self.try_status(interpreter) {
            Ok(status) => status,
            Err(e) => {
                warn!("Error getting memory status: {e}");
                MemoryStatus::empty(self.limit_mb)
            }
        }
    }

    fn try_status(&self, interpreter: &dyn Interpreter) -> Result<MemoryStatus> {
        let variables = list_variables(interpreter)?;

        let mut total_bytes = 0u64;
        let mut largest: Option<(String, u64)> = None;
        for info in &variables {
            total_bytes += info.bytes;
            if largest.as_ref().map(|(_, b)| info.bytes > *b).unwrap_or(true) {
                largest = Some((info.name.clone(), info.bytes));
            }
        }

        let total_size_mb = total_bytes as f64 / (1024.0 * 1024.0);
        let largest_variable_size_mb = largest
            .as_ref()
            .map(|(_, bytes)| *bytes as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        let near_limit = self
            .limit_mb
            .map(|limit| total_size_mb > limit * NEAR_LIMIT_RATIO)
            .unwrap_or(false);

        Ok(MemoryStatus {
            total_size_mb,
            variable_count: variables.len(),
            largest_variable: largest.map(|(name, _)| name),
            largest_variable_size_mb,
            memory_limit_mb: self.limit_mb,
            near_limit,
        })
    }

    /// True when total resident size exceeds the configured budget
    pub fn check_limit(&self, interpreter: &dyn Interpreter) -> bool {
        match self.limit_mb {
            None => false,
            Some(limit) => self.status(interpreter).total_size_mb > limit,
        }
    }

    /// Clear every variable larger than `threshold_mb` and return the
    /// cleared names. Individual clear failures are logged and skipped.
    pub fn clear_large(&self, interpreter: &dyn Interpreter, threshold_mb: f64) -> Vec<String> {
        let variables = match list_variables(interpreter) {
            Ok(variables) => variables,
            Err(e) => {
                warn!("Error clearing large variables: {e}");
                return Vec::new();
            }
        };

        let mut cleared = Vec::new();
        for info in variables {
            let size_mb = info.size_mb();
            if size_mb <= threshold_mb {
                continue;
            }
            match interpreter.evaluate(&commands::clear_variable(&info.name), false) {
                Ok(_) => {
                    info!("Cleared variable '{}' ({size_mb:.1} MB)", info.name);
                    cleared.push(info.name);
                }
                Err(e) => warn!("Error clearing variable '{}': {e}", info.name),
            }
        }
        cleared
    }
}
