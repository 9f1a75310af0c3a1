//! Engine configuration
//!
//! Configuration records are read once at engine construction and never
//! mutated during a run. `EngineConfig::load()` layers an optional
//! `matlab-bridge.toml` file with `MATLAB_BRIDGE_*` environment overrides
//! (double underscore separates nesting, e.g.
//! `MATLAB_BRIDGE_POOL__MAX_CONNECTIONS=5`).

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Execution timing and memory budget settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Per-call execution timeout in seconds. `None` disables the
    /// timeout and dispatches synchronously.
    pub execution_timeout_seconds: Option<u64>,

    /// Workspace memory budget in MB. When exceeded before a run, the
    /// largest resident variables are evicted to reclaim headroom.
    pub memory_limit_mb: Option<f64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            execution_timeout_seconds: Some(300),
            memory_limit_mb: None,
        }
    }
}

impl PerformanceConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(timeout) = self.execution_timeout_seconds {
            if timeout == 0 {
                return Err("execution timeout cannot be 0 seconds".to_string());
            }
        }
        if let Some(limit) = self.memory_limit_mb {
            if limit <= 0.0 {
                return Err("memory limit must be positive".to_string());
            }
        }
        Ok(())
    }
}

/// Workspace summarization tiers
///
/// Variables at or below `small_threshold` elements transfer in full,
/// those at or below `medium_threshold` transfer as statistics plus a
/// sample, and anything larger transfers as metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Element count at or below which full values are returned
    pub small_threshold: usize,

    /// Element count at or below which statistical summaries are returned
    pub medium_threshold: usize,

    /// Number of leading elements included in array samples
    pub preview_elements: usize,

    /// Maximum stringified length for non-numeric fallback values
    pub max_string_length: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            small_threshold: 100,
            medium_threshold: 10_000,
            preview_elements: 10,
            max_string_length: 1_000,
        }
    }
}

impl WorkspaceConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.small_threshold == 0 {
            return Err("small threshold cannot be 0".to_string());
        }
        if self.medium_threshold <= self.small_threshold {
            return Err("medium threshold must exceed small threshold".to_string());
        }
        if self.preview_elements == 0 {
            return Err("preview element count cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Optimization target for figure rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeFor {
    Size,
    Quality,
}

/// Figure compression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compression quality (1-100, higher is better quality)
    pub quality: u32,

    /// Render resolution in DPI (50-600)
    pub dpi: u32,

    /// Optimization target
    pub optimize_for: OptimizeFor,

    /// Override quality and DPI per figure from its content
    /// (raster-heavy figures render sharper, line art renders lighter)
    pub smart_optimization: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            quality: 75,
            dpi: 150,
            optimize_for: OptimizeFor::Size,
            smart_optimization: true,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.quality < 1 || self.quality > 100 {
            return Err("quality must be between 1 and 100".to_string());
        }
        if self.dpi < 50 || self.dpi > 600 {
            return Err("dpi must be between 50 and 600".to_string());
        }
        Ok(())
    }
}

/// Figure capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureConfig {
    /// Compression settings for the quality-driven PNG contract.
    /// `None` selects the plain dual-format contract (PNG + SVG per
    /// figure, no post-processing).
    pub compression: Option<CompressionConfig>,

    /// Persist rendered figures as files and return paths instead of
    /// inline bytes
    pub store_as_files: bool,
}

impl Default for FigureConfig {
    fn default() -> Self {
        Self {
            compression: Some(CompressionConfig::default()),
            store_as_files: false,
        }
    }
}

impl FigureConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(compression) = &self.compression {
            compression.validate()?;
        }
        Ok(())
    }
}

/// Connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrently live interpreter processes
    pub max_connections: usize,

    /// Idle eviction threshold in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 3,
            idle_timeout_secs: 300,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_connections == 0 {
            return Err("pool must allow at least one connection".to_string());
        }
        Ok(())
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub performance: PerformanceConfig,
    pub workspace: WorkspaceConfig,
    pub figures: FigureConfig,
    pub pool: PoolConfig,
}

impl EngineConfig {
    /// Load configuration from `matlab-bridge.toml` (optional) with
    /// `MATLAB_BRIDGE_*` environment variable overrides
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("matlab-bridge").required(false))
            .add_source(
                config::Environment::with_prefix("MATLAB_BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let loaded: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.performance
            .validate()
            .and_then(|_| self.workspace.validate())
            .and_then(|_| self.figures.validate())
            .and_then(|_| self.pool.validate())
            .map_err(EngineError::InvalidConfig)
    }
}
