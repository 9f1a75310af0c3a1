//! Data model for execution results, figures, and status reporting
//!
//! Everything here is constructed once per call and immutable afterward.
//! All types serialize with `serde` so the protocol layer can hand them
//! to callers without reshaping.

use crate::utils::config::CompressionConfig;
use crate::utils::errors::{EngineError, ErrorKind};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Supported figure encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureFormat {
    Png,
    Svg,
}

impl FigureFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FigureFormat::Png => "png",
            FigureFormat::Svg => "svg",
        }
    }
}

/// Where a rendered figure lives: inline bytes or a file owned by the
/// engine's output directory until the next cleanup pass. Exactly one
/// variant applies to any figure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FigurePayload {
    Inline { data: Bytes },
    FileRef { file_path: PathBuf },
}

/// One rendered figure in one encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigureData {
    #[serde(flatten)]
    pub payload: FigurePayload,

    /// Encoding of the payload
    pub format: FigureFormat,

    /// Compression settings used, when the quality-driven contract
    /// rendered this figure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionConfig>,

    /// Byte size as rendered by the interpreter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,

    /// Byte size after the re-encode pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
}

impl FigureData {
    pub fn inline(data: Bytes, format: FigureFormat) -> Self {
        Self {
            payload: FigurePayload::Inline { data },
            format,
            compression: None,
            original_size: None,
            compressed_size: None,
        }
    }

    pub fn file_ref(file_path: PathBuf, format: FigureFormat) -> Self {
        Self {
            payload: FigurePayload::FileRef { file_path },
            format,
            compression: None,
            original_size: None,
            compressed_size: None,
        }
    }

    pub fn with_sizes(mut self, original: u64, compressed: u64) -> Self {
        self.original_size = Some(original);
        self.compressed_size = Some(compressed);
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn data(&self) -> Option<&Bytes> {
        match &self.payload {
            FigurePayload::Inline { data } => Some(data),
            FigurePayload::FileRef { .. } => None,
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.payload {
            FigurePayload::Inline { .. } => None,
            FigurePayload::FileRef { file_path } => Some(file_path),
        }
    }
}

/// Point-in-time summary of interpreter-resident variable memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatus {
    /// Total resident variable size in MB
    pub total_size_mb: f64,

    /// Number of resident variables
    pub variable_count: usize,

    /// Name of the single largest variable, if any
    pub largest_variable: Option<String>,

    /// Size of the largest variable in MB
    pub largest_variable_size_mb: f64,

    /// Configured memory budget, if any
    pub memory_limit_mb: Option<f64>,

    /// Total exceeds 80% of the configured limit
    pub near_limit: bool,
}

impl MemoryStatus {
    /// Empty status used when the interpreter cannot be inspected
    pub fn empty(memory_limit_mb: Option<f64>) -> Self {
        Self {
            total_size_mb: 0.0,
            variable_count: 0,
            largest_variable: None,
            largest_variable_size_mb: 0.0,
            memory_limit_mb,
            near_limit: false,
        }
    }
}

/// Liveness descriptor for one engine connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub connection_id: String,
    pub uptime_seconds: f64,
    pub last_activity: DateTime<Utc>,
}

/// A contiguous, titled line range within a script. Line numbers are
/// 0-based and the interval is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInfo {
    pub title: String,
    pub start_line: usize,
    pub end_line: usize,

    /// First non-comment, non-blank line of the section
    pub preview: String,
}

/// Structured error detail attached to a failed execution when obtainable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,

    /// Source line the interpreter reported, when parseable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    /// Source lines surrounding the failure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,

    /// Raw interpreter error report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Bounded representation of one workspace variable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableSummary {
    /// Statistical summary for medium and large arrays
    Array(ArraySummary),

    /// Full value for small data
    Full(Value),

    /// Stringified fallback (truncated values and per-variable read
    /// error placeholders)
    Text(String),
}

/// Array summarization tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayTier {
    #[serde(rename = "medium_array")]
    Medium,
    #[serde(rename = "large_array")]
    Large,
}

/// Bounded summary of a numeric array too large for full transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArraySummary {
    #[serde(rename = "type")]
    pub tier: ArrayTier,

    /// Array dimensions as reported by the interpreter
    pub dimensions: Vec<u64>,

    /// Total element count
    pub element_count: u64,

    pub min: f64,
    pub max: f64,
    pub mean: f64,

    /// Leading elements of the flattened array
    pub sample: Vec<f64>,

    /// Estimated footprint at 8 bytes per element
    pub estimated_memory_mb: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Summarized workspace: variable name to bounded representation
pub type WorkspaceSnapshot = BTreeMap<String, VariableSummary>;

/// Outcome of a single execution call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Text output from the run (empty when an error is set)
    pub output: String,

    /// Kind-tagged error message if execution failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Post-run workspace snapshot (empty when an error is set)
    #[serde(default)]
    pub workspace: WorkspaceSnapshot,

    /// Captured figures in interpreter creation order (empty when an
    /// error is set)
    #[serde(default)]
    pub figures: Vec<FigureData>,

    /// Wall-clock duration of the call
    pub execution_time_seconds: f64,

    /// Best-effort memory snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_status: Option<MemoryStatus>,

    /// Structured error detail, when obtainable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl ExecutionResult {
    /// Result of a run that completed without error
    pub fn success(
        output: String,
        workspace: WorkspaceSnapshot,
        figures: Vec<FigureData>,
        execution_time_seconds: f64,
        memory_status: Option<MemoryStatus>,
    ) -> Self {
        Self {
            output,
            error: None,
            workspace,
            figures,
            execution_time_seconds,
            memory_status,
            error_detail: None,
        }
    }

    /// Result of a failed run. Output, workspace, and figures are
    /// always empty; the error message carries the kind tag.
    pub fn failure(
        error: &EngineError,
        execution_time_seconds: f64,
        memory_status: Option<MemoryStatus>,
        error_detail: Option<ErrorDetail>,
    ) -> Self {
        Self {
            output: String::new(),
            error: Some(error.tagged_message()),
            workspace: WorkspaceSnapshot::new(),
            figures: Vec::new(),
            execution_time_seconds,
            memory_status,
            error_detail,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_figure_payload_exclusivity() {
        let inline = FigureData::inline(Bytes::from_static(b"\x89PNG"), FigureFormat::Png);
        assert!(inline.data().is_some());
        assert!(inline.file_path().is_none());

        let file = FigureData::file_ref(PathBuf::from("/tmp/figure_0.png"), FigureFormat::Png);
        assert!(file.data().is_none());
        assert!(file.file_path().is_some());
    }

    #[test]
    fn test_figure_serialization_shape() {
        let inline = FigureData::inline(Bytes::from_static(b"ab"), FigureFormat::Png);
        let json = serde_json::to_value(&inline).unwrap();
        assert!(json.get("data").is_some());
        assert!(json.get("file_path").is_none());
        assert_eq!(json["format"], "png");

        let file = FigureData::file_ref(PathBuf::from("fig.svg"), FigureFormat::Svg)
            .with_sizes(2048, 512);
        let json = serde_json::to_value(&file).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["file_path"], "fig.svg");
        assert_eq!(json["original_size"], 2048);
        assert_eq!(json["compressed_size"], 512);
    }

    #[test]
    fn test_failure_result_shape() {
        let error = EngineError::ExecutionTimeout { seconds: 30 };
        let result = ExecutionResult::failure(&error, 30.1, None, None);

        assert!(result.output.is_empty());
        assert!(result.workspace.is_empty());
        assert!(result.figures.is_empty());
        assert!(!result.is_success());
        assert!(result.error.unwrap().starts_with("Execution Timeout:"));
    }

    #[test]
    fn test_array_summary_tier_names() {
        let summary = ArraySummary {
            tier: ArrayTier::Large,
            dimensions: vec![1000, 1000],
            element_count: 1_000_000,
            min: 0.0,
            max: 1.0,
            mean: 0.5,
            sample: vec![0.1, 0.2],
            estimated_memory_mb: 7.6,
            note: Some("Array too large for full transfer".into()),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "large_array");
        assert!(json["note"].as_str().unwrap().contains("too large"));
    }

    #[test]
    fn test_memory_status_empty() {
        let status = MemoryStatus::empty(Some(512.0));
        assert_eq!(status.variable_count, 0);
        assert_eq!(status.memory_limit_mb, Some(512.0));
        assert!(!status.near_limit);
    }
}
